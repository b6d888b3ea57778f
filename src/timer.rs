//! Minimal timer dispatcher.
//!
//! The distilled design treats the full timer wheel as an external
//! collaborator; this crate supplies the smallest stand-in that makes
//! [`crate::task_manager::loop_run`] and timeout-driven waits observable end
//! to end: a sorted list of `(deadline, waiter)` entries, always ordered
//! soonest-first. [`timer_check`] notifies and removes every entry whose
//! deadline has elapsed; [`loop_idle_time`] reports how long the event loop
//! may safely idle before the next one fires.
//!
//! [`sleep`] builds a one-shot deadline on top of this list: it parks a
//! private [`Event`] on the calling task's own stack, registers a pointer to
//! it here, and blocks unconditionally until either `timer_check` fires it
//! or the task is woken some other way. Because tasks are real stackful
//! coroutines, the local `Event` stays at a fixed address across the
//! suspension - this is not a future being polled, the whole call frame is
//! simply parked on the task's own stack until resumed.

use crate::error::Result;
use crate::event::Event;
use crate::port::{ClockTicks, PortTrait, TIME_FOREVER};
use crate::task_manager::current_port;
use alloc::vec::Vec;
use core::ptr::{addr_of_mut, NonNull};

struct Deadline {
    at: ClockTicks,
    event: NonNull<Event>,
}

// Soonest deadline always at index 0. `Vec::new()` is a `const fn`, so this
// can be a plain `static mut` without a lazy-init wrapper.
static mut TIMERS: Vec<Deadline> = Vec::new();

fn with_timers<R>(f: impl FnOnce(&mut Vec<Deadline>) -> R) -> R {
    let port = current_port();
    let state = port.enter_critical();
    let result = unsafe { f(&mut *addr_of_mut!(TIMERS)) };
    port.exit_critical(state);
    result
}

/// Registers `event` to be notified once `monotonic_time() >= at`.
///
/// # Safety
/// `event` must remain valid (i.e. the stack frame that owns it must not
/// return) until either it fires or [`cancel`] removes it.
pub(crate) unsafe fn register(at: ClockTicks, event: &mut Event) {
    with_timers(|timers| {
        let ptr = NonNull::from(event);
        let pos = timers.iter().position(|d| d.at > at).unwrap_or(timers.len());
        timers.insert(pos, Deadline { at, event: ptr });
    });
}

/// Removes `event` from the pending list if it is still there. A no-op if
/// it already fired (and was removed by [`timer_check`]) or was never
/// registered.
pub(crate) unsafe fn cancel(event: &mut Event) {
    let ptr = NonNull::from(event);
    with_timers(|timers| timers.retain(|d| d.event != ptr));
}

/// Dispatches every timer whose deadline has elapsed, notifying its event.
/// Called once per [`crate::task_manager::loop_run`] iteration.
pub fn timer_check() {
    let now = current_port().monotonic_time();
    loop {
        let due = with_timers(|timers| match timers.first() {
            Some(first) if first.at <= now => Some(timers.remove(0)),
            _ => None,
        });
        match due {
            Some(d) => {
                log::trace!("timer fired at {now}");
                unsafe { (*d.event.as_ptr()).notify() };
            }
            None => break,
        }
    }
}

/// Ticks until the next registered deadline, or [`TIME_FOREVER`] if none are
/// pending. Consulted by the event loop's idle handler so it never sleeps
/// past a timer that needs to fire.
pub fn loop_idle_time() -> ClockTicks {
    let now = current_port().monotonic_time();
    with_timers(|timers| match timers.first() {
        Some(d) => (d.at - now).max(0),
        None => TIME_FOREVER,
    })
}

/// Suspends the calling task for `duration_ticks`, driven by this module's
/// timer list rather than a busy wait. Returns `Err(Error::SchedulingError)`
/// if there is no other runnable task to hand control to in the meantime -
/// the same edge case [`crate::event::Event::wait_condition_timeout`]
/// surfaces.
pub fn sleep(duration_ticks: ClockTicks) -> Result<()> {
    if duration_ticks <= 0 {
        crate::task_manager::task_yield();
        return Ok(());
    }
    let port = current_port();
    let deadline = port.monotonic_time() + duration_ticks;
    let mut event = Event::new("timer-sleep");
    unsafe { register(deadline, &mut event) };
    log::trace!(
        "task '{}' sleeping until tick {deadline}",
        crate::task_manager::task_self().name()
    );
    let result = event.wait(TIME_FOREVER);
    // Defensive: if `wait` returned without the timer ever firing (e.g. the
    // SchedulingError edge case), the entry must not outlive `event`.
    unsafe { cancel(&mut event) };
    result
}

/// Alias for [`sleep`]: suspends the calling task until `duration_ticks` from
/// now. Kept as a distinct name because the design this crate is modeled on
/// exposes both a relative "sleep" and an "after" spelling of the same
/// one-shot deadline at its call sites.
pub fn after(duration_ticks: ClockTicks) -> Result<()> {
    sleep(duration_ticks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_manager;
    use sequential_test::sequential;

    #[test]
    #[sequential]
    fn idle_time_is_forever_with_no_pending_timers() {
        task_manager::reset_for_tests();
        with_timers(|t| t.clear());
        assert_eq!(loop_idle_time(), TIME_FOREVER);
    }

    #[test]
    #[sequential]
    fn timer_check_notifies_and_removes_expired_entries() {
        task_manager::reset_for_tests();
        with_timers(|t| t.clear());
        let mut event = Event::new("test-deadline");
        let now = current_port().monotonic_time();
        unsafe { register(now, &mut event) };
        assert_eq!(with_timers(|t| t.len()), 1);
        timer_check();
        assert_eq!(with_timers(|t| t.len()), 0);
    }

    #[test]
    #[sequential]
    fn sleep_of_zero_yields_without_registering_a_timer() {
        task_manager::reset_for_tests();
        with_timers(|t| t.clear());
        assert_eq!(sleep(0), Ok(()));
        assert_eq!(with_timers(|t| t.len()), 0);
    }
}
