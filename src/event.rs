//! Minimal notify/wait primitive.
//!
//! This is the smallest event object that makes [`crate::task_manager::task_join`]
//! and timeout-driven waits observable: a list of parked waiters, each with
//! its own predicate. [`Event::notify`] walks the list and wakes any waiter
//! whose predicate currently holds; waiters whose predicate is still false
//! stay parked. It is not the full pluggable named-event-type registry the
//! wider system exposes - just enough surface for the scheduler to build
//! `join` and timed sleeps on top of.

use crate::error::{Error, Result};
use crate::port::{ClockTicks, TIME_FOREVER};
use crate::task_manager::{current_port, task_self, task_wake, task_yield};
use alloc::vec::Vec;

/// What a waiter is actually parked on: either a user-supplied condition
/// re-checked on every wake, or nothing at all - "wake me on the next
/// `notify`, whatever it's for". The timer dispatcher's one-shot deadlines
/// (`crate::timer`) use the latter: by construction there is exactly one
/// reason a dedicated per-sleep event is ever notified.
enum Condition {
    Predicate(fn() -> bool),
    Unconditional,
}

impl Condition {
    fn holds(&self) -> bool {
        match self {
            Condition::Predicate(f) => f(),
            Condition::Unconditional => true,
        }
    }
}

struct Waiter {
    task: crate::task_manager::TaskHandle,
    condition: Condition,
}

/// A notify/wait object that tasks park on until a predicate they supply
/// becomes true, or a timeout elapses.
pub struct Event {
    name: &'static str,
    waiters: Vec<Waiter>,
}

impl Event {
    pub fn new(name: &'static str) -> Self {
        Event {
            name,
            waiters: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wakes every parked waiter whose condition currently holds. Waiters
    /// whose condition is still false remain parked.
    pub fn notify(&mut self) {
        let mut still_waiting = Vec::with_capacity(self.waiters.len());
        for waiter in self.waiters.drain(..) {
            if waiter.condition.holds() {
                task_wake(waiter.task);
            } else {
                still_waiting.push(waiter);
            }
        }
        self.waiters = still_waiting;
    }

    /// Suspends the calling task until `predicate` returns true or
    /// `timeout_ticks` elapses (`TIME_FOREVER` to wait indefinitely).
    ///
    /// Returns `Err(Error::SchedulingError)` if there is no other runnable
    /// task to switch to, without ever blocking - the scheduler edge case
    /// where the caller is the only task that exists.
    pub fn wait_condition_timeout(
        &mut self,
        predicate: fn() -> bool,
        timeout_ticks: ClockTicks,
    ) -> Result<()> {
        if predicate() {
            return Ok(());
        }
        self.wait_on(Condition::Predicate(predicate), timeout_ticks)
    }

    /// Suspends the calling task until [`Event::notify`] is called on this
    /// event, or `timeout_ticks` elapses. Unlike
    /// [`wait_condition_timeout`](Event::wait_condition_timeout) there is no
    /// condition to re-check: any `notify` wakes the caller. Used by
    /// [`crate::timer`] to implement `sleep`, where the event is private to
    /// a single deadline and firing is itself the only thing that ever
    /// calls `notify`.
    pub fn wait(&mut self, timeout_ticks: ClockTicks) -> Result<()> {
        self.wait_on(Condition::Unconditional, timeout_ticks)
    }

    fn wait_on(&mut self, condition: Condition, timeout_ticks: ClockTicks) -> Result<()> {
        let port = current_port();
        let deadline = if timeout_ticks == TIME_FOREVER {
            None
        } else {
            Some(port.monotonic_time() + timeout_ticks)
        };
        let me = task_self();
        self.waiters.push(Waiter { task: me, condition });
        // A private, per-call event dedicated solely to this wait's own
        // deadline, registered with the timer module exactly like
        // `crate::timer::sleep` registers its own. `me` is pushed onto it
        // directly so `timer_check` firing it has someone to `task_wake` -
        // without this, a pending timeout would only ever be noticed
        // reactively, after some unrelated wake happened to return control
        // here.
        let mut timeout_event = Event::new("wait-timeout");
        if deadline.is_some() {
            timeout_event.waiters.push(Waiter {
                task: me,
                condition: Condition::Unconditional,
            });
        }
        let result = loop {
            if let Some(at) = deadline {
                unsafe { crate::timer::register(at, &mut timeout_event) };
            }
            let blocked = crate::task_manager::task_block_self();
            if deadline.is_some() {
                unsafe { crate::timer::cancel(&mut timeout_event) };
            }
            if let Err(e) = blocked {
                break Err(e);
            }
            // Deadline first: an `Unconditional` wait's own condition is
            // vacuously true on any wake, so it cannot itself tell a real
            // `notify` apart from this wait's own timeout firing - the
            // elapsed clock is the only signal that can.
            if let Some(deadline) = deadline {
                if port.monotonic_time() >= deadline {
                    break Err(Error::Timeout);
                }
            }
            let holds = self
                .waiters
                .iter()
                .find(|w| w.task == me)
                .map(|w| w.condition.holds())
                .unwrap_or(true); // already removed by `notify`: condition held
            if holds {
                break Ok(());
            }
            // spurious wake (e.g. another notify that didn't satisfy this
            // waiter's condition): yield once so other tasks make progress,
            // then re-check.
            task_yield();
        };
        self.remove_waiter(me);
        if deadline.is_some() {
            timeout_event.waiters.retain(|w| w.task != me);
        }
        result
    }

    fn remove_waiter(&mut self, task: crate::task_manager::TaskHandle) {
        self.waiters.retain(|w| w.task != task);
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        debug_assert!(
            self.waiters.is_empty(),
            "event '{}' dropped with parked waiters",
            self.name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_manager;
    use core::sync::atomic::{AtomicBool, Ordering};
    use sequential_test::sequential;

    static FLAG: AtomicBool = AtomicBool::new(false);

    fn flag_set() -> bool {
        FLAG.load(Ordering::SeqCst)
    }

    #[test]
    #[sequential]
    fn wait_returns_immediately_if_predicate_already_true() {
        task_manager::reset_for_tests();
        FLAG.store(true, Ordering::SeqCst);
        let mut event = Event::new("already-true");
        assert_eq!(event.wait_condition_timeout(flag_set, TIME_FOREVER), Ok(()));
        FLAG.store(false, Ordering::SeqCst);
    }
}
