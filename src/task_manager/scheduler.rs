//! Core round-robin scheduling algorithm.
//!
//! `plan_switch` is the single place that decides what runs next. It never
//! touches the stack itself - see [`super::switch_to`] for where the actual
//! `context::swap` happens, deliberately outside the critical section this
//! method runs under.

use super::list::List;
use super::task::{ListId, Task, TaskState};
use crate::context;
use crate::error::{Error, Result};
use crate::port::{ClockTicks, PortTrait, TIME_FOREVER};
use crate::ports::ActivePort;
use core::ptr::NonNull;

/// The two context slots `context::swap` needs, computed under the critical
/// section by [`Scheduler::plan_switch`] and consumed just outside it.
pub(crate) struct SwitchPlan {
    pub(crate) from: *mut context::Context,
    pub(crate) to: *const context::Context,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Init,
    Run,
    IdleOrEvent,
    Exit,
}

pub(crate) struct Scheduler {
    pub(crate) port: ActivePort,
    pub(crate) ready: List,
    pub(crate) wait: List,
    pub(crate) finish: List,
    pub(crate) current: Option<NonNull<Task>>,
    pub(crate) main: Option<NonNull<Task>>,
    pub(crate) stop_flag: bool,
    pub(crate) loop_stop_code: i32,
    pub(crate) state: SchedulerState,
}

impl Scheduler {
    pub(crate) const fn new(port: ActivePort) -> Self {
        Scheduler {
            port,
            ready: List::new(ListId::Ring),
            wait: List::new(ListId::Wait),
            finish: List::new(ListId::Finish),
            current: None,
            main: None,
            stop_flag: false,
            loop_stop_code: 0,
            state: SchedulerState::Init,
        }
    }

    /// Round-robin core: retires the current task according to the state
    /// it set for itself before calling in, and picks the next ready task
    /// (creating one, if necessary, for the caller to keep running as).
    ///
    /// Decides everything under the critical section but does *not* perform
    /// the stack swap itself - it hands back the `(from, to)` context slots
    /// for the caller to swap between once the critical section has been
    /// released, so that interrupts may fire again during the switch itself.
    /// `Ok(None)` means no switch is needed (the caller remains current).
    ///
    /// If the current task is the only task and tried to leave
    /// `Running`/`Ready` (i.e. tried to block), no candidate exists: its
    /// state is restored to `Running` and `Error::SchedulingError` is
    /// returned. A lone task trying to yield, or the last task finishing,
    /// are not errors - see the two corresponding match arms below.
    pub(crate) unsafe fn plan_switch(&mut self) -> Result<Option<SwitchPlan>> {
        let prev = self.current.expect("plan_switch called with no current task");
        let prev_state = prev.as_ref().state;

        let next = match prev_state {
            TaskState::Ready | TaskState::Running => {
                if self.ready.is_empty() {
                    // Only the current task exists: yielding alone is a
                    // no-op, not a scheduling error.
                    let mut prev_mut = prev;
                    prev_mut.as_mut().state = TaskState::Running;
                    return Ok(None);
                }
                self.ready.push_back(prev);
                self.ready.pop_front().unwrap()
            }
            TaskState::Wait => {
                if self.ready.is_empty() {
                    let mut prev_mut = prev;
                    prev_mut.as_mut().state = TaskState::Running;
                    return Err(Error::SchedulingError);
                }
                self.wait.push_back(prev);
                self.ready.pop_front().unwrap()
            }
            TaskState::Finish => {
                if self.ready.is_empty() {
                    // The last task finished; the event loop is responsible
                    // for noticing there is nothing left to run.
                    return Ok(None);
                }
                self.finish.push_back(prev);
                self.ready.pop_front().unwrap()
            }
        };

        let mut next_mut = next;
        next_mut.as_mut().state = TaskState::Running;
        self.current = Some(next);

        let from = &mut (*prev.as_ptr()).context as *mut context::Context;
        let to = &(*next.as_ptr()).context as *const context::Context;
        Ok(Some(SwitchPlan { from, to }))
    }

    pub(crate) fn current(&self) -> NonNull<Task> {
        self.current.expect("no current task: scheduler not initialized")
    }

    pub(crate) fn loop_idle_time(&self) -> ClockTicks {
        // The supplied timer dispatcher (`crate::timer`) tracks the next
        // deadline independently; the scheduler itself has no notion of
        // timers, so it always reports "no opinion" and lets the event
        // loop consult the timer module directly.
        TIME_FOREVER
    }
}
