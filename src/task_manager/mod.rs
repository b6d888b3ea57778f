//! Task lifecycle and the round-robin scheduler.
//!
//! This module owns the single process-wide runtime: one ready queue, one
//! wait list, one finish list, and a `current` task pointer. All of it lives
//! in the [`SCHEDULER`] static and is only ever touched from the cooperative
//! scheduling points described in [`crate`] - `task_yield`, `task_exit`, an
//! event wait, or a wake request arriving from an interrupt. There is
//! deliberately no internal thread-safety beyond the port's critical
//! section: this crate schedules exactly one call stack at a time.
//!
//! # Examples
//!
//! ```no_run
//! use event_hub::task_manager::{self, TaskHandle};
//! use core::ffi::c_void;
//!
//! extern "C" fn nothing(_: *mut c_void) {}
//!
//! fn worker(_arg: *mut c_void) -> i32 {
//!     42
//! }
//!
//! event_hub::global_init().unwrap();
//! let t = task_manager::task_create("worker", 16 * 1024, core::ptr::null_mut(), worker).unwrap();
//! let result = task_manager::task_join(t, event_hub::port::TIME_FOREVER);
//! assert_eq!(result, Ok(42));
//! event_hub::global_exit();
//! ```

mod list;
mod scheduler;
mod task;

pub use scheduler::SchedulerState;
pub use task::{TaskHandle, TaskState};

use crate::context::{self, EntryFn};
use crate::error::{Error, Result};
use crate::module::ModuleHooks;
use crate::port::{ClockTicks, PortTrait};
use crate::ports::ActivePort;
use core::ffi::c_void;
use core::ptr::{addr_of_mut, NonNull};
use linkme::distributed_slice;
use scheduler::{Scheduler, SchedulerState, SwitchPlan};
use task::{ListId, Stack, Task};

static mut SCHEDULER: Scheduler = Scheduler::new(ActivePort::new());

/// Runs `f` with exclusive access to the scheduler, inside the port's
/// critical section. The actual stack swap always happens *outside* any
/// call to this helper - see [`switch_to`].
fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    unsafe {
        let sched = addr_of_mut!(SCHEDULER);
        let state = (*sched).port.enter_critical();
        let result = f(&mut *sched);
        (*sched).port.exit_critical(state);
        result
    }
}

pub(crate) fn current_port() -> &'static ActivePort {
    unsafe { &(*addr_of_mut!(SCHEDULER)).port }
}

/// Moves the current task to `next_state` and lets the scheduler pick what
/// runs next, all under the critical section, then performs the actual
/// stack swap *after* the critical section has been released - interrupts
/// may fire again while the switch itself is in flight.
fn switch_to(next_state: TaskState) -> Result<()> {
    let plan = with_scheduler(|s| unsafe {
        let mut cur = s.current();
        cur.as_mut().state = next_state;
        s.plan_switch()
    });
    match plan {
        Ok(Some(SwitchPlan { from, to })) => {
            unsafe { context::swap(core::ptr::null_mut(), from, to) };
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Establishes the calling context as the main task and marks the
/// scheduler ready to run. Called once by [`crate::global_init`].
pub(crate) fn init_main_task() -> Result<()> {
    let main = Task::new_boxed_main("main");
    with_scheduler(|s| {
        s.main = Some(main);
        s.current = Some(main);
        s.stop_flag = false;
    });
    Ok(())
}

pub(crate) fn teardown_main_task() {
    with_scheduler(|s| {
        if let Some(main) = s.main.take() {
            unsafe { Task::drop_boxed(main) };
        }
        s.current = None;
    });
}

fn task_manager_init() -> Result<()> {
    init_main_task()
}

fn task_manager_exit() {
    teardown_main_task();
}

#[distributed_slice(crate::module::MODULES)]
static TASK_MANAGER_MODULE: ModuleHooks = ModuleHooks {
    name: "task_manager",
    init: task_manager_init,
    exit: task_manager_exit,
};

/// Creates a task with a freshly allocated stack, appends it to the ready
/// queue, and returns a handle to it. The task begins running the next time
/// the scheduler reaches it.
pub fn task_create(
    name: &'static str,
    stack_size: usize,
    arg: *mut c_void,
    entry: EntryFn,
) -> Result<TaskHandle> {
    let port = current_port();
    let layout = core::alloc::Layout::array::<u8>(stack_size).map_err(|_| Error::InvalidParameter)?;
    let ptr = unsafe { port.alloc(layout) };
    if ptr.is_null() {
        return Err(Error::MallocError);
    }
    let stack = Stack::Owned { ptr, len: stack_size };
    create_with_stack(name, stack, arg, entry)
}

/// Creates a task over caller-provided static storage instead of an
/// allocation; the runtime never frees this stack.
pub fn task_create_static(
    name: &'static str,
    stack: &'static mut [u8],
    arg: *mut c_void,
    entry: EntryFn,
) -> Result<TaskHandle> {
    create_with_stack(name, Stack::Static(stack), arg, entry)
}

fn create_with_stack(
    name: &'static str,
    stack: Stack,
    arg: *mut c_void,
    entry: EntryFn,
) -> Result<TaskHandle> {
    let node = unsafe { Task::new_boxed(name, stack, entry, arg)? };
    with_scheduler(|s| unsafe {
        s.ready.push_back(node);
        (*node.as_ptr()).state = TaskState::Ready;
    });
    log::trace!("task '{name}' created");
    Ok(TaskHandle(node))
}

/// Returns a handle to the currently running task.
pub fn task_self() -> TaskHandle {
    TaskHandle(with_scheduler(|s| s.current()))
}

/// Surrenders the CPU, letting other ready tasks run; returns once this
/// task is scheduled again. A no-op if no other task is runnable.
pub fn task_yield() {
    // A lone task yielding is documented as a no-op, never an error - see
    // `Scheduler::plan_switch`.
    let _ = switch_to(TaskState::Ready);
}

/// Used internally by [`crate::event::Event`] to suspend the calling task.
/// Differs from `task_yield` only in the state it leaves the current task
/// in before asking the scheduler what runs next: `Wait` instead of `Ready`.
pub(crate) fn task_block_self() -> Result<()> {
    switch_to(TaskState::Wait)
}

/// Marks the current task finished with `result` and switches away. Never
/// returns for a non-main task; a no-op for the main task (the event loop
/// owns main's lifetime, see [`loop_exit`]).
pub fn task_exit(result: i32) -> ! {
    let is_main = with_scheduler(|s| Some(s.current()) == s.main);
    if is_main {
        // The caller almost certainly meant `loop_exit`; exiting main
        // outside the loop would orphan the scheduler with no `current`.
        log::warn!("task_exit called on the main task; ignoring");
        loop {
            task_yield();
        }
    }
    let cur = with_scheduler(|s| unsafe {
        let mut cur = s.current();
        cur.as_mut().state = TaskState::Finish;
        cur.as_mut().result = result;
        cur
    });
    // `notify` may itself call `task_wake`, which takes its own lock on
    // `SCHEDULER` - it must run outside the `with_scheduler` borrow above, or
    // the nested call would alias `&mut Scheduler` with the still-live outer
    // one. Running it here, before `plan_switch`, also means a waiter it
    // wakes (e.g. a joiner parked on this task's `done_event`) is already
    // back on the ready queue by the time `plan_switch` looks for one.
    unsafe { (*cur.as_ptr()).done_event.notify() };
    let plan = with_scheduler(|s| unsafe { s.plan_switch() });
    match plan {
        Ok(Some(SwitchPlan { from, to })) => {
            unsafe { context::swap(core::ptr::null_mut(), from, to) };
            unreachable!("a finished task must never be scheduled again");
        }
        Ok(None) => {
            // The last task in the system finished; there is nothing left
            // to hand control to, so this call stack - and the task's own
            // stack it's still running on - simply parks forever.
            log::error!("task_exit: no other task to run");
            loop {
                core::hint::spin_loop();
            }
        }
        Err(e) => {
            log::error!("task_exit: unexpected error from the scheduler: {e}");
            loop {
                core::hint::spin_loop();
            }
        }
    }
}

/// Moves a `Wait`-ing task back to the ready queue immediately behind the
/// currently running task. A no-op if the task is not currently waiting.
/// Safe to call from an interrupt context via the port's critical section.
pub fn task_wake(task: TaskHandle) {
    with_scheduler(|s| unsafe {
        let mut node = task.0;
        if node.as_ref().state != TaskState::Wait {
            return;
        }
        s.wait.remove(node);
        node.as_mut().state = TaskState::Ready;
        s.ready.push_back(node);
    });
    current_port().idle_break();
}

/// Waits for `task` to finish, with `timeout_ticks` (`TIME_FOREVER` for no
/// limit). On success the task is destroyed and its result returned.
pub fn task_join(task: TaskHandle, timeout_ticks: ClockTicks) -> Result<i32> {
    let is_finished = || unsafe { (*task.as_ptr()).state == TaskState::Finish };
    if is_finished() {
        return reap(task);
    }

    // Once the loop has returned, nothing is left to drive a blocking wait -
    // a join on a task still `Wait`-ing at that point just observes the exit
    // state and reaps it synchronously instead of calling into `done.wait`.
    if scheduler_state() == SchedulerState::Exit {
        return reap(task);
    }

    // `task`'s `done_event` is private to it and notified exactly once, by
    // `task_exit`, the moment it finishes - waiting on it unconditionally is
    // therefore equivalent to waiting specifically for `task`, with no
    // predicate required. This also registers the caller as a real waiter,
    // so `task_exit`'s `notify` has someone to wake instead of the call
    // being an unanswered no-op.
    let done = unsafe { &mut (*task.as_ptr()).done_event };
    match done.wait(timeout_ticks) {
        Ok(()) => reap(task),
        Err(e) => Err(e),
    }
}

fn reap(task: TaskHandle) -> Result<i32> {
    with_scheduler(|s| unsafe {
        let node = task.0;
        match node.as_ref().list_id {
            ListId::Ring => s.ready.remove(node),
            ListId::Wait => s.wait.remove(node),
            ListId::Finish => s.finish.remove(node),
            ListId::Detached => {}
        }
        let result = node.as_ref().result;
        Task::drop_boxed(node);
        Ok(result)
    })
}

/// Unconditionally removes and frees a task. The caller must ensure the
/// task is not the currently running one and is not linked into any list
/// concurrently being walked.
pub fn task_destroy(task: TaskHandle) {
    with_scheduler(|s| unsafe {
        let node = task.0;
        match node.as_ref().list_id {
            ListId::Ring => s.ready.remove(node),
            ListId::Wait => s.wait.remove(node),
            ListId::Finish => s.finish.remove(node),
            ListId::Detached => {}
        }
        Task::drop_boxed(node);
    });
}

/// Drives the scheduler from the main task: advances timers, runs every
/// other ready task once, and parks in the port's idle handler when there
/// is nothing to do. Returns the code passed to [`loop_exit`].
pub fn loop_run() -> i32 {
    with_scheduler(|s| {
        s.state = SchedulerState::Run;
        s.stop_flag = false;
    });
    loop {
        crate::timer::timer_check();
        task_yield();
        if with_scheduler(|s| s.stop_flag) {
            break;
        }
        // Only park in the idle handler once there is genuinely nothing
        // left to run - otherwise a ring with more than one other task
        // would idle (potentially forever, on a port with no other waker)
        // after visiting just one of them instead of cycling the rest.
        if with_scheduler(|s| s.ready.is_empty()) {
            with_scheduler(|s| s.state = SchedulerState::IdleOrEvent);
            let wait = crate::timer::loop_idle_time();
            current_port().idle_or_extern_event_handler(wait);
            with_scheduler(|s| s.state = SchedulerState::Run);
        }
    }
    with_scheduler(|s| {
        s.state = SchedulerState::Exit;
        s.loop_stop_code
    })
}

/// Requests that [`loop_run`] stop after its current iteration and return
/// `code`. Takes effect the next time the running `loop_run` checks its
/// stop flag - calling this before `loop_run` has started has no effect,
/// since entering the loop resets the flag (see [`loop_run`] step 1).
pub fn loop_exit(code: i32) {
    with_scheduler(|s| {
        s.loop_stop_code = code;
        s.stop_flag = true;
    });
}

/// The scheduler's current phase within [`loop_run`]: `Init` before the
/// first call, `Run` while scheduling tasks, `IdleOrEvent` while parked in
/// the port's idle handler, and `Exit` once the loop has returned.
pub fn scheduler_state() -> SchedulerState {
    with_scheduler(|s| s.state)
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    with_scheduler(|s| unsafe {
        while let Some(t) = s.ready.pop_front() {
            Task::drop_boxed(t);
        }
        while let Some(t) = s.wait.pop_front() {
            Task::drop_boxed(t);
        }
        while let Some(t) = s.finish.pop_front() {
            Task::drop_boxed(t);
        }
        s.stop_flag = false;
        s.loop_stop_code = 0;
    });
    teardown_main_task();
    init_main_task().unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequential_test::sequential;

    extern "C" fn _unused(_: *mut c_void) {}

    fn entry_return_42(_: *mut c_void) -> i32 {
        42
    }

    #[test]
    #[sequential]
    fn hello_join_returns_task_result() {
        reset_for_tests();
        let t = task_create("hello", 32 * 1024, core::ptr::null_mut(), entry_return_42).unwrap();
        // drive the scheduler until the task has had a chance to run and exit
        for _ in 0..8 {
            task_yield();
        }
        let result = task_join(t, crate::port::TIME_FOREVER);
        assert_eq!(result, Ok(42));
    }

    #[test]
    #[sequential]
    fn yield_with_single_task_is_a_no_op() {
        reset_for_tests();
        task_yield();
        task_yield();
        assert_eq!(task_self().state(), TaskState::Running);
    }
}
