//! Task record.

use crate::context::{Context, EntryFn};
use crate::event::Event;
use alloc::boxed::Box;
use core::ffi::c_void;
use core::ptr::NonNull;

/// A task's position is always exactly one of these; tracked redundantly on
/// the task itself so debug builds can assert the "one list at a time"
/// invariant when splicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListId {
    Ring,
    Wait,
    Finish,
    Detached,
}

/// Observable lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Wait,
    Finish,
}

/// An owned stack is released through the same port's `dealloc` that
/// allocated it, never through the global allocator - a bare-metal port
/// backed by its own heap would otherwise leak or corrupt memory if the
/// stack came back through `Box`'s allocator instead.
pub(crate) enum Stack {
    Owned { ptr: *mut u8, len: usize },
    Static(&'static mut [u8]),
}

impl Stack {
    pub(crate) fn bounds(&self) -> (*mut u8, *mut u8) {
        match self {
            Stack::Owned { ptr, len } => (*ptr, unsafe { ptr.add(*len) }),
            Stack::Static(s) => {
                let lo = s.as_ptr() as *mut u8;
                (lo, unsafe { lo.add(s.len()) })
            }
        }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if let Stack::Owned { ptr, len } = self {
            let layout = core::alloc::Layout::array::<u8>(*len).expect("layout was valid at allocation time");
            unsafe { super::current_port().dealloc(*ptr, layout) };
        }
    }
}

pub(crate) struct Task {
    pub(crate) name: &'static str,
    pub(crate) stack: Stack,
    pub(crate) context: Context,
    pub(crate) state: TaskState,
    pub(crate) result: i32,
    pub(crate) list_id: ListId,
    pub(crate) next: Option<NonNull<Task>>,
    pub(crate) prev: Option<NonNull<Task>>,
    pub(crate) done_event: Event,
}

impl Task {
    pub(crate) unsafe fn new_boxed(
        name: &'static str,
        stack: Stack,
        entry: EntryFn,
        arg: *mut c_void,
    ) -> crate::error::Result<NonNull<Task>> {
        let (lo, hi) = stack.bounds();
        let context = Context::make(lo, hi, entry, arg)?;
        let task = Box::new(Task {
            name,
            stack,
            context,
            state: TaskState::Wait,
            result: 0,
            list_id: ListId::Detached,
            next: None,
            prev: None,
            done_event: Event::new("task-done"),
        });
        Ok(NonNull::new_unchecked(Box::into_raw(task)))
    }

    /// Builds the main task's record. Unlike a spawned task, main already
    /// has a live call stack when this runs, so no initial context frame is
    /// synthesized - `context` starts out null and is only ever written to
    /// by `context::swap` the first time the scheduler switches away from
    /// main.
    pub(crate) fn new_boxed_main(name: &'static str) -> NonNull<Task> {
        let task = Box::new(Task {
            name,
            stack: Stack::Static(&mut []),
            context: Context(core::ptr::null_mut()),
            state: TaskState::Running,
            result: 0,
            list_id: ListId::Detached,
            next: None,
            prev: None,
            done_event: Event::new("main-done"),
        });
        unsafe { NonNull::new_unchecked(Box::into_raw(task)) }
    }

    /// Reclaims the heap allocation made by [`Task::new_boxed`].
    ///
    /// # Safety
    /// `ptr` must not be referenced again after this call, and must not be
    /// the currently-running task.
    pub(crate) unsafe fn drop_boxed(ptr: NonNull<Task>) {
        drop(Box::from_raw(ptr.as_ptr()));
    }
}

/// A stable, copyable reference to a task owned by the scheduler.
///
/// Valid for as long as the task has not been destroyed by
/// [`crate::task_manager::task_destroy`] or reaped by
/// [`crate::task_manager::task_join`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle(pub(crate) NonNull<Task>);

unsafe impl Send for TaskHandle {}

impl TaskHandle {
    pub(crate) fn as_ptr(self) -> *mut Task {
        self.0.as_ptr()
    }

    pub fn name(self) -> &'static str {
        unsafe { (*self.as_ptr()).name }
    }

    pub fn state(self) -> TaskState {
        unsafe { (*self.as_ptr()).state }
    }
}

impl core::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "TaskHandle({:?}, {})", self.0, self.name())
    }
}
