//! C ABI surface, enabled by the `c-library` feature.
//!
//! Mirrors the original system's signed-integer/sentinel-pointer error
//! convention (see [`crate::error`]): `0` means success, a negative return
//! value names an [`Error`] kind via [`Error::to_c_int`], and pointer-
//! returning entry points encode a failure as an in-band sentinel decodable
//! with [`crate::error::ptr_to_error`] instead of returning null. Native Rust
//! callers should use [`crate::task_manager`] directly; this module exists
//! only for the `extern "C"` boundary.

use crate::context::EntryFn;
use crate::error::error_to_ptr;
use crate::port::{ClockTicks, TaskArg};
use crate::task_manager::{self, TaskHandle};
use core::ffi::c_void;
use core::ptr::NonNull;

/// Reconstructs a [`TaskHandle`] from a pointer previously handed out by
/// [`event_hub_task_create`], [`event_hub_task_create_static`], or
/// [`event_hub_task_self`].
///
/// # Safety
/// `ptr` must be a value this module itself produced and must not already
/// have been passed to [`event_hub_task_destroy`] or reaped by
/// [`event_hub_task_join`].
unsafe fn handle_from_ptr(ptr: *mut c_void) -> TaskHandle {
    TaskHandle(NonNull::new_unchecked(ptr as *mut _))
}

fn handle_to_ptr(handle: TaskHandle) -> *mut c_void {
    handle.as_ptr() as *mut c_void
}

/// Builds a `&'static str` out of a caller-supplied byte buffer.
///
/// # Safety
/// `name`/`name_len` must describe a valid UTF-8 buffer that outlives the
/// task - exactly the same contract [`task_manager::task_create`] places on
/// its `name` parameter, just expressed in C terms since `extern "C"` callers
/// have no borrow checker to hold them to it.
unsafe fn static_str(name: *const u8, name_len: usize) -> &'static str {
    let bytes = core::slice::from_raw_parts(name, name_len);
    core::str::from_utf8_unchecked(bytes)
}

#[no_mangle]
pub extern "C" fn event_hub_global_init() -> i32 {
    match crate::global_init() {
        Ok(()) => 0,
        Err(err) => err.to_c_int(),
    }
}

#[no_mangle]
pub extern "C" fn event_hub_global_exit() {
    crate::global_exit();
}

/// # Safety
/// `name` must point at `name_len` bytes of valid UTF-8 that remain valid for
/// the task's lifetime.
#[no_mangle]
pub unsafe extern "C" fn event_hub_task_create(
    name: *const u8,
    name_len: usize,
    stack_size: usize,
    arg: TaskArg,
    entry: EntryFn,
) -> *mut c_void {
    let name = static_str(name, name_len);
    match task_manager::task_create(name, stack_size, arg, entry) {
        Ok(handle) => handle_to_ptr(handle),
        Err(err) => error_to_ptr(err),
    }
}

/// # Safety
/// `name` has the same contract as [`event_hub_task_create`]. `stack`/
/// `stack_len` must describe caller-owned storage that outlives the task;
/// the runtime never frees it.
#[no_mangle]
pub unsafe extern "C" fn event_hub_task_create_static(
    name: *const u8,
    name_len: usize,
    stack: *mut u8,
    stack_len: usize,
    arg: TaskArg,
    entry: EntryFn,
) -> *mut c_void {
    let name = static_str(name, name_len);
    let stack = core::slice::from_raw_parts_mut(stack, stack_len);
    match task_manager::task_create_static(name, stack, arg, entry) {
        Ok(handle) => handle_to_ptr(handle),
        Err(err) => error_to_ptr(err),
    }
}

#[no_mangle]
pub extern "C" fn event_hub_task_yield() {
    task_manager::task_yield();
}

#[no_mangle]
pub extern "C" fn event_hub_task_exit(result: i32) -> ! {
    task_manager::task_exit(result)
}

#[no_mangle]
pub extern "C" fn event_hub_task_self() -> *mut c_void {
    handle_to_ptr(task_manager::task_self())
}

/// # Safety
/// `task` must be a handle this module produced and not yet destroyed or
/// reaped. `out_result` may be null if the caller does not need the value.
#[no_mangle]
pub unsafe extern "C" fn event_hub_task_join(
    task: *mut c_void,
    out_result: *mut i32,
    timeout_ticks: ClockTicks,
) -> i32 {
    let handle = handle_from_ptr(task);
    match task_manager::task_join(handle, timeout_ticks) {
        Ok(result) => {
            if !out_result.is_null() {
                *out_result = result;
            }
            0
        }
        Err(err) => err.to_c_int(),
    }
}

/// # Safety
/// `task` must be a handle this module produced; it must not be the
/// currently running task and must not be concurrently destroyed or joined
/// elsewhere.
#[no_mangle]
pub unsafe extern "C" fn event_hub_task_destroy(task: *mut c_void) {
    task_manager::task_destroy(handle_from_ptr(task));
}

/// # Safety
/// `task` must be a handle this module produced.
#[no_mangle]
pub unsafe extern "C" fn event_hub_task_wake(task: *mut c_void) {
    task_manager::task_wake(handle_from_ptr(task));
}

#[no_mangle]
pub extern "C" fn event_hub_loop_run() -> i32 {
    task_manager::loop_run()
}

#[no_mangle]
pub extern "C" fn event_hub_loop_exit(code: i32) {
    task_manager::loop_exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ptr_to_error;
    use sequential_test::sequential;

    #[test]
    #[sequential]
    fn handle_pointer_round_trips() {
        // Smoke-checks the pointer<->handle round trip used by every entry
        // point above without driving the live scheduler.
        task_manager::reset_for_tests();
        let current = task_manager::task_self();
        let ptr = handle_to_ptr(current);
        assert!(ptr_to_error(ptr).is_none());
        let back = unsafe { handle_from_ptr(ptr) };
        assert_eq!(back, current);
    }
}
