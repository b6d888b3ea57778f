//! AArch64 (AAPCS64) context switch for hosted targets.
//!
//! Callee-saved registers under AAPCS64 are x19-x28, the frame pointer x29,
//! and the link register x30; sp is saved separately. Caller-saved
//! registers and the NEON/FP callee-saved bank (d8-d15) are not touched:
//! this crate's tasks never run floating point work across a yield point
//! without the compiler itself spilling what it needs around the `swap`
//! call, same as the x86-64 backend.

use super::EntryFn;
use core::arch::naked_asm;
use core::ffi::c_void;

pub(super) const MIN_STACK: usize = core::mem::size_of::<ContextFrame>() + 128;

#[repr(C)]
struct ContextFrame {
    x19: u64,
    x20: u64,
    x21: u64,
    x22: u64,
    x23: u64,
    x24: u64,
    x25: u64,
    x26: u64,
    x27: u64,
    x28: u64,
    x29_fp: u64,
    x30_lr: u64,
}

extern "C" fn trampoline(entry: EntryFn, arg: *mut c_void) -> ! {
    let result = entry(arg);
    crate::task_manager::task_exit(result)
}

pub(super) unsafe fn make(
    stack_lo: *mut u8,
    stack_hi: *mut u8,
    entry: EntryFn,
    arg: *mut c_void,
) -> *mut c_void {
    let top = (stack_hi as usize) & !0xf;
    let frame_addr = top - core::mem::size_of::<ContextFrame>();
    let frame = frame_addr as *mut ContextFrame;
    (*frame) = ContextFrame {
        x19: entry as usize as u64,
        x20: arg as usize as u64,
        x21: 0,
        x22: 0,
        x23: 0,
        x24: 0,
        x25: 0,
        x26: 0,
        x27: 0,
        x28: 0,
        x29_fp: 0,
        x30_lr: start_task as usize as u64,
    };
    let _ = stack_lo;
    frame_addr as *mut c_void
}

#[unsafe(naked)]
unsafe extern "C" fn start_task() -> ! {
    naked_asm!(
        "mov x0, x19",
        "mov x1, x20",
        "b {trampoline}",
        trampoline = sym trampoline,
    );
}

/// `from`/`to` are `*mut *mut c_void` slots holding each task's saved stack
/// pointer.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn swap(
    arg: *mut c_void,
    from: *mut *mut c_void,
    to: *const *mut c_void,
) -> *mut c_void {
    naked_asm!(
        "stp x19, x20, [sp, #-96]!",
        "stp x21, x22, [sp, #16]",
        "stp x23, x24, [sp, #32]",
        "stp x25, x26, [sp, #48]",
        "stp x27, x28, [sp, #64]",
        "stp x29, x30, [sp, #80]",
        "mov x9, sp",
        "str x9, [x1]",
        "ldr x9, [x2]",
        "mov sp, x9",
        "ldp x29, x30, [sp, #80]",
        "ldp x27, x28, [sp, #64]",
        "ldp x25, x26, [sp, #48]",
        "ldp x23, x24, [sp, #32]",
        "ldp x21, x22, [sp, #16]",
        "ldp x19, x20, [sp], #96",
        "ret",
    );
}
