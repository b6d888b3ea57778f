//! x86-64 (System V AMD64) context switch.
//!
//! Only the callee-saved registers need to survive a `swap`: rbx, rbp,
//! r12-r15, plus the stack pointer itself. Everything else is caller-saved
//! under the System V ABI and is already spilled by the compiler around the
//! call to `swap` before it runs.

use super::EntryFn;
use core::arch::naked_asm;
use core::ffi::c_void;

pub(super) const MIN_STACK: usize = core::mem::size_of::<ContextFrame>() + 128;

#[repr(C)]
struct ContextFrame {
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    rbx: u64,
    rbp: u64,
    trampoline: u64,
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
    (*frame).r15 = entry as usize as u64;
    (*frame).r14 = arg as usize as u64;
    (*frame).r13 = 0;
    (*frame).r12 = 0;
    (*frame).rbx = 0;
    (*frame).rbp = 0;
    (*frame).trampoline = start_task as usize as u64;
    let _ = stack_lo;
    frame_addr as *mut c_void
}

/// Called for the first time a synthesized context is resumed: `swap`'s own
/// `ret` jumps here with r15/r14 holding the entry and argument `make` wrote.
#[unsafe(naked)]
unsafe extern "C" fn start_task() -> ! {
    naked_asm!("mov rdi, r15", "mov rsi, r14", "jmp {trampoline}", trampoline = sym trampoline);
}

/// `from`/`to` are `*mut *mut c_void` slots holding each task's saved stack
/// pointer (i.e. `*mut Context`/`*const Context` reinterpreted).
///
/// Mirrors the hand-rolled `switch`/`switch_to_task` pattern common to
/// stackful-coroutine runtimes: push the callee-saved set, swap `rsp`, pop
/// the other side's set, and let the ordinary `ret` land on whatever address
/// sits on top of the new stack - either the resuming task's own saved
/// return point, or `start_task` for a never-yet-run task.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn swap(
    arg: *mut c_void,
    from: *mut *mut c_void,
    to: *const *mut c_void,
) -> *mut c_void {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rsi], rsp",
        "mov rsp, [rdx]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "mov rax, rdi",
        "ret",
    );
}
