//! ARMv8-M (Cortex-M33) context switch.
//!
//! Two variants are provided, selected by the `pended-swap` feature, mirroring
//! the two strategies real Cortex-M coroutine runtimes use:
//!
//! - **Direct swap** (default): `swap` itself performs the save/restore in a
//!   naked function, executed on whatever stack is currently active. Simple,
//!   deterministic latency.
//! - **Pended swap** (`pended-swap`): `swap` only writes the `from`/`to`
//!   pointers and pends `PendSV` via the ICSR register; the actual save and
//!   restore happens in the `PendSV` handler using the process stack (PSP),
//!   letting the hardware's automatic exception stacking do part of the
//!   work and enabling lazy FP state preservation.
//!
//! Both variants build the same initial frame shape their own `swap` expects
//! to find; they are not interchangeable at runtime, only at compile time.

use super::EntryFn;
use core::arch::naked_asm;
use core::ffi::c_void;

const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

cfg_if::cfg_if! {
    if #[cfg(feature = "pended-swap")] {
        pub(super) use pended::*;
    } else {
        pub(super) use direct::*;
    }
}

mod direct {
    use super::*;

    pub(in super::super) const MIN_STACK: usize = core::mem::size_of::<ContextFrame>() + 256;

    // r6/r7 double as the entry/arg carrier for a never-yet-run task: they
    // are restored by the same `pop {r4-r11, lr}` that every other resume
    // uses, so `start_task` finds them already in registers.
    #[repr(C)]
    struct ContextFrame {
        r4: u32,
        r5: u32,
        r6: u32,
        r7: u32,
        r8: u32,
        r9: u32,
        r10: u32,
        r11: u32,
        lr: u32,
    }

    extern "C" fn trampoline(entry: EntryFn, arg: *mut c_void) -> ! {
        let result = entry(arg);
        crate::task_manager::task_exit(result)
    }

    pub(in super::super) unsafe fn make(
        stack_lo: *mut u8,
        stack_hi: *mut u8,
        entry: EntryFn,
        arg: *mut c_void,
    ) -> *mut c_void {
        let top = (stack_hi as usize) & !7;
        let frame_addr = top - core::mem::size_of::<ContextFrame>();
        let frame = frame_addr as *mut ContextFrame;
        (*frame) = ContextFrame {
            r4: 0,
            r5: 0,
            r6: arg as usize as u32,
            r7: entry as usize as u32,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            lr: start_task as usize as u32,
        };
        let _ = stack_lo;
        frame_addr as *mut c_void
    }

    #[unsafe(naked)]
    unsafe extern "C" fn start_task() -> ! {
        naked_asm!(
            "mov r0, r7",
            "mov r1, r6",
            "bl {trampoline}",
            "1: b 1b",
            trampoline = sym trampoline,
        );
    }

    /// `from`/`to` point at each task's saved stack pointer slot.
    #[unsafe(naked)]
    pub(in super::super) unsafe extern "C" fn swap(
        arg: *mut c_void,
        from: *mut *mut c_void,
        to: *const *mut c_void,
    ) -> *mut c_void {
        naked_asm!(
            "push {{r4-r11, lr}}",
            "str sp, [r1]",
            "ldr sp, [r2]",
            "pop {{r4-r11, lr}}",
            "bx lr",
        );
    }
}

mod pended {
    use super::*;
    use core::ptr::write_volatile;

    pub(in super::super) const MIN_STACK: usize = core::mem::size_of::<ContextFrame>() + 256;

    const ICSR_ADDRESS: usize = 0xE000_ED04;
    const ICSR_PENDSVSET_BIT: u32 = 1 << 28;

    #[repr(C)]
    struct ContextFrame {
        psplim: u32,
        exc_return_lr: u32,
        r4: u32,
        r5: u32,
        r6: u32,
        r7: u32,
        r8: u32,
        r9: u32,
        r10: u32,
        r11: u32,
        // hardware auto-stacked on exception entry
        r0: u32,
        r1: u32,
        r2: u32,
        r3: u32,
        r12: u32,
        lr: u32,
        return_address: u32,
        xpsr: u32,
    }

    extern "C" fn finish(result: u32) -> ! {
        crate::task_manager::task_exit(result as i32)
    }

    pub(in super::super) unsafe fn make(
        stack_lo: *mut u8,
        stack_hi: *mut u8,
        entry: EntryFn,
        arg: *mut c_void,
    ) -> *mut c_void {
        let top = (stack_hi as usize) & !7;
        let lim = ((stack_lo as usize) + 7) & !7;
        let frame_addr = top - core::mem::size_of::<ContextFrame>();
        let frame = frame_addr as *mut ContextFrame;
        (*frame) = ContextFrame {
            psplim: lim as u32,
            exc_return_lr: EXC_RETURN_THREAD_PSP,
            r4: 0,
            r5: 0,
            r6: 0,
            r7: entry as usize as u32,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r0: arg as usize as u32,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: 0,
            return_address: start_task as usize as u32,
            xpsr: 0x0100_0000,
        };
        frame_addr as *mut c_void
    }

    #[unsafe(naked)]
    unsafe extern "C" fn start_task() -> ! {
        naked_asm!("blx r7", "bl {finish}", "1: b 1b", finish = sym finish);
    }

    /// Merely requests a switch: the real save/restore happens in
    /// `PendSV_Handler` using the PSP-resident frame `make` built.
    pub(in super::super) unsafe fn swap(
        arg: *mut c_void,
        from: *mut *mut c_void,
        to: *const *mut c_void,
    ) -> *mut c_void {
        PENDING_SWITCH = Some((from, to));
        write_volatile(ICSR_ADDRESS as *mut u32, ICSR_PENDSVSET_BIT);
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
        arg
    }

    static mut PENDING_SWITCH: Option<(*mut *mut c_void, *const *mut c_void)> = None;

    #[unsafe(no_mangle)]
    #[unsafe(naked)]
    extern "C" fn PendSV() {
        naked_asm!(
            "mrs r0, psp",
            "tst lr, #0x10",
            "it eq",
            "vstmdbeq r0!, {{s16-s31}}",
            "mrs r2, psplim",
            "mov r3, lr",
            "stmdb r0!, {{r2-r11}}",
            "bl {select}",
            "ldmia r0!, {{r2-r11}}",
            "tst r3, #0x10",
            "it eq",
            "vldmiaeq r0!, {{s16-s31}}",
            "msr psplim, r2",
            "msr psp, r0",
            "bx r3",
            select = sym select_pending_switch,
        );
    }

    extern "C" fn select_pending_switch(saved_psp: *mut c_void) -> *mut c_void {
        unsafe {
            if let Some((from, to)) = PENDING_SWITCH.take() {
                *from = saved_psp;
                *to as *mut c_void
            } else {
                saved_psp
            }
        }
    }
}
