//! Cortex-M33 platform port.
//!
//! The critical section disables interrupts via `primask`, following the
//! naked `platform_enter_critical`/`exit_critical` pair the ARMv8-M platform
//! layer implements; here it is expressed through the `critical-section`
//! crate so other crates sharing the same binary (drivers, allocators) see
//! one consistent global lock instead of a second, incompatible one.
//!
//! The clock is driven by SysTick; the idle handler executes `wfi` and is
//! broken out of by any interrupt, including the tick itself, matching the
//! "wait for interrupt, re-check condition" idle loop used throughout the
//! bare-metal pack.

use crate::module::ModuleHooks;
use crate::port::{ClockTicks, PortTrait, TIME_FOREVER};
use core::alloc::Layout;
use core::sync::atomic::{AtomicI64, Ordering};
use cortex_m::peripheral::syst::SystClkSource;
use linkme::distributed_slice;

/// Ticks since boot, advanced by the SysTick exception handler.
static TICKS: AtomicI64 = AtomicI64::new(0);

/// Cortex-M33 port: SysTick clock, `critical-section`-backed locking,
/// `wfi`-based idle, and a caller-supplied global allocator (the port does
/// not provide one itself; bare-metal binaries must set `#[global_allocator]`
/// as they already do for their heap of choice).
pub struct Cortex33Port {
    clocks_per_sec: ClockTicks,
}

/// Tick rate assumed until a board calls [`configure_systick`] with a
/// different `tick_hz`; the scheduler singleton is constructed at compile
/// time and needs a value before board bring-up runs.
pub const DEFAULT_CLOCKS_PER_SEC: ClockTicks = 1_000;

impl Cortex33Port {
    pub const fn new() -> Self {
        Cortex33Port {
            clocks_per_sec: DEFAULT_CLOCKS_PER_SEC,
        }
    }
}

impl Default for Cortex33Port {
    fn default() -> Self {
        Self::new()
    }
}

impl PortTrait for Cortex33Port {
    type CriticalState = critical_section::RestoreState;

    fn enter_critical(&self) -> Self::CriticalState {
        unsafe { critical_section::acquire() }
    }

    fn exit_critical(&self, state: Self::CriticalState) {
        unsafe { critical_section::release(state) }
    }

    fn clocks_per_sec(&self) -> ClockTicks {
        self.clocks_per_sec
    }

    fn monotonic_time(&self) -> ClockTicks {
        TICKS.load(Ordering::Acquire)
    }

    fn idle_or_extern_event_handler(&self, max_wait: ClockTicks) {
        if max_wait == 0 {
            return;
        }
        cortex_m::asm::wfi();
    }

    fn idle_break(&self) {
        // Any pending exception wakes a core parked in `wfi`; PendSV is the
        // one already reserved for coroutine bookkeeping on this target.
        cortex_m::peripheral::SCB::set_pendsv();
    }

    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        alloc::alloc::alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        alloc::alloc::dealloc(ptr, layout)
    }
}

/// Configures SysTick to tick once per `1/clock_hz` seconds. Call once
/// during board bring-up, before `global_init`.
pub fn configure_systick(mut syst: cortex_m::peripheral::SYST, core_clock_hz: u32, tick_hz: u32) {
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(core_clock_hz / tick_hz - 1);
    syst.enable_interrupt();
    syst.enable_counter();
}

/// SysTick exception handler. Advances the port's tick counter.
///
/// Registered by the board's `#[exception]` table; this function itself is
/// architecture-agnostic so it is exposed for boards to wire up directly.
pub fn on_systick() {
    TICKS.fetch_add(1, Ordering::AcqRel);
}

fn port_init() -> crate::error::Result<()> {
    log::info!("cortex-m33 port: ready");
    Ok(())
}

#[distributed_slice(crate::module::MODULES)]
static CORTEX_M33_PORT_MODULE: ModuleHooks = ModuleHooks {
    name: "port/cortex-m33",
    init: port_init,
    exit: crate::module::no_exit,
};
