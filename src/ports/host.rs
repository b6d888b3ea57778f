//! Hosted platform port.
//!
//! Two implementations are selected by the `std` feature (default on):
//!
//! - **std** ([`std_port`]): the critical section is a recursive mutex, the
//!   same choice the original Linux platform layer makes with `pthread_mutex`
//!   configured `PTHREAD_MUTEX_RECURSIVE` - the scheduler may re-enter a
//!   critical section from a nested call on the same thread (e.g. a wake
//!   triggered while already holding the lock for an unrelated list
//!   mutation). The idle wait is a condvar parked on the port's own mutex, so
//!   `idle_break` is simply a notify.
//! - **busy-poll** ([`busy_port`]), for a hosted build that wants to stay
//!   `no_std`-compatible (no thread/condvar primitives): the critical section
//!   is a `critical-section`-backed lock shared with whatever the rest of the
//!   binary uses, the clock is a counter a driver ticks externally, and the
//!   idle wait spins on an atomic flag.

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        pub use std_port::HostPort;
    } else {
        pub use busy_port::HostPort;
    }
}

#[cfg(feature = "std")]
mod std_port {
    extern crate std;

    use crate::module::ModuleHooks;
    use crate::port::{ClockTicks, PortTrait, TIME_FOREVER};
    use core::alloc::{GlobalAlloc, Layout};
    use core::sync::atomic::{AtomicUsize, Ordering};
    use linkme::distributed_slice;
    use std::sync::{Condvar, Mutex};
    use std::time::Instant;

    /// Hosted port: std-backed clock, recursive critical section, condvar
    /// idle wait, and the system allocator.
    pub struct HostPort {
        lock: Mutex<LockState>,
        idle: Condvar,
        start: std::sync::OnceLock<Instant>,
    }

    struct LockState {
        owner: Option<std::thread::ThreadId>,
        depth: u32,
    }

    /// Opaque recursion depth handed back to the caller so nested
    /// `exit_critical` calls only release the lock once the outermost
    /// `enter_critical` unwinds.
    #[derive(Clone, Copy)]
    pub struct HostCriticalState(u32);

    impl HostPort {
        pub const fn new() -> Self {
            HostPort {
                lock: Mutex::new(LockState {
                    owner: None,
                    depth: 0,
                }),
                idle: Condvar::new(),
                start: std::sync::OnceLock::new(),
            }
        }
    }

    impl Default for HostPort {
        fn default() -> Self {
            Self::new()
        }
    }

    static WOKEN: AtomicUsize = AtomicUsize::new(0);

    impl PortTrait for HostPort {
        type CriticalState = HostCriticalState;

        fn enter_critical(&self) -> Self::CriticalState {
            let this_thread = std::thread::current().id();
            let mut guard = self.lock.lock().unwrap();
            loop {
                match guard.owner {
                    Some(owner) if owner == this_thread => break,
                    None => {
                        guard.owner = Some(this_thread);
                        break;
                    }
                    Some(_) => {
                        guard = self.idle.wait(guard).unwrap();
                    }
                }
            }
            guard.depth += 1;
            HostCriticalState(guard.depth)
        }

        fn exit_critical(&self, _state: Self::CriticalState) {
            let mut guard = self.lock.lock().unwrap();
            guard.depth = guard.depth.saturating_sub(1);
            if guard.depth == 0 {
                guard.owner = None;
                self.idle.notify_all();
            }
        }

        fn clocks_per_sec(&self) -> ClockTicks {
            1_000_000
        }

        fn monotonic_time(&self) -> ClockTicks {
            let start = self.start.get_or_init(Instant::now);
            start.elapsed().as_micros() as ClockTicks
        }

        fn idle_or_extern_event_handler(&self, max_wait: ClockTicks) {
            let before = WOKEN.load(Ordering::Acquire);
            let guard = self.lock.lock().unwrap();
            if WOKEN.load(Ordering::Acquire) != before {
                return;
            }
            if max_wait == TIME_FOREVER {
                let _ = self.idle.wait(guard);
            } else {
                let dur = std::time::Duration::from_micros(max_wait.max(0) as u64);
                let _ = self.idle.wait_timeout(guard, dur);
            }
        }

        fn idle_break(&self) {
            WOKEN.fetch_add(1, Ordering::AcqRel);
            let _guard = self.lock.lock().unwrap();
            self.idle.notify_all();
        }

        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            std::alloc::System.alloc(layout)
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            std::alloc::System.dealloc(ptr, layout)
        }
    }

    fn port_init() -> crate::error::Result<()> {
        log::info!("host port (std): ready");
        Ok(())
    }

    #[distributed_slice(crate::module::MODULES)]
    static HOST_PORT_MODULE: ModuleHooks = ModuleHooks {
        name: "port/host",
        init: port_init,
        exit: crate::module::no_exit,
    };

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn critical_section_is_reentrant_on_same_thread() {
            let port = HostPort::new();
            let s1 = port.enter_critical();
            let s2 = port.enter_critical();
            port.exit_critical(s2);
            port.exit_critical(s1);
        }

        #[test]
        fn monotonic_time_does_not_go_backwards() {
            let port = HostPort::new();
            let a = port.monotonic_time();
            let b = port.monotonic_time();
            assert!(b >= a);
        }
    }
}

/// `no_std`-compatible hosted port: no thread/condvar primitives available,
/// so the critical section is the `critical-section` crate's global lock and
/// the idle wait is a bounded spin on an atomic "woken" counter. The clock
/// has no hardware backing of its own on a generic hosted target without
/// `std`; a driver (e.g. a `SIGALRM` handler, or a dedicated OS thread ticking
/// it) is expected to advance [`BusyHostPort::tick`] periodically.
#[cfg(not(feature = "std"))]
mod busy_port {
    use crate::module::ModuleHooks;
    use crate::port::{ClockTicks, PortTrait, TIME_FOREVER};
    use core::alloc::Layout;
    use core::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use linkme::distributed_slice;

    pub struct HostPort {
        ticks: AtomicI64,
        woken: AtomicUsize,
    }

    impl HostPort {
        pub const fn new() -> Self {
            HostPort {
                ticks: AtomicI64::new(0),
                woken: AtomicUsize::new(0),
            }
        }

        /// Advances the clock by one tick. Called by whatever external
        /// driver this hosted-but-`no_std` build uses in place of `std`'s
        /// `Instant`.
        pub fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::AcqRel);
        }
    }

    impl Default for HostPort {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PortTrait for HostPort {
        type CriticalState = critical_section::RestoreState;

        fn enter_critical(&self) -> Self::CriticalState {
            unsafe { critical_section::acquire() }
        }

        fn exit_critical(&self, state: Self::CriticalState) {
            unsafe { critical_section::release(state) }
        }

        fn clocks_per_sec(&self) -> ClockTicks {
            1_000
        }

        fn monotonic_time(&self) -> ClockTicks {
            self.ticks.load(Ordering::Acquire)
        }

        fn idle_or_extern_event_handler(&self, max_wait: ClockTicks) {
            let before = self.woken.load(Ordering::Acquire);
            let start = self.monotonic_time();
            loop {
                if self.woken.load(Ordering::Acquire) != before {
                    return;
                }
                if max_wait != TIME_FOREVER && self.monotonic_time() - start >= max_wait {
                    return;
                }
                core::hint::spin_loop();
            }
        }

        fn idle_break(&self) {
            self.woken.fetch_add(1, Ordering::AcqRel);
        }

        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            alloc::alloc::alloc(layout)
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            alloc::alloc::dealloc(ptr, layout)
        }
    }

    fn port_init() -> crate::error::Result<()> {
        log::info!("host port (busy-poll): ready");
        Ok(())
    }

    #[distributed_slice(crate::module::MODULES)]
    static HOST_PORT_MODULE: ModuleHooks = ModuleHooks {
        name: "port/host",
        init: port_init,
        exit: crate::module::no_exit,
    };
}
