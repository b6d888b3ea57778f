//! Module initialization registry.
//!
//! Platform ports and internal subsystems (the context layer, the timer
//! dispatcher) register an `(init, exit)` pair here instead of being named
//! directly by [`crate::global_init`]. Entries run in declaration order on
//! startup and in reverse order on shutdown, mirroring the linker-section
//! module group the design is modeled on - realized here with
//! [`linkme::distributed_slice`] so independent modules can add themselves
//! from anywhere in the dependency graph.
//!
//! A module that needs no teardown still registers a no-op `exit_fn`; there
//! is no sentinel "absent hook" so every entry is called uniformly.

use crate::error::{Error, Result};
use linkme::distributed_slice;

/// One module's startup/shutdown pair.
pub struct ModuleHooks {
    pub name: &'static str,
    pub init: fn() -> Result<()>,
    pub exit: fn(),
}

#[distributed_slice]
pub static MODULES: [ModuleHooks] = [..];

/// Runs every registered module's `init` in declaration order.
///
/// If a hook fails, every module initialized before it is torn down by
/// calling its `exit` in reverse order, and the failing error is returned.
pub fn global_init() -> Result<()> {
    for (done, hooks) in MODULES.iter().enumerate() {
        log::debug!("module '{}': init", hooks.name);
        if let Err(err) = (hooks.init)() {
            log::error!("module '{}': init failed: {err}", hooks.name);
            for rollback in MODULES[..done].iter().rev() {
                log::debug!("module '{}': rollback exit", rollback.name);
                (rollback.exit)();
            }
            return Err(err);
        }
    }
    Ok(())
}

/// Runs every registered module's `exit` in reverse declaration order.
pub fn global_exit() {
    for hooks in MODULES.iter().rev() {
        log::debug!("module '{}': exit", hooks.name);
        (hooks.exit)();
    }
}

/// Convenience no-op exit hook for modules that need no teardown.
pub fn no_exit() {}

/// Convenience no-op init hook for modules that need no startup.
pub fn no_init() -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use alloc::vec::Vec;
    use std::sync::Mutex;

    static TRACE: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    fn push(tag: &'static str) {
        TRACE.lock().unwrap().push(tag);
    }

    #[distributed_slice(MODULES)]
    static A: ModuleHooks = ModuleHooks {
        name: "a",
        init: || {
            push("a-init");
            Ok(())
        },
        exit: || push("a-exit"),
    };

    #[distributed_slice(MODULES)]
    static B: ModuleHooks = ModuleHooks {
        name: "b",
        init: || {
            push("b-init");
            Ok(())
        },
        exit: || push("b-exit"),
    };

    #[test]
    fn runs_init_in_order_and_exit_in_reverse() {
        TRACE.lock().unwrap().clear();
        global_init().unwrap();
        global_exit();
        let trace = TRACE.lock().unwrap().clone();
        let pos = |tag: &str| trace.iter().position(|t| *t == tag).unwrap();
        // a and b may be interleaved with other registered modules, but their
        // own relative order must hold: both inits before both exits, and
        // exits in the reverse of init order.
        assert!(pos("a-init") < pos("b-init"));
        assert!(pos("b-init") < pos("b-exit"));
        assert!(pos("b-exit") < pos("a-exit"));
    }
}
