//! Concrete platform ports.
//!
//! Exactly one of these is active per build, selected by target. Each
//! registers its `init`/`exit` with [`crate::module`] so it comes up before
//! the coroutine subsystem needs it and goes down after.

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "arm", target_arch = "thumbv8m"))] {
        pub mod cortex_m33;
        pub use cortex_m33::Cortex33Port as ActivePort;
    } else {
        pub mod host;
        pub use host::HostPort as ActivePort;
    }
}
