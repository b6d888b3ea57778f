//! A cooperative, single-threaded coroutine runtime for bare-metal and
//! hosted targets.
//!
//! The three core subsystems are [`context`] (stack-based context
//! switching), [`task_manager`] (task lifecycle, the round-robin scheduler,
//! and the event loop), and [`module`] (the ordered init/exit registry that
//! brings platform and coroutine infrastructure up and down). [`event`] and
//! [`timer`] supply the minimal notify/wait and deadline primitives the
//! scheduler needs to make `task_join` and timed sleeps observable; a real
//! deployment may swap in richer ones without touching the scheduler's
//! public contract. [`port`] is the trait a platform implements to plug in
//! its clock, critical section, idle handling, and allocator; [`ports`]
//! ships the two concrete ports this crate supports out of the box.
//!
//! # Example
//!
//! ```no_run
//! use core::ffi::c_void;
//! use event_hub::port::TIME_FOREVER;
//! use event_hub::task_manager;
//!
//! fn answer(_arg: *mut c_void) -> i32 {
//!     42
//! }
//!
//! event_hub::global_init().unwrap();
//! let task = task_manager::task_create("answer", 16 * 1024, core::ptr::null_mut(), answer).unwrap();
//! while task.state() != task_manager::TaskState::Finish {
//!     task_manager::task_yield();
//! }
//! assert_eq!(task_manager::task_join(task, TIME_FOREVER), Ok(42));
//! event_hub::global_exit();
//! ```

#![no_std]

extern crate alloc;

pub mod context;
pub mod error;
pub mod event;
pub mod module;
pub mod port;
pub mod ports;
pub mod task_manager;
pub mod timer;

#[cfg(feature = "c-library")]
pub mod c_api;

use error::Result;

/// Brings the runtime up: runs every registered module's `init` hook in
/// declaration order (see [`module::global_init`]), which in turn
/// establishes the calling context as the main task and brings the active
/// platform port online. Call once, before creating any task.
pub fn global_init() -> Result<()> {
    module::global_init()
}

/// Tears the runtime down: runs every registered module's `exit` hook in
/// reverse declaration order.
pub fn global_exit() {
    module::global_exit()
}
