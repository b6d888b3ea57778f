//! Error type shared by every fallible entry point in this crate.
//!
//! Internal subsystems never abort on the caller's behalf; a failure is always
//! returned as `Result<T, Error>`. The only exception is the small set of
//! programmer-contract violations (invalid task handle, operating on a task
//! that was already destroyed) that the original design already treats as a
//! panic rather than a recoverable error, and this crate keeps that
//! convention for the same cases.

use core::ffi::c_void;
use core::fmt;

/// Errors produced by the scheduler, context layer, module registry, and the
/// event/timer primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The platform port's allocator returned null.
    MallocError,
    /// `task_next` found no other task to switch to while the current task
    /// tried to leave the `Running` state.
    SchedulingError,
    /// A parameter failed validation (e.g. a stack too small to hold the
    /// initial context frame).
    InvalidParameter,
    /// An event wait, join, or timer-backed operation exceeded its deadline.
    Timeout,
    /// An error surfaced by an external collaborator (the event-type
    /// registry, a user module hook) that this crate does not itself define.
    Other(i32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MallocError => write!(f, "allocation failed"),
            Error::SchedulingError => write!(f, "no other task is runnable"),
            Error::InvalidParameter => write!(f, "invalid parameter"),
            Error::Timeout => write!(f, "operation timed out"),
            Error::Other(code) => write!(f, "external error ({code})"),
        }
    }
}

impl core::error::Error for Error {}

/// Converts an `Error` into the signed-integer convention used at the
/// `c_api` FFI boundary: `0` is success, negative values name an error kind.
impl Error {
    pub const fn to_c_int(self) -> i32 {
        match self {
            Error::MallocError => -1,
            Error::SchedulingError => -2,
            Error::InvalidParameter => -3,
            Error::Timeout => -4,
            Error::Other(code) => code,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Smallest address a real allocation or stack address is assumed to land
/// above; pointer-returning `c_api` entry points encode an error as one of
/// the reserved sentinel values below instead of a null/real pointer.
const SENTINEL_RANGE: core::ops::Range<usize> = 1..16;

/// Encodes `err` as an in-band sentinel pointer for a `c_api` entry point
/// that otherwise returns a real pointer (e.g. a task handle).
pub const fn error_to_ptr(err: Error) -> *mut c_void {
    let code: usize = match err {
        Error::MallocError => 1,
        Error::SchedulingError => 2,
        Error::InvalidParameter => 3,
        Error::Timeout => 4,
        Error::Other(_) => 5,
    };
    code as *mut c_void
}

/// Decodes a pointer previously produced by [`error_to_ptr`] back into its
/// `Error`, or `None` if `ptr` is outside the reserved sentinel range (i.e.
/// it is a genuine pointer, not an encoded error).
pub fn ptr_to_error(ptr: *mut c_void) -> Option<Error> {
    let addr = ptr as usize;
    if !SENTINEL_RANGE.contains(&addr) {
        return None;
    }
    Some(match addr {
        1 => Error::MallocError,
        2 => Error::SchedulingError,
        3 => Error::InvalidParameter,
        4 => Error::Timeout,
        _ => Error::Other(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_round_trips_for_every_kind() {
        for err in [
            Error::MallocError,
            Error::SchedulingError,
            Error::InvalidParameter,
            Error::Timeout,
        ] {
            let ptr = error_to_ptr(err);
            assert_eq!(ptr_to_error(ptr), Some(err));
        }
    }

    #[test]
    fn a_real_pointer_is_not_mistaken_for_a_sentinel() {
        let mut x = 0u8;
        let ptr = &mut x as *mut u8 as *mut c_void;
        assert_eq!(ptr_to_error(ptr), None);
    }
}
