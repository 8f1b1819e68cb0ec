//! Port layer - OS abstraction layer (OSAL) bindings
//!
//! The kernel shim never talks to an RTOS directly; every native object goes
//! through one of these ports, selected at compile time:
//!
//! - `host` (`std` feature): the OSAL on std threads, for tests and tooling
//! - `wm_osal` (target): `extern "C"` bindings to the vendor `wm_os_internal_*` layer
//!
//! Both ports export the same surface: [`OsTask`], [`OsSem`], [`OsMutex`],
//! [`OsQueue`], [`OsEventGroup`], [`OsTimer`] and free functions for time,
//! yielding, scheduler locking and the heap.

use alloc::boxed::Box;
use core::ffi::c_void;
use core::ptr::NonNull;

#[cfg(feature = "std")]
mod host;

#[cfg(feature = "std")]
pub use host::*;

#[cfg(not(feature = "std"))]
mod wm_osal;

#[cfg(not(feature = "std"))]
pub use wm_osal::*;

/// Identifier of a native task, unique while the task exists
pub type OsTaskId = usize;

/// Entry point of a native task
pub type TaskEntry = Box<dyn FnOnce() + Send + 'static>;

/// Expiry callback of a native timer
pub type TimerCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// One pointer-sized message word carried by an [`OsQueue`]
///
/// The queue only moves the word around; ownership of whatever it points at is
/// tracked by the typed layer in [`crate::queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsMsg(NonNull<c_void>);

// SAFETY: the word is an opaque address; the typed queue layer only admits
// `Send` payloads.
unsafe impl Send for OsMsg {}

impl OsMsg {
    #[inline]
    pub const fn new(ptr: NonNull<c_void>) -> Self {
        OsMsg(ptr)
    }

    /// Wrap a raw address, rejecting NULL
    #[inline]
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(OsMsg)
    }

    #[inline]
    pub const fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}
