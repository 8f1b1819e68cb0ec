//! Error types for the kernel shim
//!
//! Uses Rust's Result pattern; [`KError::code`] yields the negative errno
//! that the C-style API returns.

use thiserror::Error;

/// Status reported by the OS abstraction layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(i32)]
pub enum OsStatus {
    /// Call succeeded
    Success = 0,
    /// Call failed
    Error = -1,
    /// Blocking call timed out
    Timeout = -2,
}

impl OsStatus {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == OsStatus::Success
    }

    #[inline]
    pub fn is_err(self) -> bool {
        self != OsStatus::Success
    }

    /// Turn the status into a `Result`, keeping the native status as the error
    #[inline]
    pub fn into_result(self) -> Result<(), OsStatus> {
        match self {
            OsStatus::Success => Ok(()),
            other => Err(other),
        }
    }
}

/// Kernel shim error type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KError {
    // ============ Caller-contract violations ============
    /// NULL, uninitialized or already deinitialized object
    #[error("invalid argument or uninitialized object")]
    Inval,
    /// Work item is being canceled
    #[error("work item is being canceled")]
    Busy,
    /// Work item is already queued
    #[error("operation not permitted")]
    Perm,
    /// Resource temporarily unavailable (queue full, pending on another queue)
    #[error("resource temporarily unavailable")]
    Again,

    // ============ Resource exhaustion ============
    /// Allocation of a native object or message failed
    #[error("out of memory")]
    NoMem,

    // ============ Timeout ============
    /// Blocking call exceeded its wait
    #[error("timed out")]
    TimedOut,

    // ============ Lifecycle ============
    /// Service is not running or is shutting down
    #[error("operation failed")]
    Failed,
    /// Service was initialized before
    #[error("already initialized")]
    AlreadyInit,

    // ============ Forwarded ============
    /// Native status forwarded without translation
    #[error("native OS layer status {0:?}")]
    Os(OsStatus),
}

/// Result type alias for kernel shim operations
pub type KResult<T> = Result<T, KError>;

impl KError {
    /// Negative errno value of this error
    pub fn code(self) -> i32 {
        match self {
            KError::Perm => -1,
            KError::Failed => -5,
            KError::Again => -11,
            KError::NoMem => -12,
            KError::Busy => -16,
            KError::Inval => -22,
            KError::TimedOut => -110,
            KError::AlreadyInit => -114,
            KError::Os(status) => status as i32,
        }
    }

    /// Whether the error is a caller-contract violation rather than a runtime condition
    pub fn is_caller_error(self) -> bool {
        matches!(self, KError::Inval | KError::Busy | KError::Perm)
    }
}

impl From<OsStatus> for KError {
    fn from(status: OsStatus) -> Self {
        KError::Os(status)
    }
}
