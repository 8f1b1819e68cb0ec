//! Logging macros for the kernel shim
//!
//! One set of macros, three backends picked at compile time:
//! `defmt` on the target, the `log` facade on hosted builds, nothing otherwise.

/// Debug message
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { ::defmt::debug!($($arg)*) };
}

/// Info message
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { ::defmt::info!($($arg)*) };
}

/// Error message
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { ::defmt::error!($($arg)*) };
}

/// Trace message
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { ::defmt::trace!($($arg)*) };
}

/// Warning message
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { ::defmt::warn!($($arg)*) };
}

// `log` facade when running hosted
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { ::log::debug!(target: "wm_kernel", $($arg)*) };
}
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { ::log::info!(target: "wm_kernel", $($arg)*) };
}
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { ::log::error!(target: "wm_kernel", $($arg)*) };
}
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { ::log::trace!(target: "wm_kernel", $($arg)*) };
}
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { ::log::warn!(target: "wm_kernel", $($arg)*) };
}

// No-op versions when no backend is enabled
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! debug { ($($arg:tt)*) => {{}}; }
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! info { ($($arg:tt)*) => {{}}; }
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! error { ($($arg:tt)*) => {{}}; }
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! trace { ($($arg:tt)*) => {{}}; }
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! warn { ($($arg:tt)*) => {{}}; }
