//! Core kernel shim modules
//!
//! Contains the scheduler context, configuration, errors, threads and time.

pub mod config;
pub mod critical;
pub mod error;
pub mod handle;
pub mod kernel;
pub mod types;
pub mod thread;
pub mod time;
