//! WinnerMicro W80x kernel compatibility layer in Rust
//!
//! A Zephyr-flavoured kernel API implemented purely on top of the vendor
//! OS abstraction layer (OSAL), providing:
//! - Threads, timers, semaphores, recursive mutexes, queues and event flags
//! - Work items, delayable work and dedicated work queues
//! - A long-running work queue for handlers that must not starve the system queue
//! - A process-wide publish/subscribe event bus served by its own task
//!
//! The OSAL port is selected at compile time: `std` builds run on host
//! threads, target builds bind the vendor `wm_os_internal_*` layer.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod core;
pub mod sync;
pub mod work;
pub mod event;
pub mod port;
pub mod runtime;

// ============ Re-exports ============

pub use self::core::config;
pub use self::core::config::*;
pub use self::core::critical;
pub use self::core::error;
pub use self::core::error::{KError, KResult, OsStatus};
pub use self::core::kernel;
pub use self::core::kernel::SchedulerContext;
pub use self::core::types;
pub use self::core::types::*;
pub use self::core::thread;
pub use self::core::time;

pub use sync::{event as kevent, mutex, queue, sem};
pub use work::{DelayableWork, LongWorkQueue, Work, WorkQueue};
pub use event::{EventBusContext, EventGroup};
pub use runtime::{Runtime, RuntimeConfig};
