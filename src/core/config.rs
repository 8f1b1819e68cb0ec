//! Compile-time configuration for the kernel shim
//!
//! These constants are the board defaults. [`RuntimeConfig`](crate::RuntimeConfig)
//! copies them at boot so individual builds and tests can override them.

/// System tick rate in Hz (`HZ`)
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Milliseconds per second
pub const MSEC_PER_SEC: u32 = 1000;

/// Default capacity of a kernel queue/FIFO/LIFO, in messages
pub const CFG_QUEUE_DEFAULT_DEPTH: usize = 24;

/// System work queue thread stack size in bytes
pub const CFG_SYSTEM_WORKQUEUE_STACK_SIZE: usize = 2048;

/// System work queue thread priority (higher number runs first)
pub const CFG_SYSTEM_WORKQUEUE_PRIORITY: u32 = 10;

/// Long work queue thread stack size in bytes
pub const CFG_LONG_WQ_STACK_SIZE: usize = 1300;

/// Long work queue thread priority
pub const CFG_LONG_WQ_PRIORITY: u32 = 8;

/// Event bus task stack size in bytes
pub const CFG_EVENT_TASK_STACK_SIZE: usize = 1024;

/// Event bus task priority
pub const CFG_EVENT_TASK_PRIO: u32 = 12;

/// Depth of the event bus message queue
pub const CFG_EVENT_QUEUE_SIZE: usize = 32;

/// Name of the event bus task
pub const CFG_EVENT_TASK_NAME: &str = "event";

/// Name of the system work queue thread
pub const CFG_SYSTEM_WORKQUEUE_NAME: &str = "sys_worker";

/// Name of the long work queue thread
pub const CFG_LONG_WQ_NAME: &str = "BT LW WQ";
