//! Synchronization primitives
//!
//! Contains semaphores, recursive mutexes, pointer queues (with FIFO/LIFO
//! views) and event flag groups. Each is a thin wrapper over a native OSAL
//! object held in a [`CsHandle`](crate::core::handle::CsHandle).

pub mod event;
pub mod mutex;
pub mod queue;
pub mod sem;
