//! Work items and work queues
//!
//! A [`Work`] item is a handler plus a busy mask ([`WorkFlags`]). Submitting
//! it pushes it onto a [`WorkQueue`]'s FIFO, whose worker thread runs the
//! handler once. [`DelayableWork`] adds a timer that submits the item when it
//! fires. [`LongWorkQueue`] is the queue for handlers too slow for the system
//! queue.
//!
//! Work item state lives in one flag word; every transition below happens
//! inside a single critical section:
//!
//! | transition     | from                 | to                      |
//! |----------------|----------------------|-------------------------|
//! | submit         | not QUEUED/CANCELING | QUEUED                  |
//! | worker picks   | QUEUED               | RUNNING                 |
//! | handler done   | RUNNING              | (cleared)               |
//! | cancel         | QUEUED               | CANCELING, then cleared |
//! | schedule       | not DELAYED          | DELAYED                 |
//! | timer fires    | DELAYED              | QUEUED (via submit)     |

use alloc::sync::{Arc, Weak};
use core::cell::{Cell, RefCell};

use critical_section::{CriticalSection, Mutex};

use crate::critical::critical_section;
use crate::error::{KError, KResult};
use crate::types::WorkFlags;

pub mod delayable;
pub mod long_wq;
pub mod queue;

pub use delayable::DelayableWork;
pub use long_wq::LongWorkQueue;
pub use queue::{WorkQueue, WorkQueueConfig};

use delayable::DelayableCore;
use queue::WorkQueueCore;

// ============ Handler ============

/// Work handler (`k_work_handler_t`)
///
/// Implemented for every `Fn(&Work)` closure.
pub trait WorkHandler: Send + Sync {
    fn handle(&self, work: &Work);
}

impl<F> WorkHandler for F
where
    F: Fn(&Work) + Send + Sync,
{
    fn handle(&self, work: &Work) {
        self(work)
    }
}

// ============ Work Item State ============

pub(crate) struct WorkCore {
    flags: Mutex<Cell<WorkFlags>>,
    handler: Mutex<RefCell<Option<Arc<dyn WorkHandler>>>>,
    /// Queue of the last submission
    queue: Mutex<RefCell<Weak<WorkQueueCore>>>,
    /// Owning delayable item, if any
    delayable: Mutex<RefCell<Weak<DelayableCore>>>,
}

impl WorkCore {
    fn new(handler: Option<Arc<dyn WorkHandler>>) -> Self {
        WorkCore {
            flags: Mutex::new(Cell::new(WorkFlags::empty())),
            handler: Mutex::new(RefCell::new(handler)),
            queue: Mutex::new(RefCell::new(Weak::new())),
            delayable: Mutex::new(RefCell::new(Weak::new())),
        }
    }

    #[inline]
    pub(crate) fn flags<'cs>(&'cs self, cs: CriticalSection<'cs>) -> &'cs Cell<WorkFlags> {
        self.flags.borrow(cs)
    }

    pub(crate) fn busy(&self) -> WorkFlags {
        critical_section(|cs| self.flags(cs).get())
    }

    /// Idle or RUNNING -> QUEUED, recording `queue` as the target
    fn begin_submit(&self, queue: &Arc<WorkQueueCore>) -> KResult<()> {
        critical_section(|cs| self.begin_submit_in(cs, queue))
    }

    /// [`begin_submit`](Self::begin_submit) inside a caller's critical section
    fn begin_submit_in(&self, cs: CriticalSection<'_>, queue: &Arc<WorkQueueCore>) -> KResult<()> {
        let flags = self.flags(cs);
        if flags.get().contains(WorkFlags::CANCELING) {
            return Err(KError::Busy);
        }
        if flags.get().contains(WorkFlags::QUEUED) {
            return Err(KError::Perm);
        }
        flags.set(flags.get() | WorkFlags::QUEUED);
        self.queue.borrow(cs).replace(Arc::downgrade(queue));
        Ok(())
    }

    /// Undo [`begin_submit`](Self::begin_submit) after the enqueue failed
    fn abort_submit(&self) {
        critical_section(|cs| {
            let flags = self.flags(cs);
            flags.set(flags.get() - WorkFlags::QUEUED);
        })
    }

    /// QUEUED -> RUNNING; `false` if the item was canceled meanwhile
    pub(crate) fn begin_run(&self) -> bool {
        critical_section(|cs| {
            let flags = self.flags(cs);
            if !flags.get().contains(WorkFlags::QUEUED) {
                return false;
            }
            flags.set((flags.get() - WorkFlags::QUEUED) | WorkFlags::RUNNING);
            true
        })
    }

    pub(crate) fn end_run(&self) {
        critical_section(|cs| {
            let flags = self.flags(cs);
            flags.set(flags.get() - WorkFlags::RUNNING);
        })
    }

    /// QUEUED -> CANCELING; `false` if the item was not queued
    fn begin_cancel(&self) -> bool {
        critical_section(|cs| {
            let flags = self.flags(cs);
            if !flags.get().contains(WorkFlags::QUEUED) {
                return false;
            }
            flags.set((flags.get() - WorkFlags::QUEUED) | WorkFlags::CANCELING);
            true
        })
    }

    fn end_cancel(&self) {
        critical_section(|cs| {
            let flags = self.flags(cs);
            flags.set(flags.get() - WorkFlags::CANCELING);
        })
    }

    pub(crate) fn handler(&self) -> Option<Arc<dyn WorkHandler>> {
        critical_section(|cs| self.handler.borrow(cs).borrow().clone())
    }

    fn set_handler(&self, handler: Option<Arc<dyn WorkHandler>>) {
        let old = critical_section(|cs| self.handler.borrow(cs).replace(handler));
        drop(old);
    }

    pub(crate) fn queue(&self) -> Option<Arc<WorkQueueCore>> {
        critical_section(|cs| self.queue.borrow(cs).borrow().upgrade())
    }

    pub(crate) fn set_delayable(&self, dwork: Weak<DelayableCore>) {
        critical_section(|cs| self.delayable.borrow(cs).replace(dwork));
    }
}

// ============ Work Item ============

/// Work item handle (`k_work`)
///
/// Clones refer to the same item. The item stays alive while queued even if
/// every handle is dropped.
#[derive(Clone)]
pub struct Work {
    pub(crate) core: Arc<WorkCore>,
}

impl Work {
    /// Create an idle work item running `handler` (`k_work_init`)
    pub fn new<H>(handler: H) -> Self
    where
        H: WorkHandler + 'static,
    {
        Work {
            core: Arc::new(WorkCore::new(Some(Arc::new(handler)))),
        }
    }

    /// Create an idle work item without a handler
    ///
    /// Submitting it is allowed; the worker skips it.
    pub fn without_handler() -> Self {
        Work {
            core: Arc::new(WorkCore::new(None)),
        }
    }

    pub(crate) fn from_core(core: Arc<WorkCore>) -> Self {
        Work { core }
    }

    /// Replace the handler and clear the busy mask
    ///
    /// Must not be called while the item is queued or running.
    pub fn init<H>(&self, handler: H)
    where
        H: WorkHandler + 'static,
    {
        critical_section(|cs| self.core.flags(cs).set(WorkFlags::empty()));
        self.core.set_handler(Some(Arc::new(handler)));
    }

    pub(crate) fn clear_handler(&self) {
        self.core.set_handler(None);
    }

    /// Busy mask (`k_work_busy_get`)
    pub fn busy_get(&self) -> WorkFlags {
        self.core.busy() & WorkFlags::MASK
    }

    /// Whether any busy bit is set (`k_work_is_pending`)
    pub fn is_pending(&self) -> bool {
        !self.busy_get().is_empty()
    }

    /// Push the item onto `queue` (`k_work_submit_to_queue`)
    ///
    /// # Returns
    /// * `Ok(())` - Item queued
    /// * `Err(KError::Busy)` - A cancellation is in progress
    /// * `Err(KError::Perm)` - Item is already queued
    /// * `Err(KError::Again)` - The queue is full
    /// * `Err(KError::Inval)` - The queue is not initialized
    pub fn submit_to_queue(&self, queue: &WorkQueue) -> KResult<()> {
        queue.submit(self)
    }

    pub(crate) fn submit_to_core(&self, queue: &Arc<WorkQueueCore>) -> KResult<()> {
        self.core.begin_submit(queue)?;
        self.enqueue(queue)
    }

    /// Push an item already marked QUEUED onto `queue`'s FIFO
    fn enqueue(&self, queue: &Arc<WorkQueueCore>) -> KResult<()> {
        if let Err(e) = queue.fifo.put(self.core.clone()) {
            self.core.abort_submit();
            crate::warn!("k_work_submit_to_queue: enqueue failed");
            return Err(e);
        }
        Ok(())
    }

    /// Take the item off its queue if it has not started (`k_work_cancel`)
    ///
    /// A handler that already runs is not interrupted. Returns the busy mask
    /// left after cancellation.
    pub fn cancel(&self) -> WorkFlags {
        if self.core.begin_cancel() {
            if let Some(queue) = self.core.queue() {
                queue.fifo.remove(&self.core);
            }
            self.core.end_cancel();
        }
        self.busy_get()
    }

    /// The delayable item this work belongs to (`k_work_delayable_from_work`)
    pub fn delayable(&self) -> Option<DelayableWork> {
        critical_section(|cs| self.core.delayable.borrow(cs).borrow().upgrade()).map(DelayableWork::from_core)
    }

    /// Whether both handles refer to the same item
    pub fn ptr_eq(&self, other: &Work) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl core::fmt::Debug for Work {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Work")
            .field("flags", &self.busy_get())
            .finish_non_exhaustive()
    }
}
