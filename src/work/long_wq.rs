//! Long work queue
//!
//! Queue for handlers slow enough to hold up the system work queue. With the
//! `dedicated-long-wq` feature it owns a second worker thread; otherwise it
//! forwards to the system queue. Callers see the same contract either way.

use super::{DelayableWork, Work, WorkQueue};
use crate::error::KResult;
use crate::types::{KPrio, Timeout};

/// Long work queue (`bt_long_wq_*`)
pub struct LongWorkQueue {
    queue: WorkQueue,
    dedicated: bool,
}

impl LongWorkQueue {
    /// Set up the long queue next to `sys_queue`
    ///
    /// `stack_size`, `prio` and `name` only apply to a dedicated worker.
    pub fn init(sys_queue: &WorkQueue, stack_size: usize, prio: KPrio, name: &'static str) -> KResult<Self> {
        if cfg!(feature = "dedicated-long-wq") {
            let queue = WorkQueue::new();
            queue.init()?;
            if let Err(e) = queue.start(stack_size, prio, Some(&super::WorkQueueConfig::named(name))) {
                queue.deinit();
                return Err(e);
            }
            crate::info!("long work queue started");
            Ok(LongWorkQueue { queue, dedicated: true })
        } else {
            let _ = (stack_size, prio, name);
            Ok(LongWorkQueue {
                queue: sys_queue.clone(),
                dedicated: false,
            })
        }
    }

    /// Stop the dedicated worker; an aliased queue is left to its owner
    pub fn deinit(&self) {
        if self.dedicated {
            self.queue.deinit();
        }
    }

    /// `bt_long_wq_submit`
    pub fn submit(&self, work: &Work) -> KResult<()> {
        self.queue.submit(work)
    }

    /// `bt_long_wq_schedule`
    pub fn schedule(&self, dwork: &DelayableWork, delay: Timeout) -> KResult<()> {
        self.queue.schedule(dwork, delay)
    }

    /// `bt_long_wq_reschedule`
    pub fn reschedule(&self, dwork: &DelayableWork, delay: Timeout) -> KResult<()> {
        self.queue.reschedule(dwork, delay)
    }

    /// Queue the handlers end up on
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }
}
