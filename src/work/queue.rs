//! Work queues
//!
//! A work queue is a FIFO of work items drained by one dedicated worker
//! thread. The worker runs each item's handler to completion, then yields
//! before taking the next item.

use alloc::sync::Arc;

use portable_atomic::{AtomicBool, Ordering};

use super::{DelayableWork, Work, WorkCore};
use crate::error::{KError, KResult};
use crate::sem::KSem;
use crate::queue::KFifo;
use crate::thread::{self, KThread, KTid};
use crate::types::{KPrio, Timeout};

/// Work queue options (`k_work_queue_config`)
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkQueueConfig {
    /// Worker thread name
    pub name: Option<&'static str>,
}

impl WorkQueueConfig {
    pub const fn named(name: &'static str) -> Self {
        WorkQueueConfig { name: Some(name) }
    }
}

pub(crate) struct WorkQueueCore {
    pub(crate) fifo: KFifo<Arc<WorkCore>>,
    thread: KThread,
    /// Worker keeps draining while set
    alive: AtomicBool,
    /// Given by the worker when it leaves its loop
    exited: KSem,
    /// Set when `deinit` runs on the worker itself
    self_stop: AtomicBool,
}

impl WorkQueueCore {
    pub(crate) fn worker_tid(&self) -> Option<KTid> {
        self.thread.tid()
    }
}

/// Work queue handle (`k_work_q`)
///
/// Clones refer to the same queue.
#[derive(Clone)]
pub struct WorkQueue {
    core: Arc<WorkQueueCore>,
}

impl WorkQueue {
    /// Create a queue with no FIFO and no worker yet
    pub fn new() -> Self {
        WorkQueue {
            core: Arc::new(WorkQueueCore {
                fifo: KFifo::new(),
                thread: KThread::new(),
                alive: AtomicBool::new(false),
                exited: KSem::new(),
                self_stop: AtomicBool::new(false),
            }),
        }
    }

    /// Create the FIFO (`k_work_queue_init`)
    pub fn init(&self) -> KResult<()> {
        self.core.fifo.init()
    }

    /// Spawn the worker thread (`k_work_queue_start`)
    ///
    /// # Arguments
    /// * `stack_size` - Worker stack size handed to the OSAL
    /// * `prio` - Worker priority
    /// * `cfg` - Optional worker name
    pub fn start(&self, stack_size: usize, prio: KPrio, cfg: Option<&WorkQueueConfig>) -> KResult<()> {
        if !self.core.fifo.queue().is_initialized() {
            crate::warn!("k_work_queue_start: queue not initialized");
            return Err(KError::Inval);
        }
        if self.core.alive.swap(true, Ordering::AcqRel) {
            crate::warn!("k_work_queue_start: already started");
            return Err(KError::AlreadyInit);
        }
        if let Err(e) = self.core.exited.init(0, 1) {
            self.core.alive.store(false, Ordering::Release);
            return Err(e);
        }

        let core = self.core.clone();
        if let Err(e) = self.core.thread.create(stack_size, move || worker_loop(core), prio, Timeout::NoWait) {
            self.core.alive.store(false, Ordering::Release);
            self.core.exited.deinit();
            return Err(e);
        }

        if let Some(name) = cfg.and_then(|c| c.name) {
            self.core.thread.name_set(name)?;
        }
        Ok(())
    }

    /// Stop the worker and release the FIFO (`k_work_queue_deinit`)
    ///
    /// Items still queued are dropped without running. A handler in progress
    /// finishes first, unless `deinit` is called from that handler; the
    /// worker then releases its own thread when the handler returns.
    pub fn deinit(&self) {
        if self.core.alive.swap(false, Ordering::AcqRel) {
            if self.is_worker_thread() {
                self.core.self_stop.store(true, Ordering::Release);
            } else {
                // Wake a worker blocked on an empty FIFO; make room first so
                // the wake item always fits
                let wake = Arc::new(WorkCore::new(None));
                loop {
                    self.drain();
                    match self.core.fifo.put(wake.clone()) {
                        Err(KError::Again) => continue,
                        _ => break,
                    }
                }
                let _ = self.core.exited.take(Timeout::Forever);
                self.core.thread.delete();
                self.core.exited.deinit();
            }
        }
        self.drain();
        self.core.fifo.deinit();
    }

    /// Return every item still queued to idle
    fn drain(&self) {
        while let Some(item) = self.core.fifo.get(Timeout::NoWait) {
            item.abort_submit();
        }
    }

    /// Queue `work` (`k_work_submit_to_queue`)
    pub fn submit(&self, work: &Work) -> KResult<()> {
        work.submit_to_core(&self.core)
    }

    /// `k_work_schedule_for_queue`
    pub fn schedule(&self, dwork: &DelayableWork, delay: Timeout) -> KResult<()> {
        dwork.schedule_for_queue(self, delay)
    }

    /// `k_work_reschedule_for_queue`
    pub fn reschedule(&self, dwork: &DelayableWork, delay: Timeout) -> KResult<()> {
        dwork.reschedule_for_queue(self, delay)
    }

    /// Worker thread id, once started
    pub fn thread_id(&self) -> Option<KTid> {
        self.core.worker_tid()
    }

    /// Whether the caller is this queue's worker
    pub fn is_worker_thread(&self) -> bool {
        self.thread_id() == Some(thread::current_get())
    }

    pub fn is_running(&self) -> bool {
        self.core.alive.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same queue
    pub fn ptr_eq(&self, other: &WorkQueue) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    pub(crate) fn core(&self) -> &Arc<WorkQueueCore> {
        &self.core
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn worker_loop(core: Arc<WorkQueueCore>) {
    while core.alive.load(Ordering::Acquire) {
        let Some(item) = core.fifo.get(Timeout::Forever) else {
            if !core.fifo.queue().is_initialized() {
                break;
            }
            continue;
        };

        if item.begin_run() {
            if let Some(handler) = item.handler() {
                handler.handle(&Work::from_core(item.clone()));
            }
            item.end_run();
        }
        drop(item);

        thread::yield_now();
    }

    if core.self_stop.swap(false, Ordering::AcqRel) {
        // Nobody waits for us; the task ends once this entry returns
        core.exited.deinit();
        core.thread.detach();
    } else {
        core.exited.give();
    }
}
