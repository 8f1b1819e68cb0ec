//! Scheduler context and kernel-wide services
//!
//! [`SchedulerContext`] owns the system work queue, the long work queue and
//! the kernel lock. It replaces the file-scope singletons of a C kernel with
//! one value whose lifetime the [`Runtime`](crate::Runtime) controls.

use portable_atomic::{AtomicBool, Ordering};

use crate::error::KResult;
use crate::mutex::KMutex;
use crate::port;
use crate::runtime::RuntimeConfig;
use crate::types::Timeout;
use crate::work::{DelayableWork, LongWorkQueue, Work, WorkQueue, WorkQueueConfig};

/// System work queue, long work queue and kernel lock
pub struct SchedulerContext {
    sys_work_q: WorkQueue,
    long_wq: LongWorkQueue,
    kernel_mutex: KMutex,
    running: AtomicBool,
}

impl SchedulerContext {
    /// Bring up the system work queue, the kernel lock and the long work
    /// queue (`k_sys_work_init`)
    ///
    /// # Returns
    /// * `Ok(ctx)` - All three are ready
    /// * `Err(_)` - Whatever was created is torn down again
    pub fn init(cfg: &RuntimeConfig) -> KResult<Self> {
        let sys_work_q = WorkQueue::new();
        sys_work_q.init()?;
        let wq_cfg = WorkQueueConfig::named(cfg.sys_wq_name);
        if let Err(e) = sys_work_q.start(cfg.sys_wq_stack_size, cfg.sys_wq_prio, Some(&wq_cfg)) {
            sys_work_q.deinit();
            return Err(e);
        }

        let kernel_mutex = KMutex::new();
        if let Err(e) = kernel_mutex.init() {
            sys_work_q.deinit();
            return Err(e);
        }

        let long_wq = match LongWorkQueue::init(&sys_work_q, cfg.long_wq_stack_size, cfg.long_wq_prio, cfg.long_wq_name) {
            Ok(q) => q,
            Err(e) => {
                let _ = kernel_mutex.deinit();
                sys_work_q.deinit();
                return Err(e);
            }
        };

        crate::info!("system work queue started");
        Ok(SchedulerContext {
            sys_work_q,
            long_wq,
            kernel_mutex,
            running: AtomicBool::new(true),
        })
    }

    /// Stop both work queues and release the kernel lock
    ///
    /// Calling it twice is a logged no-op.
    pub fn deinit(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            crate::warn!("scheduler context already stopped");
            return;
        }
        self.long_wq.deinit();
        self.sys_work_q.deinit();
        let _ = self.kernel_mutex.deinit();
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The system work queue (`k_sys_work_q`)
    pub fn sys_work_q(&self) -> &WorkQueue {
        &self.sys_work_q
    }

    pub fn long_wq(&self) -> &LongWorkQueue {
        &self.long_wq
    }

    /// Queue `work` on the system queue (`k_work_submit`)
    pub fn submit(&self, work: &Work) -> KResult<()> {
        self.sys_work_q.submit(work)
    }

    /// `k_work_schedule`
    pub fn schedule(&self, dwork: &DelayableWork, delay: Timeout) -> KResult<()> {
        self.sys_work_q.schedule(dwork, delay)
    }

    /// `k_work_reschedule`
    pub fn reschedule(&self, dwork: &DelayableWork, delay: Timeout) -> KResult<()> {
        self.sys_work_q.reschedule(dwork, delay)
    }

    /// Take the kernel-wide recursive lock, waiting forever (`k_kernel_lock`)
    pub fn kernel_lock(&self) -> KResult<()> {
        self.kernel_mutex.lock(Timeout::Forever)
    }

    /// `k_kernel_unlock`
    pub fn kernel_unlock(&self) -> KResult<()> {
        self.kernel_mutex.unlock()
    }
}

// ============ Heap ============

/// Allocate `size` bytes from the OSAL heap (`k_malloc`)
///
/// Returns NULL on exhaustion.
pub fn k_malloc(size: usize) -> *mut u8 {
    port::malloc(size)
}

/// Allocate a zeroed array of `nmemb` elements (`k_calloc`)
///
/// Returns NULL on exhaustion or overflow.
pub fn k_calloc(nmemb: usize, size: usize) -> *mut u8 {
    port::calloc(nmemb, size)
}

/// Return a block to the OSAL heap (`k_free`)
///
/// # Safety
/// `ptr` must be NULL or come from [`k_malloc`]/[`k_calloc`] and not have
/// been freed already.
pub unsafe fn k_free(ptr: *mut u8) {
    unsafe { port::free(ptr) }
}

