//! Thread management module
//!
//! Provides thread creation, deletion and control over native OSAL tasks,
//! plus the calling-thread helpers (sleep, yield, identity).

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;

use crate::core::handle::CsHandle;
use crate::error::{KError, KResult};
use crate::port::{self, OsTask, OsTaskId};
use crate::types::{ticks_to_ms, KPrio, Timeout};

/// Thread identifier (`k_tid_t`)
pub type KTid = OsTaskId;

/// Thread object (`k_thread`)
pub struct KThread {
    handle: CsHandle<OsTask>,
}

impl KThread {
    /// Create an empty thread object
    pub const fn new() -> Self {
        KThread {
            handle: CsHandle::empty(),
        }
    }

    /// Spawn a native task running `entry`
    ///
    /// The task is named `bth-<stack_size>` until renamed with
    /// [`name_set`](Self::name_set).
    ///
    /// # Arguments
    /// * `stack_size` - Stack size handed to the OSAL
    /// * `entry` - Task body
    /// * `prio` - OSAL priority
    /// * `delay` - [`Timeout::Forever`] creates the task suspended until
    ///   [`start`](Self::start); any other value starts it immediately
    ///
    /// # Returns
    /// * `Ok(tid)` - Task created
    /// * `Err(KError::NoMem)` - OSAL refused to create the task
    pub fn create<F>(&self, stack_size: usize, entry: F, prio: KPrio, delay: Timeout) -> KResult<KTid>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = format!("bth-{}", stack_size);
        let task = OsTask::create(&name, Box::new(entry), stack_size, prio, delay.is_forever()).map_err(|_| {
            crate::error!("k_thread_create failed");
            KError::NoMem
        })?;
        let tid = task.id();
        self.handle.install(Arc::new(task));
        Ok(tid)
    }

    fn native(&self, op: &str) -> Option<Arc<OsTask>> {
        let task = self.handle.get();
        if task.is_none() {
            crate::warn!("{} with illegal param", op);
        }
        task
    }

    /// Delete the native task
    pub fn delete(&self) {
        match self.handle.take() {
            Some(task) => {
                let _ = task.delete();
            }
            None => crate::warn!("k_thread_delete with illegal param"),
        }
    }

    /// Forget the native task without deleting it
    ///
    /// For a task ending itself: the port reclaims it once its entry returns.
    pub(crate) fn detach(&self) {
        drop(self.handle.take());
    }

    /// Same as [`delete`](Self::delete)
    pub fn abort(&self) {
        self.delete()
    }

    pub fn name_set(&self, name: &str) -> KResult<()> {
        let task = self.native("k_thread_name_set").ok_or(KError::Inval)?;
        task.set_name(name);
        Ok(())
    }

    /// Current task name, if the thread exists
    pub fn name(&self) -> Option<String> {
        self.handle.get().map(|task| task.name())
    }

    /// Start a thread created with [`Timeout::Forever`]
    pub fn start(&self) {
        if let Some(task) = self.native("k_thread_start") {
            let _ = task.resume();
        }
    }

    pub fn suspend(&self) {
        if let Some(task) = self.native("k_thread_suspend") {
            let _ = task.suspend();
        }
    }

    pub fn resume(&self) {
        if let Some(task) = self.native("k_thread_resume") {
            let _ = task.resume();
        }
    }

    /// Wake the thread; same as [`resume`](Self::resume)
    pub fn wakeup(&self) {
        if let Some(task) = self.native("k_wakeup") {
            let _ = task.resume();
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.handle.get().is_some_and(|task| task.is_suspended())
    }

    /// Task id while the thread exists
    pub fn tid(&self) -> Option<KTid> {
        self.handle.get().map(|task| task.id())
    }
}

impl Default for KThread {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Calling Thread ============

/// Id of the calling thread (`k_current_get`)
#[inline]
pub fn current_get() -> KTid {
    port::current_task_id()
}

/// Sleep for `timeout` (`k_sleep`)
///
/// Ticks are converted to milliseconds before delaying.
pub fn sleep(timeout: Timeout) {
    port::time_delay_ms(ticks_to_ms(timeout.ticks_or_max()));
}

/// Sleep for `ms` milliseconds (`k_msleep`)
pub fn msleep(ms: u32) {
    port::time_delay_ms(ms);
}

/// Give up the CPU to other ready threads (`k_yield`)
#[inline]
pub fn yield_now() {
    port::task_yield();
}

/// Whether the caller runs in interrupt context (`k_is_in_isr`)
#[inline]
pub fn is_in_isr() -> bool {
    crate::critical::is_isr_context()
}

/// Prevent task switches until [`sched_unlock`] (`k_sched_lock`)
#[inline]
pub fn sched_lock() {
    port::schedule_lock();
}

#[inline]
pub fn sched_unlock() {
    port::schedule_unlock();
}
