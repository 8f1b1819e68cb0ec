//! Semaphore implementation
//!
//! Counting semaphores for task synchronization and resource counting.

use alloc::sync::Arc;

use crate::core::handle::CsHandle;
use crate::error::{KError, KResult};
use crate::port::OsSem;
use crate::types::Timeout;

/// Counting semaphore (`k_sem`)
pub struct KSem {
    handle: CsHandle<OsSem>,
}

impl KSem {
    /// Create an uninitialized semaphore
    pub const fn new() -> Self {
        KSem {
            handle: CsHandle::empty(),
        }
    }

    /// Create the native semaphore with `initial` tokens
    ///
    /// `_limit` is accepted for API compatibility; the OSAL caps the count at
    /// its own maximum.
    pub fn init(&self, initial: u32, _limit: u32) -> KResult<()> {
        let sem = OsSem::create(initial).map_err(|_| {
            crate::error!("k_sem_init failed");
            KError::NoMem
        })?;
        self.handle.install(Arc::new(sem));
        Ok(())
    }

    /// Release the native semaphore
    pub fn deinit(&self) {
        if self.handle.take().is_none() {
            crate::error!("k_sem_deinit illegal param");
        }
    }

    /// Give one token
    pub fn give(&self) {
        match self.handle.get() {
            // Giving beyond the native maximum is silently ignored
            Some(sem) => {
                let _ = sem.release();
            }
            None => crate::error!("k_sem_give illegal param"),
        }
    }

    /// Take one token, waiting up to `timeout`
    ///
    /// # Panics
    /// When a [`Timeout::Forever`] wait fails, which means the OSAL itself is
    /// broken.
    pub fn take(&self, timeout: Timeout) -> KResult<()> {
        let Some(sem) = self.handle.get() else {
            crate::error!("k_sem_take illegal param");
            return Err(KError::Inval);
        };

        let status = sem.acquire(timeout.as_wait());

        if timeout.is_forever() {
            assert!(status.is_ok(), "k_sem_take: forever wait failed");
        }

        if status.is_err() {
            return Err(KError::TimedOut);
        }
        Ok(())
    }

    /// Drop all tokens
    pub fn reset(&self) {
        match self.handle.get() {
            Some(sem) => {
                let _ = sem.reset();
            }
            None => crate::error!("k_sem_reset illegal param"),
        }
    }

    /// Current token count (0 when uninitialized)
    pub fn count_get(&self) -> u32 {
        match self.handle.get() {
            Some(sem) => sem.count(),
            None => {
                crate::error!("k_sem_count_get illegal param");
                0
            }
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.handle.is_set()
    }
}

impl Default for KSem {
    fn default() -> Self {
        Self::new()
    }
}
