//! Recursive mutex
//!
//! The only mutex flavour the shim offers. The owning task may lock it again
//! without blocking and must unlock it as many times as it locked it.
//! Lock and unlock report the native status as is.

use alloc::sync::Arc;

use crate::core::handle::CsHandle;
use crate::error::{KError, KResult};
use crate::port::OsMutex;
use crate::types::Timeout;

/// Recursive mutex (`k_mutex`)
pub struct KMutex {
    handle: CsHandle<OsMutex>,
}

impl KMutex {
    /// Create an uninitialized mutex
    pub const fn new() -> Self {
        KMutex {
            handle: CsHandle::empty(),
        }
    }

    /// Create the native recursive mutex
    pub fn init(&self) -> KResult<()> {
        let mutex = OsMutex::create().map_err(|_| {
            crate::error!("k_mutex_init failed");
            KError::Again
        })?;
        self.handle.install(Arc::new(mutex));
        Ok(())
    }

    /// Release the native mutex
    pub fn deinit(&self) -> KResult<()> {
        match self.handle.take() {
            Some(_) => Ok(()),
            None => {
                crate::error!("k_mutex_deinit illegal param");
                Err(KError::Inval)
            }
        }
    }

    /// Acquire the mutex, waiting up to `timeout`
    pub fn lock(&self, timeout: Timeout) -> KResult<()> {
        let Some(mutex) = self.handle.get() else {
            crate::error!("k_mutex_lock illegal param");
            return Err(KError::Inval);
        };
        mutex.acquire(timeout.as_wait()).into_result().map_err(KError::Os)
    }

    /// Release one level of ownership
    pub fn unlock(&self) -> KResult<()> {
        let Some(mutex) = self.handle.get() else {
            crate::error!("k_mutex_unlock illegal param");
            return Err(KError::Inval);
        };
        mutex.release().into_result().map_err(KError::Os)
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.handle.is_set()
    }
}

impl Default for KMutex {
    fn default() -> Self {
        Self::new()
    }
}
