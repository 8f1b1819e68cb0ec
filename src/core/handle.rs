//! Critical section protected native handle slot
//!
//! Each kernel wrapper (`KSem`, `KQueue`, `KTimer`, ...) keeps its native OSAL
//! object in a [`CsHandle`]. An empty slot is the "NULL handle" of an
//! uninitialized or deinitialized wrapper. Callers clone the `Arc` out of the
//! slot before blocking, so a concurrent `deinit` never frees an object that a
//! blocked thread still uses.

use alloc::sync::Arc;
use core::cell::RefCell;

use critical_section::Mutex;

use crate::critical::critical_section;

/// Slot holding an optional shared native object
pub struct CsHandle<T> {
    slot: Mutex<RefCell<Option<Arc<T>>>>,
}

impl<T> CsHandle<T> {
    /// Create an empty slot
    #[inline]
    pub const fn empty() -> Self {
        CsHandle {
            slot: Mutex::new(RefCell::new(None)),
        }
    }

    /// Install `obj`, returning the previous occupant if any
    pub fn install(&self, obj: Arc<T>) -> Option<Arc<T>> {
        critical_section(|cs| self.slot.borrow(cs).replace(Some(obj)))
    }

    /// Empty the slot, returning what it held
    pub fn take(&self) -> Option<Arc<T>> {
        critical_section(|cs| self.slot.borrow(cs).take())
    }

    /// Clone the current occupant
    pub fn get(&self) -> Option<Arc<T>> {
        critical_section(|cs| self.slot.borrow(cs).borrow().clone())
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        critical_section(|cs| self.slot.borrow(cs).borrow().is_some())
    }
}

impl<T> Default for CsHandle<T> {
    fn default() -> Self {
        Self::empty()
    }
}
