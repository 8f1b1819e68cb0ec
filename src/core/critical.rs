//! Critical section handling for the kernel shim
//!
//! On the target the `critical-section` implementation is provided by the
//! OSAL port (interrupt disable through `wm_os_internal_set_critical`); on the
//! host it is the global lock from `critical-section/std`.

use critical_section::{CriticalSection, RestoreState};

/// Execute a closure with interrupts disabled
///
/// The closure receives the critical section token, which unlocks
/// [`critical_section::Mutex`] protected data.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// Check if currently executing in an ISR context
#[inline]
pub fn is_isr_context() -> bool {
    crate::port::isr_count() > 0
}

/// Key returned by [`irq_lock`], handed back to [`irq_unlock`]
#[must_use = "an IRQ lock must be released with irq_unlock"]
pub struct IrqKey {
    state: RestoreState,
}

/// `k_irq_lock`: enter a critical section that outlives the current scope
///
/// Prefer [`critical_section`]; this form exists for code that must release the
/// lock from a different place than it took it.
#[inline]
pub fn irq_lock() -> IrqKey {
    // SAFETY: paired with `irq_unlock`, which consumes the key exactly once
    let state = unsafe { critical_section::acquire() };
    IrqKey { state }
}

/// `k_irq_unlock`: leave a critical section entered with [`irq_lock`]
///
/// Keys must be released in reverse order of acquisition.
#[inline]
pub fn irq_unlock(key: IrqKey) {
    // SAFETY: the key came from `irq_lock` and is consumed here
    unsafe { critical_section::release(key.state) };
}
