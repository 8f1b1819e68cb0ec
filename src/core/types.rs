//! Core type definitions for the kernel shim
//!
//! These types provide strong typing for the Zephyr-style API surface.

use crate::config::{CFG_TICK_RATE_HZ, MSEC_PER_SEC};

/// Tick counter type
pub type KTicks = u32;

/// Thread/work queue priority as understood by the OSAL
pub type KPrio = u32;

/// OSAL wait value meaning "block until satisfied"
pub const WAIT_FOREVER: u32 = 0xFFFF_FFFF;

/// How long a blocking call may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Return immediately
    NoWait,
    /// Block until satisfied
    Forever,
    /// Block for at most this many ticks
    Ticks(KTicks),
}

impl Timeout {
    /// `K_MSEC`: milliseconds converted to ticks (`ms * HZ / 1000`)
    pub const fn msec(ms: u32) -> Self {
        Timeout::Ticks(ms_to_ticks(ms))
    }

    /// `K_SECONDS`
    pub const fn seconds(s: u32) -> Self {
        Self::msec(s.saturating_mul(MSEC_PER_SEC))
    }

    /// `K_TICKS`
    pub const fn ticks(t: KTicks) -> Self {
        Timeout::Ticks(t)
    }

    /// Wait value handed to the OSAL
    #[inline]
    pub const fn as_wait(self) -> u32 {
        match self {
            Timeout::NoWait => 0,
            Timeout::Forever => WAIT_FOREVER,
            Timeout::Ticks(t) => t,
        }
    }

    /// Ticks until expiry; `Forever` reports the OSAL maximum
    #[inline]
    pub const fn ticks_or_max(self) -> KTicks {
        self.as_wait()
    }

    #[inline]
    pub const fn is_forever(self) -> bool {
        matches!(self, Timeout::Forever)
    }

    /// True for `NoWait` and `Ticks(0)`
    #[inline]
    pub const fn is_no_wait(self) -> bool {
        self.as_wait() == 0
    }
}

/// Milliseconds to ticks, rounding down
#[inline]
pub const fn ms_to_ticks(ms: u32) -> KTicks {
    ((ms as u64 * CFG_TICK_RATE_HZ as u64) / MSEC_PER_SEC as u64) as KTicks
}

/// `k_ticks_to_ms_floor32`
#[inline]
pub const fn ticks_to_ms(ticks: KTicks) -> u32 {
    ((ticks as u64 * MSEC_PER_SEC as u64) / CFG_TICK_RATE_HZ as u64) as u32
}

bitflags::bitflags! {
    /// Busy state of a work item
    ///
    /// Bit positions match the Zephyr `K_WORK_*_BIT` layout so the raw mask
    /// can be handed to C consumers unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WorkFlags: u32 {
        /// Handler is executing on its queue's worker thread
        const RUNNING = 1 << 0;
        /// A cancellation is removing the item from its queue
        const CANCELING = 1 << 1;
        /// Item sits in a work queue FIFO
        const QUEUED = 1 << 2;
        /// Delayable item is waiting for its timer
        const DELAYED = 1 << 3;
    }
}

impl WorkFlags {
    /// `K_WORK_MASK`
    pub const MASK: WorkFlags = WorkFlags::all();
}
