//! Time management module
//!
//! Provides uptime queries and one-shot kernel timers (`k_timer`).

use alloc::boxed::Box;
use alloc::sync::Arc;

use portable_atomic::{AtomicU32, Ordering};

use crate::core::handle::CsHandle;
use crate::error::{KError, KResult};
use crate::port::{self, OsTimer};
use crate::types::{ticks_to_ms, KTicks, WAIT_FOREVER};

// ============ Uptime ============

/// Ticks since boot (`k_uptime_ticks`)
#[inline]
pub fn uptime_ticks() -> KTicks {
    port::get_time()
}

/// Milliseconds since boot, wrapping at `u32::MAX` (`k_uptime_get`)
#[inline]
pub fn uptime_get() -> u32 {
    port::get_time_ms()
}

/// Milliseconds elapsed since `*reftime`, then move `*reftime` to now
/// (`k_uptime_delta`)
///
/// Handles one wrap of the millisecond counter.
pub fn uptime_delta(reftime: &mut u32) -> u32 {
    let uptime = uptime_get();
    let delta = uptime.wrapping_sub(*reftime);
    *reftime = uptime;
    delta
}

/// `k_ticks_to_ms_floor32`
#[inline]
pub fn ticks_to_ms_floor(ticks: KTicks) -> u32 {
    ticks_to_ms(ticks)
}

// ============ Kernel Timer ============

struct TimerNative {
    os: OsTimer,
    /// Period of the last start, in ticks
    period: AtomicU32,
    /// Uptime in ms at the last start
    start: AtomicU32,
}

/// One-shot kernel timer (`k_timer`)
///
/// The expiry closure runs in the OSAL timer context.
pub struct KTimer {
    handle: CsHandle<TimerNative>,
}

impl KTimer {
    /// Create an uninitialized timer
    pub const fn new() -> Self {
        KTimer {
            handle: CsHandle::empty(),
        }
    }

    /// Create the native timer, stopped, with `expiry` as its callback
    pub fn init<F>(&self, expiry: F) -> KResult<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let os = OsTimer::create(Box::new(expiry), WAIT_FOREVER, false, "bth-timer").map_err(|_| {
            crate::error!("k_timer_init failed");
            KError::NoMem
        })?;
        self.handle.install(Arc::new(TimerNative {
            os,
            period: AtomicU32::new(0),
            start: AtomicU32::new(0),
        }));
        Ok(())
    }

    /// Stop and delete the native timer
    pub fn deinit(&self) {
        match self.handle.take() {
            Some(native) => native.os.stop(),
            None => crate::error!("k_timer_deinit illegal param"),
        }
    }

    fn native(&self, op: &str) -> Option<Arc<TimerNative>> {
        let native = self.handle.get();
        if native.is_none() {
            crate::error!("{} illegal param", op);
        }
        native
    }

    /// Arm the timer to fire once after `period` ticks
    ///
    /// Restarts a running timer. A period of 0 fires on the next tick.
    pub fn start(&self, period: KTicks) {
        let Some(native) = self.native("k_timer_start") else {
            return;
        };
        native.period.store(period, Ordering::Relaxed);
        native.start.store(port::get_time_ms(), Ordering::Relaxed);
        native.os.change(period);
    }

    /// Halt the timer without deleting it
    pub fn stop(&self) {
        if let Some(native) = self.native("k_timer_stop") {
            native.os.stop();
        }
    }

    /// Tick at which the timer fires
    pub fn expires_ticks(&self) -> KTicks {
        self.native("k_timer_expires_ticks")
            .map_or(0, |native| native.os.expiry_time())
    }

    /// Ticks left before expiry, 0 once expired
    pub fn remaining_ticks(&self) -> KTicks {
        let Some(native) = self.native("k_timer_remaining_ticks") else {
            return 0;
        };
        let now = port::get_time();
        native.os.expiry_time().saturating_sub(now)
    }

    /// Milliseconds left before expiry (`k_timer_remaining_get`)
    pub fn remaining_get(&self) -> u32 {
        ticks_to_ms(self.remaining_ticks())
    }

    /// Period of the last [`start`](Self::start), in ticks
    pub fn period(&self) -> KTicks {
        self.handle
            .get()
            .map_or(0, |native| native.period.load(Ordering::Relaxed))
    }

    /// Uptime in ms at the last [`start`](Self::start)
    pub fn start_ms(&self) -> u32 {
        self.handle
            .get()
            .map_or(0, |native| native.start.load(Ordering::Relaxed))
    }

    /// Whether the timer is armed
    pub fn is_active(&self) -> bool {
        self.handle.get().is_some_and(|native| native.os.is_active())
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.handle.is_set()
    }
}

impl Default for KTimer {
    fn default() -> Self {
        Self::new()
    }
}
