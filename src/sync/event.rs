//! Event flag groups
//!
//! A classic RTOS event group: 32 flag bits that tasks post, set, clear and
//! wait on. Unrelated to the publish/subscribe bus in [`crate::event`].
//!
//! `post` ORs new bits into the group while `set` replaces the whole pattern.

use alloc::sync::Arc;

use crate::core::handle::CsHandle;
use crate::error::{KError, KResult};
use crate::port::OsEventGroup;
use crate::types::Timeout;

/// Event flag group (`k_event`)
pub struct KEvent {
    handle: CsHandle<OsEventGroup>,
}

impl KEvent {
    /// Create an uninitialized event group
    pub const fn new() -> Self {
        KEvent {
            handle: CsHandle::empty(),
        }
    }

    /// Create the native event group with all bits clear
    pub fn init(&self) -> KResult<()> {
        let group = OsEventGroup::create().map_err(|_| {
            crate::error!("k_event_init failed");
            KError::NoMem
        })?;
        self.handle.install(Arc::new(group));
        Ok(())
    }

    pub fn deinit(&self) {
        if self.handle.take().is_none() {
            crate::error!("k_event_deinit illegal param");
        }
    }

    fn native(&self, op: &str) -> Option<Arc<OsEventGroup>> {
        let group = self.handle.get();
        if group.is_none() {
            crate::error!("{} illegal param", op);
        }
        group
    }

    fn current(group: &OsEventGroup) -> u32 {
        group.get_bits().unwrap_or_else(|_| {
            crate::error!("k_event: reading bits failed");
            0
        })
    }

    /// OR `events` into the group, returning the previous bits
    pub fn post(&self, events: u32) -> u32 {
        let Some(group) = self.native("k_event_post") else {
            return 0;
        };
        let prev = Self::current(&group);
        if group.put(events).is_err() {
            crate::error!("k_event_post: put failed");
        }
        prev
    }

    /// Replace the whole bit pattern with `events`, returning the previous bits
    pub fn set(&self, events: u32) -> u32 {
        let Some(group) = self.native("k_event_set") else {
            return 0;
        };
        let prev = Self::current(&group);
        let stale = prev & !events;
        if stale != 0 && group.clear_bits(stale).is_err() {
            crate::error!("k_event_set: clear failed");
        }
        if group.put(events).is_err() {
            crate::error!("k_event_set: put failed");
        }
        prev
    }

    /// Clear `events`, returning the previous bits
    pub fn clear(&self, events: u32) -> u32 {
        let Some(group) = self.native("k_event_clear") else {
            return 0;
        };
        let prev = Self::current(&group);
        if group.clear_bits(events).is_err() {
            crate::error!("k_event_clear: clear failed");
        }
        prev
    }

    /// Current bits masked by `mask`
    pub fn test(&self, mask: u32) -> u32 {
        match self.native("k_event_test") {
            Some(group) => Self::current(&group) & mask,
            None => 0,
        }
    }

    /// Wait until any of `events` is set
    ///
    /// With `reset`, the matched bits are consumed when the wait returns.
    /// Returns the requested bits that were observed, or 0 on timeout.
    pub fn wait(&self, events: u32, reset: bool, timeout: Timeout) -> u32 {
        let Some(group) = self.native("k_event_wait") else {
            return 0;
        };
        match group.wait(events, false, reset, timeout.as_wait()) {
            Ok(observed) => observed & events,
            Err(_) => {
                if timeout.is_forever() {
                    crate::error!("k_event_wait: forever wait failed");
                }
                0
            }
        }
    }

    /// Wait until all of `events` are set
    ///
    /// Returns `events` on success, or 0 on timeout.
    pub fn wait_all(&self, events: u32, reset: bool, timeout: Timeout) -> u32 {
        let Some(group) = self.native("k_event_wait_all") else {
            return 0;
        };
        match group.wait(events, true, reset, timeout.as_wait()) {
            Ok(observed) => observed & events,
            Err(_) => 0,
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.handle.is_set()
    }
}

impl Default for KEvent {
    fn default() -> Self {
        Self::new()
    }
}
