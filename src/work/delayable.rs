//! Delayable work
//!
//! A [`DelayableWork`] pairs a [`Work`] item with a one-shot [`KTimer`]. While
//! the timer is armed the item carries [`WorkFlags::DELAYED`] and remembers the
//! queue it was scheduled against; expiry clears the flag and submits the item
//! to that queue.

use alloc::sync::{Arc, Weak};
use core::cell::{Cell, RefCell};

use critical_section::Mutex;

use super::{Work, WorkHandler, WorkQueue};
use crate::critical::critical_section;
use crate::error::{KError, KResult};
use crate::thread;
use crate::time::{self, KTimer};
use crate::types::{KTicks, Timeout, WorkFlags};

pub(crate) struct DelayableCore {
    work: Work,
    timer: KTimer,
    /// Target queue while DELAYED
    work_q: Mutex<RefCell<Option<WorkQueue>>>,
    /// Tick the current arm is due at
    due: Mutex<Cell<KTicks>>,
}

/// Outcome of a timer expiry
enum Expiry {
    Submit(WorkQueue),
    Stale,
    NotDelayed,
    NoQueue,
    Rejected,
}

/// Outcome of the schedule decision
enum Arm {
    OtherQueue,
    Immediate { was_delayed: bool },
    AlreadyDelayed,
    Armed,
}

impl DelayableCore {
    /// Timer expiry: DELAYED -> QUEUED in one step, then enqueue
    fn expired(&self) {
        let now = time::uptime_ticks();
        let outcome = critical_section(|cs| {
            let flags = self.work.core.flags(cs);
            if !flags.get().contains(WorkFlags::DELAYED) {
                return Expiry::NotDelayed;
            }
            // A firing left over from an earlier arm
            if (now.wrapping_sub(self.due.borrow(cs).get()) as i32) < 0 {
                return Expiry::Stale;
            }
            flags.set(flags.get() - WorkFlags::DELAYED);
            let Some(queue) = self.work_q.borrow(cs).take() else {
                return Expiry::NoQueue;
            };
            match self.work.core.begin_submit_in(cs, queue.core()) {
                Ok(()) => Expiry::Submit(queue),
                Err(_) => Expiry::Rejected,
            }
        });

        match outcome {
            Expiry::Submit(queue) => {
                if self.work.enqueue(queue.core()).is_err() {
                    crate::warn!("delayed work expired, submit failed");
                }
            }
            Expiry::Stale => crate::debug!("delayed work: stale timer expiry ignored"),
            Expiry::NotDelayed => crate::warn!("delayed work expired, but flag is not delayed"),
            Expiry::NoQueue => crate::warn!("delayed work expired without a queue"),
            Expiry::Rejected => crate::warn!("delayed work expired, item busy"),
        }
    }
}

/// Delayable work handle (`k_work_delayable`)
///
/// Clones refer to the same item. Dropping the last handle deletes the timer,
/// so a pending delay never fires for an item nobody holds.
#[derive(Clone)]
pub struct DelayableWork {
    core: Arc<DelayableCore>,
}

impl DelayableWork {
    /// Create an idle delayable item running `handler` (`k_work_init_delayable`)
    ///
    /// # Returns
    /// * `Err(KError::NoMem)` - The native timer could not be created
    pub fn new<H>(handler: H) -> KResult<Self>
    where
        H: WorkHandler + 'static,
    {
        let core = Arc::new(DelayableCore {
            work: Work::new(handler),
            timer: KTimer::new(),
            work_q: Mutex::new(RefCell::new(None)),
            due: Mutex::new(Cell::new(0)),
        });

        let weak: Weak<DelayableCore> = Arc::downgrade(&core);
        core.timer.init(move || {
            if let Some(core) = weak.upgrade() {
                core.expired();
            }
        })?;
        core.work.core.set_delayable(Arc::downgrade(&core));

        Ok(DelayableWork { core })
    }

    pub(crate) fn from_core(core: Arc<DelayableCore>) -> Self {
        DelayableWork { core }
    }

    /// Drop the handler and delete the timer (`k_work_deinit_delayable`)
    ///
    /// A pending delay is discarded; the item must not be queued again.
    pub fn deinit(&self) {
        self.core.work.clear_handler();
        self.core.timer.deinit();
    }

    /// The embedded work item
    pub fn work(&self) -> &Work {
        &self.core.work
    }

    /// Busy mask (`k_work_delayable_busy_get`)
    pub fn busy_get(&self) -> WorkFlags {
        self.core.work.busy_get()
    }

    /// `k_work_delayable_is_pending`
    pub fn is_pending(&self) -> bool {
        !self.busy_get().is_empty()
    }

    /// Tick at which the delay expires (`k_work_delayable_expires_get`)
    pub fn expires_get(&self) -> KTicks {
        self.core.timer.expires_ticks()
    }

    /// Ticks left in the delay (`k_work_delayable_remaining_get`)
    pub fn remaining_get(&self) -> KTicks {
        self.core.timer.remaining_ticks()
    }

    /// Arm the item against `queue` (`k_work_schedule_for_queue`)
    ///
    /// A zero delay drops any pending delay on `queue` and submits
    /// immediately.
    ///
    /// # Returns
    /// * `Ok(())` - Armed, submitted, or already delayed on `queue`
    /// * `Err(KError::Again)` - The item is delayed on another queue
    pub fn schedule_for_queue(&self, queue: &WorkQueue, delay: Timeout) -> KResult<()> {
        let now = time::uptime_ticks();
        let (arm, old_q) = critical_section(|cs| {
            let mut work_q = self.core.work_q.borrow(cs).borrow_mut();
            if work_q.as_ref().is_some_and(|current| !current.ptr_eq(queue)) {
                return (Arm::OtherQueue, None);
            }
            let flags = self.core.work.core.flags(cs);
            let delayed = flags.get().contains(WorkFlags::DELAYED);

            if delay.is_no_wait() {
                flags.set(flags.get() - WorkFlags::DELAYED);
                return (Arm::Immediate { was_delayed: delayed }, work_q.take());
            }
            if delayed {
                return (Arm::AlreadyDelayed, None);
            }
            flags.set(flags.get() | WorkFlags::DELAYED);
            self.core.due.borrow(cs).set(now.wrapping_add(delay.as_wait()));
            (Arm::Armed, work_q.replace(queue.clone()))
        });
        drop(old_q);

        match arm {
            Arm::OtherQueue => {
                crate::warn!("delayed work submitted to a different queue");
                Err(KError::Again)
            }
            Arm::Immediate { was_delayed } => {
                if was_delayed {
                    self.core.timer.stop();
                }
                if queue.submit(&self.core.work).is_err() {
                    crate::warn!("k_work_schedule: immediate submit failed");
                }
                Ok(())
            }
            Arm::AlreadyDelayed => {
                crate::warn!("work already in delayed state");
                Ok(())
            }
            Arm::Armed => {
                self.core.timer.start(delay.as_wait());
                Ok(())
            }
        }
    }

    /// Cancel any pending state, then arm again (`k_work_reschedule_for_queue`)
    pub fn reschedule_for_queue(&self, queue: &WorkQueue, delay: Timeout) -> KResult<()> {
        if self.is_pending() {
            self.cancel();
        }
        self.schedule_for_queue(queue, delay)
    }

    /// Stop the delay and take the item off its queue (`k_work_cancel_delayable`)
    ///
    /// A handler that already runs is not interrupted. Returns the busy mask
    /// left after cancellation.
    pub fn cancel(&self) -> WorkFlags {
        self.core.timer.stop();
        let old = critical_section(|cs| {
            let flags = self.core.work.core.flags(cs);
            flags.set(flags.get() - WorkFlags::DELAYED);
            self.core.work_q.borrow(cs).take()
        });
        drop(old);
        self.core.work.cancel()
    }

    /// Cancel and wait for a running handler to return (`k_work_cancel_delayable_sync`)
    ///
    /// Called from the worker that runs the item, it returns without waiting.
    /// Returns whether the item was busy.
    pub fn cancel_sync(&self) -> bool {
        let was_busy = self.is_pending();
        self.cancel();

        let on_worker = self
            .core
            .work
            .core
            .queue()
            .and_then(|q| q.worker_tid())
            .is_some_and(|tid| tid == thread::current_get());
        if !on_worker {
            while self.busy_get().contains(WorkFlags::RUNNING) {
                thread::sleep(Timeout::ticks(1));
            }
        }
        was_busy
    }

    /// Whether both handles refer to the same item
    pub fn ptr_eq(&self, other: &DelayableWork) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl core::fmt::Debug for DelayableWork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DelayableWork")
            .field("flags", &self.busy_get())
            .finish_non_exhaustive()
    }
}
