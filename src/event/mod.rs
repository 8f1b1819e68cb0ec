//! Event bus
//!
//! A process-wide publish/subscribe bus. Producers on any thread enqueue
//! messages; one bus task owns the callback list and handles the messages in
//! FIFO order, so registrations, removals and publications take effect in the
//! order they were sent. Callbacks always run on the bus task.
//!
//! Unrelated to the event flag groups in [`crate::kevent`].

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ptr;

use portable_atomic::{AtomicU8, Ordering};

use crate::error::{KError, KResult};
use crate::queue::KQueue;
use crate::runtime::RuntimeConfig;
use crate::sem::KSem;
use crate::thread::{self, KThread};
use crate::types::Timeout;

// ============ Groups ============

/// Event group token
///
/// Groups are compared by address, not by name: declare each one once as a
/// `static` with [`define_event_group!`](crate::define_event_group).
pub struct EventGroup {
    name: &'static str,
}

impl EventGroup {
    pub const fn new(name: &'static str) -> Self {
        EventGroup { name }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EventGroup {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self, other)
    }
}

impl Eq for EventGroup {}

impl fmt::Debug for EventGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventGroup").field(&self.name).finish()
    }
}

/// Declare an event group static
///
/// ```
/// wm_kernel::define_event_group!(WIFI_EVENT, "wifi");
/// assert_eq!(WIFI_EVENT.name(), "wifi");
/// ```
#[macro_export]
macro_rules! define_event_group {
    ($(#[$meta:meta])* $vis:vis $ident:ident, $name:expr) => {
        $(#[$meta])*
        $vis static $ident: $crate::event::EventGroup = $crate::event::EventGroup::new($name);
    };
}

/// Registration wildcard matching every group
pub const ANY_GROUP: Option<&'static EventGroup> = None;

/// Registration wildcard matching every event type
pub const ANY_TYPE: i32 = -1;

// ============ Callbacks ============

/// Event callback (`wm_event_callback`)
///
/// Receives the group, the event type, the payload copy (empty for a bare
/// signal) and the private value given at registration.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, group: &'static EventGroup, event: i32, data: &[u8], priv_data: usize);
}

impl<F> EventHandler for F
where
    F: Fn(&'static EventGroup, i32, &[u8], usize) + Send + Sync,
{
    fn on_event(&self, group: &'static EventGroup, event: i32, data: &[u8], priv_data: usize) {
        self(group, event, data, priv_data)
    }
}

/// Shared callback handle; the same handle removes what it added
pub type EventCallback = Arc<dyn EventHandler>;

#[derive(Clone)]
struct Registration {
    group: Option<&'static EventGroup>,
    event: i32,
    handler: EventCallback,
    priv_data: usize,
}

impl Registration {
    fn same(&self, other: &Registration) -> bool {
        group_is(self.group, other.group)
            && self.event == other.event
            && self.priv_data == other.priv_data
            && Arc::as_ptr(&self.handler).cast::<()>() == Arc::as_ptr(&other.handler).cast::<()>()
    }

    fn matches(&self, group: &'static EventGroup, event: i32) -> bool {
        self.group.map_or(true, |g| ptr::eq(g, group)) && (self.event == ANY_TYPE || self.event == event)
    }
}

fn group_is(a: Option<&'static EventGroup>, b: Option<&'static EventGroup>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => ptr::eq(a, b),
        _ => false,
    }
}

// ============ Bus Messages ============

enum BusMessage {
    Add(Registration),
    Remove(Registration),
    Event {
        group: &'static EventGroup,
        event: i32,
        data: Vec<u8>,
    },
    Exit(Arc<KSem>),
}

/// Bus lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BusStatus {
    NotInit = 0,
    Inited = 1,
}

struct BusShared {
    queue: KQueue<Box<BusMessage>>,
    status: AtomicU8,
    task: KThread,
}

impl BusShared {
    fn status(&self) -> BusStatus {
        match self.status.load(Ordering::Acquire) {
            1 => BusStatus::Inited,
            _ => BusStatus::NotInit,
        }
    }

    fn set_status(&self, status: BusStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Enqueue without blocking
    fn post(&self, msg: BusMessage) -> KResult<()> {
        if !self.queue.is_initialized() {
            return Err(KError::Failed);
        }
        self.queue.append(Box::new(msg)).map_err(|_| {
            crate::error!("event: send failed");
            KError::Failed
        })
    }
}

// ============ Bus Context ============

/// Event bus (`wm_event_*`)
///
/// Clones refer to the same bus.
#[derive(Clone)]
pub struct EventBusContext {
    shared: Arc<BusShared>,
}

impl EventBusContext {
    /// Create a bus that is not running yet
    pub fn new() -> Self {
        EventBusContext {
            shared: Arc::new(BusShared {
                queue: KQueue::new(),
                status: AtomicU8::new(BusStatus::NotInit as u8),
                task: KThread::new(),
            }),
        }
    }

    /// Create the queue and start the bus task (`wm_event_init`)
    ///
    /// # Returns
    /// * `Ok(())` - Bus running
    /// * `Err(KError::AlreadyInit)` - Bus already running
    /// * `Err(KError::Failed)` - Queue or task creation failed
    pub fn init(&self, cfg: &RuntimeConfig) -> KResult<()> {
        let shared = &self.shared;
        if shared
            .status
            .compare_exchange(BusStatus::NotInit as u8, BusStatus::Inited as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            crate::info!("event: init before");
            return Err(KError::AlreadyInit);
        }

        if shared.queue.init_with_capacity(cfg.event_queue_size).is_err() {
            shared.set_status(BusStatus::NotInit);
            crate::error!("event: create queue failed");
            return Err(KError::Failed);
        }

        let task_shared = shared.clone();
        let created = shared
            .task
            .create(cfg.event_stack_size, move || bus_task(task_shared), cfg.event_prio, Timeout::NoWait);
        if created.is_err() {
            shared.queue.deinit();
            shared.set_status(BusStatus::NotInit);
            crate::error!("event: create task failed");
            return Err(KError::Failed);
        }
        let _ = shared.task.name_set(cfg.event_task_name);

        crate::info!("event: init ok");
        Ok(())
    }

    /// Stop the bus task and drop every registration (`wm_event_deinit`)
    ///
    /// Waits until the task has drained its queue. Messages still queued
    /// behind the exit request are discarded.
    ///
    /// # Returns
    /// * `Ok(())` - Bus stopped
    /// * `Err(KError::Failed)` - Bus not running, or called from a callback
    pub fn deinit(&self) -> KResult<()> {
        let shared = &self.shared;
        if shared.status() != BusStatus::Inited {
            return Err(KError::Failed);
        }
        if shared.task.tid() == Some(thread::current_get()) {
            crate::error!("event: deinit from a callback");
            return Err(KError::Failed);
        }

        let sync = Arc::new(KSem::new());
        sync.init(0, 1)?;

        let ret = match shared.post(BusMessage::Exit(sync.clone())) {
            Ok(()) => {
                let ret = sync.take(Timeout::Forever);
                shared.task.delete();
                ret
            }
            Err(e) => Err(e),
        };
        sync.deinit();
        shared.set_status(BusStatus::NotInit);
        crate::info!("event: deinit done");
        ret
    }

    /// Register `handler` for `event` in `group` (`wm_event_add_callback`)
    ///
    /// [`ANY_GROUP`] and [`ANY_TYPE`] are wildcards. Registering the exact same
    /// tuple twice is a silent no-op on the bus task; the call still succeeds.
    pub fn add_callback(
        &self,
        group: Option<&'static EventGroup>,
        event: i32,
        handler: &EventCallback,
        priv_data: usize,
    ) -> KResult<()> {
        self.shared.post(BusMessage::Add(Registration {
            group,
            event,
            handler: handler.clone(),
            priv_data,
        }))
    }

    /// Remove the registration with exactly this tuple (`wm_event_remove_callback`)
    ///
    /// Removing a tuple that is not registered is a silent no-op.
    pub fn remove_callback(
        &self,
        group: Option<&'static EventGroup>,
        event: i32,
        handler: &EventCallback,
        priv_data: usize,
    ) -> KResult<()> {
        self.shared.post(BusMessage::Remove(Registration {
            group,
            event,
            handler: handler.clone(),
            priv_data,
        }))
    }

    /// Publish `event` in `group` (`wm_event_send`)
    ///
    /// The payload is copied before the call returns. `None` sends a bare
    /// signal; an empty slice is rejected.
    ///
    /// # Returns
    /// * `Ok(())` - Message queued for the bus task
    /// * `Err(KError::Inval)` - Empty payload slice
    /// * `Err(KError::NoMem)` - The payload copy could not be allocated
    /// * `Err(KError::Failed)` - Bus not running or its queue is full
    pub fn send(&self, group: &'static EventGroup, event: i32, data: Option<&[u8]>) -> KResult<()> {
        let payload = match data {
            Some([]) => return Err(KError::Inval),
            Some(bytes) => {
                let mut buf = Vec::new();
                buf.try_reserve_exact(bytes.len()).map_err(|_| KError::NoMem)?;
                buf.extend_from_slice(bytes);
                buf
            }
            None => Vec::new(),
        };

        self.shared.post(BusMessage::Event {
            group,
            event,
            data: payload,
        })
    }

    pub fn status(&self) -> BusStatus {
        self.shared.status()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.status() == BusStatus::Inited
    }
}

impl Default for EventBusContext {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Bus Task ============

fn bus_task(shared: Arc<BusShared>) {
    let mut callbacks: Vec<Registration> = Vec::new();
    let mut sync = None;

    while shared.status() == BusStatus::Inited {
        let Some(msg) = shared.queue.get(Timeout::Forever) else {
            if !shared.queue.is_initialized() {
                break;
            }
            continue;
        };

        match *msg {
            BusMessage::Event { group, event, data } => {
                for reg in callbacks.iter().filter(|r| r.matches(group, event)) {
                    reg.handler.on_event(group, event, &data, reg.priv_data);
                }
            }
            BusMessage::Add(reg) => {
                if callbacks.iter().any(|r| r.same(&reg)) {
                    crate::debug!("event: callback exists, not added");
                } else {
                    callbacks.push(reg);
                }
            }
            BusMessage::Remove(reg) => {
                if let Some(pos) = callbacks.iter().position(|r| r.same(&reg)) {
                    callbacks.remove(pos);
                }
            }
            BusMessage::Exit(sem) => {
                callbacks.clear();
                sync = Some(sem);
                break;
            }
        }
    }

    // No producer can enqueue once the queue is gone
    shared.queue.deinit();

    if let Some(sem) = sync {
        sem.give();
    }
    crate::debug!("event: task exit");
}
