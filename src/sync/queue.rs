//! Pointer-passing queues
//!
//! [`KQueue`] moves owned pointers (`Box<T>`, `Arc<T>`) through a bounded
//! native queue. While an item is queued the queue holds its ownership; it is
//! handed back by [`KQueue::get`], reclaimed by [`KQueue::remove`] and dropped
//! by [`KQueue::deinit`] if still queued.
//!
//! [`KFifo`] and [`KLifo`] are the usual views: `put` appends or prepends.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::ffi::c_void;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::config::CFG_QUEUE_DEFAULT_DEPTH;
use crate::core::handle::CsHandle;
use crate::error::{KError, KResult};
use crate::port::{OsMsg, OsQueue};
use crate::types::{Timeout, WAIT_FOREVER};

// ============ Queue Items ============

/// Owned pointer that can travel through a [`KQueue`] as one message word
///
/// # Safety
/// `into_msg` must yield a word that points at a live `Target` until the word
/// is turned back with `from_msg`, and `as_msg` must return the same word the
/// item would produce through `into_msg`.
pub unsafe trait QueueItem: Send + Sized {
    /// What the message word points at
    type Target;

    /// Give up ownership as a message word
    fn into_msg(self) -> OsMsg;

    /// Take ownership back from a message word
    ///
    /// # Safety
    /// `msg` must come from `into_msg` of this type and not have been
    /// reclaimed already.
    unsafe fn from_msg(msg: OsMsg) -> Self;

    /// Message word identifying this item, without giving up ownership
    fn as_msg(&self) -> OsMsg;
}

unsafe impl<T: Send> QueueItem for Box<T> {
    type Target = T;

    fn into_msg(self) -> OsMsg {
        let raw = Box::into_raw(self);
        // SAFETY: Box::into_raw never returns NULL
        OsMsg::new(unsafe { NonNull::new_unchecked(raw as *mut c_void) })
    }

    unsafe fn from_msg(msg: OsMsg) -> Self {
        unsafe { Box::from_raw(msg.as_ptr() as *mut T) }
    }

    fn as_msg(&self) -> OsMsg {
        OsMsg::new(NonNull::from(&**self).cast())
    }
}

unsafe impl<T: Send + Sync> QueueItem for Arc<T> {
    type Target = T;

    fn into_msg(self) -> OsMsg {
        let raw = Arc::into_raw(self);
        // SAFETY: Arc::into_raw never returns NULL
        OsMsg::new(unsafe { NonNull::new_unchecked(raw as *mut c_void) })
    }

    unsafe fn from_msg(msg: OsMsg) -> Self {
        unsafe { Arc::from_raw(msg.as_ptr() as *const T) }
    }

    fn as_msg(&self) -> OsMsg {
        OsMsg::new(NonNull::from(&**self).cast())
    }
}

// ============ Generic Queue ============

/// Bounded queue of owned pointers (`k_queue`)
pub struct KQueue<P: QueueItem> {
    handle: CsHandle<OsQueue>,
    _items: PhantomData<fn(P) -> P>,
}

impl<P: QueueItem> KQueue<P> {
    /// Create an uninitialized queue
    pub const fn new() -> Self {
        KQueue {
            handle: CsHandle::empty(),
            _items: PhantomData,
        }
    }

    /// Create the native queue with the default depth
    pub fn init(&self) -> KResult<()> {
        self.init_with_capacity(CFG_QUEUE_DEFAULT_DEPTH)
    }

    /// Create the native queue holding at most `depth` items
    pub fn init_with_capacity(&self, depth: usize) -> KResult<()> {
        let queue = OsQueue::create(depth).map_err(|_| {
            crate::error!("k_queue_init failed");
            KError::NoMem
        })?;
        if let Some(old) = self.handle.install(Arc::new(queue)) {
            Self::drain(&old);
        }
        Ok(())
    }

    /// Release the native queue, dropping any items still queued
    pub fn deinit(&self) {
        match self.handle.take() {
            Some(queue) => Self::drain(&queue),
            None => crate::error!("k_queue_deinit illegal param"),
        }
    }

    fn drain(queue: &OsQueue) {
        while let Ok(msg) = queue.receive(0) {
            // SAFETY: every word in the queue came from `P::into_msg`
            drop(unsafe { P::from_msg(msg) });
        }
    }

    fn native(&self, op: &str) -> KResult<Arc<OsQueue>> {
        self.handle.get().ok_or_else(|| {
            crate::error!("{} illegal param", op);
            KError::Inval
        })
    }

    /// Insert at the back without blocking
    ///
    /// The item is dropped if the queue is full.
    pub fn append(&self, item: P) -> KResult<()> {
        self.send(item, false, "k_queue_append")
    }

    /// Insert at the front without blocking
    ///
    /// The item is dropped if the queue is full.
    pub fn prepend(&self, item: P) -> KResult<()> {
        self.send(item, true, "k_queue_prepend")
    }

    fn send(&self, item: P, front: bool, op: &str) -> KResult<()> {
        let queue = self.native(op)?;
        let msg = item.into_msg();
        let sent = if front {
            queue.send_to_front(msg)
        } else {
            queue.send_to_back(msg)
        };
        if sent.is_err() {
            // SAFETY: the send failed, so the word is still ours
            drop(unsafe { P::from_msg(msg) });
            crate::warn!("{} failed", op);
            return Err(KError::Again);
        }

        // A deinit that took the queue before this send has drained it
        // already; reclaim the word unless a consumer got it first
        if !self.handle.get().is_some_and(|current| Arc::ptr_eq(&current, &queue)) {
            if queue.remove(msg).is_ok() {
                // SAFETY: the word was still queued, so it is ours again
                drop(unsafe { P::from_msg(msg) });
            }
            crate::error!("{} illegal param", op);
            return Err(KError::Inval);
        }
        Ok(())
    }

    /// Take the head item, waiting up to `timeout`
    pub fn get(&self, timeout: Timeout) -> Option<P> {
        let queue = self.handle.get()?;
        let msg = queue.receive(timeout.as_wait()).ok()?;
        // SAFETY: every word in the queue came from `P::into_msg`
        Some(unsafe { P::from_msg(msg) })
    }

    /// Remove `item` from the queue by identity
    ///
    /// Returns `false` if it was not queued (for example because a consumer
    /// already took it).
    pub fn remove(&self, item: &P) -> bool {
        let Ok(queue) = self.native("k_queue_remove") else {
            return false;
        };
        let msg = item.as_msg();
        if queue.remove(msg).is_err() {
            crate::debug!("k_queue_remove: item not queued");
            return false;
        }
        // SAFETY: the word was queued, so the queue owned one reference
        drop(unsafe { P::from_msg(msg) });
        true
    }

    /// Whether nothing is queued (`true` when uninitialized)
    pub fn is_empty(&self) -> bool {
        match self.handle.get() {
            Some(queue) => queue.is_empty(),
            None => {
                crate::error!("k_queue_is_empty illegal param");
                true
            }
        }
    }

    /// Free slots left
    pub fn space_available(&self) -> usize {
        self.handle.get().map_or(0, |queue| queue.space_available())
    }

    /// Look at the head item without dequeuing it
    ///
    /// Always waits for an item with the OSAL maximum wait; there is no
    /// timeout to pass.
    ///
    /// # Safety
    /// The caller must be the only consumer of this queue, so the head item
    /// stays queued (and alive) while the returned reference is in use.
    pub unsafe fn peek_head(&self) -> Option<&P::Target> {
        let queue = self.native("k_queue_peek_head").ok()?;
        match queue.peek(WAIT_FOREVER) {
            // SAFETY: queued words point at a live `Target`; the caller
            // guarantees nobody dequeues it meanwhile
            Ok(msg) => Some(unsafe { &*(msg.as_ptr() as *const P::Target) }),
            Err(_) => {
                crate::error!("k_queue_peek_head failed");
                None
            }
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.handle.is_set()
    }
}

impl<P: QueueItem> Default for KQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

// ============ FIFO / LIFO Views ============

/// First-in first-out view (`k_fifo`)
pub struct KFifo<P: QueueItem> {
    queue: KQueue<P>,
}

impl<P: QueueItem> KFifo<P> {
    pub const fn new() -> Self {
        KFifo { queue: KQueue::new() }
    }

    pub fn init(&self) -> KResult<()> {
        self.queue.init()
    }

    pub fn init_with_capacity(&self, depth: usize) -> KResult<()> {
        self.queue.init_with_capacity(depth)
    }

    pub fn deinit(&self) {
        self.queue.deinit()
    }

    /// Append at the back
    pub fn put(&self, item: P) -> KResult<()> {
        self.queue.append(item)
    }

    pub fn get(&self, timeout: Timeout) -> Option<P> {
        self.queue.get(timeout)
    }

    pub fn remove(&self, item: &P) -> bool {
        self.queue.remove(item)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Underlying queue
    pub fn queue(&self) -> &KQueue<P> {
        &self.queue
    }
}

impl<P: QueueItem> Default for KFifo<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Last-in first-out view (`k_lifo`)
pub struct KLifo<P: QueueItem> {
    queue: KQueue<P>,
}

impl<P: QueueItem> KLifo<P> {
    pub const fn new() -> Self {
        KLifo { queue: KQueue::new() }
    }

    pub fn init(&self) -> KResult<()> {
        self.queue.init()
    }

    pub fn deinit(&self) {
        self.queue.deinit()
    }

    /// Push at the front
    pub fn put(&self, item: P) -> KResult<()> {
        self.queue.prepend(item)
    }

    pub fn get(&self, timeout: Timeout) -> Option<P> {
        self.queue.get(timeout)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Underlying queue
    pub fn queue(&self) -> &KQueue<P> {
        &self.queue
    }
}

impl<P: QueueItem> Default for KLifo<P> {
    fn default() -> Self {
        Self::new()
    }
}
