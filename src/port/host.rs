//! Hosted OSAL port
//!
//! Implements the OSAL surface on std threads so the shim can run under
//! `cargo test`. One tick is `1000 / CFG_TICK_RATE_HZ` milliseconds.
//!
//! Differences from a real RTOS:
//! - Suspension is cooperative: a suspended task parks at its next port call
//!   (start gate, yield or delay).
//! - Deleting a task cannot stop its thread; the thread runs until its entry
//!   returns. Owners signal their tasks to exit before deleting them.
//! - There are no interrupts, so `isr_count` is always 0.

use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use super::{OsMsg, OsTaskId, TaskEntry, TimerCallback};
use crate::config::{CFG_TICK_RATE_HZ, MSEC_PER_SEC};
use crate::error::OsStatus;
use crate::types::WAIT_FOREVER;

/// Smallest stack given to a host thread; OSAL stack sizes are in words
/// tuned for the target and far too small for a hosted test binary.
const HOST_MIN_STACK: usize = 256 * 1024;

// ============ Helpers ============

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn ticks_to_duration(ticks: u32) -> Duration {
    Duration::from_millis(ticks as u64 * MSEC_PER_SEC as u64 / CFG_TICK_RATE_HZ as u64)
}

fn deadline_for(wait: u32) -> Option<Instant> {
    if wait == WAIT_FOREVER {
        None
    } else {
        Some(Instant::now() + ticks_to_duration(wait))
    }
}

/// Block on `cv` until `ready` holds or `deadline` passes
///
/// Returns the guard and whether `ready` was satisfied.
fn wait_until<'a, T, F>(
    cv: &Condvar,
    mut guard: MutexGuard<'a, T>,
    deadline: Option<Instant>,
    mut ready: F,
) -> (MutexGuard<'a, T>, bool)
where
    F: FnMut(&mut T) -> bool,
{
    loop {
        if ready(&mut guard) {
            return (guard, true);
        }
        match deadline {
            None => {
                guard = cv.wait(guard).unwrap_or_else(|e| e.into_inner());
            }
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return (guard, false);
                }
                guard = match cv.wait_timeout(guard, d - now) {
                    Ok((g, _)) => g,
                    Err(e) => e.into_inner().0,
                };
            }
        }
    }
}

// ============ Time ============

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Ticks since the port was first used, wrapping at `u32::MAX`
pub fn get_time() -> u32 {
    let ms = epoch().elapsed().as_millis() as u64;
    (ms * CFG_TICK_RATE_HZ as u64 / MSEC_PER_SEC as u64) as u32
}

/// Milliseconds since the port was first used, wrapping at `u32::MAX`
pub fn get_time_ms() -> u32 {
    epoch().elapsed().as_millis() as u32
}

pub fn time_delay(ticks: u32) {
    checkpoint();
    thread::sleep(ticks_to_duration(ticks));
    checkpoint();
}

pub fn time_delay_ms(ms: u32) {
    checkpoint();
    thread::sleep(Duration::from_millis(ms as u64));
    checkpoint();
}

/// Nesting depth of interrupt handlers; always 0 on the host
#[inline]
pub fn isr_count() -> u32 {
    0
}

// ============ Scheduler ============

static SCHED_LOCK_NESTING: AtomicU32 = AtomicU32::new(0);

/// Host threads are preemptive; the nesting is tracked for symmetry only
pub fn schedule_lock() {
    SCHED_LOCK_NESTING.fetch_add(1, Ordering::AcqRel);
}

pub fn schedule_unlock() {
    let _ = SCHED_LOCK_NESTING.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
}

pub fn task_yield() {
    checkpoint();
    thread::yield_now();
}

// ============ Tasks ============

static NEXT_TASK_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Default)]
struct TaskState {
    suspended: bool,
    deleted: bool,
}

struct TaskControl {
    id: OsTaskId,
    state: Mutex<TaskState>,
    cv: Condvar,
    name: Mutex<String>,
}

std::thread_local! {
    static CURRENT: RefCell<Option<Arc<TaskControl>>> = const { RefCell::new(None) };
    static FOREIGN_ID: Cell<OsTaskId> = const { Cell::new(0) };
}

/// Park the calling task while it is suspended
fn checkpoint() {
    let control = CURRENT.with(|c| c.borrow().clone());
    if let Some(control) = control {
        let guard = lock(&control.state);
        let _ = wait_until(&control.cv, guard, None, |st| !st.suspended || st.deleted);
    }
}

/// Id of the calling task
///
/// Threads not created through [`OsTask::create`] get a stable id on first use.
pub fn current_task_id() -> OsTaskId {
    if let Some(id) = CURRENT.with(|c| c.borrow().as_ref().map(|t| t.id)) {
        return id;
    }
    FOREIGN_ID.with(|id| {
        if id.get() == 0 {
            id.set(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed));
        }
        id.get()
    })
}

/// Handle to a native task
pub struct OsTask {
    control: Arc<TaskControl>,
}

impl OsTask {
    /// Spawn a task running `entry`, optionally parked until [`resume`](Self::resume)
    pub fn create(
        name: &str,
        entry: TaskEntry,
        stack_size: usize,
        _prio: u32,
        start_suspended: bool,
    ) -> Result<OsTask, OsStatus> {
        let control = Arc::new(TaskControl {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(TaskState {
                suspended: start_suspended,
                deleted: false,
            }),
            cv: Condvar::new(),
            name: Mutex::new(name.to_string()),
        });

        let task_control = control.clone();
        thread::Builder::new()
            .name(name.to_string())
            .stack_size(stack_size.max(HOST_MIN_STACK))
            .spawn(move || {
                CURRENT.with(|c| *c.borrow_mut() = Some(task_control));
                checkpoint();
                entry();
                CURRENT.with(|c| c.borrow_mut().take());
            })
            .map_err(|_| OsStatus::Error)?;

        Ok(OsTask { control })
    }

    pub fn id(&self) -> OsTaskId {
        self.control.id
    }

    pub fn suspend(&self) -> OsStatus {
        lock(&self.control.state).suspended = true;
        if current_task_id() == self.control.id {
            checkpoint();
        }
        OsStatus::Success
    }

    pub fn resume(&self) -> OsStatus {
        lock(&self.control.state).suspended = false;
        self.control.cv.notify_all();
        OsStatus::Success
    }

    /// Mark the task deleted and release it if parked
    pub fn delete(&self) -> OsStatus {
        let mut st = lock(&self.control.state);
        st.deleted = true;
        st.suspended = false;
        drop(st);
        self.control.cv.notify_all();
        OsStatus::Success
    }

    pub fn set_name(&self, name: &str) {
        *lock(&self.control.name) = name.to_string();
    }

    /// Name last given to the task
    pub fn name(&self) -> String {
        lock(&self.control.name).clone()
    }

    pub fn is_suspended(&self) -> bool {
        lock(&self.control.state).suspended
    }
}

// ============ Semaphore ============

/// Largest count a native semaphore holds
const SEM_MAX_COUNT: u32 = u16::MAX as u32;

/// Counting semaphore
pub struct OsSem {
    count: Mutex<u32>,
    cv: Condvar,
}

impl OsSem {
    pub fn create(initial: u32) -> Result<OsSem, OsStatus> {
        Ok(OsSem {
            count: Mutex::new(initial.min(SEM_MAX_COUNT)),
            cv: Condvar::new(),
        })
    }

    pub fn acquire(&self, wait: u32) -> OsStatus {
        let guard = lock(&self.count);
        let (mut guard, ok) = wait_until(&self.cv, guard, deadline_for(wait), |c| *c > 0);
        if ok {
            *guard -= 1;
            OsStatus::Success
        } else {
            OsStatus::Timeout
        }
    }

    pub fn release(&self) -> OsStatus {
        let mut count = lock(&self.count);
        if *count >= SEM_MAX_COUNT {
            return OsStatus::Error;
        }
        *count += 1;
        drop(count);
        self.cv.notify_one();
        OsStatus::Success
    }

    pub fn reset(&self) -> OsStatus {
        *lock(&self.count) = 0;
        OsStatus::Success
    }

    pub fn count(&self) -> u32 {
        *lock(&self.count)
    }
}

// ============ Recursive Mutex ============

struct MutexOwner {
    owner: Option<OsTaskId>,
    depth: u32,
}

/// Recursive mutex keyed on the calling task
pub struct OsMutex {
    state: Mutex<MutexOwner>,
    cv: Condvar,
}

impl OsMutex {
    pub fn create() -> Result<OsMutex, OsStatus> {
        Ok(OsMutex {
            state: Mutex::new(MutexOwner { owner: None, depth: 0 }),
            cv: Condvar::new(),
        })
    }

    pub fn acquire(&self, wait: u32) -> OsStatus {
        let me = current_task_id();
        let guard = lock(&self.state);
        let (mut st, ok) = wait_until(&self.cv, guard, deadline_for(wait), |st| {
            st.owner.is_none() || st.owner == Some(me)
        });
        if !ok {
            return OsStatus::Error;
        }
        st.owner = Some(me);
        st.depth += 1;
        OsStatus::Success
    }

    pub fn release(&self) -> OsStatus {
        let me = current_task_id();
        let mut st = lock(&self.state);
        if st.owner != Some(me) {
            return OsStatus::Error;
        }
        st.depth -= 1;
        if st.depth == 0 {
            st.owner = None;
            drop(st);
            self.cv.notify_one();
        }
        OsStatus::Success
    }
}

// ============ Message Queue ============

/// Bounded queue of message words
pub struct OsQueue {
    items: Mutex<VecDeque<OsMsg>>,
    capacity: usize,
    cv: Condvar,
}

impl OsQueue {
    pub fn create(depth: usize) -> Result<OsQueue, OsStatus> {
        if depth == 0 {
            return Err(OsStatus::Error);
        }
        Ok(OsQueue {
            items: Mutex::new(VecDeque::with_capacity(depth)),
            capacity: depth,
            cv: Condvar::new(),
        })
    }

    fn push(&self, msg: OsMsg, front: bool) -> OsStatus {
        let mut items = lock(&self.items);
        if items.len() >= self.capacity {
            return OsStatus::Error;
        }
        if front {
            items.push_front(msg);
        } else {
            items.push_back(msg);
        }
        drop(items);
        self.cv.notify_all();
        OsStatus::Success
    }

    /// Non-blocking send to the back
    pub fn send(&self, msg: OsMsg) -> OsStatus {
        self.push(msg, false)
    }

    pub fn send_to_back(&self, msg: OsMsg) -> OsStatus {
        self.push(msg, false)
    }

    pub fn send_to_front(&self, msg: OsMsg) -> OsStatus {
        self.push(msg, true)
    }

    pub fn receive(&self, wait: u32) -> Result<OsMsg, OsStatus> {
        let guard = lock(&self.items);
        let (mut items, ok) = wait_until(&self.cv, guard, deadline_for(wait), |q| !q.is_empty());
        match items.pop_front() {
            Some(msg) if ok => Ok(msg),
            _ => Err(OsStatus::Timeout),
        }
    }

    pub fn peek(&self, wait: u32) -> Result<OsMsg, OsStatus> {
        let guard = lock(&self.items);
        let (items, ok) = wait_until(&self.cv, guard, deadline_for(wait), |q| !q.is_empty());
        match items.front() {
            Some(msg) if ok => Ok(*msg),
            _ => Err(OsStatus::Timeout),
        }
    }

    /// Remove the first occurrence of `msg`
    pub fn remove(&self, msg: OsMsg) -> OsStatus {
        let mut items = lock(&self.items);
        match items.iter().position(|m| *m == msg) {
            Some(pos) => {
                items.remove(pos);
                OsStatus::Success
            }
            None => OsStatus::Error,
        }
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    pub fn space_available(&self) -> usize {
        self.capacity - lock(&self.items).len()
    }
}

// ============ Event Group ============

/// 32-bit event flag group
pub struct OsEventGroup {
    bits: Mutex<u32>,
    cv: Condvar,
}

impl OsEventGroup {
    pub fn create() -> Result<OsEventGroup, OsStatus> {
        Ok(OsEventGroup {
            bits: Mutex::new(0),
            cv: Condvar::new(),
        })
    }

    /// OR `bits` into the group
    pub fn put(&self, bits: u32) -> OsStatus {
        *lock(&self.bits) |= bits;
        self.cv.notify_all();
        OsStatus::Success
    }

    pub fn clear_bits(&self, bits: u32) -> OsStatus {
        *lock(&self.bits) &= !bits;
        OsStatus::Success
    }

    pub fn get_bits(&self) -> Result<u32, OsStatus> {
        Ok(*lock(&self.bits))
    }

    /// Wait for any (or all) of `bits`
    ///
    /// Returns the group value observed when the wait was satisfied, before
    /// any clearing.
    pub fn wait(&self, bits: u32, wait_all: bool, clear_on_exit: bool, wait: u32) -> Result<u32, OsStatus> {
        let guard = lock(&self.bits);
        let (mut cur, ok) = wait_until(&self.cv, guard, deadline_for(wait), |cur| {
            if wait_all {
                *cur & bits == bits
            } else {
                *cur & bits != 0
            }
        });
        if !ok {
            return Err(OsStatus::Timeout);
        }
        let observed = *cur;
        if clear_on_exit {
            *cur &= !bits;
        }
        Ok(observed)
    }
}

// ============ Software Timer ============

struct TimerState {
    period: u32,
    auto_reload: bool,
    deadline: Option<Instant>,
    expiry_tick: u32,
    deleted: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cv: Condvar,
    callback: TimerCallback,
}

/// Software timer served by its own host thread
pub struct OsTimer {
    shared: Arc<TimerShared>,
}

impl OsTimer {
    /// Create a stopped timer
    pub fn create(callback: TimerCallback, period: u32, auto_reload: bool, name: &str) -> Result<OsTimer, OsStatus> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                period,
                auto_reload,
                deadline: None,
                expiry_tick: 0,
                deleted: false,
            }),
            cv: Condvar::new(),
            callback,
        });

        let worker = shared.clone();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || timer_service(worker))
            .map_err(|_| OsStatus::Error)?;

        Ok(OsTimer { shared })
    }

    fn arm(&self, st: &mut TimerState) {
        st.deadline = Some(Instant::now() + ticks_to_duration(st.period));
        st.expiry_tick = get_time().wrapping_add(st.period);
    }

    /// Set a new period and (re)start the timer
    pub fn change(&self, ticks: u32) {
        let mut st = lock(&self.shared.state);
        st.period = ticks.max(1);
        self.arm(&mut st);
        drop(st);
        self.shared.cv.notify_all();
    }

    pub fn start(&self) {
        let mut st = lock(&self.shared.state);
        self.arm(&mut st);
        drop(st);
        self.shared.cv.notify_all();
    }

    pub fn stop(&self) {
        lock(&self.shared.state).deadline = None;
        self.shared.cv.notify_all();
    }

    /// Tick at which the timer fires next
    pub fn expiry_time(&self) -> u32 {
        lock(&self.shared.state).expiry_tick
    }

    pub fn is_active(&self) -> bool {
        lock(&self.shared.state).deadline.is_some()
    }
}

impl Drop for OsTimer {
    fn drop(&mut self) {
        let mut st = lock(&self.shared.state);
        st.deleted = true;
        st.deadline = None;
        drop(st);
        self.shared.cv.notify_all();
    }
}

fn timer_service(shared: Arc<TimerShared>) {
    let mut st = lock(&shared.state);
    loop {
        if st.deleted {
            return;
        }
        let Some(deadline) = st.deadline else {
            st = shared.cv.wait(st).unwrap_or_else(|e| e.into_inner());
            continue;
        };
        let now = Instant::now();
        if now < deadline {
            st = match shared.cv.wait_timeout(st, deadline - now) {
                Ok((g, _)) => g,
                Err(e) => e.into_inner().0,
            };
            continue;
        }

        if st.auto_reload {
            st.deadline = Some(deadline + ticks_to_duration(st.period));
            st.expiry_tick = st.expiry_tick.wrapping_add(st.period);
        } else {
            st.deadline = None;
        }
        drop(st);
        (shared.callback)();
        st = lock(&shared.state);
    }
}

// ============ Heap ============

/// Bookkeeping prefix in front of every block; also the block alignment
const HEAP_HEADER: usize = 16;

fn heap_alloc(size: usize, zeroed: bool) -> *mut u8 {
    use std::alloc::{alloc, alloc_zeroed, Layout};

    let Some(total) = size.checked_add(HEAP_HEADER) else {
        return core::ptr::null_mut();
    };
    let Ok(layout) = Layout::from_size_align(total, HEAP_HEADER) else {
        return core::ptr::null_mut();
    };
    // SAFETY: layout has non-zero size
    let base = unsafe {
        if zeroed {
            alloc_zeroed(layout)
        } else {
            alloc(layout)
        }
    };
    if base.is_null() {
        return base;
    }
    // SAFETY: the block is at least HEAP_HEADER bytes and 16-byte aligned
    unsafe {
        (base as *mut usize).write(total);
        base.add(HEAP_HEADER)
    }
}

pub fn malloc(size: usize) -> *mut u8 {
    heap_alloc(size, false)
}

pub fn calloc(nmemb: usize, size: usize) -> *mut u8 {
    match nmemb.checked_mul(size) {
        Some(total) => heap_alloc(total, true),
        None => core::ptr::null_mut(),
    }
}

/// Release a block from [`malloc`]/[`calloc`]
///
/// # Safety
/// `ptr` must be NULL or a live block returned by this port's allocator.
pub unsafe fn free(ptr: *mut u8) {
    use std::alloc::{dealloc, Layout};

    if ptr.is_null() {
        return;
    }
    // SAFETY: caller guarantees `ptr` came from `heap_alloc`
    unsafe {
        let base = ptr.sub(HEAP_HEADER);
        let total = (base as *const usize).read();
        dealloc(base, Layout::from_size_align_unchecked(total, HEAP_HEADER));
    }
}

/// Stop the system after an unrecoverable error
pub fn fatal_halt() -> ! {
    std::process::abort()
}
