//! WinnerMicro OSAL port
//!
//! Binds the vendor `wm_os_internal_*` layer. Besides the native objects this
//! port provides the `critical-section` implementation and the global
//! allocator for target builds.

use alloc::boxed::Box;
use alloc::ffi::CString;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use core::alloc::{GlobalAlloc, Layout};
use core::cell::{Cell, RefCell};
use core::ffi::{c_char, c_void};
use core::ptr;

use critical_section::{Mutex, RawRestoreState};
use portable_atomic::{AtomicBool, Ordering};

use super::{OsMsg, OsTaskId, TaskEntry, TimerCallback};
use crate::error::OsStatus;

// ============ Vendor Interface ============

type RawHandle = *mut c_void;
type RawStatus = i32;

extern "C" {
    fn wm_os_internal_task_create(
        task: *mut RawHandle,
        name: *const c_char,
        entry: extern "C" fn(*mut c_void),
        param: *mut c_void,
        stk_size: u32,
        prio: u32,
        flag: u32,
    ) -> RawStatus;
    fn wm_os_internal_task_del(task: RawHandle) -> RawStatus;
    fn wm_os_internal_task_id() -> RawHandle;
    fn wm_os_internal_set_task_name(task: *mut RawHandle, name: *const c_char);
    fn wm_os_internal_task_resume(task: *mut RawHandle) -> RawStatus;
    fn wm_os_internal_task_suspend(task: *mut RawHandle) -> RawStatus;
    fn wm_os_internal_task_yield();
    fn wm_os_internal_task_schedule_lock();
    fn wm_os_internal_task_schedule_unlock();

    fn wm_os_internal_recursive_mutex_create(mutex: *mut RawHandle) -> RawStatus;
    fn wm_os_internal_recursive_mutex_delete(mutex: RawHandle) -> RawStatus;
    fn wm_os_internal_recursive_mutex_acquire(mutex: RawHandle, wait_time: u32) -> RawStatus;
    fn wm_os_internal_recursive_mutex_release(mutex: RawHandle) -> RawStatus;

    fn wm_os_internal_sem_create(sem: *mut RawHandle, cnt: u32) -> RawStatus;
    fn wm_os_internal_sem_reset(sem: RawHandle) -> RawStatus;
    fn wm_os_internal_sem_delete(sem: RawHandle) -> RawStatus;
    fn wm_os_internal_sem_acquire(sem: RawHandle, wait_time: u32) -> RawStatus;
    fn wm_os_internal_sem_release(sem: RawHandle) -> RawStatus;
    fn wm_os_internal_sem_get_count(sem: RawHandle) -> u16;

    fn wm_os_internal_queue_create(queue: *mut RawHandle, queue_size: u32) -> RawStatus;
    fn wm_os_internal_queue_delete(queue: RawHandle) -> RawStatus;
    fn wm_os_internal_queue_send(queue: RawHandle, msg: *mut c_void) -> RawStatus;
    fn wm_os_internal_queue_send_to_front(queue: RawHandle, msg: *mut c_void) -> RawStatus;
    fn wm_os_internal_queue_send_to_back(queue: RawHandle, msg: *mut c_void) -> RawStatus;
    fn wm_os_internal_queue_receive(queue: RawHandle, msg: *mut *mut c_void, wait_time: u32) -> RawStatus;
    fn wm_os_internal_queue_peek(queue: RawHandle, msg: *mut *mut c_void, wait_time: u32) -> RawStatus;
    fn wm_os_internal_queue_remove(queue: RawHandle, msg: *mut c_void) -> RawStatus;
    fn wm_os_internal_queue_is_empty(queue: RawHandle) -> u8;
    fn wm_os_internal_queue_space_available(queue: RawHandle) -> u32;

    fn wm_os_internal_event_create(event: *mut RawHandle) -> RawStatus;
    fn wm_os_internal_event_delete(event: RawHandle) -> RawStatus;
    fn wm_os_internal_event_get(
        event: RawHandle,
        wait_event: u32,
        return_event: *mut u32,
        equal: bool,
        wait_time: u32,
    ) -> RawStatus;
    fn wm_os_internal_event_put(event: RawHandle, event_bits: u32) -> RawStatus;
    fn wm_os_internal_event_clear_bits(event: RawHandle, event_bits: u32) -> RawStatus;
    fn wm_os_internal_event_get_bits(event: RawHandle, event_bits: *mut u32) -> RawStatus;

    fn wm_os_internal_timer_create(
        timer: *mut RawHandle,
        callback: extern "C" fn(*mut c_void, *mut c_void),
        callback_arg: *mut c_void,
        period: u32,
        repeat: bool,
        name: *const c_char,
    ) -> RawStatus;
    fn wm_os_internal_timer_start(timer: RawHandle);
    fn wm_os_internal_timer_change(timer: RawHandle, ticks: u32);
    fn wm_os_internal_timer_stop(timer: RawHandle);
    fn wm_os_internal_timer_delete(timer: RawHandle) -> RawStatus;
    fn wm_os_internal_timer_active(timer: RawHandle) -> u8;
    fn wm_os_internal_timer_expirytime(timer: RawHandle) -> u32;

    fn wm_os_internal_get_time() -> u32;
    fn wm_os_internal_get_time_ms() -> u32;
    fn wm_os_internal_time_delay(ticks: u32);
    fn wm_os_internal_time_delay_ms(ms: u32);
    fn wm_os_internal_get_isr_count() -> u8;
    fn wm_os_internal_set_critical();
    fn wm_os_internal_release_critical();

    fn wm_os_internal_malloc(size: usize) -> *mut c_void;
    fn wm_os_internal_free(p: *mut c_void);
    fn wm_os_internal_calloc(nelem: usize, elsize: usize) -> *mut c_void;
}

#[inline]
fn status(raw: RawStatus) -> OsStatus {
    match raw {
        0 => OsStatus::Success,
        r if r == OsStatus::Timeout as i32 => OsStatus::Timeout,
        _ => OsStatus::Error,
    }
}

#[inline]
fn created(raw: RawStatus, handle: RawHandle) -> Result<RawHandle, OsStatus> {
    match status(raw) {
        OsStatus::Success if !handle.is_null() => Ok(handle),
        OsStatus::Success => Err(OsStatus::Error),
        other => Err(other),
    }
}

// ============ Critical Section ============

struct WmCriticalSection;

critical_section::set_impl!(WmCriticalSection);

// SAFETY: the vendor critical section nests and masks every task switch and
// interrupt that could observe the protected data.
unsafe impl critical_section::Impl for WmCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        unsafe { wm_os_internal_set_critical() };
        true
    }

    unsafe fn release(_state: RawRestoreState) {
        unsafe { wm_os_internal_release_critical() };
    }
}

// ============ Heap ============

/// Alignment guaranteed by the vendor heap
const HEAP_MIN_ALIGN: usize = 8;

struct OsalHeap;

// SAFETY: forwards to the vendor heap, which is thread safe; over-aligned
// requests are refused.
unsafe impl GlobalAlloc for OsalHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > HEAP_MIN_ALIGN {
            return ptr::null_mut();
        }
        malloc(layout.size())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > HEAP_MIN_ALIGN {
            return ptr::null_mut();
        }
        calloc(1, layout.size())
    }

    unsafe fn dealloc(&self, p: *mut u8, _layout: Layout) {
        unsafe { free(p) }
    }
}

#[cfg(not(test))]
#[global_allocator]
static HEAP: OsalHeap = OsalHeap;

pub fn malloc(size: usize) -> *mut u8 {
    unsafe { wm_os_internal_malloc(size) as *mut u8 }
}

pub fn calloc(nmemb: usize, size: usize) -> *mut u8 {
    unsafe { wm_os_internal_calloc(nmemb, size) as *mut u8 }
}

/// Release a block from [`malloc`]/[`calloc`]
///
/// # Safety
/// `ptr` must be NULL or a live block returned by the vendor heap.
pub unsafe fn free(ptr: *mut u8) {
    if !ptr.is_null() {
        unsafe { wm_os_internal_free(ptr as *mut c_void) }
    }
}

/// Stop the system after an unrecoverable error
pub fn fatal_halt() -> ! {
    unsafe { wm_os_internal_set_critical() };
    loop {
        core::hint::spin_loop();
    }
}

// ============ Time & Scheduler ============

pub fn get_time() -> u32 {
    unsafe { wm_os_internal_get_time() }
}

pub fn get_time_ms() -> u32 {
    unsafe { wm_os_internal_get_time_ms() }
}

pub fn time_delay(ticks: u32) {
    unsafe { wm_os_internal_time_delay(ticks) }
}

pub fn time_delay_ms(ms: u32) {
    unsafe { wm_os_internal_time_delay_ms(ms) }
}

pub fn isr_count() -> u32 {
    unsafe { wm_os_internal_get_isr_count() as u32 }
}

pub fn schedule_lock() {
    unsafe { wm_os_internal_task_schedule_lock() }
}

pub fn schedule_unlock() {
    unsafe { wm_os_internal_task_schedule_unlock() }
}

pub fn task_yield() {
    unsafe { wm_os_internal_task_yield() }
}

pub fn current_task_id() -> OsTaskId {
    unsafe { wm_os_internal_task_id() as OsTaskId }
}

// ============ Tasks ============

#[derive(Clone, Copy)]
enum TaskSlot {
    /// Created, handle not recorded yet
    Pending,
    Live(RawHandle),
    /// Deleted by its owner or by itself
    Gone,
}

type SharedSlot = Arc<Mutex<Cell<TaskSlot>>>;

struct TaskStart {
    entry: TaskEntry,
    slot: SharedSlot,
}

extern "C" fn task_trampoline(param: *mut c_void) {
    // SAFETY: `param` is the boxed start block leaked by `OsTask::create`
    let start = unsafe { Box::from_raw(param as *mut TaskStart) };
    let TaskStart { entry, slot } = *start;
    entry();

    // Whoever moves the slot to `Gone` owns the native delete
    let prev = critical_section::with(|cs| slot.borrow(cs).replace(TaskSlot::Gone));
    drop(slot);
    if let TaskSlot::Live(_) | TaskSlot::Pending = prev {
        // Native tasks must not return
        unsafe { wm_os_internal_task_del(ptr::null_mut()) };
    }
    loop {
        time_delay(1);
    }
}

/// Handle to a native task
pub struct OsTask {
    slot: SharedSlot,
    name: Mutex<RefCell<String>>,
    suspended: AtomicBool,
}

// SAFETY: the raw handle is only passed back to the vendor layer
unsafe impl Send for OsTask {}
unsafe impl Sync for OsTask {}

impl OsTask {
    /// Spawn a task running `entry`, optionally suspended until [`resume`](Self::resume)
    pub fn create(
        name: &str,
        entry: TaskEntry,
        stack_size: usize,
        prio: u32,
        start_suspended: bool,
    ) -> Result<OsTask, OsStatus> {
        let c_name = CString::new(name).map_err(|_| OsStatus::Error)?;
        let slot: SharedSlot = Arc::new(Mutex::new(Cell::new(TaskSlot::Pending)));
        let param = Box::into_raw(Box::new(TaskStart {
            entry,
            slot: slot.clone(),
        })) as *mut c_void;
        let mut handle: RawHandle = ptr::null_mut();

        let raw = unsafe {
            wm_os_internal_task_create(
                &mut handle,
                c_name.as_ptr(),
                task_trampoline,
                param,
                stack_size as u32,
                prio,
                0,
            )
        };
        let handle = match created(raw, handle) {
            Ok(h) => h,
            Err(e) => {
                // SAFETY: the task never started, so the start block is still ours
                drop(unsafe { Box::from_raw(param as *mut TaskStart) });
                return Err(e);
            }
        };

        // A task that already finished has deleted itself
        critical_section::with(|cs| {
            let cell = slot.borrow(cs);
            if let TaskSlot::Pending = cell.get() {
                cell.set(TaskSlot::Live(handle));
            }
        });

        let task = OsTask {
            slot,
            name: Mutex::new(RefCell::new(name.to_string())),
            suspended: AtomicBool::new(false),
        };
        if start_suspended {
            task.suspend();
        }
        Ok(task)
    }

    fn raw(&self) -> RawHandle {
        match critical_section::with(|cs| self.slot.borrow(cs).get()) {
            TaskSlot::Live(h) => h,
            _ => ptr::null_mut(),
        }
    }

    pub fn id(&self) -> OsTaskId {
        self.raw() as OsTaskId
    }

    pub fn suspend(&self) -> OsStatus {
        let mut h = self.raw();
        if h.is_null() {
            return OsStatus::Error;
        }
        self.suspended.store(true, Ordering::Release);
        status(unsafe { wm_os_internal_task_suspend(&mut h) })
    }

    pub fn resume(&self) -> OsStatus {
        let mut h = self.raw();
        if h.is_null() {
            return OsStatus::Error;
        }
        self.suspended.store(false, Ordering::Release);
        status(unsafe { wm_os_internal_task_resume(&mut h) })
    }

    /// Delete the task unless it already deleted itself
    pub fn delete(&self) -> OsStatus {
        let prev = critical_section::with(|cs| self.slot.borrow(cs).replace(TaskSlot::Gone));
        match prev {
            TaskSlot::Live(h) => status(unsafe { wm_os_internal_task_del(h) }),
            _ => OsStatus::Error,
        }
    }

    pub fn set_name(&self, name: &str) {
        let Ok(c_name) = CString::new(name) else {
            return;
        };
        let mut h = self.raw();
        if h.is_null() {
            return;
        }
        // The native layer keeps the pointer; the name lives as long as the task
        let c_name = c_name.into_raw();
        unsafe { wm_os_internal_set_task_name(&mut h, c_name) };
        critical_section::with(|cs| *self.name.borrow(cs).borrow_mut() = name.to_string());
    }

    pub fn name(&self) -> String {
        critical_section::with(|cs| self.name.borrow(cs).borrow().clone())
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }
}

// ============ Semaphore ============

/// Counting semaphore
pub struct OsSem {
    raw: RawHandle,
}

unsafe impl Send for OsSem {}
unsafe impl Sync for OsSem {}

impl OsSem {
    pub fn create(initial: u32) -> Result<OsSem, OsStatus> {
        let mut raw = ptr::null_mut();
        let rc = unsafe { wm_os_internal_sem_create(&mut raw, initial) };
        created(rc, raw).map(|raw| OsSem { raw })
    }

    pub fn acquire(&self, wait: u32) -> OsStatus {
        status(unsafe { wm_os_internal_sem_acquire(self.raw, wait) })
    }

    pub fn release(&self) -> OsStatus {
        status(unsafe { wm_os_internal_sem_release(self.raw) })
    }

    pub fn reset(&self) -> OsStatus {
        status(unsafe { wm_os_internal_sem_reset(self.raw) })
    }

    pub fn count(&self) -> u32 {
        unsafe { wm_os_internal_sem_get_count(self.raw) as u32 }
    }
}

impl Drop for OsSem {
    fn drop(&mut self) {
        unsafe { wm_os_internal_sem_delete(self.raw) };
    }
}

// ============ Recursive Mutex ============

/// Recursive mutex
pub struct OsMutex {
    raw: RawHandle,
}

unsafe impl Send for OsMutex {}
unsafe impl Sync for OsMutex {}

impl OsMutex {
    pub fn create() -> Result<OsMutex, OsStatus> {
        let mut raw = ptr::null_mut();
        let rc = unsafe { wm_os_internal_recursive_mutex_create(&mut raw) };
        created(rc, raw).map(|raw| OsMutex { raw })
    }

    pub fn acquire(&self, wait: u32) -> OsStatus {
        status(unsafe { wm_os_internal_recursive_mutex_acquire(self.raw, wait) })
    }

    pub fn release(&self) -> OsStatus {
        status(unsafe { wm_os_internal_recursive_mutex_release(self.raw) })
    }
}

impl Drop for OsMutex {
    fn drop(&mut self) {
        unsafe { wm_os_internal_recursive_mutex_delete(self.raw) };
    }
}

// ============ Message Queue ============

/// Bounded queue of message words
pub struct OsQueue {
    raw: RawHandle,
}

unsafe impl Send for OsQueue {}
unsafe impl Sync for OsQueue {}

impl OsQueue {
    pub fn create(depth: usize) -> Result<OsQueue, OsStatus> {
        if depth == 0 {
            return Err(OsStatus::Error);
        }
        let mut raw = ptr::null_mut();
        let rc = unsafe { wm_os_internal_queue_create(&mut raw, depth as u32) };
        created(rc, raw).map(|raw| OsQueue { raw })
    }

    /// Non-blocking send to the back
    pub fn send(&self, msg: OsMsg) -> OsStatus {
        status(unsafe { wm_os_internal_queue_send(self.raw, msg.as_ptr()) })
    }

    pub fn send_to_back(&self, msg: OsMsg) -> OsStatus {
        status(unsafe { wm_os_internal_queue_send_to_back(self.raw, msg.as_ptr()) })
    }

    pub fn send_to_front(&self, msg: OsMsg) -> OsStatus {
        status(unsafe { wm_os_internal_queue_send_to_front(self.raw, msg.as_ptr()) })
    }

    pub fn receive(&self, wait: u32) -> Result<OsMsg, OsStatus> {
        let mut msg: *mut c_void = ptr::null_mut();
        status(unsafe { wm_os_internal_queue_receive(self.raw, &mut msg, wait) })
            .into_result()?;
        OsMsg::from_raw(msg).ok_or(OsStatus::Timeout)
    }

    pub fn peek(&self, wait: u32) -> Result<OsMsg, OsStatus> {
        let mut msg: *mut c_void = ptr::null_mut();
        status(unsafe { wm_os_internal_queue_peek(self.raw, &mut msg, wait) }).into_result()?;
        OsMsg::from_raw(msg).ok_or(OsStatus::Timeout)
    }

    /// Remove the first occurrence of `msg`
    pub fn remove(&self, msg: OsMsg) -> OsStatus {
        status(unsafe { wm_os_internal_queue_remove(self.raw, msg.as_ptr()) })
    }

    pub fn is_empty(&self) -> bool {
        unsafe { wm_os_internal_queue_is_empty(self.raw) != 0 }
    }

    pub fn space_available(&self) -> usize {
        unsafe { wm_os_internal_queue_space_available(self.raw) as usize }
    }
}

impl Drop for OsQueue {
    fn drop(&mut self) {
        unsafe { wm_os_internal_queue_delete(self.raw) };
    }
}

// ============ Event Group ============

/// 32-bit event flag group
pub struct OsEventGroup {
    raw: RawHandle,
}

unsafe impl Send for OsEventGroup {}
unsafe impl Sync for OsEventGroup {}

impl OsEventGroup {
    pub fn create() -> Result<OsEventGroup, OsStatus> {
        let mut raw = ptr::null_mut();
        let rc = unsafe { wm_os_internal_event_create(&mut raw) };
        created(rc, raw).map(|raw| OsEventGroup { raw })
    }

    /// OR `bits` into the group
    pub fn put(&self, bits: u32) -> OsStatus {
        status(unsafe { wm_os_internal_event_put(self.raw, bits) })
    }

    pub fn clear_bits(&self, bits: u32) -> OsStatus {
        status(unsafe { wm_os_internal_event_clear_bits(self.raw, bits) })
    }

    pub fn get_bits(&self) -> Result<u32, OsStatus> {
        let mut bits = 0;
        status(unsafe { wm_os_internal_event_get_bits(self.raw, &mut bits) }).into_result()?;
        Ok(bits)
    }

    /// Wait for any (or all) of `bits`
    ///
    /// Returns the group value observed when the wait was satisfied, before
    /// any clearing.
    pub fn wait(&self, bits: u32, wait_all: bool, clear_on_exit: bool, wait: u32) -> Result<u32, OsStatus> {
        let mut observed = 0;
        status(unsafe { wm_os_internal_event_get(self.raw, bits, &mut observed, wait_all, wait) })
            .into_result()?;

        let satisfied = if wait_all {
            observed & bits == bits
        } else {
            observed & bits != 0
        };
        if !satisfied {
            return Err(OsStatus::Timeout);
        }
        // The native wait always consumes the requested bits
        if !clear_on_exit {
            self.put(observed & bits);
        }
        Ok(observed)
    }
}

impl Drop for OsEventGroup {
    fn drop(&mut self) {
        unsafe { wm_os_internal_event_delete(self.raw) };
    }
}

// ============ Software Timer ============

extern "C" fn timer_trampoline(_timer: *mut c_void, arg: *mut c_void) {
    // SAFETY: `arg` points at the callback owned by the live `OsTimer`
    let callback = unsafe { &*(arg as *const TimerCallback) };
    callback();
}

/// Software timer served by the native timer task
pub struct OsTimer {
    raw: RawHandle,
    callback: *mut TimerCallback,
}

unsafe impl Send for OsTimer {}
unsafe impl Sync for OsTimer {}

impl OsTimer {
    /// Create a stopped timer
    pub fn create(callback: TimerCallback, period: u32, auto_reload: bool, name: &str) -> Result<OsTimer, OsStatus> {
        let c_name = CString::new(name).map_err(|_| OsStatus::Error)?;
        let callback = Box::into_raw(Box::new(callback));
        let mut raw = ptr::null_mut();
        let rc = unsafe {
            wm_os_internal_timer_create(
                &mut raw,
                timer_trampoline,
                callback as *mut c_void,
                period,
                auto_reload,
                c_name.into_raw(),
            )
        };
        match created(rc, raw) {
            Ok(raw) => Ok(OsTimer { raw, callback }),
            Err(e) => {
                drop(unsafe { Box::from_raw(callback) });
                Err(e)
            }
        }
    }

    /// Set a new period and (re)start the timer
    pub fn change(&self, ticks: u32) {
        unsafe { wm_os_internal_timer_change(self.raw, ticks.max(1)) }
    }

    pub fn start(&self) {
        unsafe { wm_os_internal_timer_start(self.raw) }
    }

    pub fn stop(&self) {
        unsafe { wm_os_internal_timer_stop(self.raw) }
    }

    pub fn expiry_time(&self) -> u32 {
        unsafe { wm_os_internal_timer_expirytime(self.raw) }
    }

    pub fn is_active(&self) -> bool {
        unsafe { wm_os_internal_timer_active(self.raw) != 0 }
    }
}

impl Drop for OsTimer {
    fn drop(&mut self) {
        unsafe {
            wm_os_internal_timer_stop(self.raw);
            wm_os_internal_timer_delete(self.raw);
            drop(Box::from_raw(self.callback));
        }
    }
}
