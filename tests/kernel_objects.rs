//! Kernel object tests on the host port
//!
//! Threads, timers, semaphores, recursive mutexes, queues and event flags.

#[cfg(test)]
mod sem_tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use wm_kernel::sem::KSem;
    use wm_kernel::{KError, Timeout};

    #[test]
    fn test_give_take() {
        let sem = KSem::new();
        sem.init(0, 1).unwrap();
        assert_eq!(sem.take(Timeout::NoWait), Err(KError::TimedOut));

        sem.give();
        assert_eq!(sem.count_get(), 1);
        assert_eq!(sem.take(Timeout::NoWait), Ok(()));
        assert_eq!(sem.count_get(), 0);
    }

    #[test]
    fn test_take_times_out() {
        let sem = KSem::new();
        sem.init(0, 1).unwrap();
        let start = Instant::now();
        assert_eq!(sem.take(Timeout::msec(30)), Err(KError::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_give_from_other_thread() {
        let sem = Arc::new(KSem::new());
        sem.init(0, 1).unwrap();

        let giver = sem.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            giver.give();
        });
        assert_eq!(sem.take(Timeout::Forever), Ok(()));
        handle.join().unwrap();
    }

    #[test]
    fn test_reset_drops_tokens() {
        let sem = KSem::new();
        sem.init(3, 10).unwrap();
        assert_eq!(sem.count_get(), 3);
        sem.reset();
        assert_eq!(sem.count_get(), 0);
    }

    #[test]
    fn test_uninitialized() {
        let sem = KSem::new();
        assert!(!sem.is_initialized());
        assert_eq!(sem.take(Timeout::NoWait), Err(KError::Inval));
        assert_eq!(sem.count_get(), 0);
        // Logged, no crash
        sem.give();
        sem.deinit();
    }

    #[test]
    fn test_deinit_empties_handle() {
        let sem = KSem::new();
        sem.init(1, 1).unwrap();
        sem.deinit();
        assert_eq!(sem.take(Timeout::NoWait), Err(KError::Inval));
    }
}

#[cfg(test)]
mod mutex_tests {
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use wm_kernel::mutex::KMutex;
    use wm_kernel::{KError, OsStatus, Timeout};

    #[test]
    fn test_recursive_lock() {
        let mutex = Arc::new(KMutex::new());
        mutex.init().unwrap();

        mutex.lock(Timeout::Forever).unwrap();
        mutex.lock(Timeout::Forever).unwrap();

        let (tx, rx) = mpsc::channel::<()>();
        let (res_tx, res_rx) = mpsc::channel();
        let other = mutex.clone();
        let handle = thread::spawn(move || {
            for _ in rx {
                let res = other.lock(Timeout::msec(20));
                if res.is_ok() {
                    other.unlock().unwrap();
                }
                res_tx.send(res).unwrap();
            }
        });

        // Held twice
        tx.send(()).unwrap();
        assert_eq!(res_rx.recv().unwrap(), Err(KError::Os(OsStatus::Error)));

        // Still held once
        mutex.unlock().unwrap();
        tx.send(()).unwrap();
        assert!(res_rx.recv().unwrap().is_err());

        // Released
        mutex.unlock().unwrap();
        tx.send(()).unwrap();
        assert_eq!(res_rx.recv_timeout(Duration::from_secs(2)).unwrap(), Ok(()));

        drop(tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_unlock_by_non_owner_forwards_status() {
        let mutex = KMutex::new();
        mutex.init().unwrap();
        assert_eq!(mutex.unlock(), Err(KError::Os(OsStatus::Error)));
    }

    #[test]
    fn test_uninitialized() {
        let mutex = KMutex::new();
        assert_eq!(mutex.lock(Timeout::NoWait), Err(KError::Inval));
        assert_eq!(mutex.unlock(), Err(KError::Inval));
        assert_eq!(mutex.deinit(), Err(KError::Inval));
    }
}

#[cfg(test)]
mod queue_tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use wm_kernel::queue::{KFifo, KLifo, KQueue};
    use wm_kernel::{KError, Timeout, CFG_QUEUE_DEFAULT_DEPTH};

    #[test]
    fn test_fifo_order() {
        let fifo: KFifo<Box<u32>> = KFifo::new();
        fifo.init().unwrap();
        for i in 0..3 {
            fifo.put(Box::new(i)).unwrap();
        }
        let got: Vec<u32> = (0..3).map(|_| *fifo.get(Timeout::NoWait).unwrap()).collect();
        assert_eq!(got, vec![0, 1, 2]);
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_lifo_order() {
        let lifo: KLifo<Box<u32>> = KLifo::new();
        lifo.init().unwrap();
        for i in 0..3 {
            lifo.put(Box::new(i)).unwrap();
        }
        let got: Vec<u32> = (0..3).map(|_| *lifo.get(Timeout::NoWait).unwrap()).collect();
        assert_eq!(got, vec![2, 1, 0]);
    }

    #[test]
    fn test_default_capacity_and_full_queue() {
        let queue: KQueue<Box<usize>> = KQueue::new();
        queue.init().unwrap();
        assert_eq!(queue.space_available(), CFG_QUEUE_DEFAULT_DEPTH);
        for i in 0..CFG_QUEUE_DEFAULT_DEPTH {
            queue.append(Box::new(i)).unwrap();
        }
        assert_eq!(queue.space_available(), 0);
        assert_eq!(queue.append(Box::new(99)), Err(KError::Again));
        assert_eq!(queue.prepend(Box::new(99)), Err(KError::Again));
    }

    #[test]
    fn test_remove_by_identity() {
        let queue: KQueue<Arc<u32>> = KQueue::new();
        queue.init_with_capacity(4).unwrap();
        let a = Arc::new(1);
        let b = Arc::new(2);
        queue.append(a.clone()).unwrap();
        queue.append(b.clone()).unwrap();
        assert_eq!(Arc::strong_count(&a), 2);

        assert!(queue.remove(&a));
        assert_eq!(Arc::strong_count(&a), 1);
        assert!(!queue.remove(&a));

        let head = queue.get(Timeout::NoWait).unwrap();
        assert!(Arc::ptr_eq(&head, &b));
    }

    #[test]
    fn test_deinit_drops_queued_items() {
        let queue: KQueue<Arc<u32>> = KQueue::new();
        queue.init().unwrap();
        let item = Arc::new(7);
        queue.append(item.clone()).unwrap();
        queue.append(item.clone()).unwrap();
        assert_eq!(Arc::strong_count(&item), 3);

        queue.deinit();
        assert_eq!(Arc::strong_count(&item), 1);
        assert_eq!(queue.append(item.clone()), Err(KError::Inval));
        assert_eq!(Arc::strong_count(&item), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_get_blocks_until_item() {
        let fifo: Arc<KFifo<Box<&'static str>>> = Arc::new(KFifo::new());
        fifo.init().unwrap();
        assert!(fifo.get(Timeout::msec(10)).is_none());

        let producer = fifo.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.put(Box::new("late")).unwrap();
        });
        assert_eq!(*fifo.get(Timeout::msec(2000)).unwrap(), "late");
        handle.join().unwrap();
    }

    #[test]
    fn test_peek_head_keeps_item() {
        let queue: KQueue<Box<u32>> = KQueue::new();
        queue.init().unwrap();
        queue.append(Box::new(42)).unwrap();
        let head = unsafe { queue.peek_head() }.copied();
        assert_eq!(head, Some(42));
        assert_eq!(*queue.get(Timeout::NoWait).unwrap(), 42);
    }

    /// Counts how many items were dropped
    struct Tracked(Arc<std::sync::atomic::AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_append_racing_deinit_loses_nothing() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        for _ in 0..20 {
            let queue: Arc<KQueue<Box<Tracked>>> = Arc::new(KQueue::new());
            queue.init_with_capacity(1024).unwrap();
            let created = Arc::new(AtomicUsize::new(0));
            let dropped = Arc::new(AtomicUsize::new(0));

            let producers: Vec<_> = (0..4)
                .map(|_| {
                    let (queue, created, dropped) = (queue.clone(), created.clone(), dropped.clone());
                    thread::spawn(move || loop {
                        created.fetch_add(1, Ordering::SeqCst);
                        match queue.append(Box::new(Tracked(dropped.clone()))) {
                            Ok(()) | Err(KError::Again) => thread::yield_now(),
                            Err(_) => break,
                        }
                    })
                })
                .collect();

            thread::sleep(Duration::from_millis(2));
            queue.deinit();
            for p in producers {
                p.join().unwrap();
            }
            assert_eq!(dropped.load(Ordering::SeqCst), created.load(Ordering::SeqCst));
        }
    }
}

#[cfg(test)]
mod event_flag_tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use wm_kernel::kevent::KEvent;
    use wm_kernel::Timeout;

    fn event() -> KEvent {
        let ev = KEvent::new();
        ev.init().unwrap();
        ev
    }

    #[test]
    fn test_post_ors_set_overwrites() {
        let ev = event();
        ev.post(0b01);
        ev.post(0b10);
        assert_eq!(ev.test(u32::MAX), 0b11);

        let prev = ev.set(0b10);
        assert_eq!(prev, 0b11);
        assert_eq!(ev.test(u32::MAX), 0b10);
    }

    #[test]
    fn test_clear_returns_previous() {
        let ev = event();
        ev.post(0b111);
        assert_eq!(ev.clear(0b010), 0b111);
        assert_eq!(ev.test(u32::MAX), 0b101);
    }

    #[test]
    fn test_wait_any_with_reset() {
        let ev = event();
        ev.post(0b100);
        assert_eq!(ev.wait(0b110, true, Timeout::NoWait), 0b100);
        assert_eq!(ev.test(u32::MAX), 0);
    }

    #[test]
    fn test_wait_without_reset_keeps_bits() {
        let ev = event();
        ev.post(0b1);
        assert_eq!(ev.wait(0b1, false, Timeout::NoWait), 0b1);
        assert_eq!(ev.test(0b1), 0b1);
    }

    #[test]
    fn test_wait_times_out() {
        let ev = event();
        assert_eq!(ev.wait(0b1, false, Timeout::msec(20)), 0);
    }

    #[test]
    fn test_wait_all() {
        let ev = Arc::new(event());
        ev.post(0b01);
        assert_eq!(ev.wait_all(0b11, false, Timeout::NoWait), 0);

        let poster = ev.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            poster.post(0b10);
        });
        assert_eq!(ev.wait_all(0b11, true, Timeout::msec(2000)), 0b11);
        assert_eq!(ev.test(u32::MAX), 0);
        handle.join().unwrap();
    }

    #[test]
    fn test_uninitialized() {
        let ev = KEvent::new();
        assert_eq!(ev.post(1), 0);
        assert_eq!(ev.test(u32::MAX), 0);
        assert_eq!(ev.wait(1, false, Timeout::NoWait), 0);
    }
}

#[cfg(test)]
mod timer_tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;
    use wm_kernel::time::KTimer;

    #[test]
    fn test_fires_once() {
        let fired = Arc::new(AtomicU32::new(0));
        let (tx, rx) = mpsc::channel();
        let timer = KTimer::new();
        let count = fired.clone();
        timer
            .init(move || {
                count.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            })
            .unwrap();
        assert!(!timer.is_active());

        timer.start(20);
        assert_eq!(timer.period(), 20);
        assert!(timer.is_active());
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_active());
        assert_eq!(timer.remaining_ticks(), 0);
        timer.deinit();
    }

    #[test]
    fn test_stop_prevents_expiry() {
        let (tx, rx) = mpsc::channel();
        let timer = KTimer::new();
        timer.init(move || { let _ = tx.send(()); }).unwrap();
        timer.start(50);
        assert!(timer.remaining_ticks() > 0);
        assert!(timer.remaining_get() <= 50);
        timer.stop();
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
        timer.deinit();
    }

    #[test]
    fn test_restart_moves_expiry() {
        let (tx, rx) = mpsc::channel();
        let timer = KTimer::new();
        timer.init(move || { let _ = tx.send(()); }).unwrap();
        timer.start(60);
        thread::sleep(Duration::from_millis(20));
        timer.start(60);
        assert!(rx.recv_timeout(Duration::from_millis(40)).is_err());
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        timer.deinit();
    }

    #[test]
    fn test_uninitialized() {
        let timer = KTimer::new();
        timer.start(10);
        timer.stop();
        assert_eq!(timer.remaining_ticks(), 0);
        assert!(!timer.is_active());
    }
}

#[cfg(test)]
mod thread_tests {
    use std::sync::mpsc;
    use std::time::Duration;
    use wm_kernel::thread::{self, KThread};
    use wm_kernel::Timeout;

    #[test]
    fn test_create_runs_entry() {
        let (tx, rx) = mpsc::channel();
        let th = KThread::new();
        let tid = th
            .create(1024, move || tx.send(thread::current_get()).unwrap(), 5, Timeout::NoWait)
            .unwrap();
        assert_eq!(th.tid(), Some(tid));
        assert_eq!(th.name().as_deref(), Some("bth-1024"));
        let ran_as = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(ran_as, tid);
        assert_ne!(ran_as, thread::current_get());
    }

    #[test]
    fn test_forever_delay_waits_for_start() {
        let (tx, rx) = mpsc::channel();
        let th = KThread::new();
        th.create(1024, move || tx.send(()).unwrap(), 5, Timeout::Forever).unwrap();
        assert!(th.is_suspended());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        th.start();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_name_set() {
        let th = KThread::new();
        th.create(512, || {}, 5, Timeout::NoWait).unwrap();
        th.name_set("worker").unwrap();
        assert_eq!(th.name().as_deref(), Some("worker"));
    }

    #[test]
    fn test_operations_on_empty_thread() {
        let th = KThread::new();
        assert!(th.name_set("x").is_err());
        th.suspend();
        th.resume();
        th.start();
        th.delete();
        assert_eq!(th.tid(), None);
    }

    #[test]
    fn test_not_in_isr() {
        assert!(!thread::is_in_isr());
        thread::sched_lock();
        thread::sched_unlock();
    }
}
