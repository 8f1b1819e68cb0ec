//! Work item, work queue and delayable work tests on the host port

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use wm_kernel::sem::KSem;
use wm_kernel::work::{DelayableWork, Work, WorkQueue, WorkQueueConfig};
use wm_kernel::{KError, Timeout, WorkFlags};

fn start_queue(name: &'static str) -> WorkQueue {
    let q = WorkQueue::new();
    q.init().unwrap();
    q.start(2048, 10, Some(&WorkQueueConfig::named(name))).unwrap();
    q
}

fn sem() -> Arc<KSem> {
    let s = Arc::new(KSem::new());
    s.init(0, u32::MAX).unwrap();
    s
}

/// Poll `cond` until it holds or `limit` passes
fn wait_for(limit: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Work item that parks the worker until `release` is given
fn blocker(started: Arc<KSem>, release: Arc<KSem>) -> Work {
    Work::new(move |_: &Work| {
        started.give();
        let _ = release.take(Timeout::Forever);
    })
}

fn counter_work(count: Arc<AtomicU32>) -> Work {
    Work::new(move |_: &Work| {
        count.fetch_add(1, Ordering::SeqCst);
    })
}

#[cfg(test)]
mod work_tests {
    use super::*;

    #[test]
    fn test_submit_runs_handler_then_idle() {
        let q = start_queue("wq_basic");
        let done = sem();
        let signal = done.clone();
        let work = Work::new(move |_: &Work| signal.give());

        q.submit(&work).unwrap();
        assert_eq!(done.take(Timeout::msec(2000)), Ok(()));
        assert!(wait_for(Duration::from_secs(2), || work.busy_get().is_empty()));
        assert!(!work.is_pending());
        q.deinit();
    }

    #[test]
    fn test_double_submit_rejected() {
        let q = start_queue("wq_double");
        let (started, release) = (sem(), sem());
        let gate = blocker(started.clone(), release.clone());
        q.submit(&gate).unwrap();
        started.take(Timeout::msec(2000)).unwrap();

        let count = Arc::new(AtomicU32::new(0));
        let work = counter_work(count.clone());
        assert_eq!(q.submit(&work), Ok(()));
        assert_eq!(q.submit(&work), Err(KError::Perm));
        assert!(work.busy_get().contains(WorkFlags::QUEUED));

        release.give();
        assert!(wait_for(Duration::from_secs(2), || !work.is_pending()));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        q.deinit();
    }

    #[test]
    fn test_resubmit_after_run() {
        let q = start_queue("wq_again");
        let count = Arc::new(AtomicU32::new(0));
        let work = counter_work(count.clone());

        q.submit(&work).unwrap();
        assert!(wait_for(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));
        assert!(wait_for(Duration::from_secs(2), || !work.is_pending()));
        q.submit(&work).unwrap();
        assert!(wait_for(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 2));
        q.deinit();
    }

    #[test]
    fn test_fifo_execution_order() {
        let q = start_queue("wq_order");
        let (started, release) = (sem(), sem());
        let gate = blocker(started.clone(), release.clone());
        q.submit(&gate).unwrap();
        started.take(Timeout::msec(2000)).unwrap();

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let items: Vec<Work> = (0..3)
            .map(|i| {
                let order = order.clone();
                Work::new(move |_: &Work| order.lock().unwrap().push(i))
            })
            .collect();
        for w in &items {
            q.submit(w).unwrap();
        }
        release.give();

        assert!(wait_for(Duration::from_secs(2), || order.lock().unwrap().len() == 3));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        q.deinit();
    }

    #[test]
    fn test_cancel_queued_work() {
        let q = start_queue("wq_cancel");
        let (started, release) = (sem(), sem());
        let gate = blocker(started.clone(), release.clone());
        q.submit(&gate).unwrap();
        started.take(Timeout::msec(2000)).unwrap();

        let count = Arc::new(AtomicU32::new(0));
        let work = counter_work(count.clone());
        q.submit(&work).unwrap();
        assert!(work.cancel().is_empty());
        assert!(!work.is_pending());

        release.give();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        q.deinit();
    }

    #[test]
    fn test_cancel_running_work_reports_running() {
        let q = start_queue("wq_running");
        let (started, release) = (sem(), sem());
        let gate = blocker(started.clone(), release.clone());
        q.submit(&gate).unwrap();
        started.take(Timeout::msec(2000)).unwrap();

        assert_eq!(gate.cancel(), WorkFlags::RUNNING);
        release.give();
        assert!(wait_for(Duration::from_secs(2), || gate.busy_get().is_empty()));
        q.deinit();
    }

    #[test]
    fn test_submit_to_full_queue() {
        let q = start_queue("wq_full");
        let (started, release) = (sem(), sem());
        let gate = blocker(started.clone(), release.clone());
        q.submit(&gate).unwrap();
        started.take(Timeout::msec(2000)).unwrap();

        let count = Arc::new(AtomicU32::new(0));
        let items: Vec<Work> = (0..wm_kernel::CFG_QUEUE_DEFAULT_DEPTH)
            .map(|_| counter_work(count.clone()))
            .collect();
        for w in &items {
            q.submit(w).unwrap();
        }
        let extra = counter_work(count.clone());
        assert_eq!(q.submit(&extra), Err(KError::Again));
        assert!(!extra.is_pending());

        release.give();
        let expected = wm_kernel::CFG_QUEUE_DEFAULT_DEPTH as u32;
        assert!(wait_for(Duration::from_secs(2), || count.load(Ordering::SeqCst) == expected));
        q.deinit();
    }

    #[test]
    fn test_submit_to_uninitialized_queue() {
        let q = WorkQueue::new();
        let work = Work::without_handler();
        assert_eq!(q.submit(&work), Err(KError::Inval));
        assert!(!work.is_pending());
        assert_eq!(q.start(1024, 5, None), Err(KError::Inval));
    }

    #[test]
    fn test_handler_sees_its_work_item() {
        let q = start_queue("wq_self");
        let matched = Arc::new(AtomicBool::new(false));
        let done = sem();

        let work = Work::without_handler();
        let me = work.clone();
        let flag = matched.clone();
        let signal = done.clone();
        work.init(move |w: &Work| {
            flag.store(w.ptr_eq(&me) && w.busy_get().contains(WorkFlags::RUNNING), Ordering::SeqCst);
            signal.give();
        });

        q.submit(&work).unwrap();
        done.take(Timeout::msec(2000)).unwrap();
        assert!(matched.load(Ordering::SeqCst));
        q.deinit();
    }

    #[test]
    fn test_deinit_drops_pending_items() {
        let q = start_queue("wq_deinit");
        let (started, release) = (sem(), sem());
        let gate = blocker(started.clone(), release.clone());
        q.submit(&gate).unwrap();
        started.take(Timeout::msec(2000)).unwrap();

        let count = Arc::new(AtomicU32::new(0));
        let work = counter_work(count.clone());
        q.submit(&work).unwrap();

        let releaser = release.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            releaser.give();
        });
        q.deinit();
        handle.join().unwrap();

        assert!(!q.is_running());
        assert!(!work.is_pending());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(q.submit(&work), Err(KError::Inval));
    }

    #[test]
    fn test_deinit_with_full_queue() {
        let q = start_queue("wq_full_deinit");
        let (started, release) = (sem(), sem());
        let gate = blocker(started.clone(), release.clone());
        q.submit(&gate).unwrap();
        started.take(Timeout::msec(2000)).unwrap();

        let count = Arc::new(AtomicU32::new(0));
        let items: Vec<Work> = (0..wm_kernel::CFG_QUEUE_DEFAULT_DEPTH)
            .map(|_| counter_work(count.clone()))
            .collect();
        for w in &items {
            q.submit(w).unwrap();
        }

        let (tx, rx) = std::sync::mpsc::channel();
        let stopper = q.clone();
        let handle = thread::spawn(move || {
            stopper.deinit();
            tx.send(()).unwrap();
        });
        thread::sleep(Duration::from_millis(20));
        release.give();

        assert!(rx.recv_timeout(Duration::from_secs(3)).is_ok());
        handle.join().unwrap();
        assert!(!q.is_running());
        assert!(items.iter().all(|w| !w.is_pending()));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_deinit_from_own_handler() {
        let q = start_queue("wq_self_stop");
        let done = sem();

        let (inner, signal) = (q.clone(), done.clone());
        let work = Work::new(move |_: &Work| {
            inner.deinit();
            signal.give();
        });
        q.submit(&work).unwrap();
        done.take(Timeout::msec(2000)).unwrap();

        assert!(!q.is_running());
        assert!(wait_for(Duration::from_secs(2), || q.thread_id().is_none()));
        assert_eq!(q.submit(&work), Err(KError::Inval));

        // The queue can be brought up again
        q.init().unwrap();
        q.start(2048, 10, None).unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let again = counter_work(count.clone());
        q.submit(&again).unwrap();
        assert!(wait_for(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));
        q.deinit();
    }
}

#[cfg(test)]
mod delayable_tests {
    use super::*;
    use wm_kernel::thread;

    fn counting_delayable(count: Arc<AtomicU32>) -> DelayableWork {
        DelayableWork::new(move |_: &Work| {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
    }

    #[test]
    fn test_fires_after_delay() {
        let q = start_queue("dwq_fire");
        let count = Arc::new(AtomicU32::new(0));
        let dwork = counting_delayable(count.clone());

        let start = Instant::now();
        q.schedule(&dwork, Timeout::msec(50)).unwrap();
        assert!(dwork.busy_get().contains(WorkFlags::DELAYED));
        assert!(dwork.remaining_get() > 0);
        assert!(dwork.expires_get() > 0);

        assert!(wait_for(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));
        assert!(start.elapsed() >= Duration::from_millis(45));
        assert!(wait_for(Duration::from_secs(2), || !dwork.is_pending()));
        q.deinit();
    }

    #[test]
    fn test_zero_delay_submits_immediately() {
        let q = start_queue("dwq_now");
        let count = Arc::new(AtomicU32::new(0));
        let dwork = counting_delayable(count.clone());

        q.schedule(&dwork, Timeout::NoWait).unwrap();
        assert!(!dwork.busy_get().contains(WorkFlags::DELAYED));
        assert!(wait_for(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));
        q.deinit();
    }

    #[test]
    fn test_schedule_on_second_queue_rejected() {
        let q1 = start_queue("dwq_q1");
        let q2 = start_queue("dwq_q2");
        let ran_on = Arc::new(std::sync::Mutex::new(None));

        let record = ran_on.clone();
        let dwork = DelayableWork::new(move |_: &Work| {
            *record.lock().unwrap() = Some(thread::current_get());
        })
        .unwrap();

        q1.schedule(&dwork, Timeout::msec(80)).unwrap();
        assert_eq!(q2.schedule(&dwork, Timeout::msec(10)), Err(KError::Again));

        assert!(wait_for(Duration::from_secs(2), || ran_on.lock().unwrap().is_some()));
        assert_eq!(*ran_on.lock().unwrap(), q1.thread_id());
        q1.deinit();
        q2.deinit();
    }

    #[test]
    fn test_schedule_same_queue_is_noop() {
        let q = start_queue("dwq_same");
        let count = Arc::new(AtomicU32::new(0));
        let dwork = counting_delayable(count.clone());

        q.schedule(&dwork, Timeout::msec(40)).unwrap();
        assert_eq!(q.schedule(&dwork, Timeout::msec(40)), Ok(()));

        assert!(wait_for(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        q.deinit();
    }

    #[test]
    fn test_reschedule_runs_once_from_last_call() {
        let q = start_queue("dwq_resched");
        let count = Arc::new(AtomicU32::new(0));
        let dwork = counting_delayable(count.clone());

        for _ in 0..4 {
            q.reschedule(&dwork, Timeout::msec(60)).unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }
        let last = Instant::now() - Duration::from_millis(20);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(wait_for(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));
        assert!(last.elapsed() >= Duration::from_millis(55));
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        q.deinit();
    }

    #[test]
    fn test_cancel_before_expiry() {
        let q = start_queue("dwq_cancel");
        let count = Arc::new(AtomicU32::new(0));
        let dwork = counting_delayable(count.clone());

        q.schedule(&dwork, Timeout::msec(100)).unwrap();
        assert!(dwork.cancel().is_empty());
        assert!(!dwork.is_pending());

        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        q.deinit();
    }

    #[test]
    fn test_cancel_sync_waits_for_handler() {
        let q = start_queue("dwq_sync");
        let started = sem();
        let finished = Arc::new(AtomicBool::new(false));

        let (s, f) = (started.clone(), finished.clone());
        let dwork = DelayableWork::new(move |_: &Work| {
            s.give();
            std::thread::sleep(Duration::from_millis(100));
            f.store(true, Ordering::SeqCst);
        })
        .unwrap();

        q.schedule(&dwork, Timeout::NoWait).unwrap();
        started.take(Timeout::msec(2000)).unwrap();
        assert!(dwork.cancel_sync());
        assert!(finished.load(Ordering::SeqCst));
        assert!(dwork.busy_get().is_empty());
        q.deinit();
    }

    #[test]
    fn test_cancel_sync_idle_item() {
        let count = Arc::new(AtomicU32::new(0));
        let dwork = counting_delayable(count);
        assert!(!dwork.cancel_sync());
    }

    #[test]
    fn test_delayable_from_work() {
        let q = start_queue("dwq_from");
        let found = Arc::new(AtomicBool::new(false));
        let done = sem();

        let (flag, signal) = (found.clone(), done.clone());
        let dwork = DelayableWork::new(move |w: &Work| {
            flag.store(w.delayable().is_some(), Ordering::SeqCst);
            signal.give();
        })
        .unwrap();
        assert!(dwork.work().delayable().is_some_and(|d| d.ptr_eq(&dwork)));

        q.schedule(&dwork, Timeout::msec(5)).unwrap();
        done.take(Timeout::msec(2000)).unwrap();
        assert!(found.load(Ordering::SeqCst));
        q.deinit();
    }

    #[test]
    fn test_deinit_discards_pending_delay() {
        let q = start_queue("dwq_deinit");
        let count = Arc::new(AtomicU32::new(0));
        let dwork = counting_delayable(count.clone());

        q.schedule(&dwork, Timeout::msec(50)).unwrap();
        dwork.cancel();
        dwork.deinit();
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        q.deinit();
    }

    #[test]
    fn test_reschedule_around_expiry_runs_once() {
        let q = start_queue("dwq_race");
        let count = Arc::new(AtomicU32::new(0));
        let dwork = counting_delayable(count.clone());

        for i in 0..40u32 {
            // Hold the worker so only the last arm can produce a run
            let (started, release) = (sem(), sem());
            let gate = blocker(started.clone(), release.clone());
            q.submit(&gate).unwrap();
            started.take(Timeout::msec(2000)).unwrap();

            q.reschedule(&dwork, Timeout::ticks(2)).unwrap();
            let spin = Duration::from_micros(1500 + u64::from(i % 10) * 100);
            let start = Instant::now();
            while start.elapsed() < spin {
                std::hint::spin_loop();
            }
            q.reschedule(&dwork, Timeout::msec(20)).unwrap();
            release.give();

            assert!(wait_for(Duration::from_secs(2), || count.load(Ordering::SeqCst) == i + 1));
            std::thread::sleep(Duration::from_millis(30));
            assert_eq!(count.load(Ordering::SeqCst), i + 1, "iteration {}", i);
            assert!(wait_for(Duration::from_secs(2), || !dwork.is_pending()));
        }
        q.deinit();
    }

    #[test]
    fn test_zero_delay_clears_pending_delay() {
        let q1 = start_queue("dwq_zero1");
        let q2 = start_queue("dwq_zero2");
        let ran_on = Arc::new(std::sync::Mutex::new(Vec::new()));

        let record = ran_on.clone();
        let dwork = DelayableWork::new(move |_: &Work| {
            record.lock().unwrap().push(thread::current_get());
        })
        .unwrap();

        q1.schedule(&dwork, Timeout::msec(300)).unwrap();
        q1.schedule(&dwork, Timeout::NoWait).unwrap();
        assert!(!dwork.busy_get().contains(WorkFlags::DELAYED));
        assert!(wait_for(Duration::from_secs(2), || ran_on.lock().unwrap().len() == 1));
        assert!(wait_for(Duration::from_secs(2), || !dwork.is_pending()));

        q2.schedule(&dwork, Timeout::msec(20)).unwrap();
        assert!(dwork.busy_get().contains(WorkFlags::DELAYED));
        assert!(wait_for(Duration::from_secs(2), || ran_on.lock().unwrap().len() == 2));
        assert_eq!(ran_on.lock().unwrap()[1], q2.thread_id().unwrap());

        // The first arm must not fire later
        std::thread::sleep(Duration::from_millis(350));
        assert_eq!(ran_on.lock().unwrap().len(), 2);
        q1.deinit();
        q2.deinit();
    }

    #[test]
    fn test_concurrent_schedule_on_two_queues() {
        let q1 = start_queue("dwq_conc1");
        let q2 = start_queue("dwq_conc2");
        let count = Arc::new(AtomicU32::new(0));
        let dwork = counting_delayable(count);

        for _ in 0..200 {
            let barrier = Arc::new(std::sync::Barrier::new(2));
            let racers: Vec<_> = [q1.clone(), q2.clone()]
                .into_iter()
                .map(|q| {
                    let (barrier, dwork) = (barrier.clone(), dwork.clone());
                    std::thread::spawn(move || {
                        barrier.wait();
                        q.schedule(&dwork, Timeout::msec(500))
                    })
                })
                .collect();
            let results: Vec<_> = racers.into_iter().map(|r| r.join().unwrap()).collect();

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "{:?}", results);
            assert!(results.contains(&Err(KError::Again)));
            dwork.cancel();
        }
        q1.deinit();
        q2.deinit();
    }
}

#[cfg(test)]
mod runtime_tests {
    use super::*;
    use wm_kernel::{Runtime, RuntimeConfig};

    #[test]
    fn test_system_queue_submit() {
        let rt = Runtime::boot(RuntimeConfig::default()).unwrap();
        let done = sem();
        let signal = done.clone();
        let work = Work::new(move |_: &Work| signal.give());

        rt.scheduler().submit(&work).unwrap();
        assert_eq!(done.take(Timeout::msec(2000)), Ok(()));
        assert!(rt.scheduler().sys_work_q().thread_id().is_some());
        rt.shutdown();
    }

    #[test]
    fn test_scheduled_then_canceled_never_runs() {
        let rt = Runtime::boot(RuntimeConfig::default()).unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let dwork = DelayableWork::new(move |_: &Work| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        rt.scheduler().schedule(&dwork, Timeout::msec(100)).unwrap();
        dwork.cancel();
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        rt.shutdown();
    }

    #[test]
    fn test_long_work_queue() {
        let rt = Runtime::boot(RuntimeConfig::default()).unwrap();
        let long_wq = rt.scheduler().long_wq();
        assert_eq!(long_wq.is_dedicated(), cfg!(feature = "dedicated-long-wq"));
        if !long_wq.is_dedicated() {
            assert!(long_wq.queue().ptr_eq(rt.scheduler().sys_work_q()));
        }

        let count = Arc::new(AtomicU32::new(0));
        let work = counter_work(count.clone());
        long_wq.submit(&work).unwrap();

        let c = count.clone();
        let dwork = DelayableWork::new(move |_: &Work| {
            c.fetch_add(10, Ordering::SeqCst);
        })
        .unwrap();
        long_wq.schedule(&dwork, Timeout::msec(20)).unwrap();
        long_wq.reschedule(&dwork, Timeout::msec(20)).unwrap();

        assert!(wait_for(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 11));
        rt.shutdown();
    }

    #[test]
    fn test_kernel_lock_is_recursive() {
        let rt = Runtime::boot(RuntimeConfig::default()).unwrap();
        let sched = rt.scheduler();
        sched.kernel_lock().unwrap();
        sched.kernel_lock().unwrap();
        sched.kernel_unlock().unwrap();
        sched.kernel_unlock().unwrap();
        assert!(sched.kernel_unlock().is_err());
        rt.shutdown();
    }
}
