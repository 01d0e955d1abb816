//! Worker and multi-threaded worker context semantics.
//!
//! Worker contexts serialize: one task at a time, in submission order, on
//! whatever pool thread is free. Multi-threaded worker contexts drop both
//! guarantees and just inject into the pool.

mod common;

use carousel::{test_complete, test_phase};
use common::{test_scheduler, SHUTDOWN_TIMEOUT};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn worker_context_runs_tasks_in_order_without_overlap() {
    test_phase!("worker_context_runs_tasks_in_order_without_overlap");
    let scheduler = test_scheduler(1, 4);
    let context = scheduler.worker_context();

    let concurrent = Arc::new(AtomicUsize::new(0));
    let max_concurrent = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let concurrent = Arc::clone(&concurrent);
            let max_concurrent = Arc::clone(&max_concurrent);
            let order = Arc::clone(&order);
            context
                .run_on_context(move || {
                    let in_flight = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(in_flight, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    order.lock().unwrap().push(i);
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
                .expect("submission accepted")
        })
        .collect();
    for handle in handles {
        assert!(handle.wait_timeout(Duration::from_secs(10)));
    }

    assert_eq!(
        max_concurrent.load(Ordering::SeqCst),
        1,
        "worker context tasks must never overlap"
    );
    assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());

    assert!(scheduler.shutdown_and_wait(SHUTDOWN_TIMEOUT));
    test_complete!("worker_context_runs_tasks_in_order_without_overlap");
}

#[test]
fn worker_context_may_hop_threads_between_tasks() {
    test_phase!("worker_context_may_hop_threads_between_tasks");
    let scheduler = test_scheduler(1, 4);
    let context = scheduler.worker_context();

    // No pinning claim to verify positively (hopping is permitted, not
    // required); what must hold is that every task runs on a pool thread.
    let names = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let names = Arc::clone(&names);
            context
                .run_on_context(move || {
                    names
                        .lock()
                        .unwrap()
                        .push(thread::current().name().map(String::from));
                })
                .expect("submission accepted")
        })
        .collect();
    for handle in handles {
        assert!(handle.wait_timeout(Duration::from_secs(5)));
    }

    let names = names.lock().unwrap();
    assert_eq!(names.len(), 8);
    for name in names.iter() {
        let name = name.as_deref().unwrap_or("<unnamed>");
        assert!(
            name.starts_with("test-worker-"),
            "ran on {name}, expected a worker pool thread"
        );
    }

    assert!(scheduler.shutdown_and_wait(SHUTDOWN_TIMEOUT));
    test_complete!("worker_context_may_hop_threads_between_tasks");
}

#[test]
fn multi_threaded_worker_context_overlaps_tasks() {
    test_phase!("multi_threaded_worker_context_overlaps_tasks");
    let scheduler = test_scheduler(1, 4);
    let context = scheduler.multi_threaded_worker_context();

    // Three tasks must be in flight simultaneously to pass the barrier; a
    // serializing context would never get there.
    let barrier = Arc::new(Barrier::new(3));
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            context
                .run_on_context(move || {
                    barrier.wait();
                })
                .expect("submission accepted")
        })
        .collect();

    for handle in handles {
        assert!(
            handle.wait_timeout(Duration::from_secs(5)),
            "multi-threaded worker tasks should run concurrently"
        );
    }

    assert!(scheduler.shutdown_and_wait(SHUTDOWN_TIMEOUT));
    test_complete!("multi_threaded_worker_context_overlaps_tasks");
}

#[test]
fn worker_context_survives_panicking_and_cancelled_tasks() {
    test_phase!("worker_context_survives_panicking_and_cancelled_tasks");
    let scheduler = test_scheduler(1, 2);
    let context = scheduler.worker_context();
    let order = Arc::new(Mutex::new(Vec::new()));

    let first_order = Arc::clone(&order);
    let first = context
        .run_on_context(move || first_order.lock().unwrap().push("first"))
        .expect("submission accepted");
    let panicker = context
        .run_on_context(|| panic!("boom"))
        .expect("submission accepted");
    let victim_order = Arc::clone(&order);
    let victim = context
        .run_on_context(move || victim_order.lock().unwrap().push("victim"))
        .expect("submission accepted");
    victim.cancel();
    let last_order = Arc::clone(&order);
    let last = context
        .run_on_context(move || last_order.lock().unwrap().push("last"))
        .expect("submission accepted");

    for handle in [&first, &panicker, &victim, &last] {
        assert!(handle.wait_timeout(Duration::from_secs(5)));
    }
    assert_eq!(*order.lock().unwrap(), vec!["first", "last"]);

    assert!(scheduler.shutdown_and_wait(SHUTDOWN_TIMEOUT));
    test_complete!("worker_context_survives_panicking_and_cancelled_tasks");
}

/// Shutdown initiated mid-chain: tasks accepted before it still run, in
/// order, and the context rejects new work afterwards instead of silently
/// dropping it.
#[test]
fn worker_context_tasks_accepted_before_shutdown_run_during_drain() {
    test_phase!("worker_context_tasks_accepted_before_shutdown_run_during_drain");
    let scheduler = test_scheduler(1, 2);
    let context = scheduler.worker_context();
    let order = Arc::new(Mutex::new(Vec::new()));

    // Gate the first task so the rest of the chain is still queued when
    // shutdown begins.
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
    let gate = context
        .run_on_context(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .expect("submission accepted");
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("gate task started");

    let second_order = Arc::clone(&order);
    let second = context
        .run_on_context(move || second_order.lock().unwrap().push("second"))
        .expect("submission accepted");
    let third_order = Arc::clone(&order);
    let third = context
        .run_on_context(move || third_order.lock().unwrap().push("third"))
        .expect("submission accepted");

    let waiter = {
        let scheduler = scheduler.clone();
        thread::spawn(move || scheduler.shutdown_and_wait(SHUTDOWN_TIMEOUT))
    };
    thread::sleep(Duration::from_millis(20));
    release_tx.send(()).expect("gate task alive");

    assert!(waiter.join().expect("shutdown thread panicked"));
    for handle in [&gate, &second, &third] {
        assert!(handle.wait_timeout(Duration::from_secs(5)));
    }
    assert_eq!(
        *order.lock().unwrap(),
        vec!["second", "third"],
        "queued chain tasks must execute, not just report completion"
    );

    // The stopped context fails loudly on new work.
    assert!(matches!(
        context.run_on_context(|| {}),
        Err(carousel::ScheduleError::SchedulerStopped)
    ));
    test_complete!("worker_context_tasks_accepted_before_shutdown_run_during_drain");
}

/// Distinct worker contexts do not serialize against each other.
#[test]
fn separate_worker_contexts_run_concurrently() {
    test_phase!("separate_worker_contexts_run_concurrently");
    let scheduler = test_scheduler(1, 4);
    let context_a = scheduler.worker_context();
    let context_b = scheduler.worker_context();
    assert_ne!(context_a.id(), context_b.id());

    let barrier = Arc::new(Barrier::new(2));
    let barrier_a = Arc::clone(&barrier);
    let a = context_a
        .run_on_context(move || {
            barrier_a.wait();
        })
        .expect("submission accepted");
    let barrier_b = Arc::clone(&barrier);
    let b = context_b
        .run_on_context(move || {
            barrier_b.wait();
        })
        .expect("submission accepted");

    assert!(a.wait_timeout(Duration::from_secs(5)));
    assert!(b.wait_timeout(Duration::from_secs(5)));

    assert!(scheduler.shutdown_and_wait(SHUTDOWN_TIMEOUT));
    test_complete!("separate_worker_contexts_run_concurrently");
}

/// Worker tasks see their context as current while running.
#[test]
fn worker_task_observes_its_context_as_current() {
    test_phase!("worker_task_observes_its_context_as_current");
    let scheduler = test_scheduler(1, 2);
    let context = scheduler.worker_context();

    let observed = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&observed);
    let probe = scheduler.clone();
    let handle = context
        .run_on_context(move || {
            *sink.lock().unwrap() = probe.current_context().map(|c| c.id());
        })
        .expect("submission accepted");

    assert!(handle.wait_timeout(Duration::from_secs(5)));
    assert_eq!(*observed.lock().unwrap(), Some(context.id()));

    assert!(scheduler.shutdown_and_wait(SHUTDOWN_TIMEOUT));
    test_complete!("worker_task_observes_its_context_as_current");
}
