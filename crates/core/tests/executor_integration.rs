// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Integration tests for the locked-job executor

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use zklock_core::{
    Acl, CoordinationAdapter, DistributedLock, ExecutorError, FakeCoordination, LockExecutor,
    LockJob, LockRegistry,
};

fn make_registry(fake: &FakeCoordination) -> Arc<LockRegistry> {
    Arc::new(LockRegistry::new(
        Arc::new(fake.clone()) as Arc<dyn CoordinationAdapter>,
        "/locks",
        Acl::open_unsafe(),
    ))
}

#[test]
fn contended_job_times_out_without_side_effects() {
    let fake = FakeCoordination::new();
    let registry = make_registry(&fake);
    let executor = LockExecutor::new(Arc::clone(&registry));

    // Another thread of this process holds the lock for the whole test.
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let holder_registry = Arc::clone(&registry);
    let holder = thread::spawn(move || {
        let lock = holder_registry.standard("orders").unwrap();
        lock.lock().unwrap();
        held_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        lock.unlock().unwrap();
    });
    held_rx.recv().unwrap();

    let ran = AtomicBool::new(false);
    let job = LockJob::new("orders", Duration::from_secs(1));
    let start = Instant::now();
    let result = executor.execute_with_lock(&job, || {
        ran.store(true, Ordering::SeqCst);
        Ok(())
    });
    let elapsed = start.elapsed();

    match result.unwrap_err() {
        ExecutorError::Timeout { name, waited } => {
            assert_eq!(name, "orders");
            assert_eq!(waited, Duration::from_secs(1));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(elapsed >= Duration::from_secs(1), "gave up after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "gave up after {elapsed:?}");
    assert!(!ran.load(Ordering::SeqCst), "job body ran despite the timeout");

    release_tx.send(()).unwrap();
    holder.join().unwrap();
}

#[test]
fn owning_thread_reenters_through_the_executor() {
    let fake = FakeCoordination::new();
    let registry = make_registry(&fake);
    let executor = LockExecutor::new(Arc::clone(&registry));

    let lock = registry.standard("orders").unwrap();
    lock.lock().unwrap();

    // Same thread, same cached instance: the executor reenters instead of
    // waiting on itself.
    let job = LockJob::new("orders", Duration::from_millis(100));
    let result = executor.execute_with_lock(&job, || Ok("done")).unwrap();
    assert_eq!(result, "done");

    // The outer hold survives the executor's release.
    assert!(lock.is_held_by_current_thread());
    lock.unlock().unwrap();
    assert!(fake.children_of("/locks/orders").is_empty());
}

#[test]
fn work_runs_while_the_lock_is_visibly_held() {
    let fake = FakeCoordination::new();
    let registry = make_registry(&fake);
    let executor = LockExecutor::new(registry);

    let observer = DistributedLock::new(
        "/locks/orders",
        Arc::new(fake.clone()) as Arc<dyn CoordinationAdapter>,
        Acl::open_unsafe(),
    )
    .unwrap();

    let job = LockJob::new("orders", Duration::from_secs(5));
    executor
        .execute_with_lock(&job, || {
            // A separate instance (another "process") cannot get in.
            assert!(!observer.try_lock().unwrap());
            Ok(())
        })
        .unwrap();

    // And can once the job is over.
    assert!(observer.try_lock().unwrap());
    observer.unlock().unwrap();
}

#[test]
fn jobs_queue_behind_each_other_across_threads() {
    let fake = FakeCoordination::new();
    let registry = make_registry(&fake);
    let counter = Arc::new(std::sync::Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..3)
        .map(|worker| {
            let registry = Arc::clone(&registry);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                let executor = LockExecutor::new(registry);
                let job = LockJob::new("orders", Duration::from_secs(10));
                executor
                    .execute_with_lock(&job, || {
                        counter.lock().unwrap().push(worker);
                        Ok(())
                    })
                    .unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let seen = counter.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(fake.children_of("/locks/orders").is_empty());
}
