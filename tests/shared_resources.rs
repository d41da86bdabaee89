//! Integration tests for the process-wide shared resource cache.
//!
//! These exercise the cache through application-defined resource kinds, the
//! same way the bus connection and message pump are cached.

use serial_test::serial;
use session_lock_events::shared::{self, ResourceKind, SharedResource};
use session_lock_events::{CacheEvent, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

static CONNECTIONS_OPENED: AtomicUsize = AtomicUsize::new(0);

/// Stand-in for a side-effecting native connection.
#[derive(Debug)]
struct FakeConnection {
    sent: Mutex<Vec<String>>,
}

impl SharedResource for FakeConnection {
    type Options = Duration;

    fn create(_kind: &ResourceKind, open_delay: &Duration) -> Result<Self> {
        CONNECTIONS_OPENED.fetch_add(1, Ordering::SeqCst);
        // Widen the race window for concurrent callers.
        thread::sleep(*open_delay);
        Ok(FakeConnection {
            sent: Mutex::new(Vec::new()),
        })
    }
}

fn collect_events() -> Arc<Mutex<Vec<CacheEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    shared::set_trace_callback(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

#[test]
#[serial]
fn test_concurrent_callers_share_one_instance() {
    shared::reset();
    CONNECTIONS_OPENED.store(0, Ordering::SeqCst);
    let events = collect_events();

    let kind = ResourceKind::Named("fake-connection");
    let barrier = Arc::new(Barrier::new(8));
    let workers: Vec<_> = (0..8)
        .map(|n| {
            let barrier = barrier.clone();
            let kind = kind.clone();
            thread::spawn(move || {
                barrier.wait();
                let connection: Arc<FakeConnection> =
                    shared::get_or_create(kind, &Duration::from_millis(20), false).unwrap();
                connection.sent.lock().unwrap().push(format!("worker-{n}"));
                connection
            })
        })
        .collect();

    let handles: Vec<Arc<FakeConnection>> = workers
        .into_iter()
        .map(|worker| worker.join().unwrap())
        .collect();
    shared::clear_trace_callback();

    assert_eq!(CONNECTIONS_OPENED.load(Ordering::SeqCst), 1);
    for handle in &handles {
        assert!(Arc::ptr_eq(handle, &handles[0]));
    }
    assert_eq!(handles[0].sent.lock().unwrap().len(), 8);

    let events = events.lock().unwrap();
    let created = events
        .iter()
        .filter(|event| matches!(event, CacheEvent::Created { .. }))
        .count();
    let reused = events
        .iter()
        .filter(|event| matches!(event, CacheEvent::Reused { .. }))
        .count();
    assert_eq!(created, 1);
    assert_eq!(reused, 7);
}

#[test]
#[serial]
fn test_instance_recreated_after_last_owner_leaves() {
    shared::reset();
    CONNECTIONS_OPENED.store(0, Ordering::SeqCst);

    let kind = ResourceKind::Named("short-lived");
    let first: Arc<FakeConnection> =
        shared::get_or_create(kind.clone(), &Duration::ZERO, false).unwrap();
    let second: Arc<FakeConnection> =
        shared::get_or_create(kind.clone(), &Duration::ZERO, false).unwrap();
    assert_eq!(CONNECTIONS_OPENED.load(Ordering::SeqCst), 1);

    drop(first);
    assert!(shared::is_live(&kind));
    drop(second);
    assert!(!shared::is_live(&kind));

    let _third: Arc<FakeConnection> =
        shared::get_or_create(kind, &Duration::ZERO, false).unwrap();
    assert_eq!(CONNECTIONS_OPENED.load(Ordering::SeqCst), 2);
}

#[test]
#[serial]
fn test_kinds_are_isolated() {
    shared::reset();

    let a: Arc<FakeConnection> =
        shared::get_or_create(ResourceKind::Named("left"), &Duration::ZERO, false).unwrap();
    let b: Arc<FakeConnection> =
        shared::get_or_create(ResourceKind::Named("right"), &Duration::ZERO, false).unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
}

#[test]
#[serial]
fn test_reset_event_is_traced() {
    let events = collect_events();
    shared::reset();
    shared::clear_trace_callback();

    assert_eq!(*events.lock().unwrap(), vec![CacheEvent::Reset]);
}
