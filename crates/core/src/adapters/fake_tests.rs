use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

fn acl() -> Vec<Acl> {
    Acl::open_unsafe()
}

fn recording_watcher() -> (Watcher, Arc<Mutex<Vec<WatchedEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let watcher: Watcher = Arc::new(move |event: &WatchedEvent| {
        sink.lock().unwrap().push(event.clone());
    });
    (watcher, events)
}

#[test]
fn create_requires_parent() {
    let fake = FakeCoordination::new();
    let err = fake
        .create("/a/b", &[], &acl(), CreateMode::Persistent)
        .unwrap_err();
    assert!(matches!(err, CoordinationError::NoNode(_)));
}

#[test]
fn create_rejects_duplicates() {
    let fake = FakeCoordination::new();
    fake.create("/a", &[], &acl(), CreateMode::Persistent)
        .unwrap();
    let err = fake
        .create("/a", &[], &acl(), CreateMode::Persistent)
        .unwrap_err();
    assert!(matches!(err, CoordinationError::NodeExists(_)));
}

#[test]
fn sequential_create_appends_padded_counter() {
    let fake = FakeCoordination::new();
    fake.create("/q", &[], &acl(), CreateMode::Persistent)
        .unwrap();

    let first = fake
        .create("/q/item-", &[], &acl(), CreateMode::EphemeralSequential)
        .unwrap();
    let second = fake
        .create("/q/item-", &[], &acl(), CreateMode::EphemeralSequential)
        .unwrap();

    assert_eq!(first, "/q/item-0000000000");
    assert_eq!(second, "/q/item-0000000001");
}

#[test]
fn sequence_counters_survive_deletion() {
    let fake = FakeCoordination::new();
    fake.create("/q", &[], &acl(), CreateMode::Persistent)
        .unwrap();
    let first = fake
        .create("/q/item-", &[], &acl(), CreateMode::EphemeralSequential)
        .unwrap();
    fake.delete(&first, -1).unwrap();

    let second = fake
        .create("/q/item-", &[], &acl(), CreateMode::EphemeralSequential)
        .unwrap();
    assert_eq!(second, "/q/item-0000000001");
}

#[test]
fn delete_refuses_nonempty_nodes() {
    let fake = FakeCoordination::new();
    fake.create("/a", &[], &acl(), CreateMode::Persistent)
        .unwrap();
    fake.create("/a/b", &[], &acl(), CreateMode::Persistent)
        .unwrap();

    let err = fake.delete("/a", -1).unwrap_err();
    assert!(matches!(err, CoordinationError::NotEmpty(_)));
}

#[test]
fn delete_checks_versions() {
    let fake = FakeCoordination::new();
    fake.create("/a", &[], &acl(), CreateMode::Persistent)
        .unwrap();

    let err = fake.delete("/a", 7).unwrap_err();
    assert!(matches!(err, CoordinationError::BadVersion(_)));
    fake.delete("/a", -1).unwrap();
}

#[test]
fn exists_reports_metadata() {
    let fake = FakeCoordination::new();
    fake.create("/a", &[], &acl(), CreateMode::Persistent)
        .unwrap();
    fake.create("/a/child", &[], &acl(), CreateMode::Ephemeral)
        .unwrap();

    let stat = fake.exists("/a", None).unwrap().unwrap();
    assert_eq!(stat.num_children, 1);
    assert_eq!(stat.ephemeral_owner, 0);

    let child = fake.exists("/a/child", None).unwrap().unwrap();
    assert_ne!(child.ephemeral_owner, 0);

    assert!(fake.exists("/missing", None).unwrap().is_none());
}

#[test]
fn exists_watch_on_absent_path_fires_on_creation() {
    let fake = FakeCoordination::new();
    let (watcher, events) = recording_watcher();

    assert!(fake.exists("/a", Some(watcher)).unwrap().is_none());
    fake.create("/a", &[], &acl(), CreateMode::Persistent)
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Created);
    assert_eq!(events[0].path, "/a");
}

#[test]
fn watches_fire_exactly_once() {
    let fake = FakeCoordination::new();
    fake.create("/a", &[], &acl(), CreateMode::Persistent)
        .unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let watcher: Watcher = Arc::new(move |_event: &WatchedEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    fake.exists("/a", Some(watcher)).unwrap();
    fake.delete("/a", -1).unwrap();
    // The node comes back, but the watch was consumed by the deletion.
    fake.create("/a", &[], &acl(), CreateMode::Persistent)
        .unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn child_watch_fires_on_membership_change() {
    let fake = FakeCoordination::new();
    fake.create("/q", &[], &acl(), CreateMode::Persistent)
        .unwrap();
    let (watcher, events) = recording_watcher();

    fake.get_children("/q", Some(watcher)).unwrap();
    fake.create("/q/a", &[], &acl(), CreateMode::Persistent)
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::ChildrenChanged);
}

#[test]
fn get_children_lists_direct_children_only() {
    let fake = FakeCoordination::new();
    fake.create("/a", &[], &acl(), CreateMode::Persistent)
        .unwrap();
    fake.create("/a/b", &[], &acl(), CreateMode::Persistent)
        .unwrap();
    fake.create("/a/b/c", &[], &acl(), CreateMode::Persistent)
        .unwrap();
    fake.create("/a/d", &[], &acl(), CreateMode::Persistent)
        .unwrap();

    assert_eq!(fake.get_children("/a", None).unwrap(), vec!["b", "d"]);
    assert!(matches!(
        fake.get_children("/missing", None).unwrap_err(),
        CoordinationError::NoNode(_)
    ));
}

#[test]
fn get_data_round_trips() {
    let fake = FakeCoordination::new();
    fake.create("/a", b"10.1.2.3", &acl(), CreateMode::Ephemeral)
        .unwrap();
    assert_eq!(fake.get_data("/a").unwrap(), b"10.1.2.3");
}

struct CountingListener {
    reconnects: AtomicUsize,
    expiries: AtomicUsize,
}

impl CountingListener {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            reconnects: AtomicUsize::new(0),
            expiries: AtomicUsize::new(0),
        })
    }
}

impl SessionListener for CountingListener {
    fn reconnected(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }
    fn expired(&self) {
        self.expiries.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn session_expiry_removes_ephemerals_and_notifies() {
    let fake = FakeCoordination::new();
    fake.create("/a", &[], &acl(), CreateMode::Persistent)
        .unwrap();
    fake.create("/a/eph", &[], &acl(), CreateMode::Ephemeral)
        .unwrap();
    let (watcher, events) = recording_watcher();
    fake.exists("/a/eph", Some(watcher)).unwrap();

    let listener = CountingListener::new();
    fake.add_session_listener(listener.clone());

    fake.expire_session();

    assert!(!fake.node_exists("/a/eph"));
    assert!(fake.node_exists("/a"));
    assert_eq!(listener.expiries.load(Ordering::SeqCst), 1);
    assert_eq!(events.lock().unwrap()[0].kind, EventKind::Deleted);
}

#[test]
fn ephemerals_of_the_new_session_survive_old_expiry() {
    let fake = FakeCoordination::new();
    fake.expire_session();
    fake.create("/eph", &[], &acl(), CreateMode::Ephemeral)
        .unwrap();
    fake.expire_session();
    assert!(!fake.node_exists("/eph"));
}

#[test]
fn removed_listeners_stop_receiving_events() {
    let fake = FakeCoordination::new();
    let listener = CountingListener::new();
    let handle: Arc<dyn SessionListener> = listener.clone();
    fake.add_session_listener(Arc::clone(&handle));

    fake.reconnect();
    fake.remove_session_listener(&handle);
    fake.reconnect();

    assert_eq!(listener.reconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn injected_failures_are_consumed() {
    let fake = FakeCoordination::new();
    fake.fail_next_creates(1);

    assert!(matches!(
        fake.create("/a", &[], &acl(), CreateMode::Persistent),
        Err(CoordinationError::ConnectionLoss)
    ));
    fake.create("/a", &[], &acl(), CreateMode::Persistent)
        .unwrap();
}
