//! Event Bus Tests
//!
//! Covers registration, per-thread suppression and delivery ordering of the
//! `EventBus` across inline and affinity dispatchers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;
use uuid::Uuid;

use dirstudio_events::{
    AffinityDispatcher, ConnectionEventKind, DirectoryEvent, EventBus, EventCategory,
    EventEnvelope, EventListener, InlineDispatcher,
};

// =============================================================================
// Manual Listener Implementations
// =============================================================================

/// Counts invocations and remembers the DNs it saw, in order.
#[derive(Default)]
struct RecordingListener {
    calls: AtomicUsize,
    dns: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn dns(&self) -> Vec<String> {
        self.dns.lock().clone()
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, envelope: &EventEnvelope) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let DirectoryEvent::EntryAdded { dn, .. } | DirectoryEvent::EntryDeleted { dn, .. } =
            &envelope.event
        {
            self.dns.lock().push(dn.clone());
        }
    }
}

fn added(dn: &str) -> DirectoryEvent {
    DirectoryEvent::EntryAdded {
        connection_id: Uuid::nil(),
        dn: dn.to_string(),
    }
}

fn as_listener(listener: &Arc<RecordingListener>) -> Arc<dyn EventListener> {
    listener.clone()
}

// =============================================================================
// Registration
// =============================================================================

#[test]
fn test_register_then_unregister_yields_no_delivery() {
    let bus = EventBus::new();
    let recorder = Arc::new(RecordingListener::default());
    let listener = as_listener(&recorder);

    bus.register(EventCategory::EntryAdded, listener.clone(), InlineDispatcher::shared());
    assert!(bus.unregister(EventCategory::EntryAdded, &listener));

    assert_eq!(bus.fire(added("cn=a,dc=test")), 0);
    assert_eq!(recorder.calls(), 0);
}

#[test]
fn test_every_registered_listener_receives_event() {
    let bus = EventBus::new();
    let first = Arc::new(RecordingListener::default());
    let second = Arc::new(RecordingListener::default());
    bus.register(EventCategory::EntryAdded, as_listener(&first), InlineDispatcher::shared());
    bus.register(EventCategory::EntryAdded, as_listener(&second), InlineDispatcher::shared());

    assert_eq!(bus.fire(added("cn=a,dc=test")), 2);
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);
}

#[test]
fn test_all_listeners_share_one_envelope() {
    let bus = EventBus::new();
    let ids = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..3 {
        let sink = ids.clone();
        let listener: Arc<dyn EventListener> =
            Arc::new(move |e: &EventEnvelope| sink.lock().push(e.event_id));
        bus.register(EventCategory::ConnectionUpdated, listener, InlineDispatcher::shared());
    }

    bus.fire(DirectoryEvent::ConnectionUpdated {
        connection_id: Uuid::nil(),
        kind: ConnectionEventKind::Opened,
    });

    let ids = ids.lock();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|id| *id == ids[0]));
}

// =============================================================================
// Suppression
// =============================================================================

#[test]
fn test_suppressed_thread_delivers_nothing() {
    let bus = EventBus::new();
    let recorder = Arc::new(RecordingListener::default());
    bus.register(EventCategory::EntryAdded, as_listener(&recorder), InlineDispatcher::shared());

    bus.suspend_in_current_thread();
    assert_eq!(bus.fire(added("cn=a,dc=test")), 0);
    assert_eq!(recorder.calls(), 0);

    bus.resume_in_current_thread();
    assert_eq!(bus.fire(added("cn=b,dc=test")), 1);
    assert_eq!(recorder.dns(), vec!["cn=b,dc=test".to_string()]);
}

#[test]
fn test_suppression_does_not_leak_to_other_threads() {
    let bus = Arc::new(EventBus::new());
    let recorder = Arc::new(RecordingListener::default());
    bus.register(EventCategory::EntryAdded, as_listener(&recorder), InlineDispatcher::shared());

    let _guard = bus.suspended();
    assert_eq!(bus.fire(added("cn=muted,dc=test")), 0);

    let other = bus.clone();
    let delivered = thread::spawn(move || {
        assert!(!other.is_suspended_in_current_thread());
        other.fire(added("cn=loud,dc=test"))
    })
    .join()
    .unwrap();

    assert_eq!(delivered, 1);
    assert_eq!(recorder.dns(), vec!["cn=loud,dc=test".to_string()]);
}

#[test]
fn test_guard_resumes_on_drop() {
    let bus = EventBus::new();
    let recorder = Arc::new(RecordingListener::default());
    bus.register(EventCategory::EntryAdded, as_listener(&recorder), InlineDispatcher::shared());

    {
        let _guard = bus.suspended();
        bus.fire(added("cn=a,dc=test"));
    }
    bus.fire(added("cn=b,dc=test"));

    assert_eq!(recorder.calls(), 1);
}

#[test]
fn test_exited_threads_leave_no_suppression_behind_with_guard() {
    let bus = Arc::new(EventBus::new());

    let scoped = bus.clone();
    thread::spawn(move || {
        let _guard = scoped.suspended();
        assert_eq!(scoped.suspended_thread_count(), 1);
    })
    .join()
    .unwrap();
    assert_eq!(bus.suspended_thread_count(), 0);

    // A bare toggle outlives its thread until the bus is cleared.
    let toggled = bus.clone();
    thread::spawn(move || toggled.suspend_in_current_thread())
        .join()
        .unwrap();
    assert_eq!(bus.suspended_thread_count(), 1);
    bus.clear();
    assert_eq!(bus.suspended_thread_count(), 0);
}

// =============================================================================
// Delivery ordering and affinity
// =============================================================================

#[test]
fn test_affinity_preserves_fire_order_per_listener() {
    let bus = EventBus::new();
    let (dispatcher, handle) = AffinityDispatcher::spawn_thread("affinity-order").unwrap();
    let recorder = Arc::new(RecordingListener::default());
    bus.register(EventCategory::EntryAdded, as_listener(&recorder), Arc::new(dispatcher));

    for i in 0..50 {
        bus.fire(added(&format!("cn={i},dc=test")));
    }
    bus.clear();

    assert_eq!(handle.join().unwrap(), 50);
    let expected: Vec<String> = (0..50).map(|i| format!("cn={i},dc=test")).collect();
    assert_eq!(recorder.dns(), expected);
}

#[test]
fn test_concurrent_fires_never_overlap_on_a_listener() {
    struct OverlapDetector {
        active: AtomicUsize,
        overlaps: AtomicUsize,
        calls: AtomicUsize,
    }

    impl EventListener for OverlapDetector {
        fn on_event(&self, _envelope: &EventEnvelope) {
            if self.active.fetch_add(1, Ordering::SeqCst) != 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::yield_now();
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    let bus = Arc::new(EventBus::new());
    let detector = Arc::new(OverlapDetector {
        active: AtomicUsize::new(0),
        overlaps: AtomicUsize::new(0),
        calls: AtomicUsize::new(0),
    });
    bus.register(EventCategory::EntryAdded, detector.clone(), InlineDispatcher::shared());

    let barrier = Arc::new(Barrier::new(4));
    let workers: Vec<_> = (0..4)
        .map(|w| {
            let bus = bus.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..100 {
                    bus.fire(added(&format!("cn={w}-{i},dc=test")));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(detector.calls.load(Ordering::SeqCst), 400);
    assert_eq!(detector.overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_register_while_firing_from_other_threads() {
    let bus = Arc::new(EventBus::new());
    let firing = {
        let bus = bus.clone();
        thread::spawn(move || {
            for i in 0..200 {
                bus.fire(added(&format!("cn={i},dc=test")));
            }
        })
    };

    let mut listeners = Vec::new();
    for _ in 0..50 {
        let recorder = Arc::new(RecordingListener::default());
        bus.register(EventCategory::EntryAdded, as_listener(&recorder), InlineDispatcher::shared());
        listeners.push(recorder);
    }
    firing.join().unwrap();

    assert_eq!(bus.listener_count(EventCategory::EntryAdded), 50);
    for recorder in &listeners {
        let listener = as_listener(recorder);
        assert!(bus.unregister(EventCategory::EntryAdded, &listener));
    }
    assert_eq!(bus.listener_count(EventCategory::EntryAdded), 0);
}
