//! Dispatch tests - one poll iteration at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use syncpoint_bus::transport::{reason, InMemoryQueueManager, QueueMessage, TransportError};
use syncpoint_bus::{
    BusError, Event, EventHandler, HandlerError, IdentifierEncoding, PollOutcome,
    ReceivedEnvelope, Scope,
};

use crate::support::{
    bus_with, config, routed_config, subscribe_first, subscribe_second, AlwaysFails, CallLog,
    Flaky, OrderCancelled, OrderPlaced, EVENT_TYPE, QUEUE,
};

// ============================================================================
// Test 1: Subscribed message is handled once and committed once
// ============================================================================

#[test]
fn handled_message_is_committed_once() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(routed_config(), &queues);
    let log = CallLog::default();
    subscribe_first::<OrderPlaced>(&bus, &log);

    let id = queues.enqueue(
        QUEUE,
        QueueMessage::new(r#"{"orderId":"o-1"}"#)
            .with_correlation_id("corr-1")
            .with_property(EVENT_TYPE, "OrderPlaced"),
    );

    let mut session = bus.connect().unwrap();
    let outcome = bus.poll_once(&mut session).unwrap();

    assert_eq!(outcome, PollOutcome::Committed { handlers: 1 });
    assert_eq!(log.len(), 1);
    assert_eq!(
        log.envelopes()[0],
        ReceivedEnvelope::new(
            r#"{"orderId":"o-1"}"#,
            String::from_utf8(id).unwrap(),
            "corr-1"
        )
    );
    assert_eq!(queues.commits(), 1);
    assert_eq!(queues.depth(QUEUE), 0);
}

// ============================================================================
// Test 2: No subscribers - nothing runs, nothing is committed
// ============================================================================

#[test]
fn unsubscribed_message_is_not_committed() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(config(), &queues);
    queues.enqueue(QUEUE, QueueMessage::new("orphan"));

    let mut session = bus.connect().unwrap();
    assert_eq!(bus.poll_once(&mut session).unwrap(), PollOutcome::NotProcessed);

    assert_eq!(queues.commits(), 0);
    assert_eq!(queues.depth(QUEUE), 1);
    assert_eq!(queues.messages(QUEUE)[0].backout_count, 1);

    // Still there on the next receive
    assert_eq!(bus.poll_once(&mut session).unwrap(), PollOutcome::NotProcessed);
    assert_eq!(queues.depth(QUEUE), 1);
    assert_eq!(queues.messages(QUEUE)[0].backout_count, 2);
}

// ============================================================================
// Test 3: Empty queue - timeout is not an error
// ============================================================================

#[test]
fn empty_queue_times_out_quietly() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(config(), &queues);
    let log = CallLog::default();
    subscribe_first::<ReceivedEnvelope>(&bus, &log);

    let mut session = bus.connect().unwrap();
    assert_eq!(bus.poll_once(&mut session).unwrap(), PollOutcome::Empty);

    assert_eq!(log.len(), 0);
    assert_eq!(queues.commits(), 0);
}

#[test]
fn injected_no_message_reason_is_not_an_error() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(config(), &queues);
    queues.fail_next_get(TransportError::no_message());

    let mut session = bus.connect().unwrap();
    assert_eq!(bus.poll_once(&mut session).unwrap(), PollOutcome::Empty);
}

// ============================================================================
// Test 4: Any other transport error propagates
// ============================================================================

#[test]
fn other_transport_errors_propagate() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(config(), &queues);
    queues.fail_next_get(TransportError::new(reason::UNKNOWN_OBJECT_NAME, "no such queue"));

    let mut session = bus.connect().unwrap();
    let err = bus.poll_once(&mut session).unwrap_err();
    assert_eq!(err.reason(), Some(reason::UNKNOWN_OBJECT_NAME));
}

// ============================================================================
// Test 5: Handlers run in registration order
// ============================================================================

#[test]
fn handlers_run_in_registration_order() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(config(), &queues);
    let log = CallLog::default();
    subscribe_second::<ReceivedEnvelope>(&bus, &log);
    subscribe_first::<ReceivedEnvelope>(&bus, &log);

    queues.enqueue(QUEUE, QueueMessage::new("m1"));
    queues.enqueue(QUEUE, QueueMessage::new("m2"));

    let mut session = bus.connect().unwrap();
    bus.poll_once(&mut session).unwrap();
    bus.poll_once(&mut session).unwrap();

    assert_eq!(log.handlers(), vec!["second", "first", "second", "first"]);
    let payloads: Vec<String> = log.envelopes().into_iter().map(|e| e.payload).collect();
    assert_eq!(payloads, vec!["m1", "m1", "m2", "m2"]);
    assert_eq!(queues.commits(), 2);
}

#[test]
fn duplicate_subscription_runs_once() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(config(), &queues);
    let log = CallLog::default();
    subscribe_first::<ReceivedEnvelope>(&bus, &log);
    subscribe_first::<ReceivedEnvelope>(&bus, &log);

    queues.enqueue(QUEUE, QueueMessage::new("m1"));
    let mut session = bus.connect().unwrap();

    assert_eq!(
        bus.poll_once(&mut session).unwrap(),
        PollOutcome::Committed { handlers: 1 }
    );
    assert_eq!(log.len(), 1);
}

// ============================================================================
// Test 6: A failing handler aborts the rest and blocks the commit
// ============================================================================

#[test]
fn handler_failure_aborts_and_backs_out() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(config(), &queues);
    let log = CallLog::default();
    bus.subscribe::<ReceivedEnvelope, AlwaysFails>();
    subscribe_second::<ReceivedEnvelope>(&bus, &log);

    queues.enqueue(QUEUE, QueueMessage::new("m1"));
    let mut session = bus.connect().unwrap();

    match bus.poll_once(&mut session) {
        Err(BusError::Handler {
            event,
            handler,
            source,
        }) => {
            assert_eq!(event, ReceivedEnvelope::NAME);
            assert!(handler.ends_with("AlwaysFails"));
            assert!(matches!(source, HandlerError::Rejected(_)));
        }
        other => panic!("expected handler error, got {:?}", other),
    }

    assert_eq!(log.len(), 0);
    assert_eq!(queues.commits(), 0);
    assert_eq!(queues.depth(QUEUE), 1);
}

#[test]
fn failed_message_is_handled_on_redelivery() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(config(), &queues);
    let log = CallLog::default();
    let remaining = Arc::new(AtomicUsize::new(1));
    {
        let log = log.clone();
        let remaining = Arc::clone(&remaining);
        bus.subscribe_with::<ReceivedEnvelope, Flaky, _>(move |_| Flaky {
            remaining: Arc::clone(&remaining),
            log: log.clone(),
        });
    }

    let id = queues.enqueue(QUEUE, QueueMessage::new("m1"));
    let mut session = bus.connect().unwrap();

    assert!(bus.poll_once(&mut session).is_err());
    assert_eq!(
        bus.poll_once(&mut session).unwrap(),
        PollOutcome::Committed { handlers: 1 }
    );

    assert_eq!(remaining.load(Ordering::SeqCst), 0);
    assert_eq!(log.envelopes()[0].message_id, String::from_utf8(id).unwrap());
    assert_eq!(queues.depth(QUEUE), 0);
}

#[test]
fn failed_commit_after_handling_backs_out() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(config(), &queues);
    let log = CallLog::default();
    subscribe_first::<ReceivedEnvelope>(&bus, &log);

    queues.enqueue(QUEUE, QueueMessage::new("m1"));
    queues.enqueue(QUEUE, QueueMessage::new("m2"));
    queues.fail_next_commit(TransportError::new(reason::UNEXPECTED_ERROR, "commit failed"));

    let mut session = bus.connect().unwrap();
    let err = bus.poll_once(&mut session).unwrap_err();
    assert_eq!(err.reason(), Some(reason::UNEXPECTED_ERROR));

    let waiting = queues.messages(QUEUE);
    assert_eq!(waiting.len(), 2);
    assert_eq!(waiting[0].payload_text(), "m1");
    assert_eq!(waiting[0].backout_count, 1);

    // The next commit on the same session must not take m1 along with m2
    bus.poll_once(&mut session).unwrap();
    bus.poll_once(&mut session).unwrap();

    let payloads: Vec<String> = log.envelopes().into_iter().map(|e| e.payload).collect();
    assert_eq!(payloads, vec!["m1", "m1", "m2"]);
    assert_eq!(queues.depth(QUEUE), 0);
}

// ============================================================================
// Test 7: One scope per message, released whatever the outcome
// ============================================================================

#[derive(Clone, Default)]
struct ScopeEvents(Arc<Mutex<Vec<String>>>);

impl ScopeEvents {
    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct MessageNumber(usize);

struct ReadsScope(ScopeEvents);

impl EventHandler for ReadsScope {
    fn handle(&self, _message: &str, scope: &Scope) -> Result<(), HandlerError> {
        let number = scope
            .get::<MessageNumber>()
            .ok_or(HandlerError::MissingContext("MessageNumber"))?;
        self.0.push(format!("handled {}", number.0));
        Ok(())
    }
}

#[test]
fn scope_is_shared_per_message_and_always_released() {
    let queues = InMemoryQueueManager::new();
    let events = ScopeEvents::default();
    let created = Arc::new(AtomicUsize::new(0));

    let provider = {
        let events = events.clone();
        let created = Arc::clone(&created);
        move || {
            let n = created.fetch_add(1, Ordering::SeqCst) + 1;
            let mut scope = Scope::new().with(MessageNumber(n));
            let events = events.clone();
            scope.on_release(move || events.push(format!("released {}", n)));
            scope
        }
    };

    let bus = bus_with(config(), &queues).with_context_provider(provider);
    {
        let events = events.clone();
        bus.subscribe_with::<ReceivedEnvelope, ReadsScope, _>(move |_| ReadsScope(events.clone()));
    }
    bus.subscribe::<ReceivedEnvelope, AlwaysFails>();

    queues.enqueue(QUEUE, QueueMessage::new("m1"));
    let mut session = bus.connect().unwrap();
    assert!(bus.poll_once(&mut session).is_err());

    bus.unsubscribe::<ReceivedEnvelope, AlwaysFails>();
    assert!(bus.poll_once(&mut session).is_ok());

    assert_eq!(
        events.snapshot(),
        vec!["handled 1", "released 1", "handled 2", "released 2"]
    );
}

#[test]
fn no_scope_for_unhandled_messages() {
    let queues = InMemoryQueueManager::new();
    let created = Arc::new(AtomicUsize::new(0));
    let provider = {
        let created = Arc::clone(&created);
        move || {
            created.fetch_add(1, Ordering::SeqCst);
            Scope::new()
        }
    };
    let bus = bus_with(config(), &queues).with_context_provider(provider);

    queues.enqueue(QUEUE, QueueMessage::new("orphan"));
    let mut session = bus.connect().unwrap();
    bus.poll_once(&mut session).unwrap();

    assert_eq!(created.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Test 8: Routing by event-type property
// ============================================================================

#[test]
fn routes_by_event_type_property() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(routed_config(), &queues);
    let log = CallLog::default();
    subscribe_first::<OrderPlaced>(&bus, &log);

    queues.enqueue(
        QUEUE,
        QueueMessage::new("{}").with_property(EVENT_TYPE, "OrderCancelled"),
    );
    let mut session = bus.connect().unwrap();
    assert_eq!(bus.poll_once(&mut session).unwrap(), PollOutcome::NotProcessed);
    assert!(!bus.has_subscriptions("OrderCancelled"));

    subscribe_second::<OrderCancelled>(&bus, &log);
    assert_eq!(
        bus.poll_once(&mut session).unwrap(),
        PollOutcome::Committed { handlers: 1 }
    );
    assert_eq!(log.handlers(), vec!["second"]);
}

#[test]
fn untagged_message_falls_back_to_envelope() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(routed_config(), &queues);
    let log = CallLog::default();
    subscribe_first::<ReceivedEnvelope>(&bus, &log);

    queues.enqueue(QUEUE, QueueMessage::new("plain"));
    let mut session = bus.connect().unwrap();

    assert_eq!(
        bus.poll_once(&mut session).unwrap(),
        PollOutcome::Committed { handlers: 1 }
    );
}

// ============================================================================
// Test 9: Unsubscribe and close
// ============================================================================

#[test]
fn unsubscribed_handler_no_longer_runs() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(config(), &queues);
    bus.subscribe::<ReceivedEnvelope, AlwaysFails>();
    assert!(bus.unsubscribe::<ReceivedEnvelope, AlwaysFails>());
    assert!(!bus.unsubscribe::<ReceivedEnvelope, AlwaysFails>());
    assert!(!bus.has_subscriptions(ReceivedEnvelope::NAME));

    queues.enqueue(QUEUE, QueueMessage::new("m1"));
    let mut session = bus.connect().unwrap();
    assert_eq!(bus.poll_once(&mut session).unwrap(), PollOutcome::NotProcessed);
}

#[test]
fn close_clears_all_subscriptions() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(routed_config(), &queues);
    let log = CallLog::default();
    subscribe_first::<OrderPlaced>(&bus, &log);
    subscribe_first::<OrderCancelled>(&bus, &log);
    assert_eq!(bus.event_names(), vec!["OrderCancelled", "OrderPlaced"]);

    bus.close();
    bus.close();

    assert!(bus.event_names().is_empty());
}

// ============================================================================
// Test 10: Identifier encoding
// ============================================================================

#[test]
fn base64_identifiers_survive_binary_ids() {
    let queues = InMemoryQueueManager::new();
    let bus = bus_with(
        config().with_identifier_encoding(IdentifierEncoding::Base64),
        &queues,
    );
    let log = CallLog::default();
    subscribe_first::<ReceivedEnvelope>(&bus, &log);

    let mut message = QueueMessage::new("m1").with_correlation_id(vec![0u8; 3]);
    message.message_id = vec![0xde, 0xad, 0xbe, 0xef];
    queues.enqueue(QUEUE, message);

    let mut session = bus.connect().unwrap();
    bus.poll_once(&mut session).unwrap();

    let envelopes = log.envelopes();
    let envelope = &envelopes[0];
    assert_eq!(envelope.message_id, "3q2+7w==");
    assert_eq!(envelope.correlation_id, "AAAA");
}
