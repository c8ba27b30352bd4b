//! Transactional event bus - receive, dispatch, commit.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, error, info, trace, warn};

use super::listener::ListenerStats;
use super::serializer::{EnvelopeSerializer, JsonSerializer};
use crate::config::{BusConfig, IdentifierEncoding, UnhandledPolicy};
use crate::error::BusError;
use crate::event::{Event, ReceivedEnvelope};
use crate::handler::EventHandler;
use crate::scope::{ContextProvider, NoContext, Scope};
use crate::subscription::{HandlerBinding, SubscriptionRegistry};
use crate::transport::{GetOptions, PutOptions, QueueManager, QueueMessage, QueueSession};

/// What one poll iteration did with the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing arrived within the wait interval.
    Empty,
    /// The message was handled and the read committed.
    Committed { handlers: usize },
    /// No subscribers. The read was backed out and the message will be
    /// received again.
    NotProcessed,
    /// No subscribers and past the redelivery limit. The read was committed
    /// and the message dropped.
    Discarded,
    /// No subscribers and past the redelivery limit. The message was moved
    /// to the dead-letter queue.
    DeadLettered,
    /// A message arrived after stop was requested. The read was backed out.
    Stopped,
}

/// Publish/subscribe bus over a single transactional queue.
///
/// The listener receives each message under syncpoint, turns it into a
/// `ReceivedEnvelope`, runs every subscribed handler in registration order
/// inside one `Scope`, and commits only if at least one handler ran.
/// Messages nobody handles are backed out and stay on the queue (subject
/// to the configured `UnhandledPolicy`).
///
/// ## Example
///
/// ```
/// use syncpoint_bus::{
///     BusConfig, EventHandler, HandlerError, PollOutcome, ReceivedEnvelope, Scope,
///     TransactionalEventBus,
/// };
/// use syncpoint_bus::transport::{InMemoryQueueManager, QueueMessage};
///
/// #[derive(Default)]
/// struct PrintOrder;
/// impl EventHandler for PrintOrder {
///     fn handle(&self, message: &str, _scope: &Scope) -> Result<(), HandlerError> {
///         let envelope = ReceivedEnvelope::from_json(message)?;
///         assert_eq!(envelope.payload, "order-1");
///         Ok(())
///     }
/// }
///
/// let queues = InMemoryQueueManager::new();
/// let bus = TransactionalEventBus::new(BusConfig::new("QM1", "ORDERS"), queues.clone()).unwrap();
/// bus.subscribe::<ReceivedEnvelope, PrintOrder>();
///
/// queues.enqueue("ORDERS", QueueMessage::new("order-1"));
///
/// let mut session = bus.connect().unwrap();
/// assert_eq!(bus.poll_once(&mut session).unwrap(), PollOutcome::Committed { handlers: 1 });
/// assert_eq!(queues.depth("ORDERS"), 0);
/// ```
pub struct TransactionalEventBus<Q: QueueManager> {
    config: BusConfig,
    manager: Q,
    registry: RwLock<SubscriptionRegistry>,
    context: Arc<dyn ContextProvider>,
    serializer: Arc<dyn EnvelopeSerializer>,
}

impl<Q: QueueManager> TransactionalEventBus<Q> {
    /// Create a bus over `manager`. The configuration is validated here and
    /// applied on every `connect`.
    pub fn new(config: BusConfig, manager: Q) -> Result<Self, BusError> {
        config.validate()?;
        Ok(Self {
            config,
            manager,
            registry: RwLock::new(SubscriptionRegistry::new()),
            context: Arc::new(NoContext),
            serializer: Arc::new(JsonSerializer),
        })
    }

    /// Use `provider` to create the per-message scope.
    pub fn with_context_provider(mut self, provider: impl ContextProvider + 'static) -> Self {
        self.context = Arc::new(provider);
        self
    }

    /// Use `serializer` to build the text handed to handlers.
    pub fn with_serializer(mut self, serializer: impl EnvelopeSerializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// The underlying queue manager.
    pub fn manager(&self) -> &Q {
        &self.manager
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe handler type `H` to event `E`. Idempotent.
    pub fn subscribe<E, H>(&self)
    where
        E: Event,
        H: EventHandler + Default + 'static,
    {
        self.registry_write().add_subscription::<E, H>();
        debug!(event = E::NAME, handler = std::any::type_name::<H>(), "subscribed");
    }

    /// Subscribe handler type `H` to event `E`, resolving each instance from
    /// the message scope.
    pub fn subscribe_with<E, H, F>(&self, factory: F)
    where
        E: Event,
        H: EventHandler + 'static,
        F: Fn(&Scope) -> H + Send + Sync + 'static,
    {
        self.registry_write().add_subscription_with::<E, H, F>(factory);
        debug!(event = E::NAME, handler = std::any::type_name::<H>(), "subscribed");
    }

    /// Unsubscribe handler type `H` from event `E`. Returns `false` if it
    /// was not subscribed.
    pub fn unsubscribe<E, H>(&self) -> bool
    where
        E: Event,
        H: 'static,
    {
        let removed = self.registry_write().remove_subscription::<E, H>();
        if removed {
            debug!(event = E::NAME, handler = std::any::type_name::<H>(), "unsubscribed");
        }
        removed
    }

    pub fn has_subscriptions(&self, event_name: &str) -> bool {
        self.registry_read().has_subscriptions(event_name)
    }

    /// Discriminators with at least one handler.
    pub fn event_names(&self) -> Vec<&'static str> {
        self.registry_read().event_names()
    }

    /// Drop every subscription. Safe to call more than once; also runs
    /// when the bus is dropped.
    pub fn close(&self) {
        let mut registry = self.registry_write();
        if !registry.is_empty() {
            registry.clear();
            debug!(queue = %self.config.queue, "subscriptions cleared");
        }
    }

    fn registry_read(&self) -> RwLockReadGuard<'_, SubscriptionRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_write(&self) -> RwLockWriteGuard<'_, SubscriptionRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Open a session against the configured queue manager.
    pub fn connect(&self) -> Result<Q::Session, BusError> {
        let session = self
            .manager
            .connect(&self.config.queue_manager, &self.config.connection)?;
        debug!(
            queue_manager = %self.config.queue_manager,
            host = %self.config.connection.host,
            port = self.config.connection.port,
            channel = %self.config.connection.channel,
            "connected"
        );
        Ok(session)
    }

    /// Publish one event on its own session and commit it.
    pub fn publish<E: Event>(&self, event: &E) -> Result<(), BusError> {
        self.publish_batch(std::slice::from_ref(event))
    }

    /// Publish several events in a single transaction: either all become
    /// visible or none do.
    pub fn publish_batch<E: Event>(&self, events: &[E]) -> Result<(), BusError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut session = self.connect()?;
        let result = events
            .iter()
            .try_for_each(|event| {
                session.put(&self.config.queue, self.to_message(event), PutOptions::default())
            })
            .and_then(|()| session.commit());

        if let Err(e) = result {
            if let Err(backout) = session.backout() {
                warn!(error = %backout, "backout after failed publish also failed");
            }
            return Err(e.into());
        }

        debug!(event = E::NAME, count = events.len(), queue = %self.config.queue, "published");
        Ok(())
    }

    fn to_message<E: Event>(&self, event: &E) -> QueueMessage {
        let mut message = QueueMessage::new(event.payload());
        if let Some(correlation_id) = event.correlation_id() {
            message.correlation_id = self.encode_id(correlation_id);
        }
        if let Some(property) = &self.config.event_type_property {
            message = message.with_property(property.clone(), E::NAME);
        }
        message
    }

    // =========================================================================
    // Receive / dispatch
    // =========================================================================

    /// Run one iteration on `session`: receive, dispatch, commit or back out.
    pub fn poll_once(&self, session: &mut Q::Session) -> Result<PollOutcome, BusError> {
        self.poll_step(session, &|| false)
    }

    /// Run the listener on the current thread until `stop` fires (or its
    /// sender is dropped) or a fatal error occurs.
    ///
    /// One session is held for the whole run. Connection-level failures
    /// reconnect up to `reconnect_attempts` times in a row; every other
    /// transport error, and any handler error, ends the run.
    pub fn run(&self, stop: Receiver<()>) -> Result<ListenerStats, BusError> {
        let mut stats = ListenerStats::default();
        let mut session: Option<Q::Session> = None;
        let mut failures: u32 = 0;
        let stop_requested = || match stop.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        };

        info!(
            queue_manager = %self.config.queue_manager,
            queue = %self.config.queue,
            "listener started"
        );

        loop {
            if stop_requested() {
                break;
            }

            if session.is_none() {
                match self.connect() {
                    Ok(s) => session = Some(s),
                    Err(e) if failures > 0 && self.may_reconnect(&e, failures) => {
                        failures += 1;
                        stats.reconnects += 1;
                        warn!(error = %e, attempt = failures, "reconnect failed");
                        thread::sleep(self.config.wait_interval());
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "listener stopped on connect failure");
                        return Err(e);
                    }
                }
            }
            let Some(active) = session.as_mut() else {
                continue;
            };

            stats.polls += 1;
            match self.poll_step(active, &stop_requested) {
                Ok(PollOutcome::Stopped) => break,
                Ok(outcome) => {
                    failures = 0;
                    stats.record(&outcome);
                }
                Err(e) if self.may_reconnect(&e, failures) => {
                    failures += 1;
                    stats.reconnects += 1;
                    warn!(error = %e, attempt = failures, "connection lost, reconnecting");
                    session = None;
                }
                Err(e) => {
                    error!(error = %e, "listener stopped on fatal error");
                    return Err(e);
                }
            }
        }

        info!(
            queue = %self.config.queue,
            polls = stats.polls,
            committed = stats.committed,
            "listener stopped"
        );
        Ok(stats)
    }

    fn may_reconnect(&self, error: &BusError, failures: u32) -> bool {
        matches!(error, BusError::Transport(e) if e.is_connection_broken())
            && failures < self.config.reconnect_attempts
    }

    fn poll_step(
        &self,
        session: &mut Q::Session,
        stop_requested: &dyn Fn() -> bool,
    ) -> Result<PollOutcome, BusError> {
        let options = GetOptions::syncpoint(self.config.wait_interval());
        let message = match session.get(&self.config.queue, options) {
            Ok(message) => message,
            Err(e) if e.is_no_message() => {
                trace!(queue = %self.config.queue, "no message");
                return Ok(PollOutcome::Empty);
            }
            Err(e) => return Err(e.into()),
        };

        // The read is provisional until commit; any failure must undo it
        // or the next commit on this session would consume it.
        let result = self.process(session, message, stop_requested);
        if let Err(e) = &result {
            if let Err(backout) = session.backout() {
                warn!(error = %e, backout_error = %backout, "backout after failed poll also failed");
            }
        }
        result
    }

    fn process(
        &self,
        session: &mut Q::Session,
        message: QueueMessage,
        stop_requested: &dyn Fn() -> bool,
    ) -> Result<PollOutcome, BusError> {
        if stop_requested() {
            session.backout()?;
            debug!(queue = %self.config.queue, "stop requested, message backed out");
            return Ok(PollOutcome::Stopped);
        }

        let event_name = self.event_name_of(&message).to_string();
        let bindings = self.registry_read().handlers(&event_name).to_vec();
        if bindings.is_empty() {
            return self.handle_unhandled(session, &event_name, message);
        }

        let envelope = self.decode(&message);
        let handlers = self.dispatch(&event_name, &envelope, &bindings)?;
        session.commit()?;
        debug!(
            event = %event_name,
            message_id = %envelope.message_id,
            handlers,
            "committed"
        );
        Ok(PollOutcome::Committed { handlers })
    }

    /// Run every binding, in order, inside one scope. Stops at the first failure.
    fn dispatch(
        &self,
        event_name: &str,
        envelope: &ReceivedEnvelope,
        bindings: &[HandlerBinding],
    ) -> Result<usize, BusError> {
        let scope = self.context.create_scope();
        let message = self.serializer.serialize(envelope)?;

        for binding in bindings {
            let handler = binding.resolve(&scope);
            if let Err(source) = handler.handle(&message, &scope) {
                warn!(
                    event = %event_name,
                    handler = binding.handler_name(),
                    message_id = %envelope.message_id,
                    error = %source,
                    "handler failed"
                );
                return Err(BusError::Handler {
                    event: event_name.to_string(),
                    handler: binding.handler_name(),
                    source,
                });
            }
        }
        Ok(bindings.len())
    }

    fn handle_unhandled(
        &self,
        session: &mut Q::Session,
        event_name: &str,
        message: QueueMessage,
    ) -> Result<PollOutcome, BusError> {
        let backouts = message.backout_count;
        match &self.config.unhandled {
            UnhandledPolicy::Discard { after } if backouts >= *after => {
                session.commit()?;
                warn!(event = %event_name, backouts, "discarded unhandled message");
                Ok(PollOutcome::Discarded)
            }
            UnhandledPolicy::DeadLetter { queue, after } if backouts >= *after => {
                session.put(queue, message, PutOptions::default())?;
                session.commit()?;
                warn!(event = %event_name, backouts, dead_letter_queue = %queue, "dead-lettered unhandled message");
                Ok(PollOutcome::DeadLettered)
            }
            _ => {
                session.backout()?;
                warn!(event = %event_name, backouts, "no subscribers, message left on queue");
                Ok(PollOutcome::NotProcessed)
            }
        }
    }

    fn event_name_of<'a>(&'a self, message: &'a QueueMessage) -> &'a str {
        self.config
            .event_type_property
            .as_deref()
            .and_then(|property| message.property(property))
            .unwrap_or(ReceivedEnvelope::NAME)
    }

    fn decode(&self, message: &QueueMessage) -> ReceivedEnvelope {
        ReceivedEnvelope::new(
            message.payload_text(),
            self.decode_id(&message.message_id),
            self.decode_id(&message.correlation_id),
        )
    }

    fn decode_id(&self, raw: &[u8]) -> String {
        match self.config.identifier_encoding {
            IdentifierEncoding::Text => String::from_utf8_lossy(raw).into_owned(),
            IdentifierEncoding::Base64 => STANDARD.encode(raw),
        }
    }

    fn encode_id(&self, text: &str) -> Vec<u8> {
        match self.config.identifier_encoding {
            IdentifierEncoding::Text => text.as_bytes().to_vec(),
            IdentifierEncoding::Base64 => STANDARD.decode(text).unwrap_or_else(|e| {
                warn!(id = text, error = %e, "identifier is not base64, sending raw bytes");
                text.as_bytes().to_vec()
            }),
        }
    }
}

impl<Q: QueueManager> Drop for TransactionalEventBus<Q> {
    fn drop(&mut self) {
        self.close();
    }
}
