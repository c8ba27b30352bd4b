//! In-memory queue manager for testing and single-process scenarios.
//!
//! `InMemoryQueueManager` implements `QueueManager` with real syncpoint
//! semantics: reads under syncpoint are provisional until the session
//! commits, puts under syncpoint only become visible on commit, and a
//! session dropped mid-transaction backs out. Useful for:
//! - Unit and integration testing without a queue manager
//! - Single-process applications
//! - Development and prototyping
//!
//! Every transport call is appended to an operation journal. The journal
//! grows without bound; long-running hosts should drain it with
//! `take_journal` (or `clear`).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::queue::{
    reason, GetOptions, PutOptions, QueueManager, QueueMessage, QueueSession, TransportError,
};
use crate::config::ConnectionConfig;

/// One recorded transport call, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Connect { session: u64 },
    Get { session: u64, queue: String, message_id: Vec<u8> },
    Put { session: u64, queue: String, payload: Vec<u8> },
    Commit { session: u64 },
    Backout { session: u64 },
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<QueueMessage>>,
    next_message: u64,
    next_session: u64,
    connect_faults: VecDeque<TransportError>,
    get_faults: VecDeque<TransportError>,
    put_faults: VecDeque<TransportError>,
    commit_faults: VecDeque<TransportError>,
    offline: bool,
    journal: Vec<Operation>,
}

impl State {
    fn assign_id(&mut self, message: &mut QueueMessage) {
        if message.message_id.is_empty() {
            self.next_message += 1;
            message.message_id = format!("ID:{:021}", self.next_message).into_bytes();
        }
    }
}

/// In-memory queue manager.
///
/// Cloning yields another handle to the same queues, so a test can keep
/// one handle for inspection while the bus owns another.
///
/// ## Example
///
/// ```
/// use syncpoint_bus::transport::{
///     GetOptions, InMemoryQueueManager, PutOptions, QueueManager, QueueMessage, QueueSession,
/// };
/// use syncpoint_bus::ConnectionConfig;
/// use std::time::Duration;
///
/// let manager = InMemoryQueueManager::new();
/// let mut session = manager.connect("QM1", &ConnectionConfig::default()).unwrap();
///
/// session.put("ORDERS", QueueMessage::new("hello"), PutOptions::default()).unwrap();
/// session.commit().unwrap();
///
/// let msg = session
///     .get("ORDERS", GetOptions::syncpoint(Duration::from_millis(10)))
///     .unwrap();
/// assert_eq!(msg.payload_text(), "hello");
/// session.commit().unwrap();
/// assert_eq!(manager.depth("ORDERS"), 0);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryQueueManager {
    state: Arc<Mutex<State>>,
}

impl InMemoryQueueManager {
    /// Create an empty queue manager.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Place a message directly on a queue, as an external producer would.
    /// Returns the assigned message identifier.
    pub fn enqueue(&self, queue: &str, mut message: QueueMessage) -> Vec<u8> {
        let mut state = self.state();
        state.assign_id(&mut message);
        let id = message.message_id.clone();
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
        id
    }

    /// Number of committed messages waiting on a queue.
    pub fn depth(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Snapshot of the committed messages on a queue.
    pub fn messages(&self, queue: &str) -> Vec<QueueMessage> {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Make the next `connect` fail with the given error.
    pub fn fail_next_connect(&self, error: TransportError) {
        self.state().connect_faults.push_back(error);
    }

    /// Make the next `get` (on any session) fail with the given error.
    pub fn fail_next_get(&self, error: TransportError) {
        self.state().get_faults.push_back(error);
    }

    /// Make the next `put` (on any session) fail with the given error.
    pub fn fail_next_put(&self, error: TransportError) {
        self.state().put_faults.push_back(error);
    }

    /// Make the next `commit` (on any session) fail with the given error.
    /// The session's pending work is left in place, as after a failed
    /// commit on a real queue manager.
    pub fn fail_next_commit(&self, error: TransportError) {
        self.state().commit_faults.push_back(error);
    }

    /// Take the queue manager down (or bring it back). While offline,
    /// `connect` fails with 2059 and calls on open sessions fail with 2009.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Every transport call made so far.
    pub fn journal(&self) -> Vec<Operation> {
        self.state().journal.clone()
    }

    /// Return the journal and start a fresh one.
    pub fn take_journal(&self) -> Vec<Operation> {
        std::mem::take(&mut self.state().journal)
    }

    /// Number of sessions opened.
    pub fn connections(&self) -> usize {
        self.count(|op| matches!(op, Operation::Connect { .. }))
    }

    /// Number of commits across all sessions.
    pub fn commits(&self) -> usize {
        self.count(|op| matches!(op, Operation::Commit { .. }))
    }

    /// Number of backouts (explicit or on drop) across all sessions.
    pub fn backouts(&self) -> usize {
        self.count(|op| matches!(op, Operation::Backout { .. }))
    }

    /// All puts as `(session, queue, payload)`.
    pub fn puts(&self) -> Vec<(u64, String, Vec<u8>)> {
        self.state()
            .journal
            .iter()
            .filter_map(|op| match op {
                Operation::Put {
                    session,
                    queue,
                    payload,
                } => Some((*session, queue.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    /// Sessions that performed at least one get.
    pub fn receiving_sessions(&self) -> Vec<u64> {
        let mut sessions: Vec<u64> = self
            .state()
            .journal
            .iter()
            .filter_map(|op| match op {
                Operation::Get { session, .. } => Some(*session),
                _ => None,
            })
            .collect();
        sessions.sort_unstable();
        sessions.dedup();
        sessions
    }

    /// Drop all queues, faults and history (useful for test cleanup).
    pub fn clear(&self) {
        *self.state() = State::default();
    }

    fn count(&self, pred: impl Fn(&Operation) -> bool) -> usize {
        self.state().journal.iter().filter(|op| pred(op)).count()
    }
}

impl QueueManager for InMemoryQueueManager {
    type Session = InMemorySession;

    fn connect(
        &self,
        _queue_manager: &str,
        _connection: &ConnectionConfig,
    ) -> Result<InMemorySession, TransportError> {
        let mut state = self.state();
        if let Some(err) = state.connect_faults.pop_front() {
            return Err(err);
        }
        if state.offline {
            return Err(TransportError::new(
                reason::Q_MGR_NOT_AVAILABLE,
                "queue manager not available",
            ));
        }
        state.next_session += 1;
        let id = state.next_session;
        state.journal.push(Operation::Connect { session: id });

        Ok(InMemorySession {
            id,
            state: Arc::clone(&self.state),
            pending_gets: Vec::new(),
            pending_puts: Vec::new(),
        })
    }
}

/// A session on an `InMemoryQueueManager`.
pub struct InMemorySession {
    id: u64,
    state: Arc<Mutex<State>>,
    pending_gets: Vec<(String, QueueMessage)>,
    pending_puts: Vec<(String, QueueMessage)>,
}

impl InMemorySession {
    /// Session identifier, as recorded in the journal.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn has_pending_work(&self) -> bool {
        !self.pending_gets.is_empty() || !self.pending_puts.is_empty()
    }

    fn rollback(&mut self, state: &mut State) {
        // Reinstate reads at the head of their queues in original order.
        for (queue, mut message) in self.pending_gets.drain(..).rev() {
            message.backout_count += 1;
            state.queues.entry(queue).or_default().push_front(message);
        }
        self.pending_puts.clear();
        state.journal.push(Operation::Backout { session: self.id });
    }
}

impl QueueSession for InMemorySession {
    fn get(&mut self, queue: &str, options: GetOptions) -> Result<QueueMessage, TransportError> {
        let deadline = Instant::now() + options.wait;

        loop {
            {
                let mut state = lock(&self.state);
                if let Some(err) = state.get_faults.pop_front() {
                    return Err(err);
                }
                check_online(&state)?;

                if let Some(message) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) {
                    state.journal.push(Operation::Get {
                        session: self.id,
                        queue: queue.to_string(),
                        message_id: message.message_id.clone(),
                    });
                    if options.syncpoint {
                        self.pending_gets.push((queue.to_string(), message.clone()));
                    }
                    return Ok(message);
                }
            }

            if Instant::now() >= deadline {
                return Err(TransportError::no_message());
            }

            // Small sleep to avoid busy-waiting
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn put(
        &mut self,
        queue: &str,
        mut message: QueueMessage,
        options: PutOptions,
    ) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        check_online(&state)?;
        if let Some(err) = state.put_faults.pop_front() {
            return Err(err);
        }
        state.assign_id(&mut message);
        state.journal.push(Operation::Put {
            session: self.id,
            queue: queue.to_string(),
            payload: message.payload.clone(),
        });

        if options.syncpoint {
            self.pending_puts.push((queue.to_string(), message));
        } else {
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(message);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        check_online(&state)?;
        if let Some(err) = state.commit_faults.pop_front() {
            return Err(err);
        }
        self.pending_gets.clear();
        for (queue, message) in self.pending_puts.drain(..) {
            state.queues.entry(queue).or_default().push_back(message);
        }
        state.journal.push(Operation::Commit { session: self.id });
        Ok(())
    }

    fn backout(&mut self) -> Result<(), TransportError> {
        let state = Arc::clone(&self.state);
        let mut state = lock(&state);
        self.rollback(&mut state);
        Ok(())
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        if self.has_pending_work() {
            let state = Arc::clone(&self.state);
            let mut state = lock(&state);
            self.rollback(&mut state);
        }
    }
}

fn check_online(state: &State) -> Result<(), TransportError> {
    if state.offline {
        return Err(TransportError::new(reason::CONNECTION_BROKEN, "connection broken"));
    }
    Ok(())
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
