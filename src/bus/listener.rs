//! Background listener thread.
//!
//! `start_listener` spawns a thread running `TransactionalEventBus::run`
//! and hands back a `ListenerHandle` holding the stop channel.

use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::event_bus::{PollOutcome, TransactionalEventBus};
use crate::error::BusError;
use crate::transport::QueueManager;

/// Statistics from a listener run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListenerStats {
    /// Number of poll iterations that reached the queue.
    pub polls: usize,
    /// Polls that timed out on an empty queue.
    pub empty_polls: usize,
    /// Messages handled and committed.
    pub committed: usize,
    /// Messages left on the queue because nobody subscribes to them.
    pub not_processed: usize,
    /// Unhandled messages dropped by policy.
    pub discarded: usize,
    /// Unhandled messages moved to the dead-letter queue.
    pub dead_lettered: usize,
    /// Reconnect attempts after a lost connection.
    pub reconnects: usize,
}

impl ListenerStats {
    pub(crate) fn record(&mut self, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Empty => self.empty_polls += 1,
            PollOutcome::Committed { .. } => self.committed += 1,
            PollOutcome::NotProcessed => self.not_processed += 1,
            PollOutcome::Discarded => self.discarded += 1,
            PollOutcome::DeadLettered => self.dead_lettered += 1,
            PollOutcome::Stopped => {}
        }
    }
}

/// Handle to a background listener. Drop or call `stop()` to shut down.
pub struct ListenerHandle {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<Result<ListenerStats, BusError>>>,
}

impl ListenerHandle {
    /// Signal the listener to stop and wait for it to finish.
    ///
    /// Returns the run's statistics, or the fatal error that ended it first.
    pub fn stop(mut self) -> Result<ListenerStats, BusError> {
        let _ = self.stop_tx.send(());
        self.wait()
    }

    /// Wait for the listener to end on its own (a fatal error).
    pub fn join(mut self) -> Result<ListenerStats, BusError> {
        self.wait()
    }

    /// Signal the listener to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }

    /// True once the listener thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn wait(&mut self) -> Result<ListenerStats, BusError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(BusError::ListenerPanicked)),
            None => Ok(ListenerStats::default()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        // Don't join on drop - let the thread finish naturally
    }
}

impl<Q> TransactionalEventBus<Q>
where
    Q: QueueManager + 'static,
{
    /// Spawn the listener on a background thread.
    ///
    /// ## Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::time::Duration;
    /// use syncpoint_bus::{BusConfig, TransactionalEventBus};
    /// use syncpoint_bus::transport::InMemoryQueueManager;
    ///
    /// let config = BusConfig::new("QM1", "ORDERS").with_wait_interval(Duration::from_millis(10));
    /// let bus = Arc::new(TransactionalEventBus::new(config, InMemoryQueueManager::new()).unwrap());
    ///
    /// let listener = bus.start_listener();
    /// // ... publish, subscribe ...
    /// let stats = listener.stop().unwrap();
    /// assert_eq!(stats.committed, 0);
    /// ```
    pub fn start_listener(self: &Arc<Self>) -> ListenerHandle {
        let (stop_tx, stop_rx) = channel();
        let bus = Arc::clone(self);
        let handle = thread::spawn(move || bus.run(stop_rx));

        ListenerHandle {
            stop_tx,
            handle: Some(handle),
        }
    }
}
