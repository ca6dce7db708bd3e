//! Fan-out of controller notifications to observers.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use screenrec_ipc::{event_channel, EngineEvent};

/// Registered observers of [`EngineEvent`]s.
///
/// Each observer owns the receiving end of its own channel. Observers that
/// hang up are pruned on the next publish.
#[derive(Debug, Default)]
pub struct NotificationHub {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = event_channel();
        self.attach(tx);
        rx
    }

    /// Register an existing channel as an observer.
    pub fn attach(&self, tx: Sender<EngineEvent>) {
        let mut subscribers = self.subscribers.lock();
        subscribers.push(tx);
        debug!(subscribers = subscribers.len(), "Observer attached");
    }

    /// Send `event` to every observer.
    pub fn publish(&self, event: EngineEvent) {
        trace!(?event, "Publishing");
        self.subscribers
            .lock()
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Disconnected(_)) => {
                    debug!("Observer disconnected, removing");
                    false
                }
                Err(TrySendError::Full(_)) => {
                    warn!(?event, "Observer channel full, notification dropped");
                    true
                }
            });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
