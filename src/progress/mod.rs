use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::dispatch::types::BatchSnapshot;

type ObserverId = u64;

#[derive(Debug, Default)]
struct Registry {
    next_id: AtomicU64,
    observers: Mutex<HashMap<ObserverId, mpsc::Sender<BatchSnapshot>>>,
}

impl Registry {
    fn remove(&self, id: ObserverId) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.remove(&id);
        }
    }
}

/// Fans batch snapshots out to every connected observer.
///
/// Each observer gets its own bounded queue. A slow observer whose queue is
/// full misses that snapshot; it never holds up the publisher or the other
/// observers. Nothing is replayed to observers that connect late.
#[derive(Debug, Clone)]
pub struct ProgressPublisher {
    registry: Arc<Registry>,
    buffer: usize,
}

impl ProgressPublisher {
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            buffer: buffer.max(1),
        }
    }

    /// Register a new observer. Dropping the returned subscription
    /// disconnects it.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut observers) = self.registry.observers.lock() {
            observers.insert(id, tx);
        }
        tracing::debug!(observer = id, "Progress observer connected");

        Subscription {
            id,
            rx,
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.registry
            .observers
            .lock()
            .map(|observers| observers.len())
            .unwrap_or(0)
    }

    /// Deliver `snapshot` to all currently connected observers.
    pub fn publish(&self, snapshot: &BatchSnapshot) {
        // Copy the membership out so connects/disconnects never wait on delivery
        let targets: Vec<(ObserverId, mpsc::Sender<BatchSnapshot>)> =
            match self.registry.observers.lock() {
                Ok(observers) => observers
                    .iter()
                    .map(|(id, tx)| (*id, tx.clone()))
                    .collect(),
                Err(_) => return,
            };

        for (id, tx) in targets {
            match tx.try_send(snapshot.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(observer = id, "Observer queue full, dropping snapshot");
                }
                Err(TrySendError::Closed(_)) => {
                    self.registry.remove(id);
                }
            }
        }
    }
}

/// Receiving end of one observer's connection
#[derive(Debug)]
pub struct Subscription {
    id: ObserverId,
    rx: mpsc::Receiver<BatchSnapshot>,
    registry: Arc<Registry>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<BatchSnapshot> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BatchSnapshot> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(self.id);
        tracing::debug!(observer = self.id, "Progress observer disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::types::{BatchStatus, PacingTier};
    use chrono::Utc;
    use uuid::Uuid;

    fn snapshot(sent: u32) -> BatchSnapshot {
        BatchSnapshot {
            batch_id: Uuid::new_v4(),
            recipient: "+15551234567".to_string(),
            speed: PacingTier::Fast,
            total: 5,
            sent_count: sent,
            success_count: sent,
            failure_count: 0,
            status: BatchStatus::Sending,
            started_at: Utc::now(),
            updated_at: Utc::now(),
            messages: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn test_publish_without_observers_is_noop() {
        let publisher = ProgressPublisher::new(4);
        publisher.publish(&snapshot(1));
        assert_eq!(publisher.observer_count(), 0);
    }

    #[test]
    fn test_every_observer_receives() {
        let publisher = ProgressPublisher::new(4);
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();

        publisher.publish(&snapshot(1));

        assert_eq!(a.try_recv().unwrap().sent_count, 1);
        assert_eq!(b.try_recv().unwrap().sent_count, 1);
    }

    #[test]
    fn test_late_observer_gets_no_replay() {
        let publisher = ProgressPublisher::new(4);
        publisher.publish(&snapshot(1));

        let mut late = publisher.subscribe();
        assert!(late.try_recv().is_none());

        publisher.publish(&snapshot(2));
        assert_eq!(late.try_recv().unwrap().sent_count, 2);
    }

    #[test]
    fn test_full_observer_does_not_block_others() {
        let publisher = ProgressPublisher::new(1);
        let mut slow = publisher.subscribe();
        let mut fast = publisher.subscribe();

        publisher.publish(&snapshot(1));
        assert_eq!(fast.try_recv().unwrap().sent_count, 1);

        // slow still holds snapshot 1, so snapshot 2 is dropped for it only
        publisher.publish(&snapshot(2));
        assert_eq!(fast.try_recv().unwrap().sent_count, 2);
        assert_eq!(slow.try_recv().unwrap().sent_count, 1);
        assert!(slow.try_recv().is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let publisher = ProgressPublisher::new(4);
        let sub = publisher.subscribe();
        assert_eq!(publisher.observer_count(), 1);
        drop(sub);
        assert_eq!(publisher.observer_count(), 0);
        publisher.publish(&snapshot(1));
    }
}
