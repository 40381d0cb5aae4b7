//! Change-event feed for notification and UI collaborators.
//!
//! Observers subscribe once and receive every item change, both local
//! optimistic applies and reconciliation-driven updates, so they converge
//! on current state without polling.

use tokio::sync::broadcast;

use crate::model::PantryItem;

/// Where a change originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Applied locally on this device.
    Local,
    /// Applied by the reconciler from remote state.
    Sync,
}

/// A single item change.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub household_id: String,
    pub item: PantryItem,
    pub origin: ChangeOrigin,
}

/// Broadcast feed of [`ChangeEvent`]s.
///
/// Slow subscribers may observe lagged receives; the feed never blocks
/// writers.
#[derive(Debug)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    /// Creates a feed retaining up to `capacity` undelivered events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribes to all future changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. A send with no live subscribers is a no-op.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(origin: ChangeOrigin) -> ChangeEvent {
        ChangeEvent {
            household_id: "hh-1".to_string(),
            item: PantryItem {
                id: Uuid::new_v4(),
                household_id: "hh-1".to_string(),
                name: "Butter".to_string(),
                quantity: 1.0,
                unit: "pcs".to_string(),
                category: "dairy".to_string(),
                expires_at: None,
                version: 1,
                last_writer_id: "erin".to_string(),
                last_writer_device: "phone".to_string(),
                last_write_at: 1,
                deleted_at: None,
            },
            origin,
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_events() {
        let feed = ChangeFeed::new(8);
        let mut rx = feed.subscribe();

        feed.publish(event(ChangeOrigin::Local));
        feed.publish(event(ChangeOrigin::Sync));

        assert_eq!(rx.recv().await.unwrap().origin, ChangeOrigin::Local);
        assert_eq!(rx.recv().await.unwrap().origin, ChangeOrigin::Sync);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let feed = ChangeFeed::default();
        feed.publish(event(ChangeOrigin::Local));
    }
}
