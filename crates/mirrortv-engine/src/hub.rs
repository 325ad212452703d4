//! Fan-out of session events to observers.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use mirrortv_ipc::{subscriber_channel, HubEvent, Roster};

struct Subscriber {
    id: u64,
    tx: Sender<HubEvent>,
}

/// Delivers every published event to every live subscriber.
///
/// Each subscriber has its own bounded queue. Publishing never blocks: a
/// subscriber whose queue is full is disconnected, and one whose receiver
/// was dropped is pruned.
#[derive(Default)]
pub struct BroadcastHub {
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Its first event is `snapshot` as a
    /// `roster-changed`.
    pub fn subscribe(&mut self, snapshot: Roster) -> Receiver<HubEvent> {
        let (tx, rx) = subscriber_channel();
        let id = self.next_id;
        self.next_id += 1;

        if tx.try_send(HubEvent::RosterChanged(snapshot)).is_err() {
            warn!(subscriber = id, "Failed to queue initial roster");
        }

        self.subscribers.push(Subscriber { id, tx });
        debug!(subscriber = id, total = self.subscriber_count(), "Subscriber added");
        rx
    }

    /// Offer `event` to every subscriber. Returns how many accepted it.
    pub fn publish(&mut self, event: HubEvent) -> usize {
        let name = event.name();
        let mut delivered = 0;

        self.subscribers.retain(|subscriber| match subscriber.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = subscriber.id, event = name, "Subscriber queue full, disconnecting");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(subscriber = subscriber.id, "Subscriber gone");
                false
            }
        });

        debug!(event = name, delivered, "Published event");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrortv_ipc::{ClientId, SUBSCRIBER_CHANNEL_CAPACITY};

    fn stopped(id: &str) -> HubEvent {
        HubEvent::SessionStopped {
            client_id: ClientId::from(id),
        }
    }

    #[test]
    fn test_subscriber_receives_snapshot_first() {
        let mut hub = BroadcastHub::new();
        let rx = hub.subscribe(Roster::new(Vec::new(), 10));
        hub.publish(stopped("a"));

        assert!(matches!(rx.try_recv(), Ok(HubEvent::RosterChanged(r)) if r.max == 10));
        assert!(matches!(rx.try_recv(), Ok(HubEvent::SessionStopped { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_events_arrive_in_publish_order() {
        let mut hub = BroadcastHub::new();
        let rx = hub.subscribe(Roster::default());
        let _ = rx.try_recv();

        for id in ["a", "b", "c"] {
            hub.publish(stopped(id));
        }

        let order: Vec<_> = rx
            .try_iter()
            .filter_map(|e| e.client_id().map(|c| c.to_string()))
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut hub = BroadcastHub::new();
        let keep = hub.subscribe(Roster::default());
        drop(hub.subscribe(Roster::default()));

        assert_eq!(hub.publish(stopped("a")), 1);
        assert_eq!(hub.subscriber_count(), 1);
        drop(keep);
    }

    #[test]
    fn test_stalled_subscriber_does_not_block_others() {
        let mut hub = BroadcastHub::new();
        let stalled = hub.subscribe(Roster::default());
        let live = hub.subscribe(Roster::default());

        for i in 0..SUBSCRIBER_CHANNEL_CAPACITY {
            hub.publish(stopped(&i.to_string()));
            while live.try_recv().is_ok() {}
        }

        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.publish(stopped("last")), 1);
        assert!(matches!(live.try_recv(), Ok(HubEvent::SessionStopped { .. })));
        assert_eq!(stalled.len(), SUBSCRIBER_CHANNEL_CAPACITY);
    }
}
