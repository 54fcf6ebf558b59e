use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-kennel broadcast hub. Front-desk clients subscribe to a kennel and
/// see every booking/occupancy event that touches it.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a kennel. Creates the channel if needed.
    pub fn subscribe(&self, kennel_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(kennel_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, kennel_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&kennel_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a kennel's channel (kennel deleted).
    pub fn remove(&self, kennel_id: &Ulid) {
        self.channels.remove(kennel_id);
    }
}
