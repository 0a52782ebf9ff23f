use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, SpaceId};

const CHANNEL_CAPACITY: usize = 256;

/// Fire-and-forget sink for committed domain events. Must never block or fail.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &Event);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: &Event) {}
}

/// In-process broadcast hub, one channel per space plus a firehose.
pub struct NotifyHub {
    channels: DashMap<SpaceId, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
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
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to events for one space. Creates the channel if needed.
    pub fn subscribe(&self, space_id: SpaceId) -> broadcast::Receiver<Event> {
        self.channels
            .entry(space_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        if let Some(sender) = self.channels.get(&event.space_id()) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
    }
}

impl Notifier for NotifyHub {
    fn notify(&self, event: &Event) {
        self.send(event);
    }
}

/// Drain a subscription into the debug log until the hub goes away.
pub async fn log_events(mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => tracing::debug!(?event, "event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event log lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let sid = Ulid::new();
        let mut rx = hub.subscribe(sid);

        let event = Event::SpaceFlagged { space_id: sid, available: false };
        hub.notify(&event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_space_not_delivered() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(Ulid::new());
        let mut all = hub.subscribe_all();

        let event = Event::SpaceCreated { space_id: Ulid::new() };
        hub.notify(&event);

        assert!(rx.try_recv().is_err());
        assert_eq!(all.recv().await.unwrap(), event);
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.notify(&Event::SpaceCreated { space_id: Ulid::new() });
        NullNotifier.notify(&Event::SpaceCreated { space_id: Ulid::new() });
    }
}
