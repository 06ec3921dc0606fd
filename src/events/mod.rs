//! Event system for streamer state notifications
//!
//! Lifecycle changes (viewer attached, session reset, stream started) are
//! broadcast so applications can react without polling the manager.

pub mod types;

pub use types::StreamEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Broadcast bus for [`StreamEvent`]s
///
/// # Example
///
/// ```no_run
/// use vision_rtc::events::{EventBus, StreamEvent};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(StreamEvent::ViewerConnected { client_id: "c1".to_string() });
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("{}", event.event_name());
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish to all subscribers; dropped when nobody listens
    pub fn publish(&self, event: StreamEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events
    ///
    /// A subscriber that falls more than the channel capacity behind
    /// receives `Lagged` and misses the overwritten events.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(StreamEvent::SessionReset { generation: 1 });

        let event = rx.recv().await.unwrap();
        assert_eq!(event, StreamEvent::SessionReset { generation: 1 });
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(StreamEvent::Stopped);

        assert_eq!(rx1.recv().await.unwrap(), StreamEvent::Stopped);
        assert_eq!(rx2.recv().await.unwrap(), StreamEvent::Stopped);
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(StreamEvent::KeyframeReady);
    }
}
