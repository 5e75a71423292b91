//! Event Bus (C10): in-process pub/sub used by the Device Manager,
//! Recording Engine and Controller to notify the RPC Server of device and
//! recording state changes.

pub mod types;

pub use types::DomainEvent;

use tokio::sync::broadcast;

/// Ring buffer capacity per subscriber. A full queue drops the oldest
/// event for that subscriber; `tokio::sync::broadcast` reports this to the
/// lagging receiver as `Lagged(n)`, which callers use as the drop counter
/// required by §4.10.
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish to all subscribers. Fire-and-forget: with no subscribers
    /// this is a no-op, not an error.
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
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
    use crate::device::DeviceStatus;

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::CameraStatusUpdate {
            device: "/dev/video0".to_string(),
            status: DeviceStatus::Connected,
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, DomainEvent::CameraStatusUpdate { .. }));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(DomainEvent::SystemError {
            module: "test".to_string(),
            message: "boom".to_string(),
        });

        assert!(matches!(rx1.recv().await.unwrap(), DomainEvent::SystemError { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), DomainEvent::SystemError { .. }));
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(DomainEvent::SystemError {
            module: "test".to_string(),
            message: "boom".to_string(),
        });
    }
}
