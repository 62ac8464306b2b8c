//! The internal event bus.
//!
//! A single broadcast source with many independent readers: one receiver per
//! active stream connection. Publishing never blocks on slow consumers; each
//! subscriber owns a bounded buffer and a subscriber that falls behind skips
//! the overwritten events (drop-oldest) rather than stalling the bus. The
//! skip is surfaced to the delivery task so it can be logged and counted.

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// Default per-subscriber buffer size.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// One event on the bus: a hierarchical slash-delimited tag plus a structured
/// payload, stamped at publish time. Immutable once emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub tag: String,
    pub data: Value,
    pub stamp: OffsetDateTime,
}

impl Event {
    /// The `{tag, data}` wire representation pushed to stream clients.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "tag": self.tag,
            "data": self.data,
        })
    }
}

/// What a subscriber pulls off the bus: either the next event, or a notice
/// that `skipped` events were dropped because the subscriber lagged.
#[derive(Debug)]
pub enum BusMessage {
    Event(Event),
    Lagged(u64),
}

/// The shared broadcast source.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    /// Fire an event. The payload is stamped with the publish time under
    /// `_stamp` if the payload is a mapping. Returns the number of
    /// subscribers the event was delivered to.
    pub fn publish(&self, tag: impl Into<String>, mut data: Value) -> usize {
        let stamp = OffsetDateTime::now_utc();
        if let Value::Object(map) = &mut data {
            map.insert(
                "_stamp".to_string(),
                Value::String(
                    stamp
                        .format(&time::format_description::well_known::Rfc3339)
                        .unwrap_or_default(),
                ),
            );
        }
        let event = Event {
            tag: tag.into(),
            data,
            stamp,
        };
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// A lazy, infinite, non-restartable reader of the bus. Dropping it releases
/// the subscription; a reconnecting client gets a fresh one and never sees
/// events published while it was away.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Wait for the next message. Returns `None` once the bus itself is gone
    /// (process teardown).
    pub async fn recv(&mut self) -> Option<BusMessage> {
        match self.rx.recv().await {
            Ok(event) => Some(BusMessage::Event(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Some(BusMessage::Lagged(skipped))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_reach_all_current_subscribers() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish("drover/test/one", json!({"n": 1}));

        for sub in [&mut a, &mut b] {
            match sub.recv().await {
                Some(BusMessage::Event(ev)) => {
                    assert_eq!(ev.tag, "drover/test/one");
                    assert_eq!(ev.data["n"], 1);
                    assert!(ev.data["_stamp"].is_string());
                }
                other => panic!("expected event, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn dropping_one_subscriber_does_not_disturb_another() {
        let bus = EventBus::new(16);
        let a = bus.subscribe();
        let mut b = bus.subscribe();

        drop(a);
        bus.publish("drover/test/two", json!({}));

        match b.recv().await {
            Some(BusMessage::Event(ev)) => assert_eq!(ev.tag, "drover/test/two"),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn late_subscriber_sees_only_later_events() {
        let bus = EventBus::new(16);
        bus.publish("drover/test/early", json!({}));

        let mut sub = bus.subscribe();
        bus.publish("drover/test/late", json!({}));

        match sub.recv().await {
            Some(BusMessage::Event(ev)) => assert_eq!(ev.tag, "drover/test/late"),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_skips_oldest_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for n in 0..5 {
            bus.publish("drover/test/burst", json!({"n": n}));
        }

        match sub.recv().await {
            Some(BusMessage::Lagged(skipped)) => assert!(skipped >= 1),
            other => panic!("expected lag notice, got {other:?}"),
        }
        // The newest events are still there after the skip.
        match sub.recv().await {
            Some(BusMessage::Event(ev)) => assert_eq!(ev.tag, "drover/test/burst"),
            other => panic!("expected event, got {other:?}"),
        }
    }
}
