//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others, and so that a cycle never waits on an observer.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Telemetry`] | One summary per decision cycle |
//! | [`Topic::ActionLifecycle`] | Every `running` / `complete` / `failed` transition |
//! | [`Topic::SystemAlerts`] | Degraded sensors, identity anomalies |

use mindlink_types::Event;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Telemetry,
    ActionLifecycle,
    SystemAlerts,
}

/// Shared event bus.  Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    telemetry: broadcast::Sender<Event>,
    action_lifecycle: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (telemetry, _) = broadcast::channel(capacity);
        let (action_lifecycle, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            telemetry,
            action_lifecycle,
            system_alerts,
        }
    }

    /// Publish `event` to `topic`.
    ///
    /// Returns the number of subscribers that were handed the event.  Having
    /// nobody listening is normal and yields `0`.
    pub fn publish(&self, topic: Topic, event: Event) -> usize {
        match self.sender(topic).send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                trace!(?topic, source = %event.source, "no subscribers");
                0
            }
        }
    }

    /// Subscribe to a single topic.
    pub fn subscribe(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.sender(topic).subscribe(),
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.sender(topic).receiver_count()
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::ActionLifecycle => &self.action_lifecycle,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event, skipping over any the receiver lagged past.
    ///
    /// Returns `None` once the bus has been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "observer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take an already-buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindlink_types::{EventPayload, MarkerId};
    use std::time::Duration;

    fn alert(details: &str) -> Event {
        Event::new(
            "mindlink-middleware::test",
            EventPayload::IdentityAnomaly {
                marker: MarkerId::Fiducial(1),
                details: details.to_string(),
            },
        )
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(Topic::Telemetry, alert("x")), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives_the_event() {
        let bus = EventBus::default();
        let mut a = bus.subscribe(Topic::SystemAlerts);
        let mut b = bus.subscribe(Topic::SystemAlerts);
        let event = alert("dup");
        assert_eq!(bus.publish(Topic::SystemAlerts, event.clone()), 2);

        assert_eq!(a.recv().await.unwrap().id, event.id);
        assert_eq!(b.recv().await.unwrap().id, event.id);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = EventBus::default();
        let mut lifecycle = bus.subscribe(Topic::ActionLifecycle);
        let _alerts = bus.subscribe(Topic::SystemAlerts);
        bus.publish(Topic::SystemAlerts, alert("x"));

        let result = tokio::time::timeout(Duration::from_millis(50), lifecycle.recv()).await;
        assert!(result.is_err(), "lifecycle subscriber must not see alerts");
        assert_eq!(lifecycle.topic(), Topic::ActionLifecycle);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let bus = EventBus::new(4);
        let mut slow = bus.subscribe(Topic::Telemetry);
        for i in 0..20 {
            bus.publish(Topic::Telemetry, alert(&i.to_string()));
        }
        let event = slow.recv().await.unwrap();
        match event.payload {
            EventPayload::IdentityAnomaly { details, .. } => assert_eq!(details, "16"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn try_recv_drains_buffer() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe(Topic::Telemetry);
        bus.publish(Topic::Telemetry, alert("a"));
        assert!(rx.try_recv().is_some());
        assert!(rx.try_recv().is_none());
        assert_eq!(bus.subscriber_count(Topic::Telemetry), 1);
    }
}
