//! Typed, topic-based publish/subscribe notification bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Safety`] | Estop triggered / released notifications |
//! | [`Topic::Faults`] | Module faults, silent buses |
//! | [`Topic::Telemetry`] | Periodic status snapshots |

use fieldos_types::Event;
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the notification bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Stop-source transitions published by the safety coordinator.
    Safety,
    /// Module and bus faults that did not stop the process.
    Faults,
    /// Periodic status snapshots from the status poll.
    Telemetry,
}

/// Shared notification bus. Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    safety: broadcast::Sender<Event>,
    faults: broadcast::Sender<Event>,
    telemetry: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (safety, _) = broadcast::channel(capacity);
        let (faults, _) = broadcast::channel(capacity);
        let (telemetry, _) = broadcast::channel(capacity);
        Self {
            safety,
            faults,
            telemetry,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    /// Having no subscriber is a normal condition and yields `0`.
    pub fn publish_to(&self, topic: Topic, event: Event) -> usize {
        match self.topic_sender(topic).send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(_)) => {
                trace!(?topic, "no subscribers");
                0
            }
        }
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Safety => &self.safety,
            Topic::Faults => &self.faults,
            Topic::Telemetry => &self.telemetry,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// * `Err(RecvError::Lagged(n))` – the subscriber fell behind and `n`
    ///   messages were dropped.  The caller decides whether to continue.
    /// * `Err(RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldos_types::{EventPayload, SafetyState};
    use std::collections::BTreeMap;

    fn make_event(source: &str) -> Event {
        Event::new(
            source,
            EventPayload::EstopTriggered {
                state: SafetyState::SoftStopped,
                sources: BTreeMap::new(),
            },
        )
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.publish_to(Topic::Safety, make_event("test")), 0);
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut subscriber1 = bus.subscribe_to(Topic::Safety);
        let mut subscriber2 = bus.subscribe_to(Topic::Safety);

        let event = make_event("fieldos-kernel::safety");
        assert_eq!(bus.publish_to(Topic::Safety, event.clone()), 2);

        assert_eq!(subscriber1.recv().await?.id, event.id);
        assert_eq!(subscriber2.recv().await?.id, event.id);
        assert_eq!(subscriber1.topic(), Topic::Safety);
        Ok(())
    }

    /// A subscriber on `Faults` must not receive events published to
    /// `Safety` because they are routed through separate channels.
    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() {
        let bus = EventBus::default();
        let mut faults = bus.subscribe_to(Topic::Faults);
        let _safety = bus.subscribe_to(Topic::Safety);

        bus.publish_to(Topic::Safety, make_event("fieldos-kernel::safety"));

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), faults.recv()).await;
        assert!(result.is_err(), "Faults subscriber must not see a Safety event");
    }

    /// Flooding a low-capacity channel while a subscriber sleeps must produce
    /// a `Lagged` error rather than panicking or blocking.
    #[tokio::test]
    async fn topic_channel_lag_on_slow_subscriber() {
        let bus = EventBus::new(16);
        let mut slow = bus.subscribe_to(Topic::Telemetry);
        for _ in 0..1_000 {
            bus.publish_to(Topic::Telemetry, make_event("flood"));
        }
        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }
}
