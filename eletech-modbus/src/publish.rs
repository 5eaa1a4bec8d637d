//! Zenoh-backed [`StateSink`].
//!
//! Sinks run inside poll callbacks and must not block, so they only queue
//! events. A single [`StatePublisher`] task drains the queue and puts each
//! event on Zenoh.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use eletech_bridge_framework::{PublishStats, Publisher};
use eletech_common::{ChannelState, DeviceStatus, StateValue, StatusUpdate};

use crate::sink::StateSink;

/// Something a thing produced.
#[derive(Debug, Clone)]
pub enum StateEvent {
    Channel(ChannelState),
    Status(StatusUpdate),
}

/// Sink of one thing, feeding a [`StatePublisher`].
#[derive(Debug, Clone)]
pub struct ZenohStateSink {
    thing: String,
    tx: mpsc::UnboundedSender<StateEvent>,
}

impl ZenohStateSink {
    fn new(thing: impl Into<String>, tx: mpsc::UnboundedSender<StateEvent>) -> Self {
        Self {
            thing: thing.into(),
            tx,
        }
    }

    fn send(&self, event: StateEvent) {
        if self.tx.send(event).is_err() {
            debug!(thing = %self.thing, "State publisher stopped, dropping event");
        }
    }
}

impl StateSink for ZenohStateSink {
    fn publish(&self, channel_id: &str, value: StateValue) {
        self.send(StateEvent::Channel(ChannelState::new(
            &self.thing,
            channel_id,
            value,
        )));
    }

    fn set_device_status(&self, status: DeviceStatus, description: Option<&str>) {
        self.send(StateEvent::Status(StatusUpdate::new(
            &self.thing,
            status,
            description.map(str::to_string),
        )));
    }
}

/// Publishes the events of every [`ZenohStateSink`] it handed out.
pub struct StatePublisher {
    publisher: Publisher,
    tx: mpsc::UnboundedSender<StateEvent>,
    rx: mpsc::UnboundedReceiver<StateEvent>,
}

impl StatePublisher {
    pub fn new(publisher: Publisher) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { publisher, tx, rx }
    }

    /// A sink publishing under `thing`.
    pub fn sink_for(&self, thing: &str) -> ZenohStateSink {
        ZenohStateSink::new(thing, self.tx.clone())
    }

    /// Publish events until every sink has been dropped.
    pub async fn run(self) -> PublishStats {
        let Self {
            publisher,
            tx,
            mut rx,
        } = self;
        drop(tx);

        let mut stats = PublishStats::default();
        while let Some(event) = rx.recv().await {
            let result = match &event {
                StateEvent::Channel(state) => publisher.publish_channel(state).await,
                StateEvent::Status(update) => publisher.publish_status(update).await,
            };

            stats.record(&result);
            if let Err(e) = result {
                warn!("Failed to publish {:?}: {}", event, e);
            }
        }

        info!(
            published = stats.success,
            failed = stats.failed,
            "State publisher stopped ({:.1}% success)",
            stats.success_rate()
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eletech_common::OfflineReason;

    #[test]
    fn test_sink_queues_channel_value() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ZenohStateSink::new("boiler", tx);

        sink.publish("channel1", StateValue::Decimal(23.5));

        match rx.try_recv().unwrap() {
            StateEvent::Channel(state) => {
                assert_eq!(state.thing, "boiler");
                assert_eq!(state.channel, "channel1");
                assert_eq!(state.value, StateValue::Decimal(23.5));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_sink_queues_status() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ZenohStateSink::new("boiler", tx);

        let status = DeviceStatus::Offline(OfflineReason::CommunicationError);
        sink.set_device_status(status, Some("Error with read: timeout"));

        match rx.try_recv().unwrap() {
            StateEvent::Status(update) => {
                assert_eq!(update.thing, "boiler");
                assert_eq!(update.status, status);
                assert_eq!(
                    update.description.as_deref(),
                    Some("Error with read: timeout")
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_sink_survives_closed_publisher() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = ZenohStateSink::new("boiler", tx);
        drop(rx);

        sink.publish("channel1", StateValue::Decimal(1.0));
        sink.set_device_status(DeviceStatus::Online, None);
    }
}
