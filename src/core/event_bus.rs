// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/wattscope

//! Event bus for inter-component communication
//!
//! Broadcasts are fire-and-forget: nothing in the detection pipeline ever
//! waits on a subscriber, and a send with no receivers is not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::appliances::ApplianceState;
use crate::detection::{MatchResult, PowerEvent};
use crate::meter::Sample;

/// Broadcast topics, mirroring what the dashboard subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    DataUpdate,
    ApplianceUpdate,
    ApplianceList,
    UnidentifiedEvent,
    ApplianceLabeled,
}

/// Generic notification wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub topic: Topic,
    pub timestamp: DateTime<Utc>,
    pub payload: NotificationPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationPayload {
    Sample(Sample),
    ApplianceUpdate(ApplianceState),
    ApplianceList(Vec<ApplianceState>),
    Unidentified {
        event_id: i64,
        event: PowerEvent,
    },
    Labeled {
        event_id: i64,
        appliance_name: String,
        power_change: Option<f64>,
    },
}

/// Central pub/sub bus between the monitor and the outward-facing layers.
pub struct EventBus {
    sample_tx: broadcast::Sender<Sample>,
    event_tx: broadcast::Sender<(i64, PowerEvent, Option<MatchResult>)>,
    notification_tx: broadcast::Sender<Notification>,
    counter: std::sync::atomic::AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sample_tx, _) = broadcast::channel(capacity);
        let (event_tx, _) = broadcast::channel(capacity);
        let (notification_tx, _) = broadcast::channel(capacity);

        Self {
            sample_tx,
            event_tx,
            notification_tx,
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn publish_sample(&self, sample: Sample) {
        let _ = self.sample_tx.send(sample.clone());
        self.notify(Topic::DataUpdate, NotificationPayload::Sample(sample));
    }

    pub fn publish_event(&self, event_id: i64, event: PowerEvent, matched: Option<MatchResult>) {
        let _ = self.event_tx.send((event_id, event.clone(), matched.clone()));
        if matched.is_none() {
            self.notify(Topic::UnidentifiedEvent, NotificationPayload::Unidentified { event_id, event });
        }
    }

    pub fn publish_appliance_update(&self, state: ApplianceState) {
        self.notify(Topic::ApplianceUpdate, NotificationPayload::ApplianceUpdate(state));
    }

    pub fn publish_appliance_list(&self, states: Vec<ApplianceState>) {
        self.notify(Topic::ApplianceList, NotificationPayload::ApplianceList(states));
    }

    pub fn publish_labeled(&self, event_id: i64, appliance_name: &str, power_change: Option<f64>) {
        self.notify(
            Topic::ApplianceLabeled,
            NotificationPayload::Labeled {
                event_id,
                appliance_name: appliance_name.to_string(),
                power_change,
            },
        );
    }

    fn notify(&self, topic: Topic, payload: NotificationPayload) {
        let id = self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let _ = self.notification_tx.send(Notification {
            id,
            topic,
            timestamp: Utc::now(),
            payload,
        });
    }

    pub fn subscribe_samples(&self) -> broadcast::Receiver<Sample> {
        self.sample_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<(i64, PowerEvent, Option<MatchResult>)> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notification_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new(16);
        bus.publish_sample(Sample::new(200.0));
        bus.publish_labeled(1, "Kettle", Some(1500.0));
    }

    #[tokio::test]
    async fn notifications_carry_increasing_ids() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe_notifications();

        bus.publish_sample(Sample::new(100.0));
        bus.publish_sample(Sample::new(101.0));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.topic, Topic::DataUpdate);
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn unidentified_events_reach_the_bus() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe_notifications();

        let event = PowerEvent {
            detected_at: Utc::now(),
            kind: crate::detection::EventKind::On,
            power_before: 200.0,
            power_after: 700.0,
            power_change: 500.0,
            transient_magnitude: 500.0,
            was_steady_before: true,
            confidence: 0.9,
            voltage: None,
            current: None,
            power_factor: None,
            identified: false,
        };
        bus.publish_event(7, event, None);

        let n = rx.recv().await.unwrap();
        assert_eq!(n.topic, Topic::UnidentifiedEvent);
    }
}
