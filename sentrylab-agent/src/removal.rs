//! Device removal
//!
//! MQTT has no wildcard delete: a retained message disappears only when an
//! empty retained payload is published on its exact topic. Removal therefore
//! walks the entity catalog plus the configured legacy topics and clears
//! each topic independently.

use crate::device::Device;
use crate::entities::{CONTAINER_ENTITIES, DEVICE_ENTITIES};
use crate::mqtt::{Publish, PublishReport};
use crate::topics::TopicNamer;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalReport {
    /// Clears sent, whether or not the broker held a message there
    pub attempted: usize,
    pub failed: usize,
    /// Broker unreachable, nothing was attempted
    pub skipped: bool,
}

pub struct TopicRemover {
    namer: TopicNamer,
    mqtt: Arc<dyn Publish>,
    clear_state: bool,
}

impl TopicRemover {
    pub fn new(namer: TopicNamer, mqtt: Arc<dyn Publish>, clear_state: bool) -> Self {
        Self {
            namer,
            mqtt,
            clear_state,
        }
    }

    /// Every topic removal clears for this device, without duplicates.
    pub fn topics_for(&self, device: &Device, containers: &[String]) -> Vec<String> {
        let mut topics = Vec::new();
        let mut push = |topic: String| {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        };

        for entity in DEVICE_ENTITIES.iter() {
            push(self.namer.config_topic(device, entity));
        }
        for container in containers {
            for entity in CONTAINER_ENTITIES.iter() {
                push(self.namer.container_config_topic(device, container, entity));
            }
        }

        if self.clear_state {
            for entity in DEVICE_ENTITIES.iter() {
                push(self.namer.entity_state_topic(device, entity));
            }
            for container in containers {
                for entity in CONTAINER_ENTITIES.iter() {
                    push(self.namer.container_entity_state_topic(device, container, entity));
                }
            }
        }

        for topic in self.namer.legacy_topics(device, containers) {
            push(topic);
        }

        topics
    }

    /// Clear every known topic of `device`. Never fails: an unreachable
    /// broker skips the removal, a failed clear does not stop the others.
    pub async fn remove_device(&self, device: &Device, containers: &[String]) -> RemovalReport {
        if !self.mqtt.is_available() {
            warn!("MQTT broker unavailable, topics of {} left in place", device);
            return RemovalReport {
                skipped: true,
                ..RemovalReport::default()
            };
        }

        let mut report = PublishReport::default();
        for topic in self.topics_for(device, containers) {
            debug!("Clearing {}", topic);
            report.record(&topic, self.mqtt.publish(&topic, Vec::new(), true).await);
        }

        info!(
            "Cleared {}/{} topics of {}",
            report.succeeded(),
            report.attempted,
            device
        );

        RemovalReport {
            attempted: report.attempted,
            failed: report.failed,
            skipped: false,
        }
    }
}
