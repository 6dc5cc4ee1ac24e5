//! Home Assistant MQTT discovery
//!
//! Builds typed device and entity descriptors and publishes them retained
//! on the config topics given by `TopicNamer`. Publishing twice is
//! harmless: the topics and ids are deterministic, so Home Assistant
//! updates the existing entities instead of adding new ones.

use crate::device::Device;
use crate::entities::{Entity, EntityKind, CONTAINER_ENTITIES, DEVICE_ENTITIES};
use crate::error::PublishError;
use crate::mqtt::{Publish, PublishReport};
use crate::topics::TopicNamer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MANUFACTURER: &str = "SentryLab";

/// Shared `device` block: identical on every entity so Home Assistant
/// groups them under one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub sw_version: String,
}

/// Discovery config payload of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub unique_id: String,
    pub object_id: String,
    pub state_topic: String,
    pub value_template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
    pub device: DeviceDescriptor,
}

impl EntityDescriptor {
    fn new(entity: &Entity, name: String, unique_id: String, state_topic: String, device: DeviceDescriptor) -> Self {
        let binary = entity.kind == EntityKind::BinarySensor;
        Self {
            name,
            object_id: unique_id.clone(),
            unique_id,
            state_topic,
            value_template: entity.value_template.to_string(),
            device_class: entity.device_class.map(String::from),
            icon: entity.icon.map(String::from),
            payload_on: entity.payload_on.filter(|_| binary).map(String::from),
            payload_off: entity.payload_off.filter(|_| binary).map(String::from),
            device,
        }
    }
}

pub struct DiscoveryPublisher {
    namer: TopicNamer,
    mqtt: Arc<dyn Publish>,
}

impl DiscoveryPublisher {
    pub fn new(namer: TopicNamer, mqtt: Arc<dyn Publish>) -> Self {
        Self { namer, mqtt }
    }

    pub fn device_descriptor(&self, device: &Device) -> DeviceDescriptor {
        DeviceDescriptor {
            identifiers: vec![self.namer.namespace_id(device)],
            name: device.display_name().to_string(),
            model: format!("Proxmox {}", device.kind()),
            manufacturer: MANUFACTURER.to_string(),
            sw_version: format!("SentryLab v{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn entity_descriptor(&self, device: &Device, entity: &Entity) -> EntityDescriptor {
        EntityDescriptor::new(
            entity,
            entity.label.to_string(),
            self.namer.unique_id(device, entity),
            self.namer.entity_state_topic(device, entity),
            self.device_descriptor(device),
        )
    }

    pub fn container_descriptor(&self, device: &Device, container: &str, entity: &Entity) -> EntityDescriptor {
        EntityDescriptor::new(
            entity,
            format!("{} {}", container, entity.label),
            self.namer.container_unique_id(device, container, entity),
            self.namer.container_entity_state_topic(device, container, entity),
            self.device_descriptor(device),
        )
    }

    /// Publish the retained discovery config of one device-level entity.
    pub async fn publish_discovery(&self, device: &Device, entity: &Entity) -> Result<(), PublishError> {
        let topic = self.namer.config_topic(device, entity);
        let descriptor = self.entity_descriptor(device, entity);
        self.send(&topic, &descriptor).await
    }

    pub async fn publish_container_discovery(
        &self,
        device: &Device,
        container: &str,
        entity: &Entity,
    ) -> Result<(), PublishError> {
        let topic = self.namer.container_config_topic(device, container, entity);
        let descriptor = self.container_descriptor(device, container, entity);
        self.send(&topic, &descriptor).await
    }

    /// Publish every device-level entity of the catalog.
    pub async fn publish_device(&self, device: &Device) -> PublishReport {
        let mut report = PublishReport::default();
        for entity in DEVICE_ENTITIES.iter() {
            let topic = self.namer.config_topic(device, entity);
            report.record(&topic, self.publish_discovery(device, entity).await);
        }
        self.log_report(&device.to_string(), report);
        report
    }

    /// Publish every container-level entity for one container.
    pub async fn publish_container(&self, device: &Device, container: &str) -> PublishReport {
        let mut report = PublishReport::default();
        for entity in CONTAINER_ENTITIES.iter() {
            let topic = self.namer.container_config_topic(device, container, entity);
            report.record(&topic, self.publish_container_discovery(device, container, entity).await);
        }
        self.log_report(&format!("{} container {}", device, container), report);
        report
    }

    async fn send(&self, topic: &str, descriptor: &EntityDescriptor) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(descriptor).map_err(|source| PublishError::Encode {
            topic: topic.to_string(),
            source,
        })?;
        debug!("Discovery config -> {}", topic);
        self.mqtt.publish(topic, payload, true).await
    }

    fn log_report(&self, what: &str, report: PublishReport) {
        if report.failed == 0 {
            info!("Published discovery for {} ({} entities)", what, report.attempted);
        } else {
            warn!(
                "Discovery for {} incomplete: {}/{} entities failed",
                what, report.failed, report.attempted
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopicSettings;
    use crate::device::GuestKind;
    use crate::entities::{device_entity, metric};
    use crate::mqtt::{OfflinePublisher, OfflineReason};

    fn publisher() -> DiscoveryPublisher {
        DiscoveryPublisher::new(
            TopicNamer::new(&TopicSettings::default()),
            Arc::new(OfflinePublisher::new(OfflineReason::DryRun)),
        )
    }

    #[test]
    fn test_entity_descriptor_fields() {
        let discovery = publisher();
        let device = Device::new("pve1", 101, GuestKind::Ct, Some("web"));
        let descriptor = discovery.entity_descriptor(&device, device_entity(metric::DOCKER_STATUS).unwrap());

        assert_eq!(descriptor.unique_id, "sentrylab_pve1_101_docker_status");
        assert_eq!(descriptor.object_id, descriptor.unique_id);
        assert_eq!(descriptor.state_topic, "sentrylab/pve1/101/docker_status");
        assert_eq!(descriptor.value_template, "{{ value_json.status }}");
        assert_eq!(descriptor.device.identifiers, vec!["sentrylab_pve1_101"]);
        assert_eq!(descriptor.device.model, "Proxmox CT");
        assert!(descriptor.payload_on.is_none());
    }

    #[test]
    fn test_optional_fields_omitted() {
        let discovery = publisher();
        let device = Device::new("pve1", 101, GuestKind::Ct, None);
        let json = serde_json::to_value(
            discovery.entity_descriptor(&device, device_entity(metric::LAST_MONITOR_TIME).unwrap()),
        )
        .unwrap();

        assert_eq!(json["device_class"], "timestamp");
        assert!(json.get("icon").is_none());
        assert!(json.get("payload_on").is_none());
    }

    #[test]
    fn test_binary_sensor_payloads() {
        let discovery = publisher();
        let device = Device::new("pve1", 101, GuestKind::Vm, None);
        let deployed = discovery.entity_descriptor(&device, device_entity(metric::DEPLOYED).unwrap());
        assert_eq!(deployed.payload_on.as_deref(), Some("true"));
        assert_eq!(deployed.payload_off.as_deref(), Some("false"));

        let container = discovery.container_descriptor(&device, "nginx", &CONTAINER_ENTITIES[0]);
        assert_eq!(container.name, "nginx Status");
        assert_eq!(container.state_topic, "sentrylab/pve1/101/nginx/state");
        assert_eq!(container.payload_on.as_deref(), Some("True"));
    }

    #[test]
    fn test_device_block_identical_across_entities() {
        let discovery = publisher();
        let device = Device::new("pve1", 101, GuestKind::Ct, Some("web"));
        let blocks: Vec<String> = DEVICE_ENTITIES
            .iter()
            .map(|e| serde_json::to_string(&discovery.entity_descriptor(&device, e).device).unwrap())
            .chain(
                CONTAINER_ENTITIES
                    .iter()
                    .map(|e| serde_json::to_string(&discovery.container_descriptor(&device, "db", e).device).unwrap()),
            )
            .collect();
        assert!(blocks.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_publish_device_counts_catalog() {
        let discovery = publisher();
        let device = Device::new("pve1", 101, GuestKind::Ct, None);
        let report = discovery.publish_device(&device).await;
        assert_eq!(report.attempted, DEVICE_ENTITIES.len());
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_unavailable_broker_is_soft_failure() {
        let discovery = DiscoveryPublisher::new(
            TopicNamer::new(&TopicSettings::default()),
            Arc::new(OfflinePublisher::new(OfflineReason::Unavailable)),
        );
        let device = Device::new("pve1", 101, GuestKind::Ct, None);
        let report = discovery.publish_container(&device, "nginx").await;
        assert_eq!(report.attempted, CONTAINER_ENTITIES.len());
        assert_eq!(report.failed, CONTAINER_ENTITIES.len());
    }
}
