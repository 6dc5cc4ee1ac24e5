//! Catalog of the Home Assistant entities published for each device
//!
//! The catalog is fixed and enumerable: discovery publishes it, removal
//! walks it, and the value templates declared here must match the payloads
//! built in `state`.

use serde::Serialize;
use std::fmt;

/// State metric names, i.e. the last level of a state topic.
pub mod metric {
    pub const STATUS: &str = "status";
    pub const DOCKER_STATUS: &str = "docker_status";
    pub const DOCKER_VERSION: &str = "docker_version";
    pub const DEPLOYED: &str = "deployed";
    pub const DEPLOYED_TIME: &str = "deployed_time";
    pub const LAST_DISCOVERY_TIME: &str = "last_discovery_time";
    pub const LAST_MONITOR_TIME: &str = "last_monitor_time";
    pub const SUMMARY: &str = "summary";
    pub const CONTAINERS_TOTAL: &str = "containers_total";
    pub const CONTAINERS_RUNNING: &str = "containers_running";
    pub const CONTAINERS_STOPPED: &str = "containers_stopped";
    /// Shared JSON state topic of every container entity
    pub const CONTAINER_STATE: &str = "state";
}

/// Home Assistant MQTT component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Sensor,
    BinarySensor,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Sensor => "sensor",
            EntityKind::BinarySensor => "binary_sensor",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One monitored attribute of a device or container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entity {
    pub kind: EntityKind,
    pub metric: &'static str,
    /// Metric of the state topic this entity reads. Several entities can
    /// read fields of one JSON state topic.
    pub state_metric: &'static str,
    pub label: &'static str,
    pub value_template: &'static str,
    pub device_class: Option<&'static str>,
    pub icon: Option<&'static str>,
    pub payload_on: Option<&'static str>,
    pub payload_off: Option<&'static str>,
}

impl Entity {
    const fn sensor(metric: &'static str, label: &'static str, value_template: &'static str) -> Self {
        Self {
            kind: EntityKind::Sensor,
            metric,
            state_metric: metric,
            label,
            value_template,
            device_class: None,
            icon: None,
            payload_on: None,
            payload_off: None,
        }
    }

    const fn binary(
        metric: &'static str,
        label: &'static str,
        value_template: &'static str,
        payload_on: &'static str,
        payload_off: &'static str,
    ) -> Self {
        Self {
            kind: EntityKind::BinarySensor,
            payload_on: Some(payload_on),
            payload_off: Some(payload_off),
            ..Self::sensor(metric, label, value_template)
        }
    }

    const fn reads(self, state_metric: &'static str) -> Self {
        Self { state_metric, ..self }
    }

    const fn class(self, device_class: &'static str) -> Self {
        Self {
            device_class: Some(device_class),
            ..self
        }
    }

    const fn icon(self, icon: &'static str) -> Self {
        Self {
            icon: Some(icon),
            ..self
        }
    }

    /// Field names a JSON payload must carry for this entity's template,
    /// e.g. `["status"]` for `{{ value_json.status }}`.
    pub fn json_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        let mut rest = self.value_template;
        while let Some(start) = rest.find("value_json.") {
            rest = &rest[start + "value_json.".len()..];
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            fields.push(&rest[..end]);
            rest = &rest[end..];
        }
        fields
    }
}

const PLAIN: &str = "{{ value }}";

pub const DEVICE_ENTITIES: [Entity; 10] = [
    Entity::sensor(metric::STATUS, "Status", PLAIN).icon("mdi:server"),
    Entity::sensor(metric::DOCKER_STATUS, "Docker Status", "{{ value_json.status }}").icon("mdi:docker"),
    Entity::sensor(metric::DOCKER_VERSION, "Docker Version", "{{ value_json.version }}")
        .reads(metric::DOCKER_STATUS)
        .icon("mdi:tag"),
    Entity::binary(metric::DEPLOYED, "Deployed", PLAIN, "true", "false").icon("mdi:package-variant-closed"),
    Entity::sensor(metric::DEPLOYED_TIME, "Deployed Time", PLAIN).class("timestamp"),
    Entity::sensor(metric::LAST_DISCOVERY_TIME, "Last Discovery", PLAIN).class("timestamp"),
    Entity::sensor(metric::LAST_MONITOR_TIME, "Last Monitor", PLAIN).class("timestamp"),
    Entity::sensor(metric::CONTAINERS_TOTAL, "Total Containers", "{{ value_json.total }}")
        .reads(metric::SUMMARY)
        .icon("mdi:counter"),
    Entity::sensor(metric::CONTAINERS_RUNNING, "Running Containers", "{{ value_json.running }}")
        .reads(metric::SUMMARY)
        .icon("mdi:play-circle"),
    Entity::sensor(metric::CONTAINERS_STOPPED, "Stopped Containers", "{{ value_json.stopped }}")
        .reads(metric::SUMMARY)
        .icon("mdi:stop-circle"),
];

pub const CONTAINER_ENTITIES: [Entity; 6] = [
    Entity::binary("status", "Status", "{{ value_json.running }}", "True", "False")
        .reads(metric::CONTAINER_STATE)
        .class("running")
        .icon("mdi:docker"),
    Entity::sensor("state", "State", "{{ value_json.state }}").icon("mdi:information-outline"),
    Entity::sensor("uptime", "Uptime", "{{ value_json.uptime }}")
        .reads(metric::CONTAINER_STATE)
        .icon("mdi:clock-outline"),
    Entity::sensor("health", "Health", "{{ value_json.health | default('N/A') }}")
        .reads(metric::CONTAINER_STATE)
        .icon("mdi:heart-pulse"),
    Entity::sensor("image", "Image", "{{ value_json.image }}")
        .reads(metric::CONTAINER_STATE)
        .icon("mdi:package-variant"),
    Entity::sensor("image_version", "Version", "{{ value_json.image_version }}")
        .reads(metric::CONTAINER_STATE)
        .icon("mdi:tag"),
];

pub fn device_entity(metric_name: &str) -> Option<&'static Entity> {
    DEVICE_ENTITIES.iter().find(|e| e.metric == metric_name)
}
