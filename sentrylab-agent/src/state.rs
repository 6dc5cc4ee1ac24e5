//! State publication
//!
//! Values go out either as plain strings (read with `{{ value }}`) or as
//! JSON objects (read with `{{ value_json.<field> }}`). The JSON payload
//! types below are the counterpart of the value templates declared in
//! `entities`; a field removed here silently blanks an entity in Home
//! Assistant.

use crate::device::Device;
use crate::docker::{format_uptime, image_version, ContainerInspect, DockerInfo, DockerStatus};
use crate::entities::metric;
use crate::error::PublishError;
use crate::mqtt::{Publish, PublishReport};
use crate::topics::TopicNamer;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Payload of a state topic
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Text(String),
    /// Serialized JSON, field order as declared on the payload struct
    Json(String),
}

impl StateValue {
    pub fn text(value: impl Into<String>) -> Self {
        StateValue::Text(value.into())
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_string(value).map(StateValue::Json)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            StateValue::Text(text) | StateValue::Json(text) => text.clone().into_bytes(),
        }
    }
}

/// `docker_status` topic: `{"status","available","path","version"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerStatusPayload {
    pub status: DockerStatus,
    pub available: bool,
    pub path: Option<String>,
    pub version: Option<String>,
}

impl From<&DockerInfo> for DockerStatusPayload {
    fn from(info: &DockerInfo) -> Self {
        Self {
            status: info.status,
            available: info.path.is_some(),
            path: info.path.clone(),
            version: info.version.clone(),
        }
    }
}

/// `summary` topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
    pub timestamp: String,
}

impl SummaryPayload {
    pub fn from_containers(containers: &[ContainerInspect], now: DateTime<Utc>) -> Self {
        let running = containers.iter().filter(|c| c.state.running).count();
        Self {
            total: containers.len(),
            running,
            stopped: containers.len() - running,
            timestamp: timestamp(now),
        }
    }
}

/// `<container>/state` topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatePayload {
    pub running: bool,
    pub state: String,
    pub health: String,
    pub image: String,
    pub image_version: String,
    pub uptime: String,
    pub started_at: String,
    pub pid: i64,
    pub exit_code: i64,
    pub error: String,
    pub timestamp: String,
}

impl ContainerStatePayload {
    pub fn from_inspect(container: &ContainerInspect, now: DateTime<Utc>) -> Self {
        Self {
            running: container.state.running,
            state: container.state().to_string(),
            health: container.health(),
            image: container.config.image.clone(),
            image_version: image_version(&container.config.image),
            uptime: format_uptime(&container.state.started_at, now),
            started_at: container.state.started_at.clone(),
            pid: container.state.pid,
            exit_code: container.state.exit_code,
            error: container.state.error.clone(),
            timestamp: timestamp(now),
        }
    }
}

/// Timestamp format of every `timestamp` device-class sensor
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub struct StatePublisher {
    namer: TopicNamer,
    mqtt: Arc<dyn Publish>,
}

impl StatePublisher {
    pub fn new(namer: TopicNamer, mqtt: Arc<dyn Publish>) -> Self {
        Self { namer, mqtt }
    }

    pub async fn publish_state(&self, topic: &str, value: &StateValue, retain: bool) -> Result<(), PublishError> {
        debug!("State -> {} (retain={})", topic, retain);
        self.mqtt.publish(topic, value.to_bytes(), retain).await
    }

    /// Device status: `absent`, `stopped` or `running`
    pub async fn publish_status(&self, device: &Device, status: &str) -> Result<(), PublishError> {
        let topic = self.namer.state_topic(device, metric::STATUS);
        self.publish_state(&topic, &StateValue::text(status), true).await
    }

    pub async fn publish_docker(&self, device: &Device, docker: &DockerInfo) -> Result<(), PublishError> {
        let topic = self.namer.state_topic(device, metric::DOCKER_STATUS);
        let value = self.encode(&topic, &DockerStatusPayload::from(docker))?;
        self.publish_state(&topic, &value, true).await
    }

    /// `deployed` and, when known, `deployed_time`
    pub async fn publish_deployment(
        &self,
        device: &Device,
        deployed: bool,
        deployed_at: Option<DateTime<Utc>>,
    ) -> PublishReport {
        let mut report = PublishReport::default();

        let topic = self.namer.state_topic(device, metric::DEPLOYED);
        let value = StateValue::text(if deployed { "true" } else { "false" });
        report.record(&topic, self.publish_state(&topic, &value, true).await);

        if let Some(at) = deployed_at {
            report.record(
                &self.namer.state_topic(device, metric::DEPLOYED_TIME),
                self.publish_timestamp(device, metric::DEPLOYED_TIME, at).await,
            );
        }
        report
    }

    pub async fn publish_timestamp(
        &self,
        device: &Device,
        metric_name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PublishError> {
        let topic = self.namer.state_topic(device, metric_name);
        self.publish_state(&topic, &StateValue::text(timestamp(at)), true).await
    }

    pub async fn publish_summary(
        &self,
        device: &Device,
        containers: &[ContainerInspect],
        now: DateTime<Utc>,
    ) -> Result<(), PublishError> {
        let topic = self.namer.state_topic(device, metric::SUMMARY);
        let value = self.encode(&topic, &SummaryPayload::from_containers(containers, now))?;
        self.publish_state(&topic, &value, true).await
    }

    pub async fn publish_container(
        &self,
        device: &Device,
        container: &ContainerInspect,
        now: DateTime<Utc>,
    ) -> Result<(), PublishError> {
        let topic = self
            .namer
            .container_state_topic(device, container.container_name(), metric::CONTAINER_STATE);
        let value = self.encode(&topic, &ContainerStatePayload::from_inspect(container, now))?;
        self.publish_state(&topic, &value, true).await
    }

    fn encode<T: Serialize>(&self, topic: &str, payload: &T) -> Result<StateValue, PublishError> {
        StateValue::json(payload).map_err(|source| PublishError::Encode {
            topic: topic.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::parse_inspect;
    use chrono::TimeZone;

    #[test]
    fn test_docker_payload_shape() {
        let info = DockerInfo {
            status: DockerStatus::Running,
            path: Some("/usr/bin/docker".to_string()),
            version: Some("24.0.7".to_string()),
        };
        let json = StateValue::json(&DockerStatusPayload::from(&info)).unwrap();
        assert_eq!(
            String::from_utf8(json.to_bytes()).unwrap(),
            r#"{"status":"running","available":true,"path":"/usr/bin/docker","version":"24.0.7"}"#
        );
    }

    #[test]
    fn test_docker_payload_not_installed() {
        let info = DockerInfo {
            status: DockerStatus::NotInstalled,
            path: None,
            version: None,
        };
        let payload = DockerStatusPayload::from(&info);
        assert!(!payload.available);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["status"], "not_installed");
        assert!(json["version"].is_null());
    }

    #[test]
    fn test_summary_counts() {
        let containers = parse_inspect(
            r#"[{"Name":"/a","State":{"Running":true}},{"Name":"/b","State":{"Running":false}},{"Name":"/c","State":{"Running":true}}]"#,
        )
        .unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let summary = SummaryPayload::from_containers(&containers, now);
        assert_eq!((summary.total, summary.running, summary.stopped), (3, 2, 1));
        assert_eq!(summary.timestamp, "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_text_value_bytes() {
        assert_eq!(StateValue::text("absent").to_bytes(), b"absent".to_vec());
    }
}
