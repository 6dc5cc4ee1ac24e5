//! MQTT topic naming
//!
//! Every topic string and Home Assistant id of the agent is built here and
//! nowhere else. All functions are pure: the same device and entity always
//! give byte-identical strings, which is what keeps Home Assistant from
//! creating duplicate entities when discovery is re-run.
//!
//! ```text
//! namespace_id  = <tool_prefix>_<host>_<vmid>
//! config topic  = <discovery_prefix>/<kind>/<namespace_id>_<metric>/config
//! state topic   = <base_prefix>/<host>/<vmid>/<metric>
//! container     = <base_prefix>/<host>/<vmid>/<container>/<metric>
//! ```

use crate::config::TopicSettings;
use crate::device::Device;
use crate::entities::Entity;

#[derive(Debug, Clone)]
pub struct TopicNamer {
    discovery_prefix: String,
    base_prefix: String,
    tool_prefix: String,
    legacy: Vec<String>,
}

impl TopicNamer {
    pub fn new(settings: &TopicSettings) -> Self {
        Self {
            discovery_prefix: settings.discovery_prefix.clone(),
            base_prefix: settings.base_prefix.clone(),
            tool_prefix: settings.tool_prefix.clone(),
            legacy: settings.legacy.clone(),
        }
    }

    /// Device-wide id, also used as the Home Assistant device identifier
    pub fn namespace_id(&self, device: &Device) -> String {
        format!("{}_{}_{}", self.tool_prefix, device.proxmox_host(), device.vmid())
    }

    /// `unique_id` and `object_id` of a device-level entity
    pub fn unique_id(&self, device: &Device, entity: &Entity) -> String {
        format!("{}_{}", self.namespace_id(device), entity.metric)
    }

    pub fn config_topic(&self, device: &Device, entity: &Entity) -> String {
        self.discovery_topic(entity, &self.unique_id(device, entity))
    }

    pub fn state_topic(&self, device: &Device, metric: &str) -> String {
        format!("{}/{}", self.device_base(device), metric)
    }

    /// State topic an entity reads from
    pub fn entity_state_topic(&self, device: &Device, entity: &Entity) -> String {
        self.state_topic(device, entity.state_metric)
    }

    pub fn container_unique_id(&self, device: &Device, container: &str, entity: &Entity) -> String {
        format!(
            "{}_{}_{}",
            self.namespace_id(device),
            safe_container_name(container),
            entity.metric
        )
    }

    pub fn container_config_topic(&self, device: &Device, container: &str, entity: &Entity) -> String {
        self.discovery_topic(entity, &self.container_unique_id(device, container, entity))
    }

    pub fn container_state_topic(&self, device: &Device, container: &str, metric: &str) -> String {
        format!("{}/{}/{}", self.device_base(device), container, metric)
    }

    pub fn container_entity_state_topic(&self, device: &Device, container: &str, entity: &Entity) -> String {
        self.container_state_topic(device, container, entity.state_metric)
    }

    /// Expand the configured legacy topic templates for a device.
    ///
    /// Templates using `{container}` expand once per container and vanish
    /// when there are no containers. Duplicates are dropped, order is kept.
    pub fn legacy_topics(&self, device: &Device, containers: &[String]) -> Vec<String> {
        let vmid = device.vmid().to_string();
        let mut topics: Vec<String> = Vec::new();

        for template in &self.legacy {
            let base = template
                .replace("{discovery_prefix}", &self.discovery_prefix)
                .replace("{base_prefix}", &self.base_prefix)
                .replace("{host}", device.proxmox_host())
                .replace("{vmid}", &vmid);

            if base.contains("{container}") {
                for container in containers {
                    let topic = base.replace("{container}", &safe_container_name(container));
                    if !topics.contains(&topic) {
                        topics.push(topic);
                    }
                }
            } else if !topics.contains(&base) {
                topics.push(base);
            }
        }

        topics
    }

    fn device_base(&self, device: &Device) -> String {
        format!("{}/{}/{}", self.base_prefix, device.proxmox_host(), device.vmid())
    }

    fn discovery_topic(&self, entity: &Entity, object_id: &str) -> String {
        format!("{}/{}/{}/config", self.discovery_prefix, entity.kind, object_id)
    }
}

/// Container names may contain `-` and `.`, which are not valid in
/// Home Assistant object ids.
pub fn safe_container_name(name: &str) -> String {
    name.replace(['-', '.'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::GuestKind;
    use crate::entities::{device_entity, metric, CONTAINER_ENTITIES, DEVICE_ENTITIES};

    fn namer() -> TopicNamer {
        TopicNamer::new(&TopicSettings::default())
    }

    #[test]
    fn test_device_topics() {
        let namer = namer();
        let device = Device::new("PVE1", 101, GuestKind::Ct, None);
        let status = device_entity(metric::STATUS).unwrap();
        let deployed = device_entity(metric::DEPLOYED).unwrap();

        assert_eq!(namer.namespace_id(&device), "sentrylab_pve1_101");
        assert_eq!(namer.unique_id(&device, status), "sentrylab_pve1_101_status");
        assert_eq!(
            namer.config_topic(&device, status),
            "homeassistant/sensor/sentrylab_pve1_101_status/config"
        );
        assert_eq!(
            namer.config_topic(&device, deployed),
            "homeassistant/binary_sensor/sentrylab_pve1_101_deployed/config"
        );
        assert_eq!(namer.state_topic(&device, metric::STATUS), "sentrylab/pve1/101/status");
    }

    #[test]
    fn test_shared_state_topic() {
        let namer = namer();
        let device = Device::new("pve1", 101, GuestKind::Vm, None);
        let version = device_entity(metric::DOCKER_VERSION).unwrap();

        assert_eq!(
            namer.entity_state_topic(&device, version),
            "sentrylab/pve1/101/docker_status"
        );
        assert_eq!(
            namer.config_topic(&device, version),
            "homeassistant/sensor/sentrylab_pve1_101_docker_version/config"
        );
    }

    #[test]
    fn test_container_topics() {
        let namer = namer();
        let device = Device::new("pve1", 101, GuestKind::Ct, None);
        let status = &CONTAINER_ENTITIES[0];

        assert_eq!(
            namer.container_unique_id(&device, "home-assistant.db", status),
            "sentrylab_pve1_101_home_assistant_db_status"
        );
        assert_eq!(
            namer.container_config_topic(&device, "nginx", status),
            "homeassistant/binary_sensor/sentrylab_pve1_101_nginx_status/config"
        );
        assert_eq!(
            namer.container_entity_state_topic(&device, "nginx", status),
            "sentrylab/pve1/101/nginx/state"
        );
    }

    #[test]
    fn test_idempotent() {
        let a = namer();
        let b = namer();
        let device = Device::new("pve1", 101, GuestKind::Ct, Some("web"));
        for entity in DEVICE_ENTITIES.iter() {
            assert_eq!(a.config_topic(&device, entity), b.config_topic(&device, entity));
            assert_eq!(a.unique_id(&device, entity), a.unique_id(&device, entity));
        }
    }

    #[test]
    fn test_legacy_expansion() {
        let mut settings = TopicSettings::default();
        settings.legacy.push("proxmox/{host}/{vmid}/status".to_string());
        let namer = TopicNamer::new(&settings);
        let device = Device::new("PVE1", 101, GuestKind::Ct, None);

        let bare = namer.legacy_topics(&device, &[]);
        assert_eq!(bare, vec!["proxmox/pve1/101/status".to_string()]);

        let with = namer.legacy_topics(&device, &["my-app".to_string()]);
        assert_eq!(with.len(), 7);
        assert!(with.contains(
            &"homeassistant/binary_sensor/sl_docker_pve1_101_my_app_status/config".to_string()
        ));
        assert!(with.contains(&"homeassistant/sensor/docker_my_app/version/config".to_string()));
    }

    #[test]
    fn test_legacy_duplicates_dropped() {
        let mut settings = TopicSettings::default();
        settings.legacy = vec![
            "{base_prefix}/{host}/{vmid}".to_string(),
            "{base_prefix}/{host}/{vmid}".to_string(),
        ];
        let namer = TopicNamer::new(&settings);
        let device = Device::new("pve1", 5, GuestKind::Vm, None);
        assert_eq!(namer.legacy_topics(&device, &[]), vec!["sentrylab/pve1/5".to_string()]);
    }
}
