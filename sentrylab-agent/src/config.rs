//! Configuration loading and validation
//!
//! Handles:
//! - Built-in defaults
//! - TOML config file (OS-specific location or explicit path)
//! - `.env` file and environment variable overrides
//! - Validation before any MQTT traffic
//!
//! The resulting `Settings` are immutable and handed to each component at
//! construction.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "SENTRYLAB_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mqtt: MqttSettings,
    pub topics: TopicSettings,
    pub agent: AgentSettings,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    /// Broker host. `None` disables MQTT publishing.
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub qos: u8,
    pub keep_alive_secs: u16,
    pub connect_timeout_secs: u64,
    pub publish_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicSettings {
    pub discovery_prefix: String,
    pub base_prefix: String,
    pub tool_prefix: String,
    /// Topics left behind by older naming schemes, cleared on removal.
    /// Placeholders: `{discovery_prefix}`, `{base_prefix}`, `{host}`,
    /// `{vmid}`, `{container}`.
    pub legacy: Vec<String>,
    /// Also clear state topics on removal, not only discovery configs.
    pub clear_state: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Defaults to the local host name.
    pub proxmox_host: Option<String>,
    /// Home Assistant device name. Defaults to the guest hostname.
    pub display_name: Option<String>,
    pub poll_interval_secs: u64,
    pub deploy_path: String,
    /// Run host commands through `ssh <target>` instead of locally.
    pub ssh_target: Option<String>,
    pub command_timeout_secs: Option<u64>,
    pub dry_run: bool,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: 1883,
            username: None,
            password: None,
            qos: 1,
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
            publish_timeout_secs: 5,
        }
    }
}

impl fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("qos", &self.qos)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("publish_timeout_secs", &self.publish_timeout_secs)
            .finish()
    }
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            discovery_prefix: "homeassistant".to_string(),
            base_prefix: "sentrylab".to_string(),
            tool_prefix: "sentrylab".to_string(),
            legacy: default_legacy_topics(),
            clear_state: false,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            proxmox_host: None,
            display_name: None,
            poll_interval_secs: 30,
            deploy_path: "/opt/sentrylab".to_string(),
            ssh_target: None,
            command_timeout_secs: None,
            dry_run: false,
        }
    }
}

/// Per-container discovery configs of the `sl_docker_*` scheme, plus the
/// image version config that used the `docker_<container>` node id.
fn default_legacy_topics() -> Vec<String> {
    let mut topics: Vec<String> = ["binary_sensor", "sensor", "sensor", "sensor", "sensor"]
        .iter()
        .zip(["status", "state", "uptime", "health", "image"])
        .map(|(kind, metric)| {
            format!("{{discovery_prefix}}/{kind}/sl_docker_{{host}}_{{vmid}}_{{container}}_{metric}/config")
        })
        .collect();
    topics.push("{discovery_prefix}/sensor/docker_{container}/version/config".to_string());
    topics
}

impl Settings {
    /// Load settings: defaults, then config file, then `.env` and environment.
    pub async fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        // Missing .env is the normal case
        let _ = dotenvy::dotenv();

        let path = match explicit_path {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .or_else(|| Self::config_file_path().filter(|p| p.exists())),
        };

        let mut settings = match path {
            Some(path) => Self::from_file(&path).await?,
            None => Self::default(),
        };

        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// OS-specific config file location
    pub fn config_file_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("sentrylab");
        path.push("config.toml");
        Some(path)
    }

    /// Apply environment overrides. `lookup` abstracts `std::env::var` for tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("MQTT_BROKER") {
            self.mqtt.host = Some(host);
        }
        if let Some(port) = get("MQTT_PORT") {
            self.mqtt.port = parse_env("MQTT_PORT", &port)?;
        }
        if let Some(user) = get("MQTT_USER") {
            self.mqtt.username = Some(user);
        }
        if let Some(pass) = get("MQTT_PASS") {
            self.mqtt.password = Some(pass);
        }
        if let Some(qos) = get("MQTT_QOS") {
            self.mqtt.qos = parse_env("MQTT_QOS", &qos)?;
        }
        if let Some(prefix) = get("HA_BASE_TOPIC") {
            self.topics.discovery_prefix = prefix;
        }
        if let Some(prefix) = get("SENTRYLAB_BASE_TOPIC") {
            self.topics.base_prefix = prefix;
        }
        if let Some(prefix) = get("SENTRYLAB_PREFIX") {
            self.topics.tool_prefix = prefix;
        }
        if let Some(interval) = get("POLL_INTERVAL") {
            self.agent.poll_interval_secs = parse_env("POLL_INTERVAL", &interval)?;
        }
        if let Some(path) = get("DEPLOY_PATH") {
            self.agent.deploy_path = path;
        }
        if let Some(host) = get("PROXMOX_HOST") {
            self.agent.proxmox_host = Some(host);
        }
        if let Some(name) = get("DEVICE_NAME") {
            self.agent.display_name = Some(name);
        }
        if let Some(target) = get("SENTRYLAB_SSH") {
            self.agent.ssh_target = Some(target);
        }
        if let Some(debug) = get("DEBUG") {
            self.agent.dry_run = debug.eq_ignore_ascii_case("true") || debug == "1";
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.qos > 2 {
            return Err(ConfigError::InvalidQos(self.mqtt.qos));
        }
        if self.mqtt.host.is_some() && self.mqtt.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.agent.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }

        check_topic_prefix("discovery_prefix", &self.topics.discovery_prefix, true)?;
        check_topic_prefix("base_prefix", &self.topics.base_prefix, true)?;
        check_topic_prefix("tool_prefix", &self.topics.tool_prefix, false)?;
        Ok(())
    }

    pub fn mqtt_enabled(&self) -> bool {
        !self.agent.dry_run && self.mqtt.host.as_deref().is_some_and(|h| !h.trim().is_empty())
    }

    /// Configured Proxmox host, or the local host name.
    pub fn proxmox_host(&self) -> Result<String, ConfigError> {
        let host = match &self.agent.proxmox_host {
            Some(host) => host.clone(),
            None => gethostname::gethostname().to_string_lossy().to_string(),
        };
        let host = crate::device::normalize_host(&host);
        if host.is_empty() {
            return Err(ConfigError::MissingHost);
        }
        check_topic_prefix("proxmox_host", &host, false)?;
        Ok(host)
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key,
        value: value.to_string(),
    })
}

/// Prefixes may not contain wildcards. Single-level prefixes (used inside
/// object ids) may not contain `/` either.
fn check_topic_prefix(name: &'static str, value: &str, multi_level: bool) -> Result<(), ConfigError> {
    let invalid = value.is_empty()
        || value.starts_with('/')
        || value.ends_with('/')
        || value.contains(['+', '#'])
        || value.contains(char::is_whitespace)
        || (!multi_level && value.contains('/'));

    if invalid {
        return Err(ConfigError::InvalidPrefix {
            name,
            value: value.to_string(),
        });
    }
    Ok(())
}
