//! Docker daemon and container inspection results
//!
//! Parses `docker inspect` output gathered through the remote executor and
//! derives the values published per container: state, health, image tag
//! and a human-readable uptime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Docker daemon state inside a guest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DockerStatus {
    Running,
    Stopped,
    NotInstalled,
    /// The guest did not answer (no guest agent, CT stopped mid-check, ...)
    Unreachable,
}

impl DockerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DockerStatus::Running => "running",
            DockerStatus::Stopped => "stopped",
            DockerStatus::NotInstalled => "not_installed",
            DockerStatus::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for DockerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of checking the Docker installation of a guest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerInfo {
    pub status: DockerStatus,
    pub path: Option<String>,
    pub version: Option<String>,
}

impl DockerInfo {
    pub fn unreachable() -> Self {
        Self {
            status: DockerStatus::Unreachable,
            path: None,
            version: None,
        }
    }
}

/// Subset of one `docker inspect` document
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspect {
    pub name: String,
    #[serde(default)]
    pub state: InspectState,
    #[serde(default)]
    pub config: InspectConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InspectState {
    pub status: String,
    pub running: bool,
    pub started_at: String,
    pub pid: i64,
    pub exit_code: i64,
    pub error: String,
    pub health: Option<InspectHealth>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InspectHealth {
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InspectConfig {
    pub image: String,
}

impl ContainerInspect {
    /// Container name without the leading `/` docker puts there
    pub fn container_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }

    pub fn health(&self) -> String {
        self.state
            .health
            .as_ref()
            .map(|h| h.status.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "N/A".to_string())
    }

    pub fn state(&self) -> &str {
        if self.state.status.is_empty() {
            "unknown"
        } else {
            &self.state.status
        }
    }
}

/// `docker inspect` prints one JSON array; no containers prints nothing.
pub fn parse_inspect(output: &str) -> Result<Vec<ContainerInspect>, serde_json::Error> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed)
}

/// Tag of an image reference: `nginx:1.25` -> `1.25`, `nginx` -> `latest`,
/// `registry:5000/app` -> `latest`, `app@sha256:ab..` -> `sha256:ab..`.
pub fn image_version(image: &str) -> String {
    if let Some((_, digest)) = image.split_once('@') {
        return digest.to_string();
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    match last_segment.rsplit_once(':') {
        Some((_, tag)) if !tag.is_empty() => tag.to_string(),
        _ => "latest".to_string(),
    }
}

/// Uptime since `started_at` (RFC 3339), e.g. `2d 3h 4m`, `3h 4m` or `4m 5s`.
pub fn format_uptime(started_at: &str, now: DateTime<Utc>) -> String {
    if started_at.is_empty() || started_at.starts_with("0001-01-01") {
        return "Not started".to_string();
    }

    let started = match DateTime::parse_from_rfc3339(started_at) {
        Ok(started) => started.with_timezone(&Utc),
        Err(_) => return "Unknown".to_string(),
    };

    let secs = (now - started).num_seconds().max(0);
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m {}s", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const INSPECT: &str = r#"[
        {
            "Name": "/nginx",
            "State": {
                "Status": "running",
                "Running": true,
                "StartedAt": "2024-01-10T08:00:00.123456789Z",
                "Pid": 4242,
                "ExitCode": 0,
                "Error": "",
                "Health": {"Status": "healthy", "FailingStreak": 0}
            },
            "Config": {"Image": "nginx:1.25", "Env": []}
        },
        {
            "Name": "/backup",
            "State": {"Status": "exited", "Running": false, "StartedAt": "0001-01-01T00:00:00Z", "ExitCode": 137},
            "Config": {"Image": "restic/restic"}
        }
    ]"#;

    #[test]
    fn test_parse_inspect() {
        let containers = parse_inspect(INSPECT).unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].container_name(), "nginx");
        assert_eq!(containers[0].health(), "healthy");
        assert_eq!(containers[1].health(), "N/A");
        assert_eq!(containers[1].state(), "exited");
        assert_eq!(containers[1].state.exit_code, 137);
        assert!(parse_inspect("  \n").unwrap().is_empty());
        assert!(parse_inspect("Error: No such object").is_err());
    }

    #[test]
    fn test_image_version() {
        assert_eq!(image_version("nginx:1.25"), "1.25");
        assert_eq!(image_version("nginx"), "latest");
        assert_eq!(image_version("registry.lan:5000/app"), "latest");
        assert_eq!(image_version("registry.lan:5000/app:2.0"), "2.0");
        assert_eq!(image_version("app@sha256:abcd"), "sha256:abcd");
    }

    #[test]
    fn test_format_uptime() {
        let now = Utc.with_ymd_and_hms(2024, 1, 12, 10, 30, 15).unwrap();
        assert_eq!(format_uptime("2024-01-10T08:00:00.5Z", now), "2d 2h 30m");
        assert_eq!(format_uptime("2024-01-12T07:00:00Z", now), "3h 30m");
        assert_eq!(format_uptime("2024-01-12T10:25:00Z", now), "5m 15s");
        assert_eq!(format_uptime("0001-01-01T00:00:00Z", now), "Not started");
        assert_eq!(format_uptime("", now), "Not started");
        assert_eq!(format_uptime("yesterday", now), "Unknown");
    }
}
