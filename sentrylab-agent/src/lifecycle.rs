//! Device lifecycle
//!
//! ```text
//! UNKNOWN -> ABSENT -> PRESENT(stopped|running)
//!                          PRESENT(running) -> DEPLOYED(docker_absent|docker_stopped|docker_running)
//! any -> REMOVED
//! ```
//!
//! `DeviceObserver` asks the remote executor where the guest stands and
//! returns an `Observation`; `DeviceTracker` applies it to the state
//! machine for the current run.

use crate::config::AgentSettings;
use crate::device::{Device, GuestKind};
use crate::docker::{parse_inspect, ContainerInspect, DockerInfo, DockerStatus};
use crate::error::LifecycleError;
use crate::execution::{ExecutionResult, RemoteExecutor};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerState {
    Absent,
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unknown,
    Absent,
    Present(PowerState),
    Deployed(DockerState),
    Removed,
}

impl DeviceState {
    /// Value published on the status topic; `None` publishes nothing.
    pub fn status_payload(&self) -> Option<&'static str> {
        match self {
            DeviceState::Unknown | DeviceState::Removed => None,
            DeviceState::Absent => Some("absent"),
            DeviceState::Present(PowerState::Stopped) => Some("stopped"),
            DeviceState::Present(PowerState::Running) | DeviceState::Deployed(_) => Some("running"),
        }
    }

    pub fn can_transition_to(&self, next: &DeviceState) -> bool {
        use DeviceState::*;
        match (self, next) {
            (_, Removed) => true,
            (Removed, _) => false,
            (_, Unknown) => false,
            (Unknown, Absent) | (Unknown, Present(_)) => true,
            (Absent, Absent) | (Absent, Present(_)) => true,
            (Present(_), Absent) | (Present(_), Present(_)) => true,
            (Present(PowerState::Running), Deployed(_)) => true,
            (Deployed(_), Absent) | (Deployed(_), Present(_)) | (Deployed(_), Deployed(_)) => true,
            _ => false,
        }
    }

    /// States walked to reach `target`: a guest seen deployed for the first
    /// time passes through `PRESENT(running)`.
    pub fn path_to(&self, target: DeviceState) -> Result<Vec<DeviceState>, LifecycleError> {
        if self.can_transition_to(&target) {
            return Ok(vec![target]);
        }
        let running = DeviceState::Present(PowerState::Running);
        if matches!(target, DeviceState::Deployed(_)) && self.can_transition_to(&running) {
            return Ok(vec![running, target]);
        }
        Err(LifecycleError::IllegalTransition {
            from: self.to_string(),
            to: target.to_string(),
        })
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Unknown => f.write_str("UNKNOWN"),
            DeviceState::Absent => f.write_str("ABSENT"),
            DeviceState::Present(PowerState::Stopped) => f.write_str("PRESENT(stopped)"),
            DeviceState::Present(PowerState::Running) => f.write_str("PRESENT(running)"),
            DeviceState::Deployed(DockerState::Absent) => f.write_str("DEPLOYED(docker_absent)"),
            DeviceState::Deployed(DockerState::Stopped) => f.write_str("DEPLOYED(docker_stopped)"),
            DeviceState::Deployed(DockerState::Running) => f.write_str("DEPLOYED(docker_running)"),
            DeviceState::Removed => f.write_str("REMOVED"),
        }
    }
}

/// Result of applying an observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerUpdate {
    pub transitions: Vec<(DeviceState, DeviceState)>,
    /// Entered DEPLOYED and discovery has not been published this run
    pub needs_discovery: bool,
}

/// Lifecycle of one device during one run. Nothing is persisted: a new run
/// (or a removal) starts from scratch.
#[derive(Debug, Clone)]
pub struct DeviceTracker {
    state: DeviceState,
    registered: bool,
    containers: BTreeSet<String>,
}

impl Default for DeviceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTracker {
    pub fn new() -> Self {
        Self {
            state: DeviceState::Unknown,
            registered: false,
            containers: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn observe(&mut self, observed: DeviceState) -> Result<TrackerUpdate, LifecycleError> {
        let path = self.state.path_to(observed)?;
        let mut transitions = Vec::new();
        for next in path {
            if next != self.state {
                info!("Device state {} -> {}", self.state, next);
                transitions.push((self.state, next));
            }
            self.state = next;
        }

        Ok(TrackerUpdate {
            needs_discovery: matches!(self.state, DeviceState::Deployed(_)) && !self.registered,
            transitions,
        })
    }

    pub fn mark_registered(&mut self) {
        self.registered = true;
    }

    /// Container names not seen before in this run; they are remembered.
    pub fn new_containers<'a, I>(&mut self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .filter(|name| self.containers.insert(name.to_string()))
            .map(String::from)
            .collect()
    }

    pub fn remove(&mut self) {
        self.state = DeviceState::Removed;
        self.registered = false;
        self.containers.clear();
    }
}

/// Everything learned about a guest in one pass
#[derive(Debug, Clone)]
pub struct Observation {
    pub device: Device,
    pub state: DeviceState,
    pub docker: Option<DockerInfo>,
    pub deployment: Option<Deployment>,
    pub containers: Vec<ContainerInspect>,
}

impl Observation {
    pub fn is_present(&self) -> bool {
        !matches!(self.state, DeviceState::Absent | DeviceState::Unknown)
    }

    pub fn container_names(&self) -> Vec<String> {
        self.containers.iter().map(|c| c.container_name().to_string()).collect()
    }
}

/// Agent files inside the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    pub deployed: bool,
    pub deployed_at: Option<DateTime<Utc>>,
}

/// What the caller knows about the guest before probing
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    pub vmid: u32,
    /// Used when the guest cannot be found
    pub kind_hint: GuestKind,
}

pub struct DeviceObserver {
    executor: Arc<dyn RemoteExecutor>,
    proxmox_host: String,
    deploy_path: String,
    /// Overrides the guest hostname in the device descriptor
    display_name: Option<String>,
}

impl DeviceObserver {
    pub fn new(executor: Arc<dyn RemoteExecutor>, proxmox_host: &str, agent: &AgentSettings) -> Self {
        Self {
            executor,
            proxmox_host: crate::device::normalize_host(proxmox_host),
            deploy_path: agent.deploy_path.clone(),
            display_name: agent.display_name.clone(),
        }
    }

    pub async fn observe(&self, target: &DeviceTarget) -> Observation {
        let Some((kind, power)) = self.locate(target.vmid).await else {
            info!("VMID {} not found on {}: ABSENT", target.vmid, self.proxmox_host);
            return Observation {
                device: Device::new(&self.proxmox_host, target.vmid, target.kind_hint, self.display_name.as_deref()),
                state: DeviceState::Absent,
                docker: None,
                deployment: None,
                containers: Vec::new(),
            };
        };

        let name = match &self.display_name {
            Some(name) => Some(name.clone()),
            None => self.guest_name(target.vmid, kind).await,
        };
        let device = Device::new(&self.proxmox_host, target.vmid, kind, name.as_deref());
        info!("{} found ({}), power: {:?}", device, device.display_name(), power);

        if power == PowerState::Stopped {
            return Observation {
                device,
                state: DeviceState::Present(PowerState::Stopped),
                docker: None,
                deployment: None,
                containers: Vec::new(),
            };
        }

        let docker = self.check_docker(&device).await;
        info!("Docker on {}: {}", device, docker.status);

        let state = match docker.status {
            DockerStatus::Running => DeviceState::Deployed(DockerState::Running),
            DockerStatus::Stopped => DeviceState::Deployed(DockerState::Stopped),
            DockerStatus::NotInstalled => DeviceState::Deployed(DockerState::Absent),
            DockerStatus::Unreachable => DeviceState::Present(PowerState::Running),
        };

        let deployment = match docker.status {
            DockerStatus::Unreachable => None,
            _ => Some(self.check_deployment(&device).await),
        };

        let containers = match docker.status {
            DockerStatus::Running => self.containers(&device).await,
            _ => Vec::new(),
        };

        Observation {
            device,
            state,
            docker: Some(docker),
            deployment,
            containers,
        }
    }

    /// Guest type and power state, `None` when the VMID does not exist.
    async fn locate(&self, vmid: u32) -> Option<(GuestKind, PowerState)> {
        let vmid = vmid.to_string();
        for (kind, tool) in [(GuestKind::Ct, "pct"), (GuestKind::Vm, "qm")] {
            match self.executor.run_host(&[tool, "status", &vmid]).await {
                Ok(result) if result.success => {
                    let power = if result.stdout.contains("status: running") {
                        PowerState::Running
                    } else {
                        PowerState::Stopped
                    };
                    return Some((kind, power));
                }
                Ok(result) => debug!("{} status {}: {}", tool, vmid, result.stderr.trim()),
                Err(e) => warn!("{} status {} could not run: {}", tool, vmid, e),
            }
        }
        None
    }

    /// `hostname:` of a CT config, `name:` of a VM config
    async fn guest_name(&self, vmid: u32, kind: GuestKind) -> Option<String> {
        let (tool, key) = match kind {
            GuestKind::Ct => ("pct", "hostname:"),
            GuestKind::Vm => ("qm", "name:"),
        };
        let result = self.executor.run_host(&[tool, "config", &vmid.to_string()]).await.ok()?;
        if !result.success {
            return None;
        }
        result
            .stdout
            .lines()
            .find_map(|line| line.strip_prefix(key))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    async fn check_docker(&self, device: &Device) -> DockerInfo {
        let path = match self.executor.run_guest(device, "command -v docker").await {
            Ok(result) if result.success => result.first_line().map(String::from),
            Ok(result) if matches!(result.exit_code, Some(1) | Some(127)) => {
                return DockerInfo {
                    status: DockerStatus::NotInstalled,
                    path: None,
                    version: None,
                };
            }
            Ok(result) => {
                warn!("Docker check on {} failed: {}", device, result.stderr.trim());
                return DockerInfo::unreachable();
            }
            Err(e) => {
                warn!("Docker check on {} could not run: {}", device, e);
                return DockerInfo::unreachable();
            }
        };

        let server = self
            .guest_line(device, "docker version --format '{{.Server.Version}}'")
            .await;
        if let Some(version) = server {
            return DockerInfo {
                status: DockerStatus::Running,
                path,
                version: Some(version),
            };
        }

        let client = self
            .guest_line(device, "docker version --format '{{.Client.Version}}' 2>/dev/null")
            .await;
        DockerInfo {
            status: DockerStatus::Stopped,
            path,
            version: client,
        }
    }

    async fn check_deployment(&self, device: &Device) -> Deployment {
        let path = shell_words::quote(&self.deploy_path);
        let command = format!("test -d {path} && stat -c %Y {path}");
        match self.guest_line(device, &command).await {
            Some(epoch) => Deployment {
                deployed: true,
                deployed_at: epoch.parse::<i64>().ok().and_then(|s| Utc.timestamp_opt(s, 0).single()),
            },
            None => Deployment {
                deployed: false,
                deployed_at: None,
            },
        }
    }

    async fn containers(&self, device: &Device) -> Vec<ContainerInspect> {
        let output = match self
            .executor
            .run_guest(device, "docker ps -aq | xargs -r docker inspect")
            .await
        {
            Ok(result) if result.success => result.stdout,
            Ok(result) => {
                warn!("Listing containers on {} failed: {}", device, result.stderr.trim());
                return Vec::new();
            }
            Err(e) => {
                warn!("Listing containers on {} could not run: {}", device, e);
                return Vec::new();
            }
        };

        match parse_inspect(&output) {
            Ok(containers) => {
                info!("{} containers on {}", containers.len(), device);
                containers
            }
            Err(e) => {
                warn!("Unreadable docker inspect output from {}: {}", device, e);
                Vec::new()
            }
        }
    }

    async fn guest_line(&self, device: &Device, command: &str) -> Option<String> {
        match self.executor.run_guest(device, command).await {
            Ok(result @ ExecutionResult { success: true, .. }) => result.first_line().map(String::from),
            Ok(_) => None,
            Err(e) => {
                debug!("{} on {}: {}", command, device, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_payloads() {
        assert_eq!(DeviceState::Absent.status_payload(), Some("absent"));
        assert_eq!(DeviceState::Present(PowerState::Stopped).status_payload(), Some("stopped"));
        assert_eq!(DeviceState::Deployed(DockerState::Absent).status_payload(), Some("running"));
        assert_eq!(DeviceState::Unknown.status_payload(), None);
        assert_eq!(DeviceState::Removed.status_payload(), None);
    }

    #[test]
    fn test_transitions() {
        let running = DeviceState::Present(PowerState::Running);
        let stopped = DeviceState::Present(PowerState::Stopped);
        let deployed = DeviceState::Deployed(DockerState::Running);

        assert!(DeviceState::Unknown.can_transition_to(&DeviceState::Absent));
        assert!(running.can_transition_to(&deployed));
        assert!(!stopped.can_transition_to(&deployed));
        assert!(!DeviceState::Absent.can_transition_to(&deployed));
        assert!(deployed.can_transition_to(&DeviceState::Removed));
        assert!(!DeviceState::Removed.can_transition_to(&running));
    }

    #[test]
    fn test_path_through_running() {
        let deployed = DeviceState::Deployed(DockerState::Stopped);
        assert_eq!(
            DeviceState::Unknown.path_to(deployed).unwrap(),
            vec![DeviceState::Present(PowerState::Running), deployed]
        );
        assert!(DeviceState::Removed.path_to(deployed).is_err());
    }

    #[test]
    fn test_tracker_discovery_once() {
        let mut tracker = DeviceTracker::new();
        let update = tracker.observe(DeviceState::Deployed(DockerState::Running)).unwrap();
        assert_eq!(update.transitions.len(), 2);
        assert!(update.needs_discovery);

        tracker.mark_registered();
        let again = tracker.observe(DeviceState::Deployed(DockerState::Running)).unwrap();
        assert!(again.transitions.is_empty());
        assert!(!again.needs_discovery);
    }

    #[test]
    fn test_tracker_absent_then_present() {
        let mut tracker = DeviceTracker::new();
        tracker.observe(DeviceState::Absent).unwrap();
        let update = tracker.observe(DeviceState::Present(PowerState::Stopped)).unwrap();
        assert_eq!(
            update.transitions,
            vec![(DeviceState::Absent, DeviceState::Present(PowerState::Stopped))]
        );
        assert!(!update.needs_discovery);
    }

    #[test]
    fn test_tracker_remove_forgets() {
        let mut tracker = DeviceTracker::new();
        tracker.observe(DeviceState::Deployed(DockerState::Running)).unwrap();
        tracker.mark_registered();
        assert_eq!(tracker.new_containers(["a", "b"]), vec!["a", "b"]);
        assert_eq!(tracker.new_containers(["b", "c"]), vec!["c"]);

        tracker.remove();
        assert_eq!(tracker.state(), DeviceState::Removed);
        assert!(!tracker.is_registered());
        assert!(tracker.observe(DeviceState::Absent).is_err());
    }
}
