//! Agent workflows: setup, monitor, remove, status
//!
//! One device per invocation. Every workflow starts with an observation through the
//! remote executor and then publishes what it observed; publish failures are
//! counted and logged, never propagated.

use crate::config::Settings;
use crate::discovery::DiscoveryPublisher;
use crate::docker::DockerStatus;
use crate::entities::metric;
use crate::execution::RemoteExecutor;
use crate::lifecycle::{DeviceObserver, DeviceState, DeviceTarget, DeviceTracker, Observation};
use crate::mqtt::{Publish, PublishReport};
use crate::removal::{RemovalReport, TopicRemover};
use crate::state::{timestamp, StatePublisher};
use crate::topics::TopicNamer;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Outcome of one setup or monitor pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub state: DeviceState,
    pub discovery: PublishReport,
    pub states: PublishReport,
}

impl CycleReport {
    fn new(state: DeviceState) -> Self {
        Self {
            state,
            discovery: PublishReport::default(),
            states: PublishReport::default(),
        }
    }

    pub fn failed(&self) -> usize {
        self.discovery.failed + self.states.failed
    }
}

pub struct Agent {
    observer: DeviceObserver,
    discovery: DiscoveryPublisher,
    states: StatePublisher,
    remover: TopicRemover,
    poll_interval: Duration,
}

impl Agent {
    pub fn new(
        settings: &Settings,
        proxmox_host: &str,
        mqtt: Arc<dyn Publish>,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        let namer = TopicNamer::new(&settings.topics);
        Self {
            observer: DeviceObserver::new(executor, proxmox_host, &settings.agent),
            discovery: DiscoveryPublisher::new(namer.clone(), mqtt.clone()),
            states: StatePublisher::new(namer.clone(), mqtt.clone()),
            remover: TopicRemover::new(namer, mqtt, settings.topics.clear_state),
            poll_interval: Duration::from_secs(settings.agent.poll_interval_secs.max(1)),
        }
    }

    /// Register the device (and its containers) in Home Assistant, then
    /// publish its current state.
    pub async fn setup(&self, target: &DeviceTarget) -> Result<CycleReport> {
        info!("Setting up VMID {}", target.vmid);
        let mut tracker = DeviceTracker::new();
        let observation = self.observer.observe(target).await;
        tracker
            .observe(observation.state)
            .context("Failed to apply observation")?;

        let mut report = CycleReport::new(tracker.state());
        if observation.is_present() {
            report.discovery.merge(self.register(&mut tracker, &observation).await);
        } else {
            warn!("{} not found, only its status is published", observation.device);
        }

        let now = Utc::now();
        report.states.merge(self.publish_observation(&observation, now).await);
        if observation.is_present() {
            report.states.record(
                metric::LAST_DISCOVERY_TIME,
                self.states
                    .publish_timestamp(&observation.device, metric::LAST_DISCOVERY_TIME, now)
                    .await,
            );
        }

        log_cycle("Setup", &observation, &report);
        Ok(report)
    }

    /// Publish state every poll interval, or once.
    pub async fn monitor(&self, target: &DeviceTarget, once: bool) -> Result<()> {
        info!(
            "Monitoring VMID {} every {}s",
            target.vmid,
            self.poll_interval.as_secs()
        );
        let mut tracker = DeviceTracker::new();
        let mut ticker = poll_ticker(self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = self.monitor_cycle(&mut tracker, target).await;
                    if once {
                        return result.map(|_| ());
                    }
                    if let Err(e) = result {
                        error!("Monitor cycle failed: {:#}", e);
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping monitor");
                    return Ok(());
                }
            }
        }
    }

    pub async fn monitor_cycle(&self, tracker: &mut DeviceTracker, target: &DeviceTarget) -> Result<CycleReport> {
        let observation = self.observer.observe(target).await;
        let update = tracker
            .observe(observation.state)
            .context("Failed to apply observation")?;

        let mut report = CycleReport::new(tracker.state());
        if update.needs_discovery || tracker.is_registered() {
            report.discovery.merge(self.register(tracker, &observation).await);
        }

        let now = Utc::now();
        report.states.merge(self.publish_observation(&observation, now).await);
        if observation.is_present() {
            report.states.record(
                metric::LAST_MONITOR_TIME,
                self.states
                    .publish_timestamp(&observation.device, metric::LAST_MONITOR_TIME, now)
                    .await,
            );
        }

        log_cycle("Monitor", &observation, &report);
        Ok(report)
    }

    /// Clear every discovery config of the device, plus state and legacy
    /// topics per configuration. `extra_containers` covers containers that
    /// can no longer be listed.
    pub async fn remove(&self, target: &DeviceTarget, extra_containers: &[String]) -> Result<RemovalReport> {
        info!("Removing VMID {}", target.vmid);
        let mut tracker = DeviceTracker::new();
        let observation = self.observer.observe(target).await;
        tracker
            .observe(observation.state)
            .context("Failed to apply observation")?;

        let mut containers = observation.container_names();
        for name in extra_containers {
            if !containers.contains(name) {
                containers.push(name.clone());
            }
        }
        if observation.docker.as_ref().map(|d| d.status) != Some(DockerStatus::Running)
            && extra_containers.is_empty()
        {
            warn!("Containers of {} could not be listed, their topics are kept", observation.device);
        }

        let report = self.remover.remove_device(&observation.device, &containers).await;
        if !report.skipped {
            tracker.remove();
        }
        Ok(report)
    }

    /// Observe without publishing.
    pub async fn status(&self, target: &DeviceTarget) -> StatusReport {
        StatusReport {
            observation: self.observer.observe(target).await,
            now: Utc::now(),
        }
    }

    /// Device discovery on first registration, container discovery for
    /// containers not seen before in this run.
    async fn register(&self, tracker: &mut DeviceTracker, observation: &Observation) -> PublishReport {
        let mut report = PublishReport::default();
        if !tracker.is_registered() {
            report.merge(self.discovery.publish_device(&observation.device).await);
            tracker.mark_registered();
        }

        let names = observation.containers.iter().map(|c| c.container_name());
        for name in tracker.new_containers(names) {
            report.merge(self.discovery.publish_container(&observation.device, &name).await);
        }
        report
    }

    async fn publish_observation(&self, observation: &Observation, now: DateTime<Utc>) -> PublishReport {
        let device = &observation.device;
        let mut report = PublishReport::default();

        if let Some(status) = observation.state.status_payload() {
            report.record(metric::STATUS, self.states.publish_status(device, status).await);
        }

        if let Some(docker) = &observation.docker {
            report.record(metric::DOCKER_STATUS, self.states.publish_docker(device, docker).await);
        }

        if let Some(deployment) = &observation.deployment {
            report.merge(
                self.states
                    .publish_deployment(device, deployment.deployed, deployment.deployed_at)
                    .await,
            );
        }

        if observation.docker.as_ref().map(|d| d.status) == Some(DockerStatus::Running) {
            report.record(
                metric::SUMMARY,
                self.states.publish_summary(device, &observation.containers, now).await,
            );
            for container in &observation.containers {
                report.record(
                    container.container_name(),
                    self.states.publish_container(device, container, now).await,
                );
            }
        }

        report
    }
}

fn log_cycle(workflow: &str, observation: &Observation, report: &CycleReport) {
    if report.failed() == 0 {
        info!(
            "{} of {} done: {}, {} discovery + {} state messages",
            workflow, observation.device, report.state, report.discovery.attempted, report.states.attempted
        );
    } else {
        warn!(
            "{} of {} done with {} failed publishes: {}",
            workflow,
            observation.device,
            report.failed(),
            report.state
        );
    }
}

/// Human-readable observation of the `status` command
pub struct StatusReport {
    pub observation: Observation,
    now: DateTime<Utc>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let obs = &self.observation;
        writeln!(f, "Device:     {} ({})", obs.device, obs.device.display_name())?;
        writeln!(f, "State:      {}", obs.state)?;

        if let Some(docker) = &obs.docker {
            write!(f, "Docker:     {}", docker.status)?;
            if let Some(version) = &docker.version {
                write!(f, " {}", version)?;
            }
            if let Some(path) = &docker.path {
                write!(f, " ({})", path)?;
            }
            writeln!(f)?;
        }

        if let Some(deployment) = &obs.deployment {
            match (deployment.deployed, deployment.deployed_at) {
                (true, Some(at)) => writeln!(f, "Deployed:   yes, since {}", timestamp(at))?,
                (true, None) => writeln!(f, "Deployed:   yes")?,
                (false, _) => writeln!(f, "Deployed:   no")?,
            }
        }

        if obs.docker.as_ref().map(|d| d.status) == Some(DockerStatus::Running) {
            let running = obs.containers.iter().filter(|c| c.state.running).count();
            writeln!(f, "Containers: {} total, {} running", obs.containers.len(), running)?;
            for container in &obs.containers {
                writeln!(
                    f,
                    "  {:<24} {:<10} {:<10} {:<28} {}",
                    container.container_name(),
                    container.state(),
                    container.health(),
                    container.config.image,
                    crate::docker::format_uptime(&container.state.started_at, self.now)
                )?;
            }
        }
        Ok(())
    }
}

/// A slow cycle pushes the next one back instead of firing a burst to catch up.
fn poll_ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_ticker_delays_after_slow_cycle() {
        let ticker = poll_ticker(Duration::from_secs(30));
        assert_eq!(ticker.missed_tick_behavior(), MissedTickBehavior::Delay);
        assert_eq!(ticker.period(), Duration::from_secs(30));
    }
}
