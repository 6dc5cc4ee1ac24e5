/*!
Test Harness pour l'agent SentryLab

Facilite l'écriture de tests de bout en bout avec:
- Broker et exécuteur simulés partagés avec l'agent
- Settings de test (hôte `pve1`)
- Assertions sur les messages retenus et le rendu des templates
*/

use crate::executor_stub::MockExecutor;
use crate::mqtt_stub::MockBroker;
use crate::template;
use anyhow::{anyhow, Result};
use sentrylab_agent::{Agent, Device, DeviceTarget, GuestKind, Settings, TopicNamer};
use serde_json::Value;
use std::sync::Arc;

pub const TEST_HOST: &str = "pve1";

pub struct TestHarness {
    pub broker: MockBroker,
    pub executor: MockExecutor,
    pub settings: Settings,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        let mut settings = Settings::default();
        settings.agent.proxmox_host = Some(TEST_HOST.to_string());

        Self {
            broker: MockBroker::new(),
            executor: MockExecutor::new(),
            settings,
        }
    }

    pub fn with_executor(mut self, executor: MockExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Agent branché sur le broker et l'exécuteur du harness
    pub fn agent(&self) -> Agent {
        Agent::new(
            &self.settings,
            TEST_HOST,
            Arc::new(self.broker.clone()),
            Arc::new(self.executor.clone()),
        )
    }

    pub fn namer(&self) -> TopicNamer {
        TopicNamer::new(&self.settings.topics)
    }

    pub fn device(&self, vmid: u32, name: &str) -> Device {
        Device::new(TEST_HOST, vmid, GuestKind::Ct, Some(name))
    }

    pub fn target(vmid: u32) -> DeviceTarget {
        DeviceTarget {
            vmid,
            kind_hint: GuestKind::Ct,
        }
    }

    pub fn assert_retained(&self, topic: &str, expected: &str) {
        assert_eq!(
            self.broker.retained(topic).as_deref(),
            Some(expected),
            "retained payload of {}",
            topic
        );
    }

    pub fn assert_not_retained(&self, topic: &str) {
        assert!(
            self.broker.retained(topic).is_none(),
            "{} should not hold a retained message",
            topic
        );
    }

    /// Lit la config de découverte retenue sur `config_topic`, puis rend son
    /// `value_template` contre le message retenu de son `state_topic`.
    pub fn render_entity(&self, config_topic: &str) -> Result<String> {
        let config: Value = self
            .broker
            .retained_json(config_topic)?
            .ok_or_else(|| anyhow!("no discovery config on {}", config_topic))?;

        let state_topic = config["state_topic"]
            .as_str()
            .ok_or_else(|| anyhow!("{} has no state_topic", config_topic))?;
        let value_template = config["value_template"]
            .as_str()
            .ok_or_else(|| anyhow!("{} has no value_template", config_topic))?;
        let payload = self
            .broker
            .retained(state_topic)
            .ok_or_else(|| anyhow!("no retained state on {}", state_topic))?;

        let rendered = template::render(value_template, &payload)?;
        log::info!("✅ {} -> {}", config_topic, rendered);
        Ok(rendered)
    }
}
