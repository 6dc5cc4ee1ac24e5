//! MQTT transport
//!
//! `Publish` is the only thing the protocol components know about the
//! broker. `BrokerClient` drives a rumqttc event loop in a background task;
//! `OfflinePublisher` stands in when MQTT is disabled or unreachable.

use crate::config::MqttSettings;
use crate::error::PublishError;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, Incoming, MqttOptions, Outgoing, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Fire-and-forget publish of one message
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), PublishError>;

    /// False when nothing can reach the broker; removal is skipped then.
    fn is_available(&self) -> bool {
        true
    }
}

pub fn qos_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Outcome of a batch of independent publishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub attempted: usize,
    pub failed: usize,
}

impl PublishReport {
    /// Count one publish; failures are logged and never abort the batch.
    pub fn record(&mut self, topic: &str, result: Result<(), PublishError>) {
        self.attempted += 1;
        if let Err(e) = result {
            self.failed += 1;
            warn!("Publish to {} failed: {}", topic, e);
        }
    }

    pub fn merge(&mut self, other: PublishReport) {
        self.attempted += other.attempted;
        self.failed += other.failed;
    }

    pub fn succeeded(&self) -> usize {
        self.attempted - self.failed
    }
}

/// Connected rumqttc client
pub struct BrokerClient {
    client: AsyncClient,
    qos: QoS,
    publish_timeout: Duration,
    connected: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

impl BrokerClient {
    /// Connect and wait for the broker's CONNACK.
    pub async fn connect(settings: &MqttSettings, client_id: &str) -> Result<Self, PublishError> {
        let host = settings.host.as_deref().ok_or(PublishError::Unavailable)?;
        let qos = qos_level(settings.qos).ok_or(PublishError::Unavailable)?;

        let mut options = MqttOptions::new(client_id, host, settings.port);
        options.set_keep_alive(Duration::from_secs(u64::from(settings.keep_alive_secs.max(5))));
        options.set_clean_session(true);
        if let Some(username) = &settings.username {
            options.set_credentials(username, settings.password.as_deref().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => return Ok(ack.code),
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
            }
        };

        let connect_timeout = Duration::from_secs(settings.connect_timeout_secs.max(1));
        match tokio::time::timeout(connect_timeout, handshake).await {
            Ok(Ok(ConnectReturnCode::Success)) => {}
            Ok(Ok(code)) => {
                return Err(PublishError::Client {
                    topic: String::new(),
                    message: format!("connection refused: {:?}", code),
                })
            }
            Ok(Err(e)) => {
                return Err(PublishError::Client {
                    topic: String::new(),
                    message: e.to_string(),
                })
            }
            Err(_) => return Err(PublishError::Unavailable),
        }

        info!("Connected to MQTT broker at {}:{}", host, settings.port);

        let connected = Arc::new(AtomicBool::new(true));
        let link = connected.clone();

        // Start MQTT event loop in background
        let driver = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        link.store(true, Ordering::Relaxed);
                        info!("Reconnected to MQTT broker");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("MQTT disconnect sent");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        link.store(false, Ordering::Relaxed);
                        warn!("MQTT connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            qos,
            publish_timeout: Duration::from_secs(settings.publish_timeout_secs.max(1)),
            connected,
            driver,
        })
    }

    /// Flush queued publishes and disconnect.
    pub async fn shutdown(self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect request failed: {}", e);
        }
        if tokio::time::timeout(self.publish_timeout, self.driver).await.is_err() {
            warn!("MQTT event loop did not stop in time");
        }
    }
}

#[async_trait]
impl Publish for BrokerClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), PublishError> {
        let request = self.client.publish(topic, self.qos, retain, payload);
        match tokio::time::timeout(self.publish_timeout, request).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PublishError::Client {
                topic: topic.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(PublishError::Timeout {
                topic: topic.to_string(),
            }),
        }
    }

    fn is_available(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Why no broker connection exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineReason {
    /// Log what would be sent, report success
    DryRun,
    /// Broker unconfigured or unreachable, every publish fails
    Unavailable,
}

pub struct OfflinePublisher {
    reason: OfflineReason,
}

impl OfflinePublisher {
    pub fn new(reason: OfflineReason) -> Self {
        Self { reason }
    }
}

#[async_trait]
impl Publish for OfflinePublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), PublishError> {
        match self.reason {
            OfflineReason::DryRun => {
                info!(
                    "[dry-run] {} (retain={}): {}",
                    topic,
                    retain,
                    String::from_utf8_lossy(&payload)
                );
                Ok(())
            }
            OfflineReason::Unavailable => Err(PublishError::Unavailable),
        }
    }

    fn is_available(&self) -> bool {
        self.reason == OfflineReason::DryRun
    }
}
