/*!
# SentryLab Agent

Home Assistant MQTT discovery and status publishing for Docker hosts running
as Proxmox VMs and CTs:
- Retained discovery configs per device and per container
- State topics read back through the discovery value templates
- Removal of every topic a device ever used, legacy names included
*/

pub mod agent;
pub mod config;
pub mod device;
pub mod discovery;
pub mod docker;
pub mod entities;
pub mod error;
pub mod execution;
pub mod lifecycle;
pub mod mqtt;
pub mod removal;
pub mod state;
pub mod topics;

pub use agent::{Agent, CycleReport, StatusReport};
pub use config::Settings;
pub use device::{Device, GuestKind};
pub use discovery::DiscoveryPublisher;
pub use error::{ConfigError, ExecError, LifecycleError, PublishError};
pub use execution::{ExecutionResult, ProxmoxExecutor, RemoteExecutor};
pub use lifecycle::{DeviceState, DeviceTarget, DeviceTracker};
pub use mqtt::{BrokerClient, OfflinePublisher, OfflineReason, Publish, PublishReport};
pub use removal::{RemovalReport, TopicRemover};
pub use state::StatePublisher;
pub use topics::TopicNamer;
