//! Error types shared by the agent components
//!
//! Only configuration errors are fatal. Publish and remote execution errors
//! are reported by the callers and the run continues.

use thiserror::Error;

/// Invalid or unreadable configuration, detected before any publish.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("MQTT QoS must be 0, 1 or 2 (got {0})")]
    InvalidQos(u8),

    #[error("MQTT port must not be 0")]
    InvalidPort,

    #[error("poll interval must be at least 1 second")]
    InvalidPollInterval,

    #[error("topic prefix {name} is invalid: {value:?}")]
    InvalidPrefix { name: &'static str, value: String },

    #[error("proxmox host name could not be determined")]
    MissingHost,
}

/// A single publish that did not reach the broker.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("MQTT broker is not connected")]
    Unavailable,

    #[error("publish to {topic} timed out")]
    Timeout { topic: String },

    #[error("publish to {topic} failed: {message}")]
    Client { topic: String, message: String },

    #[error("failed to encode payload for {topic}: {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The remote command could not be run at all. A command that ran and
/// exited non-zero is not an error, see `ExecutionResult::success`.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {0}s")]
    Timeout(u64),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("illegal device transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}
