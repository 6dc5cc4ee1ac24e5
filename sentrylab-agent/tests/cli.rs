//! Exit status of the `sentrylab` binary

use std::process::Command;

fn sentrylab() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_sentrylab"));
    for key in ["MQTT_BROKER", "MQTT_QOS", "MQTT_PORT", "SENTRYLAB_CONFIG", "POLL_INTERVAL", "DEBUG"] {
        command.env_remove(key);
    }
    command.env("PROXMOX_HOST", "pve1");
    command
}

#[test]
fn test_invalid_qos_exits_before_publishing() {
    let output = sentrylab()
        .env("MQTT_QOS", "5")
        .env("MQTT_BROKER", "127.0.0.1")
        .args(["setup", "101"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let logs = String::from_utf8_lossy(&output.stdout);
    assert!(!logs.contains("Connected to MQTT broker"));
}

#[test]
fn test_unreadable_config_file_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[mqtt\nhost = ").unwrap();

    let status = sentrylab()
        .arg("--config")
        .arg(&path)
        .args(["status", "101"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}

#[test]
fn test_usage_error() {
    let status = sentrylab().arg("setup").status().unwrap();
    assert!(!status.success());
}
