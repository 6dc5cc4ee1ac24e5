//! Remote command execution against Proxmox guests
//!
//! Handles:
//! - Host commands (`pct`, `qm`), locally or through `ssh`
//! - Guest commands via `pct exec` (CT) and `qm guest exec` (VM)
//! - Optional timeout, off by default
//!
//! One command per call, synchronous from the caller's point of view; a
//! non-zero exit status is reported in `ExecutionResult`, not as an error.

use crate::device::{Device, GuestKind};
use crate::error::ExecError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Command execution result
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u128,
}

impl ExecutionResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// First non-empty line of stdout
    pub fn first_line(&self) -> Option<&str> {
        self.stdout.lines().map(str::trim).find(|l| !l.is_empty())
    }
}

/// Runs commands on the Proxmox host and inside its guests
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a program with arguments on the Proxmox host.
    async fn run_host(&self, args: &[&str]) -> Result<ExecutionResult, ExecError>;

    /// Run a shell command line inside the guest.
    async fn run_guest(&self, device: &Device, command: &str) -> Result<ExecutionResult, ExecError>;
}

/// `pct` / `qm` based executor
#[derive(Debug, Clone, Default)]
pub struct ProxmoxExecutor {
    ssh_target: Option<String>,
    timeout: Option<Duration>,
}

impl ProxmoxExecutor {
    pub fn new(ssh_target: Option<String>, timeout_secs: Option<u64>) -> Self {
        Self {
            ssh_target,
            timeout: timeout_secs.map(Duration::from_secs),
        }
    }

    /// Program and arguments actually spawned for a host command
    pub fn host_command(&self, args: &[&str]) -> Option<(String, Vec<String>)> {
        let (program, rest) = args.split_first()?;
        Some(match &self.ssh_target {
            Some(target) => (
                "ssh".to_string(),
                vec![
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    target.clone(),
                    shell_words::join(args),
                ],
            ),
            None => (program.to_string(), rest.iter().map(|s| s.to_string()).collect()),
        })
    }

    async fn spawn(&self, program: &str, args: &[String]) -> Result<ExecutionResult, ExecError> {
        let start_time = Instant::now();
        debug!("Executing: {} {}", program, shell_words::join(args));

        let child = AsyncCommand::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child)
                .await
                .map_err(|_| ExecError::Timeout(limit.as_secs()))?,
            None => child.await,
        }
        .map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

        Ok(ExecutionResult {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }
}

#[async_trait]
impl RemoteExecutor for ProxmoxExecutor {
    async fn run_host(&self, args: &[&str]) -> Result<ExecutionResult, ExecError> {
        let (program, args) = self.host_command(args).ok_or_else(|| ExecError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;
        self.spawn(&program, &args).await
    }

    async fn run_guest(&self, device: &Device, command: &str) -> Result<ExecutionResult, ExecError> {
        let args = guest_args(device, command);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let result = self.run_host(&args).await?;

        Ok(match device.kind() {
            GuestKind::Ct => result,
            GuestKind::Vm => parse_guest_exec(result),
        })
    }
}

/// Host command running `command` inside the guest through `sh -c`
pub fn guest_args(device: &Device, command: &str) -> Vec<String> {
    let vmid = device.vmid().to_string();
    let mut args: Vec<String> = match device.kind() {
        GuestKind::Ct => vec!["pct".into(), "exec".into(), vmid],
        GuestKind::Vm => vec!["qm".into(), "guest".into(), "exec".into(), vmid],
    };
    args.extend(["--".into(), "sh".into(), "-c".into(), command.to_string()]);
    args
}

/// `qm guest exec` prints a JSON report; `qm` itself succeeds even when
/// the guest command failed.
#[derive(Debug, Deserialize)]
struct GuestExecReport {
    exitcode: Option<i32>,
    #[serde(rename = "out-data", default)]
    out_data: String,
    #[serde(rename = "err-data", default)]
    err_data: String,
}

pub fn parse_guest_exec(raw: ExecutionResult) -> ExecutionResult {
    if !raw.success {
        return raw;
    }
    match serde_json::from_str::<GuestExecReport>(raw.stdout.trim()) {
        Ok(report) => ExecutionResult {
            success: report.exitcode == Some(0),
            exit_code: report.exitcode,
            stdout: report.out_data,
            stderr: report.err_data,
            execution_time_ms: raw.execution_time_ms,
        },
        Err(e) => ExecutionResult {
            success: false,
            exit_code: None,
            stderr: format!("unreadable qm guest exec output: {}", e),
            ..raw
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_args() {
        let ct = Device::new("pve1", 101, GuestKind::Ct, None);
        assert_eq!(
            guest_args(&ct, "command -v docker"),
            vec!["pct", "exec", "101", "--", "sh", "-c", "command -v docker"]
        );

        let vm = Device::new("pve1", 200, GuestKind::Vm, None);
        assert_eq!(guest_args(&vm, "true")[..4], ["qm", "guest", "exec", "200"]);
    }

    #[test]
    fn test_ssh_wrapping() {
        let executor = ProxmoxExecutor::new(Some("root@pve1".to_string()), None);
        let (program, args) = executor
            .host_command(&["pct", "exec", "101", "--", "sh", "-c", "docker ps -aq"])
            .unwrap();
        assert_eq!(program, "ssh");
        assert_eq!(args[2], "root@pve1");
        assert_eq!(args[3], "pct exec 101 -- sh -c 'docker ps -aq'");

        let local = ProxmoxExecutor::default();
        let (program, args) = local.host_command(&["pct", "status", "101"]).unwrap();
        assert_eq!(program, "pct");
        assert_eq!(args, vec!["status", "101"]);
        assert!(local.host_command(&[]).is_none());
    }

    #[test]
    fn test_parse_guest_exec() {
        let ok = parse_guest_exec(ExecutionResult::ok(
            r#"{"exitcode":0,"exited":1,"out-data":"/usr/bin/docker\n"}"#,
        ));
        assert!(ok.success);
        assert_eq!(ok.first_line(), Some("/usr/bin/docker"));

        let failed = parse_guest_exec(ExecutionResult::ok(r#"{"exitcode":1,"exited":1}"#));
        assert!(!failed.success);
        assert_eq!(failed.exit_code, Some(1));

        let no_agent = parse_guest_exec(ExecutionResult::failed(255, "QEMU guest agent is not running"));
        assert!(!no_agent.success);
        assert!(no_agent.stderr.contains("guest agent"));
    }

    #[tokio::test]
    async fn test_host_command_execution() {
        let executor = ProxmoxExecutor::new(None, Some(5));
        let result = executor.run_host(&["echo", "Hello World"]).await.unwrap();
        assert!(result.success);
        assert_eq!(result.first_line(), Some("Hello World"));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let executor = ProxmoxExecutor::new(None, Some(1));
        let result = executor.run_host(&["sleep", "10"]).await;
        assert!(matches!(result, Err(ExecError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let executor = ProxmoxExecutor::default();
        let result = executor.run_host(&["definitely-not-a-real-binary-sl"]).await;
        assert!(matches!(result, Err(ExecError::Spawn { .. })));
    }
}
