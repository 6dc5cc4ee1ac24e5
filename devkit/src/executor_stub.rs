/*!
Exécuteur distant simulé

Réponses scriptées pour les commandes hôte (`pct`, `qm`) et invité, sans
Proxmox. Une commande non scriptée répond comme un shell: code 127.
*/

use async_trait::async_trait;
use sentrylab_agent::{Device, ExecError, ExecutionResult, RemoteExecutor};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Chemin de déploiement par défaut de l'agent
pub const DEFAULT_DEPLOY_PATH: &str = "/opt/sentrylab";

#[derive(Debug, Clone)]
enum Reply {
    Done(ExecutionResult),
    Unreachable,
}

#[derive(Clone, Default)]
pub struct MockExecutor {
    host: Arc<Mutex<HashMap<String, Reply>>>,
    guest: Arc<Mutex<HashMap<String, Reply>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// `args` joint par des espaces, ex. `"pct status 101"`
    pub fn on_host(self, args: &str, result: ExecutionResult) -> Self {
        self.host.lock().unwrap().insert(args.to_string(), Reply::Done(result));
        self
    }

    pub fn on_guest(self, command: &str, result: ExecutionResult) -> Self {
        self.guest.lock().unwrap().insert(command.to_string(), Reply::Done(result));
        self
    }

    /// L'invité ne répond pas (agent QEMU absent, ssh coupé)
    pub fn guest_unreachable(self, command: &str) -> Self {
        self.guest.lock().unwrap().insert(command.to_string(), Reply::Unreachable);
        self
    }

    /// CT existant et démarré
    pub fn running_ct(vmid: u32, hostname: &str) -> Self {
        Self::new()
            .on_host(&format!("pct status {}", vmid), ExecutionResult::ok("status: running\n"))
            .on_host(
                &format!("pct config {}", vmid),
                ExecutionResult::ok(format!("arch: amd64\nhostname: {}\nmemory: 2048\n", hostname)),
            )
    }

    /// CT existant et arrêté
    pub fn stopped_ct(vmid: u32, hostname: &str) -> Self {
        Self::new()
            .on_host(&format!("pct status {}", vmid), ExecutionResult::ok("status: stopped\n"))
            .on_host(
                &format!("pct config {}", vmid),
                ExecutionResult::ok(format!("hostname: {}\n", hostname)),
            )
    }

    /// Docker démarré; `inspect` est la sortie de `docker inspect`
    pub fn with_docker(self, version: &str, inspect: &str) -> Self {
        self.on_guest("command -v docker", ExecutionResult::ok("/usr/bin/docker\n"))
            .on_guest(
                "docker version --format '{{.Server.Version}}'",
                ExecutionResult::ok(format!("{}\n", version)),
            )
            .on_guest("docker ps -aq | xargs -r docker inspect", ExecutionResult::ok(inspect))
    }

    /// Docker installé, démon arrêté
    pub fn with_docker_stopped(self, client_version: &str) -> Self {
        self.on_guest("command -v docker", ExecutionResult::ok("/usr/bin/docker\n"))
            .on_guest(
                "docker version --format '{{.Server.Version}}'",
                ExecutionResult::failed(1, "Cannot connect to the Docker daemon"),
            )
            .on_guest(
                "docker version --format '{{.Client.Version}}' 2>/dev/null",
                ExecutionResult::ok(format!("{}\n", client_version)),
            )
    }

    pub fn without_docker(self) -> Self {
        self.on_guest("command -v docker", ExecutionResult::failed(1, ""))
    }

    /// Agent déployé dans `DEFAULT_DEPLOY_PATH` à l'instant `epoch`
    pub fn deployed_at(self, epoch: i64) -> Self {
        self.on_guest(
            &format!("test -d {0} && stat -c %Y {0}", DEFAULT_DEPLOY_PATH),
            ExecutionResult::ok(format!("{}\n", epoch)),
        )
    }

    /// Commandes reçues, préfixées `host:` ou `guest:<vmid>:`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(reply: Option<Reply>, program: &str, line: &str) -> Result<ExecutionResult, ExecError> {
        match reply {
            Some(Reply::Done(result)) => Ok(result),
            Some(Reply::Unreachable) => Err(ExecError::Spawn {
                program: program.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "unreachable"),
            }),
            None => Ok(ExecutionResult::failed(127, format!("{}: not found", line))),
        }
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn run_host(&self, args: &[&str]) -> Result<ExecutionResult, ExecError> {
        let line = args.join(" ");
        self.calls.lock().unwrap().push(format!("host:{}", line));
        log::debug!("🖥️ [MOCK] host: {}", line);
        let reply = self.host.lock().unwrap().get(&line).cloned();
        Self::answer(reply, args.first().copied().unwrap_or_default(), &line)
    }

    async fn run_guest(&self, device: &Device, command: &str) -> Result<ExecutionResult, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("guest:{}:{}", device.vmid(), command));
        log::debug!("📦 [MOCK] guest {}: {}", device.vmid(), command);
        let reply = self.guest.lock().unwrap().get(command).cloned();
        Self::answer(reply, "pct", command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentrylab_agent::GuestKind;

    #[tokio::test]
    async fn test_scripted_and_unknown_commands() {
        let executor = MockExecutor::running_ct(101, "web");
        let status = executor.run_host(&["pct", "status", "101"]).await.unwrap();
        assert!(status.success);

        let missing = executor.run_host(&["qm", "status", "101"]).await.unwrap();
        assert_eq!(missing.exit_code, Some(127));

        let device = Device::new("pve1", 101, GuestKind::Ct, None);
        let unreachable = executor.guest_unreachable("uptime");
        assert!(unreachable.run_guest(&device, "uptime").await.is_err());
        assert_eq!(unreachable.calls().len(), 3);
    }
}
