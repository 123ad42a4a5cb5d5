//! How commands reach a host: locally, over SSH, or not at all

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::OrchError;
use crate::models::inventory::Host;
use crate::storage::settings::TransportSettings;

/// Resolved access mode for a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAccess {
    /// Run on this machine
    Local,

    /// Run through `ssh <destination>`
    Ssh { destination: String },

    /// The host's configuration does not allow this process to reach it
    Forbidden { reason: String },
}

impl HostAccess {
    /// `DOCKER_HOST` value for the container CLI, `None` for the local daemon
    pub fn docker_host(&self) -> Option<String> {
        match self {
            HostAccess::Ssh { destination } => Some(format!("ssh://{}", destination)),
            HostAccess::Local | HostAccess::Forbidden { .. } => None,
        }
    }
}

const LOCAL_ADDRS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// Whether this process may use the host's docker daemon directly
pub fn local_allowed(host: &Host, settings: &TransportSettings) -> bool {
    if host.var_truthy("docker_local") {
        return true;
    }
    if let Some(local) = settings.local_host.as_deref() {
        if local.eq_ignore_ascii_case(&host.name) {
            return true;
        }
    }
    let addr = host.address();
    LOCAL_ADDRS.iter().any(|a| *a == addr)
}

/// Decide how to reach a host
pub fn resolve_access(host: &Host, settings: &TransportSettings) -> HostAccess {
    let local = local_allowed(host, settings);

    if let Some(docker_host) = host.var("docker_host") {
        if docker_host.starts_with("unix://") && !local {
            return HostAccess::Forbidden {
                reason: format!(
                    "local docker socket {} is not permitted for host {}",
                    docker_host, host.name
                ),
            };
        }
    }

    if local {
        return HostAccess::Local;
    }

    let user = host.var("ansible_user").unwrap_or(settings.ssh_user.as_str());
    HostAccess::Ssh {
        destination: format!("{}@{}", user, host.address()),
    }
}

/// Captured result of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,

    /// stdout followed by stderr
    pub output: String,
}

/// Runs shell commands on a host
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn run(&self, access: &HostAccess, command: &str) -> Result<CommandOutput, OrchError>;
}

/// Runs commands with `sh -c` locally or through the `ssh` client
pub struct ShellTransport {
    settings: TransportSettings,
}

impl ShellTransport {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }

    fn ssh_command(&self, destination: &str, command: &str) -> Command {
        let mut cmd = Command::new(&self.settings.ssh_binary);
        cmd.args(["-o", "BatchMode=yes"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.settings.connect_timeout_secs));
        if !self.settings.strict_host_key {
            cmd.args([
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
            ]);
        }
        if let Some(key) = &self.settings.ssh_key_file {
            cmd.arg("-i").arg(key);
        }
        cmd.arg(destination).arg(command);
        cmd
    }
}

#[async_trait]
impl CommandTransport for ShellTransport {
    async fn run(&self, access: &HostAccess, command: &str) -> Result<CommandOutput, OrchError> {
        let mut cmd = match access {
            HostAccess::Local => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
                cmd
            }
            HostAccess::Ssh { destination } => self.ssh_command(destination, command),
            HostAccess::Forbidden { reason } => {
                return Err(OrchError::RunnerFailure(reason.clone()));
            }
        };
        debug!("Running `{}` via {:?}", command, access);

        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OrchError::RunnerFailure(format!("failed to spawn command: {}", e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            output: text,
        })
    }
}
