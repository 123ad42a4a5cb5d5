//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Orchestrator settings, read from `settings.json`.
///
/// Every field has a default so a partial (or empty) file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write rolling log files
    #[serde(default)]
    pub log_to_file: bool,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Global default for automatic deployments, used when no override is
    /// stored. `DDUI_DEVOPS_APPLY` takes precedence.
    #[serde(default)]
    pub auto_apply_default: bool,

    /// Job executor configuration
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Progress stream configuration
    #[serde(default)]
    pub stream: StreamSettings,

    /// Remote command transport configuration
    #[serde(default)]
    pub transport: TransportSettings,

    /// Secret decryption configuration
    #[serde(default)]
    pub secrets: SecretsSettings,

    /// Container CLI configuration
    #[serde(default)]
    pub compose: ComposeSettings,

    /// Automatic deployment worker
    #[serde(default)]
    pub auto_deployer: AutoDeployerSettings,
}

fn default_true() -> bool {
    true
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Job executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Concurrent workers for fleet-wide operations
    #[serde(default = "default_fanout_workers")]
    pub fanout_workers: usize,

    /// Per-host timeout for cleanup operations
    #[serde(default = "default_host_timeout_secs")]
    pub host_timeout_secs: u64,

    /// Timeout for a whole deployment attempt
    #[serde(default = "default_deploy_timeout_secs")]
    pub deploy_timeout_secs: u64,
}

fn default_fanout_workers() -> usize {
    4
}

fn default_host_timeout_secs() -> u64 {
    60
}

fn default_deploy_timeout_secs() -> u64 {
    900
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            fanout_workers: default_fanout_workers(),
            host_timeout_secs: default_host_timeout_secs(),
            deploy_timeout_secs: default_deploy_timeout_secs(),
        }
    }
}

/// Progress stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Delay between the `complete` event and closing the stream
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_heartbeat_secs() -> u64 {
    10
}

fn default_close_grace_ms() -> u64 {
    500
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            close_grace_ms: default_close_grace_ms(),
        }
    }
}

/// Remote command transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,

    /// Login user when the host has no `ansible_user` var
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    #[serde(default)]
    pub ssh_key_file: Option<String>,

    #[serde(default = "default_true")]
    pub strict_host_key: bool,

    /// Name of the inventory host this process runs on
    #[serde(default)]
    pub local_host: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            ssh_binary: default_ssh_binary(),
            ssh_user: default_ssh_user(),
            ssh_key_file: None,
            strict_host_key: true,
            local_host: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Secret decryption settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsSettings {
    #[serde(default = "default_sops_binary")]
    pub sops_binary: String,

    #[serde(default = "default_decrypt_timeout_secs")]
    pub decrypt_timeout_secs: u64,
}

fn default_sops_binary() -> String {
    "sops".to_string()
}

fn default_decrypt_timeout_secs() -> u64 {
    15
}

impl Default for SecretsSettings {
    fn default() -> Self {
        Self {
            sops_binary: default_sops_binary(),
            decrypt_timeout_secs: default_decrypt_timeout_secs(),
        }
    }
}

/// Container CLI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeSettings {
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

impl Default for ComposeSettings {
    fn default() -> Self {
        Self {
            docker_binary: default_docker_binary(),
        }
    }
}

/// Automatic deployment worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoDeployerSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_auto_deploy_interval_secs")]
    pub interval_secs: u64,
}

fn default_auto_deploy_interval_secs() -> u64 {
    300
}

impl Default for AutoDeployerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_auto_deploy_interval_secs(),
        }
    }
}
