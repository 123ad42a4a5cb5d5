//! Application configuration options

use std::time::Duration;

use crate::jobs::executor::ExecutorOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{ComposeSettings, SecretsSettings, Settings, TransportSettings};
use crate::stream::progress::StreamOptions;
use crate::workers::auto_deploy;

/// Environment variable carrying the auto-apply default
pub const AUTO_APPLY_ENV: &str = "DDUI_DEVOPS_APPLY";

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Enable the HTTP server
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Enable the auto-deploy worker
    pub enable_auto_deployer: bool,

    /// Auto-deploy worker options
    pub auto_deployer: auto_deploy::Options,

    pub executor: ExecutorOptions,
    pub stream: StreamOptions,
    pub transport: TransportSettings,
    pub secrets: SecretsSettings,
    pub compose: ComposeSettings,

    /// Environment default of the auto-apply policy
    pub auto_apply_default: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::default(),
            enable_server: true,
            server: ServerOptions::default(),
            enable_auto_deployer: false,
            auto_deployer: auto_deploy::Options::default(),
            executor: ExecutorOptions::default(),
            stream: StreamOptions::default(),
            transport: TransportSettings::default(),
            secrets: SecretsSettings::default(),
            compose: ComposeSettings::default(),
            auto_apply_default: false,
        }
    }
}

impl AppOptions {
    /// Options for a settings file. `env_apply` is the raw value of
    /// `DDUI_DEVOPS_APPLY`, which wins over the file when it parses.
    pub fn from_settings(
        settings: &Settings,
        layout: StorageLayout,
        env_apply: Option<&str>,
    ) -> Self {
        let auto_apply_default = env_apply
            .and_then(crate::utils::parse_truthy)
            .unwrap_or(settings.auto_apply_default);

        Self {
            layout,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            enable_auto_deployer: settings.auto_deployer.enabled,
            auto_deployer: auto_deploy::Options {
                interval: Duration::from_secs(settings.auto_deployer.interval_secs),
                ..Default::default()
            },
            executor: ExecutorOptions::from(&settings.executor),
            stream: StreamOptions::from(&settings.stream),
            transport: settings.transport.clone(),
            secrets: settings.secrets.clone(),
            compose: settings.compose.clone(),
            auto_apply_default,
            ..Default::default()
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, and for draining running jobs
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
