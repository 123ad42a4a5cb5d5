//! ddorch - Entry Point
//!
//! Job and deployment orchestrator for container hosts. Serves the HTTP API,
//! runs cleanup and deployment jobs, and streams their progress.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use ddorch::app::options::{AppOptions, AUTO_APPLY_ENV};
use ddorch::app::run::run;
use ddorch::filesys::file::File;
use ddorch::logs::{init_logging, LogLevel, LogOptions};
use ddorch::storage::layout::StorageLayout;
use ddorch::storage::settings::Settings;
use ddorch::utils::version_info;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };
    if let Err(e) = layout.setup().await {
        eprintln!("Unable to prepare {}: {}", layout.base_dir.display(), e);
        return;
    }

    // Retrieve the settings file; a missing one means defaults
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(PathBuf::from(path)),
        None => layout.settings_file(),
    };
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {}", e);
                return;
            }
        }
    } else {
        Settings::default()
    };

    // Initialize logging
    let log_level = match cli_args.get("log-level") {
        Some(level) => match level.parse::<LogLevel>() {
            Ok(level) => level,
            Err(e) => {
                eprintln!("{}", e);
                return;
            }
        },
        None => settings.log_level.clone(),
    };
    let log_options = LogOptions {
        log_level,
        file: settings.log_to_file,
        log_dir: layout.logs_dir().path().to_path_buf(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let env_apply = env::var(AUTO_APPLY_ENV).ok();
    if let Some(raw) = env_apply.as_deref() {
        if ddorch::utils::parse_truthy(raw).is_none() {
            warn!("Ignoring {}={}: not a boolean", AUTO_APPLY_ENV, raw);
        }
    }

    // Run the server
    let options = AppOptions::from_settings(&settings, layout, env_apply.as_deref());
    info!("Running ddorch {} with options: {:?}", version.version, options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run ddorch: {e}");
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    error!("Unable to install signal handlers, waiting for Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
