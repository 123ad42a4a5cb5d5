//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::OrchError;
use crate::server::serve::serve;
use crate::workers::auto_deploy;

/// Run the orchestrator until the shutdown signal fires
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), OrchError> {
    info!("Initializing ddorch...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start ddorch: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), OrchError> {
    options.layout.setup().await?;

    let app_state = Arc::new(AppState::init(options).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    if options.enable_server {
        init_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    if options.enable_auto_deployer {
        init_auto_deploy_worker(
            options.auto_deployer.clone(),
            app_state,
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    Ok(())
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), OrchError> {
    info!("Initializing HTTP server...");

    let server_state = app_state.server_state(options);
    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

fn init_auto_deploy_worker(
    options: auto_deploy::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), OrchError> {
    info!("Initializing auto-deploy worker...");

    let handle = tokio::spawn(async move {
        auto_deploy::run(
            &options,
            app_state.catalog.as_ref(),
            app_state.resolver.as_ref(),
            app_state.manager.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_auto_deploy_worker_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), OrchError>>>,
    auto_deploy_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
            auto_deploy_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), OrchError> {
        if self.app_state.is_some() {
            return Err(OrchError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), OrchError>>,
    ) -> Result<(), OrchError> {
        if self.server_handle.is_some() {
            return Err(OrchError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub fn with_auto_deploy_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), OrchError> {
        if self.auto_deploy_worker_handle.is_some() {
            return Err(OrchError::ShutdownError(
                "auto_deploy_worker_handle already set".to_string(),
            ));
        }
        self.auto_deploy_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), OrchError> {
        let _ = self.shutdown_tx.send(());

        // Workers and server get the delay once, draining jobs gets it again.
        let limit = self.lifecycle_options.max_shutdown_delay * 2;
        match tokio::time::timeout(limit, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}, forcing shutdown...", limit);
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), OrchError> {
        info!("Shutting down ddorch...");

        // 1. Auto-deploy worker, so no new jobs are submitted
        if let Some(handle) = self.auto_deploy_worker_handle.take() {
            handle.await.map_err(|e| OrchError::ShutdownError(e.to_string()))?;
        }

        // 2. HTTP server
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| OrchError::ShutdownError(e.to_string()))??;
        }

        // 3. Running jobs and the database
        if let Some(app_state) = self.app_state.take() {
            app_state
                .shutdown(self.lifecycle_options.max_shutdown_delay)
                .await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
