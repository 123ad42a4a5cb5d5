//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::compose::{ComposeCli, DockerComposeCli};
use crate::deploy::deployer::Deployer;
use crate::deploy::secrets::{SecretDecryptor, SopsDecryptor};
use crate::deploy::stager::Stager;
use crate::errors::OrchError;
use crate::jobs::executor::JobExecutor;
use crate::jobs::manager::JobManager;
use crate::models::inventory::InventoryFile;
use crate::policy::auto_apply::AutoApplyResolver;
use crate::runners::transport::{CommandTransport, ShellTransport};
use crate::server::state::ServerState;
use crate::store::catalog::{Inventory, SqliteCatalog, StackCatalog};
use crate::store::db::Database;
use crate::store::jobs::{JobStore, SqliteJobStore};
use crate::store::overrides::OverrideStore;
use crate::store::stamps::StampStore;
use crate::stream::registry::ObserverRegistry;

/// External programs the engine drives
#[derive(Clone)]
pub struct Collaborators {
    pub decryptor: Arc<dyn SecretDecryptor>,
    pub compose: Arc<dyn ComposeCli>,
    pub transport: Arc<dyn CommandTransport>,
}

impl Collaborators {
    /// The real CLIs: sops, docker compose, sh / ssh
    pub fn from_options(options: &AppOptions) -> Self {
        Self {
            decryptor: Arc::new(SopsDecryptor::new(
                options.secrets.sops_binary.clone(),
                Duration::from_secs(options.secrets.decrypt_timeout_secs),
            )),
            compose: Arc::new(DockerComposeCli::new(options.compose.docker_binary.clone())),
            transport: Arc::new(ShellTransport::new(options.transport.clone())),
        }
    }
}

/// Main application state
pub struct AppState {
    pub db: Database,
    pub jobs: Arc<dyn JobStore>,
    pub catalog: Arc<SqliteCatalog>,
    pub overrides: OverrideStore,
    pub resolver: Arc<AutoApplyResolver>,
    pub deployer: Arc<Deployer>,
    pub executor: Arc<JobExecutor>,
    pub manager: Arc<JobManager>,
    pub observers: Arc<ObserverRegistry>,
}

impl AppState {
    /// Open the database, import the inventory and wire the real CLIs
    pub async fn init(options: &AppOptions) -> Result<Self, OrchError> {
        info!("Initializing application state...");

        let db_file = options.layout.database_file();
        let db = Database::open(db_file.path()).await?;
        let state = Self::build(db, options, Collaborators::from_options(options));

        let inventory_file = options.layout.inventory_file();
        if inventory_file.exists().await {
            let inventory: InventoryFile = inventory_file.read_json().await?;
            state.catalog.import(&inventory).await?;
        } else {
            info!(
                "No inventory at {}, using the stored catalog",
                inventory_file.path().display()
            );
        }

        Ok(state)
    }

    /// Wire the engine around an open database
    pub fn build(db: Database, options: &AppOptions, collaborators: Collaborators) -> Self {
        let jobs: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(&db));
        let catalog = Arc::new(SqliteCatalog::new(&db));
        let stacks: Arc<dyn StackCatalog> = catalog.clone();
        let inventory: Arc<dyn Inventory> = catalog.clone();
        let overrides = OverrideStore::new(&db);

        let resolver = Arc::new(AutoApplyResolver::new(
            overrides.clone(),
            stacks.clone(),
            inventory.clone(),
            options.auto_apply_default,
        ));

        let stager = Stager::new(
            options.layout.staging_dir(),
            stacks.clone(),
            collaborators.decryptor.clone(),
        );
        let deployer = Arc::new(Deployer::new(
            stacks,
            inventory.clone(),
            stager,
            StampStore::new(&db),
            resolver.clone(),
            collaborators.compose.clone(),
            options.transport.clone(),
        ));

        let executor = Arc::new(JobExecutor::new(
            jobs.clone(),
            inventory.clone(),
            deployer.clone(),
            options.executor.clone(),
        ));
        let manager = Arc::new(JobManager::new(
            jobs.clone(),
            inventory,
            executor.clone(),
            deployer.clone(),
            collaborators.transport.clone(),
            options.transport.clone(),
        ));

        Self {
            db,
            jobs,
            catalog,
            overrides,
            resolver,
            deployer,
            executor,
            manager,
            observers: ObserverRegistry::new(),
        }
    }

    /// State handed to the HTTP handlers
    pub fn server_state(&self, options: &AppOptions) -> ServerState {
        ServerState {
            manager: self.manager.clone(),
            jobs: self.jobs.clone(),
            observers: self.observers.clone(),
            stream_options: options.stream.clone(),
            overrides: self.overrides.clone(),
            resolver: self.resolver.clone(),
            catalog: self.catalog.clone(),
            inventory: self.catalog.clone(),
        }
    }

    /// Let running jobs finish, then close the database
    pub async fn shutdown(&self, drain_timeout: Duration) -> Result<(), OrchError> {
        info!("Shutting down application state...");
        self.executor.drain(drain_timeout).await;
        self.db.close().await;
        Ok(())
    }
}
