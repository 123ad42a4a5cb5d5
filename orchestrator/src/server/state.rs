//! Server state

use std::sync::Arc;

use crate::jobs::manager::JobManager;
use crate::policy::auto_apply::AutoApplyResolver;
use crate::store::catalog::{Inventory, StackCatalog};
use crate::store::jobs::JobStore;
use crate::store::overrides::OverrideStore;
use crate::stream::progress::StreamOptions;
use crate::stream::registry::ObserverRegistry;

/// Server state shared across handlers
pub struct ServerState {
    pub manager: Arc<JobManager>,
    pub jobs: Arc<dyn JobStore>,
    pub observers: Arc<ObserverRegistry>,
    pub stream_options: StreamOptions,
    pub overrides: OverrideStore,
    pub resolver: Arc<AutoApplyResolver>,
    pub catalog: Arc<dyn StackCatalog>,
    pub inventory: Arc<dyn Inventory>,
}
