//! Connected stream observers, keyed by job id

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

/// Process-owned registry of open job streams. Entries are added by
/// [`ObserverRegistry::register`] and removed when the returned guard drops.
#[derive(Debug, Default)]
pub struct ObserverRegistry {
    observers: Mutex<HashMap<String, usize>>,
}

impl ObserverRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn observers(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        match self.observers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Track one observer of `job_id` for as long as the guard lives
    pub fn register(self: &Arc<Self>, job_id: &str) -> ObserverGuard {
        let mut observers = self.observers();
        let count = observers.entry(job_id.to_string()).or_insert(0);
        *count += 1;
        debug!("Observer attached to job {} ({} open)", job_id, count);
        ObserverGuard {
            registry: Arc::clone(self),
            job_id: job_id.to_string(),
        }
    }

    /// Open streams for one job
    pub fn count(&self, job_id: &str) -> usize {
        self.observers().get(job_id).copied().unwrap_or(0)
    }

    /// Open streams across all jobs
    pub fn total(&self) -> usize {
        self.observers().values().sum()
    }

    fn release(&self, job_id: &str) {
        let mut observers = self.observers();
        if let Some(count) = observers.get_mut(job_id) {
            *count -= 1;
            if *count == 0 {
                observers.remove(job_id);
            }
        }
        debug!("Observer detached from job {}", job_id);
    }
}

/// Removes its registry entry on drop
#[derive(Debug)]
pub struct ObserverGuard {
    registry: Arc<ObserverRegistry>,
    job_id: String,
}

impl ObserverGuard {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.registry.release(&self.job_id);
    }
}
