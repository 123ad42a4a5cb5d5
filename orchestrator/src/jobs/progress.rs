//! Progress reporting into a job's `progress` map

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::warn;

use crate::deploy::compose::OutputLine;
use crate::models::job::Payload;
use crate::store::jobs::JobStore;

/// Output lines kept in `progress.output`
const OUTPUT_TAIL: usize = 200;

/// Receives progress from a running operation
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn phase(&self, phase: &str, message: &str);

    async fn output(&self, line: &OutputLine);
}

/// Discards progress; used where no job is tracked
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn phase(&self, _phase: &str, _message: &str) {}

    async fn output(&self, _line: &OutputLine) {}
}

/// Keeps the current progress map of one job and writes it wholesale on
/// every change. Store errors are logged, never propagated.
pub struct JobProgress {
    store: Arc<dyn JobStore>,
    job_id: String,
    state: Mutex<Payload>,
}

impl JobProgress {
    pub fn new(store: Arc<dyn JobStore>, job_id: impl Into<String>) -> Self {
        Self {
            store,
            job_id: job_id.into(),
            state: Mutex::new(Payload::new()),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Mutate the map and persist it
    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Payload) + Send,
    {
        let mut state = self.state.lock().await;
        f(&mut *state);
        if let Err(e) = self.store.set_progress(&self.job_id, &*state).await {
            warn!("Failed to write progress for job {}: {}", self.job_id, e);
        }
    }

    /// Set a single key
    pub async fn set(&self, key: &str, value: Value) {
        let key = key.to_string();
        self.update(move |p| {
            p.insert(key, value);
        })
        .await;
    }

    pub async fn snapshot(&self) -> Payload {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl ProgressSink for JobProgress {
    async fn phase(&self, phase: &str, message: &str) {
        let phase = phase.to_string();
        let message = message.to_string();
        self.update(move |p| {
            p.insert("phase".to_string(), Value::String(phase));
            p.insert("message".to_string(), Value::String(message));
        })
        .await;
    }

    async fn output(&self, line: &OutputLine) {
        let entry = json!({ "stream": line.stream(), "line": line.text() });
        self.update(move |p| {
            let count = p.get("line_count").and_then(Value::as_u64).unwrap_or(0) + 1;
            p.insert("line_count".to_string(), json!(count));

            let output = p
                .entry("output".to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(lines) = output {
                lines.push(entry);
                if lines.len() > OUTPUT_TAIL {
                    let excess = lines.len() - OUTPUT_TAIL;
                    lines.drain(..excess);
                }
            }
        })
        .await;
    }
}
