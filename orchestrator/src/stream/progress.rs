//! Job progress as an event stream.
//!
//! The stream polls the job store on a short interval and only emits when
//! the job's status or progress changed. It is independent of the executor:
//! dropping it detaches the observer and nothing else.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::OrchError;
use crate::models::job::{Job, JobStatus, Payload};
use crate::storage::settings::StreamSettings;
use crate::store::jobs::JobStore;
use crate::stream::registry::{ObserverGuard, ObserverRegistry};

/// Stream timing
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub poll_interval: Duration,
    pub heartbeat: Duration,
    pub close_grace: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from(&StreamSettings::default())
    }
}

impl From<&StreamSettings> for StreamOptions {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            heartbeat: Duration::from_secs(settings.heartbeat_secs),
            close_grace: Duration::from_millis(settings.close_grace_ms),
        }
    }
}

/// One frame for an observer
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected { job_id: String },
    Progress(Job),
    Complete(Job),
    Error { message: String },
    Heartbeat,
}

impl StreamEvent {
    /// SSE event name; heartbeats are comments and have none
    pub fn name(&self) -> Option<&'static str> {
        match self {
            StreamEvent::Connected { .. } => Some("connected"),
            StreamEvent::Progress(_) => Some("progress"),
            StreamEvent::Complete(_) => Some("complete"),
            StreamEvent::Error { .. } => Some("error"),
            StreamEvent::Heartbeat => None,
        }
    }
}

enum Phase {
    Connect,
    Snapshot(Job),
    Complete(Job),
    Polling,
    Closing,
    Done,
}

struct StreamState {
    store: Arc<dyn JobStore>,
    registry: Arc<ObserverRegistry>,
    job_id: String,
    options: StreamOptions,
    phase: Phase,
    last_seen: Option<(JobStatus, Payload)>,
    last_beat: Instant,
    _guard: Option<ObserverGuard>,
}

impl StreamState {
    fn changed(&mut self, job: &Job) -> bool {
        let changed = match &self.last_seen {
            Some((status, progress)) => *status != job.status || *progress != job.progress,
            None => true,
        };
        if changed {
            self.last_seen = Some((job.status, job.progress.clone()));
        }
        changed
    }

    /// Emit for a freshly read job
    fn on_job(&mut self, job: Job) -> Option<StreamEvent> {
        if job.status.is_terminal() {
            self.phase = Phase::Closing;
            return Some(StreamEvent::Complete(job));
        }
        if self.changed(&job) {
            return Some(StreamEvent::Progress(job));
        }
        None
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Connect => match self.store.get(&self.job_id).await {
                    Ok(job) => {
                        self._guard = Some(self.registry.register(&self.job_id));
                        self.phase = Phase::Snapshot(job);
                        return Some(StreamEvent::Connected {
                            job_id: self.job_id.clone(),
                        });
                    }
                    Err(OrchError::NotFound(_)) => {
                        return Some(StreamEvent::Error {
                            message: format!("job {} not found", self.job_id),
                        });
                    }
                    Err(e) => {
                        return Some(StreamEvent::Error {
                            message: e.to_string(),
                        });
                    }
                },
                Phase::Snapshot(job) => {
                    self.phase = Phase::Polling;
                    self.last_beat = Instant::now();
                    // The first frame after `connected` is always a snapshot
                    self.changed(&job);
                    if job.status.is_terminal() {
                        self.phase = Phase::Complete(job.clone());
                    }
                    return Some(StreamEvent::Progress(job));
                }
                Phase::Complete(job) => {
                    self.phase = Phase::Closing;
                    return Some(StreamEvent::Complete(job));
                }
                Phase::Polling => {
                    self.phase = Phase::Polling;
                    tokio::time::sleep(self.options.poll_interval).await;

                    match self.store.get(&self.job_id).await {
                        Ok(job) => {
                            if let Some(event) = self.on_job(job) {
                                return Some(event);
                            }
                        }
                        Err(OrchError::NotFound(_)) => {
                            self.phase = Phase::Done;
                            self._guard = None;
                            return Some(StreamEvent::Error {
                                message: format!("job {} disappeared", self.job_id),
                            });
                        }
                        Err(OrchError::StoreUnavailable(e)) => {
                            debug!("Job store unavailable while streaming {}: {}", self.job_id, e);
                        }
                        Err(e) => {
                            warn!("Failed to poll job {}: {}", self.job_id, e);
                        }
                    }

                    if self.last_beat.elapsed() >= self.options.heartbeat {
                        self.last_beat = Instant::now();
                        return Some(StreamEvent::Heartbeat);
                    }
                }
                Phase::Closing => {
                    tokio::time::sleep(self.options.close_grace).await;
                    return None;
                }
                Phase::Done => return None,
            }
        }
    }
}

/// Events for one job until it reaches a terminal status: `connected`, a
/// `progress` snapshot, `progress` on each change, then `complete`. An
/// unknown job yields a single `error` event, and so does a job that vanishes
/// mid-stream, after which the stream ends.
pub fn job_events(
    store: Arc<dyn JobStore>,
    registry: Arc<ObserverRegistry>,
    job_id: impl Into<String>,
    options: StreamOptions,
) -> impl Stream<Item = StreamEvent> + Send {
    let state = StreamState {
        store,
        registry,
        job_id: job_id.into(),
        options,
        phase: Phase::Connect,
        last_seen: None,
        last_beat: Instant::now(),
        _guard: None,
    };

    stream::unfold(state, |mut state| async move {
        let event = state.next_event().await?;
        Some((event, state))
    })
}
