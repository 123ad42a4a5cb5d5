//! Forward-only state machine for job status

use crate::models::job::JobStatus;

/// Job lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// The executor picked the job up
    Start,

    /// Work finished; per-target failures may still be recorded in results
    Finish,

    /// The job as a whole failed
    Fail(String),
}

/// Job FSM
#[derive(Debug, Clone)]
pub struct JobFsm {
    state: JobStatus,
    error: Option<String>,
}

impl JobFsm {
    /// Create a new FSM in queued state
    pub fn new() -> Self {
        Self::from_status(JobStatus::Queued)
    }

    /// Resume from a persisted status
    pub fn from_status(state: JobStatus) -> Self {
        Self { state, error: None }
    }

    /// Get current state
    pub fn state(&self) -> JobStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: JobEvent) -> Result<JobStatus, String> {
        let target = match &event {
            JobEvent::Start => JobStatus::Running,
            JobEvent::Finish => JobStatus::Completed,
            JobEvent::Fail(_) => JobStatus::Failed,
        };
        if !Self::predecessors(target).contains(&self.state) {
            return Err(format!("Invalid transition: {:?} -> {:?}", self.state, event));
        }

        if let JobEvent::Fail(err) = event {
            self.error = Some(err);
        }
        self.state = target;
        Ok(target)
    }

    /// Statuses a job may be in immediately before entering `to`
    pub fn predecessors(to: JobStatus) -> &'static [JobStatus] {
        match to {
            JobStatus::Queued => &[],
            JobStatus::Running => &[JobStatus::Queued],
            JobStatus::Completed | JobStatus::Failed => &[JobStatus::Running],
        }
    }
}
