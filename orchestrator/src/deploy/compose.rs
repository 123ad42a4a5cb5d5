//! Docker Compose invocation against a staged stack

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::OrchError;

/// One line of CLI output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

impl OutputLine {
    pub fn stream(&self) -> &'static str {
        match self {
            OutputLine::Stdout(_) => "stdout",
            OutputLine::Stderr(_) => "stderr",
        }
    }

    pub fn text(&self) -> &str {
        match self {
            OutputLine::Stdout(s) | OutputLine::Stderr(s) => s,
        }
    }
}

/// `compose up` for one project
#[derive(Debug, Clone)]
pub struct ComposeInvocation {
    pub project: String,
    pub compose_files: Vec<PathBuf>,
    pub work_dir: PathBuf,

    /// `DOCKER_HOST` for the CLI, `None` for the local daemon
    pub docker_host: Option<String>,
}

/// Container CLI used for deployments
#[async_trait]
pub trait ComposeCli: Send + Sync {
    /// Bring the project up. Output lines are sent as they are produced;
    /// the sender is dropped when the command exits.
    async fn up(
        &self,
        invocation: &ComposeInvocation,
        lines: mpsc::UnboundedSender<OutputLine>,
    ) -> Result<(), OrchError>;
}

/// Runs `docker compose`
pub struct DockerComposeCli {
    binary: String,
}

impl DockerComposeCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, invocation: &ComposeInvocation) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("compose").arg("-p").arg(&invocation.project);
        for file in &invocation.compose_files {
            cmd.arg("-f").arg(file);
        }
        cmd.args(["up", "-d", "--remove-orphans"])
            .current_dir(&invocation.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(host) = &invocation.docker_host {
            cmd.env("DOCKER_HOST", host);
        }
        cmd
    }
}

async fn forward_lines<R, F>(reader: R, tx: mpsc::UnboundedSender<OutputLine>, wrap: F)
where
    R: AsyncRead + Unpin,
    F: Fn(String) -> OutputLine,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        // The receiver going away only means nobody is listening.
        let _ = tx.send(wrap(line));
    }
}

#[async_trait]
impl ComposeCli for DockerComposeCli {
    async fn up(
        &self,
        invocation: &ComposeInvocation,
        lines: mpsc::UnboundedSender<OutputLine>,
    ) -> Result<(), OrchError> {
        info!(
            "Running {} compose up for project {} ({} files)",
            self.binary,
            invocation.project,
            invocation.compose_files.len()
        );

        let mut child = self.command(invocation).spawn().map_err(|e| {
            OrchError::RunnerFailure(format!("failed to run {} compose: {}", self.binary, e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OrchError::Internal("compose stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| OrchError::Internal("compose stderr not captured".to_string()))?;

        let (status, _, _) = tokio::join!(
            child.wait(),
            forward_lines(stdout, lines.clone(), OutputLine::Stdout),
            forward_lines(stderr, lines.clone(), OutputLine::Stderr),
        );
        drop(lines);

        let status = status?;
        debug!("compose up for {} exited with {}", invocation.project, status);
        if !status.success() {
            return Err(OrchError::RunnerFailure(format!(
                "docker compose up exited with {}",
                status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string())
            )));
        }
        Ok(())
    }
}
