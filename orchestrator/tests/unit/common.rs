//! Shared fixtures: in-memory engine with fake CLIs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use ddorch::app::options::AppOptions;
use ddorch::app::state::{AppState, Collaborators};
use ddorch::deploy::compose::{ComposeCli, ComposeInvocation, OutputLine};
use ddorch::deploy::secrets::{plaintext, Plaintext, SecretDecryptor, SecretFormat};
use ddorch::errors::OrchError;
use ddorch::jobs::executor::ExecutorOptions;
use ddorch::models::inventory::{FileRole, Host, ScopeKind, Stack, StackFile};
use ddorch::models::job::Job;
use ddorch::runners::transport::{CommandOutput, CommandTransport, HostAccess};
use ddorch::storage::layout::StorageLayout;
use ddorch::store::db::Database;
use ddorch::stream::progress::StreamOptions;

pub const PRUNE_OUTPUT: &str = "Deleted Images:\nuntagged: nginx:1.25\ndeleted: sha256:aaa\n\nTotal reclaimed space: 1.5GB\n";

/// Every listing section a preview command can ask for
pub const PREVIEW_OUTPUT: &str = "## images\nsha256:aaa|150MB\nsha256:bbb|50MB\n## containers\nc1|2MB (virtual 100MB)\nc2|0B (virtual 80MB)\n## volumes\nvol1\nvol2\n## networks\nbridge\nhost\nnone\napp_default\n## build_cache\nImages|5|1.2GB (40%)\nBuild Cache|12|1.5GB\n";

/// Transport that records commands. Hosts named in `hang` never answer and
/// hosts in `fail` exit non-zero. Listing commands get [`PREVIEW_OUTPUT`],
/// everything else [`PRUNE_OUTPUT`].
#[derive(Default)]
pub struct FakeTransport {
    pub calls: Mutex<Vec<(HostAccess, String)>>,
    pub hang: Vec<String>,
    pub fail: Vec<String>,
}

impl FakeTransport {
    pub fn calls(&self) -> Vec<(HostAccess, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn matches(access: &HostAccess, names: &[String]) -> bool {
        match access {
            HostAccess::Ssh { destination } => names
                .iter()
                .any(|n| destination.ends_with(&format!("@{}", n))),
            _ => false,
        }
    }
}

#[async_trait]
impl CommandTransport for FakeTransport {
    async fn run(&self, access: &HostAccess, command: &str) -> Result<CommandOutput, OrchError> {
        self.calls
            .lock()
            .unwrap()
            .push((access.clone(), command.to_string()));
        if Self::matches(access, &self.hang) {
            std::future::pending::<()>().await;
        }
        if Self::matches(access, &self.fail) {
            return Ok(CommandOutput {
                success: false,
                code: Some(1),
                output: "Cannot connect to the Docker daemon".to_string(),
            });
        }
        let output = if command.starts_with("echo '## ") {
            PREVIEW_OUTPUT
        } else {
            PRUNE_OUTPUT
        };
        Ok(CommandOutput {
            success: true,
            code: Some(0),
            output: output.to_string(),
        })
    }
}

/// Decryptor returning fixed plaintext
#[derive(Default)]
pub struct FakeDecryptor {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakeDecryptor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretDecryptor for FakeDecryptor {
    async fn decrypt(&self, _path: &Path, _format: SecretFormat) -> Result<Plaintext, OrchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(OrchError::StagingFailure("sops: no matching key".to_string()));
        }
        Ok(plaintext(b"DB_PASSWORD=hunter2\n".to_vec()))
    }
}

/// Compose CLI that records invocations and what the staged `.env` held
#[derive(Default)]
pub struct FakeCompose {
    pub invocations: Mutex<Vec<ComposeInvocation>>,
    pub env_seen: Mutex<Vec<Option<String>>>,
    pub fail: bool,
}

impl FakeCompose {
    pub fn calls(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl ComposeCli for FakeCompose {
    async fn up(
        &self,
        invocation: &ComposeInvocation,
        lines: mpsc::UnboundedSender<OutputLine>,
    ) -> Result<(), OrchError> {
        self.invocations.lock().unwrap().push(invocation.clone());
        let env = std::fs::read_to_string(invocation.work_dir.join(".env")).ok();
        self.env_seen.lock().unwrap().push(env);

        let _ = lines.send(OutputLine::Stdout(format!(
            "Container {}-app-1 Started",
            invocation.project
        )));
        if self.fail {
            let _ = lines.send(OutputLine::Stderr("pull access denied".to_string()));
            return Err(OrchError::RunnerFailure("compose up exited with 1".to_string()));
        }
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub options: AppOptions,
    pub state: AppState,
    pub transport: Arc<FakeTransport>,
    pub decryptor: Arc<FakeDecryptor>,
    pub compose: Arc<FakeCompose>,
}

pub struct HarnessBuilder {
    transport: FakeTransport,
    decryptor: FakeDecryptor,
    compose: FakeCompose,
    host_timeout: Duration,
    auto_apply_default: bool,
}

impl HarnessBuilder {
    pub fn hang(mut self, host: &str) -> Self {
        self.transport.hang.push(host.to_string());
        self
    }

    pub fn fail(mut self, host: &str) -> Self {
        self.transport.fail.push(host.to_string());
        self
    }

    pub fn failing_decryptor(mut self) -> Self {
        self.decryptor.fail = true;
        self
    }

    pub fn failing_compose(mut self) -> Self {
        self.compose.fail = true;
        self
    }

    pub fn auto_apply_default(mut self, value: bool) -> Self {
        self.auto_apply_default = value;
        self
    }

    pub async fn build(self) -> Harness {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path().join("data"));
        layout.setup().await.unwrap();

        let options = AppOptions {
            layout,
            enable_server: false,
            executor: ExecutorOptions {
                fanout_workers: 4,
                host_timeout: self.host_timeout,
                deploy_timeout: Duration::from_secs(10),
            },
            stream: fast_stream(),
            auto_apply_default: self.auto_apply_default,
            ..Default::default()
        };

        let transport = Arc::new(self.transport);
        let decryptor = Arc::new(self.decryptor);
        let compose = Arc::new(self.compose);
        let collaborators = Collaborators {
            decryptor: decryptor.clone(),
            compose: compose.clone(),
            transport: transport.clone(),
        };

        let db = Database::open_memory().await.unwrap();
        let state = AppState::build(db, &options, collaborators);

        Harness {
            dir,
            options,
            state,
            transport,
            decryptor,
            compose,
        }
    }
}

pub fn harness() -> HarnessBuilder {
    HarnessBuilder {
        transport: FakeTransport::default(),
        decryptor: FakeDecryptor::default(),
        compose: FakeCompose::default(),
        host_timeout: Duration::from_millis(300),
        auto_apply_default: false,
    }
}

pub fn fast_stream() -> StreamOptions {
    StreamOptions {
        poll_interval: Duration::from_millis(20),
        heartbeat: Duration::from_secs(30),
        close_grace: Duration::from_millis(10),
    }
}

impl Harness {
    pub async fn add_hosts(&self, names: &[&str]) {
        for name in names {
            self.state.catalog.upsert_host(&Host::new(*name)).await.unwrap();
        }
    }

    pub async fn add_host(&self, host: Host) {
        self.state.catalog.upsert_host(&host).await.unwrap();
    }

    /// Repository root holding test stacks
    pub fn repo(&self) -> PathBuf {
        self.dir.path().join("repo")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.options.layout.staging_dir().path().to_path_buf()
    }

    /// A host-scoped stack with one compose file, plus an optional `.env`
    pub async fn add_stack(&self, host: &str, name: &str, env: Option<&str>) -> i64 {
        let rel = format!("stacks/{}/{}", host, name);
        let stack_dir = self.repo().join(&rel);
        std::fs::create_dir_all(&stack_dir).unwrap();
        std::fs::write(
            stack_dir.join("docker-compose.yml"),
            "services:\n  app:\n    image: nginx:1.25\n",
        )
        .unwrap();

        let mut files = vec![StackFile {
            role: FileRole::Compose,
            rel_path: format!("{}/docker-compose.yml", rel),
            secret: false,
        }];
        if let Some(env) = env {
            std::fs::write(stack_dir.join(".env"), env).unwrap();
            files.push(StackFile {
                role: FileRole::Env,
                rel_path: format!("{}/.env", rel),
                secret: false,
            });
        }

        let stack = Stack {
            id: 0,
            scope_kind: ScopeKind::Host,
            scope_name: host.to_string(),
            name: name.to_string(),
            root: self.repo(),
            rel_path: rel,
            files,
        };
        self.state.catalog.upsert_stack(&stack).await.unwrap()
    }

    /// Rewrite the compose file of a stack added with [`Harness::add_stack`]
    pub fn edit_compose(&self, host: &str, name: &str, content: &str) {
        let path = self
            .repo()
            .join(format!("stacks/{}/{}/docker-compose.yml", host, name));
        std::fs::write(path, content).unwrap();
    }

    pub async fn wait_terminal(&self, id: &str) -> Job {
        wait_terminal(&self.state, id).await
    }
}

/// Poll the store until the job reaches a terminal status
pub async fn wait_terminal(state: &AppState, id: &str) -> Job {
    for _ in 0..500 {
        let job = state.jobs.get(id).await.unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", id);
}

/// Files left under a directory tree
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                found.push(path);
            }
        }
    }
    found
}

pub fn host_with_vars(name: &str, vars: &[(&str, &str)]) -> Host {
    let mut host = Host::new(name);
    host.vars = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<HashMap<_, _>>();
    host
}
