//! Content staging for deployments.
//!
//! A stack's tracked files are copied into a private, per-attempt directory
//! that mirrors the repository layout. Secret-bearing files are decrypted
//! into that directory only. The directory is removed when the returned
//! [`StagedStack`] is removed or dropped, whichever happens first.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::deploy::secrets::{looks_encrypted, plaintext, Plaintext, SecretDecryptor, SecretFormat};
use crate::errors::OrchError;
use crate::filesys::dir::Dir;
use crate::filesys::file::{join_under, File};
use crate::models::inventory::{FileRole, Stack};
use crate::store::catalog::StackCatalog;

const MODE_SECRET: u32 = 0o600;
const MODE_PLAIN: u32 = 0o644;
const MODE_SCRIPT: u32 = 0o755;

/// An exclusively owned staging area for one deployment attempt
#[derive(Debug)]
pub struct StagedStack {
    dir: PathBuf,
    work_dir: PathBuf,
    compose_files: Vec<PathBuf>,
    cleaned: AtomicBool,
}

impl StagedStack {
    fn new(dir: PathBuf) -> Self {
        Self {
            work_dir: dir.clone(),
            dir,
            compose_files: Vec::new(),
            cleaned: AtomicBool::new(false),
        }
    }

    /// Root of the staging area
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Staged copy of the stack directory; the CLI runs from here
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Staged compose files, sorted by path
    pub fn compose_files(&self) -> &[PathBuf] {
        &self.compose_files
    }

    /// Remove the staging area. Safe to call more than once.
    pub async fn remove(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        match Dir::new(&self.dir).delete().await {
            Ok(()) => debug!("Removed staging dir {}", self.dir.display()),
            Err(e) => warn!("Failed to remove staging dir {}: {}", self.dir.display(), e),
        }
    }
}

impl Drop for StagedStack {
    // Does work only when `remove` was never awaited, e.g. a cancelled deployment.
    fn drop(&mut self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!("Removed staging dir {} on drop", self.dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staging dir {}: {}", self.dir.display(), e),
        }
    }
}

/// Stages stacks into `<base>/<scope_kind>/<scope_name>/<stack>/<attempt>`
pub struct Stager {
    base: Dir,
    catalog: Arc<dyn StackCatalog>,
    decryptor: Arc<dyn SecretDecryptor>,
}

impl Stager {
    pub fn new(
        base: Dir,
        catalog: Arc<dyn StackCatalog>,
        decryptor: Arc<dyn SecretDecryptor>,
    ) -> Self {
        Self {
            base,
            catalog,
            decryptor,
        }
    }

    /// Resolve a stack and stage it
    pub async fn stage(&self, stack_id: i64) -> Result<StagedStack, OrchError> {
        let stack = self.catalog.resolve(stack_id).await?;
        self.stage_stack(&stack).await
    }

    /// Stage an already resolved stack. Any failure removes the partial
    /// directory before returning.
    pub async fn stage_stack(&self, stack: &Stack) -> Result<StagedStack, OrchError> {
        let attempt = format!(
            "{}-{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            &crate::utils::generate_uuid()[..8]
        );
        let leaf = self
            .base
            .path()
            .join(stack.scope_kind.as_str())
            .join(safe_segment(&stack.scope_name))
            .join(safe_segment(&stack.name))
            .join(attempt);

        if let Some(parent) = leaf.parent() {
            Dir::new(parent).create().await.map_err(staging_err)?;
        }
        Dir::new(&leaf).create_private().await.map_err(staging_err)?;

        // From here on the guard owns the directory.
        let mut staged = StagedStack::new(leaf);
        staged.work_dir = join_under(staged.dir(), &stack.rel_path).map_err(staging_err)?;
        Dir::new(&staged.work_dir).create().await.map_err(staging_err)?;

        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut env_refs: Vec<String> = Vec::new();

        for file in &stack.files {
            let plain = self
                .stage_file(stack, staged.dir(), &file.rel_path, file.role, file.secret)
                .await?;
            seen.insert(normalise(&file.rel_path));

            if file.role == FileRole::Compose {
                let dst = join_under(staged.dir(), &file.rel_path).map_err(staging_err)?;
                env_refs.extend(env_file_refs(plain.expose_secret(), &file.rel_path));
                staged.compose_files.push(dst);
            }
        }

        // The project .env next to the stack is read by compose implicitly.
        let stack_dir = stack.rel_path.trim_end_matches('/');
        if stack_dir.is_empty() {
            env_refs.push(".env".to_string());
        } else {
            env_refs.push(format!("{}/.env", stack_dir));
        }

        for rel in env_refs {
            let rel = normalise(&rel);
            if seen.contains(&rel) {
                continue;
            }
            let src = join_under(&stack.root, &rel).map_err(staging_err)?;
            if !File::new(&src).exists().await {
                debug!("Skipping missing env file {}", rel);
                continue;
            }
            self.stage_file(stack, staged.dir(), &rel, FileRole::Env, false)
                .await?;
            seen.insert(rel);
        }

        staged.compose_files.sort();
        info!(
            "Staged stack {}/{} ({} files) into {}",
            stack.scope_name,
            stack.name,
            seen.len(),
            staged.dir().display()
        );
        Ok(staged)
    }

    /// Copy or decrypt one file into the staging area. Returns the contents
    /// of compose files so their `env_file` references can be followed.
    async fn stage_file(
        &self,
        stack: &Stack,
        leaf: &Path,
        rel_path: &str,
        role: FileRole,
        secret: bool,
    ) -> Result<Plaintext, OrchError> {
        let src = join_under(&stack.root, rel_path).map_err(staging_err)?;
        let dst = File::new(join_under(leaf, rel_path).map_err(staging_err)?);

        let raw = File::new(&src).read_bytes().await.map_err(|e| {
            OrchError::StagingFailure(format!("reading {}: {}", src.display(), e))
        })?;
        let format = SecretFormat::from_path(&src);

        if secret || looks_encrypted(&raw, format) {
            let plain = self.decryptor.decrypt(&src, format).await.map_err(staging_err)?;
            dst.write_with_mode(plain.expose_secret(), MODE_SECRET)
                .await
                .map_err(staging_err)?;
            if role == FileRole::Compose {
                return Ok(plain);
            }
            return Ok(plaintext(Vec::new()));
        }

        let mode = match role {
            FileRole::Env => MODE_SECRET,
            FileRole::Script => MODE_SCRIPT,
            FileRole::Compose | FileRole::Other => MODE_PLAIN,
        };
        dst.write_with_mode(&raw, mode).await.map_err(staging_err)?;
        Ok(plaintext(if role == FileRole::Compose { raw } else { Vec::new() }))
    }
}

fn staging_err(err: OrchError) -> OrchError {
    match err {
        OrchError::StagingFailure(_) => err,
        other => OrchError::StagingFailure(other.to_string()),
    }
}

/// Directory-safe version of a scope or stack name
fn safe_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Lexically normalised repository-relative path
fn normalise(rel: &str) -> String {
    join_under(Path::new(""), rel)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| rel.to_string())
}

/// `env_file` entries of every service, as repository-relative paths
fn env_file_refs(compose: &[u8], compose_rel: &str) -> Vec<String> {
    let doc: serde_yaml::Value = match serde_yaml::from_slice(compose) {
        Ok(doc) => doc,
        Err(e) => {
            debug!("Not following env_file refs in {}: {}", compose_rel, e);
            return Vec::new();
        }
    };
    let compose_dir = Path::new(compose_rel)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut refs = Vec::new();
    let Some(services) = doc.get("services").and_then(|s| s.as_mapping()) else {
        return refs;
    };
    for service in services.values() {
        let entries: Vec<&serde_yaml::Value> = match service.get("env_file") {
            Some(serde_yaml::Value::Sequence(seq)) => seq.iter().collect(),
            Some(single) => vec![single],
            None => continue,
        };
        for entry in entries {
            let path = entry
                .as_str()
                .or_else(|| entry.get("path").and_then(|p| p.as_str()));
            if let Some(path) = path {
                if Path::new(path).is_absolute() {
                    continue;
                }
                if compose_dir.is_empty() {
                    refs.push(path.to_string());
                } else {
                    refs.push(format!("{}/{}", compose_dir, path));
                }
            }
        }
    }
    refs
}
