//! File operations

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::OrchError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, OrchError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;
        Ok(contents)
    }

    /// Read file contents as bytes
    pub async fn read_bytes(&self) -> Result<Vec<u8>, OrchError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await?;
        Ok(contents)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, OrchError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write bytes to file, creating parent directories
    pub async fn write_bytes(&self, contents: &[u8]) -> Result<(), OrchError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Write bytes and restrict the file to `mode` on Unix
    pub async fn write_with_mode(&self, contents: &[u8], mode: u32) -> Result<(), OrchError> {
        self.write_bytes(contents).await?;
        self.set_mode(mode).await
    }

    /// Set the file's permission bits on Unix.
    ///
    /// A no-op on non-Unix platforms.
    pub async fn set_mode(&self, mode: u32) -> Result<(), OrchError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = fs::metadata(&self.path).await?;
            let mut perms = meta.permissions();
            perms.set_mode(mode);
            fs::set_permissions(&self.path, perms).await?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(())
    }
}

/// Join `rel` under `root`, refusing absolute paths and any `..` that would
/// leave `root`. The result is lexically normalised, the filesystem is not
/// consulted.
pub fn join_under(root: &Path, rel: &str) -> Result<PathBuf, OrchError> {
    use std::path::Component;

    let rel_path = Path::new(rel);
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in rel_path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(OrchError::InvalidInput(format!(
                        "path escapes root: {}",
                        rel
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(OrchError::InvalidInput(format!(
                    "absolute path not allowed: {}",
                    rel
                )));
            }
        }
    }

    let mut joined = root.to_path_buf();
    joined.extend(parts);
    Ok(joined)
}
