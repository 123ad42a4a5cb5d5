//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::OrchError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout of the orchestrator
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the SQLite database path
    pub fn database_file(&self) -> File {
        File::new(self.base_dir.join("ddorch.db"))
    }

    /// Get the inventory import file
    pub fn inventory_file(&self) -> File {
        File::new(self.base_dir.join("inventory.json"))
    }

    /// Get the root of all deployment staging areas
    pub fn staging_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("staging"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), OrchError> {
        Dir::new(&self.base_dir).create().await?;
        self.staging_dir().create_private().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/ddorch");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ddorch");

        Self::new(base_dir)
    }
}
