//! Hosts and IaC stacks known to the orchestrator

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::OrchError;
use crate::utils::parse_truthy;

/// A managed host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,

    /// Address used for SSH, falls back to `name`
    #[serde(default)]
    pub addr: Option<String>,

    #[serde(default)]
    pub groups: Vec<String>,

    /// Inventory vars (`docker_host`, `docker_local`, `ansible_user`, ...)
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: None,
            groups: Vec::new(),
            vars: HashMap::new(),
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    pub fn var_truthy(&self, key: &str) -> bool {
        self.var(key).and_then(parse_truthy).unwrap_or(false)
    }

    /// Address to reach the host at
    pub fn address(&self) -> &str {
        self.addr
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(self.name.as_str())
    }
}

/// What a stack is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Host,
    Group,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Host => "host",
            ScopeKind::Group => "group",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeKind {
    type Err = OrchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(ScopeKind::Host),
            "group" => Ok(ScopeKind::Group),
            _ => Err(OrchError::InvalidInput(format!("unknown scope kind: {}", s))),
        }
    }
}

/// Role of a tracked stack file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Compose,
    Env,
    Script,
    Other,
}

impl FileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::Compose => "compose",
            FileRole::Env => "env",
            FileRole::Script => "script",
            FileRole::Other => "other",
        }
    }
}

impl FromStr for FileRole {
    type Err = OrchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compose" => Ok(FileRole::Compose),
            "env" => Ok(FileRole::Env),
            "script" => Ok(FileRole::Script),
            "other" => Ok(FileRole::Other),
            _ => Err(OrchError::InvalidInput(format!("unknown file role: {}", s))),
        }
    }
}

/// A file tracked for a stack, relative to the stack's repository root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFile {
    pub role: FileRole,
    pub rel_path: String,

    /// Always decrypted, even without SOPS markers
    #[serde(default)]
    pub secret: bool,
}

/// A declared IaC stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    #[serde(default)]
    pub id: i64,
    pub scope_kind: ScopeKind,
    pub scope_name: String,
    pub name: String,

    /// Repository root all relative paths resolve against
    pub root: PathBuf,

    /// Stack directory relative to `root`
    pub rel_path: String,

    #[serde(default)]
    pub files: Vec<StackFile>,
}

impl Stack {
    /// Tracked compose files, sorted by path
    pub fn compose_files(&self) -> Vec<&StackFile> {
        let mut files: Vec<&StackFile> = self
            .files
            .iter()
            .filter(|f| f.role == FileRole::Compose)
            .collect();
        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        files
    }
}

/// Hosts and stacks loaded from `inventory.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryFile {
    #[serde(default)]
    pub hosts: Vec<Host>,

    #[serde(default)]
    pub stacks: Vec<Stack>,
}
