//! Secret decryption for staged stack files

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::zeroize::Zeroize;
use secrecy::{ExposeSecret, SecretBox};
use tokio::process::Command;
use tracing::debug;

use crate::errors::OrchError;
use crate::utils::tail_chars;

/// Decrypted file contents. Zeroed on drop.
pub type Plaintext = SecretBox<[u8]>;

/// Take ownership of secret bytes. A buffer with spare capacity is copied
/// into an exact allocation and wiped, so no shrunk-away copy survives.
pub fn plaintext(mut bytes: Vec<u8>) -> Plaintext {
    if bytes.len() == bytes.capacity() {
        return SecretBox::new(bytes.into_boxed_slice());
    }
    let exact: Box<[u8]> = bytes.as_slice().into();
    bytes.zeroize();
    SecretBox::new(exact)
}

/// Document format, as understood by the decryptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretFormat {
    Dotenv,
    Yaml,
    Json,
    Binary,
}

impl SecretFormat {
    /// Guess the format from a file name
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name == ".env" || name.ends_with(".env") || name.starts_with(".env.") {
            SecretFormat::Dotenv
        } else if name.ends_with(".yml") || name.ends_with(".yaml") {
            SecretFormat::Yaml
        } else if name.ends_with(".json") {
            SecretFormat::Json
        } else {
            SecretFormat::Binary
        }
    }

    pub fn as_sops_type(&self) -> &'static str {
        match self {
            SecretFormat::Dotenv => "dotenv",
            SecretFormat::Yaml => "yaml",
            SecretFormat::Json => "json",
            SecretFormat::Binary => "binary",
        }
    }
}

/// Whether the contents carry SOPS metadata
pub fn looks_encrypted(content: &[u8], format: SecretFormat) -> bool {
    let text = String::from_utf8_lossy(content);
    match format {
        SecretFormat::Dotenv => {
            text.contains("sops_mac=") || text.contains("sops_version=") || text.contains("sops_age__")
        }
        SecretFormat::Yaml => text.starts_with("sops:") || text.contains("\nsops:"),
        SecretFormat::Json => text.contains("\"sops\""),
        SecretFormat::Binary => false,
    }
}

/// Remove SOPS metadata keys from decrypted dotenv output and drop
/// `export` prefixes so compose can read the file. Works on bytes so the
/// only copy of the result is the returned [`Plaintext`].
pub fn filter_dotenv(content: &[u8]) -> Plaintext {
    // Output never exceeds the input plus one newline, so this never reallocates
    let mut out = Vec::with_capacity(content.len() + 1);
    if content.is_empty() {
        return plaintext(out);
    }

    let content = content.strip_suffix(b"\n").unwrap_or(content);
    for raw in content.split(|&b| b == b'\n') {
        let line = raw.strip_suffix(b"\r").unwrap_or(raw);
        let trimmed = line.trim_ascii_start();
        let body = trimmed.strip_prefix(b"export ").unwrap_or(trimmed);
        let comment = body.first() == Some(&b'#');
        if !comment {
            let key = body.split(|&b| b == b'=').next().unwrap_or_default();
            if key.trim_ascii().starts_with(b"sops_") {
                continue;
            }
        }
        out.extend_from_slice(if comment { line } else { body });
        out.push(b'\n');
    }
    plaintext(out)
}

/// Decrypts a secret-bearing file into memory
#[async_trait]
pub trait SecretDecryptor: Send + Sync {
    async fn decrypt(&self, path: &Path, format: SecretFormat) -> Result<Plaintext, OrchError>;
}

/// Decrypts with the `sops` CLI
pub struct SopsDecryptor {
    binary: String,
    timeout: Duration,
}

impl SopsDecryptor {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SecretDecryptor for SopsDecryptor {
    async fn decrypt(&self, path: &Path, format: SecretFormat) -> Result<Plaintext, OrchError> {
        debug!("Decrypting {} as {}", path.display(), format.as_sops_type());

        let child = Command::new(&self.binary)
            .arg("-d")
            .arg("--input-type")
            .arg(format.as_sops_type())
            .arg("--output-type")
            .arg(format.as_sops_type())
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OrchError::StagingFailure(format!("failed to run {}: {}", self.binary, e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                OrchError::StagingFailure(format!(
                    "decrypting {} timed out after {}s",
                    path.display(),
                    self.timeout.as_secs()
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchError::StagingFailure(format!(
                "decrypting {} failed: {}",
                path.display(),
                tail_chars(stderr.trim(), 400)
            )));
        }

        let decrypted = plaintext(output.stdout);
        if format == SecretFormat::Dotenv {
            return Ok(filter_dotenv(decrypted.expose_secret()));
        }
        Ok(decrypted)
    }
}
