//! Space previews: what a prune would reclaim, without running it

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::job::JobKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewStatus {
    Success,
    Error,
    Skipped,
}

/// Estimate for one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpacePreview {
    pub operation: JobKind,
    pub estimated_bytes: u64,
    pub estimated_size: String,
    pub item_count: BTreeMap<String, u64>,
    pub details: Vec<String>,
    pub status: PreviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SpacePreview {
    fn empty(operation: JobKind, status: PreviewStatus, error: Option<String>) -> Self {
        Self {
            operation,
            estimated_bytes: 0,
            estimated_size: humanize_bytes(0),
            item_count: BTreeMap::new(),
            details: Vec::new(),
            status,
            error,
        }
    }

    pub fn success(operation: JobKind) -> Self {
        Self::empty(operation, PreviewStatus::Success, None)
    }

    pub fn failed(operation: JobKind, error: impl Into<String>) -> Self {
        Self::empty(operation, PreviewStatus::Error, Some(error.into()))
    }

    pub fn skipped(operation: JobKind, reason: impl Into<String>) -> Self {
        Self::empty(operation, PreviewStatus::Skipped, Some(reason.into()))
    }

    /// Add `bytes` to the estimate
    pub fn add_bytes(&mut self, bytes: u64) {
        self.estimated_bytes += bytes;
        self.estimated_size = humanize_bytes(self.estimated_bytes);
    }

    pub fn count(&mut self, item: &str, n: u64) {
        *self.item_count.entry(item.to_string()).or_default() += n;
    }
}

/// Estimates for every host in the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FleetPreview {
    pub operation: JobKind,
    pub total_bytes: u64,
    pub total_size: String,
    pub host_previews: BTreeMap<String, SpacePreview>,
    pub total_item_count: BTreeMap<String, u64>,
}

impl FleetPreview {
    /// Fold host previews together; only successful hosts count toward totals
    pub fn collect(
        operation: JobKind,
        previews: impl IntoIterator<Item = (String, SpacePreview)>,
    ) -> Self {
        let mut fleet = Self {
            operation,
            total_bytes: 0,
            total_size: String::new(),
            host_previews: BTreeMap::new(),
            total_item_count: BTreeMap::new(),
        };
        for (host, preview) in previews {
            if preview.status == PreviewStatus::Success {
                fleet.total_bytes += preview.estimated_bytes;
                for (item, n) in &preview.item_count {
                    *fleet.total_item_count.entry(item.clone()).or_default() += n;
                }
            }
            fleet.host_previews.insert(host, preview);
        }
        fleet.total_size = humanize_bytes(fleet.total_bytes);
        fleet
    }
}

const UNITS: [&str; 6] = ["B", "kB", "MB", "GB", "TB", "PB"];

/// Decimal size in the docker CLI's notation (`1.5GB`)
pub fn humanize_bytes(bytes: u64) -> String {
    if bytes < 1000 {
        return format!("{}B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.1}{}", value, UNITS[unit])
}

/// Parse a size printed by the docker CLI (`187MB`, `12.3kB`, `0B`).
/// Unreadable sizes count as zero.
pub fn parse_size(size: &str) -> u64 {
    let size = size.trim();
    let split = size
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(size.len());
    let (number, unit) = size.split_at(split);
    let Ok(number) = number.parse::<f64>() else {
        return 0;
    };
    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" => 1e3,
        "mb" => 1e6,
        "gb" => 1e9,
        "tb" => 1e12,
        "kib" => 1024.0,
        "mib" => 1024.0 * 1024.0,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        _ => return 0,
    };
    (number * multiplier).round() as u64
}
