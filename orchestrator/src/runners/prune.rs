//! Docker prune runners

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::OrchError;
use crate::models::inventory::Host;
use crate::models::job::{JobKind, JobOptions};
use crate::models::outcome::{OutcomeReport, PruneReport, TargetOutcome};
use crate::runners::transport::{resolve_access, CommandTransport, HostAccess};
use crate::runners::OperationRunner;
use crate::storage::settings::TransportSettings;
use crate::utils::{shell_quote, tail_chars};

/// Shell command for a prune kind, with one `--filter` per exclude filter value
pub fn prune_command(kind: JobKind, filters: &HashMap<String, Vec<String>>) -> Option<String> {
    let f = filter_args(filters);
    let command = match kind {
        JobKind::SystemPrune => format!("docker system prune -af --volumes{} 2>&1", f),
        JobKind::ImagePrune => format!("docker image prune -af{}", f),
        JobKind::ContainerPrune => format!("docker container prune -f{}", f),
        JobKind::VolumePrune => format!("docker volume prune -f{}", f),
        JobKind::NetworkPrune => format!("docker network prune -f{}", f),
        JobKind::BuildCachePrune => format!(
            "docker buildx prune -af{} 2>/dev/null || docker builder prune -af{}",
            f, f
        ),
        JobKind::Deploy => return None,
    };
    Some(command)
}

fn filter_args(filters: &HashMap<String, Vec<String>>) -> String {
    let sorted: BTreeMap<&String, &Vec<String>> = filters.iter().collect();
    let mut args = String::new();
    for (key, values) in sorted {
        for value in values {
            args.push_str(" --filter ");
            args.push_str(&shell_quote(&format!("{}={}", key, value)));
        }
    }
    args
}

/// Reclaimed space as printed by the docker CLI
pub fn parse_reclaimed_space(output: &str) -> String {
    for line in output.lines() {
        let line = line.trim();
        if line.starts_with("Total reclaimed space:") || line.starts_with("Total:") {
            if let Some(last) = line.split_whitespace().last() {
                return last.to_string();
            }
        }
        if line.starts_with("Space reclaimed:") {
            if let Some(value) = line.split_whitespace().nth(2) {
                return value.to_string();
            }
        }
    }

    let lower = output.to_lowercase();
    if lower.contains("deleted") || lower.contains("removed") {
        "unknown".to_string()
    } else {
        "0B".to_string()
    }
}

fn section_for(header: &str) -> Option<&'static str> {
    match header.trim_end_matches(':').to_lowercase().as_str() {
        "deleted containers" => Some("containers"),
        "deleted images" => Some("images"),
        "deleted volumes" => Some("volumes"),
        "deleted networks" => Some("networks"),
        "deleted build cache objects" => Some("build_cache"),
        _ => None,
    }
}

/// Count removed objects per category from prune output
pub fn parse_items_removed(kind: JobKind, output: &str) -> BTreeMap<String, u64> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut section: Option<&'static str> = None;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            section = None;
            continue;
        }
        if let Some(name) = section_for(line) {
            section = Some(name);
            continue;
        }
        if line.starts_with("Total") {
            section = None;
            continue;
        }
        match section {
            // Image sections list tags too; only `deleted:` lines are images.
            Some("images") => {
                if line.to_lowercase().starts_with("deleted:") {
                    *counts.entry("images".to_string()).or_default() += 1;
                }
            }
            Some(name) => *counts.entry(name.to_string()).or_default() += 1,
            None => {}
        }
    }

    // buildx prints a table instead of a section
    if kind == JobKind::BuildCachePrune && !counts.contains_key("build_cache") {
        let rows = output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("ID") && !l.starts_with("Total"))
            .count() as u64;
        if rows > 0 {
            counts.insert("build_cache".to_string(), rows);
        }
    }

    counts
}

/// Runs one prune kind against a host
pub struct PruneRunner {
    kind: JobKind,
    transport: Arc<dyn CommandTransport>,
    settings: TransportSettings,
}

impl PruneRunner {
    pub fn new(
        kind: JobKind,
        transport: Arc<dyn CommandTransport>,
        settings: TransportSettings,
    ) -> Result<Self, OrchError> {
        if !kind.is_prune() {
            return Err(OrchError::InvalidInput(format!("{} is not a prune operation", kind)));
        }
        Ok(Self {
            kind,
            transport,
            settings,
        })
    }
}

#[async_trait]
impl OperationRunner for PruneRunner {
    fn kind(&self) -> JobKind {
        self.kind
    }

    async fn run(&self, host: &Host, options: &JobOptions) -> Result<TargetOutcome, OrchError> {
        let access = resolve_access(host, &self.settings);
        if let HostAccess::Forbidden { reason } = access {
            debug!("Skipping {} on {}: {}", self.kind, host.name, reason);
            return Ok(TargetOutcome::skipped(reason));
        }

        if options.dry_run {
            return Ok(TargetOutcome::DryRun(OutcomeReport::Prune(PruneReport::dry_run())));
        }

        let command = prune_command(self.kind, &options.exclude_filters)
            .ok_or_else(|| OrchError::Internal(format!("no command for {}", self.kind)))?;
        info!("Running {} on {}", self.kind, host.name);
        debug!("{}: {}", host.name, command);

        let result = self.transport.run(&access, &command).await?;
        if !result.success {
            return Err(OrchError::RunnerFailure(format!(
                "{} exited with {}: {}",
                command,
                result
                    .code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                tail_chars(result.output.trim(), 500)
            )));
        }

        let space_reclaimed = if self.kind == JobKind::NetworkPrune {
            "0B".to_string()
        } else {
            parse_reclaimed_space(&result.output)
        };
        let errors = result
            .output
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with("Error") || l.starts_with("error"))
            .map(str::to_string)
            .collect();

        Ok(TargetOutcome::Completed(OutcomeReport::Prune(PruneReport {
            space_reclaimed,
            items_removed: parse_items_removed(self.kind, &result.output),
            errors,
        })))
    }
}
