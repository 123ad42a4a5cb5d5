//! Read-only space previews.
//!
//! Lists what a prune would remove through the same [`CommandTransport`] the
//! prune runners use, without deleting anything. One command per host prints
//! each listing under a `## <section>` marker.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::errors::OrchError;
use crate::models::inventory::Host;
use crate::models::job::JobKind;
use crate::models::preview::{humanize_bytes, parse_size, FleetPreview, SpacePreview};
use crate::runners::transport::{resolve_access, CommandTransport, HostAccess};
use crate::storage::settings::TransportSettings;
use crate::utils::tail_chars;

/// Dangling volumes report no size; each counts as this much
pub const VOLUME_ESTIMATE_BYTES: u64 = 100_000_000;

const DEFAULT_NETWORKS: [&str; 3] = ["bridge", "host", "none"];

const IMAGES: &str = "echo '## images' && docker image ls --filter dangling=true --format '{{.ID}}|{{.Size}}'";
const CONTAINERS: &str = "echo '## containers' && docker ps -a --size --filter status=exited --filter status=created --filter status=dead --format '{{.ID}}|{{.Size}}'";
const VOLUMES: &str = "echo '## volumes' && docker volume ls --filter dangling=true --format '{{.Name}}'";
const NETWORKS: &str = "echo '## networks' && docker network ls --filter dangling=true --format '{{.Name}}'";
const BUILD_CACHE: &str = "echo '## build_cache' && docker system df --format '{{.Type}}|{{.TotalCount}}|{{.Reclaimable}}'";

/// Listing command for a prune kind
pub fn preview_command(kind: JobKind) -> Option<String> {
    let sections: &[&str] = match kind {
        JobKind::SystemPrune => &[IMAGES, CONTAINERS, VOLUMES, NETWORKS],
        JobKind::ImagePrune => &[IMAGES],
        JobKind::ContainerPrune => &[CONTAINERS],
        JobKind::VolumePrune => &[VOLUMES],
        JobKind::NetworkPrune => &[NETWORKS],
        JobKind::BuildCachePrune => &[BUILD_CACHE],
        JobKind::Deploy => return None,
    };
    Some(sections.join(" && "))
}

/// Candidates found on a host
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Listing {
    /// Size of each dangling image
    pub images: Vec<u64>,

    /// Writable layer size of each stopped container
    pub containers: Vec<u64>,

    pub volumes: u64,

    /// Unused networks, default networks excluded
    pub networks: u64,

    /// Build cache `(entries, reclaimable bytes)`
    pub build_cache: Option<(u64, u64)>,
}

/// Parse the sectioned output of [`preview_command`]
pub fn parse_listing(output: &str) -> Listing {
    let mut listing = Listing::default();
    let mut section = "";

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix("## ") {
            section = name.trim();
            continue;
        }
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        match section {
            "images" => {
                listing.images.push(fields.get(1).map(|s| parse_size(s)).unwrap_or(0));
            }
            "containers" => {
                // "2MB (virtual 187MB)": the writable layer comes first
                let size = fields
                    .get(1)
                    .and_then(|s| s.split_whitespace().next())
                    .map(parse_size)
                    .unwrap_or(0);
                listing.containers.push(size);
            }
            "volumes" => listing.volumes += 1,
            "networks" => {
                if !DEFAULT_NETWORKS.contains(&line) {
                    listing.networks += 1;
                }
            }
            "build_cache" => {
                if fields.first() == Some(&"Build Cache") {
                    let count = fields.get(1).and_then(|c| c.parse().ok()).unwrap_or(0);
                    let bytes = fields
                        .get(2)
                        .and_then(|s| s.split_whitespace().next())
                        .map(parse_size)
                        .unwrap_or(0);
                    listing.build_cache = Some((count, bytes));
                }
            }
            _ => {}
        }
    }
    listing
}

/// Turn a listing into the preview for `kind`
pub fn summarize(kind: JobKind, listing: &Listing) -> SpacePreview {
    let mut preview = SpacePreview::success(kind);
    let image_bytes: u64 = listing.images.iter().sum();
    let container_bytes: u64 = listing.containers.iter().sum();
    let images = listing.images.len() as u64;
    let containers = listing.containers.len() as u64;

    match kind {
        JobKind::SystemPrune => {
            preview.add_bytes(image_bytes + container_bytes);
            if images > 0 {
                preview.count("images", images);
                preview.details.push(format!(
                    "Dangling images: {} ({})",
                    images,
                    humanize_bytes(image_bytes)
                ));
            }
            if containers > 0 {
                preview.count("containers", containers);
                preview.details.push(format!(
                    "Stopped containers: {} ({})",
                    containers,
                    humanize_bytes(container_bytes)
                ));
            }
            if listing.volumes > 0 {
                preview.count("volumes", listing.volumes);
                preview.details.push(format!("Unused volumes: {}", listing.volumes));
            }
            if listing.networks > 0 {
                preview.count("networks", listing.networks);
                preview.details.push(format!("Unused networks: {}", listing.networks));
            }
        }
        JobKind::ImagePrune => {
            preview.add_bytes(image_bytes);
            preview.count("unused_images", images);
            preview.details.push(format!("{} unused images", images));
        }
        JobKind::ContainerPrune => {
            preview.add_bytes(container_bytes);
            preview.count("stopped_containers", containers);
            preview.details.push(format!("{} stopped containers", containers));
        }
        JobKind::VolumePrune => {
            preview.add_bytes(listing.volumes * VOLUME_ESTIMATE_BYTES);
            preview.count("unused_volumes", listing.volumes);
            preview.details.push(format!(
                "{} unused volumes (size estimated)",
                listing.volumes
            ));
        }
        JobKind::NetworkPrune => {
            preview.count("unused_networks", listing.networks);
            preview.details.push(format!("{} unused networks", listing.networks));
        }
        JobKind::BuildCachePrune => {
            let (entries, bytes) = listing.build_cache.unwrap_or((0, 0));
            preview.add_bytes(bytes);
            preview.count("build_cache_items", entries);
            preview.details.push(format!(
                "Build cache: {} entries ({} reclaimable)",
                entries,
                humanize_bytes(bytes)
            ));
        }
        JobKind::Deploy => {}
    }
    preview
}

/// Previews one prune kind on hosts
pub struct PreviewRunner {
    kind: JobKind,
    command: String,
    transport: Arc<dyn CommandTransport>,
    settings: TransportSettings,
    timeout: Duration,
}

impl PreviewRunner {
    pub fn new(
        kind: JobKind,
        transport: Arc<dyn CommandTransport>,
        settings: TransportSettings,
        timeout: Duration,
    ) -> Result<Self, OrchError> {
        let command = preview_command(kind)
            .ok_or_else(|| OrchError::InvalidInput(format!("{} is not a prune operation", kind)))?;
        Ok(Self {
            kind,
            command,
            transport,
            settings,
            timeout,
        })
    }

    /// Preview one host. Failures are reported in the preview, never raised.
    pub async fn preview(&self, host: &Host) -> SpacePreview {
        let access = resolve_access(host, &self.settings);
        if let HostAccess::Forbidden { reason } = access {
            debug!("Skipping {} preview on {}: {}", self.kind, host.name, reason);
            return SpacePreview::skipped(self.kind, reason);
        }

        let listing = self.transport.run(&access, &self.command);
        match tokio::time::timeout(self.timeout, listing).await {
            Err(_) => {
                warn!("{} preview on {} timed out", self.kind, host.name);
                SpacePreview::failed(
                    self.kind,
                    format!("timed out after {}s", self.timeout.as_secs()),
                )
            }
            Ok(Err(e)) => {
                warn!("{} preview on {} failed: {}", self.kind, host.name, e);
                SpacePreview::failed(self.kind, e.to_string())
            }
            Ok(Ok(output)) if !output.success => SpacePreview::failed(
                self.kind,
                format!(
                    "listing failed: {}",
                    tail_chars(output.output.trim(), 500)
                ),
            ),
            Ok(Ok(output)) => summarize(self.kind, &parse_listing(&output.output)),
        }
    }

    /// Preview every host, at most `workers` at a time
    pub async fn preview_fleet(&self, hosts: Vec<Host>, workers: usize) -> FleetPreview {
        debug!("Previewing {} on {} hosts", self.kind, hosts.len());
        let previews: Vec<(String, SpacePreview)> = stream::iter(hosts)
            .map(|host| async move {
                let preview = self.preview(&host).await;
                (host.name, preview)
            })
            .buffer_unordered(workers.max(1))
            .collect()
            .await;
        FleetPreview::collect(self.kind, previews)
    }
}
