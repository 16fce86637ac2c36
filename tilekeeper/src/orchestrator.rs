//! Orchestrator (C8): resolves a download request (region name, bbox, or
//! place name) to a concrete region/bbox/source list, runs the download
//! pipeline, and refreshes the metadata store for exactly the sources that
//! participated. Grounded in `tile_download_manager.py`'s top-level
//! `download_region`/`download_bbox` entry points, which this module
//! consolidates into one typed request.

use crate::download::{self, CancellationFlag, DownloadLimits, DownloadReport};
use crate::geocode::GeocoordinateResolver;
use crate::metadata::MetadataStore;
use crate::sources::SourceRegistry;
use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use tilekeeper_core::config::Config;
use tilekeeper_core::error::TileKeeperError;
use tilekeeper_core::{BBox, names::resolve_name};

/// One of `region`, `bbox`, or `place` must be set; `region` takes precedence
/// when more than one is present, matching `tile_download_manager.py`'s
/// resolution order.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorRequest {
	pub region: Option<String>,
	pub bbox: Option<BBox>,
	pub place: Option<String>,
	pub z_min: u8,
	pub z_max: u8,
	pub remote_filter: Option<Vec<String>>,
	pub local_filter: Option<Vec<String>>,
}

pub struct Orchestrator {
	root: PathBuf,
	config: Arc<Config>,
	registry: SourceRegistry,
	metadata: MetadataStore,
	resolver: Box<dyn GeocoordinateResolver>,
	cancel: CancellationFlag,
}

impl Orchestrator {
	pub fn new(root: PathBuf, config: Arc<Config>, registry: SourceRegistry, metadata: MetadataStore, resolver: Box<dyn GeocoordinateResolver>) -> Orchestrator {
		Orchestrator { root, config, registry, metadata, resolver, cancel: CancellationFlag::new() }
	}

	/// A clone of the cancellation flag a caller can use to stop an in-flight
	/// run early (e.g. on `Ctrl-C`).
	pub fn cancellation_flag(&self) -> CancellationFlag {
		self.cancel.clone()
	}

	pub fn registry(&self) -> &SourceRegistry {
		&self.registry
	}

	pub fn metadata(&self) -> &MetadataStore {
		&self.metadata
	}

	/// Resolves the request to a concrete `(region_name, bbox)` pair.
	fn resolve_region_and_bbox(&self, request: &OrchestratorRequest) -> Result<(String, BBox)> {
		if let Some(region) = &request.region {
			let name = resolve_name(region, self.config.regions.keys().map(String::as_str)).to_string();
			let bbox = request
				.bbox
				.or_else(|| self.config.regions.get(&name).and_then(|r| r.bbox).and_then(|b| BBox::new(b[0], b[1], b[2], b[3]).ok()))
				.with_context(|| format!("region '{name}' has no configured bbox and none was supplied on the request"))?;
			return Ok((name, bbox));
		}

		if let Some(bbox) = request.bbox {
			let name = request.place.clone().unwrap_or_else(|| "ad_hoc".to_string());
			return Ok((name, bbox));
		}

		if let Some(place) = &request.place {
			let bbox = self
				.resolver
				.bbox_for_place(place)
				.with_context(|| format!("could not resolve a bounding box for place '{place}'"))?;
			return Ok((place.clone(), bbox));
		}

		bail!(TileKeeperError::Configuration("one of --region, --bbox, or --place is required".into()))
	}

	/// Runs the full download for one request: resolves region/bbox, composes
	/// the participating source list, downloads, and refreshes metadata for
	/// exactly those sources.
	pub async fn run(&self, request: OrchestratorRequest) -> Result<DownloadReport> {
		if request.z_min > request.z_max {
			bail!(TileKeeperError::Configuration(format!("min_zoom ({}) must be <= max_zoom ({})", request.z_min, request.z_max)));
		}

		let (region, bbox) = self.resolve_region_and_bbox(&request)?;

		let remote_filter = request.remote_filter.as_deref();
		let local_filter = request.local_filter.as_deref();
		let sources = self.registry.filter(remote_filter, local_filter);
		if sources.is_empty() {
			bail!(TileKeeperError::Configuration("no sources matched the requested filters".into()));
		}

		let limits = DownloadLimits {
			max_workers: self.config.max_workers_per_server,
			retry_attempts: self.config.retry_attempts,
			timeout: std::time::Duration::from_secs(self.config.timeout),
		};

		log::info!("downloading region '{region}' zoom {}..={} across {} source(s)", request.z_min, request.z_max, sources.len());

		let report = download::download(&self.root, &region, &bbox, request.z_min, request.z_max, &sources, &limits, &self.cancel).await?;

		log::info!("region '{region}': {} tile(s) downloaded, {} failed", report.downloaded, report.failed);

		let source_names: Vec<_> = sources.iter().map(|s| (s.tile_type(), s.name().to_string())).collect();
		self.metadata
			.update_after_download(&region, Some(bbox.as_array()), &source_names)
			.with_context(|| format!("refreshing metadata for region '{region}'"))?;

		Ok(report)
	}
}
