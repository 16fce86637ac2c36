//! Download pipeline (C4): concurrent multi-source tile acquisition with
//! vector-then-raster fallback, per-source retry/backoff, empty-response
//! rejection, and idempotent writes, grounded in
//! `tile_download_service.py`'s `create_session`/`download_tile`/
//! `download_tiles_batch` and in the teacher's `reqwest::Client` usage
//! throughout `versatiles_container`.

use crate::layout::{file_is_nonempty, tile_path, write_atomic};
use crate::sources::{RasterContentType, SourceHandle};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tilekeeper_core::{BBox, TileType, enumerate_tiles};

/// Server-error status codes that trigger the connection-pool-level retry
/// with a 1.0s backoff factor, per spec.md §4.4.
const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone)]
pub struct DownloadLimits {
	pub max_workers: usize,
	pub retry_attempts: u32,
	pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TileFailure {
	pub z: u8,
	pub x: u32,
	pub y: u32,
	pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
	pub downloaded: usize,
	pub failed: usize,
	pub errors: Vec<TileFailure>,
}

/// A flag checked between tiles so a long-running download can be stopped
/// promptly without counting the remaining tiles as failures.
#[derive(Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
	pub fn new() -> CancellationFlag {
		CancellationFlag(Arc::new(AtomicBool::new(false)))
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// Runs the full pipeline: an HTTP phase across `sources`' remote members
/// (vector sources tried before raster, per tile), followed by an archive
/// phase across its local members (one `extract` range query per zoom
/// level), per spec.md §4.4 step 4's "HTTP phase, then archive phase"
/// sequencing for mixed source lists.
pub async fn download(
	root: &Path,
	region: &str,
	bbox: &BBox,
	z_min: u8,
	z_max: u8,
	sources: &[&SourceHandle],
	limits: &DownloadLimits,
	cancel: &CancellationFlag,
) -> Result<DownloadReport> {
	let http_sources: Vec<&SourceHandle> = sources.iter().copied().filter(|s| s.is_remote()).collect();
	let archive_sources: Vec<SourceHandle> = sources.iter().copied().filter(|s| !s.is_remote()).cloned().collect();

	let mut report = run_http_phase(root, region, bbox, z_min, z_max, &http_sources, limits, cancel).await?;

	// SQLite reads and filesystem writes here are both blocking; run them on a
	// blocking-pool thread so they don't stall an async runtime worker, per
	// `run_archive_phase`'s own doc comment.
	let root = root.to_path_buf();
	let region = region.to_string();
	let bbox = *bbox;
	let cancel = cancel.clone();
	let archive_report = tokio::task::spawn_blocking(move || run_archive_phase(&root, &region, &bbox, z_min, z_max, &archive_sources, &cancel))
		.await
		.context("archive phase task panicked")??;
	report.downloaded += archive_report.downloaded;
	report.failed += archive_report.failed;
	report.errors.extend(archive_report.errors);
	Ok(report)
}

async fn run_http_phase(
	root: &Path,
	region: &str,
	bbox: &BBox,
	z_min: u8,
	z_max: u8,
	sources: &[&SourceHandle],
	limits: &DownloadLimits,
	cancel: &CancellationFlag,
) -> Result<DownloadReport> {
	if sources.is_empty() {
		return Ok(DownloadReport::default());
	}

	let vector_sources: Vec<SourceHandle> = sources.iter().filter(|s| s.tile_type() == TileType::Vector).map(|s| (*s).clone()).collect();
	let raster_sources: Vec<SourceHandle> = sources.iter().filter(|s| s.tile_type() == TileType::Raster).map(|s| (*s).clone()).collect();

	let client = reqwest::Client::builder().timeout(limits.timeout).build()?;
	let tiles = enumerate_tiles(bbox, z_min, z_max);

	let downloaded = Arc::new(AtomicUsize::new(0));
	let failed = Arc::new(AtomicUsize::new(0));
	let errors = Arc::new(Mutex::new(Vec::new()));

	let root = root.to_path_buf();
	let region = region.to_string();
	let retry_attempts = limits.retry_attempts;

	stream::iter(tiles.into_iter())
		.for_each_concurrent(limits.max_workers.max(1), |(z, x, y)| {
			let client = client.clone();
			let vector_sources = vector_sources.clone();
			let raster_sources = raster_sources.clone();
			let root = root.clone();
			let region = region.clone();
			let downloaded = Arc::clone(&downloaded);
			let failed = Arc::clone(&failed);
			let errors = Arc::clone(&errors);
			let cancel = cancel.clone();

			async move {
				if cancel.is_cancelled() {
					return;
				}

				let outcome = download_one_tile(&client, &root, &region, z, x, y, &vector_sources, &raster_sources, retry_attempts).await;
				match outcome {
					Ok(()) => {
						downloaded.fetch_add(1, Ordering::Relaxed);
					}
					Err(reason) => {
						failed.fetch_add(1, Ordering::Relaxed);
						errors.lock().push(TileFailure { z, x, y, reason });
					}
				}
			}
		})
		.await;

	Ok(DownloadReport {
		downloaded: downloaded.load(Ordering::Relaxed),
		failed: failed.load(Ordering::Relaxed),
		errors: Arc::try_unwrap(errors).map(Mutex::into_inner).unwrap_or_default(),
	})
}

/// Tries vector sources in order, then raster sources in order, for a single
/// tile. Returns `Ok(())` once any source succeeds (including the idempotent
/// "already on disk" case), or `Err(last_reason)` once every source failed.
async fn download_one_tile(
	client: &reqwest::Client,
	root: &Path,
	region: &str,
	z: u8,
	x: u32,
	y: u32,
	vector_sources: &[SourceHandle],
	raster_sources: &[SourceHandle],
	retry_attempts: u32,
) -> Result<(), String> {
	let mut last_reason = String::from("no sources configured");

	for source in vector_sources {
		match try_source(client, root, region, TileType::Vector, source, z, x, y, "pbf", retry_attempts).await {
			Ok(()) => return Ok(()),
			Err(reason) => last_reason = reason,
		}
	}

	for source in raster_sources {
		let SourceHandle::Remote(http) = source else { continue };
		let ext = match http.raster_content_type {
			RasterContentType::Png => "png",
			RasterContentType::Jpg => "jpg",
		};
		match try_source(client, root, region, TileType::Raster, source, z, x, y, ext, retry_attempts).await {
			Ok(()) => return Ok(()),
			Err(reason) => last_reason = reason,
		}
	}

	Err(last_reason)
}

async fn try_source(
	client: &reqwest::Client,
	root: &Path,
	region: &str,
	tile_type: TileType,
	source: &SourceHandle,
	z: u8,
	x: u32,
	y: u32,
	ext: &str,
	retry_attempts: u32,
) -> Result<(), String> {
	let SourceHandle::Remote(http) = source else {
		return Err("archive sources are handled in the archive phase".to_string());
	};

	let path = tile_path(root, region, tile_type, &http.name, z, x, y, ext);
	if file_is_nonempty(&path) {
		return Ok(());
	}

	let url = http.url_for(z, x, y);
	let headers = build_headers(&http.headers)?;

	// Non-retryable outcomes (a non-2xx status outside the retryable set, or
	// an empty body) move straight to the next source per spec.md §4.4 step b.
	// Network errors and the retryable status set get up to `retry_attempts`
	// attempts first, per §4.4's retry policy.
	let mut attempt = 1u32;
	loop {
		let result = client.get(&url).headers(headers.clone()).send().await;
		match result {
			Ok(response) => {
				let status = response.status();
				if status.is_success() {
					let bytes = response.bytes().await.map_err(|e| format!("reading response body failed: {e}"))?;
					if bytes.is_empty() {
						return Err("empty response body".to_string());
					}
					let data = bytes.to_vec();
					let write_path = path.clone();
					tokio::task::spawn_blocking(move || write_atomic(&write_path, &data))
						.await
						.map_err(|e| format!("write task panicked: {e}"))?
						.map_err(|e| format!("writing tile failed: {e}"))?;
					return Ok(());
				}

				if !RETRYABLE_STATUS.contains(&status.as_u16()) {
					return Err(format!("http status {status}"));
				}
				if attempt >= retry_attempts {
					return Err(format!("http status {status} (retries exhausted)"));
				}
				tokio::time::sleep(Duration::from_secs_f64(1.0 * f64::from(attempt))).await;
				attempt += 1;
			}
			Err(e) => {
				if attempt >= retry_attempts {
					return Err(format!("network error: {e}"));
				}
				tokio::time::sleep(Duration::from_secs_f64(0.5 * f64::from(attempt))).await;
				attempt += 1;
			}
		}
	}
}

fn build_headers(headers: &std::collections::HashMap<String, String>) -> Result<HeaderMap, String> {
	let mut map = HeaderMap::new();
	for (k, v) in headers {
		let name = HeaderName::from_bytes(k.as_bytes()).map_err(|e| format!("invalid header name {k:?}: {e}"))?;
		let value = HeaderValue::from_str(v).map_err(|e| format!("invalid header value for {k:?}: {e}"))?;
		map.insert(name, value);
	}
	Ok(map)
}

/// Archive phase: for every local source, iterate `z_min..=z_max` and write
/// every tile `extract(bbox, z)` returns. Synchronous (SQLite reads and
/// filesystem writes are both blocking); `download` runs this on a
/// `spawn_blocking` thread rather than calling it directly from async code.
fn run_archive_phase(
	root: &Path,
	region: &str,
	bbox: &BBox,
	z_min: u8,
	z_max: u8,
	sources: &[SourceHandle],
	cancel: &CancellationFlag,
) -> Result<DownloadReport> {
	let mut report = DownloadReport::default();

	for source in sources {
		let SourceHandle::Local(local) = source else { continue };
		let ext = local.tile_type.default_extension();

		for z in z_min..=z_max {
			if cancel.is_cancelled() {
				return Ok(report);
			}
			let tiles = match local.archive.extract(bbox, z) {
				Ok(tiles) => tiles,
				Err(e) => {
					report.failed += 1;
					report.errors.push(TileFailure { z, x: 0, y: 0, reason: format!("archive extract failed for '{}': {e}", local.name) });
					continue;
				}
			};

			for (x, y, data) in tiles {
				if data.is_empty() {
					report.failed += 1;
					report.errors.push(TileFailure { z, x, y, reason: "empty tile body from archive".to_string() });
					continue;
				}
				let path: PathBuf = tile_path(root, region, local.tile_type, &local.name, z, x, y, ext);
				if file_is_nonempty(&path) {
					report.downloaded += 1;
					continue;
				}
				match write_atomic(&path, &data) {
					Ok(()) => report.downloaded += 1,
					Err(e) => {
						report.failed += 1;
						report.errors.push(TileFailure { z, x, y, reason: format!("writing tile failed: {e}") });
					}
				}
			}
		}
	}

	Ok(report)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sources::HttpSource;
	use std::collections::HashMap;
	use tempfile::tempdir;

	fn raster_source(name: &str, raster_content_type: RasterContentType) -> SourceHandle {
		SourceHandle::Remote(Arc::new(HttpSource {
			name: name.to_string(),
			tile_type: TileType::Raster,
			url_template: "http://127.0.0.1:1/{z}/{x}/{y}.png".into(),
			headers: HashMap::new(),
			raster_content_type,
		}))
	}

	#[test]
	fn build_headers_rejects_invalid_names() {
		let mut headers = HashMap::new();
		headers.insert("bad header".to_string(), "value".to_string());
		assert!(build_headers(&headers).is_err());
	}

	#[test]
	fn build_headers_accepts_valid_entries() {
		let mut headers = HashMap::new();
		headers.insert("X-Test".to_string(), "value".to_string());
		let built = build_headers(&headers).unwrap();
		assert_eq!(built.get("X-Test").unwrap(), "value");
	}

	#[test]
	fn skip_existing_nonempty_file_without_touching_network() {
		let dir = tempdir().unwrap();
		let path = tile_path(dir.path(), "r", TileType::Raster, "src", 5, 1, 2, "png");
		write_atomic(&path, b"oldcontent").unwrap();
		assert!(file_is_nonempty(&path));
		assert_eq!(std::fs::read(&path).unwrap(), b"oldcontent");
	}

	#[test]
	fn cancellation_flag_round_trips() {
		let flag = CancellationFlag::new();
		assert!(!flag.is_cancelled());
		flag.cancel();
		assert!(flag.is_cancelled());
	}

	#[test]
	fn raster_extension_follows_content_type_hint() {
		let jpg = raster_source("r", RasterContentType::Jpg);
		let SourceHandle::Remote(http) = &jpg else { unreachable!() };
		assert_eq!(http.raster_content_type, RasterContentType::Jpg);
	}
}
