//! Metadata store (C6): per-region JSON documents under
//! `<root>/metadata/regions/<region>.json`, a TTL cache in front of them, and
//! the scan/sync/audit machinery that reconciles documents with the
//! filesystem tree. Grounded in `metadata_manager.py`/`metadata_sync.py`;
//! replaces their module-level `metadata_manager` singleton with an
//! explicitly constructed, explicitly passed store per spec.md §9.

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tilekeeper_core::config::Config;
use tilekeeper_core::{BBox, TileType};

const DEFAULT_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayerInfo {
	pub name: String,
	#[serde(rename = "type")]
	pub tile_type: TileType,
	pub min_zoom: u8,
	pub max_zoom: u8,
	pub tile_count: u64,
	pub total_size: u64,
	pub available_zooms: Vec<u8>,
	pub last_updated: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Layers {
	#[serde(default)]
	pub raster: HashMap<String, LayerInfo>,
	#[serde(default)]
	pub vector: HashMap<String, LayerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionDocument {
	pub name: String,
	pub bbox: [f64; 4],
	pub last_updated: u64,
	pub layers: Layers,
	/// Carried from `metadata_manager.py`'s `RegionInfo` dataclass; not a field
	/// the distilled spec names explicitly but present in the original.
	#[serde(default)]
	pub description: Option<String>,
	/// bbox midpoint, recomputed whenever `bbox` changes; not a second source
	/// of truth beyond what `region_map_styles` needs to emit it.
	#[serde(default)]
	pub center: [f64; 2],
}

fn now_unix() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

struct CacheEntry {
	doc: RegionDocument,
	loaded_at: Instant,
}

/// Explicitly constructed and explicitly passed to C7/C8 — never a
/// process-wide `static`, per spec.md §9's flagged anti-pattern.
pub struct MetadataStore {
	root: PathBuf,
	cache: DashMap<String, CacheEntry>,
	ttl: Duration,
	config: std::sync::Arc<Config>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerKey {
	pub tile_type: TileType,
	pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataDiff {
	pub bbox_changed: bool,
	pub layers_added: Vec<LayerKey>,
	pub layers_removed: Vec<LayerKey>,
	pub layers_updated: Vec<LayerKey>,
}

impl MetadataDiff {
	pub fn has_changes(&self) -> bool {
		self.bbox_changed || !self.layers_added.is_empty() || !self.layers_removed.is_empty() || !self.layers_updated.is_empty()
	}
}

#[derive(Debug, Clone, Default)]
pub struct AuditEntry {
	pub region: String,
	pub diff: MetadataDiffSummary,
}

/// A serialization-friendly projection of [`MetadataDiff`] returned by
/// [`MetadataStore::audit`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetadataDiffSummary {
	pub bbox_changed: bool,
	pub layers_added: Vec<String>,
	pub layers_removed: Vec<String>,
	pub layers_updated: Vec<String>,
}

impl From<&MetadataDiff> for MetadataDiffSummary {
	fn from(diff: &MetadataDiff) -> Self {
		let fmt = |k: &LayerKey| format!("{}/{}", k.tile_type.as_str(), k.name);
		MetadataDiffSummary {
			bbox_changed: diff.bbox_changed,
			layers_added: diff.layers_added.iter().map(fmt).collect(),
			layers_removed: diff.layers_removed.iter().map(fmt).collect(),
			layers_updated: diff.layers_updated.iter().map(fmt).collect(),
		}
	}
}

impl MetadataStore {
	pub fn new(root: impl Into<PathBuf>, config: std::sync::Arc<Config>) -> MetadataStore {
		MetadataStore { root: root.into(), cache: DashMap::new(), ttl: DEFAULT_TTL, config }
	}

	#[cfg(test)]
	pub fn with_ttl(root: impl Into<PathBuf>, config: std::sync::Arc<Config>, ttl: Duration) -> MetadataStore {
		MetadataStore { root: root.into(), cache: DashMap::new(), ttl, config }
	}

	fn doc_path(&self, region: &str) -> PathBuf {
		self.root.join("metadata").join("regions").join(format!("{region}.json"))
	}

	/// Reads a region's document, preferring a fresh cache entry, falling back
	/// to disk, falling back to `None` if neither exists.
	pub fn get(&self, region: &str) -> Result<Option<RegionDocument>> {
		if let Some(entry) = self.cache.get(region) {
			if entry.loaded_at.elapsed() < self.ttl {
				return Ok(Some(entry.doc.clone()));
			}
		}
		let path = self.doc_path(region);
		if !path.exists() {
			return Ok(None);
		}
		let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
		let doc: RegionDocument = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
		self.cache.insert(region.to_string(), CacheEntry { doc: doc.clone(), loaded_at: Instant::now() });
		Ok(Some(doc))
	}

	fn write(&self, doc: &RegionDocument) -> Result<()> {
		let path = self.doc_path(&doc.name);
		let parent = path.parent().context("document path has no parent")?;
		std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
		let text = serde_json::to_string_pretty(doc).context("serializing region document")?;
		let tmp = parent.join(format!(".{}.tmp", doc.name));
		std::fs::write(&tmp, &text).with_context(|| format!("writing {}", tmp.display()))?;
		std::fs::rename(&tmp, &path).with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
		self.cache.insert(doc.name.clone(), CacheEntry { doc: doc.clone(), loaded_at: Instant::now() });
		Ok(())
	}

	fn delete(&self, region: &str) -> Result<()> {
		let path = self.doc_path(region);
		if path.exists() {
			std::fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
		}
		self.cache.remove(region);
		Ok(())
	}

	fn resolve_bbox(&self, region: &str, existing: Option<&RegionDocument>) -> [f64; 4] {
		if let Some(region_cfg) = self.config.regions.get(region) {
			if let Some(bbox) = region_cfg.bbox {
				return bbox;
			}
		}
		if let Some(doc) = existing {
			return doc.bbox;
		}
		log::warn!("no bbox known for region '{region}'; defaulting to [0,0,1,1]");
		BBox::default_unset().as_array()
	}

	/// Walks `<root>/<region>/{raster,vector}/<layer>/<z>/<x>/<y>.*`, synthesizing
	/// the historical "turkiye" layout (`<root>/<region>/raster/<z>/...` with no
	/// layer directory) as a single layer named `<region>_raster` where present.
	pub fn scan(&self, region: &str) -> Result<RegionDocument> {
		let region_dir = self.root.join(region);
		let existing = self.get(region)?;
		let mut layers = Layers::default();

		for tile_type in [TileType::Raster, TileType::Vector] {
			let type_dir = region_dir.join(tile_type.as_str());
			if !type_dir.is_dir() {
				continue;
			}

			if tile_type == TileType::Raster && has_direct_zoom_dirs(&type_dir) {
				let name = format!("{region}_raster");
				if let Some(info) = scan_layer_dir(&name, tile_type, &type_dir) {
					layers.raster.insert(name, info);
				}
				continue;
			}

			let Ok(entries) = std::fs::read_dir(&type_dir) else { continue };
			for entry in entries.flatten() {
				if !entry.path().is_dir() {
					continue;
				}
				let Some(layer_name) = entry.file_name().to_str().map(str::to_string) else { continue };
				if let Some(info) = scan_layer_dir(&layer_name, tile_type, &entry.path()) {
					match tile_type {
						TileType::Raster => layers.raster.insert(layer_name, info),
						TileType::Vector => layers.vector.insert(layer_name, info),
					};
				}
			}
		}

		let bbox = self.resolve_bbox(region, existing.as_ref());
		let center = BBox::new(bbox[0], bbox[1], bbox[2], bbox[3]).map(|b| b.center()).unwrap_or([0.0, 0.0]);
		let description = self
			.config
			.regions
			.get(region)
			.and_then(|r| r.description.clone())
			.or_else(|| existing.as_ref().and_then(|d| d.description.clone()));

		Ok(RegionDocument { name: region.to_string(), bbox, last_updated: now_unix(), layers, description, center })
	}

	/// Rescans only the layers touched by `sources` (called after a successful
	/// download). Merges into the existing document rather than rescanning the
	/// whole region tree.
	pub fn update_after_download(&self, region: &str, bbox_hint: Option<[f64; 4]>, source_names: &[(TileType, String)]) -> Result<()> {
		let region_dir = self.root.join(region);
		let mut doc = self.get(region)?.unwrap_or_else(|| RegionDocument {
			name: region.to_string(),
			bbox: bbox_hint.unwrap_or_else(|| BBox::default_unset().as_array()),
			last_updated: now_unix(),
			layers: Layers::default(),
			description: None,
			center: [0.0, 0.0],
		});

		for (tile_type, name) in source_names {
			let layer_dir = region_dir.join(tile_type.as_str()).join(name);
			match scan_layer_dir(name, *tile_type, &layer_dir) {
				Some(info) => {
					let map = match tile_type {
						TileType::Raster => &mut doc.layers.raster,
						TileType::Vector => &mut doc.layers.vector,
					};
					map.insert(name.clone(), info);
				}
				None => {
					let map = match tile_type {
						TileType::Raster => &mut doc.layers.raster,
						TileType::Vector => &mut doc.layers.vector,
					};
					map.remove(name);
				}
			}
		}

		if let Some(bbox) = bbox_hint {
			doc.bbox = bbox;
		}
		doc.last_updated = now_unix();
		doc.center = BBox::new(doc.bbox[0], doc.bbox[1], doc.bbox[2], doc.bbox[3]).map(|b| b.center()).unwrap_or(doc.center);
		self.write(&doc)
	}

	/// For every region directory on disk: scan, diff against the stored
	/// document, and rewrite only when the diff is non-empty. Regions in
	/// metadata but absent on disk have their documents deleted; regions on
	/// disk but absent from metadata get fresh documents.
	pub fn sync_all(&self) -> Result<Vec<AuditEntry>> {
		let mut summary = Vec::new();
		let on_disk = list_region_dirs(&self.root)?;

		for region in &on_disk {
			let existing = self.get(region)?;
			let fresh = self.scan(region)?;
			let diff = diff_documents(existing.as_ref(), &fresh);
			if diff.has_changes() {
				self.write(&fresh)?;
				summary.push(AuditEntry { region: region.clone(), diff: MetadataDiffSummary::from(&diff) });
			}
		}

		for region in list_metadata_regions(&self.root)? {
			if !on_disk.contains(&region) {
				self.delete(&region)?;
				summary.push(AuditEntry { region, diff: MetadataDiffSummary { bbox_changed: false, layers_added: Vec::new(), layers_removed: vec!["*".to_string()], layers_updated: Vec::new() } });
			}
		}

		Ok(summary)
	}

	/// Structured inconsistency report; never mutates state.
	pub fn audit(&self) -> Result<Vec<AuditEntry>> {
		let mut report = Vec::new();
		for region in list_region_dirs(&self.root)? {
			let existing = self.get(&region)?;
			let fresh = self.scan(&region)?;
			let diff = diff_documents(existing.as_ref(), &fresh);
			if diff.has_changes() {
				report.push(AuditEntry { region, diff: MetadataDiffSummary::from(&diff) });
			}
		}
		Ok(report)
	}

	/// Regions with a non-empty tile tree (and, if `require_metadata`, an
	/// existing metadata document), sorted by name.
	pub fn list_regions(&self, require_metadata: bool) -> Result<Vec<String>> {
		let mut regions = list_region_dirs(&self.root)?.into_iter().filter(|r| region_has_any_tiles(&self.root.join(r))).collect::<Vec<_>>();
		if require_metadata {
			regions.retain(|r| self.doc_path(r).exists());
		}
		regions.sort();
		Ok(regions)
	}

	pub fn root(&self) -> &Path {
		&self.root
	}
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ZoomExtent {
	#[serde(rename = "minX")]
	pub min_x: u32,
	#[serde(rename = "maxX")]
	pub max_x: u32,
	#[serde(rename = "minY")]
	pub min_y: u32,
	#[serde(rename = "maxY")]
	pub max_y: u32,
	pub tile_count: u64,
}

/// Per-zoom `{minX, maxX, minY, maxY, tile_count}`, backing `/tile_extents`.
pub(crate) fn scan_extents(layer_dir: &Path) -> HashMap<u8, ZoomExtent> {
	let mut extents = HashMap::new();
	let Ok(z_entries) = std::fs::read_dir(layer_dir) else { return extents };
	for z_entry in z_entries.flatten() {
		let Some(z) = z_entry.file_name().to_str().and_then(|s| s.parse::<u8>().ok()) else { continue };
		if !z_entry.path().is_dir() {
			continue;
		}
		let mut extent: Option<ZoomExtent> = None;
		let Ok(x_entries) = std::fs::read_dir(z_entry.path()) else { continue };
		for x_entry in x_entries.flatten() {
			let Some(x) = x_entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else { continue };
			if !x_entry.path().is_dir() {
				continue;
			}
			let Ok(y_entries) = std::fs::read_dir(x_entry.path()) else { continue };
			for y_entry in y_entries.flatten() {
				let path = y_entry.path();
				let Some(y) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<u32>().ok()) else { continue };
				if !path.is_file() || path.metadata().map(|m| m.len() == 0).unwrap_or(true) {
					continue;
				}
				extent = Some(match extent {
					None => ZoomExtent { min_x: x, max_x: x, min_y: y, max_y: y, tile_count: 1 },
					Some(e) => ZoomExtent {
						min_x: e.min_x.min(x),
						max_x: e.max_x.max(x),
						min_y: e.min_y.min(y),
						max_y: e.max_y.max(y),
						tile_count: e.tile_count + 1,
					},
				});
			}
		}
		if let Some(e) = extent {
			extents.insert(z, e);
		}
	}
	extents
}

/// `{x -> sorted list of y}` for one zoom level, backing `/tile_index`.
pub(crate) fn scan_index(layer_dir: &Path, z: u8) -> HashMap<u32, Vec<u32>> {
	let mut index: HashMap<u32, Vec<u32>> = HashMap::new();
	let z_dir = layer_dir.join(z.to_string());
	let Ok(x_entries) = std::fs::read_dir(&z_dir) else { return index };
	for x_entry in x_entries.flatten() {
		let Some(x) = x_entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else { continue };
		if !x_entry.path().is_dir() {
			continue;
		}
		let Ok(y_entries) = std::fs::read_dir(x_entry.path()) else { continue };
		let mut ys = Vec::new();
		for y_entry in y_entries.flatten() {
			let path = y_entry.path();
			let Some(y) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<u32>().ok()) else { continue };
			if path.is_file() && path.metadata().map(|m| m.len() > 0).unwrap_or(false) {
				ys.push(y);
			}
		}
		if !ys.is_empty() {
			ys.sort_unstable();
			index.insert(x, ys);
		}
	}
	index
}

fn has_direct_zoom_dirs(type_dir: &Path) -> bool {
	let Ok(entries) = std::fs::read_dir(type_dir) else { return false };
	for entry in entries.flatten() {
		if entry.path().is_dir() {
			let name = entry.file_name();
			if name.to_str().is_some_and(|s| s.parse::<u8>().is_ok()) {
				return true;
			}
			// Any non-numeric directory means this is the ordinary layered layout.
			return false;
		}
	}
	false
}

pub(crate) fn scan_layer_dir(name: &str, tile_type: TileType, dir: &Path) -> Option<LayerInfo> {
	let mut tile_count = 0u64;
	let mut total_size = 0u64;
	let mut zooms = BTreeSet::new();

	let Ok(z_entries) = std::fs::read_dir(dir) else { return None };
	for z_entry in z_entries.flatten() {
		let Some(z) = z_entry.file_name().to_str().and_then(|s| s.parse::<u8>().ok()) else { continue };
		if !z_entry.path().is_dir() {
			continue;
		}
		let Ok(x_entries) = std::fs::read_dir(z_entry.path()) else { continue };
		let mut zoom_has_tiles = false;
		for x_entry in x_entries.flatten() {
			if x_entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()).is_none() {
				continue;
			}
			if !x_entry.path().is_dir() {
				continue;
			}
			let Ok(y_entries) = std::fs::read_dir(x_entry.path()) else { continue };
			for y_entry in y_entries.flatten() {
				let path = y_entry.path();
				if !path.is_file() {
					continue;
				}
				let stem_is_numeric = path.file_stem().and_then(|s| s.to_str()).is_some_and(|s| s.parse::<u32>().is_ok());
				if !stem_is_numeric {
					continue;
				}
				let Ok(meta) = path.metadata() else { continue };
				if meta.len() == 0 {
					continue;
				}
				tile_count += 1;
				total_size += meta.len();
				zoom_has_tiles = true;
			}
		}
		if zoom_has_tiles {
			zooms.insert(z);
		}
	}

	if tile_count == 0 {
		return None;
	}

	let min_zoom = *zooms.iter().min().unwrap();
	let max_zoom = *zooms.iter().max().unwrap();
	Some(LayerInfo {
		name: name.to_string(),
		tile_type,
		min_zoom,
		max_zoom,
		tile_count,
		total_size,
		available_zooms: zooms.into_iter().collect(),
		last_updated: now_unix(),
	})
}

fn list_region_dirs(root: &Path) -> Result<Vec<String>> {
	if !root.is_dir() {
		return Ok(Vec::new());
	}
	let mut regions = Vec::new();
	for entry in std::fs::read_dir(root).with_context(|| format!("reading {}", root.display()))? {
		let entry = entry?;
		if !entry.path().is_dir() {
			continue;
		}
		let Some(name) = entry.file_name().to_str().map(str::to_string) else { continue };
		if name == "metadata" {
			continue;
		}
		regions.push(name);
	}
	Ok(regions)
}

fn list_metadata_regions(root: &Path) -> Result<Vec<String>> {
	let dir = root.join("metadata").join("regions");
	if !dir.is_dir() {
		return Ok(Vec::new());
	}
	let mut regions = Vec::new();
	for entry in std::fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))? {
		let entry = entry?;
		if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
			if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
				regions.push(stem.to_string());
			}
		}
	}
	Ok(regions)
}

fn region_has_any_tiles(region_dir: &Path) -> bool {
	for tile_type in ["raster", "vector"] {
		let type_dir = region_dir.join(tile_type);
		if !type_dir.is_dir() {
			continue;
		}
		if walk_has_file(&type_dir, 0) {
			return true;
		}
	}
	false
}

fn walk_has_file(dir: &Path, depth: u8) -> bool {
	if depth > 5 {
		return false;
	}
	let Ok(entries) = std::fs::read_dir(dir) else { return false };
	for entry in entries.flatten() {
		let path = entry.path();
		if path.is_file() {
			if path.metadata().map(|m| m.len() > 0).unwrap_or(false) {
				return true;
			}
		} else if path.is_dir() && walk_has_file(&path, depth + 1) {
			return true;
		}
	}
	false
}

/// Compares two layers on exactly the fields spec.md §4.6 names for the sync
/// diff — `tile_count`, `total_size`, `available_zooms`, `min_zoom`,
/// `max_zoom` — deliberately excluding `last_updated`, which is restamped on
/// every scan and would otherwise make an unchanged tree diff as changed.
fn layer_content_eq(a: &LayerInfo, b: &LayerInfo) -> bool {
	a.tile_count == b.tile_count && a.total_size == b.total_size && a.available_zooms == b.available_zooms && a.min_zoom == b.min_zoom && a.max_zoom == b.max_zoom
}

fn diff_documents(old: Option<&RegionDocument>, new: &RegionDocument) -> MetadataDiff {
	let mut diff = MetadataDiff::default();
	let Some(old) = old else {
		for (name, info) in &new.layers.raster {
			diff.layers_added.push(LayerKey { tile_type: info.tile_type, name: name.clone() });
		}
		for (name, info) in &new.layers.vector {
			diff.layers_added.push(LayerKey { tile_type: info.tile_type, name: name.clone() });
		}
		diff.bbox_changed = true;
		return diff;
	};

	diff.bbox_changed = old.bbox != new.bbox;

	for (map_old, map_new, tile_type) in [(&old.layers.raster, &new.layers.raster, TileType::Raster), (&old.layers.vector, &new.layers.vector, TileType::Vector)] {
		for name in map_new.keys() {
			match map_old.get(name) {
				None => diff.layers_added.push(LayerKey { tile_type, name: name.clone() }),
				Some(old_info) if !layer_content_eq(old_info, &map_new[name]) => {
					diff.layers_updated.push(LayerKey { tile_type, name: name.clone() });
				}
				Some(_) => {}
			}
		}
		for name in map_old.keys() {
			if !map_new.contains_key(name) {
				diff.layers_removed.push(LayerKey { tile_type, name: name.clone() });
			}
		}
	}

	diff
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use tempfile::tempdir;

	fn empty_config() -> Arc<Config> {
		Arc::new(
			Config::from_str(
				r#"{"regions":{},"servers":[],"output_dir":"tiles","max_workers_per_server":1,"retry_attempts":1,"timeout":1}"#,
			)
			.unwrap(),
		)
	}

	fn write_tile(root: &Path, region: &str, tile_type: &str, layer: &str, z: u8, x: u32, y: u32) {
		let path = root.join(region).join(tile_type).join(layer).join(z.to_string()).join(x.to_string()).join(format!("{y}.png"));
		std::fs::create_dir_all(path.parent().unwrap()).unwrap();
		std::fs::write(&path, b"tiledata").unwrap();
	}

	#[test]
	fn scan_counts_tiles_and_derives_zoom_bounds() {
		let dir = tempdir().unwrap();
		write_tile(dir.path(), "r1", "raster", "osm", 5, 10, 12);
		write_tile(dir.path(), "r1", "raster", "osm", 6, 20, 24);

		let store = MetadataStore::new(dir.path(), empty_config());
		let doc = store.scan("r1").unwrap();

		let layer = &doc.layers.raster["osm"];
		assert_eq!(layer.tile_count, 2);
		assert_eq!(layer.min_zoom, 5);
		assert_eq!(layer.max_zoom, 6);
		assert_eq!(layer.available_zooms, vec![5, 6]);
	}

	#[test]
	fn scan_ignores_non_numeric_entries() {
		let dir = tempdir().unwrap();
		write_tile(dir.path(), "r1", "raster", "osm", 5, 10, 12);
		let junk = dir.path().join("r1/raster/osm/notazoom");
		std::fs::create_dir_all(&junk).unwrap();

		let store = MetadataStore::new(dir.path(), empty_config());
		let doc = store.scan("r1").unwrap();
		assert_eq!(doc.layers.raster["osm"].tile_count, 1);
	}

	#[test]
	fn turkiye_dialect_synthesizes_single_layer() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("turkiye/raster/5/10/12.png");
		std::fs::create_dir_all(path.parent().unwrap()).unwrap();
		std::fs::write(&path, b"tiledata").unwrap();

		let store = MetadataStore::new(dir.path(), empty_config());
		let doc = store.scan("turkiye").unwrap();
		assert!(doc.layers.raster.contains_key("turkiye_raster"));
		assert_eq!(doc.layers.raster["turkiye_raster"].tile_count, 1);
	}

	#[test]
	fn sync_all_writes_new_region_and_removes_stale_document() {
		let dir = tempdir().unwrap();
		write_tile(dir.path(), "r1", "raster", "osm", 5, 10, 12);
		let store = MetadataStore::new(dir.path(), empty_config());

		let summary = store.sync_all().unwrap();
		assert_eq!(summary.len(), 1);
		assert!(dir.path().join("metadata/regions/r1.json").exists());

		let unchanged = store.sync_all().unwrap();
		assert!(unchanged.is_empty());

		std::fs::remove_dir_all(dir.path().join("r1")).unwrap();
		let summary = store.sync_all().unwrap();
		assert!(!dir.path().join("metadata/regions/r1.json").exists());
		assert_eq!(summary.len(), 1);
	}

	#[test]
	fn bbox_resolution_prefers_config_then_existing_then_default() {
		let dir = tempdir().unwrap();
		write_tile(dir.path(), "r1", "raster", "osm", 5, 10, 12);
		let store = MetadataStore::new(dir.path(), empty_config());
		let doc = store.scan("r1").unwrap();
		assert_eq!(doc.bbox, [0.0, 0.0, 1.0, 1.0]);
	}

	#[test]
	fn diff_ignores_last_updated_on_otherwise_unchanged_layer() {
		let base = LayerInfo {
			name: "osm".to_string(),
			tile_type: TileType::Raster,
			min_zoom: 5,
			max_zoom: 5,
			tile_count: 1,
			total_size: 8,
			available_zooms: vec![5],
			last_updated: 1,
		};
		let mut later = base.clone();
		later.last_updated = 1000;
		assert!(layer_content_eq(&base, &later));

		let mut grown = base.clone();
		grown.tile_count = 2;
		assert!(!layer_content_eq(&base, &grown));
	}

	#[test]
	fn sync_all_reports_no_diff_when_only_last_updated_moved() {
		let dir = tempdir().unwrap();
		write_tile(dir.path(), "r1", "raster", "osm", 5, 10, 12);
		let store = MetadataStore::new(dir.path(), empty_config());

		let first = store.scan("r1").unwrap();
		store.write(&first).unwrap();

		// A second scan restamps `last_updated` on every layer even though the
		// tree on disk hasn't changed; the diff must still come back empty.
		let mut second = store.scan("r1").unwrap();
		for info in second.layers.raster.values_mut() {
			info.last_updated = first.layers.raster["osm"].last_updated + 1000;
		}
		let diff = diff_documents(Some(&first), &second);
		assert!(!diff.has_changes());
	}
}
