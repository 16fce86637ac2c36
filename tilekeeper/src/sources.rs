//! Source registry (C3): a process-lifetime mapping from source name to a
//! uniform handle over remote HTTP tile servers and local SQLite archives,
//! built once from [`Config`](tilekeeper_core::config::Config) at startup —
//! never a global singleton, per spec.md §9's flagged anti-pattern.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tilekeeper_container::MbtilesArchive;
use tilekeeper_core::config::{Config, HttpSourceCfg, LocalSourceCfg, ServerCfg};
use tilekeeper_core::{BBox, TileType};

/// Which raster extension a remote source's responses should be probed/written
/// under when the server doesn't otherwise disambiguate. Carried from
/// `tile_download_service.py`'s `download_tiles_batch` extension selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterContentType {
	Png,
	Jpg,
}

#[derive(Debug, Clone)]
pub struct HttpSource {
	pub name: String,
	pub tile_type: TileType,
	/// Template containing `{z}`, `{x}`, `{y}` placeholders.
	pub url_template: String,
	pub headers: HashMap<String, String>,
	pub raster_content_type: RasterContentType,
}

impl HttpSource {
	/// Substitutes `{z}`/`{x}`/`{y}` in the URL template for a concrete tile.
	pub fn url_for(&self, z: u8, x: u32, y: u32) -> String {
		self.url_template.replace("{z}", &z.to_string()).replace("{x}", &x.to_string()).replace("{y}", &y.to_string())
	}
}

pub struct LocalSource {
	pub name: String,
	pub tile_type: TileType,
	pub path: String,
	pub declared_bounds: Option<BBox>,
	pub declared_zooms: Option<(u8, u8)>,
	pub archive: Arc<MbtilesArchive>,
}

impl std::fmt::Debug for LocalSource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LocalSource")
			.field("name", &self.name)
			.field("tile_type", &self.tile_type)
			.field("path", &self.path)
			.finish()
	}
}

/// Uniform handle over a remote HTTP source or a local archive.
#[derive(Debug, Clone)]
pub enum SourceHandle {
	Remote(Arc<HttpSource>),
	Local(Arc<LocalSource>),
}

impl SourceHandle {
	pub fn name(&self) -> &str {
		match self {
			SourceHandle::Remote(s) => &s.name,
			SourceHandle::Local(s) => &s.name,
		}
	}

	pub fn tile_type(&self) -> TileType {
		match self {
			SourceHandle::Remote(s) => s.tile_type,
			SourceHandle::Local(s) => s.tile_type,
		}
	}

	pub fn bounds(&self) -> Option<BBox> {
		match self {
			SourceHandle::Remote(_) => None,
			SourceHandle::Local(s) => s.declared_bounds.or(s.archive.descriptor.bounds),
		}
	}

	pub fn zoom_range(&self) -> Option<(u8, u8)> {
		match self {
			SourceHandle::Remote(_) => None,
			SourceHandle::Local(s) => s
				.declared_zooms
				.or_else(|| s.archive.descriptor.min_zoom.zip(s.archive.descriptor.max_zoom)),
		}
	}

	/// `true` when the source is usable: a remote source is assumed reachable
	/// (availability is only meaningfully known at request time), a local
	/// source is available iff its archive file still exists on disk.
	pub fn availability(&self) -> bool {
		match self {
			SourceHandle::Remote(_) => true,
			SourceHandle::Local(s) => std::path::Path::new(&s.path).exists(),
		}
	}

	pub fn is_remote(&self) -> bool {
		matches!(self, SourceHandle::Remote(_))
	}
}

/// A process-lifetime mapping from source name to source handle.
pub struct SourceRegistry {
	sources: HashMap<String, SourceHandle>,
	/// Preserves configuration order for deterministic `all_sources()`/`filter()` output.
	order: Vec<String>,
}

impl SourceRegistry {
	pub fn from_config(config: &Config) -> Result<SourceRegistry> {
		let mut sources = HashMap::new();
		let mut order = Vec::new();

		for server in &config.servers {
			match server {
				ServerCfg::Http(http) => {
					let source = build_http_source(http);
					order.push(source.name.clone());
					sources.insert(source.name.clone(), SourceHandle::Remote(Arc::new(source)));
				}
				ServerCfg::Local(local) => {
					let source = build_local_source(local)
						.with_context(|| format!("opening local archive source '{}'", local.name))?;
					order.push(source.name.clone());
					sources.insert(source.name.clone(), SourceHandle::Local(Arc::new(source)));
				}
			}
		}

		Ok(SourceRegistry { sources, order })
	}

	pub fn all_sources(&self) -> Vec<&SourceHandle> {
		self.order.iter().filter_map(|name| self.sources.get(name)).collect()
	}

	pub fn by_name(&self, name: &str) -> Option<&SourceHandle> {
		self.sources.get(name)
	}

	/// Resolves a comma-separated name list (as accepted from the CLI) against
	/// the registry, preserving registry order and skipping unknown names.
	pub fn by_names(&self, names: &[String]) -> Vec<&SourceHandle> {
		self.order.iter().filter(|n| names.iter().any(|want| want == *n)).filter_map(|n| self.sources.get(n)).collect()
	}

	/// Composes the participating source list per spec.md §4.3's precise
	/// filter semantics: union when both filters are given, the single named
	/// set when only one is given, everything when neither is given.
	pub fn filter(&self, remote_filter: Option<&[String]>, local_filter: Option<&[String]>) -> Vec<&SourceHandle> {
		match (remote_filter, local_filter) {
			(Some(rf), Some(lf)) => self
				.order
				.iter()
				.filter_map(|n| self.sources.get(n))
				.filter(|s| (s.is_remote() && rf.iter().any(|n| n == s.name())) || (!s.is_remote() && lf.iter().any(|n| n == s.name())))
				.collect(),
			(Some(rf), None) => self.order.iter().filter_map(|n| self.sources.get(n)).filter(|s| s.is_remote() && rf.iter().any(|n| n == s.name())).collect(),
			(None, Some(lf)) => self.order.iter().filter_map(|n| self.sources.get(n)).filter(|s| !s.is_remote() && lf.iter().any(|n| n == s.name())).collect(),
			(None, None) => self.all_sources(),
		}
	}
}

fn build_http_source(cfg: &HttpSourceCfg) -> HttpSource {
	let raster_content_type = if cfg.url.ends_with(".jpg") || cfg.url.ends_with(".jpeg") || cfg.headers.get("Accept").is_some_and(|a| a.contains("jpeg")) {
		RasterContentType::Jpg
	} else {
		RasterContentType::Png
	};
	HttpSource {
		name: cfg.name.clone(),
		tile_type: cfg.tile_type,
		url_template: cfg.url.clone(),
		headers: cfg.headers.clone(),
		raster_content_type,
	}
}

fn build_local_source(cfg: &LocalSourceCfg) -> Result<LocalSource> {
	let archive = MbtilesArchive::open(std::path::Path::new(&cfg.path))?;
	let declared_bounds = match cfg.bounds {
		Some([a, b, c, d]) => BBox::new(a, b, c, d).ok(),
		None => None,
	};
	Ok(LocalSource {
		name: cfg.name.clone(),
		tile_type: cfg.tile_type,
		path: cfg.path.clone(),
		declared_bounds,
		declared_zooms: cfg.min_zoom.zip(cfg.max_zoom),
		archive: Arc::new(archive),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn remote(name: &str) -> SourceHandle {
		SourceHandle::Remote(Arc::new(HttpSource {
			name: name.to_string(),
			tile_type: TileType::Raster,
			url_template: "https://tile.example/{z}/{x}/{y}.png".into(),
			headers: HashMap::new(),
			raster_content_type: RasterContentType::Png,
		}))
	}

	#[test]
	fn url_for_substitutes_placeholders() {
		let source = remote("osm");
		let SourceHandle::Remote(http) = &source else { unreachable!() };
		assert_eq!(http.url_for(5, 10, 12), "https://tile.example/5/10/12.png");
	}

	#[test]
	fn filter_neither_returns_all() {
		let mut sources = HashMap::new();
		sources.insert("a".to_string(), remote("a"));
		sources.insert("b".to_string(), remote("b"));
		let registry = SourceRegistry { sources, order: vec!["a".into(), "b".into()] };
		assert_eq!(registry.filter(None, None).len(), 2);
	}

	#[test]
	fn filter_remote_only_restricts_to_named_remote_set() {
		let mut sources = HashMap::new();
		sources.insert("a".to_string(), remote("a"));
		sources.insert("b".to_string(), remote("b"));
		let registry = SourceRegistry { sources, order: vec!["a".into(), "b".into()] };
		let filtered = registry.filter(Some(&["a".to_string()]), None);
		assert_eq!(filtered.len(), 1);
		assert_eq!(filtered[0].name(), "a");
	}
}
