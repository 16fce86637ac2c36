//! Configuration model and loader. A JSON document is parsed into explicit
//! per-concern records (per spec.md §9's "nested dictionaries of config" guidance)
//! and validated once; the result is treated as immutable for the life of the
//! process.

use crate::content_type::TileType;
use crate::error::TileKeeperError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionCfg {
	pub bbox: Option<[f64; 4]>,
	pub min_zoom: Option<u8>,
	pub max_zoom: Option<u8>,
	pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerCfg {
	Http(HttpSourceCfg),
	Local(LocalSourceCfg),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSourceCfg {
	pub name: String,
	pub tile_type: TileType,
	/// Template containing `{z}`, `{x}`, `{y}` placeholders.
	pub url: String,
	#[serde(default)]
	pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSourceCfg {
	pub name: String,
	pub tile_type: TileType,
	pub path: String,
	#[serde(default)]
	pub source_type: Option<String>,
	pub bounds: Option<[f64; 4]>,
	pub min_zoom: Option<u8>,
	pub max_zoom: Option<u8>,
	pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLimits {
	pub max_workers_per_server: usize,
	pub retry_attempts: u32,
	pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingCfg {
	#[serde(default)]
	pub level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	pub regions: HashMap<String, RegionCfg>,
	pub servers: Vec<ServerCfg>,
	pub output_dir: String,
	pub max_workers_per_server: usize,
	pub retry_attempts: u32,
	pub timeout: u64,
	#[serde(default)]
	pub logging: Option<LoggingCfg>,
	/// Unknown top-level keys are preserved but ignored, per spec.md §4.9.
	#[serde(flatten)]
	pub extra: HashMap<String, serde_json::Value>,
}

impl Config {
	pub fn download_limits(&self) -> DownloadLimits {
		DownloadLimits {
			max_workers_per_server: self.max_workers_per_server,
			retry_attempts: self.retry_attempts,
			timeout: self.timeout,
		}
	}

	pub fn from_str(text: &str) -> Result<Config> {
		let config: Config = serde_json::from_str(text).context("parsing configuration JSON")?;
		config.validate()?;
		Ok(config)
	}

	pub fn load(path: &Path) -> Result<Config> {
		let text = std::fs::read_to_string(path)
			.with_context(|| format!("reading configuration file {}", path.display()))?;
		Config::from_str(&text)
	}

	fn validate(&self) -> Result<()> {
		if self.output_dir.trim().is_empty() {
			return Err(TileKeeperError::Configuration("output_dir must not be empty".into()).into());
		}
		if self.max_workers_per_server == 0 {
			return Err(TileKeeperError::Configuration("max_workers_per_server must be > 0".into()).into());
		}
		for server in &self.servers {
			match server {
				ServerCfg::Http(h) if h.name.trim().is_empty() => {
					return Err(TileKeeperError::Configuration("server name must not be empty".into()).into());
				}
				ServerCfg::Local(l) if l.name.trim().is_empty() => {
					return Err(TileKeeperError::Configuration("server name must not be empty".into()).into());
				}
				_ => {}
			}
		}
		for (name, region) in &self.regions {
			if let (Some(min_zoom), Some(max_zoom)) = (region.min_zoom, region.max_zoom) {
				if min_zoom > max_zoom {
					return Err(TileKeeperError::Configuration(format!(
						"region {name}: min_zoom ({min_zoom}) > max_zoom ({max_zoom})"
					))
					.into());
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE: &str = r#"{
		"regions": { "istanbul": { "bbox": [28.5, 40.8, 29.5, 41.2], "min_zoom": 5, "max_zoom": 14 } },
		"servers": [
			{ "type": "http", "name": "osm", "tile_type": "raster", "url": "https://tile.example/{z}/{x}/{y}.png" },
			{ "type": "local", "name": "archive", "tile_type": "vector", "path": "./archive.mbtiles" }
		],
		"output_dir": "map_tiles",
		"max_workers_per_server": 15,
		"retry_attempts": 3,
		"timeout": 30
	}"#;

	#[test]
	fn parses_sample_configuration() {
		let config = Config::from_str(SAMPLE).unwrap();
		assert_eq!(config.servers.len(), 2);
		assert_eq!(config.regions["istanbul"].min_zoom, Some(5));
	}

	#[test]
	fn rejects_empty_output_dir() {
		let bad = SAMPLE.replace("\"map_tiles\"", "\"\"");
		assert!(Config::from_str(&bad).is_err());
	}

	#[test]
	fn rejects_inverted_region_zoom_range() {
		let bad = SAMPLE.replace("\"min_zoom\": 5, \"max_zoom\": 14", "\"min_zoom\": 14, \"max_zoom\": 5");
		assert!(Config::from_str(&bad).is_err());
	}

	#[test]
	fn preserves_unknown_top_level_keys() {
		let with_extra = SAMPLE.replacen('{', "{\"experimental_flag\": true,", 1);
		let config = Config::from_str(&with_extra).unwrap();
		assert_eq!(config.extra.get("experimental_flag"), Some(&serde_json::json!(true)));
	}
}
