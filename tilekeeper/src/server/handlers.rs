//! Route handlers. Grounded in the teacher's `versatiles/src/server/handlers.rs`
//! shape (`ok_json`/`error_404`/`error_500` response helpers, `log::debug!`
//! around every request, never let an internal error escape as a panic),
//! adapted to a filesystem/metadata-backed tile tree instead of an in-memory
//! container registry.

use super::AppState;
use crate::layout::{safe_under_root, tile_path};
use crate::metadata::{scan_extents, scan_index, scan_layer_dir};
use crate::sources::SourceHandle;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tilekeeper_core::names::resolve_name;
use tilekeeper_core::{TileType, compression, content_type::mime_for_extension, tms_invert};

const EXTENT_CACHE_TTL: Duration = Duration::from_secs(120);

fn error_plain(status: StatusCode, message: &str) -> Response<Body> {
	Response::builder()
		.status(status)
		.header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
		.body(Body::from(message.to_string()))
		.expect("failed to build error response")
}

fn error_json(status: StatusCode, message: &str) -> Response<Body> {
	let body = json!({ "error": message }).to_string();
	Response::builder()
		.status(status)
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(body))
		.expect("failed to build error response")
}

fn not_found() -> Response<Body> {
	error_plain(StatusCode::NOT_FOUND, "Not Found")
}

fn ok_json(value: &Value, cache_control: &str) -> Response<Body> {
	Response::builder()
		.status(StatusCode::OK)
		.header(header::CONTENT_TYPE, "application/json")
		.header(header::CACHE_CONTROL, cache_control)
		.body(Body::from(value.to_string()))
		.expect("failed to build json response")
}

/// Lists a region directory's entries, used both for diacritics resolution and
/// for the strict "filesystem is the single source of truth" layer listing.
fn list_dir_names(dir: &std::path::Path) -> Vec<String> {
	let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new() };
	entries.flatten().filter(|e| e.path().is_dir()).filter_map(|e| e.file_name().to_str().map(str::to_string)).collect()
}

/// Resolves a requested region name against the directories actually present
/// under `root`, diacritics-insensitively, per spec.md §4.7.
fn resolve_region_dir(root: &std::path::Path, requested: &str) -> String {
	let entries: Vec<String> = list_dir_names(root).into_iter().filter(|n| n != "metadata").collect();
	resolve_name(requested, entries.iter().map(String::as_str)).to_string()
}

fn parse_tile_type(raw: &str) -> Option<TileType> {
	match raw {
		"raster" => Some(TileType::Raster),
		"vector" => Some(TileType::Vector),
		_ => None,
	}
}

/// Splits a `{y}.{ext}` path segment into its two parts.
fn split_y_ext(segment: &str) -> Option<(u32, String)> {
	let (y_raw, ext) = segment.rsplit_once('.')?;
	let y = y_raw.parse().ok()?;
	Some((y, ext.to_string()))
}

pub async fn index() -> Response<Body> {
	let body = "<html><head><title>TileKeeper</title></head><body><h1>TileKeeper</h1>\
		<p>See <a href=\"/list_regions\">/list_regions</a> and <a href=\"/api/config\">/api/config</a>.</p>\
		</body></html>";
	Response::builder()
		.status(StatusCode::OK)
		.header(header::CONTENT_TYPE, "text/html; charset=utf-8")
		.header(header::CACHE_CONTROL, "no-cache")
		.body(Body::from(body))
		.expect("failed to build index response")
}

pub async fn favicon() -> StatusCode {
	StatusCode::NO_CONTENT
}

pub async fn list_regions(State(state): State<Arc<AppState>>) -> Response<Body> {
	log::debug!("handle list_regions");
	match state.metadata.list_regions(false) {
		Ok(regions) => ok_json(&json!(regions), "no-cache"),
		Err(err) => {
			log::warn!("list_regions failed: {err}");
			error_json(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
		}
	}
}

pub async fn region_map_styles(State(state): State<Arc<AppState>>, Path(requested_region): Path<String>) -> Response<Body> {
	log::debug!("handle region_map_styles for '{requested_region}'");
	let region = resolve_region_dir(&state.root, &requested_region);
	let region_dir = state.root.join(&region);
	if !region_dir.is_dir() {
		return not_found();
	}

	let mut raster = Map::new();
	let mut vector = Map::new();
	for (tile_type, out) in [(TileType::Raster, &mut raster), (TileType::Vector, &mut vector)] {
		let type_dir = region_dir.join(tile_type.as_str());
		for layer in list_dir_names(&type_dir) {
			if let Some(info) = scan_layer_dir(&layer, tile_type, &type_dir.join(&layer)) {
				out.insert(layer, json!({
					"type": info.tile_type.as_str(),
					"min_zoom": info.min_zoom,
					"max_zoom": info.max_zoom,
					"tile_count": info.tile_count,
					"total_size": info.total_size,
					"available_zooms": info.available_zooms,
				}));
			}
		}
	}

	let doc = state.metadata.get(&region).ok().flatten();
	let (bbox, center) = match &doc {
		Some(d) => (d.bbox, d.center),
		None => {
			let default = tilekeeper_core::BBox::default_unset();
			(default.as_array(), default.center())
		}
	};

	ok_json(&json!({ "raster": raster, "vector": vector, "region_info": { "bbox": bbox, "center": center } }), "no-cache")
}

pub async fn tile_extents(State(state): State<Arc<AppState>>, Path((requested_region, ttype, layer)): Path<(String, String, String)>) -> Response<Body> {
	log::debug!("handle tile_extents for '{requested_region}/{ttype}/{layer}'");
	let Some(tile_type) = parse_tile_type(&ttype) else { return error_plain(StatusCode::BAD_REQUEST, "unknown tile type") };
	let region = resolve_region_dir(&state.root, &requested_region);
	let layer_dir = state.root.join(&region).join(tile_type.as_str()).join(&layer);

	let cache_key = format!("extents:{region}:{}:{layer}", tile_type.as_str());
	if let Some(entry) = state.extent_cache.get(&cache_key) {
		if entry.at.elapsed() < EXTENT_CACHE_TTL {
			return ok_json(&entry.value, "no-cache");
		}
	}

	let extents = scan_extents(&layer_dir);
	let mut out = Map::new();
	for (z, e) in extents {
		out.insert(z.to_string(), json!({ "minX": e.min_x, "maxX": e.max_x, "minY": e.min_y, "maxY": e.max_y, "tile_count": e.tile_count }));
	}
	let value = Value::Object(out);
	state.extent_cache.insert(cache_key, super::CachedJson { value: value.clone(), at: Instant::now() });
	ok_json(&value, "no-cache")
}

pub async fn tile_index(
	State(state): State<Arc<AppState>>,
	Path((requested_region, ttype, layer, z)): Path<(String, String, String, u8)>,
) -> Response<Body> {
	log::debug!("handle tile_index for '{requested_region}/{ttype}/{layer}/{z}'");
	let Some(tile_type) = parse_tile_type(&ttype) else { return error_plain(StatusCode::BAD_REQUEST, "unknown tile type") };
	let region = resolve_region_dir(&state.root, &requested_region);
	let layer_dir = state.root.join(&region).join(tile_type.as_str()).join(&layer);

	let cache_key = format!("index:{region}:{}:{layer}:{z}", tile_type.as_str());
	if let Some(entry) = state.index_cache.get(&cache_key) {
		if entry.at.elapsed() < EXTENT_CACHE_TTL {
			return ok_json(&entry.value, "no-cache");
		}
	}

	let index = scan_index(&layer_dir, z);
	let mut out = Map::new();
	for (x, ys) in index {
		out.insert(x.to_string(), json!(ys));
	}
	let value = Value::Object(out);
	state.index_cache.insert(cache_key, super::CachedJson { value: value.clone(), at: Instant::now() });
	ok_json(&value, "no-cache")
}

pub async fn inspect_mbtiles(State(state): State<Arc<AppState>>, Query(params): Query<HashMap<String, String>>) -> Response<Body> {
	let Some(name) = params.get("server") else { return error_plain(StatusCode::BAD_REQUEST, "missing 'server' query parameter") };
	log::debug!("handle inspect_mbtiles for server '{name}'");
	let Some(SourceHandle::Local(local)) = state.registry.by_name(name) else {
		return error_plain(StatusCode::NOT_FOUND, "unknown local archive source");
	};

	let descriptor = &local.archive.descriptor;
	let vector_layers = descriptor
		.raw_metadata
		.get("json")
		.and_then(|raw| serde_json::from_str::<Value>(raw).ok())
		.and_then(|v| v.get("vector_layers").cloned())
		.unwrap_or_else(|| json!([]));

	ok_json(
		&json!({
			"schema": format!("{:?}", descriptor.schema),
			"is_tms": descriptor.is_tms,
			"bounds": descriptor.bounds.map(|b| b.as_array()),
			"min_zoom": descriptor.min_zoom,
			"max_zoom": descriptor.max_zoom,
			"raw_metadata": descriptor.raw_metadata,
			"vector_layers": vector_layers,
		}),
		"no-cache",
	)
}

/// Shared response builder for a tile's bytes once resolved, handling vector
/// gzip normalization, ETag computation, and raster passthrough.
fn tile_body_response(tile_type: TileType, ext: &str, data: Vec<u8>, headers: &HeaderMap) -> Response<Body> {
	if tile_type == TileType::Vector {
		let (normalized, detected) = match compression::normalize_to_gzip(&data) {
			Ok(result) => result,
			Err(err) => {
				log::warn!("failed to normalize vector tile encoding: {err}");
				return error_json(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
			}
		};
		let etag = compression::weak_etag(&normalized);
		if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
			if compression::if_none_match_hits(if_none_match, &etag) {
				return Response::builder()
					.status(StatusCode::NOT_MODIFIED)
					.header(header::CACHE_CONTROL, "public, max-age=86400")
					.header(header::VARY, "Accept-Encoding")
					.header(header::ETAG, format!("W/\"{etag}\""))
					.body(Body::empty())
					.expect("failed to build 304 response");
			}
		}
		return Response::builder()
			.status(StatusCode::OK)
			.header(header::CONTENT_TYPE, mime_for_extension("pbf"))
			.header(header::CONTENT_ENCODING, "gzip")
			.header(header::CACHE_CONTROL, "public, max-age=86400")
			.header(header::VARY, "Accept-Encoding")
			.header(header::ETAG, format!("W/\"{etag}\""))
			.header("X-Tile-Detected-Format", detected.as_str())
			.body(Body::from(normalized))
			.expect("failed to build tile response");
	}

	Response::builder()
		.status(StatusCode::OK)
		.header(header::CONTENT_TYPE, mime_for_extension(ext))
		.header(header::CACHE_CONTROL, "public, max-age=3600")
		.body(Body::from(data))
		.expect("failed to build tile response")
}

pub async fn map_tiles_static(
	State(state): State<Arc<AppState>>,
	Path((requested_region, ttype, layer, z, x, yext)): Path<(String, String, String, u8, u32, String)>,
	headers: HeaderMap,
) -> Response<Body> {
	let Some(tile_type) = parse_tile_type(&ttype) else { return error_plain(StatusCode::BAD_REQUEST, "unknown tile type") };
	let Some((y, ext)) = split_y_ext(&yext) else { return error_plain(StatusCode::BAD_REQUEST, "malformed tile coordinate") };
	log::debug!("handle map_tiles_static {requested_region}/{ttype}/{layer}/{z}/{x}/{y}.{ext}");

	let region = resolve_region_dir(&state.root, &requested_region);
	let candidates = candidate_paths(&state.root, &region, tile_type, &layer, z, x, y, &ext);

	let mut escaped = false;
	for candidate in candidates {
		match safe_under_root(&candidate, &state.root) {
			Ok(resolved) => {
				if let Ok(data) = std::fs::read(&resolved) {
					if !data.is_empty() {
						return tile_body_response(tile_type, &ext, data, &headers);
					}
				}
			}
			Err(_) => escaped = true,
		}
	}

	if escaped {
		return error_plain(StatusCode::FORBIDDEN, "path escapes tile root");
	}
	not_found()
}

/// Builds the fallback chain for a static tile request: the direct XYZ path,
/// then the TMS-flipped row, then (for raster) each alternate extension
/// against both rows, per spec.md §4.7's coordinate-scheme fallback.
fn candidate_paths(root: &std::path::Path, region: &str, tile_type: TileType, layer: &str, z: u8, x: u32, y: u32, ext: &str) -> Vec<PathBuf> {
	let flipped_y = tms_invert(z, y);
	let mut exts = vec![ext.to_string()];
	if tile_type == TileType::Raster {
		for alt in ["png", "jpg", "jpeg"] {
			if !exts.iter().any(|e| e == alt) {
				exts.push(alt.to_string());
			}
		}
	}

	let mut paths = Vec::new();
	for candidate_y in [y, flipped_y] {
		for candidate_ext in &exts {
			paths.push(tile_path(root, region, tile_type, layer, z, x, candidate_y, candidate_ext));
		}
	}
	paths
}

pub async fn map_tiles_mbtiles(
	State(state): State<Arc<AppState>>,
	Path((requested_region, ttype, server_name, z, x, yext)): Path<(String, String, String, u8, u32, String)>,
	headers: HeaderMap,
) -> Response<Body> {
	let Some(tile_type) = parse_tile_type(&ttype) else { return error_plain(StatusCode::BAD_REQUEST, "unknown tile type") };
	let Some((y, ext)) = split_y_ext(&yext) else { return error_plain(StatusCode::BAD_REQUEST, "malformed tile coordinate") };
	let region = resolve_region_dir(&state.root, &requested_region);
	log::debug!("handle map_tiles_mbtiles {region}/{ttype}/{server_name}/{z}/{x}/{y}.{ext}");

	let Some(SourceHandle::Local(local)) = state.registry.by_name(&server_name) else {
		return error_plain(StatusCode::NOT_FOUND, "unknown local archive source");
	};
	if local.tile_type != tile_type {
		return error_plain(StatusCode::BAD_REQUEST, "tile type does not match archive source");
	}

	let primary = local.archive.get(z, x, y).ok().flatten().filter(|d| !d.is_empty());
	let data = match primary {
		Some(data) => Some(data),
		None => local.archive.get(z, x, tms_invert(z, y)).ok().flatten().filter(|d| !d.is_empty()),
	};

	match data {
		Some(data) => tile_body_response(tile_type, &ext, data, &headers),
		None => not_found(),
	}
}

pub async fn api_config(State(state): State<Arc<AppState>>) -> Response<Body> {
	log::debug!("handle api_config");
	match serde_json::to_value(&*state.config) {
		Ok(value) => ok_json(&value, "no-cache"),
		Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
	}
}
