//! Tile server (C7) lifecycle: builds the router, applies the cross-cutting
//! middleware stack, and owns the listening task. Grounded in the teacher's
//! `versatiles/src/server/tile_server.rs` — same layer composition and
//! idempotent start/stop contract, serving a filesystem/metadata-backed tile
//! tree instead of an in-memory container registry.

mod cors;
mod handlers;

use crate::metadata::MetadataStore;
use crate::sources::SourceRegistry;
use anyhow::{Context, Result};
use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{BoxError, Router};
use dashmap::DashMap;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tilekeeper_core::config::Config;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::{ServiceBuilder, buffer::BufferLayer, limit::ConcurrencyLimitLayer, load_shed::LoadShedLayer, timeout::TimeoutLayer};
use tower_http::catch_panic::CatchPanicLayer;

struct CachedJson {
	value: Value,
	at: Instant,
}

/// Shared, read-mostly state handed to every request handler.
pub struct AppState {
	root: PathBuf,
	config: Arc<Config>,
	registry: Arc<SourceRegistry>,
	metadata: Arc<MetadataStore>,
	extent_cache: DashMap<String, CachedJson>,
	index_cache: DashMap<String, CachedJson>,
}

impl AppState {
	pub fn new(root: PathBuf, config: Arc<Config>, registry: Arc<SourceRegistry>, metadata: Arc<MetadataStore>) -> AppState {
		AppState { root, config, registry, metadata, extent_cache: DashMap::new(), index_cache: DashMap::new() }
	}
}

/// Builds the router and layers the CORS and protection stack over it. Split
/// out from [`TileKeeperServer`] so tests can exercise it with `oneshot`
/// without binding a socket.
pub fn build_router(state: Arc<AppState>) -> Router {
	let router = Router::new()
		.route("/", get(handlers::index))
		.route("/favicon.ico", get(handlers::favicon))
		.route("/list_regions", get(handlers::list_regions))
		.route("/region_map_styles/{region}", get(handlers::region_map_styles))
		.route("/tile_extents/{region}/{ttype}/{layer}", get(handlers::tile_extents))
		.route("/tile_index/{region}/{ttype}/{layer}/{z}", get(handlers::tile_index))
		.route("/inspect_mbtiles", get(handlers::inspect_mbtiles))
		.route("/map_tiles/{region}/{ttype}/{server}/mbtiles_tile/{z}/{x}/{yext}", get(handlers::map_tiles_mbtiles))
		.route("/map_tiles/{region}/{ttype}/{layer}/{z}/{x}/{yext}", get(handlers::map_tiles_static))
		.route("/api/config", get(handlers::api_config))
		.route("/src/config.json", get(handlers::api_config))
		.with_state(state);

	let router = router.layer(ServiceBuilder::new().layer(cors::build_cors_layer()));

	// Global backpressure & protection layers, innermost to outermost:
	//   LoadShed -> ConcurrencyLimit -> Buffer -> Timeout -> CatchPanic -> HandleError
	// `HandleErrorLayer` sits outermost so Axum only ever observes `Infallible`.
	let overload_handler = HandleErrorLayer::new(|_err: BoxError| async move {
		let mut resp = (StatusCode::SERVICE_UNAVAILABLE, "Service overloaded, try later").into_response();
		resp.headers_mut().insert("Retry-After", "2".parse().unwrap());
		Ok::<_, std::convert::Infallible>(resp)
	});

	let protection = ServiceBuilder::new()
		.layer(overload_handler)
		.layer(CatchPanicLayer::new())
		.layer(TimeoutLayer::new(std::time::Duration::from_secs(60)))
		.layer(BufferLayer::new(512))
		.layer(ConcurrencyLimitLayer::new(256))
		.layer(LoadShedLayer::new());

	router.layer(protection)
}

/// `true` for the fixed set of client-abort error signatures spec.md §4.7 and
/// §7 say must never surface as genuine faults: "connection reset", "broken
/// pipe", "aborted". Matched against the error's full `Display` chain since
/// these show up wrapped inside an io::Error inside a hyper/axum error.
fn is_client_abort(err: &std::io::Error) -> bool {
	let text = err.to_string().to_lowercase();
	["connection reset", "broken pipe", "aborted"].iter().any(|sig| text.contains(sig))
}

/// Thin orchestration layer mirroring the teacher's `TileServer`: owns
/// configuration, builds the router once, and manages the listening task's
/// lifecycle. Idempotent start/stop, graceful shutdown.
pub struct TileKeeperServer {
	ip: String,
	port: u16,
	state: Arc<AppState>,
	exit_signal: Option<oneshot::Sender<()>>,
	join: Option<tokio::task::JoinHandle<()>>,
}

impl TileKeeperServer {
	pub fn new(ip: impl Into<String>, port: u16, root: PathBuf, config: Arc<Config>, registry: Arc<SourceRegistry>, metadata: Arc<MetadataStore>) -> TileKeeperServer {
		TileKeeperServer { ip: ip.into(), port, state: Arc::new(AppState::new(root, config, registry, metadata)), exit_signal: None, join: None }
	}

	pub fn get_port(&self) -> u16 {
		self.port
	}

	/// Starts listening. Idempotent: stops any previous instance first.
	pub async fn start(&mut self) -> Result<()> {
		if self.exit_signal.is_some() || self.join.is_some() {
			self.stop().await;
		}

		log::info!("starting tile server");
		let router = build_router(Arc::clone(&self.state));

		let addr = format!("{}:{}", self.ip, self.port);
		let listener = TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
		if self.port == 0 {
			self.port = listener.local_addr()?.port();
		}
		log::info!("tile server listening on {}:{}", self.ip, self.port);

		let (tx, rx) = oneshot::channel::<()>();
		let handle = tokio::spawn(async move {
			if let Err(err) = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(async { rx.await.ok(); }).await {
				if is_client_abort(&err) {
					log::debug!("tile server connection dropped by client: {err}");
				} else {
					log::error!("tile server task exited with error: {err}");
				}
			}
		});

		self.exit_signal = Some(tx);
		self.join = Some(handle);
		Ok(())
	}

	/// Triggers graceful shutdown and waits for the serving task, with a
	/// bounded timeout so a stuck task never hangs the caller.
	pub async fn stop(&mut self) {
		if self.exit_signal.is_none() && self.join.is_none() {
			return;
		}
		log::info!("stopping tile server");
		if let Some(tx) = self.exit_signal.take() {
			let _ = tx.send(());
		}
		if let Some(handle) = self.join.take() {
			match tokio::time::timeout(std::time::Duration::from_secs(10), handle).await {
				Ok(join_result) => {
					if let Err(err) = join_result {
						log::warn!("tile server task join error: {err}");
					}
				}
				Err(_) => log::warn!("tile server task did not shut down within timeout; continuing"),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::body::Body;
	use axum::http::Request;
	use tempfile::tempdir;
	use tower::ServiceExt;

	fn empty_config() -> Arc<Config> {
		Arc::new(Config::from_str(r#"{"regions":{},"servers":[],"output_dir":"tiles","max_workers_per_server":1,"retry_attempts":1,"timeout":1}"#).unwrap())
	}

	#[tokio::test]
	async fn list_regions_is_empty_json_array_with_no_tiles() {
		let dir = tempdir().unwrap();
		let config = empty_config();
		let registry = Arc::new(SourceRegistry::from_config(&config).unwrap());
		let metadata = Arc::new(MetadataStore::new(dir.path(), Arc::clone(&config)));
		let state = Arc::new(AppState::new(dir.path().to_path_buf(), config, registry, metadata));
		let app = build_router(state);

		let req = Request::builder().uri("/list_regions").body(Body::empty()).unwrap();
		let resp = app.oneshot(req).await.unwrap();
		assert_eq!(resp.status(), StatusCode::OK);
		let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
		assert_eq!(bytes.as_ref(), b"[]");
	}

	#[tokio::test]
	async fn favicon_returns_no_content() {
		let dir = tempdir().unwrap();
		let config = empty_config();
		let registry = Arc::new(SourceRegistry::from_config(&config).unwrap());
		let metadata = Arc::new(MetadataStore::new(dir.path(), Arc::clone(&config)));
		let state = Arc::new(AppState::new(dir.path().to_path_buf(), config, registry, metadata));
		let app = build_router(state);

		let req = Request::builder().uri("/favicon.ico").body(Body::empty()).unwrap();
		let resp = app.oneshot(req).await.unwrap();
		assert_eq!(resp.status(), StatusCode::NO_CONTENT);
	}

	#[tokio::test]
	async fn map_tiles_static_serves_written_tile_and_supports_conditional_get() {
		let dir = tempdir().unwrap();
		let path = crate::layout::tile_path(dir.path(), "istanbul", tilekeeper_core::TileType::Vector, "osm", 5, 10, 12, "pbf");
		crate::layout::write_atomic(&path, b"not compressed pbf bytes").unwrap();

		let config = empty_config();
		let registry = Arc::new(SourceRegistry::from_config(&config).unwrap());
		let metadata = Arc::new(MetadataStore::new(dir.path(), Arc::clone(&config)));
		let state = Arc::new(AppState::new(dir.path().to_path_buf(), config, registry, metadata));
		let app = build_router(state);

		let req = Request::builder().uri("/map_tiles/istanbul/vector/osm/5/10/12.pbf").body(Body::empty()).unwrap();
		let resp = app.clone().oneshot(req).await.unwrap();
		assert_eq!(resp.status(), StatusCode::OK);
		assert_eq!(resp.headers().get(axum::http::header::CONTENT_ENCODING).unwrap(), "gzip");
		let etag = resp.headers().get(axum::http::header::ETAG).unwrap().to_str().unwrap().to_string();

		let req2 = Request::builder().uri("/map_tiles/istanbul/vector/osm/5/10/12.pbf").header(axum::http::header::IF_NONE_MATCH, etag).body(Body::empty()).unwrap();
		let resp2 = app.oneshot(req2).await.unwrap();
		assert_eq!(resp2.status(), StatusCode::NOT_MODIFIED);
	}

	#[tokio::test]
	async fn diacritics_insensitive_region_resolution() {
		let dir = tempdir().unwrap();
		let path = crate::layout::tile_path(dir.path(), "istanbul", tilekeeper_core::TileType::Raster, "osm", 5, 10, 12, "png");
		crate::layout::write_atomic(&path, b"png-bytes").unwrap();

		let config = empty_config();
		let registry = Arc::new(SourceRegistry::from_config(&config).unwrap());
		let metadata = Arc::new(MetadataStore::new(dir.path(), Arc::clone(&config)));
		let state = Arc::new(AppState::new(dir.path().to_path_buf(), config, registry, metadata));
		let app = build_router(state);

		let req = Request::builder().uri("/region_map_styles/%C4%B0stanbul").body(Body::empty()).unwrap();
		let resp = app.oneshot(req).await.unwrap();
		assert_eq!(resp.status(), StatusCode::OK);
		let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
		let value: Value = serde_json::from_slice(&bytes).unwrap();
		assert!(value["raster"]["osm"].is_object());
	}

	#[tokio::test]
	async fn map_tiles_static_rejects_path_traversal_in_layer_segment() {
		let dir = tempdir().unwrap();
		let secret = dir.path().join("secret.txt");
		std::fs::write(&secret, b"do not serve me").unwrap();

		let config = empty_config();
		let registry = Arc::new(SourceRegistry::from_config(&config).unwrap());
		let metadata = Arc::new(MetadataStore::new(dir.path(), Arc::clone(&config)));
		let state = Arc::new(AppState::new(dir.path().to_path_buf(), config, registry, metadata));
		let app = build_router(state);

		// `%2F` decodes to a literal slash inside the `{layer}` segment. Enough
		// `..` hops climb past both the fixed route levels (region, type) and
		// the temp directory's own absolute prefix, landing outside `root`.
		let traversal = "..%2F".repeat(10) + "secret";
		let req = Request::builder()
			.uri(format!("/map_tiles/istanbul/raster/{traversal}/5/10/12.txt"))
			.body(Body::empty())
			.unwrap();
		let resp = app.oneshot(req).await.unwrap();
		assert_eq!(resp.status(), StatusCode::FORBIDDEN);
	}
}
