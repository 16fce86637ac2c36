//! CORS layer for the tile server. Grounded in the teacher's
//! `versatiles/src/server/cors.rs` predicate-based `CorsLayer` construction,
//! simplified: every response advertises the same fixed policy per
//! spec.md §4.7, there is no per-origin configuration surface to build a
//! predicate from.

use axum::http::{Method, header};
use tower_http::cors::{Any, CorsLayer};

/// `Access-Control-Allow-Origin: *`, `Methods: GET, POST, OPTIONS`,
/// `Headers: Content-Type, Accept`. `OPTIONS` is handled by the layer itself.
pub fn build_cors_layer() -> CorsLayer {
	CorsLayer::new()
		.allow_origin(Any)
		.allow_methods([Method::GET, Method::POST, Method::OPTIONS])
		.allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}
