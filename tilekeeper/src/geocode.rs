//! The geocoordinate lookup service (C9) is an external collaborator per
//! spec.md §1 — its internals (polygon intersection, search indexing, lazy
//! loading) are out of scope. TileKeeper consumes it through three narrow
//! operations and ships a no-op implementation sufficient for `--bbox`/
//! `--region`-driven use.

use serde_json::Value;
use tilekeeper_core::BBox;

/// Narrow contract for resolving a human-entered place name to geographic
/// data. A real resolver (search index, polygon intersection) lives outside
/// this crate; the orchestrator is generic over this trait so one can be
/// substituted without touching C8.
pub trait GeocoordinateResolver: Send + Sync {
	fn bbox_for_place(&self, name: &str) -> Option<BBox>;
	fn polygon_for_place(&self, name: &str) -> Option<Value>;
	fn suggest(&self, partial: &str, limit: usize) -> Vec<String>;
}

/// Resolves nothing. Sufficient for CLI flows driven by `--region`/`--bbox`,
/// since the interactive wizard and the real lookup backend are both out of
/// scope per spec.md §1.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGeocoordinateResolver;

impl GeocoordinateResolver for NullGeocoordinateResolver {
	fn bbox_for_place(&self, _name: &str) -> Option<BBox> {
		None
	}

	fn polygon_for_place(&self, _name: &str) -> Option<Value> {
		None
	}

	fn suggest(&self, _partial: &str, _limit: usize) -> Vec<String> {
		Vec::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn null_resolver_returns_nothing() {
		let resolver = NullGeocoordinateResolver;
		assert!(resolver.bbox_for_place("istanbul").is_none());
		assert!(resolver.polygon_for_place("istanbul").is_none());
		assert!(resolver.suggest("ist", 5).is_empty());
	}
}
