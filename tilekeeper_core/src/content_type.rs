//! Extension → MIME type mapping for served tiles and static assets.

/// Whether a tile layer carries raster images or vector protobuf tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileType {
	Raster,
	Vector,
}

impl TileType {
	pub fn as_str(&self) -> &'static str {
		match self {
			TileType::Raster => "raster",
			TileType::Vector => "vector",
		}
	}

	/// The canonical file extension used when writing a newly downloaded tile.
	pub fn default_extension(&self) -> &'static str {
		match self {
			TileType::Raster => "png",
			TileType::Vector => "pbf",
		}
	}
}

/// Maps a file extension (without the leading dot) to its MIME type, falling
/// back to `application/octet-stream` for anything unrecognized.
pub fn mime_for_extension(ext: &str) -> &'static str {
	match ext.to_ascii_lowercase().as_str() {
		"pbf" | "mvt" => "application/vnd.mapbox-vector-tile",
		"png" => "image/png",
		"jpg" | "jpeg" => "image/jpeg",
		"webp" => "image/webp",
		"json" => "application/json",
		"html" | "htm" => "text/html",
		"js" => "application/javascript",
		"css" => "text/css",
		_ => "application/octet-stream",
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case("pbf", "application/vnd.mapbox-vector-tile")]
	#[case("MVT", "application/vnd.mapbox-vector-tile")]
	#[case("png", "image/png")]
	#[case("jpg", "image/jpeg")]
	#[case("JPEG", "image/jpeg")]
	#[case("json", "application/json")]
	#[case("html", "text/html")]
	#[case("xyz", "application/octet-stream")]
	fn maps_extension_to_mime(#[case] ext: &str, #[case] expected: &str) {
		assert_eq!(mime_for_extension(ext), expected);
	}

	#[test]
	fn default_extensions_match_tile_type() {
		assert_eq!(TileType::Raster.default_extension(), "png");
		assert_eq!(TileType::Vector.default_extension(), "pbf");
	}
}
