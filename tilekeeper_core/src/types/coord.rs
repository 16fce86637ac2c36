//! Web Mercator (EPSG:3857) tile coordinate math: degree↔tile conversion, bbox→tile
//! range derivation, and XYZ↔TMS y-axis conversion.

use super::BBox;
use anyhow::{Result, ensure};
use std::f64::consts::PI;

/// A single tile address in the XYZ scheme: `z` is the zoom level, `x`/`y` the
/// tile grid indices with `y` counting from the top (north).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
	pub z: u8,
	pub x: u32,
	pub y: u32,
}

impl TileCoord {
	pub fn new(z: u8, x: u32, y: u32) -> Result<TileCoord> {
		ensure!(z <= 22, "zoom level ({z}) must be <= 22");
		let n = 1u32 << z;
		ensure!(x < n, "x ({x}) out of range for zoom {z}");
		ensure!(y < n, "y ({y}) out of range for zoom {z}");
		Ok(TileCoord { z, x, y })
	}

	/// Geographic bounds `[min_lon, min_lat, max_lon, max_lat]` covered by this tile.
	pub fn bounds(&self) -> BBox {
		tile_bounds(self.z, self.x, self.y)
	}

	/// Tile y-index under the TMS scheme (counts from the bottom).
	pub fn tms_y(&self) -> u32 {
		tms_invert(self.z, self.y)
	}
}

/// Converts a lat/lon (degrees) to the tile that contains it at zoom `z`.
pub fn to_tile(lat: f64, lon: f64, z: u8) -> (u32, u32) {
	let n = 2f64.powi(i32::from(z));
	let lat_rad = lat.to_radians();
	let x = ((lon + 180.0) / 360.0 * n).floor();
	let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor();
	(clamp_index(x, n), clamp_index(y, n))
}

fn clamp_index(v: f64, n: f64) -> u32 {
	if v < 0.0 {
		0
	} else if v >= n {
		(n - 1.0) as u32
	} else {
		v as u32
	}
}

/// Inverse of [`to_tile`]: the geographic bounds of tile `(z, x, y)`.
pub fn tile_bounds(z: u8, x: u32, y: u32) -> BBox {
	let n = 2f64.powi(i32::from(z));
	let lon_min = (f64::from(x) / n) * 360.0 - 180.0;
	let lon_max = (f64::from(x + 1) / n) * 360.0 - 180.0;
	let lat_at = |y_val: u32| -> f64 { (PI * (1.0 - 2.0 * f64::from(y_val) / n)).sinh().atan().to_degrees() };
	let lat_max = lat_at(y);
	let lat_min = lat_at(y + 1);
	BBox { min_lon: lon_min, min_lat: lat_min, max_lon: lon_max, max_lat: lat_max }
}

/// Tile index range `(x_min, x_max, y_min, y_max)` covering `bbox` at zoom `z`.
///
/// Note the axis inversion in `y`: geographic latitude increases north while the
/// XYZ tile grid's `y` increases south, so the bbox's minimum latitude maps to the
/// *maximum* tile row.
pub fn bbox_to_tile_range(bbox: &BBox, z: u8) -> (u32, u32, u32, u32) {
	let (x_min, y_max) = to_tile(bbox.min_lat, bbox.min_lon, z);
	let (x_max, y_min) = to_tile(bbox.max_lat, bbox.max_lon, z);
	(x_min, x_max, y_min, y_max)
}

/// Enumerates every `(z, x, y)` tile covering `bbox` for `z_min..=z_max`, ordered by
/// zoom, then `x`, then `y`.
pub fn enumerate_tiles(bbox: &BBox, z_min: u8, z_max: u8) -> Vec<(u8, u32, u32)> {
	let mut tiles = Vec::new();
	for z in z_min..=z_max {
		let (x_min, x_max, y_min, y_max) = bbox_to_tile_range(bbox, z);
		for x in x_min..=x_max {
			for y in y_min..=y_max {
				tiles.push((z, x, y));
			}
		}
	}
	tiles
}

/// Converts a tile row between the XYZ and TMS schemes; self-inverse.
pub fn tms_invert(z: u8, y: u32) -> u32 {
	let n = 1u32 << z;
	n - 1 - y
}
