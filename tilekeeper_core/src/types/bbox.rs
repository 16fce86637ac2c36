use anyhow::{Result, ensure};

/// Axis-aligned geographic rectangle in degrees: `[min_lon, min_lat, max_lon, max_lat]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
	pub min_lon: f64,
	pub min_lat: f64,
	pub max_lon: f64,
	pub max_lat: f64,
}

impl BBox {
	pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<BBox> {
		ensure!(min_lon <= max_lon, "min_lon ({min_lon}) must be <= max_lon ({max_lon})");
		ensure!(min_lat <= max_lat, "min_lat ({min_lat}) must be <= max_lat ({max_lat})");
		Ok(BBox { min_lon, min_lat, max_lon, max_lat })
	}

	pub fn as_array(&self) -> [f64; 4] {
		[self.min_lon, self.min_lat, self.max_lon, self.max_lat]
	}

	pub fn center(&self) -> [f64; 2] {
		[(self.min_lon + self.max_lon) / 2.0, (self.min_lat + self.max_lat) / 2.0]
	}

	pub fn default_unset() -> BBox {
		// Matches the Python fallback default used when no bbox is known for a region.
		BBox { min_lon: 0.0, min_lat: 0.0, max_lon: 1.0, max_lat: 1.0 }
	}

	pub fn contains(&self, other: &BBox) -> bool {
		self.min_lon <= other.min_lon
			&& self.min_lat <= other.min_lat
			&& self.max_lon >= other.max_lon
			&& self.max_lat >= other.max_lat
	}
}
