//! Tile coordinate math, compression/caching helpers, the configuration model,
//! and the typed error cases shared across the tilekeeper workspace.

pub mod compression;
pub mod config;
pub mod content_type;
pub mod error;
pub mod names;
pub mod types;

pub use content_type::{TileType, mime_for_extension};
pub use error::TileKeeperError;
pub use types::{BBox, TileCoord, bbox_to_tile_range, enumerate_tiles, tile_bounds, tms_invert, to_tile};
