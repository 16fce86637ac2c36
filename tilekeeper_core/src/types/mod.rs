mod bbox;
mod coord;

pub use bbox::BBox;
pub use coord::{TileCoord, bbox_to_tile_range, enumerate_tiles, tile_bounds, tms_invert, to_tile};
