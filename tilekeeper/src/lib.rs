//! TileKeeper: concurrent acquisition of raster/vector map tiles from remote
//! HTTP sources and local SQLite archives, a deterministic on-disk layout, a
//! synchronized metadata index, and an HTTP server that serves it all back.

pub mod download;
pub mod geocode;
pub mod layout;
pub mod metadata;
pub mod orchestrator;
pub mod server;
pub mod sources;

pub use orchestrator::{Orchestrator, OrchestratorRequest};
pub use sources::{SourceHandle, SourceRegistry};
