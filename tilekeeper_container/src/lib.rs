//! Read-only adapter over SQLite-backed tile archives (the "mbtiles" family):
//! the standard `tiles` table, the split `map`/`images` layout, and archives that
//! carry the standard columns under an alternate table name.

mod archive;
mod schema;

pub use archive::{ArchiveDescriptor, MbtilesArchive};
pub use schema::SchemaDialect;
