use crate::schema::{SchemaDialect, detect_schema};
use anyhow::{Context, Result, bail};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tilekeeper_core::{BBox, TileKeeperError};

/// Everything derived from an archive's `metadata` table (or configured
/// fallbacks) at open time. Immutable afterwards.
#[derive(Debug, Clone)]
pub struct ArchiveDescriptor {
	pub schema: SchemaDialect,
	pub is_tms: bool,
	pub bounds: Option<BBox>,
	pub min_zoom: Option<u8>,
	pub max_zoom: Option<u8>,
	pub raw_metadata: HashMap<String, String>,
}

/// A read-only handle on a SQLite tile archive. Opens a fresh connection per
/// operation via the pool (per spec.md §5's connection-per-operation discipline) —
/// the pool exists to recycle handles cheaply, not to hold one open across calls.
pub struct MbtilesArchive {
	path: PathBuf,
	pool: Pool<SqliteConnectionManager>,
	pub descriptor: ArchiveDescriptor,
}

impl MbtilesArchive {
	pub fn open(path: &Path) -> Result<MbtilesArchive> {
		if !path.exists() {
			bail!(TileKeeperError::ArchiveUnavailable(format!("{} does not exist", path.display())));
		}

		let manager = SqliteConnectionManager::file(path).with_flags(rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY);
		let pool = Pool::builder()
			.max_size(4)
			.build(manager)
			.with_context(|| format!("opening connection pool for {}", path.display()))?;

		let conn = pool.get().map_err(|e| TileKeeperError::ArchiveUnavailable(format!("opening {}: {e}", path.display())))?;
		// A file that exists but isn't a SQLite database opens lazily and only
		// fails once something actually reads a page — right here, on the first
		// query. spec.md §4.2 puts this under "missing or not a SQLite
		// database", the same `ArchiveUnavailable` case as a missing file, not
		// the separate `UnsupportedSchema` case (a valid database with none of
		// the three recognized table layouts).
		let schema = detect_schema(&conn)
			.map_err(|e| TileKeeperError::ArchiveUnavailable(format!("{} is not a readable SQLite database: {e}", path.display())))?
			.ok_or_else(|| TileKeeperError::UnsupportedSchema(path.display().to_string()))?;
		let raw_metadata = load_metadata_table(&conn).map_err(|e| TileKeeperError::ArchiveUnavailable(format!("{} is not a readable SQLite database: {e}", path.display())))?;
		let is_tms = raw_metadata.get("scheme").map(|s| s.eq_ignore_ascii_case("tms")).unwrap_or(false);
		let bounds = raw_metadata.get("bounds").and_then(|s| parse_bounds(s));
		let min_zoom = raw_metadata.get("minzoom").and_then(|s| s.parse().ok());
		let max_zoom = raw_metadata.get("maxzoom").and_then(|s| s.parse().ok());

		Ok(MbtilesArchive {
			path: path.to_path_buf(),
			pool,
			descriptor: ArchiveDescriptor { schema, is_tms, bounds, min_zoom, max_zoom, raw_metadata },
		})
	}

	/// Point lookup. `(x, y)` are given in XYZ; converted to the archive's stored
	/// scheme internally. Returns `None` on a tile miss, never an error.
	pub fn get(&self, z: u8, x: u32, y: u32) -> Result<Option<Vec<u8>>> {
		let conn = self.pool.get().context("acquiring archive connection")?;
		let stored_y = if self.descriptor.is_tms { tms_invert(z, y) } else { y };
		query_tile(&conn, &self.descriptor.schema, z, x, stored_y)
	}

	/// Range query: every tile within `bbox` at zoom `z`, as `(x, y, bytes)` with
	/// `(x, y)` normalized back to XYZ regardless of the archive's stored scheme.
	/// Returns an empty vector when `bbox` lies outside the declared bounds.
	pub fn extract(&self, bbox: &BBox, z: u8) -> Result<Vec<(u32, u32, Vec<u8>)>> {
		if !self.validate_bbox(bbox) {
			return Ok(Vec::new());
		}

		let (x_min, x_max, y_min, y_max) = tilekeeper_core::types::bbox_to_tile_range(bbox, z);
		let (stored_y_min, stored_y_max) = if self.descriptor.is_tms {
			// Swap both ends and convert each individually so the interval stays
			// ordered min <= max after the axis flip.
			(tms_invert(z, y_max), tms_invert(z, y_min))
		} else {
			(y_min, y_max)
		};

		let conn = self.pool.get().context("acquiring archive connection")?;
		let mut results = Vec::new();
		// spec.md §4.2: a connection error partway through a range query returns
		// whatever was accumulated so far (plus a log line), not a hard error —
		// the caller decides whether to retry, rather than losing prior rows.
		for stored_y in stored_y_min..=stored_y_max {
			for x in x_min..=x_max {
				match query_tile(&conn, &self.descriptor.schema, z, x, stored_y) {
					Ok(Some(data)) => {
						let xyz_y = if self.descriptor.is_tms { tms_invert(z, stored_y) } else { stored_y };
						results.push((x, xyz_y, data));
					}
					Ok(None) => {}
					Err(err) => {
						log::warn!("archive '{}' range query failed at z={z} x={x}: {err}; returning {} partial tile(s)", self.path.display(), results.len());
						return Ok(results);
					}
				}
			}
		}
		Ok(results)
	}

	/// `true` iff `bbox` lies within the archive's declared bounds (or bounds were
	/// never declared, in which case every bbox validates).
	pub fn validate_bbox(&self, bbox: &BBox) -> bool {
		match &self.descriptor.bounds {
			Some(declared) => declared.contains(bbox),
			None => true,
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

fn tms_invert(z: u8, y: u32) -> u32 {
	let n = 1u32 << z;
	n - 1 - y
}

fn query_tile(conn: &Connection, schema: &SchemaDialect, z: u8, x: u32, y: u32) -> Result<Option<Vec<u8>>> {
	let sql = match schema {
		SchemaDialect::Standard => {
			"SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3".to_string()
		}
		SchemaDialect::Alternate(table) => format!(
			"SELECT tile_data FROM {table} WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3"
		),
		SchemaDialect::Split => "SELECT images.tile_data FROM map JOIN images ON map.tile_id = images.tile_id \
			WHERE map.zoom_level = ?1 AND map.tile_column = ?2 AND map.tile_row = ?3"
			.to_string(),
	};
	let mut stmt = conn.prepare(&sql).context("preparing tile query")?;
	stmt.query_row([z as i64, x as i64, y as i64], |row| row.get::<_, Vec<u8>>(0))
		.optional()
		.context("querying tile")
}

fn load_metadata_table(conn: &Connection) -> Result<HashMap<String, String>> {
	let exists: bool = conn
		.query_row("SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'metadata'", [], |row| {
			row.get::<_, i64>(0)
		})
		.context("checking for metadata table")?
		> 0;
	if !exists {
		return Ok(HashMap::new());
	}
	let mut stmt = conn.prepare("SELECT name, value FROM metadata").context("preparing metadata query")?;
	let rows = stmt
		.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
		.context("querying metadata")?;
	rows.collect::<rusqlite::Result<HashMap<_, _>>>().context("collecting metadata rows")
}

fn parse_bounds(raw: &str) -> Option<BBox> {
	let parts: Vec<f64> = raw.split(',').filter_map(|s| s.trim().parse().ok()).collect();
	if parts.len() != 4 {
		return None;
	}
	BBox::new(parts[0], parts[1], parts[2], parts[3]).ok()
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	fn build_archive(path: &Path, is_tms: bool) {
		let conn = Connection::open(path).unwrap();
		conn.execute_batch(
			"CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);
			 CREATE TABLE metadata (name TEXT, value TEXT);",
		)
		.unwrap();
		conn.execute(
			"INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (5, 10, 12, ?1)",
			[b"tiledata".to_vec()],
		)
		.unwrap();
		conn.execute("INSERT INTO metadata (name, value) VALUES ('bounds', '-10,-10,10,10')", []).unwrap();
		conn.execute("INSERT INTO metadata (name, value) VALUES ('minzoom', '0')", []).unwrap();
		conn.execute("INSERT INTO metadata (name, value) VALUES ('maxzoom', '14')", []).unwrap();
		if is_tms {
			conn.execute("INSERT INTO metadata (name, value) VALUES ('scheme', 'tms')", []).unwrap();
		}
	}

	#[test]
	fn opens_and_reads_standard_archive() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("test.mbtiles");
		build_archive(&path, false);

		let archive = MbtilesArchive::open(&path).unwrap();
		assert_eq!(archive.descriptor.schema, SchemaDialect::Standard);
		assert!(!archive.descriptor.is_tms);
		assert_eq!(archive.get(5, 10, 12).unwrap(), Some(b"tiledata".to_vec()));
		assert_eq!(archive.get(5, 1, 1).unwrap(), None);
	}

	#[test]
	fn tms_archive_converts_row_on_lookup_and_extract() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("tms.mbtiles");
		// Stored at the TMS row for XYZ y=12, zoom=5 (n=32): 32-1-12=19.
		let conn = Connection::open(&path).unwrap();
		conn.execute_batch(
			"CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);
			 CREATE TABLE metadata (name TEXT, value TEXT);",
		)
		.unwrap();
		conn.execute(
			"INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (5, 10, 19, ?1)",
			[b"tmsdata".to_vec()],
		)
		.unwrap();
		conn.execute("INSERT INTO metadata (name, value) VALUES ('scheme', 'tms')", []).unwrap();
		conn.execute("INSERT INTO metadata (name, value) VALUES ('bounds', '-180,-85,180,85')", []).unwrap();
		drop(conn);

		let archive = MbtilesArchive::open(&path).unwrap();
		assert!(archive.descriptor.is_tms);
		assert_eq!(archive.get(5, 10, 12).unwrap(), Some(b"tmsdata".to_vec()));
	}

	#[test]
	fn unrecognized_schema_fails_to_open_with_unsupported_schema() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("bad.mbtiles");
		let conn = Connection::open(&path).unwrap();
		conn.execute_batch("CREATE TABLE nonsense (a INTEGER);").unwrap();
		drop(conn);

		let err = MbtilesArchive::open(&path).unwrap_err();
		assert!(err.downcast_ref::<TileKeeperError>().is_some_and(|e| matches!(e, TileKeeperError::UnsupportedSchema(_))), "{err:?}");
	}

	#[test]
	fn missing_file_fails_to_open_with_archive_unavailable() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("missing.mbtiles");
		let err = MbtilesArchive::open(&path).unwrap_err();
		assert!(err.downcast_ref::<TileKeeperError>().is_some_and(|e| matches!(e, TileKeeperError::ArchiveUnavailable(_))), "{err:?}");
	}

	#[test]
	fn non_sqlite_file_fails_to_open_with_archive_unavailable() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("garbage.mbtiles");
		std::fs::write(&path, b"this is not a sqlite database file at all").unwrap();

		let err = MbtilesArchive::open(&path).unwrap_err();
		assert!(err.downcast_ref::<TileKeeperError>().is_some_and(|e| matches!(e, TileKeeperError::ArchiveUnavailable(_))), "{err:?}");
	}
}
