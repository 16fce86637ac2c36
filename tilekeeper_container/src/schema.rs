use rusqlite::Connection;

/// Which of the three recognized table layouts an archive uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDialect {
	/// `tiles(zoom_level, tile_column, tile_row, tile_data)`.
	Standard,
	/// `map(zoom_level, tile_column, tile_row, tile_id)` joined to `images(tile_id, tile_data)`.
	Split,
	/// Same columns as `Standard` but under a different table name (e.g. `omtm`).
	Alternate(String),
}

const STANDARD_COLUMNS: [&str; 4] = ["zoom_level", "tile_column", "tile_row", "tile_data"];

/// Inspects `sqlite_master` to classify the archive's table layout.
pub fn detect_schema(conn: &Connection) -> rusqlite::Result<Option<SchemaDialect>> {
	let table_names = list_tables(conn)?;

	if table_names.iter().any(|t| t == "tiles") && has_standard_columns(conn, "tiles")? {
		return Ok(Some(SchemaDialect::Standard));
	}

	if table_names.iter().any(|t| t == "map") && table_names.iter().any(|t| t == "images") {
		return Ok(Some(SchemaDialect::Split));
	}

	for table in &table_names {
		if table == "tiles" || table == "map" || table == "images" || table == "metadata" {
			continue;
		}
		if has_standard_columns(conn, table)? {
			return Ok(Some(SchemaDialect::Alternate(table.clone())));
		}
	}

	Ok(None)
}

fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
	let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
	let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
	rows.collect()
}

fn has_standard_columns(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
	let sql = format!("PRAGMA table_info({table})");
	let mut stmt = conn.prepare(&sql)?;
	let columns: Vec<String> = stmt.query_map([], |row| row.get::<_, String>(1))?.collect::<Result<_, _>>()?;
	Ok(STANDARD_COLUMNS.iter().all(|c| columns.iter().any(|col| col.eq_ignore_ascii_case(c))))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn conn_with_sql(sql: &str) -> Connection {
		let conn = Connection::open_in_memory().unwrap();
		conn.execute_batch(sql).unwrap();
		conn
	}

	#[test]
	fn detects_standard_schema() {
		let conn = conn_with_sql(
			"CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);",
		);
		assert_eq!(detect_schema(&conn).unwrap(), Some(SchemaDialect::Standard));
	}

	#[test]
	fn detects_split_schema() {
		let conn = conn_with_sql(
			"CREATE TABLE map (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_id TEXT);
			 CREATE TABLE images (tile_id TEXT, tile_data BLOB);",
		);
		assert_eq!(detect_schema(&conn).unwrap(), Some(SchemaDialect::Split));
	}

	#[test]
	fn detects_alternate_schema() {
		let conn = conn_with_sql(
			"CREATE TABLE omtm (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);",
		);
		assert_eq!(detect_schema(&conn).unwrap(), Some(SchemaDialect::Alternate("omtm".into())));
	}

	#[test]
	fn returns_none_for_unrecognized_layout() {
		let conn = conn_with_sql("CREATE TABLE nonsense (a INTEGER);");
		assert_eq!(detect_schema(&conn).unwrap(), None);
	}
}
