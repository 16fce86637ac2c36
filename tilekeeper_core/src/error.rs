//! The typed error cases call sites need to branch on. Everything else flows
//! through `anyhow::Error` with `.context(...)` at the point it's raised, matching
//! the rest of the workspace's error-handling style.

use std::fmt;

#[derive(Debug)]
pub enum TileKeeperError {
	/// Configuration file missing, malformed, or missing a required key.
	Configuration(String),
	/// A local archive file is missing or not a readable SQLite database.
	ArchiveUnavailable(String),
	/// A local archive was opened but none of the three recognized table
	/// layouts were found.
	UnsupportedSchema(String),
	/// A resolved filesystem path escaped its configured root.
	PathEscape(String),
}

impl fmt::Display for TileKeeperError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TileKeeperError::Configuration(msg) => write!(f, "configuration error: {msg}"),
			TileKeeperError::ArchiveUnavailable(msg) => write!(f, "archive unavailable: {msg}"),
			TileKeeperError::UnsupportedSchema(msg) => write!(f, "unsupported archive schema: {msg}"),
			TileKeeperError::PathEscape(msg) => write!(f, "path escapes root: {msg}"),
		}
	}
}

impl std::error::Error for TileKeeperError {}
