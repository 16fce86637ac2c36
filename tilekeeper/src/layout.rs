//! Filesystem layout (C5): the canonical on-disk path scheme and the
//! path-traversal guard that the tile server and download pipeline both rely on.
//!
//! ```text
//! <root>/<region>/<raster|vector>/<source_name>/<z>/<x>/<y>.<ext>
//! ```

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};
use tilekeeper_core::{TileKeeperError, TileType};

/// Builds the canonical tile path, without touching the filesystem.
pub fn tile_path(root: &Path, region: &str, tile_type: TileType, source: &str, z: u8, x: u32, y: u32, ext: &str) -> PathBuf {
	root.join(region).join(tile_type.as_str()).join(source).join(z.to_string()).join(x.to_string()).join(format!("{y}.{ext}"))
}

/// `true` when `path` exists and is a regular file with non-zero size.
pub fn file_is_nonempty(path: &Path) -> bool {
	std::fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

pub fn file_exists(path: &Path) -> bool {
	path.exists()
}

pub fn file_size(path: &Path) -> Option<u64> {
	std::fs::metadata(path).ok().map(|m| m.len())
}

/// Writes `data` to `path` atomically: write to a temp file in the same
/// directory, then rename over the destination. Creates the parent directory
/// first if it doesn't exist.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
	let parent = path.parent().context("tile path has no parent directory")?;
	std::fs::create_dir_all(parent).with_context(|| format!("creating directory {}", parent.display()))?;

	let tmp_name = format!(".{}.tmp-{}", path.file_name().and_then(|n| n.to_str()).unwrap_or("tile"), std::process::id());
	let tmp_path = parent.join(tmp_name);
	std::fs::write(&tmp_path, data).with_context(|| format!("writing temp file {}", tmp_path.display()))?;
	std::fs::rename(&tmp_path, path).with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))?;
	Ok(())
}

/// Resolves `..`/`.` components without touching the filesystem, so a
/// traversal attempt can be rejected even when the target doesn't exist.
fn lexically_normalize(path: &Path) -> PathBuf {
	let mut stack: Vec<Component<'_>> = Vec::new();
	for component in path.components() {
		match component {
			Component::ParentDir => {
				if !matches!(stack.last(), Some(Component::RootDir) | Some(Component::Prefix(_)) | None) {
					stack.pop();
				}
			}
			Component::CurDir => {}
			other => stack.push(other),
		}
	}
	stack.into_iter().collect()
}

fn make_absolute(path: &Path) -> Result<PathBuf> {
	if path.is_absolute() {
		Ok(path.to_path_buf())
	} else {
		Ok(std::env::current_dir().context("resolving current directory")?.join(path))
	}
}

/// Guards against path traversal: `path`'s lexically normalized form must lie
/// under `root`'s. Used before serving any path built from user input. Unlike
/// a `canonicalize`-based check this doesn't require the target to exist, so
/// a genuine escape attempt is distinguished (403) from a merely missing tile
/// (404) at the call site.
pub fn safe_under_root(path: &Path, root: &Path) -> Result<PathBuf> {
	let root_norm = lexically_normalize(&make_absolute(root)?);
	let path_norm = lexically_normalize(&make_absolute(path)?);
	if !path_norm.starts_with(&root_norm) {
		anyhow::bail!(TileKeeperError::PathEscape(format!("{} escapes root {}", path.display(), root.display())));
	}
	Ok(path_norm)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn tile_path_matches_canonical_scheme() {
		let root = Path::new("/data");
		let path = tile_path(root, "istanbul", TileType::Raster, "osm", 5, 10, 12, "png");
		assert_eq!(path, Path::new("/data/istanbul/raster/osm/5/10/12.png"));
	}

	#[test]
	fn write_atomic_creates_parents_and_content() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("a/b/c/5/10/12.png");
		write_atomic(&path, b"hello").unwrap();
		assert_eq!(std::fs::read(&path).unwrap(), b"hello");
		assert!(file_is_nonempty(&path));
	}

	#[test]
	fn write_atomic_leaves_no_temp_file_behind() {
		use assert_fs::prelude::*;
		use predicates::prelude::*;

		let dir = assert_fs::TempDir::new().unwrap();
		let child = dir.child("istanbul/raster/osm/5/10/12.png");
		write_atomic(child.path(), b"tiledata").unwrap();

		child.assert(predicate::path::is_file());
		assert_eq!(std::fs::read(child.path()).unwrap(), b"tiledata");

		let siblings: Vec<String> = std::fs::read_dir(child.path().parent().unwrap())
			.unwrap()
			.flatten()
			.map(|e| e.file_name().to_string_lossy().into_owned())
			.collect();
		assert!(siblings.iter().all(|name| !name.contains(".tmp-")), "leftover temp file in {siblings:?}");
	}

	#[test]
	fn safe_under_root_rejects_escape() {
		let dir = tempdir().unwrap();
		let root = dir.path().join("root");
		std::fs::create_dir_all(&root).unwrap();
		let outside = dir.path().join("outside.txt");
		std::fs::write(&outside, b"x").unwrap();
		assert!(safe_under_root(&outside, &root).is_err());
	}

	#[test]
	fn safe_under_root_accepts_nested_file() {
		let dir = tempdir().unwrap();
		let root = dir.path().join("root");
		let nested = root.join("a/b.png");
		std::fs::create_dir_all(nested.parent().unwrap()).unwrap();
		std::fs::write(&nested, b"x").unwrap();
		assert!(safe_under_root(&nested, &root).is_ok());
	}

	#[test]
	fn safe_under_root_rejects_traversal_even_when_target_is_absent() {
		let dir = tempdir().unwrap();
		let root = dir.path().join("root");
		std::fs::create_dir_all(&root).unwrap();
		// Never created on disk; a `canonicalize`-based guard would be unable
		// to tell this apart from a merely missing in-bounds tile.
		let escaping = root.join("../../../../../../etc/passwd");
		assert!(safe_under_root(&escaping, &root).is_err());
	}

	#[test]
	fn file_is_nonempty_false_for_missing_or_empty() {
		let dir = tempdir().unwrap();
		let missing = dir.path().join("missing.png");
		assert!(!file_is_nonempty(&missing));

		let empty = dir.path().join("empty.png");
		std::fs::write(&empty, b"").unwrap();
		assert!(!file_is_nonempty(&empty));
	}
}
