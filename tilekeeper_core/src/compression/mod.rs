//! Vector tile transport-encoding detection and normalization to gzip, plus the
//! weak-ETag hashing used by the tile server's conditional-GET support.

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::GzEncoder;
use md5::{Digest, Md5};
use std::io::{Read, Write};

/// The on-disk/transport encoding detected from a vector tile's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFormat {
	Gzip,
	Zlib,
	Raw,
}

impl DetectedFormat {
	pub fn as_str(&self) -> &'static str {
		match self {
			DetectedFormat::Gzip => "gzip",
			DetectedFormat::Zlib => "zlib",
			DetectedFormat::Raw => "raw",
		}
	}
}

/// Inspects magic bytes to classify how a vector tile is currently encoded.
pub fn detect_format(data: &[u8]) -> DetectedFormat {
	if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
		return DetectedFormat::Gzip;
	}
	if data.len() >= 2 && data[0] == 0x78 && matches!(data[1], 0x01 | 0x9c | 0xda) {
		return DetectedFormat::Zlib;
	}
	DetectedFormat::Raw
}

/// Normalizes arbitrary vector tile bytes to gzip, returning the bytes to serve and
/// the format that was detected prior to normalization (for the advisory
/// `X-Tile-Detected-Format` response header).
pub fn normalize_to_gzip(data: &[u8]) -> Result<(Vec<u8>, DetectedFormat)> {
	let detected = detect_format(data);
	let out = match detected {
		DetectedFormat::Gzip => data.to_vec(),
		DetectedFormat::Zlib => {
			let mut raw = Vec::new();
			ZlibDecoder::new(data).read_to_end(&mut raw).context("inflating zlib-encoded tile")?;
			gzip_compress(&raw)?
		}
		DetectedFormat::Raw => gzip_compress(data)?,
	};
	Ok((out, detected))
}

fn gzip_compress(data: &[u8]) -> Result<Vec<u8>> {
	let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
	encoder.write_all(data).context("gzip-encoding tile body")?;
	encoder.finish().context("finalizing gzip stream")
}

/// Weak ETag value (MD5 hex digest) for a response body, matching the server's
/// conditional-GET contract.
pub fn weak_etag(data: &[u8]) -> String {
	let mut hasher = Md5::new();
	hasher.update(data);
	format!("{:x}", hasher.finalize())
}

/// `true` when an incoming `If-None-Match` header value matches `etag`, accepting
/// the weak (`W/"..."`), strong (`"..."`), and bare forms.
pub fn if_none_match_hits(if_none_match: &str, etag: &str) -> bool {
	let candidate = if_none_match.trim();
	candidate == format!("W/\"{etag}\"") || candidate == format!("\"{etag}\"") || candidate == etag
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[test]
	fn detects_gzip_magic() {
		let gz = gzip_compress(b"hello").unwrap();
		assert_eq!(detect_format(&gz), DetectedFormat::Gzip);
	}

	#[rstest]
	#[case(&[0x1f, 0x8b, 0x08, 0x00], DetectedFormat::Gzip)]
	#[case(&[0x78, 0x01, 0x00], DetectedFormat::Zlib)]
	#[case(&[0x78, 0x9c, 0x00], DetectedFormat::Zlib)]
	#[case(&[0x78, 0xda, 0x00], DetectedFormat::Zlib)]
	#[case(&[0x1a, 0x2b, 0x3c], DetectedFormat::Raw)]
	#[case(&[], DetectedFormat::Raw)]
	fn detect_format_classifies_magic_bytes(#[case] data: &[u8], #[case] expected: DetectedFormat) {
		assert_eq!(detect_format(data), expected);
	}

	#[test]
	fn raw_bytes_are_normalized_to_gzip_and_decompress_to_original() {
		let raw = b"not compressed pbf bytes";
		let (normalized, detected) = normalize_to_gzip(raw).unwrap();
		assert_eq!(detected, DetectedFormat::Raw);
		let mut decoded = Vec::new();
		GzDecoder::new(normalized.as_slice()).read_to_end(&mut decoded).unwrap();
		assert_eq!(decoded, raw);
	}

	#[test]
	fn gzip_passthrough_is_unchanged() {
		let gz = gzip_compress(b"already gzipped").unwrap();
		let (normalized, detected) = normalize_to_gzip(&gz).unwrap();
		assert_eq!(detected, DetectedFormat::Gzip);
		assert_eq!(normalized, gz);
	}

	#[test]
	fn if_none_match_accepts_weak_and_strong_forms() {
		let etag = weak_etag(b"payload");
		assert!(if_none_match_hits(&format!("W/\"{etag}\""), &etag));
		assert!(if_none_match_hits(&format!("\"{etag}\""), &etag));
		assert!(!if_none_match_hits("W/\"deadbeef\"", &etag));
	}
}
