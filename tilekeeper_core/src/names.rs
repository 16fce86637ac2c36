//! Diacritics-insensitive name normalization used to resolve region directory
//! names regardless of the Unicode form a request spells them in.

use unicode_normalization::UnicodeNormalization;

/// Normalizes a name for comparison: NFD-decompose, drop combining marks, apply a
/// small Turkish-specific character map, then lowercase.
pub fn normalize_name(name: &str) -> String {
	let decomposed: String = name.nfd().filter(|c| !is_combining_mark(*c)).collect();
	let mapped: String = decomposed.chars().map(map_domain_char).collect();
	mapped.to_lowercase().trim().to_string()
}

fn is_combining_mark(c: char) -> bool {
	matches!(c as u32, 0x0300..=0x036f)
}

fn map_domain_char(c: char) -> char {
	match c {
		'ı' | 'İ' => 'i',
		'ş' | 'Ş' => 's',
		'ğ' | 'Ğ' => 'g',
		'ç' | 'Ç' => 'c',
		'ö' | 'Ö' => 'o',
		'ü' | 'Ü' => 'u',
		other => other,
	}
}

/// Resolves `requested` against the list of actual directory entry names,
/// preferring an exact match and falling back to diacritics-insensitive
/// comparison. Returns `requested` unchanged if nothing matches, mirroring the
/// source's "return the original name" fallback.
pub fn resolve_name<'a>(requested: &'a str, entries: impl Iterator<Item = &'a str>) -> &'a str {
	let target_norm = normalize_name(requested);
	let mut fallback = requested;
	for entry in entries {
		if entry == requested {
			return entry;
		}
		if normalize_name(entry) == target_norm {
			fallback = entry;
		}
	}
	fallback
}
