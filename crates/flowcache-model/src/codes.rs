//! Fixed-width geographic identifier handling.
//!
//! County GEOIDs are five digits (two-digit state prefix + three-digit county
//! suffix), state FIPS codes are two digits. Origin codes are either numeric
//! state FIPS (sometimes zero-padded to three digits in the source data) or
//! one of a small closed set of non-US region codes (`ASI`, `EUR`, ...),
//! which pass through normalization unchanged.

/// True if every character is an ASCII digit (and the string is non-empty).
pub fn is_numeric_code(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Normalize a county GEOID: trim and left-pad to five digits.
///
/// Empty input yields `None`; non-numeric input passes through trimmed (the
/// caller decides whether that is acceptable in context).
pub fn normalize_county(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    Some(left_pad(s, 5))
}

/// Normalize a state code: numeric input keeps its last two digits,
/// left-padded to two (`"001"` → `"01"`); region codes pass through.
pub fn normalize_state(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if is_numeric_code(s) {
        let tail = &s[s.len().saturating_sub(2)..];
        return Some(left_pad(tail, 2));
    }
    Some(s.to_string())
}

/// Left-pad a county suffix to three digits.
pub fn pad_county_suffix(raw: &str) -> String {
    left_pad(raw.trim(), 3)
}

/// Partition key for an origin code.
///
/// The source data writes numeric origin states as three-digit strings
/// (`"048"` for Texas); origin partitions keep that formatting so artifact
/// keys stay stable against the raw data. Region codes pass through.
pub fn origin_partition_key(code: &str) -> String {
    let s = code.trim();
    if is_numeric_code(s) {
        return left_pad(s, 3);
    }
    s.to_string()
}

/// Split a five-digit county GEOID into (state prefix, county suffix).
///
/// Returns `None` unless the input is exactly five ASCII digits.
pub fn split_geoid(geoid: &str) -> Option<(&str, &str)> {
    if geoid.len() == 5 && is_numeric_code(geoid) {
        Some((&geoid[..2], &geoid[2..]))
    } else {
        None
    }
}

fn left_pad(s: &str, width: usize) -> String {
    if s.len() >= width {
        return s.to_string();
    }
    let mut out = String::with_capacity(width);
    for _ in 0..(width - s.len()) {
        out.push('0');
    }
    out.push_str(s);
    out
}
