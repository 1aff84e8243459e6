//! Access point identifier canonicalization
//!
//! The importer and the runtime lookup both key the `access_points` table
//! through `canonical_mac`. Any divergence between the two shows up as silent
//! lookup misses, so there is exactly one implementation.
//!
//! Canonical form: trimmed, lowercase, and - when the value is a 48-bit
//! address once `:`, `-` and `.` are stripped - six colon-separated octets
//! (`aa:bb:cc:dd:ee:ff`). Anything else is kept as trimmed lowercase text.

use std::fmt::Write;

const SEPARATORS: [char; 3] = [':', '-', '.'];

/// Canonical lookup key for an access point identifier
pub fn canonical_mac(raw: &str) -> String {
    let trimmed = raw.trim();
    match parse_mac(trimmed) {
        Some(octets) => format_mac(&octets),
        None => trimmed.to_ascii_lowercase(),
    }
}

/// Parse a hardware address written with or without separators
pub fn parse_mac(raw: &str) -> Option<[u8; 6]> {
    let digits: String = raw.trim().chars().filter(|c| !SEPARATORS.contains(c)).collect();
    if digits.len() != 12 {
        return None;
    }
    let mut octets = [0u8; 6];
    hex::decode_to_slice(&digits, &mut octets).ok()?;
    Some(octets)
}

/// Format six octets as lowercase colon-separated hex
pub fn format_mac(octets: &[u8; 6]) -> String {
    let mut out = String::with_capacity(17);
    for (i, b) in octets.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// True if `key` is already in canonical form
#[inline]
pub fn is_canonical(key: &str) -> bool {
    canonical_mac(key) == key
}
