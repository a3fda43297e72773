/// Utility helpers shared by the worker and the mothership.
///
/// This module contains:
/// - Link canonicalization
/// - Time helpers
///
/// IMPORTANT:
/// - No site-specific parsing logic should live here.
/// - This module must remain lightweight and deterministic.
///

use std::time::{SystemTime, UNIX_EPOCH};

/// Canonicalize a link before any frontier / visited-set lookup.
///
/// Rules:
/// - Surrounding whitespace is trimmed
/// - A `#fragment` suffix is removed (same document)
///
/// Everything else is compared byte-for-byte.
///
/// Examples:
/// - " https://a.test/x#top " -> "https://a.test/x"
/// - "https://a.test/x/"      -> "https://a.test/x/"   (trailing slash kept)
/// - "link1"                  -> "link1"
///
/// DESIGN NOTES:
/// - Scheme, host case, trailing slashes and query parameters are NOT
///   normalized: two links differing only there are distinct pages.
///
pub fn canonical_link(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.split_once('#') {
        Some((head, _fragment)) => head.to_string(),
        None => trimmed.to_string(),
    }
}

/// Returns the current Unix timestamp in milliseconds.
///
/// Used for:
/// - Frame timestamps (`sent_at`)
///
/// PANIC:
/// - Panics if system time is before UNIX_EPOCH (should never happen).
///
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time is before UNIX_EPOCH")
        .as_millis() as i64
}
