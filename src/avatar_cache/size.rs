//! Requested avatar size handling

use super::{MAX_SIZE, MIN_SIZE};

/// Named size tokens collaborators may pass instead of `WxH`
const NAMED_SIZES: [(&str, &str); 4] = [
    ("icon-sm", "16x16"),
    ("icon-md", "24x24"),
    ("icon-lg", "32x32"),
    ("icon-xlg", "48x48"),
];

/// Clamp a size into the range avatars are served at
pub fn clamp_size(size: i64) -> u32 {
    size.clamp(i64::from(MIN_SIZE), i64::from(MAX_SIZE)) as u32
}

/// Map a named size token to its `WxH` form, passing anything else through
pub fn normalize_size_token(size: &str) -> &str {
    let trimmed = size.trim();
    NAMED_SIZES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(trimmed))
        .map(|(_, dims)| *dims)
        .unwrap_or(trimmed)
}

/// Parse a `size` query value into a square edge length.
///
/// Accepts `NxM`, a bare number or a named token. Only the number before the
/// first `x` counts. Anything unparsable falls back to `default`, and the
/// result is always clamped to `[MIN_SIZE, MAX_SIZE]`.
pub fn parse_size(raw: Option<&str>, default: u32) -> u32 {
    let parsed = raw
        .map(normalize_size_token)
        .filter(|s| !s.is_empty())
        .and_then(|s| {
            let first = s.split(['x', 'X']).next().unwrap_or(s);
            first.trim().parse::<i64>().ok()
        });
    clamp_size(parsed.unwrap_or(i64::from(default)))
}
