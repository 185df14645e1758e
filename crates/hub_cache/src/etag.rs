//! Normalization of HTTP validator tokens.

/// Strips the weak-validator marker and surrounding quotes from an HTTP-style
/// `ETag` value, returning the bare token used as a blob's file name.
///
/// `W/"abc"` and `"abc"` both normalize to `abc`; a token without marker or
/// quotes passes through unchanged. This function never fails.
pub fn normalize_etag(raw: &str) -> &str {
    let token = raw.strip_prefix("W/").unwrap_or(raw);
    token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token)
}
