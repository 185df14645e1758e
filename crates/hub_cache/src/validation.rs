//! Validation of externally supplied path components.
//!
//! Every `etag`, `revision`, `filename`, ref name and repository id half that
//! reaches a mutating cache operation passes through exactly one of the two
//! validators in this module before any filesystem I/O happens. Lookup
//! operations use the same validators but report failures as a cache miss.

/// Describes why a path component was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ComponentError {
    /// The component is empty.
    #[error("must not be empty")]
    Empty,

    /// The component contains a NUL byte.
    #[error("must not contain a NUL byte")]
    NulByte,

    /// The component contains a backslash.
    #[error("must not contain a backslash")]
    Backslash,

    /// A single-segment component contains a forward slash.
    #[error("must not contain a path separator")]
    Separator,

    /// A multi-segment component starts with a forward slash.
    #[error("must not be an absolute path")]
    Absolute,

    /// A multi-segment component contains an empty segment (consecutive or
    /// trailing slashes).
    #[error("must not contain an empty path segment")]
    EmptySegment,

    /// The component contains a `.` or `..` path segment.
    #[error("must not contain a '.' or '..' path segment")]
    Traversal,
}

/// Validates a value used as a single path component: an etag (after
/// normalization), a revision, or one half of a repository id.
pub(crate) fn validate_single_segment(value: &str) -> Result<(), ComponentError> {
    if value.is_empty() {
        return Err(ComponentError::Empty);
    }
    if value.contains('\0') {
        return Err(ComponentError::NulByte);
    }
    if value.contains('\\') {
        return Err(ComponentError::Backslash);
    }
    if value.contains('/') {
        return Err(ComponentError::Separator);
    }
    if value == "." || value == ".." {
        return Err(ComponentError::Traversal);
    }
    Ok(())
}

/// Validates a value that may span multiple path segments: a filename inside
/// a repository (e.g. `tokenizer/vocab.json`) or a ref name (e.g.
/// `refs/pr/5`).
pub(crate) fn validate_relative_path(value: &str) -> Result<(), ComponentError> {
    if value.is_empty() {
        return Err(ComponentError::Empty);
    }
    if value.contains('\0') {
        return Err(ComponentError::NulByte);
    }
    if value.contains('\\') {
        return Err(ComponentError::Backslash);
    }
    if value.starts_with('/') {
        return Err(ComponentError::Absolute);
    }
    for segment in value.split('/') {
        if segment.is_empty() {
            return Err(ComponentError::EmptySegment);
        }
        if segment == "." || segment == ".." {
            return Err(ComponentError::Traversal);
        }
    }
    Ok(())
}
