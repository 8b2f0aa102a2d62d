//! Dotted path tokenization shared by the tree, the pattern parser and the bus.

/// A path split on `.`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathSegments<'a> {
    pub segments: Vec<&'a str>,
    /// The path ended in `.` (partial path).
    pub partial: bool,
}

/// Splits `path` into segments. Returns `None` for empty paths or empty
/// segments other than a single trailing one.
pub(crate) fn split_path(path: &str) -> Option<PathSegments<'_>> {
    let (body, partial) = match path.strip_suffix('.') {
        Some(body) => (body, true),
        None => (path, false),
    };
    if body.is_empty() {
        return None;
    }
    let segments: Vec<&str> = body.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(PathSegments { segments, partial })
}

/// Extracts `name` from a `[name]` alias segment.
pub(crate) fn parse_alias(segment: &str) -> Option<&str> {
    let inner = segment.strip_prefix('[')?.strip_suffix(']')?;
    if inner.is_empty() || inner.contains(['[', ']', '.']) {
        return None;
    }
    Some(inner)
}

/// True for a non-empty all-digit segment.
pub(crate) fn is_instance_number(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
