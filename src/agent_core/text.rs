//! UTF-8 safe string bounding for payloads sent to the model.

/// Truncate a string to at most `max_bytes` bytes on a valid UTF-8 char boundary.
///
/// If the byte at `max_bytes` is inside a multi-byte character, the slice is
/// shortened to the preceding character boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Bound captured tool output, noting how much was cut.
pub(crate) fn cap_output(s: &str, max_bytes: usize) -> String {
    let kept = truncate_utf8(s, max_bytes);
    if kept.len() == s.len() {
        return s.to_string();
    }
    format!("{kept}\n[truncated {} bytes]", s.len() - kept.len())
}
