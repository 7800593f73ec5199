//! Shared utility functions

/// Safely truncate a string to at most `max_bytes` while respecting UTF-8 boundaries.
///
/// If the string is already shorter than `max_bytes`, returns it unchanged.
/// Otherwise, finds the last valid UTF-8 character boundary at or before `max_bytes`
/// and returns a slice up to that point.
pub fn truncate_utf8_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Split off the longest complete UTF-8 prefix of `pending` as a String,
/// leaving an incomplete trailing multi-byte sequence (if any) in the buffer
/// for the next call.
///
/// Network chunk boundaries are arbitrary and routinely split a multi-byte
/// character; callers feed raw chunk bytes in and carry the tail across
/// calls instead of validating each chunk in isolation.
///
/// Errors only on genuinely invalid bytes, never on an incomplete tail.
pub fn drain_utf8_prefix(pending: &mut Vec<u8>) -> Result<String, std::str::Utf8Error> {
    let valid = match std::str::from_utf8(pending) {
        Ok(s) => s.len(),
        // error_len() == None marks an incomplete sequence at the end of
        // the input, not bad bytes
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(e) => return Err(e),
    };
    let tail = pending.split_off(valid);
    let prefix = std::mem::replace(pending, tail);
    // The prefix was validated above; lossy conversion cannot trigger
    Ok(String::from_utf8_lossy(&prefix).into_owned())
}

/// Decode a dash-encoded project directory name back into a path.
///
/// Session logs live under `<root>/<encoded>/<session>.jsonl` where the
/// encoded directory name is the project path with `/` replaced by `-`
/// (e.g. `-Users-alice-dev-myapp` for `/Users/alice/dev/myapp`).
/// Returns `(project_path, project_name)`.
pub fn decode_project_dir(encoded: &str) -> (String, String) {
    let path = if let Some(stripped) = encoded.strip_prefix('-') {
        format!("/{}", stripped.replace('-', "/"))
    } else {
        encoded.replace('-', "/")
    };
    let name = path
        .rsplit('/')
        .find(|seg| !seg.is_empty())
        .unwrap_or(encoded)
        .to_string();
    (path, name)
}
