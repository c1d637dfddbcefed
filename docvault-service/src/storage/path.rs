//! Storage path allocation.

use crate::error::StorageError;

/// Object key for a document payload: `owner_id/document_id/file_name`.
///
/// Document ids are unique, so keys never collide across documents. The
/// same document and name always map to the same key, which lets a
/// re-upload overwrite in place.
pub fn allocate(owner_id: &str, document_id: &str, file_name: &str) -> String {
    format!(
        "{}/{}/{}",
        sanitize_segment(owner_id),
        sanitize_segment(document_id),
        sanitize_segment(file_name)
    )
}

/// Make a value safe to use as one key segment
fn sanitize_segment(s: &str) -> String {
    let cleaned: String = s
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            _ => c,
        })
        .collect();

    match cleaned.as_str() {
        "" => "_".to_string(),
        "." | ".." => cleaned.replace('.', "_"),
        _ => cleaned,
    }
}

/// Split a key into path segments, rejecting anything that could escape the
/// store root.
pub fn segments(key: &str) -> Result<Vec<&str>, StorageError> {
    let parts: Vec<&str> = key.split('/').collect();
    let valid = !parts.is_empty()
        && parts
            .iter()
            .all(|p| !p.is_empty() && *p != "." && *p != ".." && !p.contains('\\'));
    if valid {
        Ok(parts)
    } else {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
        })
    }
}
