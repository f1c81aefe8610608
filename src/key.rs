//! Cache key derivation
//!
//! Maps a source URI (remote URL or local path) to a stable, filesystem-safe
//! token used to name on-disk artifacts and index the metadata map.

/// Characters allowed verbatim in a cache key.
fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Derive a cache key from a source URI.
///
/// Prefers the last path segment with any query string stripped. If that
/// segment is empty or contains unsafe characters, falls back to the whole
/// URI with unsafe characters replaced by `_`, capped at 50 characters to
/// keep filenames portable.
///
/// Known limitation: two distinct URIs whose final segments match (e.g. the
/// same filename hosted at two locations) map to the same key and are treated
/// as the same cache entry.
pub fn cache_key(source_uri: &str) -> String {
    let segment = source_uri
        .rsplit('/')
        .next()
        .unwrap_or("")
        .split('?')
        .next()
        .unwrap_or("");

    // Reject dot-only segments so a key can never walk out of the cache dir
    if !segment.is_empty()
        && segment.chars().all(is_safe)
        && !segment.chars().all(|c| c == '.')
    {
        return segment.to_string();
    }

    source_uri
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(50)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uses_last_path_segment() {
        assert_eq!(
            cache_key("https://cdn.example.com/coins/1879-morgan-obv.jpg"),
            "1879-morgan-obv"
        );
    }

    #[test]
    fn test_strips_query_parameters() {
        assert_eq!(
            cache_key("https://cdn.example.com/coins/obv.jpg?w=600&sig=abc"),
            "obv.jpg"
        );
    }

    #[test]
    fn test_deterministic() {
        let uri = "file:///photos/coin%20scan.png";
        assert_eq!(cache_key(uri), cache_key(uri));
    }

    #[test]
    fn test_falls_back_when_segment_empty() {
        let key = cache_key("https://cdn.example.com/coins/");
        assert!(!key.is_empty());
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn test_falls_back_when_segment_unsafe() {
        let key = cache_key("https://cdn.example.com/coins/obv%20erse.jpg");
        // '%' and ' ' are unsafe once decoded segments show up; fallback
        // sanitizes the whole URI instead
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn test_fallback_bounded_to_fifty_chars() {
        let long = format!("https://cdn.example.com/{}/", "x".repeat(200));
        assert!(cache_key(&long).len() <= 50);
    }

    #[test]
    fn test_dot_segments_rejected() {
        let key = cache_key("https://cdn.example.com/..");
        assert_ne!(key, "..");
    }
}
