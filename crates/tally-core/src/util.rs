//! Text and timestamp helpers shared by the remote, auth and config layers.

use chrono::{DateTime, Utc};

/// Trimmed contents of `value`, or `None` when nothing but whitespace remains.
pub fn non_empty_trimmed(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

/// Whether `value` is an absolute http(s) URL with a host part.
pub fn is_http_url(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    ["http://", "https://"].iter().any(|scheme| {
        lower
            .strip_prefix(scheme)
            .is_some_and(|rest| !rest.is_empty() && !rest.starts_with('/'))
    })
}

/// Single-line preview of `value`: whitespace runs collapse to one space and
/// anything past `max_chars` is cut with an ellipsis.
pub fn compact_text(value: &str, max_chars: usize) -> String {
    let mut preview = String::new();
    for (index, word) in value.split_whitespace().enumerate() {
        if index > 0 {
            preview.push(' ');
        }
        preview.push_str(word);
    }
    match preview.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            preview.truncate(cut);
            preview.push('…');
            preview
        }
        None => preview,
    }
}

/// Whether `candidate` is later than `reference` by more than `tolerance_ms`.
///
/// A missing reference means nothing has been synced yet, so any candidate counts as newer.
pub fn is_newer_beyond(
    candidate: DateTime<Utc>,
    reference: Option<DateTime<Utc>>,
    tolerance_ms: i64,
) -> bool {
    reference.map_or(true, |reference| {
        candidate.timestamp_millis() - reference.timestamp_millis() > tolerance_ms
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn blank_text_becomes_none() {
        assert_eq!(non_empty_trimmed(None), None);
        assert_eq!(non_empty_trimmed(Some(" \t\n".to_string())), None);
        assert_eq!(
            non_empty_trimmed(Some(" books ".to_string())),
            Some("books".to_string())
        );
    }

    #[test]
    fn http_url_needs_scheme_and_host() {
        assert!(is_http_url("http://localhost:8080"));
        assert!(is_http_url("HTTPS://oauth.example.com/token"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("https:///path"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("example.com"));
    }

    #[test]
    fn compact_text_flattens_and_cuts() {
        assert_eq!(compact_text("  bad\n  gateway ", 40), "bad gateway");
        assert_eq!(compact_text("abcdef", 3), "abc…");
        assert_eq!(compact_text("ééé", 3), "ééé");
        assert_eq!(compact_text("   ", 10), "");
    }

    #[test]
    fn is_newer_beyond_respects_tolerance() {
        let base = Utc::now();
        assert!(!is_newer_beyond(base + Duration::milliseconds(1000), Some(base), 1000));
        assert!(is_newer_beyond(base + Duration::milliseconds(1001), Some(base), 1000));
        assert!(!is_newer_beyond(base - Duration::seconds(5), Some(base), 1000));
        assert!(is_newer_beyond(base, None, 1000));
    }
}
