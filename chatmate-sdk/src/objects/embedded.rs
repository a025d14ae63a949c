//! Extraction of JSON blobs embedded in HTML documents.
//!
//! Pages embed their initial state as `var ytInitialData = {...};` (or as a
//! `window["ytInitialData"] = {...}` assignment). We locate the marker, skip
//! to the first `{`, and let serde parse exactly one JSON value, ignoring
//! whatever trails it.

use serde::de::DeserializeOwned;

/// Locate `marker` in `document` and deserialize the JSON object that
/// follows it.
///
/// Returns `None` if the marker or the opening brace is absent, and
/// `Some(Err(_))` if a value is present but malformed.
pub fn extract_embedded<T: DeserializeOwned>(
    document: &str,
    marker: &str,
) -> Option<Result<T, serde_json::Error>> {
    document.match_indices(marker).find_map(|(at, _)| {
        let rest = &document[at + marker.len()..];
        let brace = rest.find('{')?;
        // Only whitespace, `=`, `]` or quotes may sit between marker and value.
        let is_assignment = rest[..brace]
            .chars()
            .all(|c| c.is_whitespace() || matches!(c, '=' | ']' | '"' | '\''));
        if !is_assignment {
            return None;
        }
        let mut values = serde_json::Deserializer::from_str(&rest[brace..]).into_iter::<T>();
        values.next()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_value_and_ignores_trailing_script() {
        let html = r#"<script>var ytInitialData = {"a":{"b":[1,2]}};var other = 1;</script>"#;
        let value: serde_json::Value = extract_embedded(html, "ytInitialData").unwrap().unwrap();
        assert_eq!(value["a"]["b"][1], 2);
    }

    #[test]
    fn test_window_assignment_form() {
        let html = r#"window["ytInitialPlayerResponse"] = {"x": "y"};"#;
        let value: serde_json::Value =
            extract_embedded(html, "ytInitialPlayerResponse").unwrap().unwrap();
        assert_eq!(value["x"], "y");
    }

    #[test]
    fn test_skips_non_assignment_mentions() {
        let html = r#"<script>if (window.ytInitialData) {}</script><script>var ytInitialData = {"k": 1};</script>"#;
        let value: serde_json::Value = extract_embedded(html, "ytInitialData").unwrap().unwrap();
        assert_eq!(value["k"], 1);
    }

    #[test]
    fn test_missing_marker_or_value() {
        assert!(extract_embedded::<serde_json::Value>("<html></html>", "ytInitialData").is_none());
        assert!(
            extract_embedded::<serde_json::Value>("ytInitialData = null;", "ytInitialData")
                .is_none()
        );
        let broken = extract_embedded::<serde_json::Value>("ytInitialData = {\"a\": ", "ytInitialData");
        assert!(matches!(broken, Some(Err(_))));
    }
}
