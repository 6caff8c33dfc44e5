use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::ProviderError;

static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());

/// Parse a language-model answer into a JSON object.
///
/// Lenient: code fences and surrounding prose are ignored, the outermost
/// `{...}` is taken, and trailing commas are removed before parsing.
pub fn parse_json_object(response: &str) -> Result<Value, ProviderError> {
    let body = strip_code_fence(response);
    let start = body
        .find('{')
        .ok_or_else(|| ProviderError::MalformedResponse("No JSON object found".into()))?;
    let end = body
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| ProviderError::MalformedResponse("Unclosed JSON object".into()))?;

    let candidate = &body[start..=end];
    let value: Value = match serde_json::from_str(candidate) {
        Ok(v) => v,
        Err(_) => {
            let repaired = TRAILING_COMMA.replace_all(candidate, "$1");
            serde_json::from_str(&repaired).map_err(|e| ProviderError::Parse(e.to_string()))?
        }
    };

    if value.is_object() {
        Ok(value)
    } else {
        Err(ProviderError::MalformedResponse("Top-level JSON is not an object".into()))
    }
}

/// Content of the first fenced block, or the input when there is none.
fn strip_code_fence(response: &str) -> &str {
    let Some(open) = response.find("```") else {
        return response;
    };
    let after_open = &response[open + 3..];
    // Skip the language tag line (```json)
    let content_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let content = &after_open[content_start..];
    match content.find("```") {
        Some(close) => &content[..close],
        None => content,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_plain_object() {
        let v = parse_json_object(r#"{"summary": {"title": "Yemek"}}"#).unwrap();
        assert_eq!(v["summary"]["title"], "Yemek");
    }

    #[test]
    fn parses_fenced_block_with_prose() {
        let response = "Here is the analysis:\n```json\n{\"dates\": {\"start_date\": \"01.01.2025\"}}\n```\nDone.";
        let v = parse_json_object(response).unwrap();
        assert_eq!(v["dates"]["start_date"], "01.01.2025");
    }

    #[test]
    fn parses_object_surrounded_by_text() {
        let v = parse_json_object("Sonuç: {\"a\": 1} (bitti)").unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn repairs_trailing_commas() {
        let v = parse_json_object("{\"a\": [1, 2,], \"b\": {\"c\": 3,},}").unwrap();
        assert_eq!(v, json!({"a": [1, 2], "b": {"c": 3}}));
    }

    #[test]
    fn no_object_is_malformed() {
        let err = parse_json_object("I could not find anything.").unwrap_err();
        assert!(err.is_parse_failure());
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[test]
    fn broken_json_is_parse_error() {
        let err = parse_json_object("{\"a\": \"unterminated}").unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }

    #[test]
    fn unclosed_fence_still_parses() {
        let v = parse_json_object("```json\n{\"x\": true}").unwrap();
        assert_eq!(v["x"], true);
    }
}
