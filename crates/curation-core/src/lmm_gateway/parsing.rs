//! Tolerant parsing front-end for structured LMM responses: strongly-typed
//! sum types on the way out, fed through a front-end that strips code
//! fences and brace-slices before deserializing.

use serde::de::DeserializeOwned;

use super::error::LmmError;

/// Strips a leading/trailing Markdown code fence (``` or ```json), then
/// locates the first `{` or `[` and its matching closing bracket, and
/// deserializes the slice in between. Falls back to parsing the raw text
/// verbatim if no fence or bracket is found.
pub fn parse_tolerant<T: DeserializeOwned>(raw: &str) -> Result<T, LmmError> {
    let stripped = strip_code_fence(raw);
    let sliced = slice_to_matching_bracket(stripped).unwrap_or(stripped);

    serde_json::from_str(sliced).map_err(|_| LmmError::UnparseableResponse(raw.to_string()))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip an optional language tag on the fence's opening line (e.g. "json").
    let after_lang = after_open
        .find('\n')
        .map_or(after_open, |idx| &after_open[idx + 1..]);
    after_lang.strip_suffix("```").unwrap_or(after_lang).trim()
}

fn slice_to_matching_bracket(raw: &str) -> Option<&str> {
    let start = raw.find(['{', '['])?;
    let open = raw.as_bytes()[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, byte) in raw.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match *byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        saveable: bool,
    }

    #[test]
    fn parses_plain_json() {
        let parsed: Item = parse_tolerant(r#"{"saveable": true}"#).unwrap();
        assert_eq!(parsed, Item { saveable: true });
    }

    #[test]
    fn strips_fenced_json_with_language_tag() {
        let raw = "```json\n{\"saveable\": false}\n```";
        let parsed: Item = parse_tolerant(raw).unwrap();
        assert_eq!(parsed, Item { saveable: false });
    }

    #[test]
    fn recovers_json_surrounded_by_prose() {
        let raw = "Sure, here is the result:\n{\"saveable\": true}\nLet me know if you need more.";
        let parsed: Item = parse_tolerant(raw).unwrap();
        assert_eq!(parsed, Item { saveable: true });
    }

    #[test]
    fn gives_up_on_garbage() {
        let err = parse_tolerant::<Item>("not json at all").unwrap_err();
        assert!(matches!(err, LmmError::UnparseableResponse(_)));
    }

    #[test]
    fn ignores_braces_inside_string_values() {
        let raw = r#"{"saveable": true, "reason": "looks like a {typo}"}"#;
        #[derive(Deserialize)]
        struct WithReason {
            saveable: bool,
            reason: String,
        }
        let parsed: WithReason = parse_tolerant(raw).unwrap();
        assert!(parsed.saveable);
        assert_eq!(parsed.reason, "looks like a {typo}");
    }
}
