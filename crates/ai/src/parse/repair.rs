//! Text-level fixes for almost-JSON.

/// Span from the first `{` to the last `}` (inclusive), if any.
pub fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Light repairs, applied in order:
///
/// - typographic quotes become ASCII quotes;
/// - single quotes become double quotes, but only when the text has no double
///   quotes at all (otherwise apostrophes inside strings would be mangled);
/// - commas directly before `}` or `]` are dropped (outside string literals).
pub fn repair(text: &str) -> String {
    let normalized: String = text
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{FF02}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect();

    let quoted = if normalized.contains('"') {
        normalized
    } else {
        normalized.replace('\'', "\"")
    };

    strip_trailing_commas(&quoted)
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn extracts_outermost_braces() {
        let text = "Here you go: {\"a\": {\"b\": 1}} -- done";
        assert_eq!(extract_object(text), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_object("no json here"), None);
        assert_eq!(extract_object("} backwards {"), None);
    }

    #[test]
    fn trailing_commas_are_removed_outside_strings() {
        let fixed = repair("{\"a\": [1, 2, ], \"b\": \"x, }\",\n}");
        assert_eq!(fixed, "{\"a\": [1, 2 ], \"b\": \"x, }\"\n}");
    }

    #[test]
    fn curly_quotes_are_normalized() {
        let fixed = repair("{\u{201C}a\u{201D}: \u{201C}x\u{201D}}");
        assert_eq!(fixed, "{\"a\": \"x\"}");
    }

    #[test]
    fn apostrophes_survive_when_double_quotes_are_present() {
        let fixed = repair("{\"a\": \"it's fine\",}");
        assert_eq!(fixed, "{\"a\": \"it's fine\"}");
    }

    #[test]
    fn escaped_quote_does_not_end_string() {
        let fixed = repair(r#"{"a": "say \",]\" ok"}"#);
        assert_eq!(fixed, r#"{"a": "say \",]\" ok"}"#);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: repairing valid JSON never changes what it parses to.
        #[test]
        fn repair_preserves_valid_json(
            values in prop::collection::vec(("[a-z ,']{0,12}", any::<i32>()), 0..6)
        ) {
            let obj: serde_json::Map<String, serde_json::Value> = values
                .iter()
                .enumerate()
                .map(|(i, (s, n))| (format!("k{i}"), serde_json::json!([s, n])))
                .collect();
            let text = serde_json::Value::Object(obj).to_string();
            let original: serde_json::Value = serde_json::from_str(&text).unwrap();
            let repaired: serde_json::Value = serde_json::from_str(&repair(&text)).unwrap();
            prop_assert_eq!(original, repaired);
        }
    }
}
