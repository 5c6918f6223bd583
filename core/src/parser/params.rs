//! Key/value view of a reference body
//!
//! `@tool:drive { action: "list_files", folder: 123 }` exposes
//! `{action: list_files, folder: 123}`. Bodies that are not a comma separated
//! list of `key: value` entries are free text and yield an empty map.

use std::collections::BTreeMap;

/// Split `s` on `sep` wherever it appears outside quotes and brackets
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, ch) in s.char_indices() {
        if in_quote {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quote = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_quote = true,
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => depth = depth.saturating_sub(1),
            _ if ch == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(s)
}

pub fn parse_params(body: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();

    for entry in split_top_level(body, ',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some(value_start) = key_end(entry) else {
            return BTreeMap::new();
        };
        let key = unquote(entry[..value_start - 1].trim());
        if key.is_empty() {
            return BTreeMap::new();
        }
        params.insert(
            key.to_string(),
            unquote(entry[value_start..].trim()).to_string(),
        );
    }

    params
}

/// Byte offset just past the first top-level `:` of an entry
fn key_end(entry: &str) -> Option<usize> {
    let key = split_top_level(entry, ':').into_iter().next()?;
    (key.len() < entry.len()).then_some(key.len() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn params(body: &str) -> BTreeMap<String, String> {
        parse_params(body)
    }

    #[test]
    fn test_key_value_pairs() {
        assert_eq!(
            params(r#"action: "list_files", folder: "123""#),
            btreemap! {
                "action".to_string() => "list_files".to_string(),
                "folder".to_string() => "123".to_string(),
            }
        );
    }

    #[test]
    fn test_value_keeps_inner_colons_and_commas() {
        assert_eq!(
            params(r#"url: http://x.io/a, query: "a, b", values: {x: 1, y: 2}"#),
            btreemap! {
                "url".to_string() => "http://x.io/a".to_string(),
                "query".to_string() => "a, b".to_string(),
                "values".to_string() => "{x: 1, y: 2}".to_string(),
            }
        );
    }

    #[test]
    fn test_free_text_has_no_params() {
        assert!(params("query").is_empty());
        assert!(params("find x, then y: z").is_empty());
        assert!(params("").is_empty());
    }

    #[test]
    fn test_trailing_comma_is_ignored() {
        assert_eq!(params("a: 1,").len(), 1);
    }
}
