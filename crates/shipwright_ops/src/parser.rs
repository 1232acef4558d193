//! Extraction of operation payloads from free-form model output.
//!
//! Model responses wrap their JSON in prose, fenced code blocks, or both.
//! The parser only locates JSON that looks like an operation payload; shape
//! checking is left to [`crate::validator`].

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// One JSON payload found in a response, split into its root operations.
///
/// A bare `{"operation": ...}` object yields one root; an
/// `{"operations": [...]}` wrapper (or a bare array) yields one root per
/// element.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTree {
    pub roots: Vec<Value>,
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
    })
}

/// Stateless extractor for operation payloads.
pub struct ResponseParser;

impl ResponseParser {
    /// Find every operation payload in `text`, in order of appearance.
    ///
    /// The whole text is scanned for balanced JSON first; the scanner is
    /// string-aware, so fences inside JSON strings are skipped. Fenced blocks
    /// are only consulted when the scan finds nothing. An empty result means
    /// the response was conversational.
    pub fn parse(text: &str) -> Vec<RawTree> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let scanned = Self::scan(text);
        if !scanned.is_empty() {
            debug!("Found {} payload(s) by scanning", scanned.len());
            return scanned;
        }

        let fenced: Vec<RawTree> = fence_regex()
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .flat_map(|m| Self::scan(m.as_str()))
            .collect();
        debug!("Found {} payload(s) in fenced blocks", fenced.len());
        fenced
    }

    /// Convenience: all root operations across every payload.
    pub fn parse_roots(text: &str) -> Vec<Value> {
        Self::parse(text).into_iter().flat_map(|t| t.roots).collect()
    }

    fn scan(text: &str) -> Vec<RawTree> {
        let trimmed = text.trim();
        if trimmed.starts_with('[') {
            if let Some(tree) = decode(trimmed).and_then(classify) {
                return vec![tree];
            }
        }

        let bytes = text.as_bytes();
        let mut trees = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            if bytes[pos] != b'{' {
                pos += 1;
                continue;
            }
            match balanced_end(bytes, pos) {
                Some(end) => match decode(&text[pos..end]).and_then(classify) {
                    Some(tree) => {
                        trees.push(tree);
                        pos = end;
                    }
                    // Not a payload itself; an inner object still might be.
                    None => pos += 1,
                },
                None => pos += 1,
            }
        }
        trees
    }
}

/// Index one past the `}` that closes the object opened at `start`.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn decode(candidate: &str) -> Option<Value> {
    serde_json::from_str(candidate)
        .or_else(|_| serde_json::from_str(&escape_raw_control_chars(candidate)))
        .ok()
}

/// Models frequently emit literal newlines and tabs inside string values.
fn escape_raw_control_chars(candidate: &str) -> String {
    let mut out = String::with_capacity(candidate.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in candidate.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            } else if c.is_control() {
                match c {
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    other => out.push_str(&format!("\\u{:04x}", other as u32)),
                }
                continue;
            }
        } else if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    out
}

fn classify(value: Value) -> Option<RawTree> {
    if value.get("operation").is_some() {
        return Some(RawTree { roots: vec![value] });
    }
    match value {
        Value::Object(mut map) => match map.remove("operations") {
            Some(Value::Array(roots)) => Some(RawTree { roots }),
            _ => None,
        },
        Value::Array(items) if items.iter().any(|v| v.get("operation").is_some()) => {
            Some(RawTree { roots: items })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_single_operation() {
        let trees = ResponseParser::parse(r#"{"operation": "DELETE_FILE", "path": "old.py"}"#);
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].roots[0]["path"], "old.py");
    }

    #[test]
    fn test_operations_wrapper_in_markdown_fence() {
        let text = r#"
I'll create a comprehensive solution...

```json
{
  "operations": [
    {"operation": "CREATE_FILE", "path": "transformer.py", "content": "import torch"}
  ]
}
```
"#;
        let roots = ResponseParser::parse_roots(text);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["operation"], "CREATE_FILE");
    }

    #[test]
    fn test_unlabelled_fence() {
        let text = "Here you go:\n```\n{\"operation\": \"VERIFY_COMPLETE\"}\n```\nDone.";
        let roots = ResponseParser::parse_roots(text);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["operation"], "VERIFY_COMPLETE");
    }

    #[test]
    fn test_prose_around_deeply_nested_payload() {
        let text = r#"Found problems. {"operation": "NEEDS_RETRY", "message": "Issues found", "fixes": [
            {"operation": "MULTIPLE_OPERATIONS", "operations": [
                {"operation": "CREATE_FILE", "path": "a.py", "content": "x=1"},
                {"operation": "CREATE_FILE", "path": "b.py", "content": "y={}"}
            ]},
            {"operation": "DELETE_FILE", "path": "old.py"}
        ]} Let me know."#;
        let trees = ResponseParser::parse(text);
        assert_eq!(trees.len(), 1);
        let root = &trees[0].roots[0];
        assert_eq!(root["operation"], "NEEDS_RETRY");
        assert_eq!(root["fixes"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_scanner() {
        let text = r#"{"operation": "OVERWRITE_FILE", "path": "a.rs", "content": "fn main() { println!(\"}\"); }"}"#;
        let roots = ResponseParser::parse_roots(text);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["content"], "fn main() { println!(\"}\"); }");
    }

    #[test]
    fn test_raw_newlines_inside_strings_are_tolerated() {
        let text = "{\"operation\": \"CREATE_FILE\", \"path\": \"a.py\", \"content\": \"import os\nprint(1)\"}";
        let roots = ResponseParser::parse_roots(text);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["content"], "import os\nprint(1)");
    }

    #[test]
    fn test_multiple_payloads_in_order() {
        let text = r#"First {"operation": "DELETE_FILE", "path": "a"} then {"operation": "DELETE_FILE", "path": "b"}"#;
        let roots = ResponseParser::parse_roots(text);
        let paths: Vec<_> = roots.iter().map(|r| r["path"].as_str().unwrap()).collect();
        assert_eq!(paths, vec!["a", "b"]);
    }

    #[test]
    fn test_conversational_response_yields_nothing() {
        assert!(ResponseParser::parse("Sure! What language would you like?").is_empty());
        assert!(ResponseParser::parse("").is_empty());
        assert!(ResponseParser::parse(r#"{"unrelated": true}"#).is_empty());
        assert!(ResponseParser::parse("{ not json at all").is_empty());
    }

    #[test]
    fn test_fence_inside_content_does_not_hide_later_payload() {
        let text = r#"First remove the old module:
```json
{"operation": "DELETE_FILE", "path": "old.py"}
```
Then document the new one:
```json
{"operation": "CREATE_FILE", "path": "README.md", "content": "```sh\nrun\n```"}
```"#;
        let roots = ResponseParser::parse_roots(text);
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0]["operation"], "DELETE_FILE");
        assert_eq!(roots[1]["path"], "README.md");
        assert_eq!(roots[1]["content"], "```sh\nrun\n```");
    }

    #[test]
    fn test_fenced_array_with_raw_newlines() {
        let text = "Plan:\n```json\n[{\"operation\": \"CREATE_FILE\", \"path\": \"a.py\", \"content\": \"x\ny\"}]\n```";
        let roots = ResponseParser::parse_roots(text);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["content"], "x\ny");
    }

    #[test]
    fn test_bare_array() {
        let text = r#"[{"operation": "DELETE_FILE", "path": "a"}, {"operation": "DELETE_FILE", "path": "b"}]"#;
        let trees = ResponseParser::parse(text);
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].roots.len(), 2);
    }
}
