//! Response repair: turn a model's text reply into typed JSON.
//!
//! Even with a response schema the service occasionally wraps its answer in
//! Markdown fences or surrounds it with prose. The stages below are tried in
//! order and the first candidate that yields a value of the requested type
//! wins.
//!
//! ## Stage Order
//!
//! 1. [`RepairStage::Direct`] parses the text as-is.
//! 2. [`RepairStage::StripFences`] removes code-fence delimiters.
//! 3. [`RepairStage::BalancedSlice`] tries each balanced top-level `[...]` or
//!    `{...}` in turn. An opener that is never closed ends the scan, so a
//!    truncated reply stays malformed.

use crate::error::DocMorphError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use tracing::{debug, error, warn};

/// One step of the repair chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStage {
    Direct,
    StripFences,
    BalancedSlice,
}

/// The chain, in the order it is attempted.
pub const REPAIR_CHAIN: [RepairStage; 3] = [
    RepairStage::Direct,
    RepairStage::StripFences,
    RepairStage::BalancedSlice,
];

static RE_FENCES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)```(?:json)?[ \t]*\r?\n?").unwrap());

impl RepairStage {
    /// The candidate texts this stage would parse, in order.
    pub fn candidates<'a>(&self, raw: &'a str) -> Vec<Cow<'a, str>> {
        match self {
            RepairStage::Direct => vec![Cow::Borrowed(raw)],
            RepairStage::StripFences => {
                let stripped = RE_FENCES.replace_all(raw, "");
                vec![Cow::Owned(stripped.trim().to_string())]
            }
            RepairStage::BalancedSlice => balanced_slices(raw).into_iter().map(Cow::Borrowed).collect(),
        }
    }
}

/// Parse `raw` as `T`, running the repair chain.
///
/// Blank text is parsed as `empty_shape` (`"[]"` or `"{}"`).
pub fn parse_repaired<T: DeserializeOwned>(raw: &str, empty_shape: &str) -> Result<T, DocMorphError> {
    let raw = if raw.trim().is_empty() { empty_shape } else { raw };

    let mut last_err = None;
    for stage in REPAIR_CHAIN {
        for candidate in stage.candidates(raw) {
            match serde_json::from_str::<T>(&candidate) {
                Ok(value) => {
                    if stage == RepairStage::Direct {
                        debug!("Response parsed without repair");
                    } else {
                        warn!("Response needed repair stage {:?}", stage);
                    }
                    return Ok(value);
                }
                Err(e) => last_err = Some(e),
            }
        }
    }

    error!("Unparseable extraction response: {}", raw);
    Err(DocMorphError::MalformedResponse {
        detail: last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no JSON found in response".into()),
    })
}

/// Every balanced top-level `[...]` or `{...}` in `s`, left to right,
/// skipping brackets inside string literals. Stops at an opener that is
/// never closed.
fn balanced_slices(s: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = 0;
    while let Some(rel) = s[rest..].find(['[', '{']) {
        let start = rest + rel;
        match balanced_end(&s[start..]) {
            Some(len) => {
                found.push(&s[start..start + len]);
                rest = start + len;
            }
            None => break,
        }
    }
    found
}

/// Byte length of the balanced value opening at the start of `s`.
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in s.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(offset + ch.len_utf8());
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
    use crate::types::ExtractedTable;
    use serde_json::Value;

    #[test]
    fn direct_json_parses() {
        let v: Value = parse_repaired(r#"[{"a":1}]"#, "[]").unwrap();
        assert_eq!(v[0]["a"], 1);
    }

    #[test]
    fn fenced_json_parses() {
        let raw = "```json\n[{\"sheetName\":\"S\"}]\n```";
        let v: Value = parse_repaired(raw, "[]").unwrap();
        assert_eq!(v[0]["sheetName"], "S");
    }

    #[test]
    fn prose_wrapped_json_parses() {
        let raw = "Here are the tables you asked for: [{\"x\": \"a]b\"}] Hope this helps!";
        let v: Value = parse_repaired(raw, "[]").unwrap();
        assert_eq!(v[0]["x"], "a]b");
    }

    #[test]
    fn blank_text_is_empty_shape() {
        let v: Vec<Value> = parse_repaired("  \n", "[]").unwrap();
        assert!(v.is_empty());
        let o: Value = parse_repaired("", "{}").unwrap();
        assert!(o.as_object().unwrap().is_empty());
    }

    #[test]
    fn garbage_is_malformed() {
        let err = parse_repaired::<Value>("sorry, I cannot help with that", "[]").unwrap_err();
        assert!(matches!(err, DocMorphError::MalformedResponse { .. }));
    }

    #[test]
    fn unclosed_bracket_is_malformed() {
        let err = parse_repaired::<Value>("[{\"a\": 1}", "[]").unwrap_err();
        assert!(matches!(err, DocMorphError::MalformedResponse { .. }));
    }

    #[test]
    fn truncated_table_array_is_malformed() {
        let raw = r#"Tables: [{"sheetName": "S", "headers": ["A"], "rows": [["1"]]}, {"sheetName": "T""#;
        let err = parse_repaired::<Vec<ExtractedTable>>(raw, "[]").unwrap_err();
        assert!(matches!(err, DocMorphError::MalformedResponse { .. }));
    }

    #[test]
    fn later_slice_is_tried_when_earlier_one_does_not_fit() {
        let raw = r#"See note [1]. Result: [{"sheetName": "S", "headers": ["A"], "rows": [["x"]]}]"#;
        let tables: Vec<ExtractedTable> = parse_repaired(raw, "[]").unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].sheet_name, "S");
    }

    #[test]
    fn balanced_slices_respect_strings_and_escapes() {
        let s = r#"noise {"k": "brace } and \" quote", "n": [1, 2]} trailing }"#;
        assert_eq!(
            balanced_slices(s),
            vec![r#"{"k": "brace } and \" quote", "n": [1, 2]}"#]
        );
        assert!(balanced_slices("nothing here").is_empty());
        assert_eq!(balanced_slices("[1] x [2] y [3"), vec!["[1]", "[2]"]);
    }

    #[test]
    fn chain_order_is_fixed() {
        assert_eq!(
            REPAIR_CHAIN,
            [
                RepairStage::Direct,
                RepairStage::StripFences,
                RepairStage::BalancedSlice
            ]
        );
    }
}
