//! Post-processors applied to a received response: JSON-path extraction and
//! response assertions.
//!
//! Post-processors are a tagged enum ([`PostProcessor`]) dispatched by
//! [`apply`] in the order they are declared on a step. An extractor that finds
//! nothing never fails the sample; an assertion that does not hold marks the
//! sample failed but does not stop the post-processors after it.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde_json::Value;

use crate::loadtest::error::SampleError;
use crate::loadtest::plan::{AssertionField, AssertionRule, PostProcessor};
use crate::loadtest::scope::VariableScope;

/// Longest actual value quoted verbatim in an assertion failure message.
const MAX_QUOTED_LEN: usize = 200;

/// One segment of a parsed JSON path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// A parsed JSON path in the dotted/bracketed subset: `$`, `.key`, `['key']`,
/// `[0]`, `[*]` and `.*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parse a JSON path expression. Returns a human-readable reason on failure.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let rest = expr
            .trim()
            .strip_prefix('$')
            .ok_or_else(|| format!("JSON path '{expr}' must start with '$'"))?;
        let chars: Vec<char> = rest.chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    i += 1;
                    if chars.get(i) == Some(&'.') {
                        return Err(format!("recursive descent is not supported in '{expr}'"));
                    }
                    let start = i;
                    while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                        i += 1;
                    }
                    let key: String = chars[start..i].iter().collect();
                    if key.is_empty() {
                        return Err(format!("empty key in JSON path '{expr}'"));
                    }
                    segments.push(if key == "*" {
                        Segment::Wildcard
                    } else {
                        Segment::Key(key)
                    });
                },
                '[' => {
                    let close = chars[i..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|p| p + i)
                        .ok_or_else(|| format!("unclosed '[' in JSON path '{expr}'"))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    let inner = inner.trim();
                    let segment = if inner == "*" {
                        Segment::Wildcard
                    } else if let Some(key) = strip_quotes(inner) {
                        Segment::Key(key.to_owned())
                    } else {
                        let idx = inner
                            .parse::<usize>()
                            .map_err(|_| format!("invalid index '{inner}' in JSON path '{expr}'"))?;
                        Segment::Index(idx)
                    };
                    segments.push(segment);
                    i = close + 1;
                },
                other => {
                    return Err(format!("unexpected '{other}' in JSON path '{expr}'"));
                },
            }
        }

        Ok(Self { segments })
    }

    /// Returns every value the path selects, in document order.
    pub fn select<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match segment {
                    Segment::Key(key) => {
                        if let Some(v) = value.get(key.as_str()) {
                            next.push(v);
                        }
                    },
                    Segment::Index(idx) => {
                        if let Some(v) = value.get(*idx) {
                            next.push(v);
                        }
                    },
                    Segment::Wildcard => match value {
                        Value::Array(items) => next.extend(items.iter()),
                        Value::Object(map) => next.extend(map.values()),
                        _ => {}
                    },
                }
            }
            current = next;
        }
        current
    }

    /// Returns the first selected value rendered as a variable value, if any.
    ///
    /// Strings are bound without quotes; other values are bound as compact JSON.
    pub fn first_match(&self, root: &Value) -> Option<String> {
        self.select(root).first().map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

fn strip_quotes(s: &str) -> Option<&str> {
    s.strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|r| r.strip_suffix('"')))
}

/// The parts of a response that post-processors inspect.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    /// HTTP status code.
    pub status: u16,
    /// Response body decoded as text.
    pub body: &'a str,
    /// Response headers rendered as `Name: value` lines.
    pub headers: &'a str,
}

/// Apply one post-processor to a response.
///
/// Extractors bind into `scope` and record the binding in `extracted`.
/// Returns the assertion failure, if the post-processor is an assertion
/// that did not hold.
pub fn apply(
    post_processor: &PostProcessor,
    response: &ResponseView<'_>,
    scope: &mut VariableScope,
    extracted: &mut BTreeMap<String, String>,
) -> Option<SampleError> {
    match post_processor {
        PostProcessor::JsonExtractor {
            variable,
            json_path,
            default,
        } => {
            match extract_json(json_path, response.body).or_else(|| default.clone()) {
                Some(value) => {
                    tracing::trace!(variable = %variable, value = %value, "bound extracted variable");
                    scope.set(variable.clone(), value.clone());
                    extracted.insert(variable.clone(), value);
                },
                None => {
                    tracing::debug!(variable = %variable, path = %json_path, "JSON extractor found no match");
                },
            }
            None
        },
        PostProcessor::ResponseAssertion {
            field,
            rule,
            patterns,
            negate,
            ..
        } => check_assertion(*field, *rule, patterns, *negate, response, scope)
            .err()
            .map(|message| SampleError::Assertion { message }),
    }
}

fn extract_json(json_path: &str, body: &str) -> Option<String> {
    let path = match JsonPath::parse(json_path) {
        Ok(path) => path,
        Err(reason) => {
            tracing::debug!(%reason, "skipping extractor with invalid JSON path");
            return None;
        },
    };
    let document: Value = serde_json::from_str(body).ok()?;
    path.first_match(&document)
}

/// Evaluate an assertion. Every pattern must pass (after negation).
fn check_assertion(
    field: AssertionField,
    rule: AssertionRule,
    patterns: &[String],
    negate: bool,
    response: &ResponseView<'_>,
    scope: &VariableScope,
) -> Result<(), String> {
    let status;
    let actual: &str = match field {
        AssertionField::ResponseCode => {
            status = response.status.to_string();
            &status
        },
        AssertionField::ResponseBody => response.body,
        AssertionField::ResponseHeaders => response.headers,
    };

    for raw in patterns {
        let pattern = scope.resolve(raw);
        let matched = match rule {
            AssertionRule::Equals => actual == pattern,
            AssertionRule::Substring => actual.contains(&pattern),
            AssertionRule::Contains => compile(&pattern, false)?.is_match(actual),
            AssertionRule::Matches => compile(&pattern, true)?.is_match(actual),
        };
        if matched == negate {
            return Err(format!(
                "{field} expected {not}to {rule} \"{pattern}\" but was \"{actual}\"",
                not = if negate { "not " } else { "" },
                actual = quote_actual(actual),
            ));
        }
    }
    Ok(())
}

fn compile(pattern: &str, anchored: bool) -> Result<Regex, String> {
    let source = if anchored {
        format!("^(?:{pattern})$")
    } else {
        pattern.to_owned()
    };
    Regex::new(&source).map_err(|e| format!("invalid assertion pattern \"{pattern}\": {e}"))
}

fn quote_actual(actual: &str) -> String {
    if actual.chars().count() <= MAX_QUOTED_LEN {
        actual.to_owned()
    } else {
        let truncated: String = actual.chars().take(MAX_QUOTED_LEN).collect();
        format!("{truncated}...")
    }
}

impl fmt::Display for AssertionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ResponseCode => "response code",
            Self::ResponseBody => "response body",
            Self::ResponseHeaders => "response headers",
        })
    }
}

impl fmt::Display for AssertionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Equals => "equal",
            Self::Substring => "contain substring",
            Self::Contains => "contain pattern",
            Self::Matches => "match",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view(status: u16, body: &str) -> ResponseView<'_> {
        ResponseView {
            status,
            body,
            headers: "content-type: application/json\n",
        }
    }

    #[test]
    fn test_parse_and_select_simple_key() {
        let path = JsonPath::parse("$.title").unwrap();
        let doc = json!({"title": "x"});
        assert_eq!(path.first_match(&doc), Some("x".to_string()));
    }

    #[test]
    fn test_select_nested_index_and_bracket_key() {
        let path = JsonPath::parse("$.items[1]['the name']").unwrap();
        let doc = json!({"items": [{"the name": "a"}, {"the name": "b"}]});
        assert_eq!(path.first_match(&doc), Some("b".to_string()));
    }

    #[test]
    fn test_select_wildcard_returns_all() {
        let path = JsonPath::parse("$.items[*].id").unwrap();
        let doc = json!({"items": [{"id": 1}, {"id": 2}, {"name": "no id"}]});
        let values: Vec<_> = path.select(&doc).into_iter().cloned().collect();
        assert_eq!(values, vec![json!(1), json!(2)]);
        assert_eq!(path.first_match(&doc), Some("1".to_string()));
    }

    #[test]
    fn test_root_path_selects_whole_document() {
        let path = JsonPath::parse("$").unwrap();
        let doc = json!({"a": true});
        assert_eq!(path.first_match(&doc), Some(r#"{"a":true}"#.to_string()));
    }

    #[test]
    fn test_parse_rejects_unsupported_paths() {
        assert!(JsonPath::parse("title").is_err());
        assert!(JsonPath::parse("$..title").is_err());
        assert!(JsonPath::parse("$.items[").is_err());
        assert!(JsonPath::parse("$.items[abc]").is_err());
        assert!(JsonPath::parse("$.").is_err());
    }

    #[test]
    fn test_extractor_binds_match() {
        let pp = PostProcessor::json_extractor("foo", "$.title");
        let mut scope = VariableScope::new();
        let mut extracted = BTreeMap::new();
        let failure = apply(&pp, &view(200, r#"{"title":"x"}"#), &mut scope, &mut extracted);
        assert!(failure.is_none());
        assert_eq!(scope.get("foo"), Some("x"));
        assert_eq!(extracted.get("foo").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_extractor_no_match_uses_default() {
        let pp = PostProcessor::JsonExtractor {
            variable: "foo".to_string(),
            json_path: "$.missing".to_string(),
            default: Some("NOT_FOUND".to_string()),
        };
        let mut scope = VariableScope::new();
        let mut extracted = BTreeMap::new();
        assert!(apply(&pp, &view(200, r#"{"title":"x"}"#), &mut scope, &mut extracted).is_none());
        assert_eq!(scope.get("foo"), Some("NOT_FOUND"));
    }

    #[test]
    fn test_extractor_no_match_without_default_leaves_unset() {
        let pp = PostProcessor::json_extractor("foo", "$.title");
        let mut scope = VariableScope::new();
        let mut extracted = BTreeMap::new();
        assert!(apply(&pp, &view(200, "not json"), &mut scope, &mut extracted).is_none());
        assert_eq!(scope.get("foo"), None);
        assert!(extracted.is_empty());
    }

    #[test]
    fn test_response_code_assertion_passes() {
        let pp = PostProcessor::response_code_equals("200");
        let mut scope = VariableScope::new();
        let mut extracted = BTreeMap::new();
        assert!(apply(&pp, &view(200, ""), &mut scope, &mut extracted).is_none());
    }

    #[test]
    fn test_response_code_assertion_mismatch_message() {
        let pp = PostProcessor::response_code_equals("200");
        let mut scope = VariableScope::new();
        let mut extracted = BTreeMap::new();
        let failure = apply(&pp, &view(500, ""), &mut scope, &mut extracted).unwrap();
        let message = failure.to_string();
        assert!(message.contains("response code"), "{message}");
        assert!(message.contains("\"200\""), "{message}");
        assert!(message.contains("\"500\""), "{message}");
    }

    #[test]
    fn test_body_assertion_rules() {
        let scope = VariableScope::new();
        let body = r#"{"status":"ok","count":42}"#;
        let response = view(200, body);
        let pats = |p: &str| vec![p.to_string()];

        assert!(check_assertion(AssertionField::ResponseBody, AssertionRule::Substring, &pats("\"ok\""), false, &response, &scope).is_ok());
        assert!(check_assertion(AssertionField::ResponseBody, AssertionRule::Contains, &pats(r#""count":\d+"#), false, &response, &scope).is_ok());
        assert!(check_assertion(AssertionField::ResponseBody, AssertionRule::Matches, &pats(r"\{.*\}"), false, &response, &scope).is_ok());
        assert!(check_assertion(AssertionField::ResponseBody, AssertionRule::Matches, &pats("ok"), false, &response, &scope).is_err());
        assert!(check_assertion(AssertionField::ResponseBody, AssertionRule::Substring, &pats("error"), true, &response, &scope).is_ok());
        assert!(check_assertion(AssertionField::ResponseHeaders, AssertionRule::Substring, &pats("application/json"), false, &response, &scope).is_ok());
    }

    #[test]
    fn test_assertion_patterns_resolve_variables() {
        let mut scope = VariableScope::new();
        scope.set("expected", "201");
        let result = check_assertion(
            AssertionField::ResponseCode,
            AssertionRule::Equals,
            &["${expected}".to_string()],
            false,
            &view(201, ""),
            &scope,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_regex_fails_assertion() {
        let scope = VariableScope::new();
        let result = check_assertion(
            AssertionField::ResponseBody,
            AssertionRule::Contains,
            &["(".to_string()],
            false,
            &view(200, "x"),
            &scope,
        );
        assert!(result.unwrap_err().contains("invalid assertion pattern"));
    }

    #[test]
    fn test_long_actual_is_truncated() {
        let long = "a".repeat(500);
        let quoted = quote_actual(&long);
        assert_eq!(quoted.len(), MAX_QUOTED_LEN + 3);
        assert!(quoted.ends_with("..."));
    }
}
