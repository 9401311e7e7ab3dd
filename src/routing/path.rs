//! # Path Compiler
//!
//! Turns a parametrized path template such as `/v1/dataset/:id` into a case-insensitive,
//! fully-anchored regular expression plus the ordered list of parameter names, and builds
//! concrete paths back from a template and a set of values.
//!
//! ## Template syntax
//!
//! - `:name` matches one non-empty path segment (`[^/]+?`)
//! - `:name?` makes the segment, including its leading `/`, optional
//! - a template starting with `^` is taken as a raw pattern with no parameters
//!
//! Every compiled pattern tolerates one trailing slash.
//!
//! ## Rust Concepts Used
//!
//! - `regex::Regex` is compiled once at registration time and cloned cheaply (it is `Arc` backed)
//! - A small tokenizer shared by `compile` and `instantiate` keeps both directions consistent

use crate::core::error::{GatewayError, GatewayResult};
use regex::{Regex, RegexBuilder};
use serde::{Serialize, Serializer};
use std::collections::HashMap;

/// Pattern used for a single `:name` segment
const SEGMENT_PATTERN: &str = "[^/]+?";

/// A template token
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Param { name: String, optional: bool },
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Split a template into literal runs and `:name` parameters
fn tokenize(template: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == ':' && chars.peek().copied().map(is_name_char).unwrap_or(false) {
            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if !is_name_char(next) {
                    break;
                }
                name.push(next);
                chars.next();
            }

            let optional = chars.peek() == Some(&'?');
            if optional {
                chars.next();
            }

            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(Token::Param { name, optional });
        } else {
            literal.push(c);
        }
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }

    tokens
}

/// A path template compiled into a matcher
///
/// The source template is kept next to the compiled regex so that the template can be
/// listed and compared without recompiling.
#[derive(Debug, Clone)]
pub struct CompiledPath {
    source: String,
    regex: Regex,
    keys: Vec<String>,
}

impl CompiledPath {
    /// Compile a template into `(pattern, parameterNames)`
    pub fn compile(template: &str) -> GatewayResult<Self> {
        let (pattern, keys) = if template.starts_with('^') {
            (template.to_string(), Vec::new())
        } else {
            Self::build_pattern(template)
        };

        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| GatewayError::validation("path", format!("Invalid path '{}': {}", template, e)))?;

        Ok(Self {
            source: template.to_string(),
            regex,
            keys,
        })
    }

    fn build_pattern(template: &str) -> (String, Vec<String>) {
        let mut pattern = String::from("^");
        let mut keys = Vec::new();

        for token in tokenize(template) {
            match token {
                Token::Literal(text) => pattern.push_str(&regex::escape(&text)),
                Token::Param { name, optional } => {
                    if optional {
                        // the optional group swallows the slash that precedes it
                        if pattern.ends_with('/') {
                            pattern.pop();
                            pattern.push_str(&format!("(?:/({}))?", SEGMENT_PATTERN));
                        } else {
                            pattern.push_str(&format!("({})?", SEGMENT_PATTERN));
                        }
                    } else {
                        pattern.push_str(&format!("({})", SEGMENT_PATTERN));
                    }
                    keys.push(name);
                }
            }
        }

        if pattern.len() > 1 && pattern.ends_with('/') {
            pattern.pop();
        }
        pattern.push_str("/?$");

        (pattern, keys)
    }

    /// The template this pattern was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The compiled regular expression
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Parameter names in capture-group order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Whether the entire path conforms to this pattern
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Extract the named parameter values from a matching path
    ///
    /// Values are percent-decoded. Optional parameters that did not participate in the
    /// match are left out. Returns `None` when the path does not match.
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(path)?;
        let mut values = HashMap::with_capacity(self.keys.len());

        for (i, key) in self.keys.iter().enumerate() {
            if let Some(m) = caps.get(i + 1) {
                let value = urlencoding::decode(m.as_str())
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| m.as_str().to_string());
                values.insert(key.clone(), value);
            }
        }

        Some(values)
    }
}

impl PartialEq for CompiledPath {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for CompiledPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.pattern())
    }
}

/// Build a concrete path from a template and parameter values
///
/// Each value is URL-escaped. A required parameter without a value is a
/// `TemplateParameter` error; a missing optional parameter drops its segment.
pub fn instantiate(template: &str, values: &HashMap<String, String>) -> GatewayResult<String> {
    if template.starts_with('^') {
        return Ok(template.to_string());
    }

    let mut path = String::with_capacity(template.len());

    for token in tokenize(template) {
        match token {
            Token::Literal(text) => path.push_str(&text),
            Token::Param { name, optional } => match values.get(&name) {
                Some(value) => path.push_str(&urlencoding::encode(value)),
                None if optional => {
                    if path.ends_with('/') {
                        path.pop();
                    }
                }
                None => return Err(GatewayError::template_parameter(template, name)),
            },
        }
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_compile_extracts_keys_in_order() {
        let compiled = CompiledPath::compile("/v1/dataset/:dataset/layer/:layer").unwrap();
        assert_eq!(compiled.keys(), &["dataset".to_string(), "layer".to_string()]);

        let caps = compiled.captures("/v1/dataset/abc/layer/42").unwrap();
        assert_eq!(caps["dataset"], "abc");
        assert_eq!(caps["layer"], "42");
    }

    #[test]
    fn test_match_is_anchored_case_insensitive_and_slash_tolerant() {
        let compiled = CompiledPath::compile("/v1/dataset").unwrap();
        assert!(compiled.is_match("/v1/dataset"));
        assert!(compiled.is_match("/v1/dataset/"));
        assert!(compiled.is_match("/V1/DataSet"));
        assert!(!compiled.is_match("/v1/dataset/extra"));
        assert!(!compiled.is_match("/prefix/v1/dataset"));
    }

    #[test]
    fn test_parameter_does_not_cross_segments() {
        let compiled = CompiledPath::compile("/v1/dataset/:id").unwrap();
        assert!(compiled.is_match("/v1/dataset/123"));
        assert!(!compiled.is_match("/v1/dataset/123/456"));
        assert!(!compiled.is_match("/v1/dataset/"));
    }

    #[test]
    fn test_optional_parameter() {
        let compiled = CompiledPath::compile("/v1/layer/:id?").unwrap();
        assert!(compiled.is_match("/v1/layer"));
        assert!(compiled.is_match("/v1/layer/7"));
        assert!(compiled.captures("/v1/layer").unwrap().is_empty());

        assert_eq!(instantiate("/v1/layer/:id?", &HashMap::new()).unwrap(), "/v1/layer");
    }

    #[test]
    fn test_raw_pattern_has_no_keys() {
        let compiled = CompiledPath::compile("^/v1/(graph|query)/.*").unwrap();
        assert!(compiled.keys().is_empty());
        assert!(compiled.is_match("/v1/graph/anything"));
        assert_eq!(compiled.source(), "^/v1/(graph|query)/.*");
    }

    #[test]
    fn test_instantiate_escapes_values() {
        let path = instantiate("/api/v1/dataset/:id", &values(&[("id", "a b/c")])).unwrap();
        assert_eq!(path, "/api/v1/dataset/a%20b%2Fc");
    }

    #[test]
    fn test_instantiate_missing_value() {
        let err = instantiate("/api/v1/dataset/:id", &HashMap::new()).unwrap_err();
        match err {
            GatewayError::TemplateParameter { template, parameter } => {
                assert_eq!(template, "/api/v1/dataset/:id");
                assert_eq!(parameter, "id");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_compile_instantiate_round_trip() {
        let templates = [
            ("/v1/:a", vec![("a", "one")]),
            ("/v1/:a/sub/:b", vec![("a", "x y"), ("b", "Ünïcode")]),
            ("/:first-:second/tail", vec![("first", "left"), ("second", "right")]),
        ];

        for (template, pairs) in templates {
            let compiled = CompiledPath::compile(template).unwrap();
            let supplied = values(&pairs);
            let concrete = instantiate(template, &supplied).unwrap();
            let caps = compiled.captures(&concrete).unwrap();

            let extracted: Vec<&str> = compiled.keys().iter().map(|k| caps[k].as_str()).collect();
            let expected: Vec<&str> = pairs.iter().map(|(_, v)| *v).collect();
            assert_eq!(extracted, expected, "template {template}");
        }
    }
}
