use std::{fmt, sync::Arc};

use jsonschema::JSONSchema;
use regex::{Regex, RegexBuilder};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{common::util::eq_ignore_case, matchers::PatternError};

/// An atomic pattern string that may be negated (`!` prefix), optional
/// (`?` prefix, meaningful only as a map key), or a JSON schema fragment
/// (text starting with `{`).
///
/// Matching never happens through structural equality; it always goes through
/// [`NottableValue::matches`]. Regex and schema artifacts are compiled once at
/// construction, so instances are cheap to share across worker threads.
#[derive(Clone)]
pub struct NottableValue {
    text: String,
    negated: bool,
    optional: bool,
    regex: Option<Regex>,
    schema: Option<SchemaState>,
}

#[derive(Clone)]
pub(crate) enum SchemaState {
    Compiled(Arc<JSONSchema>),
    Invalid(String),
}

impl fmt::Debug for SchemaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaState::Compiled(_) => f.write_str("Compiled"),
            SchemaState::Invalid(reason) => f.debug_tuple("Invalid").field(reason).finish(),
        }
    }
}

impl NottableValue {
    /// Parses a configured pattern string, interpreting the `!`/`?` prefixes
    /// (accepted in either order) and the JSON schema shape.
    pub fn parse<S: AsRef<str>>(raw: S) -> Self {
        let raw = raw.as_ref();

        let mut negated = false;
        let mut optional = false;
        let mut rest = raw;
        loop {
            if !negated && rest.starts_with('!') {
                negated = true;
                rest = &rest[1..];
                continue;
            }
            if !optional && rest.starts_with('?') {
                optional = true;
                rest = &rest[1..];
                continue;
            }
            break;
        }

        let text = rest.to_string();
        let schema = if text.trim_start().starts_with('{') {
            Some(compile_schema(&text))
        } else {
            None
        };

        let regex = if schema.is_none() {
            compile_regex(&text)
        } else {
            None
        };

        Self {
            text,
            negated,
            optional,
            regex,
            schema,
        }
    }

    /// Wraps a concrete value taken from a live request. No prefix
    /// interpretation and no regex or schema compilation happens, so a header
    /// value that happens to start with `!` stays plain text.
    pub fn literal<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            negated: false,
            optional: false,
            regex: None,
            schema: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The original pattern string including its `?`/`!` prefixes.
    pub fn raw(&self) -> String {
        let mut raw = String::with_capacity(self.text.len() + 2);
        if self.optional {
            raw.push('?');
        }
        if self.negated {
            raw.push('!');
        }
        raw.push_str(&self.text);
        raw
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_schema(&self) -> bool {
        self.schema.is_some()
    }

    /// Tests a candidate string against this pattern.
    ///
    /// Outside the control plane, schema patterns validate the candidate as a
    /// JSON document (falling back to a JSON string for non-JSON candidates),
    /// and all other patterns match as a case-insensitive anchored regex with
    /// a case-insensitive literal fallback for text that does not compile as a
    /// regex. The result is inverted for negated patterns.
    ///
    /// With `control_plane` set, regex and schema patterns are compared as
    /// literal text. The management API matches configured patterns against
    /// each other in this mode, and a client that only controls the
    /// verification channel must not be able to smuggle in patterns that
    /// widen what live traffic would match.
    ///
    /// The `optional` flag is deliberately not consulted here; absence of a
    /// key is a property of the containing map, not of value equality.
    pub fn matches(&self, candidate: &str, control_plane: bool) -> bool {
        let positive = if control_plane {
            eq_ignore_case(&self.text, candidate)
        } else if let Some(schema) = &self.schema {
            match schema {
                SchemaState::Compiled(schema) => {
                    let value = serde_json::from_str::<Value>(candidate)
                        .unwrap_or_else(|_| Value::String(candidate.to_string()));
                    schema.is_valid(&value)
                }
                SchemaState::Invalid(reason) => {
                    tracing::debug!(
                        "skipping malformed schema pattern {:?}: {}",
                        self.text,
                        reason
                    );
                    false
                }
            }
        } else if let Some(regex) = &self.regex {
            regex.is_match(candidate)
        } else {
            eq_ignore_case(&self.text, candidate)
        };

        positive != self.negated
    }

    /// Reports a malformed JSON schema pattern so registration can reject it
    /// eagerly instead of silently never matching.
    pub fn validate(&self) -> Result<(), PatternError> {
        if let Some(SchemaState::Invalid(reason)) = &self.schema {
            return Err(PatternError::InvalidSchema {
                raw: self.raw(),
                reason: reason.clone(),
            });
        }
        Ok(())
    }
}

pub(crate) fn compile_schema(text: &str) -> SchemaState {
    let document = match serde_json::from_str::<Value>(text) {
        Ok(document) => document,
        Err(err) => return SchemaState::Invalid(err.to_string()),
    };

    match JSONSchema::compile(&document) {
        Ok(schema) => SchemaState::Compiled(Arc::new(schema)),
        Err(err) => SchemaState::Invalid(err.to_string()),
    }
}

/// Compiles the pattern as an anchored, case-insensitive regex. The whole
/// candidate has to match, so the negation oracle `!"x"` accepts `"xy"`.
fn compile_regex(text: &str) -> Option<Regex> {
    RegexBuilder::new(&format!("^(?:{})$", text))
        .case_insensitive(true)
        .build()
        .ok()
}

impl fmt::Debug for NottableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NottableValue")
            .field("raw", &self.raw())
            .field("is_schema", &self.is_schema())
            .finish()
    }
}

impl fmt::Display for NottableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw())
    }
}

impl Serialize for NottableValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw())
    }
}

impl<'de> Deserialize<'de> for NottableValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RawVisitor;

        impl<'de> de::Visitor<'de> for RawVisitor {
            type Value = NottableValue;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a pattern string")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                Ok(NottableValue::parse(value))
            }
        }

        deserializer.deserialize_str(RawVisitor)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_interprets_prefixes() {
        let value = NottableValue::parse("!value");
        assert!(value.is_negated());
        assert!(!value.is_optional());
        assert_eq!(value.text(), "value");

        let key = NottableValue::parse("?keyOne");
        assert!(key.is_optional());
        assert!(!key.is_negated());
        assert_eq!(key.text(), "keyOne");

        let both = NottableValue::parse("?!keyOne");
        assert!(both.is_optional());
        assert!(both.is_negated());

        let reversed = NottableValue::parse("!?keyOne");
        assert!(reversed.is_optional());
        assert!(reversed.is_negated());
    }

    #[test]
    fn literal_keeps_prefix_characters() {
        let value = NottableValue::literal("!value");
        assert!(!value.is_negated());
        assert_eq!(value.text(), "!value");
        assert!(value.matches("!VALUE", false));
    }

    #[test]
    fn literal_text_matches_case_insensitively() {
        let value = NottableValue::parse("valueOne");
        assert!(value.matches("valueOne", false));
        assert!(value.matches("VALUEONE", false));
        assert!(!value.matches("valueTwo", false));
    }

    #[test]
    fn regex_patterns_match_whole_candidate() {
        let value = NottableValue::parse("value.*");
        assert!(value.matches("valueOne", false));
        assert!(value.matches("value", false));
        assert!(!value.matches("prefix-value", false));
    }

    #[test]
    fn invalid_regex_falls_back_to_literal_equality() {
        let value = NottableValue::parse("c++");
        assert!(value.matches("c++", false));
        assert!(value.matches("C++", false));
        assert!(!value.matches("c", false));
    }

    #[test]
    fn negation_inverts_the_result() {
        let value = NottableValue::parse("!x");
        assert!(!value.matches("x", false));
        assert!(!value.matches("X", false));
        assert!(value.matches("xy", false));
        assert!(value.matches("anything-else", false));
    }

    #[test]
    fn schema_patterns_validate_candidates() {
        let value = NottableValue::parse(r#"{ "type": "string", "pattern": "^v[0-9]+$" }"#);
        assert!(value.is_schema());
        assert!(value.validate().is_ok());
        assert!(value.matches("v12", false));
        assert!(!value.matches("release-12", false));
    }

    #[test]
    fn schema_patterns_validate_json_candidates() {
        let value = NottableValue::parse(r#"{ "type": "integer", "minimum": 10 }"#);
        assert!(value.matches("42", false));
        assert!(!value.matches("7", false));
        assert!(!value.matches("forty-two", false));
    }

    #[test]
    fn negated_schema_pattern() {
        let value = NottableValue::parse(r#"!{ "type": "integer" }"#);
        assert!(value.is_schema());
        assert!(value.is_negated());
        assert!(!value.matches("42", false));
        assert!(value.matches("not-a-number", false));
    }

    #[test]
    fn malformed_schema_is_reported_by_validate() {
        let value = NottableValue::parse(r#"{ "type": "#);
        assert!(value.is_schema());
        assert!(value.validate().is_err());
        assert!(!value.matches("anything", false));
    }

    #[test]
    fn control_plane_mode_is_literal_only() {
        let regex = NottableValue::parse("value.*");
        assert!(!regex.matches("valueOne", true));
        assert!(regex.matches("value.*", true));
        assert!(regex.matches("VALUE.*", true));

        let schema = NottableValue::parse(r#"{ "type": "integer" }"#);
        assert!(!schema.matches("42", true));
        assert!(schema.matches(r#"{ "type": "integer" }"#, true));

        let negated = NottableValue::parse("!x");
        assert!(!negated.matches("x", true));
        assert!(negated.matches("y", true));
    }

    #[test]
    fn serde_round_trips_the_raw_string() {
        let value = NottableValue::parse("?!keyOne");
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, "\"?!keyOne\"");

        let back: NottableValue = serde_json::from_str(&json).unwrap();
        assert!(back.is_optional());
        assert!(back.is_negated());
        assert_eq!(back.text(), "keyOne");
    }
}
