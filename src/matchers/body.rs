use assert_json_diff::{assert_json_matches_no_panic, CompareMode, Config};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::matchers::{
    nottable::{compile_schema, SchemaState},
    PatternError,
};

/// A whole-body sub-matcher. Negation applies at body granularity with the
/// same XOR semantics as pattern values.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(from = "BodyMatcherRepr", into = "BodyMatcherRepr")]
pub struct BodyMatcher {
    kind: BodyKind,
    not: bool,
}

#[derive(Clone, Debug)]
enum BodyKind {
    /// Exact string equality over the raw body.
    Equals(String),
    /// Regex over the raw body; text that does not compile as a regex is
    /// matched as a literal.
    Matches { raw: String, regex: Option<Regex> },
    /// The body parses as JSON equal to the given document, ignoring
    /// formatting and member order.
    JsonEquals(Value),
    /// The given document is a recursive subset of the JSON body: every
    /// field it mentions must be present with an equal value, extra fields
    /// in the body are ignored at every nesting level.
    JsonIncludes(Value),
    /// The body validates against the given JSON schema.
    JsonSchema { raw: String, schema: SchemaState },
}

impl BodyMatcher {
    pub fn equals<S: Into<String>>(value: S) -> Self {
        Self {
            kind: BodyKind::Equals(value.into()),
            not: false,
        }
    }

    pub fn matches<S: Into<String>>(regex: S) -> Self {
        let raw = regex.into();
        let regex = Regex::new(&raw).ok();
        Self {
            kind: BodyKind::Matches { raw, regex },
            not: false,
        }
    }

    pub fn json_equals(value: Value) -> Self {
        Self {
            kind: BodyKind::JsonEquals(value),
            not: false,
        }
    }

    pub fn json_includes(value: Value) -> Self {
        Self {
            kind: BodyKind::JsonIncludes(value),
            not: false,
        }
    }

    pub fn json_schema<S: Into<String>>(schema: S) -> Self {
        let raw = schema.into();
        let schema = compile_schema(&raw);
        Self {
            kind: BodyKind::JsonSchema { raw, schema },
            not: false,
        }
    }

    pub fn negated(mut self) -> Self {
        self.not = true;
        self
    }

    pub fn is_negated(&self) -> bool {
        self.not
    }

    pub fn validate(&self) -> Result<(), PatternError> {
        if let BodyKind::JsonSchema {
            raw,
            schema: SchemaState::Invalid(reason),
        } = &self.kind
        {
            return Err(PatternError::InvalidSchema {
                raw: raw.clone(),
                reason: reason.clone(),
            });
        }
        Ok(())
    }

    pub fn matches_body(&self, body: &str) -> bool {
        let positive = match &self.kind {
            BodyKind::Equals(expected) => expected == body,
            BodyKind::Matches { raw, regex } => match regex {
                Some(regex) => regex.is_match(body),
                None => raw == body,
            },
            BodyKind::JsonEquals(expected) => match serde_json::from_str::<Value>(body) {
                Ok(actual) => {
                    assert_json_matches_no_panic(
                        &actual,
                        expected,
                        Config::new(CompareMode::Strict),
                    )
                    .is_ok()
                }
                Err(_) => false,
            },
            BodyKind::JsonIncludes(expected) => match serde_json::from_str::<Value>(body) {
                Ok(actual) => {
                    assert_json_matches_no_panic(
                        &actual,
                        expected,
                        Config::new(CompareMode::Inclusive),
                    )
                    .is_ok()
                }
                Err(_) => false,
            },
            BodyKind::JsonSchema { raw, schema } => match schema {
                SchemaState::Compiled(schema) => {
                    let value = serde_json::from_str::<Value>(body)
                        .unwrap_or_else(|_| Value::String(body.to_string()));
                    schema.is_valid(&value)
                }
                SchemaState::Invalid(reason) => {
                    tracing::debug!("skipping malformed body schema {:?}: {}", raw, reason);
                    false
                }
            },
        };

        positive != self.not
    }
}

/// Serialized form of [`BodyMatcher`]; compiled regex and schema artifacts
/// are rebuilt on deserialization.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BodyMatcherRepr {
    Equals {
        value: String,
        #[serde(default)]
        not: bool,
    },
    Matches {
        regex: String,
        #[serde(default)]
        not: bool,
    },
    JsonEquals {
        value: Value,
        #[serde(default)]
        not: bool,
    },
    JsonIncludes {
        value: Value,
        #[serde(default)]
        not: bool,
    },
    JsonSchema {
        schema: String,
        #[serde(default)]
        not: bool,
    },
}

impl From<BodyMatcherRepr> for BodyMatcher {
    fn from(repr: BodyMatcherRepr) -> Self {
        let (matcher, not) = match repr {
            BodyMatcherRepr::Equals { value, not } => (BodyMatcher::equals(value), not),
            BodyMatcherRepr::Matches { regex, not } => (BodyMatcher::matches(regex), not),
            BodyMatcherRepr::JsonEquals { value, not } => (BodyMatcher::json_equals(value), not),
            BodyMatcherRepr::JsonIncludes { value, not } => {
                (BodyMatcher::json_includes(value), not)
            }
            BodyMatcherRepr::JsonSchema { schema, not } => (BodyMatcher::json_schema(schema), not),
        };

        if not {
            matcher.negated()
        } else {
            matcher
        }
    }
}

impl From<BodyMatcher> for BodyMatcherRepr {
    fn from(matcher: BodyMatcher) -> Self {
        let not = matcher.not;
        match matcher.kind {
            BodyKind::Equals(value) => BodyMatcherRepr::Equals { value, not },
            BodyKind::Matches { raw, .. } => BodyMatcherRepr::Matches { regex: raw, not },
            BodyKind::JsonEquals(value) => BodyMatcherRepr::JsonEquals { value, not },
            BodyKind::JsonIncludes(value) => BodyMatcherRepr::JsonIncludes { value, not },
            BodyKind::JsonSchema { raw, .. } => BodyMatcherRepr::JsonSchema { schema: raw, not },
        }
    }
}
