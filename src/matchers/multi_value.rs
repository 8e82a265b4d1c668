use serde::{Deserialize, Serialize};

use crate::{
    common::util::eq_ignore_case,
    matchers::{nottable::NottableValue, PatternError},
};

/// How strictly keys and value multiplicities must correspond between a
/// pattern and the actual request data.
///
/// The serialized names `SUB_SET` and `MATCHING_KEY` are part of the
/// expectation JSON contract and must not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyMatchStyle {
    /// Each pattern value independently needs some satisfying actual value;
    /// a single actual value may satisfy several pattern values. Extra keys
    /// in the actual data are ignored.
    #[serde(rename = "SUB_SET")]
    SubSet,
    /// Pattern values must be satisfiable by pairwise-distinct actual values,
    /// i.e. a bipartite matching assigning every pattern value its own actual
    /// value has to exist.
    #[serde(rename = "MATCHING_KEY")]
    MatchingKey,
}

impl Default for KeyMatchStyle {
    fn default() -> Self {
        KeyMatchStyle::SubSet
    }
}

/// One key with its non-empty group of values. Insertion order of the values
/// is preserved for diagnostics but irrelevant to matching.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultiValueEntry {
    pub(crate) key: NottableValue,
    pub(crate) values: Vec<NottableValue>,
}

/// An ordered collection of `(key, value group)` pairs over which the
/// `containsAll` algorithm runs, built either from a configured pattern or
/// from the concrete multi-valued fields of a request (headers, cookies,
/// query parameters). Immutable once built; the builder methods consume and
/// return the matcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultiValueMatcher {
    entries: Vec<MultiValueEntry>,
    #[serde(default)]
    key_style: KeyMatchStyle,
    #[serde(default)]
    control_plane: bool,
}

impl MultiValueMatcher {
    /// An empty pattern with the given key match style. An empty pattern is
    /// satisfied by any actual data, including none at all.
    pub fn pattern(key_style: KeyMatchStyle) -> Self {
        Self {
            entries: Vec::new(),
            key_style,
            control_plane: false,
        }
    }

    /// Adds a pattern entry. Key and values are parsed for `!`/`?` prefixes
    /// and schema shape. Values for an already-present key are appended to
    /// its group.
    pub fn with_entry<K, V, I>(mut self, key: K, values: I) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = V>,
    {
        let key = NottableValue::parse(key);
        let values: Vec<NottableValue> = values
            .into_iter()
            .map(|value| NottableValue::parse(value))
            .collect();

        match self
            .entries
            .iter_mut()
            .find(|entry| entry.key.raw() == key.raw())
        {
            Some(existing) => existing.values.extend(values),
            None => self.entries.push(MultiValueEntry { key, values }),
        }

        self
    }

    /// Marks this pattern as a management-plane matcher: all key and value
    /// comparisons become case-insensitive literal equality.
    pub fn into_control_plane(mut self) -> Self {
        self.control_plane = true;
        self
    }

    pub fn with_key_style(mut self, key_style: KeyMatchStyle) -> Self {
        self.key_style = key_style;
        self
    }

    /// A literal view of this pattern, usable as the actual side of a
    /// matcher-vs-matcher comparison: every key and value becomes its raw
    /// configured string, prefixes included.
    pub(crate) fn as_literal_candidates(&self) -> MultiValueMatcher {
        MultiValueMatcher {
            entries: self
                .entries
                .iter()
                .map(|entry| MultiValueEntry {
                    key: NottableValue::literal(entry.key.raw()),
                    values: entry
                        .values
                        .iter()
                        .map(|value| NottableValue::literal(value.raw()))
                        .collect(),
                })
                .collect(),
            key_style: KeyMatchStyle::SubSet,
            control_plane: false,
        }
    }

    /// Builds the actual side from concrete request data. Values are grouped
    /// under their key (compared case-insensitively, as header names are) in
    /// first-seen order, and nothing is interpreted as a pattern.
    pub(crate) fn from_request_data<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut entries: Vec<MultiValueEntry> = Vec::new();
        for (key, value) in pairs {
            let value = NottableValue::literal(value);
            match entries
                .iter_mut()
                .find(|entry| eq_ignore_case(entry.key.text(), key))
            {
                Some(existing) => existing.values.push(value),
                None => entries.push(MultiValueEntry {
                    key: NottableValue::literal(key),
                    values: vec![value],
                }),
            }
        }

        Self {
            entries,
            key_style: KeyMatchStyle::SubSet,
            control_plane: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn key_style(&self) -> KeyMatchStyle {
        self.key_style
    }

    pub fn is_control_plane(&self) -> bool {
        self.control_plane
    }

    pub fn all_keys_optional(&self) -> bool {
        self.entries.iter().all(|entry| entry.key.is_optional())
    }

    pub(crate) fn entries(&self) -> &[MultiValueEntry] {
        &self.entries
    }

    /// Checks the pattern invariants and compiles diagnostics for
    /// registration-time rejection: value groups must not be empty, optional
    /// keys take at most one value, and schema fragments must parse.
    pub fn validate(&self) -> Result<(), PatternError> {
        for entry in &self.entries {
            if entry.values.is_empty() {
                return Err(PatternError::EmptyValueGroup {
                    key: entry.key.raw(),
                });
            }
            if entry.key.is_optional() && entry.values.len() > 1 {
                return Err(PatternError::MultipleValuesForOptionalKey {
                    key: entry.key.raw(),
                    count: entry.values.len(),
                });
            }
            entry.key.validate()?;
            for value in &entry.values {
                value.validate()?;
            }
        }
        Ok(())
    }

    /// The `containsAll` algorithm, invoked as `actual.contains_all(pattern)`.
    ///
    /// For every pattern entry, all actual keys matching the pattern key are
    /// resolved first. A missing key fails the whole match unless the pattern
    /// key is optional, in which case the entry is vacuously satisfied. The
    /// entry then holds if the value group of at least one resolved key
    /// satisfies the pattern values under the pattern's key match style.
    ///
    /// Matching is directional: a concrete actual value can satisfy a regex,
    /// schema or negated pattern value, but not in general the other way
    /// around. Only when every value on both sides is a plain literal (always
    /// the case in control-plane mode) is the relation symmetric.
    pub fn contains_all(&self, pattern: &MultiValueMatcher) -> bool {
        let control_plane = pattern.control_plane;

        for entry in &pattern.entries {
            let resolved: Vec<&MultiValueEntry> = self
                .entries
                .iter()
                .filter(|actual| entry.key.matches(actual.key.text(), control_plane))
                .collect();

            if resolved.is_empty() {
                if entry.key.is_optional() {
                    continue;
                }
                tracing::trace!("no actual key matches pattern key {:?}", entry.key.raw());
                return false;
            }

            let satisfied = resolved.iter().any(|actual| match pattern.key_style {
                KeyMatchStyle::SubSet => {
                    subset_satisfied(&entry.values, &actual.values, control_plane)
                }
                KeyMatchStyle::MatchingKey => {
                    distinct_assignment_exists(&entry.values, &actual.values, control_plane)
                }
            });

            if !satisfied {
                tracing::trace!(
                    "values for pattern key {:?} not satisfied under {:?}",
                    entry.key.raw(),
                    pattern.key_style
                );
                return false;
            }
        }

        true
    }
}

/// `SUB_SET` discipline: every pattern value finds some (possibly shared)
/// satisfying actual value.
fn subset_satisfied(
    pattern_values: &[NottableValue],
    actual_values: &[NottableValue],
    control_plane: bool,
) -> bool {
    pattern_values.iter().all(|pattern| {
        actual_values
            .iter()
            .any(|actual| pattern.matches(actual.text(), control_plane))
    })
}

/// `MATCHING_KEY` discipline: a bipartite matching assigning each pattern
/// value to a different actual value must exist. Kuhn's augmenting-path
/// search; input sizes are the value counts of a single key, so the O(V*E)
/// bound is harmless.
fn distinct_assignment_exists(
    pattern_values: &[NottableValue],
    actual_values: &[NottableValue],
    control_plane: bool,
) -> bool {
    if pattern_values.len() > actual_values.len() {
        return false;
    }

    let candidates: Vec<Vec<usize>> = pattern_values
        .iter()
        .map(|pattern| {
            actual_values
                .iter()
                .enumerate()
                .filter(|(_, actual)| pattern.matches(actual.text(), control_plane))
                .map(|(idx, _)| idx)
                .collect()
        })
        .collect();

    let mut assignment: Vec<Option<usize>> = vec![None; actual_values.len()];
    for pattern_idx in 0..pattern_values.len() {
        let mut visited = vec![false; actual_values.len()];
        if !augment(pattern_idx, &candidates, &mut assignment, &mut visited) {
            return false;
        }
    }

    true
}

fn augment(
    pattern_idx: usize,
    candidates: &[Vec<usize>],
    assignment: &mut [Option<usize>],
    visited: &mut [bool],
) -> bool {
    for &actual_idx in &candidates[pattern_idx] {
        if visited[actual_idx] {
            continue;
        }
        visited[actual_idx] = true;

        match assignment[actual_idx] {
            None => {
                assignment[actual_idx] = Some(pattern_idx);
                return true;
            }
            Some(owner) => {
                if augment(owner, candidates, assignment, visited) {
                    assignment[actual_idx] = Some(pattern_idx);
                    return true;
                }
            }
        }
    }

    false
}
