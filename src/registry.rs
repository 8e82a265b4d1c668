use std::{
    cmp::Reverse,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::{Instant, SystemTime},
};

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    common::data::{HttpStubRequest, Times, TimeToLive},
    matchers::{PatternError, RequestMatcher},
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    ValidationError(#[from] PatternError),
    #[error("no expectation found with id {0}")]
    NotFoundError(Uuid),
}

/// What an operator registers: a request pattern plus an opaque action and
/// usage/priority/TTL metadata. Turned into an [`Expectation`] by
/// [`ExpectationRegistry::add`].
#[derive(Clone, Debug)]
pub struct ExpectationDefinition {
    pub request: RequestMatcher,
    pub action: Value,
    pub priority: i64,
    pub times: Times,
    pub ttl: TimeToLive,
    pub id: Option<Uuid>,
}

impl ExpectationDefinition {
    pub fn when(request: RequestMatcher) -> Self {
        Self {
            request,
            action: Value::Null,
            priority: 0,
            times: Times::unlimited(),
            ttl: TimeToLive::unlimited(),
            id: None,
        }
    }

    /// The action is opaque to the matching engine; the action dispatcher
    /// interprets it after `select` returns.
    pub fn with_action(mut self, action: Value) -> Self {
        self.action = action;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_times(mut self, times: Times) -> Self {
        self.times = times;
        self
    }

    pub fn with_ttl(mut self, ttl: TimeToLive) -> Self {
        self.ttl = ttl;
        self
    }

    /// Registering with an id that already exists replaces the stored
    /// expectation but keeps its creation sequence, so priority ties do not
    /// reorder on update.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}

/// A live, registered expectation. The matcher and metadata are immutable;
/// the only mutable state is the remaining-uses counter inside
/// [`Times`], which is only touched through the registry's atomic consume.
#[derive(Debug)]
pub struct Expectation {
    id: Uuid,
    request: RequestMatcher,
    action: Value,
    priority: i64,
    seq: u64,
    created_at: SystemTime,
    times: Times,
    ttl: TimeToLive,
}

impl Expectation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &RequestMatcher {
        &self.request
    }

    pub fn action(&self) -> &Value {
        &self.action
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn times(&self) -> &Times {
        &self.times
    }

    pub fn ttl(&self) -> &TimeToLive {
        &self.ttl
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.ttl.is_expired(now)
    }

    pub fn is_exhausted(&self) -> bool {
        self.times.is_exhausted()
    }

    /// Eligible for `select`: neither expired nor exhausted.
    pub fn is_active(&self, now: Instant) -> bool {
        !self.is_expired(now) && !self.is_exhausted()
    }

    fn sort_key(&self) -> (Reverse<i64>, u64) {
        (Reverse(self.priority), self.seq)
    }
}

/// The live set of expectations and the prioritized selection over it.
///
/// The backing vector is kept sorted by `(priority desc, registration seq
/// asc)` at insertion time and never reordered afterwards. `select` works on
/// a copy-on-read snapshot taken under a short read lock, so matching never
/// blocks registrations for long and vice versa; the per-expectation consume
/// is atomic, which is what keeps a `times.exactly(1)` expectation from
/// being served twice under concurrent load.
pub struct ExpectationRegistry {
    expectations: RwLock<Vec<Arc<Expectation>>>,
    next_seq: AtomicU64,
}

impl Default for ExpectationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpectationRegistry {
    pub fn new() -> Self {
        Self {
            expectations: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Registers an expectation, validating all of its patterns first.
    /// Malformed patterns (unparseable schema fragments, multi-valued
    /// optional keys) are rejected here rather than discovered lazily during
    /// matching.
    pub fn add(&self, definition: ExpectationDefinition) -> Result<Uuid, Error> {
        definition.request.validate()?;

        let id = definition.id.unwrap_or_else(Uuid::new_v4);
        let mut expectations = self.expectations.write().unwrap();

        // Upsert: keep the original sequence and creation time so equal
        // priorities keep their registration order across updates.
        let (seq, created_at) = match expectations.iter().position(|e| e.id == id) {
            Some(idx) => {
                let previous = expectations.remove(idx);
                tracing::debug!("updating expectation id={}", id);
                (previous.seq, previous.created_at)
            }
            None => (
                self.next_seq.fetch_add(1, Ordering::Relaxed),
                SystemTime::now(),
            ),
        };

        let expectation = Arc::new(Expectation {
            id,
            request: definition.request,
            action: definition.action,
            priority: definition.priority,
            seq,
            created_at,
            times: definition.times,
            ttl: definition.ttl,
        });

        let at = expectations.partition_point(|e| e.sort_key() < expectation.sort_key());
        expectations.insert(at, expectation);

        tracing::debug!("added expectation id={} at position {}", id, at);
        Ok(id)
    }

    /// Finds the highest-priority active expectation matching the request and
    /// atomically consumes one use of it.
    ///
    /// Candidates are walked in `(priority desc, registered asc)` order.
    /// Expired, exhausted and non-matching candidates are skipped without
    /// side effects. A matching candidate whose remaining-uses counter is
    /// emptied by a concurrent request loses the consume race and matching
    /// simply continues with the next candidate.
    pub fn select(&self, req: &HttpStubRequest) -> Option<Arc<Expectation>> {
        let snapshot: Vec<Arc<Expectation>> = self.expectations.read().unwrap().clone();
        let now = Instant::now();

        for expectation in snapshot {
            if expectation.is_expired(now) {
                tracing::trace!("skipping expired expectation id={}", expectation.id);
                continue;
            }
            if expectation.is_exhausted() {
                tracing::trace!("skipping exhausted expectation id={}", expectation.id);
                continue;
            }
            if !expectation.request.matches(req) {
                continue;
            }
            if expectation.times.try_consume() {
                tracing::debug!(
                    "matched expectation id={} to request {} {}",
                    expectation.id,
                    req.method(),
                    req.uri_str()
                );
                return Some(expectation);
            }
            tracing::trace!(
                "expectation id={} exhausted concurrently, trying next candidate",
                expectation.id
            );
        }

        tracing::debug!(
            "no expectation matched request {} {}",
            req.method(),
            req.uri_str()
        );
        None
    }

    /// Looks up an expectation by id for retrieval/audit. Exhausted and
    /// expired expectations stay addressable here until explicitly cleared.
    pub fn retrieve(&self, id: Uuid) -> Option<Arc<Expectation>> {
        self.expectations
            .read()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// All active expectations in selection order, optionally narrowed to
    /// those whose stored pattern matches the given selector. The selector
    /// compares patterns literally (control-plane mode).
    pub fn retrieve_active(&self, selector: Option<&RequestMatcher>) -> Vec<Arc<Expectation>> {
        let selector = selector.map(|s| s.clone().into_control_plane());
        let now = Instant::now();

        self.expectations
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.is_active(now))
            .filter(|e| match &selector {
                Some(selector) => selector.matches_pattern(&e.request),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Removes the expectation with the given id.
    pub fn clear_by_id(&self, id: Uuid) -> Result<(), Error> {
        let mut expectations = self.expectations.write().unwrap();
        match expectations.iter().position(|e| e.id == id) {
            Some(idx) => {
                expectations.remove(idx);
                tracing::debug!("cleared expectation id={}", id);
                Ok(())
            }
            None => Err(Error::NotFoundError(id)),
        }
    }

    /// Removes every expectation whose stored pattern matches the selector,
    /// comparing patterns literally. Returns the number of removed
    /// expectations.
    pub fn clear_matching(&self, selector: &RequestMatcher) -> usize {
        let selector = selector.clone().into_control_plane();
        let mut expectations = self.expectations.write().unwrap();
        let before = expectations.len();
        expectations.retain(|e| !selector.matches_pattern(&e.request));
        let removed = before - expectations.len();

        tracing::debug!("cleared {} expectation(s) by pattern", removed);
        removed
    }

    /// Removes all expectations.
    pub fn reset(&self) {
        let mut expectations = self.expectations.write().unwrap();
        expectations.clear();
        tracing::debug!("reset expectation registry");
    }

    pub fn len(&self) -> usize {
        self.expectations.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expectations.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn definition(path: &str) -> ExpectationDefinition {
        ExpectationDefinition::when(RequestMatcher::new().path(path))
            .with_action(json!({ "status": 200 }))
    }

    #[test]
    fn add_rejects_malformed_patterns() {
        let registry = ExpectationRegistry::new();
        let bad = ExpectationDefinition::when(
            RequestMatcher::new().header("key", "{ not a schema"),
        );
        assert!(matches!(
            registry.add(bad),
            Err(Error::ValidationError(PatternError::InvalidSchema { .. }))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn select_returns_first_registered_on_equal_priority() {
        let registry = ExpectationRegistry::new();
        let first = registry
            .add(definition("/a").with_action(json!("first")))
            .unwrap();
        registry
            .add(definition("/a").with_action(json!("second")))
            .unwrap();

        let selected = registry
            .select(&HttpStubRequest::new("GET", "/a"))
            .expect("expected a match");
        assert_eq!(selected.id(), first);
        assert_eq!(selected.action(), &json!("first"));
    }

    #[test]
    fn higher_priority_wins_regardless_of_registration_order() {
        let registry = ExpectationRegistry::new();
        registry
            .add(definition("/a").with_action(json!("low")))
            .unwrap();
        let high = registry
            .add(definition("/a").with_priority(10).with_action(json!("high")))
            .unwrap();

        for _ in 0..3 {
            let selected = registry
                .select(&HttpStubRequest::new("GET", "/a"))
                .expect("expected a match");
            assert_eq!(selected.id(), high);
        }
    }

    #[test]
    fn exhausted_expectation_falls_through_to_next_candidate() {
        let registry = ExpectationRegistry::new();
        let limited = registry
            .add(
                definition("/a")
                    .with_priority(10)
                    .with_times(Times::once()),
            )
            .unwrap();
        let fallback = registry.add(definition("/a")).unwrap();

        let req = HttpStubRequest::new("GET", "/a");
        assert_eq!(registry.select(&req).map(|e| e.id()), Some(limited));
        assert_eq!(registry.select(&req).map(|e| e.id()), Some(fallback));
        assert_eq!(registry.select(&req).map(|e| e.id()), Some(fallback));
    }

    #[test]
    fn exhausted_expectation_remains_retrievable_until_cleared() {
        let registry = ExpectationRegistry::new();
        let id = registry
            .add(definition("/a").with_times(Times::once()))
            .unwrap();

        registry.select(&HttpStubRequest::new("GET", "/a")).unwrap();
        assert!(registry.select(&HttpStubRequest::new("GET", "/a")).is_none());

        let audited = registry.retrieve(id).expect("still addressable");
        assert!(audited.is_exhausted());
        assert_eq!(audited.times().remaining(), Some(0));
        assert!(registry.retrieve_active(None).is_empty());

        registry.clear_by_id(id).unwrap();
        assert!(registry.retrieve(id).is_none());
    }

    #[test]
    fn expired_expectation_is_excluded_even_with_remaining_uses() {
        let registry = ExpectationRegistry::new();
        registry
            .add(
                definition("/a")
                    .with_times(Times::exactly(5))
                    .with_ttl(TimeToLive::expires_at(Instant::now())),
            )
            .unwrap();

        assert!(registry.select(&HttpStubRequest::new("GET", "/a")).is_none());
    }

    #[test]
    fn upsert_keeps_registration_order() {
        let registry = ExpectationRegistry::new();
        let first = registry.add(definition("/a")).unwrap();
        registry.add(definition("/a")).unwrap();

        // Updating the first expectation must not move it behind the second.
        registry
            .add(definition("/a").with_id(first).with_action(json!("updated")))
            .unwrap();

        let selected = registry
            .select(&HttpStubRequest::new("GET", "/a"))
            .expect("expected a match");
        assert_eq!(selected.id(), first);
        assert_eq!(selected.action(), &json!("updated"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn clear_by_id_reports_unknown_ids() {
        let registry = ExpectationRegistry::new();
        let unknown = Uuid::new_v4();
        assert!(matches!(
            registry.clear_by_id(unknown),
            Err(Error::NotFoundError(id)) if id == unknown
        ));
    }

    #[test]
    fn clear_matching_removes_by_stored_pattern() {
        let registry = ExpectationRegistry::new();
        registry.add(definition("/users/[0-9]+")).unwrap();
        registry.add(definition("/users/[0-9]+")).unwrap();
        let kept = registry.add(definition("/health")).unwrap();

        let removed =
            registry.clear_matching(&RequestMatcher::new().path("/users/[0-9]+"));
        assert_eq!(removed, 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.retrieve_active(None)[0].id(), kept);
    }

    #[test]
    fn retrieve_active_filters_by_selector() {
        let registry = ExpectationRegistry::new();
        registry.add(definition("/a")).unwrap();
        registry.add(definition("/b")).unwrap();

        let matching = registry.retrieve_active(Some(&RequestMatcher::new().path("/a")));
        assert_eq!(matching.len(), 1);

        let all = registry.retrieve_active(None);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn reset_clears_everything() {
        let registry = ExpectationRegistry::new();
        registry.add(definition("/a")).unwrap();
        registry.add(definition("/b")).unwrap();
        registry.reset();
        assert!(registry.is_empty());
    }
}
