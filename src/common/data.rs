use serde::{Deserialize, Serialize};
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

#[cfg(feature = "cookies")]
use headers::{Cookie, HeaderMapExt};

/// A general abstraction of an HTTP request as seen by the stub server.
///
/// This structure carries the already-parsed fields of a live request.
/// Parsing bytes off the wire into this structure is the job of the
/// surrounding server, not of the matching engine.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HttpStubRequest {
    scheme: String,
    uri: String,
    method: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl HttpStubRequest {
    pub fn new<M: Into<String>, U: Into<String>>(method: M, uri: U) -> Self {
        Self {
            scheme: "http".to_string(),
            uri: uri.into(),
            method: method.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_scheme<S: Into<String>>(mut self, scheme: S) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body<B: Into<String>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri_str(&self) -> &str {
        &self.uri
    }

    /// The path component of the request URI, without query or fragment.
    pub fn path(&self) -> &str {
        self.uri.split(['?', '#']).next().unwrap_or(&self.uri)
    }

    /// The scheme the request was received with, either "http" or "https".
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn is_secure(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("https")
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Decoded query parameters in request order. Repeated keys are preserved
    /// as separate entries.
    pub fn query_params_vec(&self) -> Vec<(String, String)> {
        let query = self.uri.splitn(2, '?').nth(1).unwrap_or("");
        form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Cookie pairs extracted from all `Cookie` headers of the request.
    /// Headers that do not form a valid cookie header are skipped.
    #[cfg(feature = "cookies")]
    pub fn cookies(&self) -> Vec<(String, String)> {
        let mut header_map = http::HeaderMap::new();
        for (name, value) in &self.headers {
            let name = match http::header::HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => name,
                Err(err) => {
                    tracing::trace!("skipping unparseable header name {}: {}", name, err);
                    continue;
                }
            };
            let value = match http::header::HeaderValue::from_str(value) {
                Ok(value) => value,
                Err(err) => {
                    tracing::trace!("skipping unparseable header value for {}: {}", name, err);
                    continue;
                }
            };
            header_map.append(name, value);
        }

        let mut result = Vec::new();
        if let Some(cookie) = header_map.typed_get::<Cookie>() {
            for (key, value) in cookie.iter() {
                result.push((key.to_string(), value.to_string()));
            }
        }

        result
    }
}

/// How often an expectation may be matched before it is exhausted.
///
/// The remaining-uses counter is decremented with an atomic test-and-decrement
/// so that concurrent [`select`](crate::registry::ExpectationRegistry::select)
/// calls can never over-consume a limited expectation.
#[derive(Debug)]
pub struct Times {
    remaining: AtomicUsize,
    unlimited: bool,
}

impl Times {
    pub fn unlimited() -> Self {
        Self {
            remaining: AtomicUsize::new(0),
            unlimited: true,
        }
    }

    pub fn once() -> Self {
        Self::exactly(1)
    }

    pub fn exactly(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            unlimited: false,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.unlimited
    }

    /// The number of uses left, or `None` for an unlimited expectation.
    pub fn remaining(&self) -> Option<usize> {
        if self.unlimited {
            return None;
        }
        Some(self.remaining.load(Ordering::Acquire))
    }

    pub fn is_exhausted(&self) -> bool {
        !self.unlimited && self.remaining.load(Ordering::Acquire) == 0
    }

    /// Attempts to consume one use. Returns `false` if the counter already
    /// reached zero, which can happen when multiple requests race against the
    /// same limited expectation. Losing this race is normal control flow, not
    /// an error.
    pub(crate) fn try_consume(&self) -> bool {
        if self.unlimited {
            return true;
        }

        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

impl Clone for Times {
    fn clone(&self) -> Self {
        Self {
            remaining: AtomicUsize::new(self.remaining.load(Ordering::Acquire)),
            unlimited: self.unlimited,
        }
    }
}

/// How long an expectation stays eligible for matching.
#[derive(Debug, Clone, Copy)]
pub struct TimeToLive {
    deadline: Option<Instant>,
}

impl TimeToLive {
    pub fn unlimited() -> Self {
        Self { deadline: None }
    }

    pub fn ttl(duration: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + duration),
        }
    }

    pub fn expires_at(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.deadline.is_none()
    }

    /// An expectation expired at `T` is excluded from matching for any
    /// request evaluated at or after `T`.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}
