use serde::{Deserialize, Serialize};

use crate::{
    common::data::HttpStubRequest,
    matchers::{
        body::BodyMatcher,
        multi_value::{KeyMatchStyle, MultiValueMatcher},
        nottable::NottableValue,
        PatternError,
    },
};

/// The complete request-side predicate of an expectation: scalar matchers
/// for method, path, body and the secure flag, plus one
/// [`MultiValueMatcher`] per plural field. A field that was never configured
/// imposes no constraint, so an expectation narrows only what it cares
/// about.
///
/// Instances are immutable after building and shared read-only across
/// worker threads.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<NottableValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<NottableValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    headers: Option<MultiValueMatcher>,
    #[cfg(feature = "cookies")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cookies: Option<MultiValueMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    query_params: Option<MultiValueMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<BodyMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secure: Option<bool>,
    #[serde(default)]
    control_plane: bool,
}

impl RequestMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Method pattern; negatable and regex-capable like any other pattern
    /// value, so `!GET` and `P.*` both work.
    pub fn method<S: AsRef<str>>(mut self, method: S) -> Self {
        self.method = Some(NottableValue::parse(method));
        self
    }

    pub fn path<S: AsRef<str>>(mut self, path: S) -> Self {
        self.path = Some(NottableValue::parse(path));
        self
    }

    pub fn header<K: AsRef<str>, V: AsRef<str>>(mut self, name: K, value: V) -> Self {
        self.headers = Some(
            self.headers
                .take()
                .unwrap_or_else(|| MultiValueMatcher::pattern(KeyMatchStyle::SubSet))
                .with_entry(name, [value]),
        );
        self
    }

    pub fn headers_style(mut self, key_style: KeyMatchStyle) -> Self {
        self.headers = Some(
            self.headers
                .take()
                .unwrap_or_else(|| MultiValueMatcher::pattern(key_style))
                .with_key_style(key_style),
        );
        self
    }

    #[cfg(feature = "cookies")]
    pub fn cookie<K: AsRef<str>, V: AsRef<str>>(mut self, name: K, value: V) -> Self {
        self.cookies = Some(
            self.cookies
                .take()
                .unwrap_or_else(|| MultiValueMatcher::pattern(KeyMatchStyle::SubSet))
                .with_entry(name, [value]),
        );
        self
    }

    /// Query parameters default to the `MATCHING_KEY` discipline: repeated
    /// pattern values need pairwise-distinct actual parameter values.
    pub fn query_param<K: AsRef<str>, V: AsRef<str>>(mut self, name: K, value: V) -> Self {
        self.query_params = Some(
            self.query_params
                .take()
                .unwrap_or_else(|| MultiValueMatcher::pattern(KeyMatchStyle::MatchingKey))
                .with_entry(name, [value]),
        );
        self
    }

    pub fn query_params_style(mut self, key_style: KeyMatchStyle) -> Self {
        self.query_params = Some(
            self.query_params
                .take()
                .unwrap_or_else(|| MultiValueMatcher::pattern(key_style))
                .with_key_style(key_style),
        );
        self
    }

    pub fn body(mut self, body: BodyMatcher) -> Self {
        self.body = Some(body);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    /// Turns this matcher into a management-plane matcher: regex and schema
    /// patterns compare as literal text. Used by clear/retrieve selectors,
    /// which match against stored patterns rather than live traffic. Call
    /// after all fields are configured.
    pub fn into_control_plane(mut self) -> Self {
        self.control_plane = true;
        self.headers = self.headers.take().map(MultiValueMatcher::into_control_plane);
        #[cfg(feature = "cookies")]
        {
            self.cookies = self.cookies.take().map(MultiValueMatcher::into_control_plane);
        }
        self.query_params = self
            .query_params
            .take()
            .map(MultiValueMatcher::into_control_plane);
        self
    }

    pub fn is_control_plane(&self) -> bool {
        self.control_plane
    }

    /// Checks every configured pattern for registration-time errors.
    pub fn validate(&self) -> Result<(), PatternError> {
        if let Some(method) = &self.method {
            method.validate()?;
        }
        if let Some(path) = &self.path {
            path.validate()?;
        }
        if let Some(headers) = &self.headers {
            headers.validate()?;
        }
        #[cfg(feature = "cookies")]
        if let Some(cookies) = &self.cookies {
            cookies.validate()?;
        }
        if let Some(query_params) = &self.query_params {
            query_params.validate()?;
        }
        if let Some(body) = &self.body {
            body.validate()?;
        }
        Ok(())
    }

    /// Conjunction of all configured predicates against a live request.
    pub fn matches(&self, req: &HttpStubRequest) -> bool {
        if let Some(method) = &self.method {
            if !method.matches(req.method(), self.control_plane) {
                return false;
            }
        }

        if let Some(path) = &self.path {
            if !path.matches(req.path(), self.control_plane) {
                return false;
            }
        }

        if let Some(secure) = self.secure {
            if req.is_secure() != secure {
                return false;
            }
        }

        if let Some(headers) = &self.headers {
            let actual = MultiValueMatcher::from_request_data(
                req.headers().iter().map(|(k, v)| (k.as_str(), v.as_str())),
            );
            if !actual.contains_all(headers) {
                return false;
            }
        }

        #[cfg(feature = "cookies")]
        if let Some(cookies) = &self.cookies {
            let pairs = req.cookies();
            let actual = MultiValueMatcher::from_request_data(
                pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            );
            if !actual.contains_all(cookies) {
                return false;
            }
        }

        if let Some(query_params) = &self.query_params {
            let pairs = req.query_params_vec();
            let actual = MultiValueMatcher::from_request_data(
                pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            );
            if !actual.contains_all(query_params) {
                return false;
            }
        }

        if let Some(body) = &self.body {
            if !body.matches_body(req.body()) {
                return false;
            }
        }

        true
    }

    /// Matcher-vs-matcher comparison: `self` is a selector (normally built
    /// with [`into_control_plane`](Self::into_control_plane)) and `stored`
    /// is an expectation's configured matcher, whose raw pattern strings act
    /// as the candidate values. Used by clear-by-pattern and filtered
    /// retrieval.
    pub fn matches_pattern(&self, stored: &RequestMatcher) -> bool {
        if let Some(method) = &self.method {
            let candidate = stored.method.as_ref().map(NottableValue::raw).unwrap_or_default();
            if !method.matches(&candidate, self.control_plane) {
                return false;
            }
        }

        if let Some(path) = &self.path {
            let candidate = stored.path.as_ref().map(NottableValue::raw).unwrap_or_default();
            if !path.matches(&candidate, self.control_plane) {
                return false;
            }
        }

        if let Some(secure) = self.secure {
            if stored.secure != Some(secure) {
                return false;
            }
        }

        if let Some(headers) = &self.headers {
            let actual = stored
                .headers
                .as_ref()
                .map(MultiValueMatcher::as_literal_candidates)
                .unwrap_or_else(|| MultiValueMatcher::pattern(KeyMatchStyle::SubSet));
            if !actual.contains_all(headers) {
                return false;
            }
        }

        #[cfg(feature = "cookies")]
        if let Some(cookies) = &self.cookies {
            let actual = stored
                .cookies
                .as_ref()
                .map(MultiValueMatcher::as_literal_candidates)
                .unwrap_or_else(|| MultiValueMatcher::pattern(KeyMatchStyle::SubSet));
            if !actual.contains_all(cookies) {
                return false;
            }
        }

        if let Some(query_params) = &self.query_params {
            let actual = stored
                .query_params
                .as_ref()
                .map(MultiValueMatcher::as_literal_candidates)
                .unwrap_or_else(|| MultiValueMatcher::pattern(KeyMatchStyle::SubSet));
            if !actual.contains_all(query_params) {
                return false;
            }
        }

        if let Some(body) = &self.body {
            let same = match &stored.body {
                Some(stored_body) => {
                    serde_json::to_value(body).ok() == serde_json::to_value(stored_body).ok()
                }
                None => false,
            };
            if !same {
                return false;
            }
        }

        true
    }
}
