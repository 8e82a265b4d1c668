//! `httpstub` is the expectation matching core of a programmable HTTP
//! stub/mock and intercepting proxy server. Operators register
//! *expectations* (a request pattern paired with an opaque action plus
//! usage, priority and time-to-live metadata) and, for every inbound
//! request, the engine decides which expectation applies.
//!
//! The crate contains two major components:
//!
//! * the **matchers**: a general-purpose, case-insensitive, negatable,
//!   optional-aware, regex- and JSON-schema-capable pattern machinery
//!   ([`NottableValue`], [`MultiValueMatcher`], [`BodyMatcher`],
//!   [`RequestMatcher`]), and
//! * the **registry** ([`ExpectationRegistry`]): prioritized selection over
//!   the live expectation set with race-free consumption of use-limited
//!   expectations.
//!
//! Everything around this core (socket I/O, TLS, the CONNECT relay, action
//! execution, wire serialization and the management HTTP surface) lives in
//! the surrounding server and talks to this crate through plain function
//! calls.
//!
//! # Pattern strings
//!
//! Pattern strings carry their modifiers inline, compatible with existing
//! expectation JSON documents:
//!
//! * a leading `!` negates the pattern (`!GET` matches anything but `GET`),
//! * a leading `?` marks a map key optional (the entry matches vacuously
//!   when the key is absent),
//! * text starting with `{` is compiled as a JSON schema and validates the
//!   candidate value,
//! * anything else matches as a case-insensitive anchored regex, falling
//!   back to case-insensitive literal equality when it does not compile.
//!
//! # Example
//!
//! ```rust
//! use httpstub::prelude::*;
//! use serde_json::json;
//!
//! let registry = ExpectationRegistry::new();
//!
//! registry
//!     .add(
//!         ExpectationDefinition::when(
//!             RequestMatcher::new()
//!                 .method("GET")
//!                 .path("/users/[0-9]+")
//!                 .header("accept", "application/json"),
//!         )
//!         .with_action(json!({ "status": 200 }))
//!         .with_times(Times::once()),
//!     )
//!     .unwrap();
//!
//! let request = HttpStubRequest::new("GET", "/users/42")
//!     .with_header("Accept", "application/json");
//!
//! let expectation = registry.select(&request).expect("should match");
//! assert_eq!(expectation.action(), &json!({ "status": 200 }));
//!
//! // times.exactly(1) is consumed, the second request finds no match.
//! assert!(registry.select(&request).is_none());
//! ```
//!
//! # Concurrency
//!
//! Matchers are immutable after construction and freely shared across
//! worker threads. The only mutable shared state is each expectation's
//! remaining-uses counter and the registry's membership; consumption is an
//! atomic test-and-decrement, so under N concurrent requests racing against
//! a `times.exactly(1)` expectation exactly one wins and the rest fall
//! through to the next candidate.
//!
//! # Debugging
//!
//! `httpstub` logs through the `tracing` crate. Enable a subscriber with an
//! environment filter such as `httpstub=trace` to see per-candidate
//! matching decisions.

mod common;
mod matchers;
mod registry;

pub use common::data::{HttpStubRequest, Times, TimeToLive};
pub use matchers::{
    BodyMatcher, KeyMatchStyle, MultiValueMatcher, NottableValue, PatternError, RequestMatcher,
};
pub use registry::{Error, Expectation, ExpectationDefinition, ExpectationRegistry};

pub mod prelude {
    pub use crate::{
        BodyMatcher, Expectation, ExpectationDefinition, ExpectationRegistry, HttpStubRequest,
        KeyMatchStyle, MultiValueMatcher, NottableValue, RequestMatcher, Times, TimeToLive,
    };
}
