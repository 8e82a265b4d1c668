pub(crate) mod body;
pub(crate) mod multi_value;
pub(crate) mod nottable;
pub(crate) mod request;

pub use body::BodyMatcher;
pub use multi_value::{KeyMatchStyle, MultiValueMatcher};
pub use nottable::NottableValue;
pub use request::RequestMatcher;

/// Errors produced while validating a configured pattern.
///
/// These surface at registration time through
/// [`ExpectationRegistry::add`](crate::registry::ExpectationRegistry::add),
/// never lazily during matching.
#[derive(thiserror::Error, Debug)]
pub enum PatternError {
    #[error("invalid JSON schema pattern {raw:?}: {reason}")]
    InvalidSchema { raw: String, reason: String },
    #[error("multiple values for optional key are not allowed, key {key:?} has {count} values")]
    MultipleValuesForOptionalKey { key: String, count: usize },
    #[error("value group for key {key:?} is empty")]
    EmptyValueGroup { key: String },
}
