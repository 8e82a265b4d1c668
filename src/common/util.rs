/// Case-insensitive string equality with full Unicode case folding.
///
/// HTTP header names and most configured literals are ASCII, but query
/// parameter and cookie values are not guaranteed to be, so
/// `eq_ignore_ascii_case` is not enough here.
pub(crate) fn eq_ignore_case(lhs: &str, rhs: &str) -> bool {
    if lhs == rhs {
        return true;
    }

    lhs.to_lowercase() == rhs.to_lowercase()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn eq_ignore_case_matches_mixed_case() {
        assert!(eq_ignore_case("Content-Type", "content-type"));
        assert!(eq_ignore_case("ÜBERSCHALL", "überschall"));
    }

    #[test]
    fn eq_ignore_case_rejects_different_strings() {
        assert!(!eq_ignore_case("value-one", "value-two"));
        assert!(!eq_ignore_case("value", ""));
    }
}
