//! Assertions over `ChangelogResult` for unit tests

use super::ChangelogError;
use crate::ChangelogResult;

/// The error of `result`
///
/// # Panics
/// Panics if the result is `Ok`.
pub fn expect_error<T>(result: ChangelogResult<T>) -> ChangelogError {
    match result {
        Err(e) => e,
        Ok(_) => panic!("expected a ChangelogError, but the operation succeeded"),
    }
}

/// Assert the error of a result matches a `ChangelogError` pattern; evaluates to the error
///
/// ```ignore
/// let e = assert_error_matches!(analyze(&model, "Nope", &config), ChangelogError::EntityNotFound { .. });
/// ```
macro_rules! assert_error_matches {
    ($result:expr, $pattern:pat $(if $guard:expr)?) => {{
        let error = $crate::error::testing::expect_error($result);
        assert!(
            matches!(&error, $pattern $(if $guard)?),
            "unexpected error variant: {error:?}"
        );
        error
    }};
}

pub(crate) use assert_error_matches;

pub fn assert_error_sqlstate<T>(result: ChangelogResult<T>, expected_sqlstate: &str) {
    let e = expect_error(result);
    assert_eq!(
        e.sqlstate(),
        expected_sqlstate,
        "expected SQLSTATE {expected_sqlstate}, got {}: {e}",
        e.sqlstate()
    );
}

pub fn assert_error_contains<T>(result: ChangelogResult<T>, expected_substring: &str) {
    let message = expect_error(result).to_string();
    assert!(
        message.contains(expected_substring),
        "error message '{message}' does not contain '{expected_substring}'"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing() -> ChangelogResult<()> {
        Err(ChangelogError::EntityNotFound {
            entity: "shop.Nope".to_string(),
        })
    }

    #[test]
    fn test_matches_variant_and_returns_error() {
        let e = assert_error_matches!(missing(), ChangelogError::EntityNotFound { .. });
        assert_eq!(e.sqlstate(), "42P01");
        assert_error_matches!(missing(), ChangelogError::EntityNotFound { entity } if entity == "shop.Nope");
    }

    #[test]
    #[should_panic(expected = "unexpected error variant")]
    fn test_other_variant_panics() {
        assert_error_matches!(missing(), ChangelogError::InvalidModel { .. });
    }

    #[test]
    #[should_panic(expected = "operation succeeded")]
    fn test_ok_panics() {
        expect_error(Ok::<_, ChangelogError>(1));
    }
}
