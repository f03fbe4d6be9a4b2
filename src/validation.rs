//! Input Validation Module
//!
//! Every name that ends up spliced into generated trigger source passes through
//! here first: entity names, element names, table names from configuration and
//! annotation paths.
//!
//! ## Rules
//!
//! 1. **Whitelist, not blacklist**: only identifier characters are allowed
//! 2. **Validate early**: the schema model is checked before analysis starts
//! 3. **Fail with context**: errors carry the parameter name and a sanitized value
//!
//! ## Usage
//!
//! ```rust
//! use changelog_triggers::validation::{validate_sql_identifier, validate_annotation_path};
//!
//! validate_sql_identifier("customer_ID", "element").unwrap();
//! validate_annotation_path("customer.address.city", "@changelog").unwrap();
//! assert!(validate_sql_identifier("x; DROP TABLE y", "element").is_err());
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::MAX_PATH_DEPTH;
use crate::error::{ChangelogError, ChangelogResult};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("identifier pattern is valid")
});

/// Longest identifier any of the supported databases accepts unquoted (HANA: 127)
const MAX_IDENTIFIER_LENGTH: usize = 127;

/// Validate a single SQL identifier (element or column name)
///
/// # Examples
///
/// ```rust
/// use changelog_triggers::validation::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("up__ID", "column").is_ok());
/// assert!(validate_sql_identifier("user-data", "column").is_err());
/// assert!(validate_sql_identifier("9lives", "column").is_err());
/// ```
pub fn validate_sql_identifier(identifier: &str, param_name: &str) -> ChangelogResult<()> {
    if identifier.is_empty() {
        return Err(ChangelogError::InvalidInput {
            parameter: param_name.to_string(),
            value: identifier.to_string(),
            reason: "Identifier cannot be empty".to_string(),
        });
    }

    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ChangelogError::InvalidInput {
            parameter: param_name.to_string(),
            value: format!("{}... ({} chars)", sanitize_for_logging(identifier), identifier.len()),
            reason: format!("Identifier too long (max {MAX_IDENTIFIER_LENGTH} characters)"),
        });
    }

    if !IDENTIFIER.is_match(identifier) {
        return Err(ChangelogError::InvalidInput {
            parameter: param_name.to_string(),
            value: sanitize_for_logging(identifier),
            reason: "Identifier must start with a letter or underscore and contain only \
                     alphanumeric characters, underscores and '$'"
                .to_string(),
        });
    }

    Ok(())
}

/// Validate a dotted name such as `sap.capire.bookshop.Books`
pub fn validate_qualified_name(name: &str, param_name: &str) -> ChangelogResult<()> {
    if name.is_empty() {
        return Err(ChangelogError::InvalidInput {
            parameter: param_name.to_string(),
            value: String::new(),
            reason: "Name cannot be empty".to_string(),
        });
    }

    for part in name.split('.') {
        validate_sql_identifier(part, param_name).map_err(|_| ChangelogError::InvalidInput {
            parameter: param_name.to_string(),
            value: sanitize_for_logging(name),
            reason: format!("Segment '{}' is not a valid identifier", sanitize_for_logging(part)),
        })?;
    }

    Ok(())
}

/// Validate an annotation field path (`title`, `customer.name`, `items.product.title`)
///
/// Depth is bounded by [`MAX_PATH_DEPTH`] association hops plus the terminal field.
pub fn validate_annotation_path(path: &str, param_name: &str) -> ChangelogResult<()> {
    validate_qualified_name(path, param_name)?;

    let depth = path.split('.').count();
    if depth > MAX_PATH_DEPTH + 1 {
        return Err(ChangelogError::InvalidInput {
            parameter: param_name.to_string(),
            value: sanitize_for_logging(path),
            reason: format!("Path too deep ({depth} segments, max {})", MAX_PATH_DEPTH + 1),
        });
    }

    Ok(())
}

/// Sanitize string for logging (truncate, remove control chars)
pub fn sanitize_for_logging(s: &str) -> String {
    let max_len = 50;
    let truncated: String = if s.chars().count() > max_len {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    } else {
        s.to_string()
    };

    truncated
        .replace('\0', "\\0")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_sql_identifier("ID", "test").is_ok());
        assert!(validate_sql_identifier("customer_ID", "test").is_ok());
        assert!(validate_sql_identifier("up__ID", "test").is_ok());
        assert!(validate_sql_identifier("_hidden", "test").is_ok());
        assert!(validate_sql_identifier("price$net", "test").is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(validate_sql_identifier("", "test").is_err());
        assert!(validate_sql_identifier("table; DROP", "test").is_err());
        assert!(validate_sql_identifier("user-data", "test").is_err());
        assert!(validate_sql_identifier("my table", "test").is_err());
        assert!(validate_sql_identifier("'admin'", "test").is_err());
        assert!(validate_sql_identifier("123table", "test").is_err());
        assert!(validate_sql_identifier(&"a".repeat(200), "test").is_err());
    }

    #[test]
    fn test_qualified_names() {
        assert!(validate_qualified_name("sap.capire.Orders", "entity").is_ok());
        assert!(validate_qualified_name("Orders", "entity").is_ok());
        assert!(validate_qualified_name("sap..Orders", "entity").is_err());
        assert!(validate_qualified_name("sap.Orders.", "entity").is_err());
        assert!(validate_qualified_name("", "entity").is_err());
    }

    #[test]
    fn test_annotation_paths() {
        assert!(validate_annotation_path("title", "path").is_ok());
        assert!(validate_annotation_path("customer.address.city", "path").is_ok());
        assert!(validate_annotation_path("customer'.name", "path").is_err());

        let deep = vec!["hop"; MAX_PATH_DEPTH + 2].join(".");
        assert!(validate_annotation_path(&deep, "path").is_err());
    }

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(sanitize_for_logging("a\nb"), "a\\nb");
        assert!(sanitize_for_logging(&"x".repeat(80)).ends_with("..."));
    }
}
