//! Configuration: compile-time limits and the tracking configuration surface
//!
//! The configuration is loaded by the host (CLI, deployment harness) and is
//! read-only here. It only gates *what* gets generated; it never changes the
//! shape of a change record.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ChangelogError, ChangelogResult};
use crate::validation::validate_qualified_name;

/// Rendered values longer than this are truncated
pub const MAX_VALUE_LENGTH: usize = 5000;

/// Characters kept from an over-long value before the ellipsis marker
pub const TRUNCATED_LENGTH: usize = 4997;

/// Marker appended to truncated values
pub const ELLIPSIS: &str = "...";

/// Separator between the parts of a composite key or composite foreign key
pub const KEY_SEPARATOR: &str = "||";

/// Separator between object identifier and label fragments
pub const OBJECT_ID_SEPARATOR: &str = ", ";

/// Maximum number of association hops in one annotation path
/// Prevents runaway nesting of correlated sub-selects
pub const MAX_PATH_DEPTH: usize = 8;

/// Conventional name of the back-reference association from a composition child to its parent
pub const BACK_REFERENCE_FIELD: &str = "up_";

/// Default fact table receiving change rows
pub const DEFAULT_CHANGES_TABLE: &str = "sap.changelog.Changes";

/// Default header table
pub const DEFAULT_CHANGELOG_TABLE: &str = "sap.changelog.ChangeLog";

/// Tracking configuration surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingConfig {
    pub disable_create_tracking: bool,
    pub disable_update_tracking: bool,
    pub disable_delete_tracking: bool,
    /// Keep prior history on delete and append delete-transition records
    pub preserve_deletes: bool,
    /// Keep entity names verbatim as quoted identifiers instead of folding them
    pub quoted_identifiers: bool,
    /// Treat a composition child without a resolvable root as a modeling error
    pub strict_root_binding: bool,
    pub changes_table: String,
    pub change_log_table: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            disable_create_tracking: false,
            disable_update_tracking: false,
            disable_delete_tracking: false,
            preserve_deletes: false,
            quoted_identifiers: false,
            strict_root_binding: false,
            changes_table: DEFAULT_CHANGES_TABLE.to_string(),
            change_log_table: DEFAULT_CHANGELOG_TABLE.to_string(),
        }
    }
}

/// How a delete is reflected in the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeleteMode {
    /// Remove prior history for the deleted key
    Cascade,
    /// Keep prior history and append delete-transition records
    Preserve,
}

impl TrackingConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> ChangelogResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ChangelogError::ConfigError {
            setting: "<document>".to_string(),
            value: String::new(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> ChangelogResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ChangelogError::ConfigError {
            setting: "<file>".to_string(),
            value: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> ChangelogResult<()> {
        for (setting, value) in [
            ("changesTable", &self.changes_table),
            ("changeLogTable", &self.change_log_table),
        ] {
            validate_qualified_name(value, setting).map_err(|e| ChangelogError::ConfigError {
                setting: setting.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            })?;
        }

        if self.changes_table == self.change_log_table {
            return Err(ChangelogError::ConfigError {
                setting: "changeLogTable".to_string(),
                value: self.change_log_table.clone(),
                reason: "header and fact table must differ".to_string(),
            });
        }

        Ok(())
    }

    pub const fn delete_mode(&self) -> DeleteMode {
        if self.preserve_deletes {
            DeleteMode::Preserve
        } else {
            DeleteMode::Cascade
        }
    }

    /// True when no operation is tracked at all
    pub const fn tracks_nothing(&self) -> bool {
        self.disable_create_tracking && self.disable_update_tracking && self.disable_delete_tracking
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::testing::{assert_error_contains, assert_error_sqlstate};

    #[test]
    fn test_default_config() {
        let config = TrackingConfig::default();
        assert!(!config.preserve_deletes);
        assert_eq!(config.delete_mode(), DeleteMode::Cascade);
        assert_eq!(config.changes_table, "sap.changelog.Changes");
        assert!(!config.tracks_nothing());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = TrackingConfig::from_json_str(
            r#"{"preserveDeletes": true, "disableUpdateTracking": true}"#,
        )
        .unwrap();

        assert!(config.preserve_deletes);
        assert!(config.disable_update_tracking);
        assert!(!config.disable_create_tracking);
        assert_eq!(config.delete_mode(), DeleteMode::Preserve);
        assert_eq!(config.change_log_table, DEFAULT_CHANGELOG_TABLE);
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        let result = TrackingConfig::from_json_str(r#"{"changesTable": "Changes; DROP"}"#);
        assert_error_sqlstate(result, "F0000");
    }

    #[test]
    fn test_same_tables_rejected() {
        let result = TrackingConfig::from_json_str(
            r#"{"changesTable": "audit.Log", "changeLogTable": "audit.Log"}"#,
        );
        assert_error_contains(result, "must differ");
    }

    #[test]
    fn test_malformed_document_rejected() {
        let result = TrackingConfig::from_json_str(r#"{"preserveDeletes": "yes"}"#);
        assert_error_sqlstate(result, "F0000");
    }

    #[test]
    fn test_limits_are_consistent() {
        assert_eq!(TRUNCATED_LENGTH + ELLIPSIS.len(), MAX_VALUE_LENGTH);
    }
}
