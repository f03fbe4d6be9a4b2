use thiserror::Error;

#[cfg(test)]
pub mod testing;

/// Main error type for changelog trigger synthesis
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChangelogError {
    // ============ Model Errors (42xxx) ============
    /// Entity is not part of the schema model
    #[error("Entity '{entity}' not found in schema model")]
    EntityNotFound {
        entity: String,
    },

    /// Schema model is structurally invalid
    #[error("Invalid schema model at '{location}': {reason}")]
    InvalidModel {
        location: String,
        reason: String,
    },

    /// Two sources declare incompatible tracking annotations for one element
    #[error(
        "Conflicting @changelog annotations for '{entity}.{element}': \
         {first_source} declares [{first}], {second_source} declares [{second}]"
    )]
    ConflictingAnnotation {
        entity: String,
        element: String,
        first_source: String,
        first: String,
        second_source: String,
        second: String,
    },

    /// A composition child has no resolvable owning root (strict mode only)
    #[error("No root binding for composition child '{entity}' (root '{root}')")]
    MissingRootBinding {
        entity: String,
        root: String,
    },

    // ============ Input Errors (22xxx) ============
    /// Identifier or annotation path rejected by validation
    #[error("Invalid {parameter} '{value}': {reason}")]
    InvalidInput {
        parameter: String,
        value: String,
        reason: String,
    },

    // ============ Backend Errors (0A000) ============
    /// No generator registered for the requested database kind
    #[error("Unsupported backend '{backend}' (registered: {registered})")]
    UnsupportedBackend {
        backend: String,
        registered: String,
    },

    // ============ Deployment Errors (55xxx) ============
    /// Executing a generated statement failed
    #[error("Deployment of '{artifact}' failed: {reason}")]
    DeploymentFailed {
        artifact: String,
        reason: String,
    },

    // ============ I/O and System Errors (XX000) ============
    /// Configuration error
    #[error("Configuration error for '{setting}': {reason} (value: {value})")]
    ConfigError {
        setting: String,
        value: String,
        reason: String,
    },

    /// Serialization/deserialization failed
    #[error("Serialization error: {message}")]
    SerializationError {
        message: String,
    },

    /// Internal error (bug in the generator)
    #[error("Internal error at {file}:{line}: {message}\nPlease report this bug.")]
    InternalError {
        message: String,
        file: &'static str,
        line: u32,
    },
}

impl ChangelogError {
    /// SQLSTATE-style code for this error, used when raising through the extension surface
    pub fn sqlstate(&self) -> &'static str {
        use ChangelogError::*;
        match self {
            EntityNotFound { .. } => "42P01",  // Undefined table
            InvalidModel { .. } => "42P17",    // Invalid object definition
            ConflictingAnnotation { .. } => "42P09", // Ambiguous alias
            MissingRootBinding { .. } => "42830",    // Invalid foreign key

            InvalidInput { .. } => "22023", // Invalid parameter value

            UnsupportedBackend { .. } => "0A000", // Feature not supported

            DeploymentFailed { .. } => "55000", // Object not in prerequisite state

            ConfigError { .. } => "F0000",
            SerializationError { .. } => "XX000",
            InternalError { .. } => "XX000",
        }
    }

    /// Create internal error with file/line info
    pub fn internal(message: String, file: &'static str, line: u32) -> Self {
        ChangelogError::InternalError { message, file, line }
    }

    /// Whether this error aborts generation for the whole run rather than one entity
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            ChangelogError::UnsupportedBackend { .. }
                | ChangelogError::ConfigError { .. }
                | ChangelogError::InternalError { .. }
        )
    }
}

/// Result type for changelog operations
pub type ChangelogResult<T> = Result<T, ChangelogError>;

impl From<serde_json::Error> for ChangelogError {
    fn from(e: serde_json::Error) -> Self {
        ChangelogError::SerializationError {
            message: format!("JSON serialization error: {e}"),
        }
    }
}

impl From<bincode::Error> for ChangelogError {
    fn from(e: bincode::Error) -> Self {
        ChangelogError::SerializationError {
            message: format!("Binary serialization error: {e}"),
        }
    }
}

impl From<regex::Error> for ChangelogError {
    fn from(e: regex::Error) -> Self {
        ChangelogError::internal(format!("Regex compilation failed: {e}"), file!(), line!())
    }
}

impl From<std::io::Error> for ChangelogError {
    fn from(e: std::io::Error) -> Self {
        ChangelogError::SerializationError {
            message: format!("I/O error: {e}"),
        }
    }
}

/// Helper macro for creating internal errors with automatic file/line
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::ChangelogError::internal($msg.to_string(), file!(), line!())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ChangelogError::internal(format!($fmt, $($arg)*), file!(), line!())
    };
}
