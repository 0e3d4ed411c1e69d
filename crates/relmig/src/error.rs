//! Error types for the migration library.

use thiserror::Error;

/// Main error type for reconciliation and pipeline operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad identifiers, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// An API was called in an order that violates reconciler invariants.
    #[error("Invalid sequencing: {0}")]
    Sequencing(String),

    /// A rename/retarget referenced an object that cannot be resolved.
    #[error("Cannot resolve {kind} '{name}'")]
    Resolution { kind: String, name: String },

    /// A rename would collide with a name already in use.
    #[error("Name conflict: {0}")]
    NameConflict(String),

    /// A single value could not be converted to its target type.
    #[error("Conversion failed for {table}.{column}: {message}")]
    Conversion {
        table: String,
        column: String,
        message: String,
    },

    /// Source or target cannot be reached.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Migration script error (integrity, format)
    #[error("Migration script error: {0}")]
    Script(String),

    /// Config hash mismatch when reloading a script
    #[error("Config has changed since the migration script was written - re-run plan")]
    ScriptChanged,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV output error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Resolution error for an object of the given kind.
    pub fn resolution(kind: impl Into<String>, name: impl Into<String>) -> Self {
        MigrateError::Resolution {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Conversion error
    pub fn conversion(
        table: impl Into<String>,
        column: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        MigrateError::Conversion {
            table: table.into(),
            column: column.into(),
            message: message.into(),
        }
    }

    /// Whether this error affects a single record only.
    ///
    /// Record-level errors are logged and skipped; everything else fails
    /// the task that raised it.
    pub fn is_record_level(&self) -> bool {
        matches!(self, MigrateError::Conversion { .. } | MigrateError::Csv(_))
    }

    /// Whether this error is a programming-sequence error (caller bug).
    pub fn is_sequencing(&self) -> bool {
        matches!(self, MigrateError::Sequencing(_))
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Sequencing(_)
            | MigrateError::Resolution { .. }
            | MigrateError::NameConflict(_) => 3,
            MigrateError::Connectivity(_) => 4,
            MigrateError::Script(_) | MigrateError::ScriptChanged => 5,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_level_classification() {
        assert!(MigrateError::conversion("t", "c", "bad").is_record_level());
        assert!(!MigrateError::Connectivity("down".into()).is_record_level());
        assert!(!MigrateError::transfer("t", "disk full").is_record_level());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 2);
        assert_eq!(MigrateError::Sequencing("x".into()).exit_code(), 3);
        assert_eq!(MigrateError::resolution("table", "a.b").exit_code(), 3);
        assert_eq!(MigrateError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.json");
        let err = MigrateError::from(io);
        let text = err.format_detailed();
        assert!(text.starts_with("Error: IO error"));
        assert!(text.contains("missing.json"));
    }
}
