//! Configuration validation.

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.kind.trim().is_empty() {
        return Err(MigrateError::Config("source.kind is required".into()));
    }
    if config.source.kind == "dump" && config.source.path.is_none() {
        return Err(MigrateError::Config(
            "source.path is required for dump sources".into(),
        ));
    }
    for schema in &config.source.schemas {
        validate_identifier(schema)?;
    }

    // Target validation
    if config.target.output_dir.as_os_str().is_empty() {
        return Err(MigrateError::Config("target.output_dir is required".into()));
    }
    if config.target.prefix.is_empty() || config.target.prefix.contains(['/', '\\']) {
        return Err(MigrateError::Config(format!(
            "target.prefix must be a plain file name prefix, got '{}'",
            config.target.prefix
        )));
    }
    validate_identifier(&config.target.schema)?;

    // Migration config validation - only check if explicitly set
    let migration = &config.migration;
    if let Some(0) = migration.export_threads {
        return Err(MigrateError::Config(
            "migration.export_threads must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.import_threads {
        return Err(MigrateError::Config(
            "migration.import_threads must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.parallel_readers {
        return Err(MigrateError::Config(
            "migration.parallel_readers must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.commit_count {
        return Err(MigrateError::Config(
            "migration.commit_count must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.max_count_per_file {
        return Err(MigrateError::Config(
            "migration.max_count_per_file must be at least 1".into(),
        ));
    }
    if let Some(f) = migration.memory_fraction {
        if !(f > 0.0 && f <= 1.0) {
            return Err(MigrateError::Config(format!(
                "migration.memory_fraction must be in (0, 1], got {}",
                f
            )));
        }
    }
    for (from, to) in &migration.schema_map {
        validate_identifier(from)?;
        validate_identifier(to)?;
    }

    Ok(())
}
