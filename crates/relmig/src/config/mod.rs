//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use crate::reconcile::ReconcileOptions;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// SHA-256 of the serialized configuration, used to sign migration scripts.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Target schema for objects of a source schema.
    ///
    /// An explicit `schema_map` entry wins; otherwise the source schema is kept
    /// (lower-cased) when `add_user_schema` is set, else the target default.
    pub fn target_schema_for(&self, source_schema: &str) -> String {
        ReconcileOptions::from_config(self).target_owner(source_schema)
    }

    /// Whether a source schema is selected for migration.
    pub fn schema_selected(&self, schema: &str) -> bool {
        self.source.schemas.is_empty()
            || self
                .source
                .schemas
                .iter()
                .any(|s| s.eq_ignore_ascii_case(schema))
    }
}
