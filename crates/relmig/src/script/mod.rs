//! Persisted migration script: the reconciled intent set and target graph,
//! reloadable without re-fetching the source.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::core::traits::TypeTransform;
use crate::error::{MigrateError, Result};
use crate::reconcile::{Reconciler, ReconcilerState};

type HmacSha256 = Hmac<Sha256>;

/// A saved migration plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationScript {
    /// Unique script identifier, reused as the run id.
    pub run_id: String,

    /// SHA256 hash of the configuration the script was planned with.
    pub config_hash: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub state: ReconcilerState,

    /// HMAC-SHA256 over the script without this field, keyed by `config_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

impl MigrationScript {
    pub fn new(config_hash: impl Into<String>, reconciler: &Reconciler) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            config_hash: config_hash.into(),
            created_at: now,
            updated_at: now,
            state: reconciler.state(),
            hmac: None,
        }
    }

    /// Replace the saved state with the reconciler's current state.
    pub fn update(&mut self, reconciler: &Reconciler) {
        self.state = reconciler.state();
        self.updated_at = Utc::now();
    }

    fn compute_hmac(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.hmac = None;

        let content = serde_json::to_string(&unsigned)
            .map_err(|e| MigrateError::Script(format!("Failed to serialize script for HMAC: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::Script(format!("Failed to create HMAC: {}", e)))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load a script and check its signature.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let script: Self = serde_json::from_str(&content)?;

        let Some(stored) = &script.hmac else {
            return Err(MigrateError::Script("script is not signed".into()));
        };
        if stored != &script.compute_hmac()? {
            return Err(MigrateError::Script(
                "integrity check failed: HMAC mismatch (script edited outside relmig)".into(),
            ));
        }
        debug!("Loaded migration script {}", script.run_id);
        Ok(script)
    }

    /// Sign and save (atomic write).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.hmac = Some(self.compute_hmac()?);

        let content = serde_json::to_string_pretty(self)?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;
        debug!("Saved migration script to {}", path.display());
        Ok(())
    }

    /// The script must have been planned with the same configuration.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(MigrateError::ScriptChanged);
        }
        Ok(())
    }

    /// Rebuild the reconciler from the saved state.
    pub fn reconciler(&self, transform: Arc<dyn TypeTransform>) -> Reconciler {
        Reconciler::from_state(self.state.clone(), transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::{Column, ObjectGraph, Schema, Table};
    use crate::reconcile::ReconcileOptions;
    use crate::typemap::GenericTransform;

    fn reconciler() -> Reconciler {
        let graph = ObjectGraph::new("DB", "dump").with_schema(
            Schema::new("HR").with_table(
                Table::new("HR", "EMP")
                    .with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
                    .with_primary_key("PK_EMP", &["ID"]),
            ),
        );
        let mut r = Reconciler::new(ReconcileOptions::default(), Arc::new(GenericTransform::new()));
        r.attach_graph(graph).unwrap();
        r.reconcile(true).unwrap();
        r
    }

    #[test]
    fn test_save_load_round_trip_keeps_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mig_script.json");

        let mut r = reconciler();
        let mut script = MigrationScript::new("hash-1", &r);
        r.retarget_table("HR", "EMP", None, "employees").unwrap();
        script.update(&r);
        script.save(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let loaded = MigrationScript::load(&path).unwrap();
        assert_eq!(loaded.run_id, script.run_id);
        loaded.validate_config("hash-1").unwrap();
        let restored = loaded.reconciler(Arc::new(GenericTransform::new()));
        assert!(restored.target_table("public", "employees").is_some());
        assert_eq!(restored.state(), r.state());
    }

    #[test]
    fn test_tampered_script_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mig_script.json");
        let mut script = MigrationScript::new("hash-1", &reconciler());
        script.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(&script.run_id));
        std::fs::write(&path, content.replace(&script.run_id, "tampered")).unwrap();
        assert!(matches!(
            MigrationScript::load(&path),
            Err(MigrateError::Script(_))
        ));
    }

    #[test]
    fn test_config_change_detected() {
        let script = MigrationScript::new("hash-1", &reconciler());
        assert!(matches!(
            script.validate_config("hash-2"),
            Err(MigrateError::ScriptChanged)
        ));
    }
}
