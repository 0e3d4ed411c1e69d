//! # relmig
//!
//! Schema and data migration engine.
//!
//! The library reconciles two object graphs, "what exists at the source" and
//! "what should be created at the target", and drives a concurrent
//! export/import pipeline that writes the target as schema files and
//! delimited data files:
//!
//! - **Reconciliation** of renames, schema remaps, N:1 table merges and
//!   duplicate-name disambiguation ([`reconcile`])
//! - **Task scheduling** of DDL and data phases ([`scheduler`])
//! - **Bounded export/import pools** with commit batching, file rotation,
//!   merge gating and per-record error isolation ([`pipeline`])
//! - **Migration scripts** saved as signed JSON and reloaded without
//!   re-fetching the source ([`script`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use relmig::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> relmig::Result<()> {
//!     let config = Config::load("relmig.yaml")?;
//!     let orchestrator = Orchestrator::new(config)?;
//!     let result = orchestrator.migrate(CancellationToken::new()).await?;
//!     println!("Migrated {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod reconcile;
pub mod scheduler;
pub mod script;
pub mod source;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, OutputFormat, SourceConfig, SystemResources, TargetConfig};
pub use crate::core::{ObjectGraph, ServiceCatalog, SqlValue};
pub use error::{MigrateError, Result};
pub use orchestrator::{MigrationResult, ObjectStatus, Orchestrator};
pub use pipeline::{MigrationEvent, Pipeline, PipelineReport, TableStatus};
pub use reconcile::{ReconcileOptions, Reconciler};
pub use scheduler::{Phase, TaskPlan};
pub use script::MigrationScript;
pub use source::{DumpFile, DumpSource};
