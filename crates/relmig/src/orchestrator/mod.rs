//! Migration orchestrator - plans a migration and runs it phase by phase.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SystemResources};
use crate::core::catalog::ServiceCatalog;
use crate::core::graph::ObjectKind;
use crate::core::target::TargetGraph;
use crate::core::traits::{DdlBuilder, RowSource};
use crate::error::{MigrateError, Result};
use crate::output::{
    error_file_name, file_list_name, manifest_file_name, read_file_list, script_file_name,
    SchemaWriter,
};
use crate::pipeline::handlers::HandlerRegistry;
use crate::pipeline::{
    build_jobs, count_rows, run_preflight, ErrorLog, EventSink, LogSink, MigrationEvent,
    OutputRegistry, OutputSettings, Pipeline, PipelineReport, PipelineSettings, TableJob,
    TableReport, TableStatus,
};
use crate::reconcile::{ReconcileOptions, Reconciler};
use crate::scheduler::{Phase, Task, TaskKind, TaskPlan};
use crate::script::MigrationScript;

/// Outcome of one schema object task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    Created,
    Dropped,
    Skipped,
    Failed,
}

/// Manifest entry for one schema object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectReport {
    pub kind: ObjectKind,
    pub schema: String,
    pub name: String,
    pub status: ObjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of a migration run, written as the run manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: completed, partial, failed or cancelled.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    /// Source was unreachable at pre-flight.
    pub offline: bool,

    /// Tables with a data phase.
    pub tables_total: usize,
    pub tables_success: usize,
    pub tables_failed: usize,

    /// Records written to data files.
    pub rows_transferred: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// Records rejected on export or import.
    pub record_errors: u64,

    pub failed_tables: Vec<String>,

    pub objects: Vec<ObjectReport>,
    pub tables: Vec<TableReport>,

    /// Final data file per target table.
    pub data_files: BTreeMap<String, PathBuf>,

    /// Schema files per target schema.
    pub schema_files: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_file: Option<PathBuf>,

    pub advisories: Vec<String>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    pub fn objects_with(&self, status: ObjectStatus) -> impl Iterator<Item = &ObjectReport> {
        self.objects.iter().filter(move |o| o.status == status)
    }
}

/// Row count check of one data file against the manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputCheck {
    pub table: String,
    pub path: PathBuf,
    pub expected: u64,
    pub actual: Option<u64>,
}

impl OutputCheck {
    pub fn matches(&self) -> bool {
        self.actual == Some(self.expected)
    }
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    catalog: ServiceCatalog,
    events: Arc<dyn EventSink>,
    resources: Option<SystemResources>,
    script_file: Option<PathBuf>,
}

impl Orchestrator {
    /// Create an orchestrator with the built-in services and the configured
    /// source.
    pub fn new(config: Config) -> Result<Self> {
        let mut catalog = ServiceCatalog::with_builtins();
        catalog.open_source(&config.source)?;
        Self::with_catalog(config, catalog)
    }

    /// Create an orchestrator over an explicit service catalog.
    pub fn with_catalog(config: Config, catalog: ServiceCatalog) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            catalog,
            events: Arc::new(LogSink),
            resources: None,
            script_file: None,
        })
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Use fixed resources instead of detecting them.
    pub fn with_resources(mut self, resources: SystemResources) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_script_file(mut self, path: PathBuf) -> Self {
        self.script_file = Some(path);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn kind(&self) -> &str {
        &self.config.source.kind
    }

    fn output_dir(&self) -> &Path {
        &self.config.target.output_dir
    }

    fn prefix(&self) -> &str {
        &self.config.target.prefix
    }

    pub fn script_path(&self) -> PathBuf {
        self.script_file
            .clone()
            .unwrap_or_else(|| self.output_dir().join(script_file_name(self.prefix())))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir().join(manifest_file_name(self.prefix()))
    }

    /// Fetch the source graph and reconcile it from scratch.
    pub async fn plan(&self) -> Result<(MigrationScript, Reconciler)> {
        let fetcher = self.catalog.require_fetcher(self.kind())?;
        let transform = self.catalog.require_transform(self.kind())?;
        let options = ReconcileOptions::from_config(&self.config);

        info!("Fetching source object graph ({})", self.kind());
        let selected = options.clone();
        let filter = move |schema: &str, _name: &str| selected.schema_selected(schema);
        let graph = fetcher.fetch(&self.config.source, &filter).await?;

        let mut reconciler = Reconciler::new(options, transform);
        reconciler.attach_graph(graph)?;
        reconciler.reconcile(true)?;

        let summary = reconciler.summary();
        info!(
            "Planned {} table intents and {} object intents into {} target tables ({} shared)",
            summary.table_intents,
            summary.object_intents,
            summary.target_tables,
            summary.merged_tables
        );
        let script = MigrationScript::new(self.config.hash(), &reconciler);
        Ok((script, reconciler))
    }

    /// Fetch objects added at the source since planning; returns the number
    /// of new objects. New intents start unselected.
    pub async fn refresh(&self, reconciler: &mut Reconciler) -> Result<usize> {
        let fetcher = self.catalog.require_fetcher(self.kind())?;
        reconciler.refresh(fetcher.as_ref(), &self.config.source).await
    }

    /// Sign and save the script with the reconciler's current state.
    pub fn save_script(
        &self,
        script: &mut MigrationScript,
        reconciler: &Reconciler,
    ) -> Result<PathBuf> {
        let path = self.script_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        script.update(reconciler);
        script.save(&path)?;
        info!("Saved migration script to {}", path.display());
        Ok(path)
    }

    /// Load the saved script; it must match the current configuration.
    pub fn load_script(&self) -> Result<(MigrationScript, Reconciler)> {
        let path = self.script_path();
        let script = MigrationScript::load(&path)?;
        script.validate_config(&self.config.hash())?;
        let reconciler = script.reconciler(self.catalog.require_transform(self.kind())?);
        info!("Loaded migration script {} from {}", script.run_id, path.display());
        Ok((script, reconciler))
    }

    /// Run from the saved script, planning first when there is none.
    pub async fn migrate(&self, cancel: CancellationToken) -> Result<MigrationResult> {
        let (script, reconciler) = if self.script_path().exists() {
            self.load_script()?
        } else {
            let (mut script, reconciler) = self.plan().await?;
            self.save_script(&mut script, &reconciler)?;
            (script, reconciler)
        };
        self.run(&reconciler, &script.run_id, cancel).await
    }

    /// Execute a reconciled plan: DDL phases, then data, then keys and views.
    pub async fn run(
        &self,
        reconciler: &Reconciler,
        run_id: &str,
        cancel: CancellationToken,
    ) -> Result<MigrationResult> {
        let started_at = Utc::now();
        info!("Starting migration run: {}", run_id);

        let plan = TaskPlan::build(reconciler);
        let source = self.catalog.require_row_source(self.kind())?;
        let ddl = self.catalog.require_ddl(self.kind())?;
        let handlers = self.catalog.require_handlers(self.kind())?;
        std::fs::create_dir_all(self.output_dir())?;

        // Pre-flight
        let mut jobs = build_jobs(reconciler, &plan)?;
        let max_row_bytes = jobs
            .iter()
            .map(|j| j.source.row_byte_size().max(0) as u64)
            .max()
            .unwrap_or(0);
        let resources = self.resources.clone().unwrap_or_else(SystemResources::detect);
        let migration = &self.config.migration;
        let preflight = run_preflight(
            source.as_ref(),
            max_row_bytes,
            migration.get_commit_count(),
            migration.get_export_threads(),
            migration.get_memory_fraction(),
            &resources,
        )
        .await;
        for message in &preflight.advisories {
            self.events.emit(MigrationEvent::Advisory {
                message: message.clone(),
            });
        }

        let mut writer = SchemaWriter::new(
            self.output_dir(),
            self.prefix(),
            self.config.target.split_schema_files,
        );
        let mut objects = Vec::new();
        let mut data = PipelineReport::default();
        let mut cancelled = false;

        for phase in Phase::all() {
            let tasks: Vec<&Task> = plan.phase(phase).collect();
            if tasks.is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                warn!("Run cancelled before phase {}", phase);
                cancelled = true;
                break;
            }
            self.events.emit(MigrationEvent::PhaseStarted {
                phase,
                tasks: tasks.len(),
            });
            match phase {
                Phase::Data => {
                    let jobs = std::mem::take(&mut jobs);
                    data = self
                        .run_data(source.clone(), handlers.clone(), jobs, cancel.clone())
                        .await?;
                    if data.cancelled {
                        cancelled = true;
                        break;
                    }
                }
                Phase::Routines => {
                    for task in tasks {
                        let reason = format!("{} is not supported by the target", task.object_kind);
                        self.events.emit(MigrationEvent::ObjectSkipped {
                            kind: task.object_kind,
                            schema: task.schema.clone(),
                            name: task.name.clone(),
                            reason: reason.clone(),
                        });
                        objects.push(report(task, ObjectStatus::Skipped, Some(reason)));
                    }
                }
                _ => {
                    for task in tasks {
                        let outcome =
                            self.write_ddl(task, reconciler.targets(), ddl.as_ref(), &mut writer);
                        objects.push(outcome);
                    }
                }
            }
        }

        let file_lists = writer.write_file_lists()?;
        debug!("Wrote {} schema file lists", file_lists.len());

        let result = self.build_result(
            run_id,
            started_at,
            preflight.offline,
            preflight.advisories,
            objects,
            data,
            &writer,
            cancelled,
        );
        let manifest = self.manifest_path();
        std::fs::write(&manifest, result.to_json()?)?;
        info!(
            "Run {} {}: {} tables ({} failed), {} rows, {} record errors. Manifest: {}",
            result.run_id,
            result.status,
            result.tables_total,
            result.tables_failed,
            result.rows_transferred,
            result.record_errors,
            manifest.display()
        );
        self.events.emit(MigrationEvent::RunCompleted {
            status: result.status.clone(),
        });
        Ok(result)
    }

    async fn run_data(
        &self,
        source: Arc<dyn RowSource>,
        handlers: Arc<HandlerRegistry>,
        jobs: Vec<TableJob>,
        cancel: CancellationToken,
    ) -> Result<PipelineReport> {
        let target = &self.config.target;
        let outputs = OutputRegistry::new(OutputSettings {
            dir: target.output_dir.clone(),
            format: target.format,
            max_rows_per_file: self.config.migration.get_max_count_per_file(target.format),
            one_file_per_table: target.one_file_per_table,
        });
        let errors = if target.write_error_file {
            ErrorLog::new(self.output_dir().join(error_file_name(self.prefix())))
        } else {
            ErrorLog::disabled()
        };
        Pipeline::new(source, handlers, outputs, PipelineSettings::from_config(&self.config))
            .with_error_log(Arc::new(errors))
            .with_events(self.events.clone())
            .run(jobs, cancel)
            .await
    }

    /// Render and write the DDL of one task. Failures are reported, not raised.
    fn write_ddl(
        &self,
        task: &Task,
        targets: &TargetGraph,
        ddl: &dyn DdlBuilder,
        writer: &mut SchemaWriter,
    ) -> ObjectReport {
        let rendered = render_task(task, targets, ddl).and_then(|sql| match sql {
            Some(sql) => writer.append(&task.schema, task.object_kind, &sql).map(Some),
            None => Ok(None),
        });
        match rendered {
            Ok(Some(path)) => {
                debug!("{} -> {}", task.describe(), path.display());
                if task.kind == TaskKind::Drop {
                    return report(task, ObjectStatus::Dropped, None);
                }
                self.events.emit(MigrationEvent::ObjectCreated {
                    kind: task.object_kind,
                    schema: task.schema.clone(),
                    name: task.name.clone(),
                });
                report(task, ObjectStatus::Created, None)
            }
            Ok(None) => report(task, ObjectStatus::Skipped, Some("nothing to create".into())),
            Err(e) => {
                error!("{}: failed - {}", task.describe(), e);
                self.events.emit(MigrationEvent::ObjectFailed {
                    kind: task.object_kind,
                    schema: task.schema.clone(),
                    name: task.name.clone(),
                    error: e.to_string(),
                });
                report(task, ObjectStatus::Failed, Some(e.to_string()))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_result(
        &self,
        run_id: &str,
        started_at: DateTime<Utc>,
        offline: bool,
        advisories: Vec<String>,
        objects: Vec<ObjectReport>,
        data: PipelineReport,
        writer: &SchemaWriter,
        cancelled: bool,
    ) -> MigrationResult {
        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let tables_success = data
            .tables
            .iter()
            .filter(|t| t.status == TableStatus::Merged)
            .count();
        let failed_tables: Vec<String> = data
            .tables
            .iter()
            .filter(|t| t.status == TableStatus::Failed)
            .map(|t| t.table.clone())
            .collect();
        let objects_failed = objects.iter().any(|o| o.status == ObjectStatus::Failed);

        let status = if cancelled {
            "cancelled"
        } else if !data.tables.is_empty() && tables_success == 0 && !failed_tables.is_empty() {
            "failed"
        } else if !failed_tables.is_empty()
            || objects_failed
            || tables_success < data.tables.len()
        {
            "partial"
        } else {
            "completed"
        };

        let rows_per_second = if duration > 0.0 {
            (data.rows_written as f64 / duration) as u64
        } else {
            data.rows_written
        };
        let error_file = self.output_dir().join(error_file_name(self.prefix()));

        MigrationResult {
            run_id: run_id.to_string(),
            status: status.to_string(),
            duration_seconds: duration,
            started_at,
            completed_at,
            offline,
            tables_total: data.tables.len(),
            tables_success,
            tables_failed: failed_tables.len(),
            rows_transferred: data.rows_written,
            rows_per_second,
            record_errors: data.record_errors,
            failed_tables,
            objects,
            tables: data.tables,
            data_files: data.outputs,
            schema_files: writer.files().clone(),
            error_file: error_file.exists().then_some(error_file),
            advisories,
        }
    }

    /// Schema files listed for one target schema.
    pub fn files(&self, schema: &str) -> Result<Vec<String>> {
        read_file_list(&self.output_dir().join(file_list_name(self.prefix(), schema)))
    }

    /// Check every data file of a manifest against its recorded row count.
    pub fn verify_outputs(&self, manifest: &MigrationResult) -> Vec<OutputCheck> {
        manifest
            .data_files
            .iter()
            .map(|(table, path)| {
                let expected = manifest
                    .tables
                    .iter()
                    .find(|t| t.table.eq_ignore_ascii_case(table))
                    .map(|t| t.written)
                    .unwrap_or(0);
                let actual = count_rows(path, self.config.target.format).ok();
                let check = OutputCheck {
                    table: table.clone(),
                    path: path.clone(),
                    expected,
                    actual,
                };
                if check.matches() {
                    info!("{}: {} rows (match)", table, expected);
                } else {
                    warn!("{}: manifest={} file={:?} (MISMATCH)", table, expected, actual);
                }
                check
            })
            .collect()
    }
}

fn report(task: &Task, status: ObjectStatus, detail: Option<String>) -> ObjectReport {
    ObjectReport {
        kind: task.object_kind,
        schema: task.schema.clone(),
        name: match &task.kind {
            TaskKind::ForeignKey(name) | TaskKind::Index(name) => name.clone(),
            _ => task.name.clone(),
        },
        status,
        detail,
    }
}

/// DDL of one task; `None` when there is nothing to write.
fn render_task(task: &Task, targets: &TargetGraph, ddl: &dyn DdlBuilder) -> Result<Option<String>> {
    let table = || {
        targets.table(&task.schema, &task.name).ok_or_else(|| {
            MigrateError::resolution("target table", format!("{}.{}", task.schema, task.name))
        })
    };
    let object = || {
        targets
            .object(task.object_kind, &task.schema, &task.name)
            .ok_or_else(|| {
                MigrateError::resolution(
                    task.object_kind.as_str(),
                    format!("{}.{}", task.schema, task.name),
                )
            })
    };
    match &task.kind {
        TaskKind::CreateSchema => ddl.create_schema(&task.schema).map(Some),
        TaskKind::Drop if task.object_kind == ObjectKind::Table => {
            ddl.drop_table(table()?).map(Some)
        }
        TaskKind::Drop => ddl.drop_object(object()?).map(Some),
        TaskKind::Create if task.object_kind == ObjectKind::Table => {
            ddl.create_table(table()?).map(Some)
        }
        TaskKind::Create => ddl.create_object(object()?).map(Some),
        TaskKind::PrimaryKey => ddl.create_primary_key(table()?),
        TaskKind::ForeignKey(name) => {
            let table = table()?;
            let fk = table
                .foreign_keys
                .get(name)
                .ok_or_else(|| MigrateError::resolution("foreign key", name.as_str()))?;
            ddl.create_foreign_key(table, fk).map(Some)
        }
        TaskKind::Index(name) => {
            let table = table()?;
            let index = table
                .indexes
                .get(name)
                .ok_or_else(|| MigrateError::resolution("index", name.as_str()))?;
            ddl.create_index(table, index).map(Some)
        }
        TaskKind::Data | TaskKind::Skip => Ok(None),
    }
}
