//! Concurrent export/import pipeline.
//!
//! Export workers read source tables page by page, convert each row with the
//! per-type [`handlers`] and hand batches of `commit_count` rows to import
//! workers. Import workers append batches to rotating part files; the last
//! worker to finish a table merges its parts into `<stem>.<ext>`.
//!
//! - Export and import pools are bounded by [`Semaphore`]s. An export worker
//!   waits for an import slot before handing over a batch, so a slow writer
//!   throttles the readers.
//! - Record-level failures are logged to the [`ErrorLog`] and skipped.
//! - A table-level failure fails that table only.

mod errors;
mod events;
mod export;
pub mod handlers;
mod import;
mod job;
mod output;
mod preflight;
mod status;

pub use errors::{ErrorEntry, ErrorLog, ErrorPhase};
pub use events::{ChannelSink, CollectingSink, EventSink, FanoutSink, LogSink, MigrationEvent};
pub use job::{build_jobs, split_row_range, TableJob};
pub use output::{count_rows, MergeOutcome, OutputRegistry, OutputSettings, WriteOutcome};
pub use preflight::{check_memory, estimate_buffered_bytes, run_preflight, PreflightReport};
pub use status::{StatusManager, TableReport, TableStatus};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::traits::RowSource;
use crate::error::{MigrateError, Result};
use crate::output::data_stem;

use handlers::HandlerRegistry;

/// Pool sizes and batching for one run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub export_threads: usize,
    pub import_threads: usize,
    pub commit_count: usize,
    pub parallel_readers: usize,
    /// File name prefix of data files.
    pub prefix: String,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            export_threads: config.migration.get_export_threads(),
            import_threads: config.migration.get_import_threads(),
            commit_count: config.migration.get_commit_count(),
            parallel_readers: config.migration.get_parallel_readers(),
            prefix: config.target.prefix.clone(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            export_threads: 2,
            import_threads: 2,
            commit_count: 10_000,
            parallel_readers: 1,
            prefix: "relmig".to_string(),
        }
    }
}

/// State shared by every worker of a run.
pub(crate) struct PipelineContext {
    pub source: Arc<dyn RowSource>,
    pub handlers: Arc<HandlerRegistry>,
    pub status: Arc<StatusManager>,
    pub outputs: Arc<OutputRegistry>,
    pub errors: Arc<ErrorLog>,
    pub events: Arc<dyn EventSink>,
    pub import_slots: Arc<Semaphore>,
    pub commit_count: usize,
    pub cancel: CancellationToken,
    pub merged: DashMap<String, MergeOutcome>,
    pub failures: DashMap<String, String>,
}

impl PipelineContext {
    /// Fail a table; the first error is kept for the report.
    pub(crate) fn fail_table(&self, table: &str, e: &MigrateError) {
        if self.status.mark_failed(table) {
            self.events.emit(MigrationEvent::TableFailed {
                table: table.to_string(),
                error: e.to_string(),
            });
        }
        self.failures
            .entry(table.to_string())
            .or_insert_with(|| e.to_string());
    }
}

/// Outcome of the data phase.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub tables: Vec<TableReport>,
    /// Final data file per target table.
    pub outputs: BTreeMap<String, PathBuf>,
    /// First error per failed table.
    pub failures: BTreeMap<String, String>,
    pub rows_exported: u64,
    pub rows_written: u64,
    pub record_errors: u64,
    pub cancelled: bool,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table.eq_ignore_ascii_case(name))
    }
}

/// The data pipeline of one run.
pub struct Pipeline {
    source: Arc<dyn RowSource>,
    handlers: Arc<HandlerRegistry>,
    outputs: Arc<OutputRegistry>,
    errors: Arc<ErrorLog>,
    events: Arc<dyn EventSink>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn RowSource>,
        handlers: Arc<HandlerRegistry>,
        outputs: OutputRegistry,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            handlers,
            outputs: Arc::new(outputs),
            errors: Arc::new(ErrorLog::disabled()),
            events: Arc::new(LogSink),
            settings,
        }
    }

    pub fn with_error_log(mut self, errors: Arc<ErrorLog>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn outputs(&self) -> &OutputRegistry {
        &self.outputs
    }

    /// Run every job to completion, failure or cancellation.
    pub async fn run(&self, jobs: Vec<TableJob>, cancel: CancellationToken) -> Result<PipelineReport> {
        let jobs = self.split_jobs(jobs).await;

        let status = Arc::new(StatusManager::new());
        let mut exporters: BTreeMap<String, usize> = BTreeMap::new();
        for job in &jobs {
            let table = job.target_table();
            self.outputs.register(
                &table,
                &data_stem(&self.settings.prefix, &job.target_schema, &job.target_name),
                job.header.clone(),
            );
            *exporters.entry(table).or_default() += 1;
        }
        for (table, count) in &exporters {
            status.register(table, *count);
        }
        info!(
            "Data phase: {} export jobs for {} tables ({} export / {} import workers, {} rows per batch)",
            jobs.len(),
            exporters.len(),
            self.settings.export_threads,
            self.settings.import_threads,
            self.settings.commit_count
        );

        let ctx = Arc::new(PipelineContext {
            source: self.source.clone(),
            handlers: self.handlers.clone(),
            status: status.clone(),
            outputs: self.outputs.clone(),
            errors: self.errors.clone(),
            events: self.events.clone(),
            import_slots: Arc::new(Semaphore::new(self.settings.import_threads.max(1))),
            commit_count: self.settings.commit_count.max(1),
            cancel: cancel.clone(),
            merged: DashMap::new(),
            failures: DashMap::new(),
        });

        let export_slots = Arc::new(Semaphore::new(self.settings.export_threads.max(1)));
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = export_slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let label = job.label();
            let table = job.target_table();
            let ctx = ctx.clone();
            let handle = tokio::spawn(async move {
                let outcome = export::export_table(ctx, job).await;
                drop(permit);
                outcome
            });
            handles.push((label, table, handle));
        }

        let mut imports = Vec::new();
        for (label, table, handle) in handles {
            match handle.await {
                Ok(outcome) => {
                    if let Some(e) = &outcome.error {
                        debug!("{}: export ended early - {}", outcome.label, e);
                    }
                    imports.extend(outcome.imports.into_iter().map(|h| (table.clone(), h)));
                }
                Err(e) => {
                    error!("{}: task panicked - {}", label, e);
                    ctx.fail_table(&table, &MigrateError::transfer(&table, e.to_string()));
                }
            }
        }
        let (tables, handles): (Vec<String>, Vec<_>) = imports.into_iter().unzip();
        for (table, joined) in tables.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("{}: import ended early - {}", table, e),
                Err(e) => {
                    error!("{}: task panicked - {}", table, e);
                    ctx.fail_table(&table, &MigrateError::transfer(&table, e.to_string()));
                }
            }
        }

        if let Err(e) = self.errors.flush() {
            warn!("Could not flush error log: {}", e);
        }

        let tables = status.reports();
        let report = PipelineReport {
            rows_exported: tables.iter().map(|t| t.exported).sum(),
            rows_written: status.total_written(),
            record_errors: self.errors.count(),
            outputs: ctx
                .merged
                .iter()
                .map(|e| (e.key().clone(), e.value().path.clone()))
                .collect(),
            failures: ctx
                .failures
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            cancelled: cancel.is_cancelled(),
            tables,
        };
        info!(
            "Data phase finished: {} rows written, {} record errors, {} tables failed{}",
            report.rows_written,
            report.record_errors,
            report.failures.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    /// Split large tables into row ranges read in parallel.
    async fn split_jobs(&self, jobs: Vec<TableJob>) -> Vec<TableJob> {
        let readers = self.settings.parallel_readers;
        if readers <= 1 {
            return jobs;
        }
        let threshold = (self.settings.commit_count as u64).saturating_mul(2);
        let mut split = Vec::with_capacity(jobs.len());
        for job in jobs {
            match self
                .source
                .row_count(&job.source.schema, &job.source.name)
                .await
            {
                Ok(count) if count > 0 && count as u64 >= threshold => {
                    debug!("{}: splitting {} rows into {} ranges", job.label(), count, readers);
                    split.extend(job.split(count as u64, readers));
                }
                _ => split.push(job),
            }
        }
        split
    }
}
