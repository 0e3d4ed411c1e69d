//! Export workers: read a source table, convert rows, hand batches to the
//! import side.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::core::traits::ReadOptions;
use crate::core::value::{RawValue, SourceRow, SqlValue};
use crate::error::{MigrateError, Result};

use super::errors::{ErrorEntry, ErrorPhase};
use super::events::MigrationEvent;
use super::import::{self, ImportUnit};
use super::job::TableJob;
use super::PipelineContext;

/// What an export task left behind.
pub(crate) struct ExportOutcome {
    pub label: String,
    /// Import tasks spawned for this export; awaited by the pipeline.
    pub imports: Vec<JoinHandle<Result<()>>>,
    pub error: Option<MigrateError>,
}

/// Export one job. Never returns an error: failures are recorded in the
/// outcome, the status manager and the event sink.
pub(crate) async fn export_table(ctx: Arc<PipelineContext>, job: TableJob) -> ExportOutcome {
    let table = job.target_table();
    let mut outcome = ExportOutcome {
        label: job.label(),
        imports: Vec::new(),
        error: None,
    };

    ctx.status.begin_export(&table);
    match export_rows(&ctx, &job, &mut outcome.imports).await {
        Ok(exported) => {
            debug!("{}: exported {} records", outcome.label, exported);
            ctx.status.finish_export(&table);
            import::maybe_merge(&ctx, &table).await;
        }
        Err(MigrateError::Cancelled) => {
            warn!("{}: cancelled", outcome.label);
            outcome.error = Some(MigrateError::Cancelled);
        }
        Err(e) => {
            error!("{}: failed - {}", outcome.label, e);
            ctx.fail_table(&table, &e);
            outcome.error = Some(e);
        }
    }
    outcome
}

async fn export_rows(
    ctx: &Arc<PipelineContext>,
    job: &TableJob,
    imports: &mut Vec<JoinHandle<Result<()>>>,
) -> Result<u64> {
    let table = job.target_table();
    let opts = ReadOptions {
        schema: job.source.schema.clone(),
        table: job.source.name.clone(),
        columns: job.read_columns.iter().map(|c| c.name.clone()).collect(),
        page_size: ctx.commit_count,
        start_row: job.range.map(|(start, _)| start),
        end_row: job
            .range
            .map(|(_, end)| end)
            .filter(|end| *end != u64::MAX),
    };
    let source_sql: Arc<str> = ctx.source.select_sql(&opts).into();
    let mut rx = ctx.source.read_table(opts);

    let mut unit = ImportUnit::new(table.as_str(), source_sql.clone(), 0);
    let mut seq = 0u64;
    let mut total = 0u64;

    while let Some(page) = rx.recv().await {
        if ctx.cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        let page = page?;
        for (i, raw) in page.rows.iter().enumerate() {
            let row_number = page.offset + i as u64;
            match convert_row(ctx, job, raw) {
                Ok(row) => unit.push(row, row_number),
                Err(message) => reject(ctx, job, &source_sql, row_number, raw, message),
            }
            if unit.len() >= ctx.commit_count {
                seq += 1;
                total += unit.len() as u64;
                let full = std::mem::replace(
                    &mut unit,
                    ImportUnit::new(table.as_str(), source_sql.clone(), seq),
                );
                imports.push(dispatch(ctx, full).await?);
            }
        }
        if page.is_last {
            break;
        }
    }

    if ctx.cancel.is_cancelled() {
        return Err(MigrateError::Cancelled);
    }
    if !unit.is_empty() {
        total += unit.len() as u64;
        imports.push(dispatch(ctx, unit).await?);
    }
    Ok(total)
}

/// Count a batch as exported and hand it to an import slot. Waiting for
/// the slot applies backpressure to the reader.
async fn dispatch(ctx: &Arc<PipelineContext>, unit: ImportUnit) -> Result<JoinHandle<Result<()>>> {
    let permit = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(MigrateError::Cancelled),
        permit = ctx.import_slots.clone().acquire_owned() => permit
            .map_err(|_| MigrateError::transfer(unit.table.as_str(), "import pool closed"))?,
    };

    let count = unit.len() as u64;
    ctx.status.add_exported(&unit.table, count);
    ctx.events.emit(MigrationEvent::RecordsExported {
        table: unit.table.clone(),
        count,
    });

    let ctx = ctx.clone();
    Ok(tokio::spawn(async move {
        let result = import::import_batch(&ctx, unit).await;
        drop(permit);
        result
    }))
}

/// Convert one source row into target column order.
fn convert_row(
    ctx: &PipelineContext,
    job: &TableJob,
    raw: &SourceRow,
) -> std::result::Result<Vec<SqlValue>, String> {
    job.mapping
        .iter()
        .map(|slot| match slot {
            None => Ok(SqlValue::Null),
            Some(idx) => {
                let column = &job.read_columns[*idx];
                let value = raw.get(*idx).unwrap_or(&RawValue::Null);
                ctx.handlers.convert(value, column).map_err(|message| {
                    MigrateError::conversion(job.source.full_name(), &column.name, message)
                        .to_string()
                })
            }
        })
        .collect()
}

fn reject(
    ctx: &PipelineContext,
    job: &TableJob,
    source_sql: &str,
    row: u64,
    raw: &SourceRow,
    message: String,
) {
    let table = job.target_table();
    ctx.status.add_export_failures(&table, 1);
    ctx.errors.record(&ErrorEntry {
        table: table.clone(),
        source_sql: source_sql.to_string(),
        row,
        values: raw.clone(),
        error: message.clone(),
        phase: ErrorPhase::Export,
    });
    ctx.events.emit(MigrationEvent::RecordError {
        table,
        error: message,
    });
}
