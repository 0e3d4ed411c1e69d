//! Import workers: write converted batches to the table's output files and
//! merge the parts once every exported record has been written.

use std::sync::Arc;

use tracing::{debug, error};

use crate::core::value::{Batch, RawValue, SqlValue};
use crate::error::{MigrateError, Result};

use super::errors::{ErrorEntry, ErrorPhase};
use super::events::MigrationEvent;
use super::status::TableStatus;
use super::PipelineContext;

/// A batch on its way to the import side, with the source row numbers of
/// its records for the error log.
pub(crate) struct ImportUnit {
    pub table: String,
    pub source_sql: Arc<str>,
    pub batch: Batch,
    pub rows: Vec<u64>,
}

impl ImportUnit {
    pub(crate) fn new(table: &str, source_sql: Arc<str>, seq: u64) -> Self {
        Self {
            table: table.to_string(),
            source_sql,
            batch: Batch::new(Vec::new(), seq),
            rows: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, row: Vec<SqlValue>, row_number: u64) {
        self.batch.rows.push(row);
        self.rows.push(row_number);
    }

    pub(crate) fn len(&self) -> usize {
        self.batch.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

/// Write one batch, then try to merge the table.
pub(crate) async fn import_batch(ctx: &Arc<PipelineContext>, mut unit: ImportUnit) -> Result<()> {
    if ctx.status.status(&unit.table) == Some(TableStatus::Failed) {
        debug!("{}: dropping batch {} of failed table", unit.table, unit.batch.seq);
        return Ok(());
    }

    let rows = std::mem::take(&mut unit.batch.rows);
    let processed = rows.len() as u64;
    let outputs = ctx.outputs.clone();
    let table = unit.table.clone();
    let written = tokio::task::spawn_blocking(move || {
        outputs.write_batch(&table, &rows).map(|outcome| (outcome, rows))
    })
    .await
    .map_err(|e| MigrateError::transfer(unit.table.as_str(), format!("write task panicked: {}", e)))
    .and_then(|r| r);

    let (outcome, rows) = match written {
        Ok(v) => v,
        Err(e) => {
            error!("{}: batch {} failed - {}", unit.table, unit.batch.seq, e);
            ctx.fail_table(&unit.table, &e);
            return Err(e);
        }
    };

    for path in &outcome.rotated {
        ctx.events.emit(MigrationEvent::FileRotated {
            table: unit.table.clone(),
            path: path.clone(),
        });
    }
    for (idx, message) in &outcome.failures {
        ctx.errors.record(&ErrorEntry {
            table: unit.table.clone(),
            source_sql: unit.source_sql.to_string(),
            row: unit.rows.get(*idx).copied().unwrap_or_default(),
            values: rows[*idx].iter().map(field_value).collect(),
            error: message.clone(),
            phase: ErrorPhase::Import,
        });
        ctx.events.emit(MigrationEvent::RecordError {
            table: unit.table.clone(),
            error: message.clone(),
        });
    }

    let total = ctx
        .status
        .add_imported(&unit.table, processed, outcome.failures.len() as u64);
    ctx.events.emit(MigrationEvent::RecordsImported {
        table: unit.table.clone(),
        count: outcome.written as u64,
        total,
    });

    maybe_merge(ctx, &unit.table).await;
    Ok(())
}

/// Merge a table's output if it is complete and nobody else claimed it.
pub(crate) async fn maybe_merge(ctx: &Arc<PipelineContext>, table: &str) {
    if !ctx.status.try_claim_merge(table) {
        return;
    }
    let outputs = ctx.outputs.clone();
    let name = table.to_string();
    let merged = tokio::task::spawn_blocking(move || outputs.merge(&name))
        .await
        .map_err(|e| MigrateError::transfer(table, format!("merge task panicked: {}", e)))
        .and_then(|r| r);

    match merged {
        Ok(outcome) => {
            ctx.status.mark_merged(table);
            ctx.events.emit(MigrationEvent::TableMerged {
                table: table.to_string(),
                path: outcome.path.clone(),
                rows: outcome.rows,
            });
            ctx.merged.insert(table.to_string(), outcome);
        }
        Err(e) => {
            error!("{}: merge failed - {}", table, e);
            ctx.fail_table(table, &e);
        }
    }
}

fn field_value(value: &SqlValue) -> RawValue {
    match value {
        SqlValue::Null => RawValue::Null,
        other => RawValue::String(other.to_field()),
    }
}
