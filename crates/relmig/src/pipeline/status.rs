//! Per-table status and record counters shared by export and import workers.
//!
//! Counters are atomics so workers update them without taking the output
//! lock. A table's state moves
//! `Pending → Exporting → ExportDone → (Importing)* → Merged | Failed`;
//! the merge of its output is gated on `exported == imported` under
//! `ExportDone`, claimed at most once.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::core::identifier::normalize;

/// Lifecycle state of one target table in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TableStatus {
    Pending = 0,
    Exporting = 1,
    ExportDone = 2,
    Importing = 3,
    Merged = 4,
    Failed = 5,
}

impl TableStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TableStatus::Pending,
            1 => TableStatus::Exporting,
            2 => TableStatus::ExportDone,
            3 => TableStatus::Importing,
            4 => TableStatus::Merged,
            _ => TableStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TableStatus::Merged | TableStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Pending => "pending",
            TableStatus::Exporting => "exporting",
            TableStatus::ExportDone => "export_done",
            TableStatus::Importing => "importing",
            TableStatus::Merged => "merged",
            TableStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters and state of one target table.
#[derive(Debug)]
pub struct TableProgress {
    name: String,
    state: AtomicU8,
    /// Records handed to the import side.
    exported: AtomicU64,
    /// Records the import side has processed, written or failed.
    imported: AtomicU64,
    write_failures: AtomicU64,
    /// Records dropped on the export side; never exported.
    rejected: AtomicU64,
    /// Export tasks that have not finished yet.
    exporters: AtomicUsize,
    merge_claimed: AtomicBool,
}

impl TableProgress {
    fn new(name: &str, exporters: usize) -> Self {
        Self {
            name: name.to_string(),
            state: AtomicU8::new(TableStatus::Pending as u8),
            exported: AtomicU64::new(0),
            imported: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            exporters: AtomicUsize::new(exporters),
            merge_claimed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TableStatus {
        TableStatus::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn exported(&self) -> u64 {
        self.exported.load(Ordering::SeqCst)
    }

    pub fn imported(&self) -> u64 {
        self.imported.load(Ordering::SeqCst)
    }

    /// Records that failed conversion or writing.
    pub fn failed_records(&self) -> u64 {
        self.write_failures.load(Ordering::SeqCst) + self.rejected.load(Ordering::SeqCst)
    }

    /// Records written successfully.
    pub fn written(&self) -> u64 {
        self.imported()
            .saturating_sub(self.write_failures.load(Ordering::SeqCst))
    }

    /// Move to `to` if the current state is one of `from`.
    fn transition(&self, from: &[TableStatus], to: TableStatus) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if !from.contains(&TableStatus::from_u8(current)) {
                return false;
            }
            match self.state.compare_exchange(
                current,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Snapshot of one table's progress, for reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    pub status: TableStatus,
    pub exported: u64,
    pub imported: u64,
    /// Records in the table's data file.
    pub written: u64,
    pub failed_records: u64,
}

/// Thread-safe registry of [`TableProgress`], keyed by target table.
#[derive(Debug, Default)]
pub struct StatusManager {
    tables: DashMap<String, Arc<TableProgress>>,
}

impl StatusManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target table fed by `exporters` export tasks.
    pub fn register(&self, table: &str, exporters: usize) -> Arc<TableProgress> {
        self.tables
            .entry(normalize(table))
            .or_insert_with(|| Arc::new(TableProgress::new(table, exporters)))
            .clone()
    }

    pub fn get(&self, table: &str) -> Option<Arc<TableProgress>> {
        self.tables.get(&normalize(table)).map(|p| p.clone())
    }

    fn progress(&self, table: &str) -> Arc<TableProgress> {
        self.get(table).unwrap_or_else(|| self.register(table, 1))
    }

    pub fn status(&self, table: &str) -> Option<TableStatus> {
        self.get(table).map(|p| p.status())
    }

    /// An export task started reading.
    pub fn begin_export(&self, table: &str) {
        self.progress(table)
            .transition(&[TableStatus::Pending], TableStatus::Exporting);
    }

    /// Count records handed to the import side; returns the new total.
    pub fn add_exported(&self, table: &str, count: u64) -> u64 {
        self.progress(table).exported.fetch_add(count, Ordering::SeqCst) + count
    }

    /// Count records processed by the import side; returns the new total.
    ///
    /// `failed` records are part of `processed`.
    pub fn add_imported(&self, table: &str, processed: u64, failed: u64) -> u64 {
        let progress = self.progress(table);
        progress.write_failures.fetch_add(failed, Ordering::SeqCst);
        let total = progress.imported.fetch_add(processed, Ordering::SeqCst) + processed;
        if total < progress.exported() {
            progress.transition(&[TableStatus::ExportDone], TableStatus::Importing);
        }
        total
    }

    /// Count records dropped on the export side (conversion failures).
    pub fn add_export_failures(&self, table: &str, count: u64) {
        self.progress(table).rejected.fetch_add(count, Ordering::SeqCst);
    }

    /// An export task finished; returns true when it was the last one.
    ///
    /// The table reaches `ExportDone` once every export task has finished.
    pub fn finish_export(&self, table: &str) -> bool {
        let progress = self.progress(table);
        let previous = progress
            .exporters
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if previous > 1 {
            return false;
        }
        let target = if progress.imported() < progress.exported() {
            TableStatus::Importing
        } else {
            TableStatus::ExportDone
        };
        progress.transition(&[TableStatus::Pending, TableStatus::Exporting], target)
    }

    /// Whether the table's output may be merged now.
    pub fn ready_to_merge(&self, table: &str) -> bool {
        self.get(table).is_some_and(|p| {
            matches!(p.status(), TableStatus::ExportDone | TableStatus::Importing)
                && p.exported() == p.imported()
        })
    }

    /// Claim the merge of a table; succeeds at most once, and only when
    /// every exported record has been imported.
    pub fn try_claim_merge(&self, table: &str) -> bool {
        if !self.ready_to_merge(table) {
            return false;
        }
        self.get(table).is_some_and(|p| {
            p.merge_claimed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        })
    }

    pub fn mark_merged(&self, table: &str) -> bool {
        self.progress(table).transition(
            &[TableStatus::ExportDone, TableStatus::Importing],
            TableStatus::Merged,
        )
    }

    /// Fail a table from any non-terminal state.
    pub fn mark_failed(&self, table: &str) -> bool {
        self.progress(table).transition(
            &[
                TableStatus::Pending,
                TableStatus::Exporting,
                TableStatus::ExportDone,
                TableStatus::Importing,
            ],
            TableStatus::Failed,
        )
    }

    /// Reports for every table, sorted by name.
    pub fn reports(&self) -> Vec<TableReport> {
        let mut reports: Vec<TableReport> = self
            .tables
            .iter()
            .map(|entry| {
                let p = entry.value();
                TableReport {
                    table: p.name.clone(),
                    status: p.status(),
                    exported: p.exported(),
                    imported: p.imported(),
                    written: p.written(),
                    failed_records: p.failed_records(),
                }
            })
            .collect();
        reports.sort_by(|a, b| a.table.cmp(&b.table));
        reports
    }

    /// Records written across all tables.
    pub fn total_written(&self) -> u64 {
        self.tables.iter().map(|e| e.value().written()).sum()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
