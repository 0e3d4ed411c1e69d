//! Side file of failed records, one JSON object per line.
//!
//! Entries carry the SQL text of the read that produced the record so a
//! replay tool can group failed rows per statement.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::value::RawValue;
use crate::error::Result;

/// Pipeline side that rejected a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPhase {
    Export,
    Import,
}

/// One failed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Target table.
    pub table: String,
    pub source_sql: String,
    /// Zero-based row number within the source read.
    pub row: u64,
    pub values: Vec<RawValue>,
    pub error: String,
    pub phase: ErrorPhase,
}

/// Append-only record error log shared by all workers.
///
/// The file is created on the first entry. A disabled log only counts.
pub struct ErrorLog {
    path: Option<PathBuf>,
    writer: Mutex<Option<BufWriter<File>>>,
    count: AtomicU64,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            writer: Mutex::new(None),
            count: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            writer: Mutex::new(None),
            count: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Record one failed record. Failures to write the log are logged, not raised.
    pub fn record(&self, entry: &ErrorEntry) {
        self.count.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.append(entry) {
            warn!("Could not append to error log: {}", e);
        }
    }

    fn append(&self, entry: &ErrorEntry) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut guard = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_none() {
            *guard = Some(BufWriter::new(File::create(path)?));
        }
        if let Some(writer) = guard.as_mut() {
            serde_json::to_writer(&mut *writer, entry)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let mut guard = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(writer) = guard.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Read a log back, grouped by source SQL.
    pub fn read_entries(path: &Path) -> Result<BTreeMap<String, Vec<ErrorEntry>>> {
        let reader = BufReader::new(File::open(path)?);
        let mut grouped: BTreeMap<String, Vec<ErrorEntry>> = BTreeMap::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ErrorEntry = serde_json::from_str(&line)?;
            grouped.entry(entry.source_sql.clone()).or_default().push(entry);
        }
        Ok(grouped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(sql: &str, row: u64) -> ErrorEntry {
        ErrorEntry {
            table: "public.orders".into(),
            source_sql: sql.into(),
            row,
            values: vec![json!(row), json!("x")],
            error: "invalid integer 'x'".into(),
            phase: ErrorPhase::Export,
        }
    }

    #[test]
    fn test_entries_grouped_by_statement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mig_errors.jsonl");
        let log = ErrorLog::new(&path);
        log.record(&entry("SELECT a FROM t1", 3));
        log.record(&entry("SELECT a FROM t2", 1));
        log.record(&entry("SELECT a FROM t1", 7));
        log.flush().unwrap();

        assert_eq!(log.count(), 3);
        let grouped = ErrorLog::read_entries(&path).unwrap();
        assert_eq!(grouped.len(), 2);
        let rows: Vec<u64> = grouped["SELECT a FROM t1"].iter().map(|e| e.row).collect();
        assert_eq!(rows, vec![3, 7]);
    }

    #[test]
    fn test_disabled_log_only_counts() {
        let log = ErrorLog::disabled();
        log.record(&entry("SELECT 1", 0));
        log.flush().unwrap();
        assert_eq!(log.count(), 1);
        assert!(log.path().is_none());
    }
}
