//! Per-table output files: rotation and merge of part files.
//!
//! Each target table owns a [`TableOutput`] in a sharded map, so workers of
//! different tables never contend. The table lock is held only to reserve
//! rows in the current part and to rotate; rows are written under a
//! per-part lock afterwards.
//!
//! With rotation, parts are `<stem>_<n>.<ext>` and the merged artifact is
//! `<stem>.<ext>`. In one-file-per-table mode rows go straight to
//! `<stem>.<ext>` and there is nothing to merge.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::OutputFormat;
use crate::core::identifier::normalize;
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Output settings shared by all tables of a run.
#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub dir: PathBuf,
    pub format: OutputFormat,
    /// Data rows per physical file before rotation.
    pub max_rows_per_file: usize,
    pub one_file_per_table: bool,
}

/// A physical data file and the lock serializing writes to it.
#[derive(Debug, Clone)]
struct Part {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

/// Output state of one target table.
#[derive(Debug)]
pub struct TableOutput {
    name: String,
    stem: String,
    header: Vec<String>,
    extension: &'static str,
    /// Current file number; 0 before the first write.
    file_number: u32,
    rows_in_current: usize,
    parts: Vec<Part>,
    merged: bool,
}

impl TableOutput {
    pub fn part_paths(&self) -> Vec<PathBuf> {
        self.parts.iter().map(|p| p.path.clone()).collect()
    }
}

/// Rows of one batch destined for one part file.
#[derive(Debug, Clone)]
pub struct Segment {
    pub path: PathBuf,
    /// Row range within the batch.
    pub rows: Range<usize>,
    lock: Arc<Mutex<()>>,
}

/// Result of writing one batch.
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub written: usize,
    /// `(row index within the batch, error)` for records that failed.
    pub failures: Vec<(usize, String)>,
    /// Files opened by rotation while reserving this batch.
    pub rotated: Vec<PathBuf>,
}

/// Result of merging a table's parts.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub path: PathBuf,
    pub rows: u64,
    pub parts: usize,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, table: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| MigrateError::transfer(table, "output lock poisoned"))
}

/// Registry of table outputs for one run.
pub struct OutputRegistry {
    settings: OutputSettings,
    tables: DashMap<String, Arc<Mutex<TableOutput>>>,
}

impl OutputRegistry {
    pub fn new(settings: OutputSettings) -> Self {
        Self {
            settings,
            tables: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &OutputSettings {
        &self.settings
    }

    /// Register a table; no file is created until the first write.
    pub fn register(&self, table: &str, stem: &str, header: Vec<String>) {
        let extension = self.settings.format.extension();
        self.tables.entry(normalize(table)).or_insert_with(|| {
            Arc::new(Mutex::new(TableOutput {
                name: table.to_string(),
                stem: stem.to_string(),
                header,
                extension,
                file_number: 0,
                rows_in_current: 0,
                parts: Vec::new(),
                merged: false,
            }))
        });
    }

    fn output(&self, table: &str) -> Result<Arc<Mutex<TableOutput>>> {
        self.tables
            .get(&normalize(table))
            .map(|o| o.clone())
            .ok_or_else(|| MigrateError::transfer(table, "no output registered"))
    }

    /// Path of the merged (or single) output of a table.
    pub fn final_path(&self, table: &str) -> Result<PathBuf> {
        let output = self.output(table)?;
        let out = lock(&*output, table)?;
        Ok(self.final_path_of(&out))
    }

    fn final_path_of(&self, out: &TableOutput) -> PathBuf {
        self.settings
            .dir
            .join(format!("{}.{}", out.stem, out.extension))
    }

    /// Part file paths of a table, in file-number order.
    pub fn parts(&self, table: &str) -> Result<Vec<PathBuf>> {
        let output = self.output(table)?;
        let out = lock(&*output, table)?;
        Ok(out.part_paths())
    }

    /// Switch a table to its next file.
    ///
    /// Any file already at the new path is deleted and replaced by a file
    /// holding only the header row.
    pub fn rotate(&self, table: &str) -> Result<PathBuf> {
        let output = self.output(table)?;
        let mut out = lock(&*output, table)?;
        self.rotate_locked(&mut out)
    }

    fn rotate_locked(&self, out: &mut TableOutput) -> Result<PathBuf> {
        out.file_number += 1;
        let path = if self.settings.one_file_per_table {
            self.final_path_of(out)
        } else {
            self.settings.dir.join(format!(
                "{}_{}.{}",
                out.stem, out.file_number, out.extension
            ))
        };
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        self.create_with_header(&path, &out.header)?;
        out.rows_in_current = 0;
        out.parts.push(Part {
            path: path.clone(),
            lock: Arc::new(Mutex::new(())),
        });
        debug!("{}: switched output to {}", out.name, path.display());
        Ok(path)
    }

    fn create_with_header(&self, path: &Path, header: &[String]) -> Result<()> {
        let mut file = File::create(path)?;
        if self.settings.format.write_bom() {
            file.write_all(UTF8_BOM)?;
        }
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.settings.format.delimiter())
            .from_writer(file);
        writer.write_record(header)?;
        writer.flush()?;
        Ok(())
    }

    /// Reserve room for `count` rows, rotating as parts fill up.
    ///
    /// Returns the segments to write plus any files opened by rotation.
    pub fn reserve(&self, table: &str, count: usize) -> Result<(Vec<Segment>, Vec<PathBuf>)> {
        let output = self.output(table)?;
        let mut out = lock(&*output, table)?;
        if out.merged {
            return Err(MigrateError::transfer(table, "write after merge"));
        }
        let limit = if self.settings.one_file_per_table {
            usize::MAX
        } else {
            self.settings.max_rows_per_file.max(1)
        };

        let mut segments = Vec::new();
        let mut rotated = Vec::new();
        let mut offset = 0;
        while offset < count {
            if out.parts.is_empty() || out.rows_in_current >= limit {
                rotated.push(self.rotate_locked(&mut out)?);
            }
            let room = limit - out.rows_in_current;
            let take = room.min(count - offset);
            let part = out.parts.last().cloned().ok_or_else(|| {
                MigrateError::transfer(table, "no current output file")
            })?;
            segments.push(Segment {
                path: part.path,
                rows: offset..offset + take,
                lock: part.lock,
            });
            out.rows_in_current += take;
            offset += take;
        }
        Ok((segments, rotated))
    }

    /// Write one batch of rows, in target column order.
    ///
    /// Blocking; call from a blocking thread. Records that fail to
    /// serialize are reported in the outcome and the batch continues.
    pub fn write_batch(&self, table: &str, rows: &[Vec<SqlValue>]) -> Result<WriteOutcome> {
        let (segments, rotated) = self.reserve(table, rows.len())?;
        let mut outcome = WriteOutcome {
            rotated,
            ..Default::default()
        };
        for segment in segments {
            let _guard = lock(&*segment.lock, table)?;
            let file = OpenOptions::new().append(true).open(&segment.path)?;
            let mut writer = csv::WriterBuilder::new()
                .delimiter(self.settings.format.delimiter())
                .has_headers(false)
                .from_writer(file);
            for idx in segment.rows.clone() {
                let record: Vec<String> = rows[idx].iter().map(SqlValue::to_field).collect();
                match writer.write_record(&record) {
                    Ok(()) => outcome.written += 1,
                    Err(e) => outcome.failures.push((idx, e.to_string())),
                }
            }
            writer.flush()?;
        }
        Ok(outcome)
    }

    /// Merge a table's parts into `<stem>.<ext>` and delete them.
    ///
    /// A table that never received rows gets a header-only file. Callers
    /// gate this on the status counters; a second merge is an error.
    pub fn merge(&self, table: &str) -> Result<MergeOutcome> {
        let output = self.output(table)?;
        let mut out = lock(&*output, table)?;
        if out.merged {
            return Err(MigrateError::transfer(table, "output already merged"));
        }
        let merged_path = self.final_path_of(&out);

        if self.settings.one_file_per_table {
            if out.parts.is_empty() {
                self.rotate_locked(&mut out)?;
            }
            out.merged = true;
            return Ok(MergeOutcome {
                path: merged_path.clone(),
                rows: count_rows(&merged_path, self.settings.format)?,
                parts: 1,
            });
        }

        let parts = out.part_paths();
        let rows = match parts.as_slice() {
            [] => {
                self.create_with_header(&merged_path, &out.header)?;
                0
            }
            [single] => {
                std::fs::rename(single, &merged_path)?;
                count_rows(&merged_path, self.settings.format)?
            }
            _ => {
                let rows = self.concatenate(&merged_path, &out.header, &parts)?;
                for part in &parts {
                    if let Err(e) = std::fs::remove_file(part) {
                        warn!("{}: could not delete part {}: {}", out.name, part.display(), e);
                    }
                }
                rows
            }
        };
        out.merged = true;
        debug!(
            "{}: merged {} parts into {} ({} rows)",
            out.name,
            parts.len(),
            merged_path.display(),
            rows
        );
        Ok(MergeOutcome {
            path: merged_path,
            rows,
            parts: parts.len(),
        })
    }

    fn concatenate(&self, path: &Path, header: &[String], parts: &[PathBuf]) -> Result<u64> {
        let mut file = File::create(path)?;
        if self.settings.format.write_bom() {
            file.write_all(UTF8_BOM)?;
        }
        let delimiter = self.settings.format.delimiter();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(file);
        writer.write_record(header)?;

        let mut rows = 0u64;
        for part in parts {
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(delimiter)
                .has_headers(true)
                .flexible(true)
                .from_path(part)?;
            for record in reader.byte_records() {
                writer.write_byte_record(&record?)?;
                rows += 1;
            }
        }
        writer.flush()?;
        Ok(rows)
    }

    pub fn is_merged(&self, table: &str) -> bool {
        let Ok(output) = self.output(table) else {
            return false;
        };
        let merged = output.lock().map(|out| out.merged).unwrap_or(false);
        merged
    }
}

/// Count data rows of an output file (header excluded).
pub fn count_rows(path: &Path, format: OutputFormat) -> Result<u64> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(format.delimiter())
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let mut rows = 0;
    for record in reader.byte_records() {
        record?;
        rows += 1;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(dir: &Path, max_rows: usize, one_file: bool, format: OutputFormat) -> OutputRegistry {
        let registry = OutputRegistry::new(OutputSettings {
            dir: dir.to_path_buf(),
            format,
            max_rows_per_file: max_rows,
            one_file_per_table: one_file,
        });
        registry.register("public.orders", "mig_public_orders", vec!["id".into(), "note".into()]);
        registry
    }

    fn rows(range: Range<i64>) -> Vec<Vec<SqlValue>> {
        range
            .map(|i| vec![SqlValue::I64(i), SqlValue::Text(format!("row {}", i))])
            .collect()
    }

    #[test]
    fn test_rotation_creates_k_plus_one_files() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path(), 1000, false, OutputFormat::Csv);
        for chunk in [0..1000, 1000..2000, 2000..2500] {
            let outcome = reg.write_batch("public.orders", &rows(chunk)).unwrap();
            assert!(outcome.failures.is_empty());
        }
        let parts = reg.parts("public.orders").unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts[2].ends_with("mig_public_orders_3.csv"));
        assert_eq!(count_rows(&parts[0], OutputFormat::Csv).unwrap(), 1000);
        assert_eq!(count_rows(&parts[2], OutputFormat::Csv).unwrap(), 500);

        let merged = reg.merge("public.orders").unwrap();
        assert_eq!(merged.rows, 2500);
        assert_eq!(merged.parts, 3);
        assert!(merged.path.ends_with("mig_public_orders.csv"));
        assert!(parts.iter().all(|p| !p.exists()));
        assert!(reg.merge("public.orders").is_err());
        assert!(reg.write_batch("public.orders", &rows(0..1)).is_err());
    }

    #[test]
    fn test_batch_split_across_parts() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path(), 4, false, OutputFormat::Csv);
        let (segments, rotated) = reg.reserve("public.orders", 10).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(rotated.len(), 3);
        assert_eq!(segments[0].rows, 0..4);
        assert_eq!(segments[2].rows, 8..10);

        // Exactly full: the next row opens a new part lazily.
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path(), 5, false, OutputFormat::Csv);
        let (_, rotated) = reg.reserve("public.orders", 5).unwrap();
        assert_eq!(rotated.len(), 1);
    }

    #[test]
    fn test_rotate_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("mig_public_orders_1.csv");
        std::fs::write(&stale, "old,data\n1,2\n3,4\n").unwrap();

        let reg = registry(dir.path(), 10, false, OutputFormat::Csv);
        let path = reg.rotate("public.orders").unwrap();
        assert_eq!(path, stale);
        assert_eq!(std::fs::read_to_string(&stale).unwrap(), "id,note\n");
    }

    #[test]
    fn test_single_part_and_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path(), 100, false, OutputFormat::Tsv);
        reg.register("public.empty", "mig_public_empty", vec!["id".into()]);

        reg.write_batch("public.orders", &rows(0..3)).unwrap();
        let merged = reg.merge("public.orders").unwrap();
        assert_eq!(merged.rows, 3);
        let content = std::fs::read_to_string(&merged.path).unwrap();
        assert!(content.starts_with("id\tnote\n0\trow 0\n"));

        let empty = reg.merge("public.empty").unwrap();
        assert_eq!(empty.rows, 0);
        assert_eq!(std::fs::read_to_string(empty.path).unwrap(), "id\n");
    }

    #[test]
    fn test_one_file_per_table_with_bom() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path(), 2, true, OutputFormat::ExcelCsv);
        reg.write_batch("public.orders", &rows(0..5)).unwrap();
        let parts = reg.parts("public.orders").unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].ends_with("mig_public_orders.csv"));

        let bytes = std::fs::read(&parts[0]).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        assert_eq!(reg.merge("public.orders").unwrap().rows, 5);
    }

    #[test]
    fn test_values_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path(), 10, false, OutputFormat::Csv);
        let batch = vec![vec![SqlValue::I64(1), SqlValue::Text("a, \"b\"\nc".into())]];
        reg.write_batch("public.orders", &batch).unwrap();
        let merged = reg.merge("public.orders").unwrap();
        assert_eq!(merged.rows, 1);
        let content = std::fs::read_to_string(merged.path).unwrap();
        assert!(content.contains("\"a, \"\"b\"\"\nc\""));
    }
}
