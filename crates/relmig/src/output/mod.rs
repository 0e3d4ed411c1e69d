//! File-based target layout.
//!
//! DDL goes to `<prefix>_<schema>_<kind>.sql` when schema files are split
//! by object kind, or to `<prefix>_<schema>.sql` otherwise. For every schema
//! a `<prefix>_<schema>_files.txt` lists its schema files in the order they
//! must be loaded. Data files use the stem `<prefix>_<schema>_<table>`.

use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::graph::ObjectKind;
use crate::error::Result;

/// Name of the schema file receiving objects of `kind`.
///
/// `None` selects the combined per-schema file.
pub fn schema_file_name(prefix: &str, schema: &str, kind: Option<ObjectKind>) -> String {
    match kind {
        Some(kind) => format!("{}_{}_{}.sql", prefix, schema.to_lowercase(), kind.as_str()),
        None => format!("{}_{}.sql", prefix, schema.to_lowercase()),
    }
}

/// Name of the schema file list of `schema`.
pub fn file_list_name(prefix: &str, schema: &str) -> String {
    format!("{}_{}_files.txt", prefix, schema.to_lowercase())
}

/// Stem of the data files of a target table.
pub fn data_stem(prefix: &str, schema: &str, table: &str) -> String {
    format!("{}_{}_{}", prefix, schema.to_lowercase(), table.to_lowercase())
}

/// Name of the record error side file.
pub fn error_file_name(prefix: &str) -> String {
    format!("{}_errors.jsonl", prefix)
}

/// Name of the run manifest.
pub fn manifest_file_name(prefix: &str) -> String {
    format!("{}_manifest.json", prefix)
}

/// Name of the persisted migration script.
pub fn script_file_name(prefix: &str) -> String {
    format!("{}_script.json", prefix)
}

/// Appends DDL statements to the schema files of a run.
///
/// A file is truncated the first time it is written in a run and appended
/// to afterwards.
pub struct SchemaWriter {
    output_dir: PathBuf,
    prefix: String,
    split: bool,
    opened: HashSet<PathBuf>,
    /// Schema → file names, in first-write order.
    files: BTreeMap<String, Vec<String>>,
}

impl SchemaWriter {
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>, split: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: prefix.into(),
            split,
            opened: HashSet::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the file receiving objects of `kind` in `schema`.
    pub fn path_for(&self, schema: &str, kind: ObjectKind) -> PathBuf {
        let kind = self.split.then_some(kind);
        self.output_dir
            .join(schema_file_name(&self.prefix, schema, kind))
    }

    /// Append one statement; returns the file it went to.
    pub fn append(&mut self, schema: &str, kind: ObjectKind, sql: &str) -> Result<PathBuf> {
        let path = self.path_for(schema, kind);
        let mut file = if self.opened.insert(path.clone()) {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.files
                .entry(schema.to_lowercase())
                .or_default()
                .push(name);
            File::create(&path)?
        } else {
            OpenOptions::new().append(true).open(&path)?
        };
        writeln!(file, "{}\n", sql.trim_end())?;
        debug!("Wrote {} DDL to {}", kind, path.display());
        Ok(path)
    }

    /// Schema files written so far, per schema.
    pub fn files(&self) -> &BTreeMap<String, Vec<String>> {
        &self.files
    }

    /// Write the schema file list of every schema; returns the list files.
    pub fn write_file_lists(&self) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.files.len());
        for (schema, files) in &self.files {
            let path = self.output_dir.join(file_list_name(&self.prefix, schema));
            let mut content = files.join("\n");
            content.push('\n');
            std::fs::write(&path, content)?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Read a schema file list back.
pub fn read_file_list(path: &Path) -> Result<Vec<String>> {
    Ok(std::fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}
