//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

/// Row ceiling of a spreadsheet sheet, minus the header row.
pub const EXCEL_MAX_ROWS: usize = 1_048_575;

/// System resource information for the pre-flight memory check.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in bytes.
    pub total_memory_bytes: u64,
    /// RAM currently available to new allocations, in bytes.
    pub available_memory_bytes: u64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            total_memory_bytes: sys.total_memory(),
            available_memory_bytes: sys.available_memory(),
            cpu_cores: sys.cpus().len(),
        }
    }

    /// Fixed resources, for tests and dry runs.
    pub fn fixed(available_memory_bytes: u64, cpu_cores: usize) -> Self {
        Self {
            total_memory_bytes: available_memory_bytes,
            available_memory_bytes,
            cpu_cores,
        }
    }

    pub fn available_memory_gb(&self) -> f64 {
        self.available_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB available of {:.1} GB RAM, {} CPU cores",
            self.available_memory_gb(),
            self.total_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
            self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the object graph and rows come from.
    pub source: SourceConfig,

    /// Where schema files and data files are written.
    pub target: TargetConfig,

    /// Reconciliation and pipeline behavior.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source kind, used to look up services in the catalog (default: "dump").
    #[serde(default = "default_dump")]
    pub kind: String,

    /// Path of the dump file, for file-based sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Schemas to migrate. Empty means every schema in the source.
    #[serde(default)]
    pub schemas: Vec<String>,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schemas", &self.schemas)
            .finish()
    }
}

/// Output file format for data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Csv,
    Tsv,
    /// Comma-separated with a UTF-8 BOM and a spreadsheet row ceiling.
    ExcelCsv,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv | OutputFormat::ExcelCsv => "csv",
            OutputFormat::Tsv => "tsv",
        }
    }

    pub fn delimiter(&self) -> u8 {
        match self {
            OutputFormat::Csv | OutputFormat::ExcelCsv => b',',
            OutputFormat::Tsv => b'\t',
        }
    }

    pub fn write_bom(&self) -> bool {
        matches!(self, OutputFormat::ExcelCsv)
    }

    /// Hard upper bound on data rows in one physical file.
    pub fn row_ceiling(&self) -> usize {
        match self {
            OutputFormat::ExcelCsv => EXCEL_MAX_ROWS,
            _ => usize::MAX,
        }
    }
}

/// Target configuration (file-based target).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Directory receiving schema files, data files and side files.
    pub output_dir: PathBuf,

    /// File name prefix (default: "relmig").
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Target schema used when source schemas are not kept (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// Write one schema file per object kind instead of one per schema (default: true).
    #[serde(default = "default_true")]
    pub split_schema_files: bool,

    /// Write every table into a single data file, without rotation or merge.
    #[serde(default)]
    pub one_file_per_table: bool,

    #[serde(default)]
    pub format: OutputFormat,

    /// Append failed records to `<prefix>_errors.jsonl` (default: true).
    #[serde(default = "default_true")]
    pub write_error_file: bool,
}

/// Migration behavior configuration.
///
/// Pipeline sizing fields use `Option<T>` to distinguish "not set" from an
/// explicit value; the `get_*` accessors apply the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Keep source schema names in the target namespace.
    #[serde(default)]
    pub add_user_schema: bool,

    /// Owner-prefix duplicate names even when source schemas are kept.
    #[serde(default)]
    pub force_duplicates: bool,

    /// Explicit source schema → target schema mapping.
    #[serde(default)]
    pub schema_map: BTreeMap<String, String>,

    /// Tables to include (glob patterns, `*` and `?`).
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to exclude (glob patterns).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_threads: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_threads: Option<usize>,

    /// Row ranges read in parallel per large table (default: 1). Rows of
    /// split tables are not written in source order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_readers: Option<usize>,

    /// Rows buffered per write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_count: Option<usize>,

    /// Rows per physical data file before rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count_per_file: Option<usize>,

    /// Fraction of available memory the buffered rows may use before an OOM advisory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_fraction: Option<f64>,

    /// Drop and recreate objects that already exist (default: false).
    #[serde(default)]
    pub replace_existing: bool,

    /// Migrate table data by default (default: true).
    #[serde(default = "default_true")]
    pub migrate_data: bool,

    /// Create foreign keys (default: true).
    #[serde(default = "default_true")]
    pub create_foreign_keys: bool,

    /// Create indexes (default: true).
    #[serde(default = "default_true")]
    pub create_indexes: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            add_user_schema: false,
            force_duplicates: false,
            schema_map: BTreeMap::new(),
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            export_threads: None,
            import_threads: None,
            parallel_readers: None,
            commit_count: None,
            max_count_per_file: None,
            memory_fraction: None,
            replace_existing: false,
            migrate_data: true,
            create_foreign_keys: true,
            create_indexes: true,
        }
    }
}

impl MigrationConfig {
    pub fn get_export_threads(&self) -> usize {
        self.export_threads.unwrap_or(2)
    }

    pub fn get_import_threads(&self) -> usize {
        self.import_threads.unwrap_or(2)
    }

    pub fn get_parallel_readers(&self) -> usize {
        self.parallel_readers.unwrap_or(1).max(1)
    }

    pub fn get_commit_count(&self) -> usize {
        self.commit_count.unwrap_or(10_000)
    }

    /// Rows per file, clamped to the format's hard ceiling.
    pub fn get_max_count_per_file(&self, format: OutputFormat) -> usize {
        self.max_count_per_file
            .unwrap_or(1_000_000)
            .min(format.row_ceiling())
    }

    pub fn get_memory_fraction(&self) -> f64 {
        self.memory_fraction.unwrap_or(0.5)
    }
}

/// Case-insensitive glob match supporting `*` and `?`.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let n: Vec<char> = name.to_lowercase().chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

// Default value functions for serde
fn default_dump() -> String {
    "dump".to_string()
}

fn default_prefix() -> String {
    "relmig".to_string()
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_true() -> bool {
    true
}
