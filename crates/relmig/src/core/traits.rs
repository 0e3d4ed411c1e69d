//! Collaborator traits consumed by the reconciler and the pipeline.
//!
//! - [`SourceFetcher`]: produces a normalized [`ObjectGraph`] for a source
//! - [`RowSource`]: streams table rows in pages
//! - [`TypeTransform`]: maps source objects to target objects
//! - [`DdlBuilder`]: renders target objects as DDL text
//! - [`ValueHandler`]: converts one raw value on the export side
//!
//! Implementations are plain values registered in a
//! [`ServiceCatalog`](super::catalog::ServiceCatalog) per source kind.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::SourceConfig;
use crate::error::Result;
use crate::reconcile::intent::TableIntent;

use super::graph::{Column, ObjectGraph, Sequence, Synonym, Table, View};
use super::target::{
    TargetColumn, TargetForeignKey, TargetIndex, TargetObject, TargetSequence, TargetSynonym,
    TargetTable, TargetView,
};
use super::value::{RawValue, RowPage, SqlValue};

/// Predicate `(schema, object_name) -> keep`.
pub type ObjectFilter = dyn Fn(&str, &str) -> bool + Send + Sync;

/// Fetch a normalized object graph from a source.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Source kind identifier (e.g. "dump").
    fn kind(&self) -> &str;

    /// Fetch every object accepted by `filter`.
    async fn fetch(&self, config: &SourceConfig, filter: &ObjectFilter) -> Result<ObjectGraph>;
}

/// Options for reading rows from a table.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Columns to read, in the order they should appear in each row.
    pub columns: Vec<String>,
    /// Number of rows per page.
    pub page_size: usize,
    /// First row to read (zero-based, inclusive).
    pub start_row: Option<u64>,
    /// Row to stop before (exclusive).
    pub end_row: Option<u64>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            schema: String::new(),
            table: String::new(),
            columns: Vec::new(),
            page_size: 10_000,
            start_row: None,
            end_row: None,
        }
    }
}

/// Stream rows from a source.
///
/// # Streaming
///
/// [`read_table`](RowSource::read_table) returns a channel receiver. The
/// implementation spawns a producer that fills the channel, so a slow
/// consumer applies backpressure to the read.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Source kind identifier.
    fn kind(&self) -> &str;

    /// Check that the source can be reached.
    async fn test_connection(&self) -> Result<()>;

    /// Get the row count for a table.
    async fn row_count(&self, schema: &str, table: &str) -> Result<i64>;

    /// Start streaming pages of rows.
    ///
    /// Yields `Result<RowPage>` until a page with `is_last` is sent or an
    /// error occurs.
    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<RowPage>>;

    /// SQL text describing the read, recorded with failed records.
    fn select_sql(&self, opts: &ReadOptions) -> String {
        format!(
            "SELECT {} FROM {}.{}",
            opts.columns.join(", "),
            opts.schema,
            opts.table
        )
    }
}

/// Map source objects to target objects.
///
/// Builders seed target objects through explicit constructors; they never
/// share nested collections with the source graph.
pub trait TypeTransform: Send + Sync {
    /// Transform identifier (e.g. "generic").
    fn name(&self) -> &str;

    /// Map a source column to a target column, before precision adjustment.
    fn map_column(&self, source: &Column) -> TargetColumn;

    /// Vendor-specific clamping of numeric/string sizes.
    fn adjust_precision(&self, _column: &mut TargetColumn) {}

    /// Whether the source column is a large object (CLOB/BLOB family).
    fn is_lob(&self, source: &Column) -> bool;

    /// Partition clause for the target table, if the source is partitioned.
    fn build_partition_ddl(&self, source: &Table) -> Option<String>;

    /// Map a source column and apply precision adjustment.
    fn build_target_column(&self, source: &Column) -> TargetColumn {
        let mut column = self.map_column(source);
        self.adjust_precision(&mut column);
        column
    }

    /// Build the shell of a target table for an intent.
    ///
    /// Columns, keys and indexes are reconciled separately against the
    /// resolved target, which may be shared by several intents.
    fn build_target_table(&self, intent: &TableIntent, source: &Table) -> TargetTable {
        let mut table = TargetTable::seed(&intent.target_owner, &intent.target, source);
        table.partition_ddl = self.build_partition_ddl(source);
        table
    }

    fn build_target_view(&self, schema: &str, name: &str, source: &View) -> TargetView {
        TargetView::from_source(schema, name, source)
    }

    fn build_target_sequence(&self, schema: &str, name: &str, source: &Sequence) -> TargetSequence {
        TargetSequence::from_source(schema, name, source)
    }

    fn build_target_synonym(&self, schema: &str, name: &str, source: &Synonym) -> TargetSynonym {
        TargetSynonym::from_source(schema, name, source)
    }
}

/// Render target objects as DDL statements.
///
/// Errors come from identifier validation while quoting.
pub trait DdlBuilder: Send + Sync {
    fn create_schema(&self, schema: &str) -> Result<String>;

    fn create_table(&self, table: &TargetTable) -> Result<String>;

    fn drop_table(&self, table: &TargetTable) -> Result<String>;

    /// `None` when the table has no primary key.
    fn create_primary_key(&self, table: &TargetTable) -> Result<Option<String>>;

    fn create_foreign_key(&self, table: &TargetTable, fk: &TargetForeignKey) -> Result<String>;

    fn create_index(&self, table: &TargetTable, index: &TargetIndex) -> Result<String>;

    /// Create a view, sequence, synonym or grant.
    fn create_object(&self, object: &TargetObject) -> Result<String>;

    fn drop_object(&self, object: &TargetObject) -> Result<String>;
}

/// Convert one raw source value on the export side.
///
/// The returned error message becomes a record-level conversion error.
pub trait ValueHandler: Send + Sync {
    fn read(&self, value: &RawValue, column: &Column) -> std::result::Result<SqlValue, String>;
}
