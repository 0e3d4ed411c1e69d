//! Export jobs: one per contributing source table (or row range of one).

use crate::core::graph::{Column, Table};
use crate::core::identifier::ObjectKey;
use crate::error::{MigrateError, Result};
use crate::reconcile::Reconciler;
use crate::scheduler::{TaskKind, TaskPlan};

/// Everything an export worker needs to move one source table into its
/// target.
#[derive(Debug, Clone)]
pub struct TableJob {
    /// Source table metadata.
    pub source: Table,

    pub target_schema: String,
    pub target_name: String,

    /// Source columns to read, in read order.
    pub read_columns: Vec<Column>,

    /// For each target column, the index of the read column feeding it.
    /// `None` when this source has no column for it (N:1 merges).
    pub mapping: Vec<Option<usize>>,

    /// Target column names, in target order.
    pub header: Vec<String>,

    /// Row range `[start, end)` for split reads.
    pub range: Option<(u64, u64)>,

    /// Range number for split reads (1-based).
    pub partition_id: Option<usize>,
}

impl TableJob {
    /// Build the job of one table intent against its resolved target.
    pub fn from_intent(reconciler: &Reconciler, owner: &str, name: &str) -> Result<Self> {
        let intent = reconciler
            .table_intent(owner, name)
            .ok_or_else(|| MigrateError::resolution("table intent", format!("{}.{}", owner, name)))?;
        let graph = reconciler
            .graph()
            .ok_or_else(|| MigrateError::Sequencing("no source graph attached".into()))?;
        let source = graph
            .table(owner, name)
            .ok_or_else(|| MigrateError::resolution("table", format!("{}.{}", owner, name)))?;
        let target = reconciler
            .target_table(&intent.target_owner, &intent.target)
            .ok_or_else(|| {
                MigrateError::resolution(
                    "target table",
                    format!("{}.{}", intent.target_owner, intent.target),
                )
            })?;

        let mut read_columns: Vec<Column> = Vec::new();
        let mut mapping = Vec::with_capacity(target.columns.len());
        let mut header = Vec::with_capacity(target.columns.len());
        for column in target.columns.iter() {
            header.push(column.name.clone());
            let source_column = intent
                .columns
                .iter()
                .find(|c| c.create && c.target.eq_ignore_ascii_case(&column.name))
                .and_then(|c| source.columns.get(&c.name));
            mapping.push(source_column.map(|sc| {
                match read_columns
                    .iter()
                    .position(|r| r.name.eq_ignore_ascii_case(&sc.name))
                {
                    Some(pos) => pos,
                    None => {
                        read_columns.push(sc.clone());
                        read_columns.len() - 1
                    }
                }
            }));
        }

        Ok(Self {
            source: source.clone(),
            target_schema: target.schema.clone(),
            target_name: target.name.clone(),
            read_columns,
            mapping,
            header,
            range: None,
            partition_id: None,
        })
    }

    /// `schema.table` of the target, the key used for status and output.
    pub fn target_table(&self) -> String {
        format!("{}.{}", self.target_schema, self.target_name)
    }

    pub fn target_key(&self) -> ObjectKey {
        ObjectKey::new(self.target_schema.as_str(), self.target_name.as_str())
    }

    /// Label for logs: the source table, with the range number when split.
    pub fn label(&self) -> String {
        match self.partition_id {
            Some(id) => format!("{}:p{}", self.source.full_name(), id),
            None => self.source.full_name(),
        }
    }

    /// Split into `parts` jobs over contiguous row ranges of `row_count` rows.
    pub fn split(self, row_count: u64, parts: usize) -> Vec<TableJob> {
        let ranges = split_row_range(row_count, parts);
        if ranges.len() <= 1 {
            return vec![self];
        }
        ranges
            .into_iter()
            .enumerate()
            .map(|(i, range)| TableJob {
                range: Some(range),
                partition_id: Some(i + 1),
                ..self.clone()
            })
            .collect()
    }
}

/// Split `[0, total)` into at most `parts` contiguous ranges; the last
/// range is open-ended so rows appended since counting are still read.
pub fn split_row_range(total: u64, parts: usize) -> Vec<(u64, u64)> {
    if parts <= 1 || total < parts as u64 {
        return vec![(0, u64::MAX)];
    }
    let size = total / parts as u64;
    (0..parts as u64)
        .map(|i| {
            let start = i * size;
            let end = if i == parts as u64 - 1 {
                u64::MAX
            } else {
                (i + 1) * size
            };
            (start, end)
        })
        .collect()
}

/// Jobs for every data task of a plan, in plan order.
pub fn build_jobs(reconciler: &Reconciler, plan: &TaskPlan) -> Result<Vec<TableJob>> {
    plan.data_tasks()
        .filter(|t| t.kind == TaskKind::Data)
        .filter_map(|t| t.source.as_ref())
        .map(|src| TableJob::from_intent(reconciler, src.owner.as_str(), src.name.as_str()))
        .collect()
}
