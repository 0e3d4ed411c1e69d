//! Flat JSON dump source.
//!
//! A dump file carries an object graph plus the rows of its tables. Rows are
//! either arrays in table column order or objects keyed by column name.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::SourceConfig;
use crate::core::graph::{ObjectGraph, Table};
use crate::core::identifier::normalize;
use crate::core::traits::{ObjectFilter, ReadOptions, RowSource, SourceFetcher};
use crate::core::value::{RawValue, RowPage, SourceRow};
use crate::error::{MigrateError, Result};

/// On-disk layout of a dump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpFile {
    pub graph: ObjectGraph,

    /// Rows keyed by `SCHEMA.TABLE`.
    #[serde(default)]
    pub rows: BTreeMap<String, Vec<RawValue>>,

    /// Simulate an unreachable source: metadata is readable, rows are not.
    #[serde(default)]
    pub offline: bool,
}

impl DumpFile {
    pub fn new(graph: ObjectGraph) -> Self {
        Self {
            graph,
            rows: BTreeMap::new(),
            offline: false,
        }
    }

    pub fn with_rows(mut self, schema: &str, table: &str, rows: Vec<RawValue>) -> Self {
        self.rows.insert(format!("{}.{}", schema, table), rows);
        self
    }

    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Source fetcher and row source over a [`DumpFile`].
pub struct DumpSource {
    dump: Arc<DumpFile>,
    /// Normalized `schema.table` → key in `dump.rows`.
    row_keys: HashMap<String, String>,
}

impl DumpSource {
    pub fn new(dump: DumpFile) -> Self {
        let row_keys = dump
            .rows
            .keys()
            .map(|k| (normalize(k), k.clone()))
            .collect();
        Self {
            dump: Arc::new(dump),
            row_keys,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(DumpFile::load(path)?))
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.dump.graph
    }

    fn rows(&self, schema: &str, table: &str) -> Option<&Vec<RawValue>> {
        self.row_keys
            .get(&normalize(&format!("{}.{}", schema, table)))
            .and_then(|k| self.dump.rows.get(k))
    }

    fn table(&self, schema: &str, table: &str) -> Result<&Table> {
        self.dump
            .graph
            .table(schema, table)
            .ok_or_else(|| MigrateError::resolution("table", format!("{}.{}", schema, table)))
    }
}

/// Project a dumped row onto the requested columns.
///
/// Columns missing from the row read as NULL.
fn project(row: &RawValue, table: &Table, columns: &[String]) -> SourceRow {
    columns
        .iter()
        .map(|name| match row {
            RawValue::Array(values) => table
                .columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(name))
                .and_then(|pos| values.get(pos))
                .cloned()
                .unwrap_or(RawValue::Null),
            RawValue::Object(map) => map
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
                .unwrap_or(RawValue::Null),
            _ => RawValue::Null,
        })
        .collect()
}

#[async_trait]
impl SourceFetcher for DumpSource {
    fn kind(&self) -> &str {
        "dump"
    }

    async fn fetch(&self, config: &SourceConfig, filter: &ObjectFilter) -> Result<ObjectGraph> {
        let mut graph = self.dump.graph.clone();
        graph.source_kind = "dump".to_string();
        graph.schemas.retain(|s| {
            config.schemas.is_empty()
                || config.schemas.iter().any(|n| n.eq_ignore_ascii_case(&s.name))
        });
        for schema in graph.schemas.iter_mut() {
            let name = schema.name.clone();
            schema.tables.retain(|o| filter(&name, &o.name));
            schema.views.retain(|o| filter(&name, &o.name));
            schema.sequences.retain(|o| filter(&name, &o.name));
            schema.synonyms.retain(|o| filter(&name, &o.name));
            schema.grants.retain(|o| filter(&name, &o.name));
            schema.routines.retain(|o| filter(&name, &o.name));
        }
        debug!(
            "Fetched {} schemas, {} tables from dump",
            graph.schemas.len(),
            graph.table_count()
        );
        Ok(graph)
    }
}

#[async_trait]
impl RowSource for DumpSource {
    fn kind(&self) -> &str {
        "dump"
    }

    async fn test_connection(&self) -> Result<()> {
        if self.dump.offline {
            return Err(MigrateError::Connectivity("dump source is offline".into()));
        }
        Ok(())
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let meta = self.table(schema, table)?;
        Ok(self
            .rows(schema, table)
            .map(|r| r.len() as i64)
            .unwrap_or(meta.row_count))
    }

    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<RowPage>> {
        let (tx, rx) = mpsc::channel(16);
        let dump = self.dump.clone();
        let key = self
            .row_keys
            .get(&normalize(&format!("{}.{}", opts.schema, opts.table)))
            .cloned();

        tokio::spawn(async move {
            if let Err(e) = read_table_internal(dump, key, opts, tx.clone()).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }
}

async fn read_table_internal(
    dump: Arc<DumpFile>,
    key: Option<String>,
    opts: ReadOptions,
    tx: mpsc::Sender<Result<RowPage>>,
) -> Result<()> {
    if dump.offline {
        return Err(MigrateError::Connectivity(format!(
            "cannot read {}.{}: dump source is offline",
            opts.schema, opts.table
        )));
    }
    let table = dump.graph.table(&opts.schema, &opts.table).ok_or_else(|| {
        MigrateError::resolution("table", format!("{}.{}", opts.schema, opts.table))
    })?;
    let empty = Vec::new();
    let rows = key.and_then(|k| dump.rows.get(&k)).unwrap_or(&empty);

    let total = rows.len() as u64;
    let start = opts.start_row.unwrap_or(0).min(total);
    let end = opts.end_row.unwrap_or(total).clamp(start, total);
    let page_size = opts.page_size.max(1) as u64;

    let mut offset = start;
    loop {
        let page_end = (offset + page_size).min(end);
        let page = RowPage {
            rows: rows[offset as usize..page_end as usize]
                .iter()
                .map(|r| project(r, table, &opts.columns))
                .collect(),
            offset,
            is_last: page_end >= end,
        };
        let is_last = page.is_last;
        if tx.send(Ok(page)).await.is_err() {
            // Receiver dropped
            return Ok(());
        }
        if is_last {
            return Ok(());
        }
        offset = page_end;
    }
}
