//! Source object graph: Catalog → Schema → objects → columns/keys/indexes.
//!
//! The graph is produced by a source fetcher and treated as immutable by
//! the reconciler. Children are held in [`NamedList`]s so lookups by name
//! are O(1) and case-insensitive while iteration keeps the fetch order.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::identifier::{normalize, ObjectKey};
use super::named::{Named, NamedList};

/// Kind of a schema object, in no particular order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Schema,
    Sequence,
    Synonym,
    Grant,
    Table,
    View,
    PrimaryKey,
    ForeignKey,
    Index,
    Procedure,
    Function,
    Trigger,
}

impl ObjectKind {
    /// Lower-case name used in file names and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Schema => "schema",
            ObjectKind::Sequence => "sequence",
            ObjectKind::Synonym => "synonym",
            ObjectKind::Grant => "grant",
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::PrimaryKey => "primary_key",
            ObjectKind::ForeignKey => "foreign_key",
            ObjectKind::Index => "index",
            ObjectKind::Procedure => "procedure",
            ObjectKind::Function => "function",
            ObjectKind::Trigger => "trigger",
        }
    }

    /// Kinds that carry their own intent record, in dependency order.
    pub fn intent_kinds() -> [ObjectKind; 5] {
        [
            ObjectKind::Sequence,
            ObjectKind::Synonym,
            ObjectKind::Grant,
            ObjectKind::Table,
            ObjectKind::View,
        ]
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Data type as reported by the source (e.g. "NUMBER", "varchar", "CLOB").
    pub data_type: String,

    /// Maximum length for string/binary types (-1 for unbounded).
    #[serde(default)]
    pub length: i64,

    /// Numeric precision.
    #[serde(default)]
    pub precision: i32,

    /// Numeric scale.
    #[serde(default)]
    pub scale: i32,

    /// Whether the column allows NULL.
    #[serde(default = "default_true")]
    pub nullable: bool,

    /// Whether the column is an identity/auto-increment column.
    #[serde(default)]
    pub identity: bool,

    /// Default value expression, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Column {
    /// Create a nullable column with no size information.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            length: 0,
            precision: 0,
            scale: 0,
            nullable: true,
            identity: false,
            default: None,
            comment: None,
        }
    }

    pub fn with_length(mut self, length: i64) -> Self {
        self.length = length;
        self
    }

    pub fn with_precision(mut self, precision: i32, scale: i32) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

impl Named for Column {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Primary key metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub name: String,
    pub columns: Vec<String>,
}

/// Foreign key delete/update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    Cascade,
    Restrict,
    SetNull,
    SetDefault,
    #[default]
    NoAction,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

/// Foreign key metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,

    /// Referencing column names.
    pub columns: Vec<String>,

    /// Referenced schema name.
    pub ref_schema: String,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,

    #[serde(default)]
    pub on_delete: ReferentialAction,

    #[serde(default)]
    pub on_update: ReferentialAction,
}

impl Named for ForeignKey {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Sort order of one indexed expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One indexed column or expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub expression: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl IndexColumn {
    pub fn asc(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<IndexColumn>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Named for Index {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Partitioning scheme of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// "range", "list" or "hash".
    pub method: String,
    pub columns: Vec<String>,
    /// Partition bounds as reported by the source, one entry per partition.
    #[serde(default)]
    pub partitions: Vec<PartitionBound>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionBound {
    pub name: String,
    pub bound: String,
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions, in ordinal order.
    pub columns: NamedList<Column>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<PrimaryKey>,

    #[serde(default)]
    pub foreign_keys: NamedList<ForeignKey>,

    #[serde(default)]
    pub indexes: NamedList<Index>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<PartitionSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Approximate row count.
    #[serde(default)]
    pub row_count: i64,

    /// Largest observed (or estimated) row size in bytes.
    #[serde(default)]
    pub max_row_bytes: i64,
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: NamedList::new(),
            primary_key: None,
            foreign_keys: NamedList::new(),
            indexes: NamedList::new(),
            partition: None,
            comment: None,
            row_count: 0,
            max_row_bytes: 0,
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.insert(column);
        self
    }

    pub fn with_primary_key(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        self.primary_key = Some(PrimaryKey {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.schema.as_str(), self.name.as_str())
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn has_pk(&self) -> bool {
        self.primary_key
            .as_ref()
            .map(|pk| !pk.columns.is_empty())
            .unwrap_or(false)
    }

    /// Row size used for memory estimates: the observed maximum, or a
    /// declared-size estimate when the source did not report one.
    pub fn row_byte_size(&self) -> i64 {
        if self.max_row_bytes > 0 {
            return self.max_row_bytes;
        }
        self.columns
            .iter()
            .map(|c| if c.length > 0 { c.length.min(8000) } else { 16 })
            .sum()
    }
}

impl Named for Table {
    fn name(&self) -> &str {
        &self.name
    }
}

/// View metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub schema: String,
    pub name: String,
    /// SELECT text of the view.
    pub definition: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Named for View {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Sequence metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub schema: String,
    pub name: String,
    #[serde(default = "default_one")]
    pub start: i64,
    #[serde(default = "default_one")]
    pub increment: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
    #[serde(default)]
    pub cycle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<i64>,
}

impl Named for Sequence {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Synonym (alias) metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synonym {
    pub schema: String,
    pub name: String,
    pub target_schema: String,
    pub target_name: String,
    #[serde(default)]
    pub public: bool,
}

impl Named for Synonym {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Object privilege granted to a user or role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub schema: String,
    /// Stable name of the grant, unique within the schema.
    pub name: String,
    /// Object the privilege applies to.
    pub object_name: String,
    pub privilege: String,
    pub grantee: String,
    #[serde(default)]
    pub grantable: bool,
}

impl Grant {
    pub fn new(
        schema: impl Into<String>,
        object_name: impl Into<String>,
        privilege: impl Into<String>,
        grantee: impl Into<String>,
    ) -> Self {
        let object_name = object_name.into();
        let privilege = privilege.into();
        let grantee = grantee.into();
        let name = format!(
            "{}_{}_{}",
            normalize(&privilege),
            normalize(&object_name),
            normalize(&grantee)
        );
        Self {
            schema: schema.into(),
            name,
            object_name,
            privilege,
            grantee,
            grantable: false,
        }
    }
}

impl Named for Grant {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Procedural object kinds that are fetched but not migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineKind {
    Procedure,
    Function,
    Trigger,
}

impl RoutineKind {
    pub fn object_kind(&self) -> ObjectKind {
        match self {
            RoutineKind::Procedure => ObjectKind::Procedure,
            RoutineKind::Function => ObjectKind::Function,
            RoutineKind::Trigger => ObjectKind::Trigger,
        }
    }
}

/// Procedure, function or trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routine {
    pub schema: String,
    pub name: String,
    pub kind: RoutineKind,
    #[serde(default)]
    pub definition: String,
    /// Owning table, for triggers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

impl Named for Routine {
    fn name(&self) -> &str {
        &self.name
    }
}

/// All objects of one source schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default)]
    pub tables: NamedList<Table>,
    #[serde(default)]
    pub views: NamedList<View>,
    #[serde(default)]
    pub sequences: NamedList<Sequence>,
    #[serde(default)]
    pub synonyms: NamedList<Synonym>,
    #[serde(default)]
    pub grants: NamedList<Grant>,
    #[serde(default)]
    pub routines: NamedList<Routine>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.insert(table);
        self
    }

    /// Names of objects of the given kind, in fetch order.
    pub fn object_names(&self, kind: ObjectKind) -> Vec<String> {
        match kind {
            ObjectKind::Table => self.tables.names(),
            ObjectKind::View => self.views.names(),
            ObjectKind::Sequence => self.sequences.names(),
            ObjectKind::Synonym => self.synonyms.names(),
            ObjectKind::Grant => self.grants.names(),
            ObjectKind::Procedure | ObjectKind::Function | ObjectKind::Trigger => self
                .routines
                .iter()
                .filter(|r| r.kind.object_kind() == kind)
                .map(|r| r.name.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn has_object(&self, kind: ObjectKind, name: &str) -> bool {
        match kind {
            ObjectKind::Table => self.tables.contains(name),
            ObjectKind::View => self.views.contains(name),
            ObjectKind::Sequence => self.sequences.contains(name),
            ObjectKind::Synonym => self.synonyms.contains(name),
            ObjectKind::Grant => self.grants.contains(name),
            _ => false,
        }
    }
}

impl Named for Schema {
    fn name(&self) -> &str {
        &self.name
    }
}

/// The complete source object graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectGraph {
    /// Catalog (database) name.
    #[serde(default)]
    pub catalog: String,
    /// Source kind identifier, e.g. "dump", "oracle".
    #[serde(default)]
    pub source_kind: String,
    pub schemas: NamedList<Schema>,
}

impl ObjectGraph {
    pub fn new(catalog: impl Into<String>, source_kind: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            source_kind: source_kind.into(),
            schemas: NamedList::new(),
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schemas.insert(schema);
        self
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn table(&self, schema: &str, name: &str) -> Option<&Table> {
        self.schemas.get(schema)?.tables.get(name)
    }

    pub fn view(&self, schema: &str, name: &str) -> Option<&View> {
        self.schemas.get(schema)?.views.get(name)
    }

    pub fn sequence(&self, schema: &str, name: &str) -> Option<&Sequence> {
        self.schemas.get(schema)?.sequences.get(name)
    }

    pub fn synonym(&self, schema: &str, name: &str) -> Option<&Synonym> {
        self.schemas.get(schema)?.synonyms.get(name)
    }

    pub fn grant(&self, schema: &str, name: &str) -> Option<&Grant> {
        self.schemas.get(schema)?.grants.get(name)
    }

    pub fn has_object(&self, kind: ObjectKind, schema: &str, name: &str) -> bool {
        self.schemas
            .get(schema)
            .map(|s| s.has_object(kind, name))
            .unwrap_or(false)
    }

    /// Total number of tables across all schemas.
    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }
}

fn default_true() -> bool {
    true
}

fn default_one() -> i64 {
    1
}
