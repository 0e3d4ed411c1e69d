//! Target object graph: what will actually be created/written.
//!
//! Target objects are seeded from source objects through explicit
//! constructors that copy only the fields a transform may start from;
//! nested collections are never shared with the source graph.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::graph::{
    IndexColumn, ObjectKind, ReferentialAction, Sequence, Synonym, Table, View,
};
use super::identifier::{normalize, ObjectKey};
use super::named::{Named, NamedList};

/// Target column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetColumn {
    pub name: String,
    /// Target data type without size arguments (e.g. "varchar", "numeric").
    pub data_type: String,
    #[serde(default)]
    pub length: i64,
    #[serde(default)]
    pub precision: i32,
    #[serde(default)]
    pub scale: i32,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Normalized source type the column was mapped from.
    #[serde(default)]
    pub source_type: String,
}

impl TargetColumn {
    /// Full type text including size arguments, e.g. `varchar(50)`.
    pub fn type_text(&self) -> String {
        if self.precision > 0 {
            if self.scale > 0 {
                format!("{}({},{})", self.data_type, self.precision, self.scale)
            } else {
                format!("{}({})", self.data_type, self.precision)
            }
        } else if self.length > 0 {
            format!("{}({})", self.data_type, self.length)
        } else {
            self.data_type.clone()
        }
    }
}

impl Named for TargetColumn {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPrimaryKey {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub ref_schema: String,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

impl Named for TargetForeignKey {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetIndex {
    pub name: String,
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Named for TargetIndex {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Target table, possibly shared by several intents (N:1 merge).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetTable {
    pub schema: String,
    pub name: String,
    pub columns: NamedList<TargetColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<TargetPrimaryKey>,
    #[serde(default)]
    pub foreign_keys: NamedList<TargetForeignKey>,
    #[serde(default)]
    pub indexes: NamedList<TargetIndex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_ddl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl TargetTable {
    /// Seed an empty target table from a source table.
    ///
    /// Only the comment is carried over; columns, keys and indexes are
    /// added by the reconciler through the transform.
    pub fn seed(schema: impl Into<String>, name: impl Into<String>, source: &Table) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: NamedList::new(),
            primary_key: None,
            foreign_keys: NamedList::new(),
            indexes: NamedList::new(),
            partition_ddl: None,
            comment: source.comment.clone(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.schema.as_str(), self.name.as_str())
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.names()
    }

    /// Drop a column and every key/index that no longer resolves without it.
    pub fn remove_column(&mut self, name: &str) -> bool {
        if self.columns.remove(name).is_none() {
            return false;
        }
        self.prune_dangling();
        true
    }

    /// Remove PK columns, FKs and indexes that reference missing columns.
    pub fn prune_dangling(&mut self) {
        let columns = &self.columns;
        if let Some(pk) = self.primary_key.as_mut() {
            pk.columns.retain(|c| columns.contains(c));
            if pk.columns.is_empty() {
                self.primary_key = None;
            }
        }
        self.foreign_keys
            .retain(|fk| fk.columns.iter().all(|c| columns.contains(c)));
        // Expressions that are not plain column names are kept as-is.
        self.indexes.retain(|idx| {
            idx.columns
                .iter()
                .all(|c| !is_plain_identifier(&c.expression) || columns.contains(&c.expression))
        });
    }

    /// Rename a column and every reference to it within this table.
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        if !self.columns.rename(from, to, |c, n| c.name = n.to_string()) {
            return false;
        }
        let matches = |c: &String| c.eq_ignore_ascii_case(from);
        if let Some(pk) = self.primary_key.as_mut() {
            for c in pk.columns.iter_mut().filter(|c| matches(c)) {
                *c = to.to_string();
            }
        }
        for fk in self.foreign_keys.iter_mut() {
            for c in fk.columns.iter_mut().filter(|c| matches(c)) {
                *c = to.to_string();
            }
        }
        for idx in self.indexes.iter_mut() {
            for c in idx.columns.iter_mut() {
                if c.expression.eq_ignore_ascii_case(from) {
                    c.expression = to.to_string();
                }
            }
        }
        true
    }
}

impl Named for TargetTable {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Whether an index expression is a bare column name.
pub fn is_plain_identifier(expression: &str) -> bool {
    !expression.is_empty()
        && expression
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '#')
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetView {
    pub schema: String,
    pub name: String,
    pub definition: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl TargetView {
    pub fn from_source(schema: impl Into<String>, name: impl Into<String>, view: &View) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            definition: view.definition.clone(),
            columns: view.columns.iter().map(|c| c.to_lowercase()).collect(),
            comment: view.comment.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSequence {
    pub schema: String,
    pub name: String,
    pub start: i64,
    pub increment: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
    pub cycle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<i64>,
}

impl TargetSequence {
    pub fn from_source(schema: impl Into<String>, name: impl Into<String>, seq: &Sequence) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            start: seq.start,
            increment: seq.increment,
            min_value: seq.min_value,
            max_value: seq.max_value,
            cycle: seq.cycle,
            cache: seq.cache,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSynonym {
    pub schema: String,
    pub name: String,
    pub target_schema: String,
    pub target_name: String,
}

impl TargetSynonym {
    pub fn from_source(schema: impl Into<String>, name: impl Into<String>, syn: &Synonym) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            target_schema: syn.target_schema.to_lowercase(),
            target_name: syn.target_name.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetGrant {
    pub schema: String,
    pub name: String,
    pub object_name: String,
    pub privilege: String,
    pub grantee: String,
    pub grantable: bool,
}

/// Non-table target objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetObject {
    View(TargetView),
    Sequence(TargetSequence),
    Synonym(TargetSynonym),
    Grant(TargetGrant),
}

impl TargetObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            TargetObject::View(_) => ObjectKind::View,
            TargetObject::Sequence(_) => ObjectKind::Sequence,
            TargetObject::Synonym(_) => ObjectKind::Synonym,
            TargetObject::Grant(_) => ObjectKind::Grant,
        }
    }

    pub fn schema(&self) -> &str {
        match self {
            TargetObject::View(v) => &v.schema,
            TargetObject::Sequence(s) => &s.schema,
            TargetObject::Synonym(s) => &s.schema,
            TargetObject::Grant(g) => &g.schema,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TargetObject::View(v) => &v.name,
            TargetObject::Sequence(s) => &s.name,
            TargetObject::Synonym(s) => &s.name,
            TargetObject::Grant(g) => &g.name,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.schema(), self.name())
    }

    /// Move the object to a new (schema, name).
    pub fn set_identity(&mut self, schema: &str, name: &str) {
        let (s, n) = match self {
            TargetObject::View(v) => (&mut v.schema, &mut v.name),
            TargetObject::Sequence(x) => (&mut x.schema, &mut x.name),
            TargetObject::Synonym(x) => (&mut x.schema, &mut x.name),
            TargetObject::Grant(g) => (&mut g.schema, &mut g.name),
        };
        *s = schema.to_string();
        *n = name.to_string();
    }
}

/// All target objects keyed by (target schema, target name).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "TargetGraphRepr", into = "TargetGraphRepr")]
pub struct TargetGraph {
    pub tables: BTreeMap<ObjectKey, TargetTable>,
    /// Views, sequences, synonyms and grants, keyed per kind.
    pub objects: BTreeMap<(ObjectKind, ObjectKey), TargetObject>,
}

impl TargetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, schema: &str, name: &str) -> Option<&TargetTable> {
        self.tables.get(&ObjectKey::new(schema, name))
    }

    pub fn object(&self, kind: ObjectKind, schema: &str, name: &str) -> Option<&TargetObject> {
        self.objects.get(&(kind, ObjectKey::new(schema, name)))
    }

    /// Target schemas in use, lower-cased and sorted.
    pub fn schemas(&self) -> Vec<String> {
        let mut schemas: Vec<String> = self
            .tables
            .values()
            .map(|t| t.schema.to_lowercase())
            .chain(self.objects.values().map(|o| o.schema().to_lowercase()))
            .collect();
        schemas.sort();
        schemas.dedup();
        schemas
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.objects.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.objects.is_empty()
    }

    /// Point foreign keys that reference `from` at `to`.
    pub fn rewrite_fk_references(&mut self, from: &ObjectKey, to: &ObjectKey) -> usize {
        let mut rewritten = 0;
        for table in self.tables.values_mut() {
            for fk in table.foreign_keys.iter_mut() {
                if ObjectKey::new(fk.ref_schema.as_str(), fk.ref_table.as_str()) == *from {
                    fk.ref_schema = to.owner.as_str().to_string();
                    fk.ref_table = to.name.as_str().to_string();
                    rewritten += 1;
                }
            }
        }
        rewritten
    }

    /// Drop foreign keys whose referenced table or columns are gone.
    pub fn prune_dangling_references(&mut self) -> usize {
        let available: BTreeMap<ObjectKey, HashSet<String>> = self
            .tables
            .iter()
            .map(|(key, t)| (key.clone(), t.columns.iter().map(|c| normalize(&c.name)).collect()))
            .collect();
        let mut pruned = 0;
        for table in self.tables.values_mut() {
            let before = table.foreign_keys.len();
            table.foreign_keys.retain(|fk| {
                available
                    .get(&ObjectKey::new(fk.ref_schema.as_str(), fk.ref_table.as_str()))
                    .is_some_and(|cols| fk.ref_columns.iter().all(|c| cols.contains(&normalize(c))))
            });
            pruned += before - table.foreign_keys.len();
        }
        pruned
    }
}

#[derive(Serialize, Deserialize)]
struct TargetGraphRepr {
    tables: Vec<TargetTable>,
    #[serde(default)]
    objects: Vec<TargetObject>,
}

impl From<TargetGraph> for TargetGraphRepr {
    fn from(graph: TargetGraph) -> Self {
        Self {
            tables: graph.tables.into_values().collect(),
            objects: graph.objects.into_values().collect(),
        }
    }
}

impl From<TargetGraphRepr> for TargetGraph {
    fn from(repr: TargetGraphRepr) -> Self {
        Self {
            tables: repr.tables.into_iter().map(|t| (t.key(), t)).collect(),
            objects: repr
                .objects
                .into_iter()
                .map(|o| ((o.kind(), o.key()), o))
                .collect(),
        }
    }
}
