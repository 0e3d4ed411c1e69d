//! Configuration reconciler.
//!
//! Maintains the pair (intent set, target graph) for a source object graph
//! and keeps it consistent across renames, N:1 merges, schema selection
//! changes and source refreshes.
//!
//! Invariants kept here:
//! - every target table's column set is the union of the selected column
//!   intents of all intents mapping to it;
//! - a target table with no mapping intent is removed;
//! - a foreign key to a table whose name is ambiguous across selected
//!   schemas references the owner-prefixed target name.

pub mod intent;
pub mod naming;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{glob_match, Config, SourceConfig};
use crate::core::graph::{
    Column, ForeignKey, Grant, Index, IndexColumn, ObjectGraph, ObjectKind, Schema, Sequence,
    Synonym, Table, View,
};
use crate::core::identifier::{normalize, validate_identifier, ObjectKey};
use crate::core::named::{Named, NamedList};
use crate::core::target::{
    TargetColumn, TargetForeignKey, TargetGrant, TargetGraph, TargetIndex, TargetObject,
    TargetPrimaryKey, TargetTable,
};
use crate::core::traits::{SourceFetcher, TypeTransform};
use crate::error::{MigrateError, Result};

pub use intent::{ColumnIntent, IntentSet, KeyIntent, ObjectIntent, TableIntent};
use naming::{target_name, CollisionMap};

/// Naming and default-flag options of the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Keep source schema names as target schemas.
    pub add_user_schema: bool,
    /// Owner-prefix duplicate names even when schemas are kept.
    pub force_duplicates: bool,
    /// Target schema when source schemas are not kept.
    pub target_schema: String,
    #[serde(default)]
    pub schema_map: BTreeMap<String, String>,
    /// Selected source schemas; empty selects all.
    #[serde(default)]
    pub schemas: Vec<String>,
    /// Table name globs; tables failing them get unselected intents.
    #[serde(default)]
    pub include_tables: Vec<String>,
    #[serde(default)]
    pub exclude_tables: Vec<String>,
    pub migrate_data: bool,
    pub create_foreign_keys: bool,
    pub create_indexes: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            add_user_schema: false,
            force_duplicates: false,
            target_schema: "public".to_string(),
            schema_map: BTreeMap::new(),
            schemas: Vec::new(),
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            migrate_data: true,
            create_foreign_keys: true,
            create_indexes: true,
        }
    }
}

impl ReconcileOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            add_user_schema: config.migration.add_user_schema,
            force_duplicates: config.migration.force_duplicates,
            target_schema: config.target.schema.clone(),
            schema_map: config.migration.schema_map.clone(),
            schemas: config.source.schemas.clone(),
            include_tables: config.migration.include_tables.clone(),
            exclude_tables: config.migration.exclude_tables.clone(),
            migrate_data: config.migration.migrate_data,
            create_foreign_keys: config.migration.create_foreign_keys,
            create_indexes: config.migration.create_indexes,
        }
    }

    /// Target schema for a source owner.
    pub fn target_owner(&self, owner: &str) -> String {
        let mapped = self
            .schema_map
            .iter()
            .find(|(from, _)| from.eq_ignore_ascii_case(owner));
        match mapped {
            Some((_, to)) => to.to_lowercase(),
            None if self.add_user_schema => owner.to_lowercase(),
            None => self.target_schema.to_lowercase(),
        }
    }

    pub fn schema_selected(&self, schema: &str) -> bool {
        self.schemas.is_empty() || self.schemas.iter().any(|s| s.eq_ignore_ascii_case(schema))
    }

    /// Whether a table passes the include/exclude globs.
    pub fn table_selected(&self, name: &str) -> bool {
        let included = self.include_tables.is_empty()
            || self.include_tables.iter().any(|p| glob_match(p, name));
        included && !self.exclude_tables.iter().any(|p| glob_match(p, name))
    }

    pub fn suppress_duplicates(&self) -> bool {
        naming::suppress_duplicates(self.add_user_schema, self.force_duplicates)
    }
}

/// Where the reconciler's object graph came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphOrigin {
    #[default]
    None,
    /// Fetched from a source.
    Attached,
    /// Built from manual entries.
    Manual,
}

/// Non-table object supplied through a manual entry.
#[derive(Debug, Clone)]
pub enum SourceObject {
    View(View),
    Sequence(Sequence),
    Synonym(Synonym),
    Grant(Grant),
}

impl SourceObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            SourceObject::View(_) => ObjectKind::View,
            SourceObject::Sequence(_) => ObjectKind::Sequence,
            SourceObject::Synonym(_) => ObjectKind::Synonym,
            SourceObject::Grant(_) => ObjectKind::Grant,
        }
    }

    fn schema(&self) -> &str {
        match self {
            SourceObject::View(v) => &v.schema,
            SourceObject::Sequence(s) => &s.schema,
            SourceObject::Synonym(s) => &s.schema,
            SourceObject::Grant(g) => &g.schema,
        }
    }

    fn name(&self) -> &str {
        match self {
            SourceObject::View(v) => &v.name,
            SourceObject::Sequence(s) => &s.name,
            SourceObject::Synonym(s) => &s.name,
            SourceObject::Grant(g) => &g.name,
        }
    }
}

/// Serializable reconciler state, persisted in migration scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerState {
    pub options: ReconcileOptions,
    pub origin: GraphOrigin,
    #[serde(default)]
    pub graph: Option<ObjectGraph>,
    pub intents: IntentSet,
    pub targets: TargetGraph,
}

/// Counts for logging and reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileSummary {
    pub table_intents: usize,
    pub object_intents: usize,
    pub target_tables: usize,
    pub target_objects: usize,
    /// Target tables fed by more than one intent.
    pub merged_tables: usize,
}

/// Resolved referenced table of a foreign key.
struct FkReference {
    schema: String,
    table: String,
    columns: Vec<String>,
}

/// Owns the intent set and the target graph.
pub struct Reconciler {
    options: ReconcileOptions,
    transform: Arc<dyn TypeTransform>,
    graph: Option<Arc<ObjectGraph>>,
    origin: GraphOrigin,
    intents: IntentSet,
    targets: TargetGraph,
    collisions: CollisionMap,
    ref_counts: BTreeMap<ObjectKey, usize>,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions, transform: Arc<dyn TypeTransform>) -> Self {
        Self {
            options,
            transform,
            graph: None,
            origin: GraphOrigin::None,
            intents: IntentSet::new(),
            targets: TargetGraph::new(),
            collisions: CollisionMap::new(),
            ref_counts: BTreeMap::new(),
        }
    }

    /// Restore a reconciler from persisted state.
    pub fn from_state(state: ReconcilerState, transform: Arc<dyn TypeTransform>) -> Self {
        let mut reconciler = Self::new(state.options, transform);
        reconciler.origin = state.origin;
        reconciler.graph = state.graph.map(Arc::new);
        reconciler.intents = state.intents;
        reconciler.targets = state.targets;
        if let Some(graph) = reconciler.graph.clone() {
            reconciler.rebuild_collisions(&graph);
        }
        reconciler.recount();
        reconciler
    }

    pub fn state(&self) -> ReconcilerState {
        ReconcilerState {
            options: self.options.clone(),
            origin: self.origin,
            graph: self.graph.as_deref().cloned(),
            intents: self.intents.clone(),
            targets: self.targets.clone(),
        }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    pub fn transform(&self) -> Arc<dyn TypeTransform> {
        self.transform.clone()
    }

    pub fn graph(&self) -> Option<&ObjectGraph> {
        self.graph.as_deref()
    }

    pub fn origin(&self) -> GraphOrigin {
        self.origin
    }

    pub fn intents(&self) -> &IntentSet {
        &self.intents
    }

    pub fn targets(&self) -> &TargetGraph {
        &self.targets
    }

    pub fn table_intent(&self, owner: &str, name: &str) -> Option<&TableIntent> {
        self.intents.table(owner, name)
    }

    pub fn target_table(&self, schema: &str, name: &str) -> Option<&TargetTable> {
        self.targets.table(schema, name)
    }

    /// Number of table intents whose target is (schema, name).
    pub fn reference_count(&self, schema: &str, name: &str) -> usize {
        self.ref_counts
            .get(&ObjectKey::new(schema, name))
            .copied()
            .unwrap_or(0)
    }

    /// Table intents mapping to a target table, in source-key order.
    pub fn contributors(&self, schema: &str, name: &str) -> Vec<&TableIntent> {
        let key = ObjectKey::new(schema, name);
        self.intents.tables.values().filter(|i| i.target_key() == key).collect()
    }

    pub fn summary(&self) -> ReconcileSummary {
        ReconcileSummary {
            table_intents: self.intents.tables.len(),
            object_intents: self.intents.objects.len(),
            target_tables: self.targets.tables.len(),
            target_objects: self.targets.objects.len(),
            merged_tables: self.ref_counts.values().filter(|c| **c > 1).count(),
        }
    }

    // ===== Graph attachment =====

    /// Attach a fetched source graph.
    ///
    /// Existing intents are kept; the next `reconcile(false)` purges the ones
    /// whose source objects are gone, `reconcile(true)` rebuilds everything.
    pub fn attach_graph(&mut self, graph: ObjectGraph) -> Result<()> {
        if self.origin == GraphOrigin::Manual {
            return Err(MigrateError::Sequencing(
                "cannot attach a source object graph after manual entries were added".into(),
            ));
        }
        info!(
            "Attached object graph '{}' ({} schemas, {} tables)",
            graph.catalog,
            graph.schemas.len(),
            graph.table_count()
        );
        self.graph = Some(Arc::new(graph));
        self.origin = GraphOrigin::Attached;
        Ok(())
    }

    fn require_graph(&self) -> Result<Arc<ObjectGraph>> {
        self.graph.clone().ok_or_else(|| {
            MigrateError::Sequencing(
                "no source object graph attached and no manual entries added".into(),
            )
        })
    }

    /// Fetch objects not yet known, merge them into the graph and reconcile.
    ///
    /// Returns the number of objects added.
    pub async fn refresh(
        &mut self,
        fetcher: &dyn SourceFetcher,
        config: &SourceConfig,
    ) -> Result<usize> {
        if self.origin != GraphOrigin::Attached {
            return Err(MigrateError::Sequencing(
                "refresh requires an attached source object graph".into(),
            ));
        }
        let current = self.require_graph()?;
        let mut known = HashSet::new();
        for schema in current.schemas.iter() {
            for kind in ObjectKind::intent_kinds() {
                for name in schema.object_names(kind) {
                    known.insert((normalize(&schema.name), normalize(&name)));
                }
            }
        }
        drop(current);

        let options = self.options.clone();
        let filter = move |schema: &str, name: &str| {
            options.schema_selected(schema) && !known.contains(&(normalize(schema), normalize(name)))
        };
        let fetched = fetcher.fetch(config, &filter).await?;

        let added = match self.graph.as_mut() {
            Some(graph) => merge_graph(Arc::make_mut(graph), fetched),
            None => 0,
        };
        info!("Refresh found {} new source objects", added);
        self.reconcile(false)?;
        Ok(added)
    }

    // ===== Reconciliation =====

    /// Bring intents and targets in line with the source graph.
    ///
    /// With `reset`, all intents and targets are discarded first and new
    /// intents are created selected; otherwise new intents start unselected.
    pub fn reconcile(&mut self, reset: bool) -> Result<()> {
        let graph = self.require_graph()?;
        if reset {
            self.intents.clear();
            self.targets.clear();
        }
        self.rebuild_collisions(&graph);
        self.purge_orphans(&graph);
        self.create_intents(&graph, reset);
        self.rebuild(&graph);

        let summary = self.summary();
        info!(
            "Reconciled {} table intents and {} object intents into {} target tables ({} merged) and {} target objects",
            summary.table_intents,
            summary.object_intents,
            summary.target_tables,
            summary.merged_tables,
            summary.target_objects
        );
        Ok(())
    }

    fn rebuild_collisions(&mut self, graph: &ObjectGraph) {
        let manual = self.origin == GraphOrigin::Manual;
        let options = &self.options;
        self.collisions = CollisionMap::build(graph, |s| manual || options.schema_selected(s));
    }

    fn schema_in_scope(&self, schema: &str) -> bool {
        self.origin == GraphOrigin::Manual || self.options.schema_selected(schema)
    }

    /// Remove intents (and nested intents) whose source objects are gone or
    /// whose schema is no longer selected.
    fn purge_orphans(&mut self, graph: &ObjectGraph) {
        let manual = self.origin == GraphOrigin::Manual;
        let options = &self.options;
        let in_scope = |s: &str| manual || options.schema_selected(s);

        let before = self.intents.len();
        self.intents
            .tables
            .retain(|_, i| in_scope(&i.owner) && graph.table(&i.owner, &i.name).is_some());
        for intent in self.intents.tables.values_mut() {
            let Some(source) = graph.table(&intent.owner, &intent.name) else {
                continue;
            };
            intent.columns.retain(|c| source.columns.contains(&c.name));
            intent.foreign_keys.retain(|k| source.foreign_keys.contains(&k.name));
            intent.indexes.retain(|k| source.indexes.contains(&k.name));
        }
        self.intents.objects.retain(|(kind, _), o| {
            in_scope(&o.owner) && graph.has_object(*kind, &o.owner, &o.name)
        });

        let purged = before - self.intents.len();
        if purged > 0 {
            debug!("Purged {} orphaned intents", purged);
        }
    }

    /// Create intents for source objects that have none.
    fn create_intents(&mut self, graph: &ObjectGraph, selected: bool) {
        let suppress = self.options.suppress_duplicates();
        for schema in graph.schemas.iter() {
            if !self.schema_in_scope(&schema.name) {
                continue;
            }
            let owner = schema.name.as_str();
            let target_owner = self.options.target_owner(owner);
            for kind in ObjectKind::intent_kinds() {
                for name in schema.object_names(kind) {
                    let key = ObjectKey::new(owner, name.as_str());
                    let target = target_name(&self.collisions, suppress, kind, owner, &name);
                    if kind == ObjectKind::Table {
                        let selected = selected && self.options.table_selected(&name);
                        let migrate_data = selected && self.options.migrate_data;
                        self.intents.tables.entry(key).or_insert_with(|| {
                            let mut intent =
                                TableIntent::new(owner, &name, &target_owner, target, selected);
                            intent.migrate_data = migrate_data;
                            intent
                        });
                    } else {
                        self.intents.objects.entry((kind, key)).or_insert_with(|| {
                            ObjectIntent::new(kind, owner, &name, &target_owner, target, selected)
                        });
                    }
                }
            }
        }
    }

    /// Build missing targets, run the per-table sub-reconciliations, recount
    /// and run the merge/clean pass for every target table.
    fn rebuild(&mut self, graph: &ObjectGraph) {
        self.build_object_targets(graph);
        let keys: Vec<ObjectKey> = self.intents.tables.keys().cloned().collect();
        for key in &keys {
            self.reconcile_table(graph, key);
        }
        self.recount();
        self.drop_unreferenced();
        let targets: Vec<ObjectKey> = self.targets.tables.keys().cloned().collect();
        for target in &targets {
            self.merge_clean(graph, target);
        }
        self.prune_foreign_keys();
    }

    /// Drop target FKs that reference a table or column no longer present.
    fn prune_foreign_keys(&mut self) {
        let pruned = self.targets.prune_dangling_references();
        if pruned > 0 {
            debug!("Dropped {} foreign keys with dangling references", pruned);
        }
    }

    /// Re-run the key reconciliation of every table whose source FKs point
    /// at `tkey`, then prune what still does not resolve.
    fn restore_references(&mut self, graph: &ObjectGraph, tkey: &ObjectKey) {
        let referencing: Vec<(ObjectKey, ObjectKey)> = self
            .intents
            .tables
            .values()
            .filter(|i| {
                graph.table(&i.owner, &i.name).is_some_and(|source| {
                    source.foreign_keys.iter().any(|fk| {
                        let r = fk_reference(&self.intents, &self.options, &self.collisions, fk);
                        ObjectKey::new(r.schema.as_str(), r.table.as_str()) == *tkey
                    })
                })
            })
            .map(|i| (i.key(), i.target_key()))
            .collect();
        for (key, target) in &referencing {
            self.reconcile_table(graph, key);
            self.merge_clean(graph, target);
        }
        self.prune_foreign_keys();
    }

    fn recount(&mut self) {
        let mut counts = BTreeMap::new();
        for intent in self.intents.tables.values() {
            *counts.entry(intent.target_key()).or_insert(0) += 1;
        }
        self.ref_counts = counts;
    }

    fn drop_unreferenced(&mut self) {
        let counts = &self.ref_counts;
        self.targets
            .tables
            .retain(|key, _| counts.get(key).copied().unwrap_or(0) > 0);
        let live: HashSet<(ObjectKind, ObjectKey)> = self
            .intents
            .objects
            .values()
            .map(|o| (o.kind, o.target_key()))
            .collect();
        self.targets.objects.retain(|key, _| live.contains(key));
    }

    fn build_object_targets(&mut self, graph: &ObjectGraph) {
        let pending: Vec<ObjectIntent> = self
            .intents
            .objects
            .values()
            .filter(|o| !self.targets.objects.contains_key(&(o.kind, o.target_key())))
            .cloned()
            .collect();
        for intent in pending {
            if let Some(object) = self.build_object(graph, &intent) {
                self.targets
                    .objects
                    .insert((intent.kind, intent.target_key()), object);
            }
        }
    }

    fn build_object(&self, graph: &ObjectGraph, intent: &ObjectIntent) -> Option<TargetObject> {
        let (owner, name) = (intent.owner.as_str(), intent.name.as_str());
        let (schema, target) = (intent.target_owner.as_str(), intent.target.as_str());
        match intent.kind {
            ObjectKind::View => graph
                .view(owner, name)
                .map(|v| TargetObject::View(self.transform.build_target_view(schema, target, v))),
            ObjectKind::Sequence => graph.sequence(owner, name).map(|s| {
                TargetObject::Sequence(self.transform.build_target_sequence(schema, target, s))
            }),
            ObjectKind::Synonym => graph.synonym(owner, name).map(|s| {
                let mut synonym = self.transform.build_target_synonym(schema, target, s);
                let (ref_schema, ref_name) = self.resolve(&s.target_schema, &s.target_name);
                synonym.target_schema = ref_schema;
                synonym.target_name = ref_name;
                TargetObject::Synonym(synonym)
            }),
            ObjectKind::Grant => graph.grant(owner, name).map(|g| {
                let (_, object_name) = self.resolve(&g.schema, &g.object_name);
                TargetObject::Grant(TargetGrant {
                    schema: schema.to_string(),
                    name: target.to_string(),
                    object_name,
                    privilege: g.privilege.to_uppercase(),
                    grantee: g.grantee.to_lowercase(),
                    grantable: g.grantable,
                })
            }),
            _ => None,
        }
    }

    fn resolve(&self, owner: &str, name: &str) -> (String, String) {
        resolve_reference(&self.intents, &self.options, &self.collisions, owner, name)
    }

    /// Sub-reconciliations 4.1a-4.1d of one table intent against its target.
    fn reconcile_table(&mut self, graph: &ObjectGraph, key: &ObjectKey) {
        let Some(source) = graph.table(key.owner.as_str(), key.name.as_str()) else {
            return;
        };
        let refs: HashMap<String, FkReference> = source
            .foreign_keys
            .iter()
            .map(|fk| {
                (
                    normalize(&fk.name),
                    fk_reference(&self.intents, &self.options, &self.collisions, fk),
                )
            })
            .collect();
        let create_fks = self.options.create_foreign_keys;
        let create_indexes = self.options.create_indexes;
        let transform = self.transform.clone();

        let Some(intent) = self.intents.tables.get_mut(key) else {
            return;
        };
        let target = self
            .targets
            .tables
            .entry(intent.target_key())
            .or_insert_with(|| transform.build_target_table(intent, source));

        reconcile_columns(intent, target, source, transform.as_ref());
        reconcile_primary_key(intent, target, source);

        for fk in source.foreign_keys.iter() {
            if !intent.foreign_keys.contains(&fk.name) {
                intent.foreign_keys.insert(KeyIntent {
                    name: fk.name.clone(),
                    target: fk.name.to_lowercase(),
                    create: create_fks,
                });
            }
            let Some(ki) = intent.foreign_keys.get(&fk.name) else {
                continue;
            };
            if !ki.create || target.foreign_keys.contains(&ki.target) {
                continue;
            }
            let Some(reference) = refs.get(&normalize(&fk.name)) else {
                continue;
            };
            match build_foreign_key(intent, target, fk, &ki.target, reference) {
                Some(tfk) => {
                    target.foreign_keys.insert(tfk);
                }
                None => debug!(
                    "Skipping foreign key {} on {}: columns not resolved",
                    fk.name, key
                ),
            }
        }

        let pk_name = source.primary_key.as_ref().map(|pk| normalize(&pk.name));
        for idx in source.indexes.iter() {
            if pk_name.as_deref() == Some(normalize(&idx.name).as_str()) {
                continue;
            }
            if !intent.indexes.contains(&idx.name) {
                intent.indexes.insert(KeyIntent {
                    name: idx.name.clone(),
                    target: idx.name.to_lowercase(),
                    create: create_indexes,
                });
            }
            let Some(ki) = intent.indexes.get(&idx.name) else {
                continue;
            };
            if !ki.create {
                continue;
            }
            if let Some(existing) = target.indexes.get_mut(&ki.target) {
                existing.comment = idx.comment.clone();
                continue;
            }
            if let Some(tidx) = build_index(intent, target, source, idx, &ki.target) {
                target.indexes.insert(tidx);
            }
        }
    }

    /// Merge/clean pass for one target table.
    ///
    /// The required sets are the union of the selected column/key intents of
    /// every contributor. Missing members are added from the contributor's
    /// own source table; members required by nobody are dropped.
    fn merge_clean(&mut self, graph: &ObjectGraph, tkey: &ObjectKey) {
        let contributors: Vec<ObjectKey> =
            self.intents.contributors(tkey).map(|i| i.key()).collect();
        if contributors.is_empty() {
            return;
        }
        let mut refs = HashMap::new();
        for ck in &contributors {
            if let Some(source) = graph.table(ck.owner.as_str(), ck.name.as_str()) {
                for fk in source.foreign_keys.iter() {
                    refs.insert(
                        (ck.clone(), normalize(&fk.name)),
                        fk_reference(&self.intents, &self.options, &self.collisions, fk),
                    );
                }
            }
        }
        let transform = self.transform.clone();
        let Some(target) = self.targets.tables.get_mut(tkey) else {
            return;
        };

        let mut columns = HashSet::new();
        let mut fks = HashSet::new();
        let mut indexes = HashSet::new();
        let mut keep_pk = false;

        for ck in &contributors {
            let Some(intent) = self.intents.tables.get(ck) else {
                continue;
            };
            let source = graph.table(ck.owner.as_str(), ck.name.as_str());

            for ci in intent.columns.iter().filter(|c| c.create) {
                columns.insert(normalize(&ci.target));
                if target.columns.contains(&ci.target) {
                    continue;
                }
                if let Some(col) = source.and_then(|s| s.columns.get(&ci.name)) {
                    target
                        .columns
                        .insert(build_column(transform.as_ref(), col, &ci.target));
                }
            }

            let Some(source) = source else {
                continue;
            };
            if intent.create_pk {
                keep_pk = true;
                if target.primary_key.is_none() {
                    target.primary_key = build_primary_key(intent, target, source);
                }
            }
            for ki in intent.foreign_keys.iter().filter(|k| k.create) {
                fks.insert(normalize(&ki.target));
                if target.foreign_keys.contains(&ki.target) {
                    continue;
                }
                let (Some(fk), Some(reference)) = (
                    source.foreign_keys.get(&ki.name),
                    refs.get(&(ck.clone(), normalize(&ki.name))),
                ) else {
                    continue;
                };
                if let Some(tfk) = build_foreign_key(intent, target, fk, &ki.target, reference) {
                    target.foreign_keys.insert(tfk);
                }
            }
            for ki in intent.indexes.iter().filter(|k| k.create) {
                indexes.insert(normalize(&ki.target));
                if target.indexes.contains(&ki.target) {
                    continue;
                }
                let Some(idx) = source.indexes.get(&ki.name) else {
                    continue;
                };
                if let Some(tidx) = build_index(intent, target, source, idx, &ki.target) {
                    target.indexes.insert(tidx);
                }
            }
        }

        target.columns.retain(|c| columns.contains(&normalize(&c.name)));
        target.foreign_keys.retain(|fk| fks.contains(&normalize(&fk.name)));
        target.indexes.retain(|idx| indexes.contains(&normalize(&idx.name)));
        if !keep_pk {
            target.primary_key = None;
        }
        target.prune_dangling();
    }

    // ===== Rename operations =====

    /// Point a table intent at a new target table.
    ///
    /// Joining an existing target adds this table's missing columns to it;
    /// a vacated target used by nobody else is renamed in place; a target
    /// still used by other intents stays with them and this intent gets a
    /// fresh one.
    pub fn retarget_table(
        &mut self,
        owner: &str,
        name: &str,
        new_owner: Option<&str>,
        new_name: &str,
    ) -> Result<()> {
        validate_identifier(new_name)?;
        let graph = self.require_graph()?;
        let key = ObjectKey::new(owner, name);
        let intent = self
            .intents
            .tables
            .get(&key)
            .ok_or_else(|| MigrateError::resolution("table intent", key.qualified()))?;
        if graph.table(owner, name).is_none() {
            return Err(MigrateError::resolution("source table", key.qualified()));
        }
        let target_owner = match new_owner {
            Some(o) => {
                validate_identifier(o)?;
                o.trim().to_string()
            }
            None => intent.target_owner.clone(),
        };
        self.recount();
        self.move_table(&graph, &key, &target_owner, new_name.trim(), true);
        self.prune_foreign_keys();
        info!(
            "Retargeted table {} to {}.{}",
            key,
            target_owner,
            new_name.trim()
        );
        Ok(())
    }

    fn move_table(
        &mut self,
        graph: &ObjectGraph,
        key: &ObjectKey,
        owner: &str,
        name: &str,
        explicit: bool,
    ) {
        let new = ObjectKey::new(owner, name);
        let Some(intent) = self.intents.tables.get_mut(key) else {
            return;
        };
        let old = intent.target_key();
        intent.target_owner = owner.to_string();
        intent.target = name.to_string();
        if explicit {
            intent.renamed = true;
        }
        if old == new {
            return;
        }

        let old_count = self.ref_counts.get(&old).copied().unwrap_or(0);
        if self.targets.tables.contains_key(&new) {
            debug!("{} joins existing target {}", key, new);
            if old_count <= 1 {
                self.targets.tables.remove(&old);
                self.rewrite_references(&old, &new);
            }
        } else if old_count <= 1 {
            debug!("Renaming target {} to {} in place", old, new);
            if let Some(mut table) = self.targets.tables.remove(&old) {
                table.schema = owner.to_string();
                table.name = name.to_string();
                self.targets.tables.insert(new.clone(), table);
            }
            self.rewrite_references(&old, &new);
        } else {
            debug!("{} leaves shared target {}", key, old);
        }

        self.reconcile_table(graph, key);
        self.recount();
        self.merge_clean(graph, &new);
        if self.targets.tables.contains_key(&old) {
            self.merge_clean(graph, &old);
        }
    }

    fn rewrite_references(&mut self, old: &ObjectKey, new: &ObjectKey) {
        let rewritten = self.targets.rewrite_fk_references(old, new);
        if rewritten > 0 {
            debug!("Rewrote {} foreign key references {} -> {}", rewritten, old, new);
        }
        self.rewrite_object_references(old, new);
    }

    fn rewrite_object_references(&mut self, old: &ObjectKey, new: &ObjectKey) {
        for object in self.targets.objects.values_mut() {
            match object {
                TargetObject::Synonym(s)
                    if ObjectKey::new(s.target_schema.as_str(), s.target_name.as_str()) == *old =>
                {
                    s.target_schema = new.owner.as_str().to_string();
                    s.target_name = new.name.as_str().to_string();
                }
                TargetObject::Grant(g)
                    if ObjectKey::new(g.schema.as_str(), g.object_name.as_str()) == *old =>
                {
                    g.object_name = new.name.as_str().to_string();
                }
                _ => {}
            }
        }
    }

    /// Rename the target of one column of a table intent.
    pub fn retarget_column(
        &mut self,
        owner: &str,
        table: &str,
        column: &str,
        new_target: &str,
    ) -> Result<()> {
        validate_identifier(new_target)?;
        let new_target = new_target.trim();
        let graph = self.require_graph()?;
        let key = ObjectKey::new(owner, table);
        let qualified = format!("{}.{}", key.qualified(), column);

        let source = graph
            .table(owner, table)
            .ok_or_else(|| MigrateError::resolution("source table", key.qualified()))?;
        let source_column = source
            .columns
            .get(column)
            .ok_or_else(|| MigrateError::resolution("source column", &qualified))?;
        let intent = self
            .intents
            .tables
            .get(&key)
            .ok_or_else(|| MigrateError::resolution("table intent", key.qualified()))?;
        let ci = intent
            .columns
            .get(column)
            .ok_or_else(|| MigrateError::resolution("column intent", &qualified))?;
        if ci.target == new_target {
            return Ok(());
        }
        if intent
            .columns
            .iter()
            .any(|c| !c.name.eq_ignore_ascii_case(&ci.name) && c.target.eq_ignore_ascii_case(new_target))
        {
            return Err(MigrateError::NameConflict(format!(
                "column target '{}' is already used in {}",
                new_target, key
            )));
        }

        let tkey = intent.target_key();
        let old_target = ci.target.clone();
        let selected = ci.create;
        let shared_use = self
            .intents
            .contributors(&tkey)
            .filter(|i| i.key() != key)
            .any(|i| {
                i.columns
                    .iter()
                    .any(|c| c.create && c.target.eq_ignore_ascii_case(&old_target))
            });

        if let Some(ci) = self
            .intents
            .tables
            .get_mut(&key)
            .and_then(|i| i.columns.get_mut(column))
        {
            ci.target = new_target.to_string();
        }

        let transform = self.transform.clone();
        let mut renamed_in_place = false;
        if let Some(target) = self.targets.tables.get_mut(&tkey) {
            if selected && !target.columns.contains(new_target) {
                if !shared_use && target.columns.contains(&old_target) {
                    renamed_in_place = target.rename_column(&old_target, new_target);
                } else {
                    target
                        .columns
                        .insert(build_column(transform.as_ref(), source_column, new_target));
                }
            }
        }
        if renamed_in_place {
            for other in self.targets.tables.values_mut() {
                for fk in other.foreign_keys.iter_mut() {
                    if ObjectKey::new(fk.ref_schema.as_str(), fk.ref_table.as_str()) != tkey {
                        continue;
                    }
                    for c in fk.ref_columns.iter_mut() {
                        if c.eq_ignore_ascii_case(&old_target) {
                            *c = new_target.to_string();
                        }
                    }
                }
            }
        }

        self.reconcile_table(&graph, &key);
        self.merge_clean(&graph, &tkey);
        self.restore_references(&graph, &tkey);
        debug!("Retargeted column {} to {}", qualified, new_target);
        Ok(())
    }

    /// Rename the target of a view, sequence, synonym or grant.
    ///
    /// Tables are delegated to [`retarget_table`](Self::retarget_table).
    pub fn retarget_object(
        &mut self,
        kind: ObjectKind,
        owner: &str,
        name: &str,
        new_owner: Option<&str>,
        new_name: &str,
    ) -> Result<()> {
        if kind == ObjectKind::Table {
            return self.retarget_table(owner, name, new_owner, new_name);
        }
        validate_identifier(new_name)?;
        let graph = self.require_graph()?;
        let key = ObjectKey::new(owner, name);
        let intent = self
            .intents
            .objects
            .get(&(kind, key.clone()))
            .ok_or_else(|| MigrateError::resolution(format!("{} intent", kind), key.qualified()))?;
        if !graph.has_object(kind, owner, name) {
            return Err(MigrateError::resolution(
                format!("source {}", kind),
                key.qualified(),
            ));
        }
        let target_owner = match new_owner {
            Some(o) => {
                validate_identifier(o)?;
                o.trim().to_string()
            }
            None => intent.target_owner.clone(),
        };
        self.move_object(kind, &key, &target_owner, new_name.trim(), true)
    }

    fn move_object(
        &mut self,
        kind: ObjectKind,
        key: &ObjectKey,
        owner: &str,
        name: &str,
        explicit: bool,
    ) -> Result<()> {
        let new = ObjectKey::new(owner, name);
        let Some(intent) = self.intents.objects.get_mut(&(kind, key.clone())) else {
            return Err(MigrateError::resolution(format!("{} intent", kind), key.qualified()));
        };
        let old = intent.target_key();
        if old == new {
            intent.renamed |= explicit;
            return Ok(());
        }
        if self.targets.objects.contains_key(&(kind, new.clone())) {
            return Err(MigrateError::NameConflict(format!(
                "{} {} already exists in the target",
                kind, new
            )));
        }
        intent.target_owner = owner.to_string();
        intent.target = name.to_string();
        intent.renamed |= explicit;

        if let Some(mut object) = self.targets.objects.remove(&(kind, old.clone())) {
            object.set_identity(owner, name);
            self.targets.objects.insert((kind, new.clone()), object);
        }
        if kind == ObjectKind::View {
            self.rewrite_object_references(&old, &new);
        }
        debug!("Retargeted {} {} to {}", kind, key, new);
        Ok(())
    }

    /// Reapply default target names to intents that were not renamed
    /// explicitly.
    fn apply_default_names(&mut self, graph: &ObjectGraph) {
        self.recount();
        let suppress = self.options.suppress_duplicates();

        let table_moves: Vec<(ObjectKey, String, String)> = self
            .intents
            .tables
            .values()
            .filter(|i| !i.renamed)
            .filter_map(|i| {
                let owner = self.options.target_owner(&i.owner);
                let name =
                    target_name(&self.collisions, suppress, ObjectKind::Table, &i.owner, &i.name);
                (ObjectKey::new(owner.as_str(), name.as_str()) != i.target_key())
                    .then(|| (i.key(), owner, name))
            })
            .collect();
        for (key, owner, name) in table_moves {
            self.move_table(graph, &key, &owner, &name, false);
        }

        let object_moves: Vec<(ObjectKind, ObjectKey, String, String)> = self
            .intents
            .objects
            .values()
            .filter(|o| !o.renamed)
            .filter_map(|o| {
                let owner = self.options.target_owner(&o.owner);
                let name = target_name(&self.collisions, suppress, o.kind, &o.owner, &o.name);
                (ObjectKey::new(owner.as_str(), name.as_str()) != o.target_key())
                    .then(|| (o.kind, o.key(), owner, name))
            })
            .collect();
        for (kind, key, owner, name) in object_moves {
            if let Err(e) = self.move_object(kind, &key, &owner, &name, false) {
                warn!("Keeping current target of {} {}: {}", kind, key, e);
            }
        }
    }

    // ===== Selection operations =====

    /// Select or deselect a table for creation.
    pub fn select_table(&mut self, owner: &str, name: &str, create: bool) -> Result<()> {
        let graph = self.require_graph()?;
        let intent = self.table_intent_mut(owner, name)?;
        intent.create = create;
        let tkey = intent.target_key();
        self.merge_clean(&graph, &tkey);
        self.restore_references(&graph, &tkey);
        Ok(())
    }

    /// Whether existing target objects are dropped before creation.
    pub fn set_replace(&mut self, owner: &str, name: &str, replace: bool) -> Result<()> {
        self.table_intent_mut(owner, name)?.replace = replace;
        Ok(())
    }

    pub fn set_migrate_data(&mut self, owner: &str, name: &str, migrate: bool) -> Result<()> {
        self.table_intent_mut(owner, name)?.migrate_data = migrate;
        Ok(())
    }

    /// Select or deselect one column of a table intent.
    pub fn select_column(
        &mut self,
        owner: &str,
        table: &str,
        column: &str,
        create: bool,
    ) -> Result<()> {
        let graph = self.require_graph()?;
        let intent = self.table_intent_mut(owner, table)?;
        let ci = intent.columns.get_mut(column).ok_or_else(|| {
            MigrateError::resolution("column intent", format!("{}.{}.{}", owner, table, column))
        })?;
        ci.create = create;
        let key = intent.key();
        let tkey = intent.target_key();
        self.reconcile_table(&graph, &key);
        self.merge_clean(&graph, &tkey);
        self.restore_references(&graph, &tkey);
        Ok(())
    }

    /// Select or deselect a view, sequence, synonym or grant.
    pub fn select_object(
        &mut self,
        kind: ObjectKind,
        owner: &str,
        name: &str,
        create: bool,
    ) -> Result<()> {
        if kind == ObjectKind::Table {
            return self.select_table(owner, name, create);
        }
        let intent = self.intents.object_mut(kind, owner, name).ok_or_else(|| {
            MigrateError::resolution(format!("{} intent", kind), format!("{}.{}", owner, name))
        })?;
        intent.create = create;
        intent.replace = intent.replace && create;
        Ok(())
    }

    /// Change the selected source schemas.
    ///
    /// Intents of deselected schemas are purged, newly selected schemas get
    /// selected intents, and default target names are recomputed for every
    /// intent that was not renamed explicitly.
    pub fn set_schema_selection(&mut self, schemas: Vec<String>) -> Result<()> {
        let graph = self.require_graph()?;
        for schema in &schemas {
            validate_identifier(schema)?;
        }
        self.options.schemas = schemas;
        self.rebuild_collisions(&graph);
        self.purge_orphans(&graph);
        self.recount();
        self.drop_unreferenced();
        self.create_intents(&graph, true);
        self.apply_default_names(&graph);
        self.rebuild(&graph);
        info!(
            "Schema selection changed: {} table intents, {} target tables",
            self.intents.tables.len(),
            self.targets.tables.len()
        );
        Ok(())
    }

    fn table_intent_mut(&mut self, owner: &str, name: &str) -> Result<&mut TableIntent> {
        self.intents.table_mut(owner, name).ok_or_else(|| {
            MigrateError::resolution("table intent", format!("{}.{}", owner, name))
        })
    }

    // ===== Manual entries =====

    /// Add a table without a fetched graph.
    ///
    /// Fails with a sequencing error while a fetched graph is attached.
    pub fn add_table_entry(&mut self, table: Table) -> Result<()> {
        self.ensure_manual()?;
        validate_identifier(&table.schema)?;
        validate_identifier(&table.name)?;
        let (owner, name) = (table.schema.clone(), table.name.clone());
        manual_schema(self.manual_graph(), &owner)?.tables.insert(table);
        self.add_manual_intent(ObjectKind::Table, &owner, &name);
        self.finish_manual()
    }

    /// Add a view, sequence, synonym or grant without a fetched graph.
    pub fn add_object_entry(&mut self, object: SourceObject) -> Result<()> {
        self.ensure_manual()?;
        validate_identifier(object.schema())?;
        validate_identifier(object.name())?;
        let kind = object.kind();
        let (owner, name) = (object.schema().to_string(), object.name().to_string());
        let schema = manual_schema(self.manual_graph(), &owner)?;
        match object {
            SourceObject::View(v) => {
                schema.views.insert(v);
            }
            SourceObject::Sequence(s) => {
                schema.sequences.insert(s);
            }
            SourceObject::Synonym(s) => {
                schema.synonyms.insert(s);
            }
            SourceObject::Grant(g) => {
                schema.grants.insert(g);
            }
        }
        self.add_manual_intent(kind, &owner, &name);
        self.finish_manual()
    }

    fn ensure_manual(&self) -> Result<()> {
        if self.origin == GraphOrigin::Attached {
            return Err(MigrateError::Sequencing(
                "manual entries cannot be added while a source object graph is attached".into(),
            ));
        }
        Ok(())
    }

    fn manual_graph(&mut self) -> &mut ObjectGraph {
        self.origin = GraphOrigin::Manual;
        let graph = self
            .graph
            .get_or_insert_with(|| Arc::new(ObjectGraph::new("", "manual")));
        Arc::make_mut(graph)
    }

    fn add_manual_intent(&mut self, kind: ObjectKind, owner: &str, name: &str) {
        if let Some(graph) = self.graph.clone() {
            self.rebuild_collisions(&graph);
        }
        let suppress = self.options.suppress_duplicates();
        let target_owner = self.options.target_owner(owner);
        let target = target_name(&self.collisions, suppress, kind, owner, name);
        let key = ObjectKey::new(owner, name);
        if kind == ObjectKind::Table {
            let migrate_data = self.options.migrate_data;
            self.intents.tables.entry(key).or_insert_with(|| {
                let mut intent = TableIntent::new(owner, name, target_owner, target, true);
                intent.migrate_data = migrate_data;
                intent.manual = true;
                intent
            });
        } else {
            self.intents.objects.entry((kind, key)).or_insert_with(|| {
                let mut intent = ObjectIntent::new(kind, owner, name, target_owner, target, true);
                intent.manual = true;
                intent
            });
        }
    }

    fn finish_manual(&mut self) -> Result<()> {
        let graph = self.require_graph()?;
        self.apply_default_names(&graph);
        self.rebuild(&graph);
        Ok(())
    }
}

fn manual_schema<'a>(graph: &'a mut ObjectGraph, name: &str) -> Result<&'a mut Schema> {
    if !graph.schemas.contains(name) {
        graph.schemas.insert(Schema::new(name));
    }
    graph
        .schemas
        .get_mut(name)
        .ok_or_else(|| MigrateError::resolution("schema", name))
}

/// Target (schema, name) of a referenced table or view.
///
/// Uses the referenced intent's target when there is one, otherwise the
/// default naming, owner-prefixed when the name is ambiguous.
fn resolve_reference(
    intents: &IntentSet,
    options: &ReconcileOptions,
    collisions: &CollisionMap,
    owner: &str,
    name: &str,
) -> (String, String) {
    if let Some(intent) = intents.table(owner, name) {
        return (intent.target_owner.clone(), intent.target.clone());
    }
    if let Some(intent) = intents.object(ObjectKind::View, owner, name) {
        return (intent.target_owner.clone(), intent.target.clone());
    }
    (
        options.target_owner(owner),
        target_name(
            collisions,
            options.suppress_duplicates(),
            ObjectKind::Table,
            owner,
            name,
        ),
    )
}

fn fk_reference(
    intents: &IntentSet,
    options: &ReconcileOptions,
    collisions: &CollisionMap,
    fk: &ForeignKey,
) -> FkReference {
    let (schema, table) = resolve_reference(intents, options, collisions, &fk.ref_schema, &fk.ref_table);
    let referenced = intents.table(&fk.ref_schema, &fk.ref_table);
    let columns = fk
        .ref_columns
        .iter()
        .map(|c| {
            referenced
                .and_then(|i| i.columns.get(c))
                .map(|ci| ci.target.to_lowercase())
                .unwrap_or_else(|| c.to_lowercase())
        })
        .collect();
    FkReference {
        schema,
        table,
        columns,
    }
}

fn build_column(transform: &dyn TypeTransform, source: &Column, target_name: &str) -> TargetColumn {
    let mut column = transform.build_target_column(source);
    column.name = target_name.to_string();
    if transform.is_lob(source) {
        column.nullable = true;
    }
    column
}

/// Target name of a selected source column present in the target table.
fn map_column_target(intent: &TableIntent, target: &TargetTable, column: &str) -> Option<String> {
    intent
        .columns
        .get(column)
        .filter(|c| c.create)
        .map(|c| c.target.clone())
        .filter(|t| target.columns.contains(t))
}

/// 4.1a: create missing column intents and add selected columns to the target.
fn reconcile_columns(
    intent: &mut TableIntent,
    target: &mut TargetTable,
    source: &Table,
    transform: &dyn TypeTransform,
) {
    let mut taken: HashSet<String> = intent.columns.iter().map(|c| normalize(&c.target)).collect();
    for col in source.columns.iter() {
        if !intent.columns.contains(&col.name) {
            let name = naming::unique_name(&col.name.to_lowercase(), &taken);
            taken.insert(normalize(&name));
            intent.columns.insert(ColumnIntent {
                name: col.name.clone(),
                target: name,
                create: true,
            });
        }
        let Some(ci) = intent.columns.get(&col.name) else {
            continue;
        };
        if ci.create && !target.columns.contains(&ci.target) {
            target
                .columns
                .insert(build_column(transform, col, &ci.target));
        }
    }
}

fn build_primary_key(
    intent: &TableIntent,
    target: &TargetTable,
    source: &Table,
) -> Option<TargetPrimaryKey> {
    let pk = source.primary_key.as_ref()?;
    let columns: Vec<String> = pk
        .columns
        .iter()
        .filter_map(|c| map_column_target(intent, target, c))
        .collect();
    if columns.is_empty() {
        return None;
    }
    let name = if pk.name.trim().is_empty() {
        format!("pk_{}", target.name.to_lowercase())
    } else {
        pk.name.to_lowercase()
    };
    Some(TargetPrimaryKey { name, columns })
}

/// 4.1b: build the target PK from resolvable columns; prune a shared one.
fn reconcile_primary_key(intent: &mut TableIntent, target: &mut TargetTable, source: &Table) {
    if !source.has_pk() {
        intent.create_pk = false;
        return;
    }
    match build_primary_key(intent, target, source) {
        Some(pk) => {
            intent.create_pk = true;
            match target.primary_key.as_mut() {
                Some(existing) if existing.name == pk.name => existing.columns = pk.columns,
                Some(_) => {}
                None => target.primary_key = Some(pk),
            }
        }
        None => intent.create_pk = false,
    }
    let columns = &target.columns;
    if let Some(existing) = target.primary_key.as_mut() {
        existing.columns.retain(|c| columns.contains(c));
    }
    if target
        .primary_key
        .as_ref()
        .is_some_and(|pk| pk.columns.is_empty())
    {
        target.primary_key = None;
    }
}

/// 4.1c: one target FK per source FK; `None` when a column does not resolve.
fn build_foreign_key(
    intent: &TableIntent,
    target: &TargetTable,
    fk: &ForeignKey,
    key_target: &str,
    reference: &FkReference,
) -> Option<TargetForeignKey> {
    let columns: Option<Vec<String>> = fk
        .columns
        .iter()
        .map(|c| map_column_target(intent, target, c))
        .collect();
    let columns = columns?;
    if columns.is_empty() || columns.len() != reference.columns.len() {
        return None;
    }
    Some(TargetForeignKey {
        name: key_target.to_string(),
        columns,
        ref_schema: reference.schema.clone(),
        ref_table: reference.table.clone(),
        ref_columns: reference.columns.clone(),
        on_delete: fk.on_delete,
        on_update: fk.on_update,
    })
}

/// 4.1d: keeps per-expression order and uniqueness.
fn build_index(
    intent: &TableIntent,
    target: &TargetTable,
    source: &Table,
    idx: &Index,
    key_target: &str,
) -> Option<TargetIndex> {
    let mut columns = Vec::with_capacity(idx.columns.len());
    for c in &idx.columns {
        let expression = if source.columns.contains(&c.expression) {
            map_column_target(intent, target, &c.expression)?
        } else {
            c.expression.clone()
        };
        columns.push(IndexColumn {
            expression,
            order: c.order,
        });
    }
    if columns.is_empty() {
        return None;
    }
    Some(TargetIndex {
        name: key_target.to_string(),
        columns,
        unique: idx.unique,
        comment: idx.comment.clone(),
    })
}

/// Add objects of `from` missing in `into`; returns the number added.
fn merge_graph(into: &mut ObjectGraph, from: ObjectGraph) -> usize {
    let mut added = 0;
    for schema in Vec::from(from.schemas) {
        if !into.schemas.contains(&schema.name) {
            into.schemas.insert(Schema::new(schema.name.clone()));
        }
        let Some(dest) = into.schemas.get_mut(&schema.name) else {
            continue;
        };
        added += merge_list(&mut dest.tables, schema.tables);
        added += merge_list(&mut dest.views, schema.views);
        added += merge_list(&mut dest.sequences, schema.sequences);
        added += merge_list(&mut dest.synonyms, schema.synonyms);
        added += merge_list(&mut dest.grants, schema.grants);
        added += merge_list(&mut dest.routines, schema.routines);
    }
    added
}

fn merge_list<T: Named>(into: &mut NamedList<T>, from: NamedList<T>) -> usize {
    let mut added = 0;
    for item in Vec::from(from) {
        if !into.contains(item.name()) {
            into.insert(item);
            added += 1;
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::ReferentialAction;
    use crate::typemap::GenericTransform;

    fn transform() -> Arc<dyn TypeTransform> {
        Arc::new(GenericTransform::new())
    }

    fn dept(schema: &str) -> Table {
        Table::new(schema, "DEPT")
            .with_column(Column::new("ID", "NUMBER").with_precision(10, 0).not_null())
            .with_column(Column::new("NAME", "VARCHAR2").with_length(50))
            .with_primary_key("PK_DEPT", &["ID"])
    }

    fn emp() -> Table {
        let mut emp = Table::new("HR", "EMP")
            .with_column(Column::new("ID", "NUMBER").with_precision(10, 0).not_null())
            .with_column(Column::new("DEPT_ID", "NUMBER").with_precision(10, 0))
            .with_column(Column::new("CV", "CLOB").not_null())
            .with_primary_key("PK_EMP", &["ID"]);
        emp.foreign_keys.insert(ForeignKey {
            name: "FK_EMP_DEPT".into(),
            columns: vec!["DEPT_ID".into()],
            ref_schema: "HR".into(),
            ref_table: "DEPT".into(),
            ref_columns: vec!["ID".into()],
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::NoAction,
        });
        emp.indexes.insert(Index {
            name: "IX_EMP_DEPT".into(),
            columns: vec![IndexColumn::desc("DEPT_ID")],
            unique: false,
            comment: Some("lookup".into()),
        });
        emp
    }

    fn hr_graph() -> ObjectGraph {
        ObjectGraph::new("DB", "dump")
            .with_schema(Schema::new("HR").with_table(dept("HR")).with_table(emp()))
            .with_schema(Schema::new("SALES").with_table(dept("SALES")))
    }

    fn reconciled(graph: ObjectGraph) -> Reconciler {
        let mut r = Reconciler::new(ReconcileOptions::default(), transform());
        r.attach_graph(graph).unwrap();
        r.reconcile(true).unwrap();
        r
    }

    #[test]
    fn test_reconcile_without_graph_is_sequencing_error() {
        let mut r = Reconciler::new(ReconcileOptions::default(), transform());
        assert!(matches!(r.reconcile(false), Err(MigrateError::Sequencing(_))));
    }

    #[test]
    fn test_ambiguous_names_are_owner_prefixed() {
        let r = reconciled(hr_graph());
        assert_eq!(r.table_intent("HR", "DEPT").unwrap().target, "hr_dept");
        assert_eq!(r.table_intent("SALES", "DEPT").unwrap().target, "sales_dept");
        assert_eq!(r.table_intent("HR", "EMP").unwrap().target, "emp");
        assert!(r.target_table("public", "hr_dept").is_some());
    }

    #[test]
    fn test_foreign_key_references_prefixed_target() {
        let r = reconciled(hr_graph());
        let emp = r.target_table("public", "emp").unwrap();
        let fk = emp.foreign_keys.get("fk_emp_dept").unwrap();
        assert_eq!(fk.ref_table, "hr_dept");
        assert_eq!(fk.columns, vec!["dept_id"]);
        assert_eq!(fk.ref_columns, vec!["id"]);
        assert_eq!(fk.on_delete, ReferentialAction::Cascade);
        let idx = emp.indexes.get("ix_emp_dept").unwrap();
        assert_eq!(idx.columns[0].order, crate::core::graph::SortOrder::Desc);
    }

    #[test]
    fn test_lob_columns_forced_nullable() {
        let r = reconciled(hr_graph());
        let emp = r.target_table("public", "emp").unwrap();
        assert!(emp.columns.get("cv").unwrap().nullable);
        assert!(!emp.columns.get("id").unwrap().nullable);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut r = reconciled(hr_graph());
        let before = r.state();
        r.reconcile(false).unwrap();
        assert_eq!(r.state(), before);
    }

    #[test]
    fn test_deselected_column_is_cleaned() {
        let mut r = reconciled(hr_graph());
        r.select_column("HR", "EMP", "DEPT_ID", false).unwrap();
        let emp = r.target_table("public", "emp").unwrap();
        assert!(!emp.columns.contains("dept_id"));
        assert!(emp.foreign_keys.is_empty());
        assert!(emp.indexes.is_empty());

        r.select_column("HR", "EMP", "DEPT_ID", true).unwrap();
        let emp = r.target_table("public", "emp").unwrap();
        assert!(emp.columns.contains("dept_id"));
        assert!(emp.foreign_keys.contains("fk_emp_dept"));
    }

    #[test]
    fn test_deselected_referenced_column_drops_foreign_key() {
        let mut r = reconciled(hr_graph());
        r.select_column("HR", "DEPT", "ID", false).unwrap();
        let dept = r.target_table("public", "hr_dept").unwrap();
        assert_eq!(dept.column_names(), vec!["name"]);
        assert!(dept.primary_key.is_none());
        let emp = r.target_table("public", "emp").unwrap();
        assert!(!emp.foreign_keys.contains("fk_emp_dept"));

        r.reconcile(false).unwrap();
        assert!(!r.target_table("public", "emp").unwrap().foreign_keys.contains("fk_emp_dept"));

        r.select_column("HR", "DEPT", "ID", true).unwrap();
        let fk = r
            .target_table("public", "emp")
            .unwrap()
            .foreign_keys
            .get("fk_emp_dept")
            .unwrap();
        assert_eq!(fk.ref_columns, vec!["id"]);
    }

    #[test]
    fn test_removed_referenced_column_drops_foreign_key() {
        let mut r = reconciled(hr_graph());
        let mut graph = hr_graph();
        let hr = graph.schemas.get_mut("HR").unwrap();
        hr.tables.insert(
            Table::new("HR", "DEPT")
                .with_column(Column::new("NAME", "VARCHAR2").with_length(50))
                .with_column(Column::new("CODE", "VARCHAR2").with_length(8)),
        );
        r.attach_graph(graph).unwrap();
        r.reconcile(false).unwrap();

        let dept = r.target_table("public", "hr_dept").unwrap();
        assert!(!dept.columns.contains("id"));
        let emp = r.target_table("public", "emp").unwrap();
        assert!(emp.foreign_keys.is_empty());
        assert!(emp.columns.contains("dept_id"));

        let before = r.state();
        r.reconcile(false).unwrap();
        assert_eq!(r.state(), before);
    }

    #[test]
    fn test_index_comment_refreshed_on_existing_target() {
        let mut r = reconciled(hr_graph());
        let mut graph = hr_graph();
        let hr = graph.schemas.get_mut("HR").unwrap();
        hr.tables
            .get_mut("EMP")
            .unwrap()
            .indexes
            .get_mut("IX_EMP_DEPT")
            .unwrap()
            .comment = Some("department lookup".into());
        r.attach_graph(graph).unwrap();
        r.reconcile(false).unwrap();

        let idx = r
            .target_table("public", "emp")
            .unwrap()
            .indexes
            .get("ix_emp_dept")
            .unwrap();
        assert_eq!(idx.comment.as_deref(), Some("department lookup"));
    }

    #[test]
    fn test_new_intents_unselected_without_reset() {
        let mut r = Reconciler::new(ReconcileOptions::default(), transform());
        r.attach_graph(hr_graph()).unwrap();
        r.reconcile(false).unwrap();
        let intent = r.table_intent("HR", "EMP").unwrap();
        assert!(!intent.create && !intent.replace && !intent.migrate_data);
        assert!(r.target_table("public", "emp").is_some());
    }

    #[test]
    fn test_manual_entries_and_sequencing() {
        let mut r = Reconciler::new(ReconcileOptions::default(), transform());
        r.add_table_entry(dept("HR")).unwrap();
        assert_eq!(r.origin(), GraphOrigin::Manual);
        assert!(r.table_intent("HR", "DEPT").unwrap().manual);
        assert!(r.target_table("public", "dept").is_some());
        assert!(matches!(
            r.attach_graph(hr_graph()),
            Err(MigrateError::Sequencing(_))
        ));

        let mut attached = reconciled(hr_graph());
        assert!(matches!(
            attached.add_table_entry(dept("FIN")),
            Err(MigrateError::Sequencing(_))
        ));
    }

    #[test]
    fn test_manual_duplicate_renames_earlier_entry() {
        let mut r = Reconciler::new(ReconcileOptions::default(), transform());
        r.add_table_entry(dept("HR")).unwrap();
        r.add_table_entry(dept("SALES")).unwrap();
        assert_eq!(r.table_intent("HR", "DEPT").unwrap().target, "hr_dept");
        assert!(r.target_table("public", "dept").is_none());
        assert!(r.target_table("public", "hr_dept").is_some());
    }

    #[test]
    fn test_retarget_column_renames_in_place() {
        let mut r = reconciled(hr_graph());
        r.retarget_column("HR", "DEPT", "NAME", "dept_name").unwrap();
        let dept = r.target_table("public", "hr_dept").unwrap();
        assert_eq!(dept.column_names(), vec!["id", "dept_name"]);

        assert!(matches!(
            r.retarget_column("HR", "DEPT", "ID", "dept_name"),
            Err(MigrateError::NameConflict(_))
        ));
        assert!(matches!(
            r.retarget_column("HR", "DEPT", "MISSING", "x"),
            Err(MigrateError::Resolution { .. })
        ));
    }

    #[test]
    fn test_retarget_object_conflict() {
        let mut graph = hr_graph();
        let hr = graph.schemas.get_mut("HR").unwrap();
        for name in ["S1", "S2"] {
            hr.sequences.insert(Sequence {
                schema: "HR".into(),
                name: name.into(),
                start: 1,
                increment: 1,
                min_value: None,
                max_value: None,
                cycle: false,
                cache: None,
            });
        }
        let mut r = reconciled(graph);
        r.retarget_object(ObjectKind::Sequence, "HR", "S1", None, "seq_one")
            .unwrap();
        assert!(r.targets().object(ObjectKind::Sequence, "public", "seq_one").is_some());
        assert!(matches!(
            r.retarget_object(ObjectKind::Sequence, "HR", "S2", None, "seq_one"),
            Err(MigrateError::NameConflict(_))
        ));
    }

    #[test]
    fn test_grant_and_synonym_follow_table_target() {
        let mut graph = hr_graph();
        let hr = graph.schemas.get_mut("HR").unwrap();
        hr.grants.insert(Grant::new("HR", "EMP", "select", "REPORTING"));
        hr.synonyms.insert(Synonym {
            schema: "HR".into(),
            name: "STAFF".into(),
            target_schema: "HR".into(),
            target_name: "EMP".into(),
            public: false,
        });
        let mut r = reconciled(graph);
        r.retarget_table("HR", "EMP", None, "employees").unwrap();
        match r.targets().object(ObjectKind::Synonym, "public", "staff") {
            Some(TargetObject::Synonym(s)) => assert_eq!(s.target_name, "employees"),
            other => panic!("unexpected {:?}", other),
        }
        match r
            .targets()
            .object(ObjectKind::Grant, "public", "select_emp_reporting")
        {
            Some(TargetObject::Grant(g)) => assert_eq!(g.object_name, "employees"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_schema_selection_recomputes_names() {
        let mut r = reconciled(hr_graph());
        r.set_schema_selection(vec!["HR".into()]).unwrap();
        assert!(r.table_intent("SALES", "DEPT").is_none());
        assert_eq!(r.table_intent("HR", "DEPT").unwrap().target, "dept");
        assert!(r.target_table("public", "hr_dept").is_none());
        assert_eq!(
            r.target_table("public", "emp")
                .unwrap()
                .foreign_keys
                .get("fk_emp_dept")
                .unwrap()
                .ref_table,
            "dept"
        );

        r.set_schema_selection(vec![]).unwrap();
        assert_eq!(r.table_intent("HR", "DEPT").unwrap().target, "hr_dept");
        assert!(r.table_intent("SALES", "DEPT").unwrap().create);
    }

    #[test]
    fn test_state_round_trip() {
        let r = reconciled(hr_graph());
        let json = serde_json::to_string(&r.state()).unwrap();
        let state: ReconcilerState = serde_json::from_str(&json).unwrap();
        let restored = Reconciler::from_state(state, transform());
        assert_eq!(restored.state(), r.state());
        assert_eq!(restored.reference_count("public", "emp"), 1);
    }
}
