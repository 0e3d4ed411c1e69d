//! Task scheduler: turns a reconciled intent set into ordered tasks.
//!
//! Tasks are grouped into [`Phase`]s that respect object dependencies:
//! schemas first, then replaced objects are dropped, then sequences,
//! synonyms and grants, tables, data, keys and indexes, views, and finally
//! routines, which are reported as skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::graph::ObjectKind;
use crate::core::identifier::{normalize, ObjectKey};
use crate::core::target::TargetTable;
use crate::reconcile::{ObjectIntent, Reconciler};

/// Execution phase, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Schema,
    Clean,
    Objects,
    Tables,
    Data,
    Keys,
    Views,
    Routines,
}

impl Phase {
    pub fn all() -> [Phase; 8] {
        [
            Phase::Schema,
            Phase::Clean,
            Phase::Objects,
            Phase::Tables,
            Phase::Data,
            Phase::Keys,
            Phase::Views,
            Phase::Routines,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Schema => "schema",
            Phase::Clean => "clean",
            Phase::Objects => "objects",
            Phase::Tables => "tables",
            Phase::Data => "data",
            Phase::Keys => "keys",
            Phase::Views => "views",
            Phase::Routines => "routines",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a task does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "name", rename_all = "snake_case")]
pub enum TaskKind {
    CreateSchema,
    /// Drop a replaced object before it is recreated.
    Drop,
    Create,
    /// Export one contributing source table into its target.
    Data,
    PrimaryKey,
    ForeignKey(String),
    Index(String),
    /// Unsupported object, reported and skipped.
    Skip,
}

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: usize,
    pub phase: Phase,
    pub kind: TaskKind,
    pub object_kind: ObjectKind,
    /// Target schema.
    pub schema: String,
    /// Target object name.
    pub name: String,
    /// Contributing source object, for data, create and skip tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ObjectKey>,
}

impl Task {
    pub fn target_key(&self) -> ObjectKey {
        ObjectKey::new(self.schema.as_str(), self.name.as_str())
    }

    pub fn describe(&self) -> String {
        let what = match &self.kind {
            TaskKind::CreateSchema => format!("create schema {}", self.schema),
            TaskKind::Drop => format!("drop {} {}.{}", self.object_kind, self.schema, self.name),
            TaskKind::Create => format!("create {} {}.{}", self.object_kind, self.schema, self.name),
            TaskKind::Data => match &self.source {
                Some(src) => format!("copy {} into {}.{}", src, self.schema, self.name),
                None => format!("copy into {}.{}", self.schema, self.name),
            },
            TaskKind::PrimaryKey => format!("primary key on {}.{}", self.schema, self.name),
            TaskKind::ForeignKey(fk) => {
                format!("foreign key {} on {}.{}", fk, self.schema, self.name)
            }
            TaskKind::Index(ix) => format!("index {} on {}.{}", ix, self.schema, self.name),
            TaskKind::Skip => format!("skip {} {}.{}", self.object_kind, self.schema, self.name),
        };
        format!("[{}] {}", self.phase, what)
    }
}

/// Ordered tasks of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub tasks: Vec<Task>,
}

impl TaskPlan {
    /// Build the plan for the current state of a reconciler.
    pub fn build(reconciler: &Reconciler) -> Self {
        let mut builder = PlanBuilder::default();
        let intents = reconciler.intents();
        let targets = reconciler.targets();

        // Tables: one create per shared target, one data task per contributor.
        let mut created: BTreeSet<ObjectKey> = BTreeSet::new();
        for intent in intents.tables.values() {
            let target_key = intent.target_key();
            let Some(table) = targets.tables.get(&target_key) else {
                continue;
            };
            if intent.create && created.insert(target_key.clone()) {
                let contributors: Vec<_> = intents.contributors(&target_key).collect();
                let source = Some(intent.key());
                if contributors.iter().any(|c| c.create && c.replace) {
                    builder.push_table(Phase::Clean, TaskKind::Drop, ObjectKind::Table, table, source.clone());
                }
                builder.push_table(Phase::Tables, TaskKind::Create, ObjectKind::Table, table, source);

                if contributors.iter().any(|c| c.create && c.create_pk) && table.primary_key.is_some() {
                    builder.push_table(Phase::Keys, TaskKind::PrimaryKey, ObjectKind::PrimaryKey, table, None);
                }
                for index in table.indexes.iter() {
                    let kind = TaskKind::Index(index.name.clone());
                    builder.push_table(Phase::Keys, kind, ObjectKind::Index, table, None);
                }
                for fk in table.foreign_keys.iter() {
                    let kind = TaskKind::ForeignKey(fk.name.clone());
                    builder.push_table(Phase::Keys, kind, ObjectKind::ForeignKey, table, None);
                }
            }
            if intent.migrate_data {
                builder.push_table(Phase::Data, TaskKind::Data, ObjectKind::Table, table, Some(intent.key()));
            }
        }

        // Views, sequences, synonyms and grants; shared targets are created once.
        let mut created_objects: BTreeSet<(ObjectKind, ObjectKey)> = BTreeSet::new();
        for intent in intents.objects.values().filter(|o| o.create) {
            let key = (intent.kind, intent.target_key());
            if targets.objects.get(&key).is_none() || !created_objects.insert(key) {
                continue;
            }
            let phase = if intent.kind == ObjectKind::View {
                Phase::Views
            } else {
                Phase::Objects
            };
            if intent.replace {
                builder.push_object(Phase::Clean, TaskKind::Drop, intent);
            }
            builder.push_object(phase, TaskKind::Create, intent);
        }

        // Routines are never migrated.
        if let Some(graph) = reconciler.graph() {
            let options = reconciler.options();
            for schema in graph.schemas.iter().filter(|s| options.schema_selected(&s.name)) {
                let target_owner = options.target_owner(&schema.name);
                for routine in schema.routines.iter() {
                    builder.push(
                        Phase::Routines,
                        TaskKind::Skip,
                        routine.kind.object_kind(),
                        &target_owner,
                        &routine.name.to_lowercase(),
                        Some(ObjectKey::new(schema.name.as_str(), routine.name.as_str())),
                    );
                }
            }
        }

        // Schemas used by anything that is created.
        let schemas: BTreeMap<String, String> = builder
            .tasks
            .iter()
            .filter(|t| !matches!(t.kind, TaskKind::Skip))
            .map(|t| (normalize(&t.schema), t.schema.clone()))
            .collect();
        for schema in schemas.values() {
            let kind = TaskKind::CreateSchema;
            builder.push(Phase::Schema, kind, ObjectKind::Schema, schema, schema, None);
        }

        let plan = builder.finish();
        debug!("Planned {} tasks", plan.len());
        plan
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks of one phase, in plan order.
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |t| t.phase == phase)
    }

    pub fn data_tasks(&self) -> impl Iterator<Item = &Task> {
        self.phase(Phase::Data)
    }

    /// Number of tasks per phase.
    pub fn counts(&self) -> BTreeMap<Phase, usize> {
        let mut counts = BTreeMap::new();
        for task in &self.tasks {
            *counts.entry(task.phase).or_insert(0) += 1;
        }
        counts
    }

    /// Human-readable listing, one task per line.
    pub fn render(&self) -> String {
        self.tasks
            .iter()
            .map(|t| t.describe())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Default)]
struct PlanBuilder {
    tasks: Vec<Task>,
}

impl PlanBuilder {
    fn push(
        &mut self,
        phase: Phase,
        kind: TaskKind,
        object_kind: ObjectKind,
        schema: &str,
        name: &str,
        source: Option<ObjectKey>,
    ) {
        self.tasks.push(Task {
            id: 0,
            phase,
            kind,
            object_kind,
            schema: schema.to_string(),
            name: name.to_string(),
            source,
        });
    }

    fn push_table(
        &mut self,
        phase: Phase,
        kind: TaskKind,
        object_kind: ObjectKind,
        table: &TargetTable,
        source: Option<ObjectKey>,
    ) {
        self.push(phase, kind, object_kind, &table.schema, &table.name, source);
    }

    fn push_object(&mut self, phase: Phase, kind: TaskKind, intent: &ObjectIntent) {
        let source = Some(intent.key());
        self.push(phase, kind, intent.kind, &intent.target_owner, &intent.target, source);
    }

    fn finish(mut self) -> TaskPlan {
        // Stable: insertion order is kept within a phase.
        self.tasks.sort_by_key(|t| t.phase);
        for (id, task) in self.tasks.iter_mut().enumerate() {
            task.id = id;
        }
        TaskPlan { tasks: self.tasks }
    }
}
