//! Intent records: what the user wants done with each source object.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::graph::ObjectKind;
use crate::core::identifier::ObjectKey;
use crate::core::named::{Named, NamedList};

/// Intent for one source column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnIntent {
    /// Source column name.
    pub name: String,
    /// Target column name.
    pub target: String,
    /// Whether the column is selected for the target table.
    pub create: bool,
}

impl Named for ColumnIntent {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Intent for a foreign key or index of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyIntent {
    pub name: String,
    pub target: String,
    pub create: bool,
}

impl Named for KeyIntent {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Intent for one source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableIntent {
    pub owner: String,
    pub name: String,
    pub target_owner: String,
    pub target: String,
    pub create: bool,
    pub replace: bool,
    pub migrate_data: bool,
    /// Target name was set explicitly and survives schema-selection changes.
    #[serde(default)]
    pub renamed: bool,
    /// Added through a manual entry rather than from an attached graph.
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub columns: NamedList<ColumnIntent>,
    #[serde(default)]
    pub create_pk: bool,
    #[serde(default)]
    pub foreign_keys: NamedList<KeyIntent>,
    #[serde(default)]
    pub indexes: NamedList<KeyIntent>,
}

impl TableIntent {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        target_owner: impl Into<String>,
        target: impl Into<String>,
        selected: bool,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            target_owner: target_owner.into(),
            target: target.into(),
            create: selected,
            replace: selected,
            migrate_data: selected,
            renamed: false,
            manual: false,
            columns: NamedList::new(),
            create_pk: false,
            foreign_keys: NamedList::new(),
            indexes: NamedList::new(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.owner.as_str(), self.name.as_str())
    }

    pub fn target_key(&self) -> ObjectKey {
        ObjectKey::new(self.target_owner.as_str(), self.target.as_str())
    }

    /// Whether this intent does anything at all.
    pub fn is_selected(&self) -> bool {
        self.create || self.migrate_data
    }

    /// Target names of the selected columns, in source order.
    pub fn selected_targets(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.create)
            .map(|c| c.target.clone())
            .collect()
    }

    /// Column intent whose target is `target`.
    pub fn column_by_target(&self, target: &str) -> Option<&ColumnIntent> {
        self.columns
            .iter()
            .find(|c| c.target.eq_ignore_ascii_case(target))
    }
}

impl Named for TableIntent {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Intent for a view, sequence, synonym or grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectIntent {
    pub kind: ObjectKind,
    pub owner: String,
    pub name: String,
    pub target_owner: String,
    pub target: String,
    pub create: bool,
    pub replace: bool,
    #[serde(default)]
    pub renamed: bool,
    #[serde(default)]
    pub manual: bool,
}

impl ObjectIntent {
    pub fn new(
        kind: ObjectKind,
        owner: impl Into<String>,
        name: impl Into<String>,
        target_owner: impl Into<String>,
        target: impl Into<String>,
        selected: bool,
    ) -> Self {
        Self {
            kind,
            owner: owner.into(),
            name: name.into(),
            target_owner: target_owner.into(),
            target: target.into(),
            create: selected,
            replace: selected,
            renamed: false,
            manual: false,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.owner.as_str(), self.name.as_str())
    }

    pub fn target_key(&self) -> ObjectKey {
        ObjectKey::new(self.target_owner.as_str(), self.target.as_str())
    }
}

/// The full set of intent records of one run.
///
/// Identity is (owner, name) per kind; uniqueness is enforced by the map keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "IntentSetRepr", into = "IntentSetRepr")]
pub struct IntentSet {
    pub tables: BTreeMap<ObjectKey, TableIntent>,
    pub objects: BTreeMap<(ObjectKind, ObjectKey), ObjectIntent>,
}

impl IntentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, owner: &str, name: &str) -> Option<&TableIntent> {
        self.tables.get(&ObjectKey::new(owner, name))
    }

    pub fn table_mut(&mut self, owner: &str, name: &str) -> Option<&mut TableIntent> {
        self.tables.get_mut(&ObjectKey::new(owner, name))
    }

    pub fn object(&self, kind: ObjectKind, owner: &str, name: &str) -> Option<&ObjectIntent> {
        self.objects.get(&(kind, ObjectKey::new(owner, name)))
    }

    pub fn object_mut(
        &mut self,
        kind: ObjectKind,
        owner: &str,
        name: &str,
    ) -> Option<&mut ObjectIntent> {
        self.objects.get_mut(&(kind, ObjectKey::new(owner, name)))
    }

    /// Table intents whose target is `target`.
    pub fn contributors<'a>(
        &'a self,
        target: &'a ObjectKey,
    ) -> impl Iterator<Item = &'a TableIntent> + 'a {
        self.tables.values().filter(move |i| i.target_key() == *target)
    }

    pub fn len(&self) -> usize {
        self.tables.len() + self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.objects.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.objects.clear();
    }

    pub fn has_manual_entries(&self) -> bool {
        self.tables.values().any(|t| t.manual) || self.objects.values().any(|o| o.manual)
    }
}

#[derive(Serialize, Deserialize)]
struct IntentSetRepr {
    tables: Vec<TableIntent>,
    #[serde(default)]
    objects: Vec<ObjectIntent>,
}

impl From<IntentSet> for IntentSetRepr {
    fn from(set: IntentSet) -> Self {
        Self {
            tables: set.tables.into_values().collect(),
            objects: set.objects.into_values().collect(),
        }
    }
}

impl From<IntentSetRepr> for IntentSet {
    fn from(repr: IntentSetRepr) -> Self {
        Self {
            tables: repr.tables.into_iter().map(|t| (t.key(), t)).collect(),
            objects: repr
                .objects
                .into_iter()
                .map(|o| ((o.kind, o.key()), o))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_intent_flags_follow_selection() {
        let intent = TableIntent::new("HR", "DEPT", "public", "dept", false);
        assert!(!intent.create && !intent.replace && !intent.migrate_data);
        assert!(!intent.is_selected());

        let intent = TableIntent::new("HR", "DEPT", "public", "dept", true);
        assert!(intent.create && intent.replace && intent.migrate_data);
    }

    #[test]
    fn test_contributors_by_target() {
        let mut set = IntentSet::new();
        for name in ["ORDERS_2023", "ORDERS_2024", "CUSTOMERS"] {
            let target = if name.starts_with("ORDERS") { "orders" } else { "customers" };
            let intent = TableIntent::new("SALES", name, "public", target, true);
            set.tables.insert(intent.key(), intent);
        }
        let orders = ObjectKey::new("PUBLIC", "ORDERS");
        assert_eq!(set.contributors(&orders).count(), 2);
        assert!(set.table("sales", "orders_2023").is_some());
    }

    #[test]
    fn test_selected_targets_and_lookup() {
        let mut intent = TableIntent::new("HR", "EMP", "public", "emp", true);
        intent.columns.insert(ColumnIntent {
            name: "ID".into(),
            target: "id".into(),
            create: true,
        });
        intent.columns.insert(ColumnIntent {
            name: "SSN".into(),
            target: "ssn".into(),
            create: false,
        });
        assert_eq!(intent.selected_targets(), vec!["id"]);
        assert_eq!(intent.column_by_target("SSN").map(|c| c.name.as_str()), Some("SSN"));
    }

    #[test]
    fn test_intent_set_serializes_as_lists() {
        let mut set = IntentSet::new();
        let t = TableIntent::new("HR", "DEPT", "public", "dept", true);
        set.tables.insert(t.key(), t);
        let o = ObjectIntent::new(ObjectKind::View, "HR", "V_DEPT", "public", "v_dept", true);
        set.objects.insert((o.kind, o.key()), o);

        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["tables"][0]["name"], "DEPT");
        assert_eq!(json["objects"][0]["kind"], "view");
        let back: IntentSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }
}
