//! Target-name disambiguation.
//!
//! When several schemas collapse into one target namespace, an object name
//! that occurs in more than one selected schema is owner-prefixed
//! (`hr_dept`, `sales_dept`). Occurrence counts are taken per object kind
//! over the selected schemas and must be rebuilt when the selection changes.

use std::collections::{HashMap, HashSet};

use crate::core::graph::{ObjectGraph, ObjectKind};
use crate::core::identifier::normalize;

/// `name → occurrence count`, per object kind.
#[derive(Debug, Clone, Default)]
pub struct CollisionMap {
    counts: HashMap<(ObjectKind, String), usize>,
}

impl CollisionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count names of every intent kind across the schemas accepted by `selected`.
    pub fn build(graph: &ObjectGraph, selected: impl Fn(&str) -> bool) -> Self {
        let mut map = Self::new();
        for schema in graph.schemas.iter().filter(|s| selected(&s.name)) {
            for kind in ObjectKind::intent_kinds() {
                for name in schema.object_names(kind) {
                    map.add(kind, &name);
                }
            }
        }
        map
    }

    pub fn add(&mut self, kind: ObjectKind, name: &str) {
        *self.counts.entry((kind, normalize(name))).or_insert(0) += 1;
    }

    pub fn count(&self, kind: ObjectKind, name: &str) -> usize {
        self.counts
            .get(&(kind, normalize(name)))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_ambiguous(&self, kind: ObjectKind, name: &str) -> bool {
        self.count(kind, name) > 1
    }
}

/// Whether duplicate names are owner-prefixed.
///
/// Suppression applies when source schemas are not kept, or when duplicates
/// are forced.
pub fn suppress_duplicates(add_user_schema: bool, force_duplicates: bool) -> bool {
    !add_user_schema || force_duplicates
}

/// Default target name of a source object.
pub fn target_name(
    collisions: &CollisionMap,
    suppress: bool,
    kind: ObjectKind,
    owner: &str,
    name: &str,
) -> String {
    if suppress && collisions.is_ambiguous(kind, name) {
        format!("{}_{}", owner.to_lowercase(), name.to_lowercase())
    } else {
        name.to_lowercase()
    }
}

/// `base`, or `base_1`, `base_2`, … for the first name not in `taken`.
///
/// `taken` holds normalized names.
pub fn unique_name(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(&normalize(base)) {
        return base.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !taken.contains(&normalize(&candidate)) {
            return candidate;
        }
        n += 1;
    }
}
