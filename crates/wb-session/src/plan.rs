//! Dependency-tiered restore order
//!
//! The store validates name references on insertion, so restored objects
//! must arrive referenced-first:
//!
//! 1. leaves (no outgoing references)
//! 2. objects referencing only leaves
//! 3. everything else, topologically sorted
//!
//! The whole payload is checked here, before anything touches a store.

use crate::error::{SessionError, SessionResult};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use wb_store::{DataObject, ObjectName};

/// Restore tier of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Leaf,
    Dependent,
    Other,
}

/// Number of objects per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub leaf: usize,
    pub dependent: usize,
    pub other: usize,
}

impl TierCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.leaf + self.dependent + self.other
    }
}

/// Validated objects in insertion order
#[derive(Debug, Clone, Default)]
pub struct RestorePlan {
    order: Vec<Arc<DataObject>>,
    counts: TierCounts,
}

impl RestorePlan {
    /// Validate `objects` and order them for insertion
    ///
    /// Within tiers 1 and 2 the file order is kept.
    ///
    /// # Errors
    /// - [`SessionError::DuplicateName`]
    /// - [`SessionError::DanglingReference`] for a reference to an object not in the set
    /// - [`SessionError::ReferenceCycle`] for objects that (transitively) reference themselves
    pub fn build(objects: Vec<DataObject>) -> SessionResult<Self> {
        let mut index: HashMap<ObjectName, usize> = HashMap::with_capacity(objects.len());
        for (i, object) in objects.iter().enumerate() {
            if index.insert(object.name().clone(), i).is_some() {
                return Err(SessionError::DuplicateName(object.name().clone()));
            }
        }

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(objects.len());
        for object in &objects {
            let mut targets = Vec::new();
            for reference in object.references() {
                let target = index.get(reference).ok_or_else(|| SessionError::DanglingReference {
                    object: object.name().clone(),
                    missing: reference.clone(),
                })?;
                targets.push(*target);
            }
            deps.push(targets);
        }

        let tiers: Vec<Tier> = deps
            .iter()
            .map(|targets| {
                if targets.is_empty() {
                    Tier::Leaf
                } else if targets.iter().all(|t| deps[*t].is_empty()) {
                    Tier::Dependent
                } else {
                    Tier::Other
                }
            })
            .collect();

        // Edges run from the referenced object to its referrer.
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for (i, targets) in deps.iter().enumerate() {
            if tiers[i] != Tier::Other {
                continue;
            }
            graph.add_node(i);
            for t in targets.iter().filter(|t| tiers[**t] == Tier::Other) {
                graph.add_edge(*t, i, ());
            }
        }
        let other = toposort(&graph, None)
            .map_err(|cycle| SessionError::ReferenceCycle(objects[cycle.node_id()].name().clone()))?;

        let mut counts = TierCounts::default();
        let mut slots: Vec<Option<DataObject>> = objects.into_iter().map(Some).collect();
        let mut order = Vec::with_capacity(slots.len());
        for wanted in [Tier::Leaf, Tier::Dependent] {
            for i in 0..slots.len() {
                if tiers[i] == wanted {
                    if let Some(object) = slots[i].take() {
                        order.push(Arc::new(object));
                    }
                }
            }
        }
        counts.leaf = tiers.iter().filter(|t| **t == Tier::Leaf).count();
        counts.dependent = tiers.iter().filter(|t| **t == Tier::Dependent).count();
        for i in other {
            if let Some(object) = slots[i].take() {
                order.push(Arc::new(object));
                counts.other += 1;
            }
        }
        tracing::debug!(
            "restore plan: {} leaf, {} dependent, {} other",
            counts.leaf,
            counts.dependent,
            counts.other
        );
        Ok(Self { order, counts })
    }

    /// Objects in insertion order
    #[must_use]
    pub fn objects(&self) -> &[Arc<DataObject>] {
        &self.order
    }

    #[must_use]
    pub fn counts(&self) -> TierCounts {
        self.counts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn into_objects(self) -> Vec<Arc<DataObject>> {
        self.order
    }
}
