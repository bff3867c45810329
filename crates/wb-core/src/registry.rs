//! Operation registry
//!
//! Maps operation ids to factories that validate parameters and build the
//! unit's [`Mutation`]. Units built here carry their script statement and
//! reserve the name they create, so clashes are caught at submission.

use crate::error::{WorkbenchError, WorkbenchResult};
use crate::script::render_statement;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use wb_kernel::{Mutation, MutationError, MutationUnit, Params};
use wb_store::ObjectName;

/// Builds a mutation from parameters, rejecting unusable ones early
pub type OperationFactory = fn(&Params) -> Result<Box<dyn Mutation>, MutationError>;

/// A registered operation
#[derive(Clone, Copy)]
pub struct OperationDef {
    pub id: &'static str,
    pub summary: &'static str,
    /// Parameter holding the name of the object the operation creates
    pub creates: Option<&'static str>,
    /// Parameters naming objects the operation reads
    pub reads: &'static [&'static str],
    /// Parameters naming objects the operation changes or deletes
    pub writes: &'static [&'static str],
    pub factory: OperationFactory,
}

impl fmt::Debug for OperationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDef")
            .field("id", &self.id)
            .field("creates", &self.creates)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

/// Operation id → definition
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    ops: IndexMap<&'static str, OperationDef>,
}

impl OperationRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in operations
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for def in crate::ops::builtins() {
            registry.register(def);
        }
        registry
    }

    /// Add or replace an operation, returning the replaced definition
    pub fn register(&mut self, def: OperationDef) -> Option<OperationDef> {
        let replaced = self.ops.insert(def.id, def);
        if replaced.is_some() {
            tracing::debug!("operation {} re-registered", def.id);
        }
        replaced
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&OperationDef> {
        self.ops.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ops.contains_key(id)
    }

    /// Registered ids in registration order
    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ops.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Build a unit for `op` with `params`
    ///
    /// # Errors
    /// - [`WorkbenchError::UnknownOperation`]
    /// - [`WorkbenchError::Operation`] when the factory rejects the parameters
    pub fn build(&self, op: &str, params: &Params) -> WorkbenchResult<MutationUnit> {
        let def = self
            .get(op)
            .ok_or_else(|| WorkbenchError::UnknownOperation(op.to_string()))?;
        let rejected = |source| WorkbenchError::Operation {
            op: op.to_string(),
            source,
        };

        let mutation: Arc<dyn Mutation> = Arc::from((def.factory)(params).map_err(rejected)?);
        let sources = named(params, def.reads).map_err(rejected)?;
        let mut targets = named(params, def.writes).map_err(rejected)?;

        let mut unit = MutationUnit::from_arc(def.id, mutation)
            .with_params(params.clone())
            .with_statement(render_statement(def.id, params));
        if let Some(key) = def.creates {
            let created = params.name(key).map_err(rejected)?;
            targets.push(created.clone());
            unit = unit.reserving(created);
        }
        Ok(unit.with_sources(sources).with_targets(targets))
    }
}

fn named(params: &Params, keys: &[&str]) -> Result<Vec<ObjectName>, MutationError> {
    keys.iter()
        .filter(|key| params.get(key).is_some())
        .map(|key| params.name(key))
        .collect()
}
