//! Mutation units
//!
//! A [`MutationUnit`] describes one schedulable change to the data store:
//! the operation name, its ordered parameters, the objects it reads and
//! writes, and the names it will create. The change itself is performed by
//! the unit's [`Mutation`].

use crate::context::MutationContext;
use crate::error::MutationError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use ulid::Ulid;
use wb_store::ObjectName;

/// Unique unit identifier (ULID, sortable by creation time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub Ulid);

impl UnitId {
    /// Generate new ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered operation parameters
///
/// Order is preserved so that recorded script statements list parameters
/// the way the operator gave them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(IndexMap<String, String>);

impl Params {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or overwrite, keeping the original position on overwrite
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Value of a required parameter
    ///
    /// # Errors
    /// [`MutationError::MissingParam`] if absent
    pub fn require(&self, key: &str) -> Result<&str, MutationError> {
        self.get(key)
            .ok_or_else(|| MutationError::MissingParam(key.to_string()))
    }

    /// Required parameter parsed with [`FromStr`]
    ///
    /// # Errors
    /// Missing or unparsable value
    pub fn parse<T>(&self, key: &str) -> Result<T, MutationError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.require(key)?
            .parse()
            .map_err(|e| MutationError::invalid(key, e))
    }

    /// Optional parameter parsed with [`FromStr`]
    ///
    /// # Errors
    /// Unparsable value
    pub fn parse_opt<T>(&self, key: &str) -> Result<Option<T>, MutationError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|v| v.parse().map_err(|e| MutationError::invalid(key, e)))
            .transpose()
    }

    /// Required parameter holding an object name
    ///
    /// # Errors
    /// Missing parameter or invalid name
    pub fn name(&self, key: &str) -> Result<ObjectName, MutationError> {
        self.parse(key)
    }

    /// Required parameter holding a comma-separated list of names
    ///
    /// # Errors
    /// Missing parameter or any invalid name
    pub fn names(&self, key: &str) -> Result<Vec<ObjectName>, MutationError> {
        self.require(key)?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| ObjectName::new(s).map_err(|e| MutationError::invalid(key, e)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Execution logic of a unit
///
/// Runs on a blocking worker thread. Edits go through the
/// [`MutationContext`], which keeps them private until the unit finishes or
/// calls [`checkpoint`](MutationContext::checkpoint). Long-running logic is
/// expected to poll [`MutationContext::check_cancelled`].
pub trait Mutation: Send + Sync + 'static {
    /// Perform the change
    ///
    /// # Errors
    /// Any failure; the scheduler hands it to the decision gateway.
    fn execute(&self, ctx: &mut MutationContext) -> Result<(), MutationError>;

    /// Script statement reproducing this mutation, if it has one
    fn statement(&self) -> Option<String> {
        None
    }
}

/// [`Mutation`] backed by a closure
pub struct FnMutation<F>(F);

impl<F> Mutation for FnMutation<F>
where
    F: Fn(&mut MutationContext) -> Result<(), MutationError> + Send + Sync + 'static,
{
    fn execute(&self, ctx: &mut MutationContext) -> Result<(), MutationError> {
        (self.0)(ctx)
    }
}

/// Wrap a closure as a [`Mutation`]
pub fn from_fn<F>(f: F) -> FnMutation<F>
where
    F: Fn(&mut MutationContext) -> Result<(), MutationError> + Send + Sync + 'static,
{
    FnMutation(f)
}

/// One schedulable change to the data store
///
/// Immutable once submitted; its lifecycle status lives with the
/// scheduler and is observed through a [`crate::UnitHandle`].
#[derive(Clone)]
pub struct MutationUnit {
    id: UnitId,
    name: String,
    params: Params,
    sources: Vec<ObjectName>,
    targets: Vec<ObjectName>,
    reserved: Vec<ObjectName>,
    line: Option<usize>,
    statement: Option<String>,
    mutation: Arc<dyn Mutation>,
}

impl MutationUnit {
    /// Create a unit named `name` running `mutation`
    pub fn new(name: impl Into<String>, mutation: impl Mutation) -> Self {
        Self::from_arc(name, Arc::new(mutation))
    }

    /// Create from an already shared mutation
    pub fn from_arc(name: impl Into<String>, mutation: Arc<dyn Mutation>) -> Self {
        Self {
            id: UnitId::new(),
            name: name.into(),
            params: Params::new(),
            sources: Vec::new(),
            targets: Vec::new(),
            reserved: Vec::new(),
            line: None,
            statement: None,
            mutation,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_sources(mut self, sources: Vec<ObjectName>) -> Self {
        self.sources = sources;
        self
    }

    #[must_use]
    pub fn with_targets(mut self, targets: Vec<ObjectName>) -> Self {
        self.targets = targets;
        self
    }

    /// Claim a name the unit will create
    #[must_use]
    pub fn reserving(mut self, name: ObjectName) -> Self {
        if !self.reserved.contains(&name) {
            self.reserved.push(name);
        }
        self
    }

    /// Script line the unit came from (1-based)
    #[must_use]
    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// Override the recorded script statement
    #[must_use]
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> UnitId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    #[must_use]
    pub fn sources(&self) -> &[ObjectName] {
        &self.sources
    }

    #[must_use]
    pub fn targets(&self) -> &[ObjectName] {
        &self.targets
    }

    #[must_use]
    pub fn reserved(&self) -> &[ObjectName] {
        &self.reserved
    }

    #[inline]
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        self.line
    }

    /// Statement recorded into the script when recording is on
    #[must_use]
    pub fn statement(&self) -> Option<String> {
        self.statement.clone().or_else(|| self.mutation.statement())
    }

    pub(crate) fn mutation(&self) -> Arc<dyn Mutation> {
        Arc::clone(&self.mutation)
    }

    /// Short description for logs: name plus script line when known
    #[must_use]
    pub fn describe(&self) -> String {
        match self.line {
            Some(line) => format!("{} (line {line})", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Debug for MutationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("reserved", &self.reserved)
            .field("line", &self.line)
            .finish_non_exhaustive()
    }
}
