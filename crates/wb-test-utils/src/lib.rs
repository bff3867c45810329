//! Testing utilities for the workbench workspace
//!
//! Shared fixtures, scripted gateways and mutations.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wb_core::WorkbenchConfig;
use wb_kernel::{Decision, DecisionGateway, DecisionRequest, Mutation, MutationContext, MutationError};
use wb_store::{Alignment, Alphabet, DataObject, ObjectBody, ObjectName, ObjectStore};

pub fn name(s: &str) -> ObjectName {
    ObjectName::new(s).unwrap()
}

pub fn dna(s: &str, residues: &str) -> DataObject {
    DataObject::sequence(name(s), Alphabet::Dna, residues).unwrap()
}

/// Two sequences, an alignment and a collection of both sequences
pub fn sample_objects() -> Vec<DataObject> {
    vec![
        dna("s1", "ACGTACGT"),
        dna("s2", "GGCCTTAA"),
        DataObject::new(
            name("aln"),
            ObjectBody::Alignment(Alignment::from_rows([("r1", "ACGT-"), ("r2", "AC-TT")])),
        )
        .unwrap(),
        DataObject::collection(name("pair"), vec![name("s1"), name("s2")]),
    ]
}

pub fn sample_store() -> ObjectStore {
    ObjectStore::with_objects(sample_objects()).unwrap()
}

/// Statements producing the same objects as [`sample_objects`]
pub const SAMPLE_SCRIPT: &str = r#"# sample session
create_sequence(name="s1", residues="ACGTACGT")
create_sequence(name="s2", residues="GGCCTTAA")

create_alignment(name="aln", rows="r1:ACGT-,r2:AC-TT")
create_collection(name="pair", members="s1,s2")
"#;

/// Short timeouts so failure paths finish quickly
pub fn fast_config() -> WorkbenchConfig {
    WorkbenchConfig::new()
        .with_decision_timeout(Duration::from_millis(200))
        .with_cancel_grace(Duration::from_millis(100))
}

/// Answers with queued decisions, then with each request's default
#[derive(Debug, Default)]
pub struct RecordingGateway {
    answers: Mutex<VecDeque<Decision>>,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl RecordingGateway {
    pub fn new(answers: impl IntoIterator<Item = Decision>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into_iter().collect()),
            requests: Mutex::default(),
        })
    }

    /// Every request seen so far
    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl DecisionGateway for RecordingGateway {
    async fn decide(&self, request: &DecisionRequest) -> Decision {
        self.requests.lock().push(request.clone());
        self.answers.lock().pop_front().unwrap_or(request.default)
    }
}

/// Fails its first `failures` attempts with a system error, then creates `target`
pub struct FlakyCreate {
    target: ObjectName,
    failures: u32,
    attempts: AtomicU32,
}

impl FlakyCreate {
    pub fn new(target: &str, failures: u32) -> Self {
        Self {
            target: name(target),
            failures,
            attempts: AtomicU32::new(0),
        }
    }
}

impl Mutation for FlakyCreate {
    fn execute(&self, ctx: &mut MutationContext) -> Result<(), MutationError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.create(DataObject::sequence(self.target.clone(), Alphabet::Dna, "ACGT")?)?;
        if attempt <= self.failures {
            return Err(MutationError::System(format!("flaky attempt {attempt}")));
        }
        Ok(())
    }
}

/// Commits `first`, then fails with a user error
pub struct CommitThenFail {
    first: ObjectName,
}

impl CommitThenFail {
    pub fn new(first: &str) -> Self {
        Self { first: name(first) }
    }
}

impl Mutation for CommitThenFail {
    fn execute(&self, ctx: &mut MutationContext) -> Result<(), MutationError> {
        ctx.create(DataObject::sequence(self.first.clone(), Alphabet::Dna, "A")?)?;
        ctx.checkpoint()?;
        Err(MutationError::User("second step failed".into()))
    }
}
