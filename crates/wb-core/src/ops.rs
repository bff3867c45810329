//! Built-in operations

use crate::registry::OperationDef;
use wb_kernel::{Mutation, MutationContext, MutationError, Params};
use wb_store::{Alignment, Alphabet, DataObject, Motif, ObjectBody, ObjectName, StoreError};

/// Residues processed between cancellation checks
const CHUNK: usize = 64 * 1024;

/// Definitions of every built-in operation
#[must_use]
pub fn builtins() -> Vec<OperationDef> {
    vec![
        OperationDef {
            id: "create_sequence",
            summary: "Create a sequence from residues",
            creates: Some("name"),
            reads: &[],
            writes: &[],
            factory: create_sequence,
        },
        OperationDef {
            id: "create_motif",
            summary: "Create a motif catalog entry",
            creates: Some("name"),
            reads: &[],
            writes: &[],
            factory: create_motif,
        },
        OperationDef {
            id: "reverse_complement",
            summary: "Create the reverse complement of a nucleotide sequence",
            creates: Some("name"),
            reads: &["source"],
            writes: &[],
            factory: reverse_complement,
        },
        OperationDef {
            id: "create_collection",
            summary: "Group existing objects under a new name",
            creates: Some("name"),
            reads: &[],
            writes: &[],
            factory: create_collection,
        },
        OperationDef {
            id: "delete_object",
            summary: "Delete an object nothing references",
            creates: None,
            reads: &[],
            writes: &["name"],
            factory: delete_object,
        },
        OperationDef {
            id: "create_alignment",
            summary: "Create an alignment from `id:residues` rows",
            creates: Some("name"),
            reads: &[],
            writes: &[],
            factory: create_alignment,
        },
        OperationDef {
            id: "set_alignment_row",
            summary: "Replace or delete one alignment row",
            creates: None,
            reads: &[],
            writes: &["name"],
            factory: set_alignment_row,
        },
        OperationDef {
            id: "rename_object",
            summary: "Copy an object under a new name, then delete the original",
            creates: Some("to"),
            reads: &[],
            writes: &["name"],
            factory: rename_object,
        },
    ]
}

struct CreateSequence {
    name: ObjectName,
    alphabet: Alphabet,
    residues: String,
}

fn create_sequence(params: &Params) -> Result<Box<dyn Mutation>, MutationError> {
    let alphabet = params.parse_opt::<Alphabet>("alphabet")?.unwrap_or(Alphabet::Dna);
    let residues = params.require("residues")?.to_string();
    alphabet.validate(&residues)?;
    Ok(Box::new(CreateSequence {
        name: params.name("name")?,
        alphabet,
        residues,
    }))
}

impl Mutation for CreateSequence {
    fn execute(&self, ctx: &mut MutationContext) -> Result<(), MutationError> {
        ctx.create(DataObject::sequence(self.name.clone(), self.alphabet, self.residues.clone())?)
    }
}

struct CreateMotif {
    name: ObjectName,
    motif: Motif,
}

fn create_motif(params: &Params) -> Result<Box<dyn Mutation>, MutationError> {
    let pattern = params.require("pattern")?;
    if pattern.is_empty() {
        return Err(MutationError::invalid("pattern", "must not be empty"));
    }
    Ok(Box::new(CreateMotif {
        name: params.name("name")?,
        motif: Motif {
            pattern: pattern.to_string(),
            description: params.get("description").unwrap_or_default().to_string(),
        },
    }))
}

impl Mutation for CreateMotif {
    fn execute(&self, ctx: &mut MutationContext) -> Result<(), MutationError> {
        ctx.create(DataObject::new(self.name.clone(), ObjectBody::Motif(self.motif.clone()))?)
    }
}

struct ReverseComplement {
    source: ObjectName,
    name: ObjectName,
}

fn reverse_complement(params: &Params) -> Result<Box<dyn Mutation>, MutationError> {
    Ok(Box::new(ReverseComplement {
        source: params.name("source")?,
        name: params.name("name")?,
    }))
}

impl Mutation for ReverseComplement {
    fn execute(&self, ctx: &mut MutationContext) -> Result<(), MutationError> {
        let object = ctx.require(&self.source)?;
        let ObjectBody::Sequence(seq) = object.body() else {
            return Err(StoreError::WrongType {
                name: self.source.clone(),
                expected: "sequence",
                actual: object.type_tag(),
            }
            .into());
        };
        if seq.alphabet == Alphabet::Protein {
            return Err(MutationError::User(format!(
                "{} is a protein sequence and has no complement",
                self.source
            )));
        }

        let residues: Vec<char> = seq.residues.chars().collect();
        let total = residues.len().max(1);
        let mut out = String::with_capacity(residues.len());
        for (i, chunk) in residues.rchunks(CHUNK).enumerate() {
            ctx.check_cancelled()?;
            out.extend(chunk.iter().rev().map(|c| complement(*c, seq.alphabet)));
            let done = ((i + 1) * CHUNK).min(total);
            ctx.progress(u8::try_from(done * 100 / total).unwrap_or(100));
        }
        ctx.create(DataObject::sequence(self.name.clone(), seq.alphabet, out)?)
    }
}

fn complement(residue: char, alphabet: Alphabet) -> char {
    let paired = match residue.to_ascii_uppercase() {
        'A' if alphabet == Alphabet::Rna => 'U',
        'A' => 'T',
        'T' | 'U' => 'A',
        'C' => 'G',
        'G' => 'C',
        other => other,
    };
    if residue.is_ascii_lowercase() {
        paired.to_ascii_lowercase()
    } else {
        paired
    }
}

struct CreateCollection {
    name: ObjectName,
    members: Vec<ObjectName>,
}

fn create_collection(params: &Params) -> Result<Box<dyn Mutation>, MutationError> {
    Ok(Box::new(CreateCollection {
        name: params.name("name")?,
        members: params.names("members")?,
    }))
}

impl Mutation for CreateCollection {
    fn execute(&self, ctx: &mut MutationContext) -> Result<(), MutationError> {
        ctx.create(DataObject::collection(self.name.clone(), self.members.clone()))
    }
}

struct DeleteObject(ObjectName);

fn delete_object(params: &Params) -> Result<Box<dyn Mutation>, MutationError> {
    Ok(Box::new(DeleteObject(params.name("name")?)))
}

impl Mutation for DeleteObject {
    fn execute(&self, ctx: &mut MutationContext) -> Result<(), MutationError> {
        ctx.remove(&self.0)
    }
}

struct CreateAlignment {
    name: ObjectName,
    alignment: Alignment,
}

fn create_alignment(params: &Params) -> Result<Box<dyn Mutation>, MutationError> {
    let mut rows = Vec::new();
    for row in params.require("rows")?.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        let (id, residues) = row
            .split_once(':')
            .ok_or_else(|| MutationError::invalid("rows", format!("{row:?} is not id:residues")))?;
        rows.push((id.trim().to_string(), residues.trim().to_string()));
    }
    Ok(Box::new(CreateAlignment {
        name: params.name("name")?,
        alignment: Alignment::from_rows(rows),
    }))
}

impl Mutation for CreateAlignment {
    fn execute(&self, ctx: &mut MutationContext) -> Result<(), MutationError> {
        ctx.create(DataObject::new(
            self.name.clone(),
            ObjectBody::Alignment(self.alignment.clone()),
        )?)
    }
}

struct SetAlignmentRow {
    name: ObjectName,
    row: String,
    residues: Option<String>,
}

fn set_alignment_row(params: &Params) -> Result<Box<dyn Mutation>, MutationError> {
    Ok(Box::new(SetAlignmentRow {
        name: params.name("name")?,
        row: params.require("row")?.to_string(),
        residues: params.get("residues").map(str::to_string),
    }))
}

impl Mutation for SetAlignmentRow {
    fn execute(&self, ctx: &mut MutationContext) -> Result<(), MutationError> {
        ctx.replace_row(&self.name, &self.row, self.residues.as_deref())
    }
}

/// Two steps: the copy is published before the original is deleted, so a
/// failed delete leaves both in the store.
struct RenameObject {
    name: ObjectName,
    to: ObjectName,
}

fn rename_object(params: &Params) -> Result<Box<dyn Mutation>, MutationError> {
    let name = params.name("name")?;
    let to = params.name("to")?;
    if name == to {
        return Err(MutationError::invalid("to", "must differ from name"));
    }
    Ok(Box::new(RenameObject { name, to }))
}

impl Mutation for RenameObject {
    fn execute(&self, ctx: &mut MutationContext) -> Result<(), MutationError> {
        let original = ctx.require(&self.name)?;
        ctx.create(original.renamed(self.to.clone()))?;
        ctx.checkpoint()?;
        ctx.progress_with(50, format!("created {}", self.to));
        ctx.check_cancelled()?;
        ctx.remove(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use wb_store::ObjectStore;

    fn name(s: &str) -> ObjectName {
        ObjectName::new(s).unwrap()
    }

    fn run(store: &Arc<ObjectStore>, op: &str, params: Params) -> Result<usize, MutationError> {
        let def = builtins().into_iter().find(|d| d.id == op).unwrap();
        let mutation = (def.factory)(&params)?;
        let mut ctx = MutationContext::detached(Arc::clone(store));
        mutation.execute(&mut ctx)?;
        Ok(ctx.finish()?.len())
    }

    fn residues(store: &ObjectStore, s: &str) -> String {
        match store.get(&name(s)).unwrap().body() {
            ObjectBody::Sequence(seq) => seq.residues.clone(),
            other => panic!("not a sequence: {other:?}"),
        }
    }

    #[test]
    fn reverse_complement_keeps_case_and_alphabet() {
        let store = Arc::new(ObjectStore::new());
        run(&store, "create_sequence", Params::new().with("name", "d").with("residues", "AACGtn")).unwrap();
        run(
            &store,
            "create_sequence",
            Params::new().with("name", "r").with("alphabet", "rna").with("residues", "AUGC"),
        )
        .unwrap();
        run(&store, "reverse_complement", Params::new().with("source", "d").with("name", "d_rc")).unwrap();
        run(&store, "reverse_complement", Params::new().with("source", "r").with("name", "r_rc")).unwrap();
        assert_eq!(residues(&store, "d_rc"), "naCGTT");
        assert_eq!(residues(&store, "r_rc"), "GCAU");
    }

    #[test]
    fn protein_has_no_complement() {
        let store = Arc::new(ObjectStore::new());
        run(
            &store,
            "create_sequence",
            Params::new().with("name", "p").with("alphabet", "protein").with("residues", "MKV"),
        )
        .unwrap();
        let err = run(&store, "reverse_complement", Params::new().with("source", "p").with("name", "x")).unwrap_err();
        assert!(matches!(err, MutationError::User(_)));
    }

    #[test]
    fn invalid_residues_are_rejected_before_queueing() {
        let def = builtins().into_iter().find(|d| d.id == "create_sequence").unwrap();
        let err = (def.factory)(&Params::new().with("name", "s").with("residues", "ACGZ")).err().unwrap();
        assert!(matches!(err, MutationError::Store(StoreError::InvalidResidue { residue: 'Z', .. })));
    }

    #[test]
    fn alignment_rows_are_partial_edits() {
        let store = Arc::new(ObjectStore::new());
        run(&store, "create_alignment", Params::new().with("name", "aln").with("rows", "r1:AC-T, r2:ACGT")).unwrap();
        run(
            &store,
            "set_alignment_row",
            Params::new().with("name", "aln").with("row", "r1").with("residues", "ACCT"),
        )
        .unwrap();
        run(&store, "set_alignment_row", Params::new().with("name", "aln").with("row", "r2")).unwrap();

        let ObjectBody::Alignment(aln) = store.get(&name("aln")).unwrap().body().clone() else {
            panic!("not an alignment");
        };
        assert_eq!(aln.row("r1").map(|r| r.to_string()), Some("ACCT".to_string()));
        assert_eq!(aln.row("r2"), None);
        assert!(run(&store, "create_alignment", Params::new().with("name", "bad").with("rows", "nocolon")).is_err());
    }

    #[test]
    fn rename_publishes_copy_before_delete() {
        let store = Arc::new(ObjectStore::new());
        run(&store, "create_sequence", Params::new().with("name", "a").with("residues", "AC")).unwrap();
        assert_eq!(run(&store, "rename_object", Params::new().with("name", "a").with("to", "b")).unwrap(), 2);
        assert!(store.get(&name("a")).is_none());
        assert_eq!(residues(&store, "b"), "AC");

        // A referenced original cannot be deleted; the copy stays.
        run(&store, "create_collection", Params::new().with("name", "set").with("members", "b")).unwrap();
        assert!(run(&store, "rename_object", Params::new().with("name", "b").with("to", "c")).is_err());
        assert!(store.get(&name("b")).is_some());
        assert!(store.get(&name("c")).is_some());
    }

    #[test]
    fn delete_and_motif() {
        let store = Arc::new(ObjectStore::new());
        run(
            &store,
            "create_motif",
            Params::new().with("name", "tata").with("pattern", "TATAAA").with("description", "TATA box"),
        )
        .unwrap();
        assert_eq!(store.get(&name("tata")).unwrap().type_tag(), "motif");
        run(&store, "delete_object", Params::new().with("name", "tata")).unwrap();
        assert!(store.is_empty());
        assert!(run(&store, "delete_object", Params::new().with("name", "tata")).is_err());
    }
}
