//! End-to-end behaviour of the workbench facade

use pretty_assertions::assert_eq;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use wb_core::{Workbench, WorkbenchConfig, WorkbenchError};
use wb_kernel::{from_fn, Decision, MutationError, MutationUnit, Params, Phase, SchedulerError};
use wb_session::{SessionError, Unmet};
use wb_store::{DataObject, ErrorClass, Extension, ObjectBody};
use wb_test_utils::{fast_config, name, sample_store, CommitThenFail, FlakyCreate, RecordingGateway, SAMPLE_SCRIPT};

fn workbench(config: WorkbenchConfig, answers: impl IntoIterator<Item = Decision>) -> (Workbench, Arc<RecordingGateway>) {
    let gateway = RecordingGateway::new(answers);
    let workbench = Workbench::new(config, gateway.clone()).unwrap();
    (workbench, gateway)
}

async fn run_sample(workbench: &Workbench) {
    for handle in workbench.run_script(SAMPLE_SCRIPT).await.unwrap() {
        assert_eq!(handle.wait().await.unwrap().phase, Phase::Done);
    }
}

fn tree_unit() -> MutationUnit {
    MutationUnit::new(
        "create_tree",
        from_fn(|ctx| {
            ctx.create(DataObject::new(
                name("tree"),
                ObjectBody::Extension(Extension {
                    plugin: "phylo".into(),
                    kind: "tree".into(),
                    payload: serde_json::json!({"newick": "(s1,s2);"}),
                    references: vec![name("pair")],
                }),
            )?)
        }),
    )
    .reserving(name("tree"))
}

const SAMPLE_STATEMENTS: &str = "create_sequence(name=\"s1\", residues=\"ACGTACGT\")\n\
create_sequence(name=\"s2\", residues=\"GGCCTTAA\")\n\
create_alignment(name=\"aln\", rows=\"r1:ACGT-,r2:AC-TT\")\n\
create_collection(name=\"pair\", members=\"s1,s2\")";

#[tokio::test]
async fn script_replay_builds_the_sample_and_records_it() {
    let (wb, gateway) = workbench(fast_config(), []);
    run_sample(&wb).await;

    assert_eq!(
        wb.snapshot().fingerprint().unwrap(),
        sample_store().snapshot().fingerprint().unwrap()
    );
    assert_eq!(wb.script_text(), SAMPLE_STATEMENTS);
    assert_eq!(wb.history_state().depth, 4);
    assert!(gateway.requests().is_empty());
}

#[tokio::test]
async fn undo_and_redo_keep_script_in_step() {
    let (wb, _) = workbench(fast_config(), []);
    run_sample(&wb).await;

    let undone = wb.undo().await.unwrap();
    assert_eq!(undone.label, "create_collection");
    assert!(wb.snapshot().get(&name("pair")).is_none());
    assert_eq!(wb.script_text().lines().count(), 3);
    assert!(wb.can_redo());

    wb.redo().await.unwrap();
    assert!(wb.snapshot().get(&name("pair")).is_some());
    assert_eq!(wb.script_text(), SAMPLE_STATEMENTS);
    assert!(!wb.can_redo());
}

#[tokio::test]
async fn malformed_script_queues_nothing() {
    let (wb, _) = workbench(fast_config(), []);
    let err = wb
        .run_script("create_sequence(name=\"a\", residues=\"AC\")\n\n  broken(\n")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkbenchError::Line { line: 3, .. }));
    assert_eq!(err.class(), ErrorClass::User);

    let err = wb.run_script("# only comments\nfrobnicate(x=\"1\")").await.unwrap_err();
    assert!(
        matches!(err, WorkbenchError::Line { line: 2, ref source } if matches!(**source, WorkbenchError::UnknownOperation(_)))
    );
    wb.wait_idle().await;
    assert!(wb.snapshot().is_empty());
}

#[tokio::test]
async fn duplicate_creation_is_rejected_at_submission() {
    let (wb, _) = workbench(fast_config(), []);
    let first = wb
        .submit_statement(r#"create_sequence(name="a", residues="AC")"#)
        .await
        .unwrap();
    let err = wb
        .submit_statement(r#"create_sequence(name="a", residues="GG")"#)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkbenchError::Scheduler(SchedulerError::NameReserved { .. } | SchedulerError::NameExists(_))
    ));
    assert!(first.wait().await.unwrap().is_done());
}

#[tokio::test]
async fn flaky_unit_is_retried_by_default() {
    let (wb, gateway) = workbench(fast_config(), []);
    let unit = MutationUnit::new("flaky", FlakyCreate::new("x", 1)).reserving(name("x"));
    let outcome = wb.submit(unit).await.unwrap().wait().await.unwrap();
    assert!(outcome.is_done());
    assert_eq!(outcome.attempts, 2);
    assert_eq!(gateway.requests().len(), 1);
    assert_eq!(gateway.requests()[0].default, Decision::Retry);
    assert_eq!(wb.snapshot().len(), 1);
}

#[tokio::test]
async fn abort_keeps_committed_step_and_rollback_removes_it() {
    let (wb, _) = workbench(fast_config(), [Decision::Abort, Decision::AbortAndRollback]);

    let kept = wb.submit(MutationUnit::new("two_step", CommitThenFail::new("a"))).await.unwrap();
    let outcome = kept.wait().await.unwrap();
    assert_eq!(outcome.phase, Phase::Aborted);
    assert!(outcome.compound.is_some());
    assert!(wb.snapshot().contains(&name("a")));
    assert_eq!(wb.history_state().undo_label.as_deref(), Some("two_step (aborted)"));
    assert_eq!(wb.script_text(), "");

    let rolled = wb.submit(MutationUnit::new("two_step", CommitThenFail::new("b"))).await.unwrap();
    let outcome = rolled.wait().await.unwrap();
    assert_eq!(outcome.phase, Phase::Aborted);
    assert_eq!(outcome.compound, None);
    assert!(!wb.snapshot().contains(&name("b")));
}

#[tokio::test]
async fn stopping_everything_aborts_the_rest_of_a_script() {
    let (wb, _) = workbench(fast_config(), []);
    let slow = wb
        .submit(MutationUnit::new(
            "slow",
            from_fn(|ctx| {
                while !ctx.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(MutationError::Cancelled)
            }),
        ))
        .await
        .unwrap();
    let script = wb.run_script(SAMPLE_SCRIPT).await.unwrap();
    while slow.phase() != Phase::Running {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let stopped = wb.abort(None).unwrap();
    assert_eq!(stopped.len(), 1 + script.len());
    assert_eq!(slow.wait().await.unwrap().phase, Phase::Aborted);
    for handle in &script {
        assert_eq!(handle.wait().await.unwrap().phase, Phase::Aborted);
    }
    assert!(wb.snapshot().is_empty());
    assert_eq!(wb.script_text(), "");
    assert!(!wb.can_undo());

    // Later scripts are unaffected
    run_sample(&wb).await;
    assert_eq!(wb.snapshot().len(), 4);
}

#[tokio::test]
async fn session_round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.wbs");

    let (first, _) = workbench(fast_config(), []);
    run_sample(&first).await;
    first.set_view_setting("zoom", serde_json::json!(2));
    first.set_tabs(vec!["aln".into()], Some("aln".into()));
    let saved = first.save_session(&path).await.unwrap();
    assert_eq!(saved.objects, 4);

    let (second, _) = workbench(fast_config(), []);
    second
        .submit_statement(r#"create_sequence(name="scratch", residues="T")"#)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    let restored = second.restore_session(&path).await.unwrap();

    assert_eq!(restored.objects, 4);
    assert_eq!(second.snapshot().fingerprint().unwrap(), saved.fingerprint);
    assert!(!second.can_undo());
    assert!(!second.can_redo());
    assert_eq!(second.script_text(), SAMPLE_STATEMENTS);
    assert_eq!(second.auxiliary(), first.auxiliary());

    let info = second.inspect_session(&path).unwrap();
    assert!(info.is_restorable());
    assert_eq!(info.object_count, 4);
}

#[tokio::test]
async fn session_round_trip_through_memory() {
    let (first, _) = workbench(fast_config(), []);
    run_sample(&first).await;
    let (summary, bytes) = first.save_session_to(Vec::new()).await.unwrap();

    let (second, _) = workbench(fast_config(), []);
    second.restore_session_from(Cursor::new(bytes)).await.unwrap();
    assert_eq!(second.snapshot().fingerprint().unwrap(), summary.fingerprint);
}

#[tokio::test]
async fn missing_plugin_blocks_restore_until_installed() {
    let (first, _) = workbench(fast_config(), []);
    run_sample(&first).await;
    assert!(first.submit(tree_unit()).await.unwrap().wait().await.unwrap().is_done());
    let (_, bytes) = first.save_session_to(Vec::new()).await.unwrap();

    let (plain, _) = workbench(fast_config(), []);
    plain
        .submit_statement(r#"create_sequence(name="keep", residues="A")"#)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    let before = plain.snapshot().fingerprint().unwrap();
    let script_before = plain.script_text();

    let err = plain.restore_session_from(Cursor::new(bytes.clone())).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Compatibility);
    match err {
        WorkbenchError::Session(SessionError::Unmet(unmet)) => {
            assert_eq!(unmet, vec![Unmet::MissingPlugin("phylo".into())]);
        }
        other => panic!("expected unmet requirements, got {other:?}"),
    }
    assert_eq!(plain.snapshot().fingerprint().unwrap(), before);
    assert_eq!(plain.script_text(), script_before);
    assert!(plain.can_undo());

    let (equipped, _) = workbench(fast_config().with_plugin("phylo"), []);
    let summary = equipped.restore_session_from(Cursor::new(bytes)).await.unwrap();
    assert_eq!(summary.objects, 5);
    assert_eq!(summary.tiers.other, 1);
}

#[tokio::test]
async fn events_report_each_unit() {
    let (wb, _) = workbench(fast_config(), []);
    let mut events = wb.events().unwrap();
    assert!(wb.events().is_none());

    let handle = wb
        .submit_operation("create_motif", Params::new().with("name", "tata").with("pattern", "TATAAA"))
        .await
        .unwrap();
    handle.wait().await.unwrap();
    wb.wait_idle().await;

    let phases: Vec<Phase> = events
        .drain()
        .iter()
        .filter_map(|e| e.as_unit())
        .filter(|e| e.unit_id == handle.id())
        .map(|e| e.phase)
        .collect();
    assert_eq!(phases.first(), Some(&Phase::Pending));
    assert_eq!(phases.last(), Some(&Phase::Done));
}

#[tokio::test]
async fn shutdown_rejects_new_work() {
    let (wb, _) = workbench(fast_config(), []);
    run_sample(&wb).await;
    wb.shutdown(true).await.unwrap();
    let err = wb
        .submit_operation("delete_object", Params::new().with("name", "aln"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkbenchError::Scheduler(SchedulerError::ShuttingDown)));
    assert_eq!(err.class(), ErrorClass::Cancellation);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let gateway = RecordingGateway::new([]);
    let err = Workbench::new(WorkbenchConfig::new().with_history_limit(0), gateway).unwrap_err();
    assert!(matches!(err, WorkbenchError::Config(_)));
}
