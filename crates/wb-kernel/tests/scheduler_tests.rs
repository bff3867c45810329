//! Scheduler behaviour: ordering, failure decisions, cancellation

use futures::future::join_all;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;
use std::time::Duration;
use wb_history::Timeline;
use wb_kernel::{
    from_fn, AutoRetryGateway, ChannelGateway, Decision, DecisionGateway, FixedGateway, MutationError,
    MutationUnit, Phase, Progress, Scheduler, SchedulerConfig, SchedulerError, UnitHandle,
};
use wb_store::{Alphabet, DataObject, ObjectName, ObjectStore};

fn name(s: &str) -> ObjectName {
    ObjectName::new(s).unwrap()
}

fn seq(s: &str) -> DataObject {
    DataObject::sequence(name(s), Alphabet::Dna, "ACGT").unwrap()
}

fn scheduler(gateway: impl DecisionGateway + 'static, config: SchedulerConfig) -> Scheduler {
    Scheduler::new(
        Arc::new(ObjectStore::new()),
        Arc::new(Timeline::default()),
        Arc::new(gateway),
        config,
    )
}

fn fast() -> SchedulerConfig {
    SchedulerConfig::default()
        .with_decision_timeout(Duration::from_millis(200))
        .with_cancel_grace(Duration::from_millis(50))
}

fn create(object: &'static str) -> MutationUnit {
    MutationUnit::new(format!("create {object}"), from_fn(move |ctx| ctx.create(seq(object))))
        .with_statement(format!("create_sequence(name=\"{object}\")"))
}

/// Blocks its unit until opened
#[derive(Clone, Default)]
struct Gate(Arc<AtomicBool>);

impl Gate {
    fn open(&self) {
        self.0.store(true, SeqCst);
    }

    fn wait(&self) {
        while !self.0.load(SeqCst) {
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

fn blocked(gate: &Gate) -> MutationUnit {
    let gate = gate.clone();
    MutationUnit::new(
        "blocker",
        from_fn(move |_ctx| {
            gate.wait();
            Ok(())
        }),
    )
}

async fn until_running(scheduler: &Scheduler, handle: &UnitHandle) {
    while handle.phase() != Phase::Running {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(scheduler.active(), Some(handle.id()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hundred_concurrent_submissions_run_one_at_a_time_in_order() {
    let scheduler = Arc::new(scheduler(FixedGateway(Decision::Abort), SchedulerConfig::default()));
    let mut events = scheduler.take_events().unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let log = Arc::new(Mutex::new(Vec::new()));

    let submits = (0..100usize).map(|i| {
        let scheduler = Arc::clone(&scheduler);
        let running = Arc::clone(&running);
        let overlaps = Arc::clone(&overlaps);
        let log = Arc::clone(&log);
        tokio::spawn(async move {
            let unit = MutationUnit::new(
                format!("u{i}"),
                from_fn(move |ctx| {
                    if running.fetch_add(1, SeqCst) != 0 {
                        overlaps.fetch_add(1, SeqCst);
                    }
                    ctx.create(DataObject::sequence(name(&format!("s{i}")), Alphabet::Dna, "ACGT")?)?;
                    log.lock().push(i);
                    running.fetch_sub(1, SeqCst);
                    Ok(())
                }),
            );
            (i, scheduler.submit(unit).await.unwrap())
        })
    });
    let handles: Vec<(usize, UnitHandle)> = join_all(submits).await.into_iter().map(Result::unwrap).collect();
    for (_, handle) in &handles {
        assert!(handle.wait().await.unwrap().is_done());
    }

    assert_eq!(overlaps.load(SeqCst), 0);
    let sequence_of: HashMap<usize, u64> = handles.iter().map(|(i, h)| (*i, h.sequence())).collect();
    let order: Vec<u64> = log.lock().iter().map(|i| sequence_of[i]).collect();
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_eq!(order, sorted);
    assert_eq!(scheduler.store().len(), 100);
    assert_eq!(scheduler.timeline().depth(), 100);

    // The event log alone shows the same: one RUNNING interval at a time,
    // closed by its terminal event before the next unit starts.
    scheduler.wait_idle().await;
    let mut open: Option<u64> = None;
    let mut finished = Vec::new();
    for event in events.drain().iter().filter_map(|e| e.as_unit()) {
        match event.phase {
            Phase::Pending => {}
            Phase::Running => {
                assert!(
                    open.map_or(true, |s| s == event.sequence),
                    "unit #{} started while #{:?} was running",
                    event.sequence,
                    open
                );
                open = Some(event.sequence);
            }
            Phase::Done | Phase::Error | Phase::Aborted => {
                assert_eq!(open, Some(event.sequence));
                open = None;
                finished.push(event.sequence);
            }
        }
    }
    assert_eq!(open, None);
    assert_eq!(finished, (0..100).collect::<Vec<u64>>());
}

#[tokio::test]
async fn rollback_decision_leaves_only_the_successful_compound() {
    let scheduler = scheduler(FixedGateway(Decision::AbortAndRollback), fast());
    scheduler.timeline().set_recording(true);

    let a = scheduler.submit(create("a")).await.unwrap();
    let failing = MutationUnit::new(
        "create b",
        from_fn(|ctx| {
            ctx.create(seq("b"))?;
            ctx.checkpoint()?;
            Err(MutationError::System("disk on fire".into()))
        }),
    )
    .with_statement("create_sequence(name=\"b\")");
    let b = scheduler.submit(failing).await.unwrap();

    assert!(a.wait().await.unwrap().is_done());
    let outcome = b.wait().await.unwrap();
    assert_eq!(outcome.phase, Phase::Aborted);
    assert_eq!(outcome.compound, None);
    assert_eq!(outcome.error, Some(MutationError::System("disk on fire".into())));

    let store = scheduler.store();
    assert!(store.get(&name("a")).is_some());
    assert!(store.get(&name("b")).is_none());
    assert_eq!(scheduler.timeline().depth(), 1);
    assert_eq!(scheduler.timeline().script_text(), "create_sequence(name=\"a\")");
}

#[tokio::test]
async fn unit_refused_by_history_is_taken_back_out_of_the_store() {
    let scheduler = scheduler(FixedGateway(Decision::Abort), fast());
    scheduler.timeline().begin_compound("manual").unwrap();

    let outcome = scheduler.submit(create("a")).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.phase, Phase::Error);
    assert_eq!(outcome.compound, None);
    assert!(matches!(outcome.error, Some(MutationError::System(_))));
    assert!(!scheduler.store().snapshot().contains(&name("a")));

    assert_eq!(scheduler.timeline().end_compound(None).unwrap(), None);
    assert_eq!(scheduler.timeline().depth(), 0);

    let retried = scheduler.submit(create("a")).await.unwrap().wait().await.unwrap();
    assert!(retried.is_done());
    assert_eq!(scheduler.timeline().depth(), 1);
}

#[tokio::test]
async fn abort_keeps_committed_edits_as_one_entry_without_script_line() {
    let scheduler = scheduler(FixedGateway(Decision::Abort), fast());
    scheduler.timeline().set_recording(true);
    let unit = MutationUnit::new(
        "half",
        from_fn(|ctx| {
            ctx.create(seq("kept"))?;
            ctx.checkpoint()?;
            ctx.create(seq("lost"))?;
            Err(MutationError::System("boom".into()))
        }),
    )
    .with_statement("half()");

    let outcome = scheduler.submit(unit).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.phase, Phase::Aborted);
    assert!(outcome.compound.is_some());
    assert!(scheduler.store().get(&name("kept")).is_some());
    assert!(scheduler.store().get(&name("lost")).is_none());
    assert_eq!(scheduler.timeline().script_text(), "");

    let undone = scheduler.undo().await.unwrap();
    assert_eq!(undone.label, "half (aborted)");
    assert!(scheduler.store().is_empty());
}

#[tokio::test]
async fn retry_reverts_failed_attempt_and_runs_again() {
    let scheduler = scheduler(AutoRetryGateway, fast().with_max_auto_retries(3));
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let flaky = MutationUnit::new(
        "flaky",
        from_fn(move |ctx| {
            // Fails after publishing on the first attempt only; a second
            // create of "x" would collide unless the first was reverted.
            ctx.create(seq("x"))?;
            ctx.checkpoint()?;
            if counter.fetch_add(1, SeqCst) == 0 {
                return Err(MutationError::System("transient".into()));
            }
            Ok(())
        }),
    );

    let outcome = scheduler.submit(flaky).await.unwrap().wait().await.unwrap();
    assert!(outcome.is_done());
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.error, Some(MutationError::System("transient".into())));
    assert_eq!(attempts.load(SeqCst), 2);
    assert_eq!(scheduler.store().len(), 1);
    assert_eq!(scheduler.timeline().depth(), 1);
}

#[tokio::test]
async fn retry_budget_bounds_attempts() {
    let scheduler = scheduler(FixedGateway(Decision::Retry), fast().with_max_auto_retries(2));
    let unit = MutationUnit::new("never", from_fn(|_ctx| Err(MutationError::System("no".into()))));

    let outcome = scheduler.submit(unit).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.phase, Phase::Aborted);
    assert_eq!(outcome.attempts, 3);
}

#[tokio::test]
async fn user_errors_default_to_abort() {
    let scheduler = scheduler(AutoRetryGateway, fast());
    let unit = MutationUnit::new("bad input", from_fn(|_ctx| Err(MutationError::MissingParam("name".into()))));

    let outcome = scheduler.submit(unit).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.phase, Phase::Aborted);
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn silent_gateway_falls_back_to_default_after_timeout() {
    let (gateway, mut requests) = ChannelGateway::new(4);
    let scheduler = scheduler(
        gateway,
        fast()
            .with_max_auto_retries(0)
            .with_decision_timeout(Duration::from_millis(30)),
    );
    let unit = MutationUnit::new("fails", from_fn(|_ctx| Err(MutationError::System("x".into()))));

    let outcome = scheduler.submit(unit).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.phase, Phase::Aborted);
    let pending = requests.recv().await.unwrap();
    assert_eq!(pending.request.default, Decision::Abort);
    assert_eq!(pending.request.retries_left, 0);
}

#[tokio::test]
async fn panicking_mutation_is_a_system_error() {
    let scheduler = scheduler(FixedGateway(Decision::Abort), fast());
    let unit = MutationUnit::new("panics", from_fn(|_ctx| panic!("bug in mutation")));

    let outcome = scheduler.submit(unit).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.phase, Phase::Aborted);
    assert!(matches!(outcome.error, Some(MutationError::System(_))));

    assert!(scheduler.submit(create("after")).await.unwrap().wait().await.unwrap().is_done());
}

#[tokio::test]
async fn cooperative_cancel_keeps_published_edits() {
    let scheduler = scheduler(FixedGateway(Decision::Abort), fast());
    let unit = MutationUnit::new(
        "long",
        from_fn(|ctx| {
            ctx.create(seq("early"))?;
            ctx.checkpoint()?;
            loop {
                ctx.check_cancelled()?;
                std::thread::sleep(Duration::from_millis(2));
            }
        }),
    );
    let handle = scheduler.submit(unit).await.unwrap();
    until_running(&scheduler, &handle).await;
    scheduler.abort(handle.id()).unwrap();

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.phase, Phase::Aborted);
    assert_eq!(outcome.error, Some(MutationError::Cancelled));
    assert!(outcome.compound.is_some());
    assert!(scheduler.store().get(&name("early")).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unit_ignoring_cancel_is_abandoned_after_grace() {
    let scheduler = scheduler(FixedGateway(Decision::Abort), fast());
    let finished = Arc::new(AtomicBool::new(false));
    let done = Arc::clone(&finished);
    let stubborn = MutationUnit::new(
        "stubborn",
        from_fn(move |ctx| {
            std::thread::sleep(Duration::from_millis(300));
            let result = ctx.create(seq("late")).and_then(|()| ctx.checkpoint().map(|_| ()));
            done.store(true, SeqCst);
            result
        }),
    );
    let handle = scheduler.submit(stubborn).await.unwrap();
    until_running(&scheduler, &handle).await;
    assert_eq!(scheduler.abort_active(), Some(handle.id()));

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.phase, Phase::Aborted);
    assert!(!finished.load(SeqCst));

    // The next unit runs while the abandoned one is still sleeping.
    assert!(scheduler.submit(create("next")).await.unwrap().wait().await.unwrap().is_done());

    while !finished.load(SeqCst) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(scheduler.store().get(&name("late")).is_none());
    assert_eq!(scheduler.store().len(), 1);
}

#[tokio::test]
async fn reserved_names_are_checked_at_submission() {
    let store = Arc::new(ObjectStore::with_objects([seq("taken")]).unwrap());
    let scheduler = Scheduler::new(
        store,
        Arc::new(Timeline::default()),
        Arc::new(FixedGateway(Decision::Abort)),
        fast(),
    );

    let clash = create("taken").reserving(name("taken"));
    assert_eq!(
        scheduler.submit(clash).await.unwrap_err(),
        SchedulerError::NameExists(name("taken"))
    );

    let gate = Gate::default();
    let blocker = scheduler.submit(blocked(&gate)).await.unwrap();
    let first = scheduler.submit(create("fresh").reserving(name("fresh"))).await.unwrap();
    let second = scheduler.submit(create("fresh").reserving(name("fresh"))).await;
    assert_eq!(
        second.unwrap_err(),
        SchedulerError::NameReserved {
            name: name("fresh"),
            holder: first.id()
        }
    );

    gate.open();
    blocker.wait().await.unwrap();
    assert!(first.wait().await.unwrap().is_done());
    // Released on completion; now the store itself holds the name.
    let again = scheduler.submit(create("fresh").reserving(name("fresh"))).await;
    assert_eq!(again.unwrap_err(), SchedulerError::NameExists(name("fresh")));
}

#[tokio::test]
async fn abort_while_pending_never_runs_the_unit() {
    let scheduler = scheduler(FixedGateway(Decision::Abort), fast());
    let gate = Gate::default();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);

    let blocker = scheduler.submit(blocked(&gate)).await.unwrap();
    let queued = scheduler
        .submit(MutationUnit::new(
            "queued",
            from_fn(move |_ctx| {
                flag.store(true, SeqCst);
                Ok(())
            }),
        ))
        .await
        .unwrap();
    assert_eq!(scheduler.phase_of(queued.id()), Some(Phase::Pending));
    scheduler.abort(queued.id()).unwrap();
    gate.open();

    assert!(blocker.wait().await.unwrap().is_done());
    let outcome = queued.wait().await.unwrap();
    assert_eq!(outcome.phase, Phase::Aborted);
    assert_eq!(outcome.attempts, 0);
    assert!(!ran.load(SeqCst));
    assert_eq!(scheduler.abort(queued.id()), Err(SchedulerError::UnknownUnit(queued.id())));
}

#[tokio::test]
async fn events_follow_the_lifecycle() {
    let scheduler = scheduler(FixedGateway(Decision::Abort), fast());
    let mut events = scheduler.take_events().unwrap();
    assert!(scheduler.take_events().is_none());

    let unit = MutationUnit::new(
        "progressing",
        from_fn(|ctx| {
            ctx.progress(50);
            ctx.create(seq("p"))
        }),
    );
    scheduler.submit(unit).await.unwrap().wait().await.unwrap();
    scheduler.wait_idle().await;

    let all = events.drain();
    let unit_events: Vec<(Phase, Option<Progress>)> = all
        .iter()
        .filter_map(|e| e.as_unit())
        .map(|e| (e.phase, e.progress))
        .collect();
    assert_eq!(
        unit_events,
        vec![
            (Phase::Pending, None),
            (Phase::Running, Some(Progress::Percent(0))),
            (Phase::Running, Some(Progress::Percent(50))),
            (Phase::Done, Some(Progress::Percent(100))),
        ]
    );
    assert_eq!(all.len(), 5);
}

#[tokio::test]
async fn undo_and_redo_run_in_the_slot() {
    let scheduler = scheduler(FixedGateway(Decision::Abort), fast());
    scheduler.timeline().set_recording(true);
    scheduler.submit(create("a")).await.unwrap().wait().await.unwrap();

    let undone = scheduler.undo().await.unwrap();
    assert_eq!(undone.script_line, Some(0));
    assert!(undone.state.can_redo);
    assert!(scheduler.store().is_empty());
    assert_eq!(scheduler.timeline().script_text(), "");

    scheduler.redo().await.unwrap();
    assert_eq!(scheduler.store().len(), 1);
    assert_eq!(scheduler.timeline().script_text(), "create_sequence(name=\"a\")");

    scheduler.undo().await.unwrap();
    assert!(matches!(scheduler.undo().await, Err(SchedulerError::History(_))));
}

#[tokio::test]
async fn exclusive_job_sees_everything_queued_before_it() {
    let scheduler = scheduler(FixedGateway(Decision::Abort), fast());
    scheduler.submit(create("a")).await.unwrap();
    scheduler.submit(create("b")).await.unwrap();

    let seen = scheduler.exclusive(|store, timeline| (store.len(), timeline.depth())).await.unwrap();
    assert_eq!(seen, (2, 2));
}

#[tokio::test]
async fn paused_submissions_wait_for_the_guard() {
    let scheduler = Arc::new(scheduler(FixedGateway(Decision::Abort), fast()));
    let pause = scheduler.pause_submissions().await;

    let submitter = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.submit(create("a")).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!submitter.is_finished());

    drop(pause);
    let handle = submitter.await.unwrap().unwrap();
    assert!(handle.wait().await.unwrap().is_done());
}

#[tokio::test]
async fn shutdown_drains_then_rejects() {
    let scheduler = scheduler(FixedGateway(Decision::Abort), fast());
    let handle = scheduler.submit(create("a")).await.unwrap();
    scheduler.shutdown(true).await.unwrap();

    assert!(handle.wait().await.unwrap().is_done());
    assert!(!scheduler.is_accepting());
    assert_eq!(scheduler.submit(create("b")).await.unwrap_err(), SchedulerError::ShuttingDown);
    assert_eq!(scheduler.undo().await.unwrap_err(), SchedulerError::ShuttingDown);
}

#[tokio::test]
async fn shutdown_without_wait_aborts_queued_units() {
    let scheduler = scheduler(
        FixedGateway(Decision::Abort),
        fast().with_cancel_grace(Duration::from_millis(500)),
    );
    let gate = Gate::default();
    let blocker = scheduler.submit(blocked(&gate)).await.unwrap();
    let queued = scheduler.submit(create("a")).await.unwrap();
    until_running(&scheduler, &blocker).await;

    let opener = gate.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        opener.open();
    });
    scheduler.shutdown(false).await.unwrap();

    // The blocker ignores cancellation but finishes within the grace period.
    assert_eq!(blocker.wait().await.unwrap().phase, Phase::Done);
    assert_eq!(queued.wait().await.unwrap().phase, Phase::Aborted);
    assert!(scheduler.store().is_empty());
}
