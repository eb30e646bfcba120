//! End-to-end tuning lifecycle scenarios.

use std::path::{Path, PathBuf};

use retune::{
    CodeRegion, CodeRegionStore, ConfigEntry, InitOutcome, JsonInputWriter, Objective, Opportunity,
    ParamAssignment, ParamDomain, ParamValue, RegionType, RetuneError, RunOptions,
    SearchEngine, SessionController, StubEngine,
};

fn loop_region(name: &str, func: &str, hash: &str) -> CodeRegion {
    CodeRegion::new(name, "loop-unroll", func, RegionType::Loop, hash, 0)
}

fn unroll_opportunity(name: &str, func: &str, hash: &str) -> Opportunity {
    Opportunity {
        region: loop_region(name, func, hash),
        params: vec![
            ("UnrollCount".to_string(), ParamDomain::IntRange { min: 0, max: 64 }),
            ("UnrollEnable".to_string(), ParamDomain::Bool),
        ],
    }
}

/// Eight distinct classes, each observed twice with an identical
/// identity (same region included from two compilations).
fn eight_duplicated_classes() -> Vec<Opportunity> {
    let mut opps = Vec::new();
    for i in 0..8 {
        let opp = unroll_opportunity(&format!("for.body.{i}"), "main", &format!("{i:08x}"));
        opps.push(opp.clone());
        opps.push(opp);
    }
    opps
}

fn input_path(dir: &Path) -> PathBuf {
    dir.join("input.json")
}

fn start(
    dir: &Path,
    opts: RunOptions,
    opps: &[Opportunity],
    seed: u64,
) -> retune::Result<InitOutcome<StubEngine, JsonInputWriter>> {
    SessionController::initialize(
        opts,
        dir,
        &input_path(dir),
        Objective::Minimize,
        opps,
        seed,
        StubEngine::new(seed),
        JsonInputWriter,
    )
}

fn read_entries(path: &Path) -> Vec<ConfigEntry> {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[test]
fn duplicated_classes_collapse_to_one_task_each() {
    let dir = tempfile::tempdir().unwrap();
    let opts = RunOptions::new(true, false, false);

    let outcome = start(dir.path(), opts, &eight_duplicated_classes(), 1).unwrap();
    let InitOutcome::Ready(session) = outcome else { panic!("expected active session") };

    assert_eq!(session.task_map().len(), 8);
    assert_eq!(session.store().current_region_count().unwrap(), 8);
    assert_eq!(session.store().seen_region_count().unwrap(), 0);
}

#[test]
fn fully_solved_program_short_circuits_to_baseline() {
    let dir = tempfile::tempdir().unwrap();

    // Prior run left an optimal configuration for every class.
    {
        let mut store = CodeRegionStore::open(dir.path()).unwrap();
        for i in 0..8 {
            let mut params = ParamAssignment::new();
            params.insert("UnrollCount".to_string(), ParamValue::Int(i));
            params.insert("UnrollEnable".to_string(), ParamValue::Str("1".to_string()));
            store
                .upsert_optimal(&format!("{i:08x}"), RegionType::Loop, "loop-unroll", &params)
                .unwrap();
        }
    }

    let opts = RunOptions::new(true, true, false);
    let outcome = start(dir.path(), opts, &eight_duplicated_classes(), 1).unwrap();
    assert!(matches!(outcome, InitOutcome::AlreadyOptimal));

    // No checkpoint, but a baseline input carrying the stored params.
    assert!(!retune::session::checkpoint_exists(dir.path()));
    let entries = read_entries(&input_path(dir.path()));
    assert_eq!(entries.len(), 8);
    for entry in &entries {
        assert_eq!(entry.args.len(), 2);
        assert_eq!(entry.args["UnrollEnable"], ParamValue::Str("1".to_string()));
    }
}

#[test]
fn initialize_refuses_existing_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let opts = RunOptions::new(true, false, false);
    let outcome = start(dir.path(), opts, &eight_duplicated_classes(), 1).unwrap();
    let InitOutcome::Ready(_session) = outcome else { panic!("expected active session") };

    let err = start(dir.path(), opts, &eight_duplicated_classes(), 1).unwrap_err();
    assert!(matches!(err, RetuneError::CheckpointExists(_)));
}

#[test]
fn propose_feedback_round_trip_cleans_input_files() {
    let dir = tempfile::tempdir().unwrap();
    let opts = RunOptions::new(true, false, false);
    let outcome = start(dir.path(), opts, &eight_duplicated_classes(), 2).unwrap();
    let InitOutcome::Ready(mut session) = outcome else { panic!("expected active session") };

    let trials = session.propose(2).unwrap();
    assert_eq!(trials.len(), 2);
    let first = dir.path().join("input-0.json");
    let second = dir.path().join("input-1.json");
    assert!(first.is_file());
    assert!(second.is_file());
    // Every observed row of a tuned class appears in the trial input.
    assert_eq!(read_entries(&first).len(), 8);

    session.feedback(&[10.0, 20.0]).unwrap();
    assert!(!first.exists());
    assert!(!second.exists());
    assert!(session.pending_trials().is_empty());
}

#[test]
fn feedback_length_mismatch_is_fatal_and_preserves_batch() {
    let dir = tempfile::tempdir().unwrap();
    let opts = RunOptions::new(true, false, false);
    let outcome = start(dir.path(), opts, &eight_duplicated_classes(), 3).unwrap();
    let InitOutcome::Ready(mut session) = outcome else { panic!("expected active session") };

    session.propose(2).unwrap();
    let err = session.feedback(&[10.0]).unwrap_err();
    assert!(matches!(err, RetuneError::FeedbackMismatch { expected: 2, received: 1 }));

    // The batch is still pending; a correct call succeeds.
    assert_eq!(session.pending_trials().len(), 2);
    session.feedback(&[10.0, 20.0]).unwrap();
}

#[test]
fn propose_while_batch_pending_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let opts = RunOptions::new(true, false, false);
    let outcome = start(dir.path(), opts, &eight_duplicated_classes(), 4).unwrap();
    let InitOutcome::Ready(mut session) = outcome else { panic!("expected active session") };

    session.propose(2).unwrap();
    let err = session.propose(1).unwrap_err();
    assert!(matches!(err, RetuneError::BatchPending(2)));
}

#[test]
fn candidate_exhaustion_yields_partial_batch() {
    let dir = tempfile::tempdir().unwrap();
    let opts = RunOptions::new(true, false, false);
    let outcome = SessionController::initialize(
        opts,
        dir.path(),
        &input_path(dir.path()),
        Objective::Minimize,
        &eight_duplicated_classes(),
        5,
        StubEngine::new(5).with_candidate_limit(2),
        JsonInputWriter,
    )
    .unwrap();
    let InitOutcome::Ready(mut session) = outcome else { panic!("expected active session") };

    let trials = session.propose(5).unwrap();
    assert_eq!(trials.len(), 2);
    session.feedback(&[10.0, 20.0]).unwrap();
}

#[test]
fn finalize_without_results_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let opts = RunOptions::new(true, false, false);
    let outcome = start(dir.path(), opts, &eight_duplicated_classes(), 6).unwrap();
    let InitOutcome::Ready(session) = outcome else { panic!("expected active session") };

    let err = session.finalize(true).unwrap_err();
    assert!(matches!(err, RetuneError::NoBestConfiguration));
}

#[test]
fn finalize_persists_best_configuration_per_class() {
    let dir = tempfile::tempdir().unwrap();
    let opts = RunOptions::new(true, false, false);
    let outcome = start(dir.path(), opts, &eight_duplicated_classes(), 7).unwrap();
    let InitOutcome::Ready(mut session) = outcome else { panic!("expected active session") };

    session.propose(3).unwrap();
    session.feedback(&[30.0, 10.0, 20.0]).unwrap();
    session.finalize(true).unwrap();

    let store = CodeRegionStore::open(dir.path()).unwrap();
    for i in 0..8 {
        let params = store
            .get_optimal_parameters(&format!("{i:08x}"), RegionType::Loop, "loop-unroll")
            .unwrap()
            .expect("every tuned class gets an optimal row");
        assert!(params.contains_key("UnrollCount"));
        assert!(params.contains_key("UnrollEnable"));
    }

    // The final input file carries the best configuration.
    let entries = read_entries(&input_path(dir.path()));
    assert_eq!(entries.len(), 8);

    // A fresh run over the same program is now fully solved.
    std::fs::remove_file(retune::session::checkpoint_path(dir.path())).unwrap();
    std::fs::remove_file(input_path(dir.path())).unwrap();
    let reuse = RunOptions::new(true, true, false);
    let outcome = start(dir.path(), reuse, &eight_duplicated_classes(), 8).unwrap();
    assert!(matches!(outcome, InitOutcome::AlreadyOptimal));
}

#[test]
fn suspended_run_resumes_and_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let opts = RunOptions::new(true, false, false);
    let outcome = start(dir.path(), opts, &eight_duplicated_classes(), 9).unwrap();
    let InitOutcome::Ready(mut session) = outcome else { panic!("expected active session") };

    let trials = session.propose(2).unwrap();
    session.feedback(&[40.0, 15.0]).unwrap();
    let task_map_before = session.task_map().clone();
    drop(session);

    // New process: same directory, fresh engine instance.
    let mut resumed =
        SessionController::resume(dir.path(), StubEngine::new(0), JsonInputWriter).unwrap();
    assert_eq!(resumed.task_map(), &task_map_before);
    assert_eq!(resumed.engine().all_results().unwrap().len(), trials.len());

    // Reattachment left no detached entities behind.
    if let Some(best) = &resumed.state().engine.best_result {
        assert!(!best.has_detached_entity());
    }

    let more = resumed.propose(1).unwrap();
    assert_eq!(more.len(), 1);
    resumed.feedback(&[5.0]).unwrap();
    resumed.finalize(true).unwrap();

    let store = CodeRegionStore::open(dir.path()).unwrap();
    assert!(store
        .equivalence_class_has_optimal("00000000", RegionType::Loop, "loop-unroll")
        .unwrap());
}

#[test]
fn resume_mid_batch_carries_pending_trials() {
    let dir = tempfile::tempdir().unwrap();
    let opts = RunOptions::new(true, false, false);
    let outcome = start(dir.path(), opts, &eight_duplicated_classes(), 10).unwrap();
    let InitOutcome::Ready(mut session) = outcome else { panic!("expected active session") };

    let trials = session.propose(2).unwrap();
    drop(session);

    let mut resumed =
        SessionController::resume(dir.path(), StubEngine::new(0), JsonInputWriter).unwrap();
    assert_eq!(resumed.pending_trials(), trials.as_slice());
    let err = resumed.propose(1).unwrap_err();
    assert!(matches!(err, RetuneError::BatchPending(2)));
    resumed.feedback(&[12.0, 8.0]).unwrap();
}

#[test]
fn retune_injects_seed_from_stored_configuration() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut store = CodeRegionStore::open(dir.path()).unwrap();
        let mut params = ParamAssignment::new();
        params.insert("UnrollCount".to_string(), ParamValue::Int(4));
        params.insert("UnrollEnable".to_string(), ParamValue::Str("1".to_string()));
        store.upsert_optimal("00000000", RegionType::Loop, "loop-unroll", &params).unwrap();
    }

    let opts = RunOptions::new(true, true, true);
    let opps = vec![unroll_opportunity("for.body.0", "main", "00000000")];
    let outcome = start(dir.path(), opts, &opps, 11).unwrap();
    let InitOutcome::Ready(mut session) = outcome else { panic!("expected active session") };

    // The seed file mirrors the stored values on flattened names.
    let seed_file = retune::session::seed_path(dir.path());
    let seed: retune::Configuration =
        serde_json::from_slice(&std::fs::read(&seed_file).unwrap()).unwrap();
    assert_eq!(seed["1UnrollCount"], ParamValue::Int(4));
    assert_eq!(seed["1UnrollEnable"], ParamValue::Str("1".to_string()));

    // The first proposal replays the seed verbatim.
    let trials = session.propose(1).unwrap();
    assert_eq!(trials.len(), 1);
    let entries = read_entries(&input_path(dir.path()));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].args["UnrollCount"], ParamValue::Int(4));
}

#[test]
fn maximize_objective_prefers_higher_feedback() {
    let dir = tempfile::tempdir().unwrap();
    let opts = RunOptions::new(true, false, false);
    let outcome = SessionController::initialize(
        opts,
        dir.path(),
        &input_path(dir.path()),
        Objective::Maximize,
        &eight_duplicated_classes(),
        12,
        StubEngine::new(12),
        JsonInputWriter,
    )
    .unwrap();
    let InitOutcome::Ready(mut session) = outcome else { panic!("expected active session") };

    let trials = session.propose(2).unwrap();
    session.feedback(&[100.0, 250.0]).unwrap();
    let best = session.engine().best_configuration().unwrap().unwrap();
    assert_eq!(&best, session.engine().proposed_config(trials[1]).unwrap());
    session.finalize(false).unwrap();
}
