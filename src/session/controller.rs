//! Session lifecycle.
//!
//! One controller owns a tuning run end to end: build the search space,
//! alternate propose/feedback rounds with a checkpoint after every step,
//! and finalize by persisting the best configuration. A crashed or
//! suspended run continues through `resume`, which rebuilds the controller
//! from the checkpoint and reattaches the engine's detached state.

use std::path::{Path, PathBuf};

use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::engine::{
    Configuration, EntityMerger, EntityRef, Objective, ParameterSpace, SearchEngine, TrialResult,
};
use crate::error::{Result, RetuneError};
use crate::fsutil;
use crate::input::{self, InputWriter, Opportunity};
use crate::region::TaskMap;
use crate::space::{self, RunOptions};
use crate::store::CodeRegionStore;

use super::reattach::reattach_snapshot;
use super::state::{self, SessionState};

/// How many times `propose` re-asks the engine after a `None` before
/// giving up on the remainder of the batch.
const RETRY_LIMIT: usize = 5;

/// Result of starting a run.
#[derive(Debug)]
pub enum InitOutcome<E: SearchEngine, W: InputWriter> {
    /// A search space exists; the session is active.
    Ready(SessionController<E, W>),
    /// Every region is already solved. The baseline input file has been
    /// written and no checkpoint was created.
    AlreadyOptimal,
}

#[derive(Debug)]
pub struct SessionController<E: SearchEngine, W: InputWriter> {
    engine: E,
    writer: W,
    store: CodeRegionStore,
    state: SessionState,
    finalized: bool,
}

impl<E: SearchEngine, W: InputWriter> SessionController<E, W> {
    /// Starts a fresh run in `data_dir`.
    ///
    /// Refuses to clobber evidence of a previous run: an existing
    /// checkpoint or compiler-input file is fatal. When deduplication
    /// leaves nothing to tune, writes the baseline input file and reports
    /// `AlreadyOptimal` instead of creating a session.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        opts: RunOptions,
        data_dir: &Path,
        input_path: &Path,
        objective: Objective,
        opportunities: &[Opportunity],
        rng_seed: u64,
        mut engine: E,
        writer: W,
    ) -> Result<InitOutcome<E, W>> {
        let checkpoint = state::checkpoint_path(data_dir);
        if checkpoint.is_file() {
            return Err(RetuneError::CheckpointExists(checkpoint));
        }
        if input_path.is_file() {
            return Err(RetuneError::CheckpointExists(input_path.to_path_buf()));
        }

        let opts = opts.validated();
        let mut store = CodeRegionStore::open(data_dir)?;

        let task_map = match space::build_search_space(&mut store, opts, opportunities) {
            Ok(task_map) => task_map,
            Err(RetuneError::EmptySearchSpace) => {
                info!("all code regions solved by stored configurations, writing baseline");
                let entries = input::compose_baseline(&store)?;
                writer.write(input_path, &entries)?;
                return Ok(InitOutcome::AlreadyOptimal);
            }
            Err(err) => return Err(err),
        };

        let parameter_space = ParameterSpace::from_tasks(&task_map);
        let seeds = if opts.inject_seed {
            let seed = synthesize_seed(&store, &task_map, rng_seed)?;
            fsutil::write_secure(&state::seed_path(data_dir), &serde_json::to_vec_pretty(&seed)?)?;
            vec![seed]
        } else {
            Vec::new()
        };

        let run_id = engine.prepare(parameter_space, objective, seeds)?;
        info!("tuning run {run_id} started with {} tasks", task_map.len());

        let session_state = SessionState {
            data_dir: data_dir.to_path_buf(),
            input_path: input_path.to_path_buf(),
            store_dir: data_dir.to_path_buf(),
            opts,
            objective,
            task_map,
            pending_trials: Vec::new(),
            rng_seed,
            run_id,
            engine: engine.snapshot()?,
        };
        state::save_checkpoint(&session_state)?;

        Ok(InitOutcome::Ready(Self {
            engine,
            writer,
            store,
            state: session_state,
            finalized: false,
        }))
    }

    /// Rebuilds a controller from the checkpoint in `data_dir`. The store
    /// is reopened and every entity in the engine snapshot is merged
    /// against a live connection before the engine sees it.
    pub fn resume(data_dir: &Path, mut engine: E, writer: W) -> Result<Self> {
        let mut session_state = state::load_checkpoint(data_dir)?;
        let mut store = CodeRegionStore::open(&session_state.store_dir)?;

        let snapshot = {
            let mut merger = ChainMerger { first: &mut store, second: engine.merger() };
            reattach_snapshot(session_state.engine.clone(), &mut merger)?
        };
        engine.restore(snapshot.clone())?;
        session_state.engine = snapshot;
        info!(
            "resumed tuning run {} with {} pending trials",
            session_state.run_id,
            session_state.pending_trials.len()
        );

        Ok(Self { engine, writer, store, state: session_state, finalized: false })
    }

    /// Requests up to `trial_count` candidate configurations, writes one
    /// compiler-input file per trial, and checkpoints. Candidate
    /// exhaustion is non-fatal: the batch is cut short and the collected
    /// ids are returned.
    pub fn propose(&mut self, trial_count: usize) -> Result<Vec<u64>> {
        self.check_active()?;
        if !self.state.pending_trials.is_empty() {
            return Err(RetuneError::BatchPending(self.state.pending_trials.len()));
        }

        let mut ids = Vec::new();
        let mut configs: Vec<Configuration> = Vec::new();
        'batch: while ids.len() < trial_count {
            let mut candidate = None;
            for _ in 0..RETRY_LIMIT {
                if let Some(found) = self.engine.next_candidate()? {
                    candidate = Some(found);
                    break;
                }
            }
            match candidate {
                Some(trial) => {
                    ids.push(trial.id);
                    configs.push(trial.config);
                }
                None => {
                    warn!("engine returned no candidate after {RETRY_LIMIT} attempts");
                    break 'batch;
                }
            }
        }
        if ids.len() < trial_count {
            warn!("collected {} of {trial_count} requested trials", ids.len());
        }

        for (index, config) in configs.iter().enumerate() {
            let entries = input::compose_entries(
                &self.store,
                self.state.opts.use_hash_matching,
                &self.state.task_map,
                config,
            )?;
            let path = input::trial_input_path(&self.state.input_path, index, ids.len());
            self.writer.write(&path, &entries)?;
        }

        self.state.pending_trials = ids.clone();
        self.checkpoint()?;
        Ok(ids)
    }

    /// Reports one measurement per pending trial, in proposal order. The
    /// previous batch's input files are cleaned up best-effort.
    pub fn feedback(&mut self, values: &[f64]) -> Result<()> {
        self.check_active()?;
        if values.len() != self.state.pending_trials.len() {
            return Err(RetuneError::FeedbackMismatch {
                expected: self.state.pending_trials.len(),
                received: values.len(),
            });
        }

        let pending = std::mem::take(&mut self.state.pending_trials);
        for (trial_id, value) in pending.iter().zip(values) {
            let result = TrialResult::from_feedback(self.state.objective, *value);
            self.engine.report(*trial_id, result)?;
        }

        let count = pending.len();
        let stale: Vec<PathBuf> = (0..count)
            .map(|index| input::trial_input_path(&self.state.input_path, index, count))
            .collect();
        fsutil::remove_files(stale);

        self.checkpoint()
    }

    /// Re-scores all collected results, firing the engine's new-best hook
    /// along the way, then writes the compiler input for the best
    /// configuration. With `persist` the best parameters replace the
    /// stored optimum of every tuned class. Returns false when no trial
    /// has completed.
    pub fn dump(&mut self, persist: bool) -> Result<bool> {
        let outcomes = self.engine.all_results()?;
        let mut best: Option<TrialResult> = None;
        for outcome in &outcomes {
            let improved = match best {
                Some(current) => self.state.objective.better(&outcome.result, &current),
                None => true,
            };
            if improved {
                best = Some(outcome.result);
                self.engine.on_new_best(outcome.trial_id);
            }
        }

        let Some(best_config) = self.engine.best_configuration()? else {
            return Ok(false);
        };

        if persist {
            for task in self.state.task_map.values() {
                let args = input::task_args(task, &best_config);
                let (hash, region_type, pass) = task.region.class_key();
                let (hash, pass) = (hash.to_string(), pass.to_string());
                self.store.upsert_optimal(&hash, region_type, &pass, &args)?;
            }
        }

        let entries = input::compose_entries(
            &self.store,
            self.state.opts.use_hash_matching,
            &self.state.task_map,
            &best_config,
        )?;
        self.writer.write(&self.state.input_path, &entries)?;

        self.checkpoint()?;
        Ok(true)
    }

    /// Final `dump` plus engine and store shutdown. Fatal when the run
    /// never produced a result.
    pub fn finalize(mut self, persist: bool) -> Result<()> {
        if !self.dump(persist)? {
            return Err(RetuneError::NoBestConfiguration);
        }
        self.engine.finish()?;
        self.finalized = true;
        self.store.close()?;
        info!("tuning run {} finalized", self.state.run_id);
        Ok(())
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn task_map(&self) -> &TaskMap {
        &self.state.task_map
    }

    pub fn pending_trials(&self) -> &[u64] {
        &self.state.pending_trials
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn store(&self) -> &CodeRegionStore {
        &self.store
    }

    fn check_active(&self) -> Result<()> {
        if self.finalized {
            return Err(RetuneError::Engine("session already finalized".to_string()));
        }
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.state.engine = self.engine.snapshot()?;
        state::save_checkpoint(&self.state)
    }
}

/// Synthesizes the seed configuration injected when re-tuning solved
/// classes: stored values where present and valid for the domain, random
/// seed values elsewhere.
fn synthesize_seed(
    store: &CodeRegionStore,
    task_map: &TaskMap,
    rng_seed: u64,
) -> Result<Configuration> {
    let mut rng = StdRng::seed_from_u64(rng_seed);
    let mut config = Configuration::new();
    for task in task_map.values() {
        let (hash, region_type, pass) = task.region.class_key();
        let stored = store.get_optimal_parameters(hash, region_type, pass)?;
        for param in &task.params {
            let value = stored
                .as_ref()
                .and_then(|assignment| assignment.get(&param.field))
                .filter(|value| param.domain.is_valid(value))
                .cloned()
                .unwrap_or_else(|| param.domain.seed_value(&mut rng));
            config.insert(param.name.clone(), value);
        }
    }
    Ok(config)
}

/// Tries the store's identity map first, then the engine's. Each merger
/// leaves foreign tables untouched, so chaining routes every entity to
/// its owner.
struct ChainMerger<'a> {
    first: &'a mut dyn EntityMerger,
    second: &'a mut dyn EntityMerger,
}

impl EntityMerger for ChainMerger<'_> {
    fn merge(&mut self, entity: EntityRef) -> Result<EntityRef> {
        let entity = self.first.merge(entity)?;
        if entity.attached {
            return Ok(entity);
        }
        self.second.merge(entity)
    }
}
