//! Deterministic in-process search engine.
//!
//! Replays seed configurations first, then proposes random samples with
//! duplicate avoidance. Useful as the engine for integration tests and as
//! a template for wiring a real search backend: its snapshot/restore pair
//! exercises the whole checkpoint path, including entity reattachment.

use std::collections::{BTreeMap, HashSet, VecDeque};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{Result, RetuneError};

use super::{
    Configuration, EngineSnapshot, EntityMerger, EntityRef, Objective, ParameterSpace, SearchEngine,
    StateNode, TrialCandidate, TrialOutcome, TrialResult,
};

/// How many fresh samples to draw before concluding the space is
/// (locally) exhausted.
const DUPLICATE_RETRY_LIMIT: usize = 10;

#[derive(Debug)]
pub struct StubEngine {
    seed: u64,
    /// Count of samples drawn so far. Together with `seed` this is the
    /// engine's entire random state, so resume replays exactly.
    draws: u64,
    run_id: u64,
    next_trial_id: u64,
    space: ParameterSpace,
    objective: Objective,
    seeds: VecDeque<Configuration>,
    proposed: BTreeMap<u64, Configuration>,
    tried: HashSet<String>,
    results: Vec<TrialOutcome>,
    /// Trial ids promoted to new best by re-scoring, in event order.
    new_best_events: Vec<u64>,
    /// When set, `next_candidate` stops proposing after this many trials.
    candidate_limit: Option<u64>,
    finished: bool,
}

impl StubEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            draws: 0,
            run_id: 0,
            next_trial_id: 0,
            space: ParameterSpace::new(),
            objective: Objective::Minimize,
            seeds: VecDeque::new(),
            proposed: BTreeMap::new(),
            tried: HashSet::new(),
            results: Vec::new(),
            new_best_events: Vec::new(),
            candidate_limit: None,
            finished: false,
        }
    }

    /// Caps the number of candidates the engine will ever propose.
    pub fn with_candidate_limit(mut self, limit: u64) -> Self {
        self.candidate_limit = Some(limit);
        self
    }

    pub fn new_best_events(&self) -> &[u64] {
        &self.new_best_events
    }

    pub fn proposed_config(&self, trial_id: u64) -> Option<&Configuration> {
        self.proposed.get(&trial_id)
    }

    /// One deterministic draw from the space. Each draw uses a derived
    /// seed so the sequence is a pure function of `(seed, draws)`.
    fn draw(&mut self) -> Result<Configuration> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.draws));
        self.draws += 1;
        Ok(self.space.sample_random(&mut rng))
    }

    fn fingerprint(config: &Configuration) -> Result<String> {
        Ok(serde_json::to_string(config)?)
    }

    fn issue(&mut self, config: Configuration) -> Result<TrialCandidate> {
        self.next_trial_id += 1;
        let id = self.next_trial_id;
        self.tried.insert(Self::fingerprint(&config)?);
        self.proposed.insert(id, config.clone());
        Ok(TrialCandidate { id, config })
    }

    fn best_outcome(&self) -> Option<&TrialOutcome> {
        let mut best: Option<&TrialOutcome> = None;
        for outcome in &self.results {
            match best {
                Some(b) if !self.objective.better(&outcome.result, &b.result) => {}
                _ => best = Some(outcome),
            }
        }
        best
    }
}

impl SearchEngine for StubEngine {
    fn prepare(
        &mut self,
        space: ParameterSpace,
        objective: Objective,
        seeds: Vec<Configuration>,
    ) -> Result<u64> {
        self.space = space;
        self.objective = objective;
        self.seeds = seeds.into();
        self.run_id += 1;
        Ok(self.run_id)
    }

    fn next_candidate(&mut self) -> Result<Option<TrialCandidate>> {
        if self.finished {
            return Err(RetuneError::Engine("tuning run already finished".to_string()));
        }
        if let Some(limit) = self.candidate_limit {
            if self.next_trial_id >= limit {
                return Ok(None);
            }
        }
        while let Some(seed_config) = self.seeds.pop_front() {
            if !self.tried.contains(&Self::fingerprint(&seed_config)?) {
                return self.issue(seed_config).map(Some);
            }
        }
        for _ in 0..DUPLICATE_RETRY_LIMIT {
            let config = self.draw()?;
            if !self.tried.contains(&Self::fingerprint(&config)?) {
                return self.issue(config).map(Some);
            }
        }
        Ok(None)
    }

    fn report(&mut self, trial_id: u64, result: TrialResult) -> Result<()> {
        if !self.proposed.contains_key(&trial_id) {
            return Err(RetuneError::Engine(format!("feedback for unknown trial {trial_id}")));
        }
        self.results.push(TrialOutcome { trial_id, result });
        Ok(())
    }

    fn best_configuration(&self) -> Result<Option<Configuration>> {
        let Some(best) = self.best_outcome() else {
            return Ok(None);
        };
        let config = self.proposed.get(&best.trial_id).cloned().ok_or_else(|| {
            RetuneError::Engine(format!("best trial {} has no recorded config", best.trial_id))
        })?;
        Ok(Some(config))
    }

    fn all_results(&self) -> Result<Vec<TrialOutcome>> {
        Ok(self.results.clone())
    }

    fn on_new_best(&mut self, trial_id: u64) {
        self.new_best_events.push(trial_id);
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn snapshot(&self) -> Result<EngineSnapshot> {
        let best_result = match self.best_outcome() {
            Some(outcome) => Some(StateNode::Entity(
                EntityRef::new("results", vec![outcome.trial_id.to_string()])
                    .with_field("time", serde_json::json!(outcome.result.time))
                    .with_field("rate", serde_json::json!(outcome.result.rate)),
            )),
            None => None,
        };

        let mut internals = BTreeMap::new();
        internals.insert("seed".to_string(), StateNode::scalar(self.seed));
        internals.insert("draws".to_string(), StateNode::scalar(self.draws));
        internals.insert("next_trial_id".to_string(), StateNode::scalar(self.next_trial_id));
        internals
            .insert("objective".to_string(), StateNode::Scalar(serde_json::to_value(self.objective)?));
        internals.insert("space".to_string(), StateNode::Scalar(serde_json::to_value(&self.space)?));
        internals.insert("seeds".to_string(), StateNode::Scalar(serde_json::to_value(&self.seeds)?));
        internals
            .insert("proposed".to_string(), StateNode::Scalar(serde_json::to_value(&self.proposed)?));
        internals
            .insert("results".to_string(), StateNode::Scalar(serde_json::to_value(&self.results)?));
        if let Some(limit) = self.candidate_limit {
            internals.insert("candidate_limit".to_string(), StateNode::scalar(limit));
        }

        Ok(EngineSnapshot {
            run_handle: Some(StateNode::scalar(self.run_id)),
            best_result,
            pending_result_callbacks: Vec::new(),
            root_technique: Some(StateNode::Object(internals)),
        })
    }

    fn restore(&mut self, snapshot: EngineSnapshot) -> Result<()> {
        let corrupt = |what: &str| RetuneError::Engine(format!("snapshot missing {what}"));

        if let Some(StateNode::Scalar(value)) = snapshot.run_handle {
            self.run_id = serde_json::from_value(value)?;
        }
        let Some(StateNode::Object(internals)) = snapshot.root_technique else {
            return Err(corrupt("technique state"));
        };
        let scalar = |name: &str| -> Result<serde_json::Value> {
            match internals.get(name) {
                Some(StateNode::Scalar(value)) => Ok(value.clone()),
                _ => Err(corrupt(name)),
            }
        };

        self.seed = serde_json::from_value(scalar("seed")?)?;
        self.draws = serde_json::from_value(scalar("draws")?)?;
        self.next_trial_id = serde_json::from_value(scalar("next_trial_id")?)?;
        self.objective = serde_json::from_value(scalar("objective")?)?;
        self.space = serde_json::from_value(scalar("space")?)?;
        self.seeds = serde_json::from_value(scalar("seeds")?)?;
        self.proposed = serde_json::from_value(scalar("proposed")?)?;
        self.results = serde_json::from_value(scalar("results")?)?;
        self.candidate_limit = match internals.get("candidate_limit") {
            Some(StateNode::Scalar(value)) => Some(serde_json::from_value(value.clone())?),
            _ => None,
        };
        self.tried = self
            .proposed
            .values()
            .map(Self::fingerprint)
            .collect::<Result<HashSet<_>>>()?;
        self.finished = false;
        Ok(())
    }

    fn merger(&mut self) -> &mut dyn EntityMerger {
        self
    }
}

/// The stub's identity map: a `results` entity is live when its trial id
/// has a reported outcome.
impl EntityMerger for StubEngine {
    fn merge(&mut self, mut entity: EntityRef) -> Result<EntityRef> {
        if entity.table != "results" {
            return Ok(entity);
        }
        let trial_id: u64 = entity
            .key
            .first()
            .and_then(|k| k.parse().ok())
            .ok_or_else(|| RetuneError::Engine("results entity with malformed key".to_string()))?;
        if let Some(outcome) = self.results.iter().find(|o| o.trial_id == trial_id) {
            entity.fields.insert("time".to_string(), serde_json::json!(outcome.result.time));
            entity.fields.insert("rate".to_string(), serde_json::json!(outcome.result.rate));
            entity.attached = true;
        }
        Ok(entity)
    }
}
