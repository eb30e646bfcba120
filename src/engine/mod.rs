//! Search-engine seam.
//!
//! The external search engine proposes parameter configurations and
//! accepts numeric feedback; its internal techniques (genetic search,
//! bandit arm selection, ...) are out of scope. The core's only contract
//! with it: propose, report, query the best result, and round-trip its
//! opaque resumable state through serialization.

mod state;
mod stub;

pub use state::{EngineSnapshot, EntityMerger, EntityRef, StateNode};
pub use stub::StubEngine;

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::region::{ParamDomain, ParamValue, TaskMap};

/// Objective direction for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    /// Lower time metric wins.
    Minimize,
    /// Higher rate metric wins.
    Maximize,
}

impl Objective {
    /// True iff `a` beats `b` under this objective.
    pub fn better(&self, a: &TrialResult, b: &TrialResult) -> bool {
        match self {
            Objective::Minimize => a.time < b.time,
            Objective::Maximize => a.rate > b.rate,
        }
    }
}

/// The engine's result record for one trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub time: f64,
    pub rate: f64,
}

impl TrialResult {
    /// Wraps a raw feedback value per objective direction. Under
    /// maximize, time is a sentinel zero since the objective never reads
    /// it.
    pub fn from_feedback(objective: Objective, value: f64) -> Self {
        match objective {
            Objective::Minimize => Self { time: value, rate: 0.0 },
            Objective::Maximize => Self { time: 0.0, rate: value },
        }
    }

    /// The metric the objective actually compares.
    pub fn metric(&self, objective: Objective) -> f64 {
        match objective {
            Objective::Minimize => self.time,
            Objective::Maximize => self.rate,
        }
    }
}

/// A full assignment over the engine's flattened parameter namespace.
pub type Configuration = BTreeMap<String, ParamValue>;

/// One candidate configuration proposed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialCandidate {
    pub id: u64,
    pub config: Configuration,
}

/// A reported result, in the order the engine collected it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub trial_id: u64,
    pub result: TrialResult,
}

/// The engine's flat parameter space, built from every task's parameter
/// list during initialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    params: BTreeMap<String, ParamDomain>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, domain: ParamDomain) {
        self.params.insert(name.to_string(), domain);
    }

    pub fn get(&self, name: &str) -> Option<&ParamDomain> {
        self.params.get(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamDomain)> {
        self.params.iter()
    }

    /// Collects the flattened parameters of every task in the map.
    pub fn from_tasks(task_map: &TaskMap) -> Self {
        let mut space = Self::new();
        for task in task_map.values() {
            for param in &task.params {
                space.add(&param.name, param.domain.clone());
            }
        }
        space
    }

    /// Draws a random full configuration.
    pub fn sample_random<R: Rng>(&self, rng: &mut R) -> Configuration {
        self.params
            .iter()
            .map(|(name, domain)| (name.clone(), domain.seed_value(rng)))
            .collect()
    }
}

/// The API surface the core consumes from the external search engine.
pub trait SearchEngine {
    /// Binds the engine to the run's parameter space, objective, and any
    /// seed configurations; returns the engine's tuning-run id.
    fn prepare(
        &mut self,
        space: ParameterSpace,
        objective: Objective,
        seeds: Vec<Configuration>,
    ) -> Result<u64>;

    /// Next candidate configuration, or `None` when duplicate avoidance
    /// exhausted the engine's proposals for now.
    fn next_candidate(&mut self) -> Result<Option<TrialCandidate>>;

    /// Reports feedback for a previously proposed trial.
    fn report(&mut self, trial_id: u64, result: TrialResult) -> Result<()>;

    /// The best configuration found so far, if any trial has completed.
    fn best_configuration(&self) -> Result<Option<Configuration>>;

    /// All reported results, in collection order.
    fn all_results(&self) -> Result<Vec<TrialOutcome>>;

    /// Engine-side hook invoked when re-scoring promotes a result to new
    /// best.
    fn on_new_best(&mut self, trial_id: u64);

    /// Marks the tuning run complete.
    fn finish(&mut self) -> Result<()>;

    /// Detaches the engine's resumable state for checkpointing. The
    /// snapshot must not reference live connections.
    fn snapshot(&self) -> Result<EngineSnapshot>;

    /// Restores a (reattached) snapshot into the engine after
    /// deserialization.
    fn restore(&mut self, snapshot: EngineSnapshot) -> Result<()>;

    /// The engine's identity map, used by the reattachment walk to merge
    /// store-backed entities.
    fn merger(&mut self) -> &mut dyn EntityMerger;
}
