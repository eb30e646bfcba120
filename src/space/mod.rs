//! Search-space construction and region deduplication.
//!
//! Opportunities stream in from every translation unit of the program, so
//! the same code region (and the same equivalence class) typically shows
//! up many times. This module decides, per region, whether it becomes a
//! tuning task, consulting the persistent store for prior optima and the
//! current run's observation counts.

use std::collections::HashSet;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RetuneError};
use crate::input::Opportunity;
use crate::region::{CodeRegion, Task, TaskMap, TunableParam};
use crate::store::CodeRegionStore;

/// Per-run deduplication flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Consult the store at all; off means every non-program-param
    /// opportunity becomes a task.
    pub use_hash_matching: bool,
    /// Treat classes with a stored optimal as already solved.
    pub use_prev_configs: bool,
    /// Re-tune solved classes, seeding the engine with the stored
    /// configuration instead of skipping them.
    pub inject_seed: bool,
}

impl RunOptions {
    pub fn new(use_hash_matching: bool, use_prev_configs: bool, inject_seed: bool) -> Self {
        Self { use_hash_matching, use_prev_configs, inject_seed }
    }

    /// Configuration reuse is defined in terms of equivalence classes, so
    /// it requires hash matching. Invalid combinations degrade to a plain
    /// run with a warning rather than failing.
    pub fn validated(mut self) -> Self {
        if !self.use_hash_matching && (self.use_prev_configs || self.inject_seed) {
            warn!("configuration reuse requires hash matching; disabling reuse for this run");
            self.use_prev_configs = false;
            self.inject_seed = false;
        }
        self
    }

    /// Decides whether `region` should be tuned this run, recording the
    /// observation in the store as a side effect. The branch order
    /// matters: program-global parameters are deduplicated purely on
    /// observation counts, never against stored optima.
    pub fn admit(&self, store: &mut CodeRegionStore, region: &CodeRegion) -> Result<bool> {
        if region.region_type.is_program_param() {
            store.record_region(region, false)?;
            let (hash, region_type, pass) = region.class_key();
            return Ok(!store.equivalence_class_multiply_observed(hash, region_type, pass)?);
        }

        if !self.use_hash_matching {
            return Ok(true);
        }

        let (hash, region_type, pass) = region.class_key();
        if self.use_prev_configs && store.equivalence_class_has_optimal(hash, region_type, pass)? {
            store.record_region(region, true)?;
            if !self.inject_seed {
                debug!("region {} solved by stored configuration, skipping", region.name);
                return Ok(false);
            }
            return Ok(!store.equivalence_class_multiply_observed(hash, region_type, pass)?);
        }

        store.record_region(region, false)?;
        Ok(!store.equivalence_class_multiply_observed(hash, region_type, pass)?)
    }
}

/// Builds the run's task map. Clears the per-run observation table, then
/// admits opportunities in order, assigning tuning ids sequentially from
/// 1. An identical region identity never yields a second task even if the
/// policy would admit it again.
pub fn build_search_space(
    store: &mut CodeRegionStore,
    opts: RunOptions,
    opportunities: &[Opportunity],
) -> Result<TaskMap> {
    if opportunities.is_empty() {
        return Err(RetuneError::NoOpportunities);
    }

    store.clear_current_regions()?;

    let mut task_map = TaskMap::new();
    let mut claimed: HashSet<CodeRegion> = HashSet::new();
    let mut next_id: u32 = 0;

    for opp in opportunities {
        if opp.params.is_empty() {
            debug!("opportunity {} has no tunable parameters, skipping", opp.region.name);
            continue;
        }
        if claimed.contains(&opp.region) {
            continue;
        }
        if !opts.admit(store, &opp.region)? {
            continue;
        }
        claimed.insert(opp.region.clone());

        next_id += 1;
        let params: Vec<TunableParam> = opp
            .params
            .iter()
            .map(|(field, domain)| TunableParam::new(next_id, field, domain.clone()))
            .collect();
        task_map.insert(next_id, Task::new(next_id, opp.region.clone(), params));
    }

    if task_map.is_empty() {
        return Err(RetuneError::EmptySearchSpace);
    }
    debug!("search space built: {} tasks from {} opportunities", task_map.len(), opportunities.len());
    Ok(task_map)
}
