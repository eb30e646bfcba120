//! Tuning tasks: a code region paired with its tunable parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{CodeRegion, TunableParam};

/// One unit of tuning work. Created during search-space construction and
/// immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub tuning_id: u32,
    pub region: CodeRegion,
    pub params: Vec<TunableParam>,
}

impl Task {
    pub fn new(tuning_id: u32, region: CodeRegion, params: Vec<TunableParam>) -> Self {
        Self { tuning_id, region, params }
    }
}

/// The run's task map, keyed by tuning id. A BTreeMap keeps iteration
/// order stable across serialize/deserialize.
pub type TaskMap = BTreeMap<u32, Task>;
