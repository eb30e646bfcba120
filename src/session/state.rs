//! Checkpointed session state.
//!
//! Everything a resumed process needs is in one JSON file: the task map,
//! paths, run flags, pending trial ids, the rng seed, and the engine's
//! detached snapshot. The live store connection is deliberately absent; it
//! is reopened from `store_dir` on resume.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::{EngineSnapshot, Objective};
use crate::error::Result;
use crate::fsutil;
use crate::region::TaskMap;
use crate::space::RunOptions;

/// Checkpoint file name inside the run directory.
pub const STATE_FILE: &str = "state.json";

/// Seed-configuration file name inside the run directory.
pub const SEED_FILE: &str = "seed.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Run directory holding the checkpoint, seed file, and store.
    pub data_dir: PathBuf,
    /// Compiler-input file the next compilation reads.
    pub input_path: PathBuf,
    /// Directory the configuration database lives in.
    pub store_dir: PathBuf,
    pub opts: RunOptions,
    pub objective: Objective,
    pub task_map: TaskMap,
    /// Trials proposed but not yet fed back, in proposal order.
    pub pending_trials: Vec<u64>,
    /// Seed for the session's derived random streams; persisting it keeps
    /// a resumed process on a reproducible sequence.
    pub rng_seed: u64,
    /// The engine's tuning-run handle.
    pub run_id: u64,
    pub engine: EngineSnapshot,
}

pub fn checkpoint_path(data_dir: &Path) -> PathBuf {
    data_dir.join(STATE_FILE)
}

pub fn seed_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SEED_FILE)
}

pub fn checkpoint_exists(data_dir: &Path) -> bool {
    checkpoint_path(data_dir).is_file()
}

/// Writes the checkpoint atomically. Pending-callback entries holding
/// non-serializable hooks are dropped first; they cannot be restored and
/// must not poison the file.
pub fn save_checkpoint(state: &SessionState) -> Result<()> {
    let mut state = state.clone();
    state.engine.strip_transient_callbacks();
    let bytes = serde_json::to_vec_pretty(&state)?;
    fsutil::write_secure_atomic(&checkpoint_path(&state.data_dir), &bytes)
}

/// Reads the checkpoint back, rejecting loosely-permissioned files before
/// touching their content.
pub fn load_checkpoint(data_dir: &Path) -> Result<SessionState> {
    let path = checkpoint_path(data_dir);
    fsutil::check_file_permissions(&path)?;
    let bytes = std::fs::read(&path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
