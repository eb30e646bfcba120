//! Resumable tuning sessions: checkpointed state, the reattachment walk,
//! and the lifecycle controller.

mod controller;
mod reattach;
mod state;

pub use controller::{InitOutcome, SessionController};
pub use reattach::{reattach, reattach_opt, reattach_snapshot};
pub use state::{
    checkpoint_exists, checkpoint_path, load_checkpoint, save_checkpoint, seed_path, SessionState,
    SEED_FILE, STATE_FILE,
};
