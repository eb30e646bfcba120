//! Resumable compiler auto-tuning core.
//!
//! The compiler reports tunable code regions; an external search engine
//! proposes parameter configurations; each configuration is compiled and
//! measured out of process. One logical tuning run spans many process
//! invocations, so every step checkpoints to disk, and regions whose
//! optimal configuration is already known are deduplicated away through
//! content-hash equivalence classes backed by a small SQLite store.
//!
//! # Example
//!
//! ```ignore
//! use retune::{
//!     InitOutcome, JsonInputWriter, Objective, RunOptions, SessionController, StubEngine,
//! };
//!
//! let opts = RunOptions::new(true, true, false).validated();
//! let outcome = SessionController::initialize(
//!     opts,
//!     run_dir,
//!     &run_dir.join("input.json"),
//!     Objective::Minimize,
//!     &opportunities,
//!     42,
//!     StubEngine::new(42),
//!     JsonInputWriter,
//! )?;
//!
//! let InitOutcome::Ready(mut session) = outcome else { return Ok(()) };
//! let trials = session.propose(4)?;
//! let times = measure(&trials); // compile + run, out of process
//! session.feedback(&times)?;
//! session.finalize(true)?;
//! ```

pub mod engine;
pub mod error;
pub mod fsutil;
pub mod input;
pub mod region;
pub mod session;
pub mod space;
pub mod store;

pub use engine::{
    Configuration, EngineSnapshot, EntityMerger, EntityRef, Objective, ParameterSpace,
    SearchEngine, StateNode, StubEngine, TrialCandidate, TrialOutcome, TrialResult,
};
pub use error::{Result, RetuneError};
pub use input::{ConfigEntry, InputWriter, JsonInputWriter, Opportunity};
pub use region::{
    CodeRegion, ParamAssignment, ParamDomain, ParamValue, RegionType, SourceLoc, Task, TaskMap,
    TunableParam,
};
pub use session::{InitOutcome, SessionController, SessionState};
pub use space::{build_search_space, RunOptions};
pub use store::{CodeRegionStore, StoreError, STORE_FILE};
