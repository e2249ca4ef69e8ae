//! Rolling horizon allocation of diagnostic test demand to laboratories.
//!
//! Every period a small MILP routes each test center's demand to one
//! laboratory and delay bucket, given the residual capacity left by earlier
//! periods. Criticality policies relax default routing and the distance cap
//! for test centers or laboratories under pressure.

// Allow clippy warning triggered by PyO3 macro expansion
#![cfg_attr(feature = "python", allow(clippy::useless_conversion))]

pub mod config;
pub mod criticality;
pub mod horizon;
pub mod instance;
pub mod logging;
pub mod milp;
pub mod models;
pub mod optimizer;
#[cfg(feature = "python")]
mod python;
pub mod signal;

pub use config::{ConfigError, CriticalityThresholds, ResourceStrategy, RunConfig, SourceStrategy};
pub use criticality::{
    Criticality, CriticalityContext, CriticalityFlags, ResourcePolicy, SourcePolicy,
};
pub use horizon::{
    run_online_procedure, CapacityState, Lag, Ledger, LedgerEntry, LedgerReport, OnlineProcedure,
    RunError, RunState, Snapshot,
};
pub use instance::{InstanceBuilder, RawLaboratory, RawTestCenter};
pub use models::{Instance, InstanceError, Laboratory, TestCenter};
pub use optimizer::{
    GoodLpOptimizer, MilpSolution, Optimizer, OptimizerError, SolveOptions, SolveStatus,
};
pub use signal::{IndicatorSource, IndicatorTable, SignalReading};
