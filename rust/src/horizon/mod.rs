//! Rolling horizon: capacity state, per-period snapshot, ledger and driver.
//!
//! Each period the driver advances the [`CapacityState`], evaluates
//! criticality, builds a [`Snapshot`] and appends the solution to the
//! [`Ledger`]. The first infeasible period ends the run.

mod capacity;
mod driver;
mod ledger;
mod snapshot;

pub use capacity::{CapacityState, LabCapacity};
pub use driver::{run_online_procedure, OnlineProcedure, RunError, RunState};
pub use ledger::{
    Lag, Ledger, LedgerEntry, LedgerError, LedgerReport, ObjectiveBreakdown, Routing,
};
pub use snapshot::{build_snapshot, Snapshot, SnapshotVars};
