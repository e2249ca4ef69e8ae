//! Residual-capacity windows and backlog carried between periods.

use crate::models::Instance;

use super::ledger::{Lag, LedgerEntry};

/// Lookahead window and backlog of one laboratory.
#[derive(Clone, Debug, PartialEq)]
pub struct LabCapacity {
    /// Residual capacity for lags `1..=tau_max` (`Cap_bar`).
    /// Invariant: always exactly `tau_max` entries.
    window: Vec<f64>,
    /// Backlog committed in the previous period (`L`)
    backlog: f64,
}

impl LabCapacity {
    pub fn window(&self) -> &[f64] {
        &self.window
    }

    pub fn backlog(&self) -> f64 {
        self.backlog
    }
}

/// Capacity state of all laboratories for the period being planned.
///
/// Owned by the driver, which advances it exactly once per period before the
/// snapshot is built. Everything else only reads it.
#[derive(Clone, Debug, PartialEq)]
pub struct CapacityState {
    tau_max: usize,
    labs: Vec<LabCapacity>,
    /// Period the state was last advanced for; `None` before the first period.
    period: Option<usize>,
}

impl CapacityState {
    /// Zero backlog and a window holding the first `tau_max` capacity entries.
    pub fn initial(instance: &Instance, tau_max: usize) -> Self {
        let labs = instance
            .laboratories
            .iter()
            .map(|lab| LabCapacity {
                window: lab.capacity[..tau_max].to_vec(),
                backlog: 0.0,
            })
            .collect();
        Self {
            tau_max,
            labs,
            period: None,
        }
    }

    pub fn tau_max(&self) -> usize {
        self.tau_max
    }

    pub fn period(&self) -> Option<usize> {
        self.period
    }

    pub fn labs(&self) -> &[LabCapacity] {
        &self.labs
    }

    #[inline]
    pub fn window(&self, laboratory: usize) -> &[f64] {
        &self.labs[laboratory].window
    }

    #[inline]
    pub fn backlog(&self, laboratory: usize) -> f64 {
        self.labs[laboratory].backlog
    }

    /// Prepare the state for `period` from the previous period's entry.
    ///
    /// Each window slides forward by one period: the entry for lag `τ` becomes
    /// the old entry for lag `τ+1` minus the demand committed there last
    /// period. The new tail is the fresh capacity `Cap_t[period + tau_max]`
    /// net of last period's backlog.
    pub fn advance(&mut self, instance: &Instance, period: usize, previous: Option<&LedgerEntry>) {
        let tau_max = self.tau_max;
        for (j, lab) in self.labs.iter_mut().enumerate() {
            let backlog = previous.map_or(0.0, |e| e.backlog[j]);

            let mut window = Vec::with_capacity(tau_max);
            for tau in 1..tau_max {
                let committed =
                    previous.map_or(0.0, |e| e.routed_demand(instance, j, Lag::Within(tau + 1)));
                window.push(lab.window[tau] - committed);
            }
            let fresh = instance.laboratories[j].capacity[period + tau_max];
            window.push((fresh - backlog).max(0.0));

            lab.window = window;
            lab.backlog = backlog;
        }
        self.period = Some(period);
    }

    /// Backlog that fresh capacity `Cap_t[period + tau_max]` cannot absorb.
    ///
    /// Pairs with the window tail written by [`advance`](Self::advance): the
    /// part of last period's backlog that fits is taken out of the tail, the
    /// rest is carried into this period's backlog.
    pub fn carried_backlog(&self, instance: &Instance, laboratory: usize, period: usize) -> f64 {
        let fresh = instance.laboratories[laboratory].capacity[period + self.tau_max];
        (self.labs[laboratory].backlog - fresh).max(0.0)
    }
}
