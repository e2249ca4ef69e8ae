//! Single-period MILP: routing, reassignment, backlog and overload.
//!
//! Variables for period `t`:
//! - `y[i,j,τ]` binary, one per test center, laboratory and lag bucket
//! - `s[i]` binary reassignment flag
//! - `L[j]` continuous backlog, `U` continuous maximum relative overload
//!
//! The objective is `Σ d·y[·,·,∞] + θ·Σ d·s + η·U`.

use rayon::prelude::*;

use crate::config::RunConfig;
use crate::criticality::CriticalityFlags;
use crate::log_checks;
use crate::milp::{Constraint, LinExpr, MilpModel, Sense, VarId};
use crate::models::Instance;
use crate::optimizer::{MilpSolution, OptimizerError};

use super::capacity::CapacityState;
use super::ledger::{Lag, LedgerEntry, ObjectiveBreakdown, Routing};

/// Absolute tolerance when checking a rounded solution against the model.
const FEASIBILITY_TOLERANCE: f64 = 1e-6;

/// Variable handles of one snapshot model.
#[derive(Clone, Debug)]
pub struct SnapshotVars {
    laboratories: usize,
    buckets: usize,
    first_y: usize,
    s: Vec<VarId>,
    backlog: Vec<VarId>,
    u_max: VarId,
}

impl SnapshotVars {
    /// Handle of `y[i,j,τ]`, `τ` in `1..=tau_max+1`.
    #[inline]
    pub fn y(&self, test_center: usize, laboratory: usize, bucket: usize) -> VarId {
        let pair = test_center * self.laboratories + laboratory;
        VarId(self.first_y + pair * self.buckets + bucket - 1)
    }

    #[inline]
    pub fn s(&self, test_center: usize) -> VarId {
        self.s[test_center]
    }

    #[inline]
    pub fn backlog(&self, laboratory: usize) -> VarId {
        self.backlog[laboratory]
    }

    #[inline]
    pub fn u_max(&self) -> VarId {
        self.u_max
    }
}

/// The model for one period together with what is needed to read back its
/// solution.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub period: usize,
    pub model: MilpModel,
    pub vars: SnapshotVars,
    pub flags: CriticalityFlags,
    tau_max: usize,
    reassignment_weight: f64,
    backlog_weight: f64,
    /// `Cap_bar[j]` the model was built against
    windows: Vec<Vec<f64>>,
    /// `max(L_prev − Cap_t[t+tau_max], 0)` per laboratory
    carried: Vec<f64>,
    /// `Cap_t[t+tau_max+1]` per laboratory
    next_capacity: Vec<f64>,
}

/// Build the model for `period` from the advanced capacity state and the
/// period's criticality flags.
///
/// The instance must have been validated for `config.tau_max`.
pub fn build_snapshot(
    instance: &Instance,
    config: &RunConfig,
    state: &CapacityState,
    flags: CriticalityFlags,
    period: usize,
) -> Snapshot {
    let tau_max = config.tau_max;
    let buckets = tau_max + 1;
    let beyond = Lag::BeyondWindow.bucket(tau_max);
    let n_tc = instance.test_centers.len();
    let n_lab = instance.laboratories.len();

    let mut model = MilpModel::new(format!("{}_t{}", instance.name, period));

    let first_y = model.num_variables();
    for tc in &instance.test_centers {
        for lab in &instance.laboratories {
            for bucket in 1..=buckets {
                model.add_binary(format!("y[{},{},{}]", tc.id, lab.id, bucket));
            }
        }
    }
    let s: Vec<VarId> = instance
        .test_centers
        .iter()
        .map(|tc| model.add_binary(format!("s[{}]", tc.id)))
        .collect();
    let backlog: Vec<VarId> = instance
        .laboratories
        .iter()
        .map(|lab| model.add_continuous(format!("L[{}]", lab.id), 0.0, f64::INFINITY))
        .collect();
    let u_max = model.add_continuous("U_max", 0.0, f64::INFINITY);

    let vars = SnapshotVars {
        laboratories: n_lab,
        buckets,
        first_y,
        s,
        backlog,
        u_max,
    };

    // Per test center: assign, gate, distance and reassign rows.
    let source_rows: Vec<Vec<Constraint>> = instance
        .test_centers
        .par_iter()
        .enumerate()
        .map(|(i, tc)| {
            let mut rows = Vec::with_capacity(2 * n_lab + 2);
            let crit_i = flags.source(i);

            let mut assign = LinExpr::with_capacity(n_lab * buckets);
            for j in 0..n_lab {
                for b in 1..=buckets {
                    assign.add_term(vars.y(i, j, b), 1.0);
                }
            }
            rows.push(Constraint::new(format!("assign[{}]", tc.id), assign, Sense::Equal, 1.0));

            for (j, lab) in instance.laboratories.iter().enumerate() {
                let crit_j = flags.laboratory(j);
                let default = f64::from(u8::from(tc.is_default(j)));

                let mut gate = LinExpr::with_capacity(buckets + 1);
                for b in 1..=buckets {
                    gate.add_term(vars.y(i, j, b), 1.0);
                }
                gate.add_term(vars.s(i), -1.0);
                rows.push(Constraint::new(
                    format!("gate[{},{}]", tc.id, lab.id),
                    gate,
                    Sense::LessEq,
                    default + crit_i + crit_j,
                ));

                let cost = tc.distance[j];
                if cost != 0.0 {
                    let mut distance = LinExpr::with_capacity(buckets);
                    for b in 1..=buckets {
                        distance.add_term(vars.y(i, j, b), cost);
                    }
                    rows.push(Constraint::new(
                        format!("distance[{},{}]", tc.id, lab.id),
                        distance,
                        Sense::LessEq,
                        config.max_distance + crit_i * (1.0 - crit_j) * config.distance_relaxation,
                    ));
                }
            }

            let may_reassign = if tc.demand_at(period) > 0.0 { 1.0 } else { 0.0 };
            rows.push(Constraint::new(
                format!("reassign[{}]", tc.id),
                LinExpr::new().term(vars.s(i), 1.0),
                Sense::LessEq,
                may_reassign,
            ));
            rows
        })
        .collect();

    let carried: Vec<f64> = (0..n_lab)
        .map(|j| state.carried_backlog(instance, j, period))
        .collect();
    let next_capacity: Vec<f64> = instance
        .laboratories
        .iter()
        .map(|lab| lab.capacity[period + tau_max + 1])
        .collect();

    // Per laboratory: capacity per finite lag, backlog and overload rows.
    let lab_rows: Vec<Vec<Constraint>> = instance
        .laboratories
        .par_iter()
        .enumerate()
        .map(|(j, lab)| {
            let window = state.window(j);
            let mut rows = Vec::with_capacity(tau_max + 2);

            for tau in 1..=tau_max {
                let mut load = LinExpr::with_capacity(n_tc);
                for (i, tc) in instance.test_centers.iter().enumerate() {
                    load.add_term(vars.y(i, j, tau), tc.demand_at(period));
                }
                if load.terms.is_empty() && window[tau - 1] >= 0.0 {
                    continue;
                }
                rows.push(Constraint::new(
                    format!("capacity[{},{}]", lab.id, tau),
                    load,
                    Sense::LessEq,
                    window[tau - 1],
                ));
            }

            let mut definition = LinExpr::with_capacity(n_tc + 1).term(vars.backlog(j), 1.0);
            for (i, tc) in instance.test_centers.iter().enumerate() {
                definition.add_term(vars.y(i, j, beyond), -tc.demand_at(period));
            }
            rows.push(Constraint::new(
                format!("backlog[{}]", lab.id),
                definition,
                Sense::Equal,
                carried[j],
            ));

            rows.push(Constraint::new(
                format!("overload[{}]", lab.id),
                LinExpr::new()
                    .term(vars.backlog(j), 1.0)
                    .term(vars.u_max(), -next_capacity[j]),
                Sense::LessEq,
                0.0,
            ));
            rows
        })
        .collect();

    model.extend_constraints(source_rows.into_iter().flatten());
    model.extend_constraints(lab_rows.into_iter().flatten());

    let mut objective = LinExpr::with_capacity(n_tc * (n_lab + 1) + 1);
    for (i, tc) in instance.test_centers.iter().enumerate() {
        let d = tc.demand_at(period);
        for j in 0..n_lab {
            objective.add_term(vars.y(i, j, beyond), d);
        }
        objective.add_term(vars.s(i), config.reassignment_weight * d);
    }
    objective.add_term(vars.u_max(), config.backlog_weight);
    model.minimize(objective);

    log_checks!(
        config.verbosity,
        "Period {}: {} variables, {} constraints",
        period,
        model.num_variables(),
        model.num_constraints()
    );

    Snapshot {
        period,
        model,
        vars,
        flags,
        tau_max,
        reassignment_weight: config.reassignment_weight,
        backlog_weight: config.backlog_weight,
        windows: (0..n_lab).map(|j| state.window(j).to_vec()).collect(),
        carried,
        next_capacity,
    }
}

impl Snapshot {
    /// Turn an optimizer solution into a ledger entry.
    ///
    /// Binaries are rounded at 0.5. Backlog, `U_max` and the objective terms
    /// are recomputed from the rounded routing, so `U_max` is always the tight
    /// maximum. The rounded point must satisfy every model constraint.
    pub fn extract(
        &self,
        instance: &Instance,
        solution: &MilpSolution,
    ) -> Result<LedgerEntry, OptimizerError> {
        let tau_max = self.tau_max;
        let buckets = tau_max + 1;
        let n_lab = instance.laboratories.len();
        let period = self.period;

        let mut routings = Vec::with_capacity(instance.test_centers.len());
        for (i, tc) in instance.test_centers.iter().enumerate() {
            let mut selected = None;
            for j in 0..n_lab {
                for b in 1..=buckets {
                    if solution.value(self.vars.y(i, j, b)) > 0.5 {
                        if selected.is_some() {
                            return Err(OptimizerError::InvalidSolution(format!(
                                "test center {} routed more than once in period {}",
                                tc.id, period
                            )));
                        }
                        selected = Some(Routing {
                            laboratory: j,
                            lag: Lag::from_bucket(b, tau_max),
                        });
                    }
                }
            }
            let routing = selected.ok_or_else(|| {
                OptimizerError::InvalidSolution(format!(
                    "test center {} not routed in period {}",
                    tc.id, period
                ))
            })?;
            routings.push(routing);
        }

        let reassigned: Vec<bool> = (0..instance.test_centers.len())
            .map(|i| solution.value(self.vars.s(i)) > 0.5)
            .collect();

        let mut backlog = self.carried.clone();
        let mut unused_capacity = self.windows.clone();
        let mut delay = 0.0;
        let mut reassignment = 0.0;
        for ((routing, tc), s) in routings.iter().zip(&instance.test_centers).zip(&reassigned) {
            let d = tc.demand_at(period);
            match routing.lag {
                Lag::Within(tau) => unused_capacity[routing.laboratory][tau - 1] -= d,
                Lag::BeyondWindow => {
                    backlog[routing.laboratory] += d;
                    delay += d;
                }
            }
            if *s {
                reassignment += d;
            }
        }
        reassignment *= self.reassignment_weight;

        let u_max = backlog
            .iter()
            .zip(&self.next_capacity)
            .map(|(l, cap)| l / cap)
            .fold(0.0, f64::max);

        let mut values = vec![0.0; self.model.num_variables()];
        for (i, routing) in routings.iter().enumerate() {
            values[self.vars.y(i, routing.laboratory, routing.lag.bucket(tau_max)).index()] = 1.0;
            values[self.vars.s(i).index()] = f64::from(u8::from(reassigned[i]));
        }
        for (j, l) in backlog.iter().enumerate() {
            values[self.vars.backlog(j).index()] = *l;
        }
        values[self.vars.u_max().index()] = u_max;

        let violated = self.model.violated_constraints(&values, FEASIBILITY_TOLERANCE);
        if !violated.is_empty() {
            return Err(OptimizerError::InvalidSolution(format!(
                "rounded solution of period {} violates {}",
                period,
                violated.join(", ")
            )));
        }

        let backlog_term = self.backlog_weight * u_max;
        Ok(LedgerEntry {
            period,
            objective: ObjectiveBreakdown {
                total: delay + reassignment + backlog_term,
                delay,
                reassignment,
                backlog: backlog_term,
            },
            solve_time: solution.elapsed,
            routings,
            backlog,
            reassigned,
            u_max,
            source_critical: self.flags.sources.clone(),
            laboratory_critical: self.flags.laboratories.clone(),
            unused_capacity,
        })
    }
}
