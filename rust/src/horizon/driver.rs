//! The rolling horizon loop: one snapshot per period, solved in order.

use std::sync::Arc;

use thiserror::Error;

use crate::config::{ConfigError, RunConfig};
use crate::criticality::{
    Criticality, CriticalityContext, CriticalityFlags, ResourcePolicy, SourcePolicy,
};
use crate::models::{Instance, InstanceError};
use crate::optimizer::{GoodLpOptimizer, Optimizer, OptimizerError, SolveOptions, SolveStatus};
use crate::signal::IndicatorSource;
use crate::{log_changes, log_checks, log_debug};

use super::capacity::CapacityState;
use super::ledger::{Ledger, LedgerEntry, LedgerError};
use super::snapshot::build_snapshot;

/// Errors that end a run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid instance: {0}")]
    Instance(#[from] InstanceError),
    #[error("Snapshot for period {period} is infeasible ({completed} periods completed)")]
    ModelInfeasible {
        period: usize,
        completed: usize,
        /// Minimal conflicting constraint names, when the refiner produced them
        conflict: Option<Vec<String>>,
    },
    #[error("Optimizer failed in period {period}: {source}")]
    Optimizer {
        period: usize,
        #[source]
        source: OptimizerError,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Run has already failed")]
    Halted,
}

/// Where the driver is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Init,
    Running,
    /// The given period was solved and recorded
    Solved(usize),
    Failed,
    Completed,
}

/// Rolling horizon driver over one instance.
///
/// Owns the capacity state and the ledger; both only change in [`step`](Self::step).
pub struct OnlineProcedure<'a, O: Optimizer> {
    instance: &'a Instance,
    config: RunConfig,
    optimizer: O,
    source_policy: SourcePolicy,
    resource_policy: ResourcePolicy,
    capacity: CapacityState,
    ledger: Ledger,
    state: RunState,
}

impl<'a, O: Optimizer> OnlineProcedure<'a, O> {
    /// Validate inputs and install the criticality policies.
    pub fn new(
        instance: &'a Instance,
        config: RunConfig,
        optimizer: O,
        indicator: Option<Arc<dyn IndicatorSource>>,
    ) -> Result<Self, RunError> {
        config.validate()?;
        instance.validate(config.tau_max)?;
        let source_policy = SourcePolicy::from_config(&config, indicator)?;
        let resource_policy = ResourcePolicy::from_config(&config);

        log_changes!(
            config.verbosity,
            "Run {}: {} test centers, {} laboratories, {} periods, tau_max={}, criticality {}/{}",
            instance.name,
            instance.test_centers.len(),
            instance.laboratories.len(),
            instance.pandemic_duration,
            config.tau_max,
            source_policy.name(),
            resource_policy.name()
        );

        Ok(Self {
            instance,
            capacity: CapacityState::initial(instance, config.tau_max),
            ledger: Ledger::new(instance, config.tau_max),
            config,
            optimizer,
            source_policy,
            resource_policy,
            state: RunState::Init,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn capacity(&self) -> &CapacityState {
        &self.capacity
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    /// Solve the next period.
    ///
    /// Returns the new ledger entry, or `None` once every period is solved.
    /// After any error the driver is `Failed` and every later call returns
    /// [`RunError::Halted`].
    pub fn step(&mut self) -> Result<Option<&LedgerEntry>, RunError> {
        match self.state {
            RunState::Failed => return Err(RunError::Halted),
            RunState::Completed => return Ok(None),
            RunState::Init => self.state = RunState::Running,
            RunState::Running | RunState::Solved(_) => {}
        }

        let period = self.ledger.len();
        if period >= self.instance.pandemic_duration {
            self.state = RunState::Completed;
            return Ok(None);
        }

        match self.solve_period(period) {
            Ok(entry) => {
                if let Err(e) = self.ledger.append(entry) {
                    self.state = RunState::Failed;
                    return Err(e.into());
                }
                self.state = RunState::Solved(period);
                if self.ledger.len() == self.instance.pandemic_duration {
                    self.state = RunState::Completed;
                    log_changes!(
                        self.config.verbosity,
                        "Run {} completed after {} periods",
                        self.instance.name,
                        self.ledger.len()
                    );
                }
                Ok(self.ledger.last())
            }
            Err(e) => {
                self.state = RunState::Failed;
                Err(e)
            }
        }
    }

    /// Solve every remaining period.
    pub fn run(&mut self) -> Result<&Ledger, RunError> {
        while self.step()?.is_some() {}
        Ok(&self.ledger)
    }

    fn solve_period(&mut self, period: usize) -> Result<LedgerEntry, RunError> {
        let verbosity = self.config.verbosity;

        self.capacity.advance(self.instance, period, self.ledger.last());
        log_debug!(
            verbosity,
            "Period {}: windows {:?}",
            period,
            self.capacity.labs().iter().map(|l| l.window()).collect::<Vec<_>>()
        );

        let ctx = CriticalityContext {
            instance: self.instance,
            capacity: &self.capacity,
            ledger: &self.ledger,
            period,
        };
        let flags = CriticalityFlags::evaluate(&self.source_policy, &self.resource_policy, &ctx);
        log_checks!(
            verbosity,
            "Period {}: {} critical test centers, {} critical laboratories",
            period,
            flags.sources.iter().filter(|c| **c).count(),
            flags.laboratories.iter().filter(|c| **c).count()
        );

        let snapshot = build_snapshot(self.instance, &self.config, &self.capacity, flags, period);
        let options = SolveOptions {
            mip_gap: self.config.mip_gap,
            verbosity,
        };

        let solution = match self.optimizer.solve(&snapshot.model, &options) {
            Ok(SolveStatus::Optimal(solution)) => solution,
            Ok(SolveStatus::Infeasible) => {
                let conflict = match self.optimizer.refine_conflict(&snapshot.model, &options) {
                    Ok(conflict) => conflict,
                    Err(e) => {
                        tracing::warn!(period, error = %e, "Conflict refinement failed");
                        None
                    }
                };
                tracing::error!(
                    period,
                    conflict = ?conflict,
                    "Snapshot infeasible, halting run"
                );
                return Err(RunError::ModelInfeasible {
                    period,
                    completed: self.ledger.len(),
                    conflict,
                });
            }
            Err(source) => return Err(RunError::Optimizer { period, source }),
        };

        let entry = snapshot
            .extract(self.instance, &solution)
            .map_err(|source| RunError::Optimizer { period, source })?;

        log_changes!(
            verbosity,
            "Period {}: objective {:.3} (delay {:.1}, reassignment {:.3}, backlog {:.3}), \
             U_max {:.3}, {:.2?}",
            period,
            entry.objective.total,
            entry.objective.delay,
            entry.objective.reassignment,
            entry.objective.backlog,
            entry.u_max,
            entry.solve_time
        );
        Ok(entry)
    }
}

/// Run every period of `instance` with the bundled `good_lp` optimizer.
pub fn run_online_procedure(
    instance: &Instance,
    config: RunConfig,
    indicator: Option<Arc<dyn IndicatorSource>>,
) -> Result<Ledger, RunError> {
    let mut procedure = OnlineProcedure::new(instance, config, GoodLpOptimizer::new(), indicator)?;
    procedure.run()?;
    Ok(procedure.into_ledger())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceStrategy, SourceStrategy};
    use crate::horizon::{build_snapshot, Lag, Routing};
    use crate::instance::{InstanceBuilder, RawLaboratory, RawTestCenter};
    use crate::milp::MilpModel;
    use crate::models::{Laboratory, TestCenter};
    use crate::optimizer::MilpSolution;
    use chrono::NaiveDate;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const TOL: f64 = 1e-6;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 11, 2).unwrap()
    }

    fn center(
        id: &str,
        demand: Vec<f64>,
        incidence: Vec<f64>,
        distance: Vec<f64>,
        default: usize,
    ) -> TestCenter {
        TestCenter {
            id: id.to_string(),
            demand,
            incidence,
            distance,
            default_laboratory: default,
        }
    }

    fn lab(id: &str, capacity: Vec<f64>) -> Laboratory {
        Laboratory {
            id: id.to_string(),
            nominal_capacity: capacity[0],
            capacity,
        }
    }

    fn single_pair(demand: f64, capacity: f64, duration: usize, tau_max: usize) -> Instance {
        Instance {
            name: "pair".to_string(),
            start_date: start(),
            pandemic_duration: duration,
            test_centers: vec![center(
                "tc",
                vec![demand; duration],
                vec![0.0; duration],
                vec![10.0],
                0,
            )],
            laboratories: vec![lab("lab", vec![capacity; duration + tau_max + 1])],
        }
    }

    fn config(tau_max: usize) -> RunConfig {
        RunConfig {
            tau_max,
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_ample_capacity_routes_at_lag_one() {
        let inst = single_pair(10.0, 100.0, 3, 1);
        let ledger = run_online_procedure(&inst, config(1), None).unwrap();

        assert_eq!(ledger.len(), 3);
        for (t, entry) in ledger.entries().iter().enumerate() {
            assert_eq!(ledger.y(t, 0, 0, 1), 1.0);
            assert_eq!(entry.backlog, vec![0.0]);
            assert_eq!(entry.u_max, 0.0);
            assert!(entry.objective.total.abs() < TOL);
            assert_eq!(entry.reassigned, vec![false]);
        }
    }

    #[test]
    fn test_shortfall_goes_beyond_window() {
        let inst = single_pair(10.0, 5.0, 1, 1);
        let mut procedure =
            OnlineProcedure::new(&inst, config(1), GoodLpOptimizer::new(), None).unwrap();
        procedure.run().unwrap();

        assert_eq!(procedure.state(), RunState::Completed);
        let entry = &procedure.ledger().entries()[0];
        assert_eq!(
            entry.routings,
            vec![Routing {
                laboratory: 0,
                lag: Lag::BeyondWindow
            }]
        );
        assert_eq!(entry.backlog, vec![10.0]);
        assert_eq!(entry.unused_capacity, vec![vec![5.0]]);
    }

    #[test]
    fn test_backlog_carries_over_and_u_max_rises() {
        let inst = single_pair(10.0, 5.0, 3, 1);
        let cfg = RunConfig {
            backlog_weight: 2.0,
            ..config(1)
        };
        let ledger = run_online_procedure(&inst, cfg, None).unwrap();

        let backlog: Vec<f64> = ledger.entries().iter().map(|e| e.backlog[0]).collect();
        let u_max: Vec<f64> = ledger.entries().iter().map(|e| e.u_max).collect();
        assert_eq!(backlog, vec![10.0, 15.0, 20.0]);
        assert_eq!(u_max, vec![2.0, 3.0, 4.0]);

        let last = ledger.last().unwrap();
        assert_eq!(last.objective.delay, 10.0);
        assert_eq!(last.objective.backlog, 8.0);
        assert!((last.objective.total - 18.0).abs() < TOL);
    }

    fn two_sources() -> Instance {
        Instance {
            name: "critical".to_string(),
            start_date: start(),
            pandemic_duration: 1,
            test_centers: vec![
                center("A", vec![10.0], vec![200.0], vec![10.0, 200.0], 0),
                center("B", vec![10.0], vec![0.0], vec![10.0, 200.0], 0),
            ],
            laboratories: vec![lab("R1", vec![10.0; 3]), lab("R2", vec![100.0; 3])],
        }
    }

    fn incidence_config() -> RunConfig {
        RunConfig {
            tau_max: 1,
            max_distance: 150.0,
            distance_relaxation: 150.0,
            source_strategy: SourceStrategy::Incidences,
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_only_critical_source_reaches_far_laboratory() {
        let inst = two_sources();
        let ledger = run_online_procedure(&inst, incidence_config(), None).unwrap();
        let entry = ledger.last().unwrap();

        assert_eq!(entry.source_critical, vec![true, false]);
        assert_eq!(entry.routings[0], Routing { laboratory: 1, lag: Lag::Within(1) });
        assert_eq!(entry.routings[1], Routing { laboratory: 0, lag: Lag::Within(1) });
        assert!(entry.objective.total.abs() < TOL);
    }

    #[test]
    fn test_distance_gate_rejects_non_critical_source() {
        let inst = two_sources();
        let cfg = incidence_config();
        let mut state = CapacityState::initial(&inst, 1);
        state.advance(&inst, 0, None);
        let flags = CriticalityFlags {
            sources: vec![true, false],
            laboratories: vec![false, false],
        };
        let snap = build_snapshot(&inst, &cfg, &state, flags, 0);

        // B on R2 with the reassignment flag set still breaks the distance cap
        let mut values = vec![0.0; snap.model.num_variables()];
        values[snap.vars.y(0, 0, 1).index()] = 1.0;
        values[snap.vars.y(1, 1, 1).index()] = 1.0;
        values[snap.vars.s(1).index()] = 1.0;
        let violated = snap.model.violated_constraints(&values, TOL);
        assert_eq!(violated, vec!["distance[B,R2]"]);
    }

    fn halting_instance() -> Instance {
        Instance {
            name: "halt".to_string(),
            start_date: start(),
            pandemic_duration: 3,
            test_centers: vec![center("a", vec![5.0; 3], vec![200.0, 0.0, 0.0], vec![200.0], 0)],
            laboratories: vec![lab("l1", vec![50.0; 5])],
        }
    }

    #[test]
    fn test_infeasible_period_halts_run() {
        let inst = halting_instance();
        let mut procedure =
            OnlineProcedure::new(&inst, incidence_config(), GoodLpOptimizer::new(), None).unwrap();

        let err = procedure.run().unwrap_err();
        match err {
            RunError::ModelInfeasible {
                period,
                completed,
                conflict,
            } => {
                assert_eq!(period, 1);
                assert_eq!(completed, 1);
                assert_eq!(
                    conflict,
                    Some(vec!["assign[a]".to_string(), "distance[a,l1]".to_string()])
                );
            }
            other => panic!("expected infeasibility, got {:?}", other),
        }
        assert_eq!(procedure.state(), RunState::Failed);
        assert_eq!(procedure.ledger().len(), 1);
        assert!(matches!(procedure.step(), Err(RunError::Halted)));
    }

    /// Reports every model infeasible with a fixed conflict.
    struct AlwaysInfeasible;

    impl Optimizer for AlwaysInfeasible {
        fn solve(&self, _: &MilpModel, _: &SolveOptions) -> Result<SolveStatus, OptimizerError> {
            Ok(SolveStatus::Infeasible)
        }

        fn refine_conflict(
            &self,
            _: &MilpModel,
            _: &SolveOptions,
        ) -> Result<Option<Vec<String>>, OptimizerError> {
            Err(OptimizerError::Backend("no conflict support".to_string()))
        }
    }

    /// Returns an all-zero assignment.
    struct Garbage;

    impl Optimizer for Garbage {
        fn solve(
            &self,
            model: &MilpModel,
            _: &SolveOptions,
        ) -> Result<SolveStatus, OptimizerError> {
            Ok(SolveStatus::Optimal(MilpSolution {
                values: vec![0.0; model.num_variables()],
                objective: 0.0,
                elapsed: std::time::Duration::ZERO,
            }))
        }
    }

    #[test]
    fn test_failed_refinement_still_halts() {
        let inst = single_pair(10.0, 100.0, 2, 1);
        let mut procedure = OnlineProcedure::new(&inst, config(1), AlwaysInfeasible, None).unwrap();
        assert!(matches!(
            procedure.step(),
            Err(RunError::ModelInfeasible {
                period: 0,
                completed: 0,
                conflict: None
            })
        ));
        assert!(procedure.ledger().is_empty());
    }

    #[test]
    fn test_invalid_solution_is_an_optimizer_error() {
        let inst = single_pair(10.0, 100.0, 2, 1);
        let mut procedure = OnlineProcedure::new(&inst, config(1), Garbage, None).unwrap();
        assert!(matches!(
            procedure.run(),
            Err(RunError::Optimizer {
                period: 0,
                source: OptimizerError::InvalidSolution(_)
            })
        ));
        assert_eq!(procedure.state(), RunState::Failed);
    }

    #[test]
    fn test_configuration_errors_are_fatal_before_any_period() {
        let inst = single_pair(10.0, 100.0, 2, 1);
        let bad = RunConfig {
            tau_max: 0,
            ..RunConfig::default()
        };
        assert!(matches!(
            OnlineProcedure::new(&inst, bad, GoodLpOptimizer::new(), None),
            Err(RunError::Config(ConfigError::InvalidLookahead(0)))
        ));

        let needs_indicator = RunConfig {
            source_strategy: SourceStrategy::R7Values,
            ..config(1)
        };
        assert!(matches!(
            OnlineProcedure::new(&inst, needs_indicator, GoodLpOptimizer::new(), None),
            Err(RunError::Config(ConfigError::MissingIndicator(_)))
        ));

        // capacity series too short for tau_max = 3
        assert!(matches!(
            OnlineProcedure::new(&inst, config(3), GoodLpOptimizer::new(), None),
            Err(RunError::Instance(InstanceError::ShortCapacity { .. }))
        ));
    }

    #[test]
    fn test_step_walks_through_states() {
        let inst = single_pair(10.0, 100.0, 2, 1);
        let mut procedure =
            OnlineProcedure::new(&inst, config(1), GoodLpOptimizer::new(), None).unwrap();
        assert_eq!(procedure.state(), RunState::Init);
        assert_eq!(procedure.capacity().period(), None);

        assert_eq!(procedure.step().unwrap().map(|e| e.period), Some(0));
        assert_eq!(procedure.state(), RunState::Solved(0));
        assert_eq!(procedure.capacity().period(), Some(0));

        assert_eq!(procedure.step().unwrap().map(|e| e.period), Some(1));
        assert_eq!(procedure.state(), RunState::Completed);
        assert!(procedure.step().unwrap().is_none());
    }

    fn random_instance(seed: u64, tau_max: usize) -> Instance {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let duration = 4;
        let labs = 3;
        let mut builder = InstanceBuilder::new(format!("random{seed}"), start(), duration);
        for j in 0..labs {
            builder = builder.laboratory(RawLaboratory {
                id: format!("lab{j}"),
                capacity: (0..duration).map(|_| rng.random_range(40.0..80.0)).collect(),
                nominal_capacity: 60.0,
            });
        }
        for i in 0..6 {
            builder = builder.test_center(RawTestCenter {
                id: format!("tc{i}"),
                demand: (0..duration).map(|_| rng.random_range(0..30) as f64).collect(),
                incidence: (0..duration).map(|_| rng.random_range(0.0..300.0)).collect(),
                distance: (0..labs).map(|_| rng.random_range(5..140) as f64).collect(),
            });
        }
        builder.build(&mut rng, tau_max).unwrap()
    }

    #[test]
    fn test_run_properties_hold_every_period() {
        for (seed, tau_max) in [(1, 1), (2, 2), (3, 3)] {
            let inst = random_instance(seed, tau_max);
            let cfg = RunConfig {
                tau_max,
                source_strategy: SourceStrategy::Workload,
                resource_strategy: ResourceStrategy::Incidences,
                ..RunConfig::default()
            };
            let mut procedure =
                OnlineProcedure::new(&inst, cfg, GoodLpOptimizer::new(), None).unwrap();
            while procedure.step().unwrap().is_some() {
                assert!(procedure
                    .capacity()
                    .labs()
                    .iter()
                    .all(|l| l.window().len() == tau_max));
            }

            let ledger = procedure.ledger();
            assert_eq!(ledger.len(), inst.pandemic_duration);
            for entry in ledger.entries() {
                let t = entry.period;
                for i in 0..inst.test_centers.len() {
                    let selected: f64 = (0..inst.laboratories.len())
                        .flat_map(|j| (1..=tau_max + 1).map(move |b| (j, b)))
                        .map(|(j, b)| ledger.y(t, i, j, b))
                        .sum();
                    assert_eq!(selected, 1.0);
                }
                for row in &entry.unused_capacity {
                    assert_eq!(row.len(), tau_max);
                    assert!(row.iter().all(|c| *c >= -TOL));
                }
                let tight = inst
                    .laboratories
                    .iter()
                    .zip(&entry.backlog)
                    .map(|(lab, l)| l / lab.capacity[t + tau_max + 1])
                    .fold(0.0, f64::max);
                assert_eq!(entry.u_max, tight);
                assert!(t > 0 || entry.laboratory_critical.iter().all(|c| !c));
            }
        }
    }
}
