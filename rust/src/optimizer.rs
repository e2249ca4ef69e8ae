//! Optimizer collaborator: the seam between model construction and solving.

use std::time::{Duration, Instant};

use good_lp::{
    constraint, default_solver, variable, Expression, ProblemVariables, ResolutionError,
    Solution, SolverModel, Variable as LpVariable,
};
use thiserror::Error;

use crate::log_debug;
use crate::milp::{LinExpr, MilpModel, Sense, VarDomain, VarId};

/// Failures of the optimizer other than a definitive infeasibility.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("Model {0} is unbounded")]
    Unbounded(String),
    #[error("Solver backend failed: {0}")]
    Backend(String),
    #[error("Solver returned an invalid solution: {0}")]
    InvalidSolution(String),
}

/// Options handed to the optimizer with every model.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveOptions {
    /// Relative optimality gap tolerance
    pub mip_gap: f64,
    pub verbosity: u8,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            mip_gap: 0.01,
            verbosity: 0,
        }
    }
}

/// Values for every variable of a solved model.
#[derive(Clone, Debug, PartialEq)]
pub struct MilpSolution {
    /// Indexed by [`VarId`]
    pub values: Vec<f64>,
    pub objective: f64,
    /// Wall-clock solve time
    pub elapsed: Duration,
}

impl MilpSolution {
    #[inline]
    pub fn value(&self, var: VarId) -> f64 {
        self.values[var.index()]
    }
}

/// Outcome of a solve that reached a definitive answer.
#[derive(Clone, Debug, PartialEq)]
pub enum SolveStatus {
    Optimal(MilpSolution),
    Infeasible,
}

/// A generic MILP solver.
pub trait Optimizer {
    /// Solve `model` to optimality (or within `options.mip_gap`).
    fn solve(&self, model: &MilpModel, options: &SolveOptions)
        -> Result<SolveStatus, OptimizerError>;

    /// Names of a minimal set of constraints that is infeasible on its own.
    ///
    /// Returns `None` when the model is feasible.
    fn refine_conflict(
        &self,
        model: &MilpModel,
        options: &SolveOptions,
    ) -> Result<Option<Vec<String>>, OptimizerError> {
        deletion_filter(self, model, options)
    }
}

/// Deletion filter over constraints: drop each constraint in turn and keep
/// it out whenever the remainder stays infeasible. What is left is an
/// irreducible infeasible subset with respect to the model's constraints
/// (variable domains are always kept).
pub fn deletion_filter<O: Optimizer + ?Sized>(
    optimizer: &O,
    model: &MilpModel,
    options: &SolveOptions,
) -> Result<Option<Vec<String>>, OptimizerError> {
    let mut keep: Vec<usize> = (0..model.num_constraints()).collect();
    if is_feasible(optimizer, model, &keep, options)? {
        return Ok(None);
    }

    let mut k = 0;
    while k < keep.len() {
        let mut trial = keep.clone();
        trial.remove(k);
        if is_feasible(optimizer, model, &trial, options)? {
            k += 1;
        } else {
            keep = trial;
        }
    }

    log_debug!(
        options.verbosity,
        "Conflict for {}: {} of {} constraints",
        model.name,
        keep.len(),
        model.num_constraints()
    );

    Ok(Some(
        keep.iter()
            .map(|&k| model.constraints()[k].name.clone())
            .collect(),
    ))
}

fn is_feasible<O: Optimizer + ?Sized>(
    optimizer: &O,
    model: &MilpModel,
    keep: &[usize],
    options: &SolveOptions,
) -> Result<bool, OptimizerError> {
    let mut sub = model.with_constraints(keep);
    sub.minimize(LinExpr::new());
    match optimizer.solve(&sub, options) {
        Ok(SolveStatus::Optimal(_)) => Ok(true),
        Ok(SolveStatus::Infeasible) => Ok(false),
        Err(OptimizerError::Unbounded(_)) => Ok(true),
        Err(e) => Err(e),
    }
}

/// [`Optimizer`] backed by `good_lp`; with the crate's feature set its
/// default solver is the pure-Rust `microlp`.
///
/// `microlp` solves to proven optimality, so the gap tolerance is always met.
#[derive(Clone, Copy, Debug, Default)]
pub struct GoodLpOptimizer;

impl GoodLpOptimizer {
    pub fn new() -> Self {
        Self
    }
}

fn to_expression(expr: &LinExpr, handles: &[LpVariable]) -> Expression {
    let mut out = Expression::from(expr.constant);
    for (var, coef) in &expr.terms {
        out += *coef * handles[var.index()];
    }
    out
}

impl Optimizer for GoodLpOptimizer {
    fn solve(
        &self,
        model: &MilpModel,
        options: &SolveOptions,
    ) -> Result<SolveStatus, OptimizerError> {
        let start = Instant::now();

        let mut vars = ProblemVariables::new();
        let handles: Vec<LpVariable> = model
            .variables()
            .iter()
            .map(|v| match v.domain {
                VarDomain::Binary => vars.add(variable().binary()),
                VarDomain::Continuous { lower, upper } => {
                    let mut def = variable().min(lower);
                    if upper.is_finite() {
                        def = def.max(upper);
                    }
                    vars.add(def)
                }
            })
            .collect();

        let objective = to_expression(model.objective(), &handles);
        let mut problem = vars.minimise(objective).using(default_solver);
        for c in model.constraints() {
            let lhs = to_expression(&c.lhs, &handles);
            let rhs = c.rhs;
            let lp = match c.sense {
                Sense::LessEq => constraint!(lhs <= rhs),
                Sense::Equal => constraint!(lhs == rhs),
                Sense::GreaterEq => constraint!(lhs >= rhs),
            };
            problem = problem.with(lp);
        }

        log_debug!(
            options.verbosity,
            "Solving {}: {} variables, {} constraints",
            model.name,
            model.num_variables(),
            model.num_constraints()
        );

        match problem.solve() {
            Ok(solution) => {
                let values: Vec<f64> = handles.iter().map(|h| solution.value(*h)).collect();
                let objective = model.objective().evaluate(&values);
                Ok(SolveStatus::Optimal(MilpSolution {
                    values,
                    objective,
                    elapsed: start.elapsed(),
                }))
            }
            Err(ResolutionError::Infeasible) => Ok(SolveStatus::Infeasible),
            Err(ResolutionError::Unbounded) => Err(OptimizerError::Unbounded(model.name.clone())),
            Err(e) => Err(OptimizerError::Backend(e.to_string())),
        }
    }
}
