//! Solver-agnostic description of a mixed-integer linear model.
//!
//! The snapshot builder produces one of these per period; an
//! [`Optimizer`](crate::optimizer::Optimizer) turns it into a solution.

/// Handle to a variable inside one [`MilpModel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) usize);

impl VarId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Domain of a variable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VarDomain {
    Binary,
    /// Continuous with bounds; `f64::INFINITY` means unbounded above.
    Continuous { lower: f64, upper: f64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: String,
    pub domain: VarDomain,
}

/// Linear expression `Σ coef·var + constant`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            terms: Vec::with_capacity(capacity),
            constant: 0.0,
        }
    }

    /// Add `coef·var`. Zero coefficients are dropped.
    pub fn add_term(&mut self, var: VarId, coef: f64) -> &mut Self {
        if coef != 0.0 {
            self.terms.push((var, coef));
        }
        self
    }

    pub fn term(mut self, var: VarId, coef: f64) -> Self {
        self.add_term(var, coef);
        self
    }

    /// Evaluate against a full assignment indexed by [`VarId`].
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.constant
            + self
                .terms
                .iter()
                .map(|(var, coef)| coef * values[var.0])
                .sum::<f64>()
    }
}

/// Relation between a constraint's left-hand side and its right-hand side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sense {
    LessEq,
    Equal,
    GreaterEq,
}

/// Named linear constraint `lhs (sense) rhs`.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub lhs: LinExpr,
    pub sense: Sense,
    pub rhs: f64,
}

impl Constraint {
    pub fn new(name: impl Into<String>, lhs: LinExpr, sense: Sense, rhs: f64) -> Self {
        Self {
            name: name.into(),
            lhs,
            sense,
            rhs,
        }
    }

    /// Whether `values` satisfies the constraint within `tolerance`.
    pub fn is_satisfied(&self, values: &[f64], tolerance: f64) -> bool {
        let lhs = self.lhs.evaluate(values);
        match self.sense {
            Sense::LessEq => lhs <= self.rhs + tolerance,
            Sense::Equal => (lhs - self.rhs).abs() <= tolerance,
            Sense::GreaterEq => lhs >= self.rhs - tolerance,
        }
    }
}

/// A minimisation model: variables, constraints, linear objective.
#[derive(Clone, Debug, Default)]
pub struct MilpModel {
    pub name: String,
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
    objective: LinExpr,
}

impl MilpModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_binary(&mut self, name: impl Into<String>) -> VarId {
        self.add_variable(name, VarDomain::Binary)
    }

    pub fn add_continuous(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> VarId {
        self.add_variable(name, VarDomain::Continuous { lower, upper })
    }

    fn add_variable(&mut self, name: impl Into<String>, domain: VarDomain) -> VarId {
        let id = VarId(self.variables.len());
        self.variables.push(Variable {
            name: name.into(),
            domain,
        });
        id
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn extend_constraints<I: IntoIterator<Item = Constraint>>(&mut self, constraints: I) {
        self.constraints.extend(constraints);
    }

    pub fn minimize(&mut self, objective: LinExpr) {
        self.objective = objective;
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &LinExpr {
        &self.objective
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Copy of this model keeping only the constraints at `keep` (same variables).
    pub fn with_constraints(&self, keep: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            variables: self.variables.clone(),
            constraints: keep.iter().map(|&k| self.constraints[k].clone()).collect(),
            objective: self.objective.clone(),
        }
    }

    /// Names of constraints violated by `values`, beyond `tolerance`.
    pub fn violated_constraints(&self, values: &[f64], tolerance: f64) -> Vec<&str> {
        self.constraints
            .iter()
            .filter(|c| !c.is_satisfied(values, tolerance))
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_drops_zero_terms() {
        let mut model = MilpModel::new("m");
        let x = model.add_binary("x");
        let y = model.add_binary("y");
        let expr = LinExpr::new().term(x, 2.0).term(y, 0.0);
        assert_eq!(expr.terms, vec![(x, 2.0)]);
    }

    #[test]
    fn test_constraint_satisfaction() {
        let mut model = MilpModel::new("m");
        let x = model.add_continuous("x", 0.0, f64::INFINITY);
        let c = Constraint::new("cap", LinExpr::new().term(x, 3.0), Sense::LessEq, 6.0);
        assert!(c.is_satisfied(&[2.0], 1e-9));
        assert!(!c.is_satisfied(&[2.5], 1e-9));

        let eq = Constraint::new("fix", LinExpr::new().term(x, 1.0), Sense::Equal, 2.0);
        assert!(eq.is_satisfied(&[2.0 + 1e-10], 1e-9));
    }

    #[test]
    fn test_with_constraints_keeps_variables() {
        let mut model = MilpModel::new("m");
        let x = model.add_binary("x");
        let lhs = LinExpr::new().term(x, 1.0);
        model.add_constraint(Constraint::new("a", lhs.clone(), Sense::LessEq, 1.0));
        model.add_constraint(Constraint::new("b", lhs, Sense::GreaterEq, 1.0));

        let sub = model.with_constraints(&[1]);
        assert_eq!(sub.num_variables(), 1);
        assert_eq!(sub.num_constraints(), 1);
        assert_eq!(sub.constraints()[0].name, "b");
        assert_eq!(model.violated_constraints(&[0.0], 1e-9), vec!["b"]);
    }
}
