//! Solver abstraction and the bundled `microlp` backend via `good_lp`.

use std::time::{Duration, Instant};

use good_lp::{
    Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable, constraint,
    default_solver, variable,
};
use tracing::debug;

use crate::error::SolveError;
use crate::model::{Comparison, LinearExpr, OptimizationModel};

/// Backend knobs. The bundled pure-Rust backend applies them best-effort
/// (it has no time limit or thread controls); the controller enforces the
/// hard deadline itself.
#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    pub time_limit_secs: f64,
    pub gap_tolerance: f64,
    pub threads: u32,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            time_limit_secs: 20.0,
            gap_tolerance: 0.01,
            threads: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    /// Incumbent found but optimality not proven within the limits.
    Feasible,
    Infeasible,
    /// Limits hit before any incumbent existed.
    TimeoutNoIncumbent,
}

/// Result of one solve. `values` is indexed by variable id and empty when
/// the status carries no incumbent.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    pub values: Vec<f64>,
    pub objective: f64,
    pub gap: f64,
    pub wall_time: Duration,
}

impl SolveOutcome {
    pub fn has_incumbent(&self) -> bool {
        matches!(self.status, SolveStatus::Optimal | SolveStatus::Feasible)
    }

    fn without_incumbent(status: SolveStatus, wall_time: Duration) -> Self {
        Self {
            status,
            values: Vec::new(),
            objective: 0.0,
            gap: 0.0,
            wall_time,
        }
    }
}

pub trait Solver: Send + Sync {
    fn solve(
        &self,
        model: &OptimizationModel,
        options: &SolverOptions,
    ) -> Result<SolveOutcome, SolveError>;
}

/// Pure-Rust simplex backend. Deterministic, no native dependencies.
#[derive(Debug, Default, Clone, Copy)]
pub struct MicrolpSolver;

impl MicrolpSolver {
    pub fn new() -> Self {
        Self
    }
}

fn to_expression(expr: &LinearExpr, vars: &[Variable]) -> Expression {
    let mut e: Expression = expr
        .terms
        .iter()
        .map(|(id, coeff)| *coeff * vars[id.index()])
        .sum();
    e += expr.constant;
    e
}

impl Solver for MicrolpSolver {
    fn solve(
        &self,
        model: &OptimizationModel,
        _options: &SolverOptions,
    ) -> Result<SolveOutcome, SolveError> {
        if model.num_variables() == 0 {
            return Err(SolveError::NotBuilt);
        }
        let start = Instant::now();

        let mut problem_vars = ProblemVariables::new();
        let mut vars: Vec<Variable> = Vec::with_capacity(model.num_variables());
        for def in model.variables() {
            let mut v = variable();
            if def.lower.is_finite() {
                v = v.min(def.lower);
            }
            if def.upper.is_finite() {
                v = v.max(def.upper);
            }
            vars.push(problem_vars.add(v));
        }

        let objective = to_expression(model.objective(), &vars);
        let mut problem = problem_vars.minimise(objective).using(default_solver);
        for c in model.constraints() {
            let lhs = to_expression(&c.lhs, &vars);
            let row = match c.comparison {
                Comparison::Eq => constraint::eq(lhs, c.rhs),
                Comparison::Le => constraint::leq(lhs, c.rhs),
                Comparison::Ge => constraint::geq(lhs, c.rhs),
            };
            problem = problem.with(row);
        }

        match problem.solve() {
            Ok(solution) => {
                let values: Vec<f64> = vars.iter().map(|v| solution.value(*v)).collect();
                // Recompute from our own expression rather than trusting the
                // backend's reported objective.
                let objective = model.objective().eval(&values);
                debug!(
                    variables = model.num_variables(),
                    constraints = model.num_constraints(),
                    objective,
                    "solve finished"
                );
                Ok(SolveOutcome {
                    status: SolveStatus::Optimal,
                    values,
                    objective,
                    gap: 0.0,
                    wall_time: start.elapsed(),
                })
            }
            Err(ResolutionError::Infeasible) => Ok(SolveOutcome::without_incumbent(
                SolveStatus::Infeasible,
                start.elapsed(),
            )),
            Err(ResolutionError::Unbounded) => Err(SolveError::Unbounded),
            Err(other) => Err(SolveError::Backend(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;

    #[test]
    fn minimizes_to_the_lower_bound() {
        let mut builder = ModelBuilder::new(1);
        let x = builder.add_variable("t", "x", None, 3.0, 10.0);
        builder.set_objective(LinearExpr::term(x, 1.0));
        let model = builder.into_model();
        let outcome = MicrolpSolver::new()
            .solve(&model, &SolverOptions::default())
            .unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert!((outcome.objective - 3.0).abs() < 1e-6);
        assert!((outcome.values[x.index()] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn contradictory_rows_report_infeasible() {
        let mut builder = ModelBuilder::new(1);
        let x = builder.add_variable("t", "x", None, 0.0, 1.0);
        builder.add_constraint(
            "force_high".to_string(),
            LinearExpr::term(x, 1.0),
            Comparison::Ge,
            2.0,
        );
        builder.set_objective(LinearExpr::term(x, 1.0));
        let model = builder.into_model();
        let outcome = MicrolpSolver::new()
            .solve(&model, &SolverOptions::default())
            .unwrap();
        assert_eq!(outcome.status, SolveStatus::Infeasible);
        assert!(!outcome.has_incumbent());
        assert!(outcome.values.is_empty());
    }

    #[test]
    fn equality_splits_between_costed_variables() {
        let mut builder = ModelBuilder::new(1);
        let x = builder.add_variable("t", "x", None, 0.0, 4.0);
        let y = builder.add_variable("t", "y", None, 0.0, 10.0);
        builder.add_constraint(
            "total".to_string(),
            LinearExpr::term(x, 1.0).plus_term(y, 1.0),
            Comparison::Eq,
            10.0,
        );
        builder.set_objective(LinearExpr::term(x, 2.0).plus_term(y, 1.0));
        let model = builder.into_model();
        let outcome = MicrolpSolver::new()
            .solve(&model, &SolverOptions::default())
            .unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert!((outcome.values[x.index()] - 0.0).abs() < 1e-6);
        assert!((outcome.values[y.index()] - 10.0).abs() < 1e-6);
        assert!((outcome.objective - 10.0).abs() < 1e-6);
    }

    #[test]
    fn empty_model_is_rejected() {
        let model = ModelBuilder::new(0).into_model();
        let err = MicrolpSolver::new()
            .solve(&model, &SolverOptions::default())
            .unwrap_err();
        assert!(matches!(err, SolveError::NotBuilt));
    }

    #[test]
    fn objective_constant_survives_into_the_reported_value() {
        let mut builder = ModelBuilder::new(1);
        let x = builder.add_variable("t", "x", None, 1.0, 5.0);
        builder.set_objective(LinearExpr::term(x, 1.0).plus_constant(100.0));
        let model = builder.into_model();
        let outcome = MicrolpSolver::new()
            .solve(&model, &SolverOptions::default())
            .unwrap();
        assert!((outcome.objective - 101.0).abs() < 1e-6);
    }
}
