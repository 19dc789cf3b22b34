//! Linear optimization model: variables, expressions, constraints, and the
//! builder components register themselves against.

use std::collections::BTreeMap;

use crate::error::BuildError;

/// Index of a registered decision variable.
///
/// Ids are issued only by [`OptimizationModel::add_variable`], which records
/// the owning component, so every variable appearing in a constraint or the
/// objective is guaranteed to have exactly one registered owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub(crate) usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Definition of one decision variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDef {
    /// Component id that registered the variable.
    pub owner: String,
    /// Variable family name, e.g. `"charge"`.
    pub name: &'static str,
    /// Grid step for per-step variables, `None` for scalars like a peak.
    pub step: Option<usize>,
    /// Lower bound; `f64::NEG_INFINITY` leaves the variable free below.
    pub lower: f64,
    /// Upper bound; `f64::INFINITY` leaves the variable free above.
    pub upper: f64,
}

/// A linear expression `sum(coeff * var) + constant`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinearExpr {
    pub fn constant(value: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    pub fn term(var: VarId, coeff: f64) -> Self {
        Self {
            terms: vec![(var, coeff)],
            constant: 0.0,
        }
    }

    pub fn plus_term(mut self, var: VarId, coeff: f64) -> Self {
        self.terms.push((var, coeff));
        self
    }

    pub fn plus_constant(mut self, value: f64) -> Self {
        self.constant += value;
        self
    }

    pub fn plus(mut self, other: &LinearExpr) -> Self {
        self.terms.extend_from_slice(&other.terms);
        self.constant += other.constant;
        self
    }

    pub fn scaled(mut self, factor: f64) -> Self {
        for (_, coeff) in &mut self.terms {
            *coeff *= factor;
        }
        self.constant *= factor;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.constant == 0.0
    }

    /// Evaluates the expression against a value vector indexed by `VarId`.
    pub fn eval(&self, values: &[f64]) -> f64 {
        let mut total = self.constant;
        for (var, coeff) in &self.terms {
            total += coeff * values[var.0];
        }
        total
    }

    fn all_finite(&self) -> bool {
        self.constant.is_finite() && self.terms.iter().all(|(_, c)| c.is_finite())
    }
}

/// Comparison operator of a constraint row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Le,
    Ge,
}

/// One linear constraint `lhs <op> rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub lhs: LinearExpr,
    pub comparison: Comparison,
    pub rhs: f64,
}

/// The assembled linear program, backend-agnostic.
#[derive(Debug, Clone, Default)]
pub struct OptimizationModel {
    variables: Vec<VariableDef>,
    constraints: Vec<Constraint>,
    objective: LinearExpr,
    index: BTreeMap<(String, String), Vec<VarId>>,
}

impl OptimizationModel {
    /// Registers a variable owned by `owner` and returns its id.
    pub fn add_variable(
        &mut self,
        owner: &str,
        name: &'static str,
        step: Option<usize>,
        lower: f64,
        upper: f64,
    ) -> VarId {
        debug_assert!(lower <= upper, "{owner}/{name}: lower bound above upper");
        let id = VarId(self.variables.len());
        self.variables.push(VariableDef {
            owner: owner.to_string(),
            name,
            step,
            lower,
            upper,
        });
        self.index
            .entry((owner.to_string(), name.to_string()))
            .or_default()
            .push(id);
        id
    }

    pub fn add_constraint(
        &mut self,
        name: String,
        lhs: LinearExpr,
        comparison: Comparison,
        rhs: f64,
    ) {
        self.constraints.push(Constraint {
            name,
            lhs,
            comparison,
            rhs,
        });
    }

    pub fn set_objective(&mut self, objective: LinearExpr) {
        self.objective = objective;
    }

    pub fn variables(&self) -> &[VariableDef] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// All variable ids registered under `(owner, name)`, in step order.
    pub fn series(&self, owner: &str, name: &str) -> Option<&[VarId]> {
        self.index
            .get(&(owner.to_string(), name.to_string()))
            .map(Vec::as_slice)
    }

    /// The single id registered under `(owner, name)`, if it is a scalar.
    pub fn scalar(&self, owner: &str, name: &str) -> Option<VarId> {
        match self.series(owner, name) {
            Some([id]) => Some(*id),
            _ => None,
        }
    }

    pub fn constraint_named(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name == name)
    }

    /// Rejects NaN or infinite coefficients anywhere in the model. Infinite
    /// variable bounds are fine; infinite constraint coefficients are not.
    pub fn validate_finite(&self) -> Result<(), BuildError> {
        for c in &self.constraints {
            if !c.lhs.all_finite() || !c.rhs.is_finite() {
                return Err(BuildError::NonFiniteCoefficient {
                    location: format!("constraint \"{}\"", c.name),
                });
            }
        }
        if !self.objective.all_finite() {
            return Err(BuildError::NonFiniteCoefficient {
                location: "objective".to_string(),
            });
        }
        Ok(())
    }
}

/// Accumulates the model plus balance, cost, and emission collectors while
/// components register. The objective component turns the collectors into
/// per-step balance equalities and the scalar objective.
#[derive(Debug)]
pub struct ModelBuilder {
    model: OptimizationModel,
    steps: usize,
    supply: Vec<Vec<LinearExpr>>,
    demand: Vec<Vec<LinearExpr>>,
    costs: Vec<(String, LinearExpr)>,
    emissions: Vec<(String, LinearExpr)>,
}

impl ModelBuilder {
    pub fn new(steps: usize) -> Self {
        Self {
            model: OptimizationModel::default(),
            steps,
            supply: vec![Vec::new(); steps],
            demand: vec![Vec::new(); steps],
            costs: Vec::new(),
            emissions: Vec::new(),
        }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn add_variable(
        &mut self,
        owner: &str,
        name: &'static str,
        step: Option<usize>,
        lower: f64,
        upper: f64,
    ) -> VarId {
        self.model.add_variable(owner, name, step, lower, upper)
    }

    pub fn add_constraint(
        &mut self,
        name: String,
        lhs: LinearExpr,
        comparison: Comparison,
        rhs: f64,
    ) {
        self.model.add_constraint(name, lhs, comparison, rhs);
    }

    /// Records a power source term (kW) feeding the balance at `step`.
    pub fn add_supply(&mut self, step: usize, expr: LinearExpr) {
        self.supply[step].push(expr);
    }

    /// Records a power sink term (kW) drawing from the balance at `step`.
    pub fn add_demand(&mut self, step: usize, expr: LinearExpr) {
        self.demand[step].push(expr);
    }

    /// Records a named cost contribution (currency over the horizon).
    pub fn add_cost(&mut self, label: &str, expr: LinearExpr) {
        self.costs.push((label.to_string(), expr));
    }

    /// Records a named emission contribution (kg CO2 over the horizon).
    pub fn add_emission(&mut self, label: &str, expr: LinearExpr) {
        self.emissions.push((label.to_string(), expr));
    }

    pub fn supply_terms(&self, step: usize) -> &[LinearExpr] {
        &self.supply[step]
    }

    pub fn demand_terms(&self, step: usize) -> &[LinearExpr] {
        &self.demand[step]
    }

    pub fn cost_terms(&self) -> &[(String, LinearExpr)] {
        &self.costs
    }

    pub fn emission_terms(&self) -> &[(String, LinearExpr)] {
        &self.emissions
    }

    pub fn set_objective(&mut self, objective: LinearExpr) {
        self.model.set_objective(objective);
    }

    pub fn into_model(self) -> OptimizationModel {
        self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_ids_are_sequential() {
        let mut model = OptimizationModel::default();
        let a = model.add_variable("grid", "import", Some(0), 0.0, 100.0);
        let b = model.add_variable("grid", "import", Some(1), 0.0, 100.0);
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(model.num_variables(), 2);
    }

    #[test]
    fn series_lookup_preserves_step_order() {
        let mut model = OptimizationModel::default();
        let ids: Vec<VarId> = (0..4)
            .map(|t| model.add_variable("battery", "charge", Some(t), 0.0, 5.0))
            .collect();
        assert_eq!(model.series("battery", "charge"), Some(ids.as_slice()));
        assert!(model.series("battery", "missing").is_none());
    }

    #[test]
    fn scalar_lookup_rejects_series() {
        let mut model = OptimizationModel::default();
        model.add_variable("grid", "peak", None, 0.0, 100.0);
        model.add_variable("battery", "charge", Some(0), 0.0, 5.0);
        model.add_variable("battery", "charge", Some(1), 0.0, 5.0);
        assert!(model.scalar("grid", "peak").is_some());
        assert!(model.scalar("battery", "charge").is_none());
    }

    #[test]
    fn expr_eval_applies_coeffs_and_constant() {
        let mut model = OptimizationModel::default();
        let x = model.add_variable("a", "x", None, 0.0, 10.0);
        let y = model.add_variable("a", "y", None, 0.0, 10.0);
        let expr = LinearExpr::term(x, 2.0).plus_term(y, -1.0).plus_constant(3.0);
        assert!((expr.eval(&[4.0, 1.0]) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn scaled_multiplies_everything() {
        let expr = LinearExpr::term(VarId(0), 2.0).plus_constant(1.0).scaled(0.5);
        assert!((expr.terms[0].1 - 1.0).abs() < 1e-12);
        assert!((expr.constant - 0.5).abs() < 1e-12);
    }

    #[test]
    fn validate_finite_catches_nan() {
        let mut model = OptimizationModel::default();
        let x = model.add_variable("a", "x", None, 0.0, 1.0);
        model.add_constraint(
            "bad".to_string(),
            LinearExpr::term(x, f64::NAN),
            Comparison::Le,
            1.0,
        );
        assert!(matches!(
            model.validate_finite(),
            Err(BuildError::NonFiniteCoefficient { .. })
        ));
    }

    #[test]
    fn builder_collects_balance_terms_per_step() {
        let mut builder = ModelBuilder::new(2);
        let imp = builder.add_variable("grid", "import", Some(0), 0.0, 10.0);
        builder.add_supply(0, LinearExpr::term(imp, 1.0));
        builder.add_demand(1, LinearExpr::constant(5.0));
        assert_eq!(builder.supply_terms(0).len(), 1);
        assert!(builder.supply_terms(1).is_empty());
        assert_eq!(builder.demand_terms(1).len(), 1);
    }
}
