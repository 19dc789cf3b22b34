//! System-level closure: per-step energy balance rows assembled from the
//! collected supply and demand terms, and the scalar cost objective.

use crate::error::BuildError;
use crate::model::{Comparison, LinearExpr, ModelBuilder};

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemObjective {
    /// Weight converting kg CO2 into currency. Zero optimizes pure cost.
    pub carbon_price_per_kg: f64,
}

impl SystemObjective {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_carbon_price(carbon_price_per_kg: f64) -> Self {
        Self {
            carbon_price_per_kg,
        }
    }

    /// Emits one balance equality per step and sets the objective. Must run
    /// after every other component has registered; a step with no supply or
    /// no demand terms means a component was left out.
    pub fn register(&self, builder: &mut ModelBuilder) -> Result<(), BuildError> {
        let steps = builder.steps();
        let mut missing = Vec::new();
        let mut rows = Vec::with_capacity(steps);
        for t in 0..steps {
            let supply = builder.supply_terms(t);
            let demand = builder.demand_terms(t);
            if supply.is_empty() || demand.is_empty() {
                missing.push(t);
                continue;
            }
            let mut row = LinearExpr::default();
            for term in supply {
                row = row.plus(term);
            }
            for term in demand {
                row = row.plus(&term.clone().scaled(-1.0));
            }
            rows.push((t, row));
        }
        if !missing.is_empty() {
            return Err(BuildError::IncompleteBalance { steps: missing });
        }
        for (t, row) in rows {
            builder.add_constraint(format!("energy_balance[{t}]"), row, Comparison::Eq, 0.0);
        }

        let mut objective = LinearExpr::default();
        let costs: Vec<LinearExpr> = builder
            .cost_terms()
            .iter()
            .map(|(_, expr)| expr.clone())
            .collect();
        for expr in &costs {
            objective = objective.plus(expr);
        }
        if self.carbon_price_per_kg != 0.0 {
            let emissions: Vec<LinearExpr> = builder
                .emission_terms()
                .iter()
                .map(|(_, expr)| expr.clone())
                .collect();
            for expr in &emissions {
                objective = objective.plus(&expr.clone().scaled(self.carbon_price_per_kg));
            }
        }
        builder.set_objective(objective);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_balance_names_offending_steps() {
        let mut builder = ModelBuilder::new(3);
        let x = builder.add_variable("a", "x", Some(0), 0.0, 1.0);
        builder.add_supply(0, LinearExpr::term(x, 1.0));
        builder.add_demand(0, LinearExpr::constant(1.0));
        // Steps 1 and 2 never receive terms.
        let err = SystemObjective::new().register(&mut builder).unwrap_err();
        match err {
            BuildError::IncompleteBalance { steps } => assert_eq!(steps, vec![1, 2]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn balance_rows_subtract_demand_from_supply() {
        let mut builder = ModelBuilder::new(1);
        let r#gen = builder.add_variable("pv", "pv_gen", Some(0), 0.0, 10.0);
        let load = builder.add_variable("demand", "shed", Some(0), 0.0, 2.0);
        builder.add_supply(0, LinearExpr::term(r#gen, 1.0));
        builder.add_demand(0, LinearExpr::constant(8.0).plus_term(load, -1.0));
        SystemObjective::new().register(&mut builder).unwrap();
        let model = builder.into_model();
        let row = model.constraint_named("energy_balance[0]").unwrap();
        // gen - (8 - shed) == 0
        assert_eq!(row.comparison, Comparison::Eq);
        assert!((row.lhs.constant - (-8.0)).abs() < 1e-12);
        assert!((row.lhs.eval(&[10.0, 2.0]) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn carbon_price_folds_emissions_into_objective() {
        let mut builder = ModelBuilder::new(1);
        let import = builder.add_variable("grid", "import", Some(0), 0.0, 100.0);
        builder.add_supply(0, LinearExpr::term(import, 1.0));
        builder.add_demand(0, LinearExpr::constant(50.0));
        builder.add_cost("grid:energy", LinearExpr::term(import, 0.2));
        builder.add_emission("grid:carbon", LinearExpr::term(import, 0.4));
        SystemObjective::with_carbon_price(0.1)
            .register(&mut builder)
            .unwrap();
        let model = builder.into_model();
        // 0.2 + 0.1 * 0.4 per kW imported.
        assert!((model.objective().eval(&[1.0]) - 0.24).abs() < 1e-12);
    }

    #[test]
    fn zero_carbon_price_optimizes_pure_cost() {
        let mut builder = ModelBuilder::new(1);
        let import = builder.add_variable("grid", "import", Some(0), 0.0, 100.0);
        builder.add_supply(0, LinearExpr::term(import, 1.0));
        builder.add_demand(0, LinearExpr::constant(50.0));
        builder.add_cost("grid:energy", LinearExpr::term(import, 0.2));
        builder.add_emission("grid:carbon", LinearExpr::term(import, 0.4));
        SystemObjective::new().register(&mut builder).unwrap();
        let model = builder.into_model();
        assert!((model.objective().eval(&[1.0]) - 0.2).abs() < 1e-12);
    }
}
