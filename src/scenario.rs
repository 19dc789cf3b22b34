//! A scenario ties a time grid and a set of components to one optimization
//! model and its solution.

use tracing::debug;

use crate::components::{Component, SeedState};
use crate::error::{BuildError, DataQualityWarning, SolveError};
use crate::grid::TimeGrid;
use crate::model::{ModelBuilder, OptimizationModel};
use crate::solver::{SolveOutcome, SolveStatus, Solver, SolverOptions};
use crate::telemetry::{ChannelSpec, TelemetryFrame};

pub struct Scenario {
    grid: TimeGrid,
    components: Vec<Component>,
    model: Option<OptimizationModel>,
    outcome: Option<SolveOutcome>,
}

impl Scenario {
    pub fn new(grid: TimeGrid) -> Self {
        Self {
            grid,
            components: Vec::new(),
            model: None,
            outcome: None,
        }
    }

    pub fn attach(&mut self, component: Component) {
        self.components.push(component);
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut [Component] {
        &mut self.components
    }

    /// Every telemetry channel any attached component wants fetched.
    pub fn channel_specs(&self) -> Vec<ChannelSpec> {
        self.components
            .iter()
            .flat_map(|c| c.channels())
            .collect()
    }

    /// Binds fetched data and persisted state into every component.
    pub fn bind(&mut self, frame: &TelemetryFrame, seed: &SeedState) -> Vec<DataQualityWarning> {
        let grid = self.grid.clone();
        let mut warnings = Vec::new();
        for component in &mut self.components {
            warnings.extend(component.bind_telemetry(frame, &grid, seed));
        }
        warnings
    }

    /// Assembles a fresh model from the bound components.
    ///
    /// Non-objective components register in insertion order; the single
    /// objective registers last so every collector term exists when the
    /// balance rows are emitted. Building twice from the same bound state
    /// produces an identical structure.
    pub fn build(&mut self) -> Result<(), BuildError> {
        let objectives = self.components.iter().filter(|c| c.is_objective()).count();
        if objectives == 0 {
            return Err(BuildError::MissingObjective);
        }
        if objectives > 1 {
            return Err(BuildError::DuplicateObjective { count: objectives });
        }

        let mut builder = ModelBuilder::new(self.grid.len());
        for component in self.components.iter().filter(|c| !c.is_objective()) {
            component.register(&mut builder, &self.grid)?;
        }
        // filter() above leaves exactly one.
        if let Some(objective) = self.components.iter().find(|c| c.is_objective()) {
            objective.register(&mut builder, &self.grid)?;
        }

        let model = builder.into_model();
        model.validate_finite()?;
        debug!(
            variables = model.num_variables(),
            constraints = model.num_constraints(),
            steps = self.grid.len(),
            "model built"
        );
        self.model = Some(model);
        self.outcome = None;
        Ok(())
    }

    pub fn solve(
        &mut self,
        solver: &dyn Solver,
        options: &SolverOptions,
    ) -> Result<SolveStatus, SolveError> {
        let model = self.model.as_ref().ok_or(SolveError::NotBuilt)?;
        let outcome = solver.solve(model, options)?;
        let status = outcome.status;
        self.outcome = Some(outcome);
        Ok(status)
    }

    /// Installs an externally produced outcome, e.g. from a solve that ran
    /// on another thread.
    pub fn set_outcome(&mut self, outcome: SolveOutcome) {
        self.outcome = Some(outcome);
    }

    pub fn model(&self) -> Option<&OptimizationModel> {
        self.model.as_ref()
    }

    pub fn outcome(&self) -> Option<&SolveOutcome> {
        self.outcome.as_ref()
    }

    pub fn objective_value(&self) -> Option<f64> {
        self.outcome
            .as_ref()
            .filter(|o| o.has_incumbent())
            .map(|o| o.objective)
    }

    /// Solved values of a per-step variable series owned by `owner`.
    pub fn decision_series(&self, owner: &str, name: &str) -> Option<Vec<f64>> {
        let model = self.model.as_ref()?;
        let outcome = self.outcome.as_ref().filter(|o| o.has_incumbent())?;
        let ids = model.series(owner, name)?;
        Some(ids.iter().map(|id| outcome.values[id.index()]).collect())
    }

    pub fn decision_scalar(&self, owner: &str, name: &str) -> Option<f64> {
        let model = self.model.as_ref()?;
        let outcome = self.outcome.as_ref().filter(|o| o.has_incumbent())?;
        let id = model.scalar(owner, name)?;
        Some(outcome.values[id.index()])
    }

    /// Signed slack of a named constraint at the incumbent: `lhs - rhs`.
    pub fn constraint_residual(&self, name: &str) -> Option<f64> {
        let model = self.model.as_ref()?;
        let outcome = self.outcome.as_ref().filter(|o| o.has_incumbent())?;
        let constraint = model.constraint_named(name)?;
        Some(constraint.lhs.eval(&outcome.values) - constraint.rhs)
    }

    /// Best-effort explanation of an infeasible build: steps where the
    /// minimum load that must be served exceeds what every supply source
    /// together could deliver. State-coupled limits (battery energy, HVAC
    /// dynamics) are not modeled here.
    pub fn diagnose_infeasibility(&self) -> Vec<String> {
        let n = self.grid.len();
        let mut max_supply = vec![0.0_f64; n];
        let mut min_demand = vec![0.0_f64; n];
        for component in &self.components {
            match component {
                Component::ElectricDemand(u) => {
                    if let Some(baseline) = u.baseline() {
                        for t in 0..n {
                            min_demand[t] += baseline.values[t].max(0.0) * (1.0 - u.flexibility);
                        }
                    }
                }
                Component::SolarPv(u) => {
                    if let Some(potential) = u.potential() {
                        for t in 0..n {
                            max_supply[t] += potential.values[t].clamp(0.0, u.capacity_kw);
                        }
                    }
                }
                Component::Battery(u) => {
                    for value in max_supply.iter_mut() {
                        *value += u.power_limit_kw();
                    }
                }
                Component::GridConnection(u) => {
                    for value in max_supply.iter_mut() {
                        *value += u.max_import_kw;
                    }
                }
                Component::Hvac(_) | Component::SystemObjective(_) => {}
            }
        }
        let mut diagnostics = Vec::new();
        for t in 0..n {
            if min_demand[t] > max_supply[t] + 1e-6 {
                diagnostics.push(format!(
                    "step {t}: required load {:.1} kW exceeds total supply capability {:.1} kW",
                    min_demand[t], max_supply[t]
                ));
            }
        }
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{DemandUnit, GridTie, SystemObjective};
    use crate::grid::Resolution;
    use crate::solver::MicrolpSolver;
    use chrono::{TimeZone, Utc};

    fn grid() -> TimeGrid {
        let anchor = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        TimeGrid::new(anchor, Resolution::Min60, 240)
    }

    fn demand_grid_scenario(flexibility: f64) -> Scenario {
        let grid = grid();
        let mut scenario = Scenario::new(grid.clone());
        let mut demand = DemandUnit::new("demand", "meter");
        demand.flexibility = flexibility;
        demand.set_baseline(vec![100.0; grid.len()]);
        let mut tie = GridTie::new("grid");
        tie.set_import_price(vec![0.2; grid.len()]);
        scenario.attach(Component::ElectricDemand(demand));
        scenario.attach(Component::GridConnection(tie));
        scenario.attach(Component::SystemObjective(SystemObjective::new()));
        scenario
    }

    #[test]
    fn build_requires_exactly_one_objective() {
        let mut scenario = Scenario::new(grid());
        assert!(matches!(
            scenario.build(),
            Err(BuildError::MissingObjective)
        ));

        scenario.attach(Component::SystemObjective(SystemObjective::new()));
        scenario.attach(Component::SystemObjective(SystemObjective::new()));
        assert!(matches!(
            scenario.build(),
            Err(BuildError::DuplicateObjective { count: 2 })
        ));
    }

    #[test]
    fn objective_attached_first_still_registers_last() {
        let grid = grid();
        let mut scenario = Scenario::new(grid.clone());
        scenario.attach(Component::SystemObjective(SystemObjective::new()));
        let mut demand = DemandUnit::new("demand", "meter");
        demand.set_baseline(vec![100.0; grid.len()]);
        scenario.attach(Component::ElectricDemand(demand));
        let mut tie = GridTie::new("grid");
        tie.set_import_price(vec![0.2; grid.len()]);
        scenario.attach(Component::GridConnection(tie));
        scenario.build().unwrap();
        assert!(
            scenario
                .model()
                .unwrap()
                .constraint_named("energy_balance[0]")
                .is_some()
        );
    }

    #[test]
    fn building_twice_is_structurally_identical() {
        let mut scenario = demand_grid_scenario(0.1);
        scenario.build().unwrap();
        let first = (
            scenario.model().unwrap().num_variables(),
            scenario.model().unwrap().num_constraints(),
        );
        scenario.build().unwrap();
        let second = (
            scenario.model().unwrap().num_variables(),
            scenario.model().unwrap().num_constraints(),
        );
        assert_eq!(first, second);
    }

    #[test]
    fn solve_fills_decision_series() {
        let mut scenario = demand_grid_scenario(0.0);
        scenario.build().unwrap();
        let status = scenario
            .solve(&MicrolpSolver::new(), &SolverOptions::default())
            .unwrap();
        assert_eq!(status, SolveStatus::Optimal);
        let import = scenario.decision_series("grid", "import").unwrap();
        // No flexibility and no other source: import covers the full load.
        for value in import {
            assert!((value - 100.0).abs() < 1e-6);
        }
        assert!(scenario.objective_value().is_some());
    }

    #[test]
    fn solve_without_build_is_rejected() {
        let mut scenario = demand_grid_scenario(0.1);
        let err = scenario
            .solve(&MicrolpSolver::new(), &SolverOptions::default())
            .unwrap_err();
        assert!(matches!(err, SolveError::NotBuilt));
    }

    #[test]
    fn rebuild_invalidates_previous_outcome() {
        let mut scenario = demand_grid_scenario(0.1);
        scenario.build().unwrap();
        scenario
            .solve(&MicrolpSolver::new(), &SolverOptions::default())
            .unwrap();
        assert!(scenario.outcome().is_some());
        scenario.build().unwrap();
        assert!(scenario.outcome().is_none());
    }

    #[test]
    fn diagnosis_names_undersupplied_steps() {
        let grid = grid();
        let mut scenario = Scenario::new(grid.clone());
        let mut demand = DemandUnit::new("demand", "meter");
        demand.flexibility = 0.0;
        demand.set_baseline(vec![100.0; grid.len()]);
        let mut tie = GridTie::new("grid");
        tie.max_import_kw = 10.0;
        tie.set_import_price(vec![0.2; grid.len()]);
        scenario.attach(Component::ElectricDemand(demand));
        scenario.attach(Component::GridConnection(tie));
        scenario.attach(Component::SystemObjective(SystemObjective::new()));
        let diagnostics = scenario.diagnose_infeasibility();
        assert_eq!(diagnostics.len(), grid.len());
        assert!(diagnostics[0].contains("step 0"));
    }
}
