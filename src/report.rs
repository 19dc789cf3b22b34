//! Committed-interval records and the post-hoc run summary.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::components::Component;
use crate::controller::{CycleOutcome, CycleReport};
use crate::scenario::Scenario;

/// One grid step of the committed plan, flattened for persistence and CSV
/// export. Components absent from the scenario report zeros.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedRecord {
    pub timestamp: DateTime<Utc>,
    /// True step duration; the final step of an uneven horizon is shorter.
    pub step_minutes: u32,
    /// Forecast baseline load (kW).
    pub baseline_kw: f64,
    /// Load actually planned to be served (kW).
    pub served_kw: f64,
    /// Planned load reduction (kW).
    pub shed_kw: f64,
    /// HVAC electrical draw (kW).
    pub hvac_power_kw: f64,
    /// Planned zone temperature (degrees C).
    pub hvac_temp_c: f64,
    /// Battery charge power (kW).
    pub battery_charge_kw: f64,
    /// Battery discharge power (kW).
    pub battery_discharge_kw: f64,
    /// Battery state of charge at step end (kWh).
    pub battery_soc_kwh: f64,
    /// PV generation used (kW).
    pub pv_generation_kw: f64,
    /// Grid import (kW).
    pub grid_import_kw: f64,
    /// Grid export (kW).
    pub grid_export_kw: f64,
    /// Import price in effect (currency per kWh).
    pub price_per_kwh: f64,
    /// Net energy cost of this step (import minus export credit).
    pub energy_cost: f64,
    /// Import carbon for this step (kg CO2).
    pub carbon_kg: f64,
    /// Whether any forecast input behind this step was imputed.
    pub imputed_inputs: bool,
}

/// Extracts the committed steps of a solved scenario into flat records.
pub fn committed_records(scenario: &Scenario, steps: &[usize]) -> Vec<CommittedRecord> {
    let grid = scenario.grid();

    let mut demand = None;
    let mut hvac = None;
    let mut battery = None;
    let mut pv = None;
    let mut tie = None;
    for component in scenario.components() {
        match component {
            Component::ElectricDemand(u) => demand = Some(u),
            Component::Hvac(u) => hvac = Some(u),
            Component::Battery(u) => battery = Some(u),
            Component::SolarPv(u) => pv = Some(u),
            Component::GridConnection(u) => tie = Some(u),
            Component::SystemObjective(_) => {}
        }
    }

    let series = |owner: Option<&str>, name: &str| {
        owner.and_then(|id| scenario.decision_series(id, name))
    };
    let shed = series(demand.map(|u| u.id()), "shed");
    let hvac_power = series(hvac.map(|u| u.id()), "power");
    let hvac_temp = series(hvac.map(|u| u.id()), "temp");
    let charge = series(battery.map(|u| u.id()), "charge");
    let discharge = series(battery.map(|u| u.id()), "discharge");
    let soc = series(battery.map(|u| u.id()), "soc");
    let pv_gen = series(pv.map(|u| u.id()), "pv_gen");
    let import = series(tie.map(|u| u.id()), "import");
    let export = series(tie.map(|u| u.id()), "export");

    let at = |s: &Option<Vec<f64>>, t: usize| s.as_ref().map_or(0.0, |v| v[t]);

    let mut records = Vec::with_capacity(steps.len());
    for &t in steps {
        let dt = grid.step_hours(t);
        let baseline_kw = demand
            .and_then(|u| u.baseline())
            .map_or(0.0, |b| b.values[t]);
        let shed_kw = at(&shed, t);
        let grid_import_kw = at(&import, t);
        let grid_export_kw = at(&export, t);
        let price_per_kwh = tie
            .and_then(|u| u.import_price())
            .map_or(0.0, |p| p.values[t]);
        let energy_cost = tie.map_or(0.0, |u| {
            grid_import_kw * price_per_kwh * dt
                - grid_export_kw * u.feed_in_rate(price_per_kwh) * dt
        });
        let carbon_kg = tie.map_or(0.0, |u| {
            grid_import_kw * u.carbon.at_hour(grid.hour_of_day(t)) * dt
        });
        let imputed_inputs = scenario
            .components()
            .iter()
            .any(|c| c.inputs_imputed(&[t]));

        records.push(CommittedRecord {
            timestamp: grid.timestamp(t),
            step_minutes: grid.step_minutes(t),
            baseline_kw,
            served_kw: baseline_kw - shed_kw,
            shed_kw,
            hvac_power_kw: at(&hvac_power, t),
            hvac_temp_c: at(&hvac_temp, t),
            battery_charge_kw: at(&charge, t),
            battery_discharge_kw: at(&discharge, t),
            battery_soc_kwh: at(&soc, t),
            pv_generation_kw: at(&pv_gen, t),
            grid_import_kw,
            grid_export_kw,
            price_per_kwh,
            energy_cost,
            carbon_kg,
            imputed_inputs,
        });
    }
    records
}

/// Aggregate indicators for a controller run.
///
/// Computed post-hoc from the cycle reports so the summary and the per-step
/// records can never disagree.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub cycles: usize,
    pub committed_cycles: usize,
    pub failed_cycles: usize,
    pub escalated_cycles: usize,
    /// Committed records across all cycles.
    pub records: usize,
    /// Records backed by at least one imputed input.
    pub imputed_records: usize,
    /// Total grid import (kWh).
    pub import_kwh: f64,
    /// Total grid export (kWh).
    pub export_kwh: f64,
    /// Total load shed (kWh).
    pub shed_kwh: f64,
    /// Total PV energy used (kWh).
    pub pv_kwh: f64,
    /// Battery energy moved in either direction (kWh).
    pub battery_throughput_kwh: f64,
    /// Throughput over twice the capacity.
    pub battery_equivalent_full_cycles: f64,
    /// Highest committed import power (kW).
    pub peak_import_kw: f64,
    /// Net energy cost over all committed records.
    pub energy_cost: f64,
    /// Import carbon over all committed records (kg CO2).
    pub carbon_kg: f64,
    /// Mean solver wall time per committed cycle (ms).
    pub mean_solve_ms: f64,
}

impl RunSummary {
    pub fn from_reports(reports: &[CycleReport], battery_capacity_kwh: f64) -> Self {
        let mut summary = Self {
            cycles: reports.len(),
            committed_cycles: 0,
            failed_cycles: 0,
            escalated_cycles: 0,
            records: 0,
            imputed_records: 0,
            import_kwh: 0.0,
            export_kwh: 0.0,
            shed_kwh: 0.0,
            pv_kwh: 0.0,
            battery_throughput_kwh: 0.0,
            battery_equivalent_full_cycles: 0.0,
            peak_import_kw: 0.0,
            energy_cost: 0.0,
            carbon_kg: 0.0,
            mean_solve_ms: 0.0,
        };

        let mut solve_ms_sum = 0.0;
        for report in reports {
            if report.escalated {
                summary.escalated_cycles += 1;
            }
            match &report.outcome {
                CycleOutcome::Committed {
                    records, solve_wall, ..
                } => {
                    summary.committed_cycles += 1;
                    solve_ms_sum += solve_wall.as_secs_f64() * 1000.0;
                    for record in records {
                        let dt = f64::from(record.step_minutes) / 60.0;
                        summary.records += 1;
                        if record.imputed_inputs {
                            summary.imputed_records += 1;
                        }
                        summary.import_kwh += record.grid_import_kw * dt;
                        summary.export_kwh += record.grid_export_kw * dt;
                        summary.shed_kwh += record.shed_kw * dt;
                        summary.pv_kwh += record.pv_generation_kw * dt;
                        summary.battery_throughput_kwh +=
                            (record.battery_charge_kw + record.battery_discharge_kw) * dt;
                        summary.peak_import_kw = summary.peak_import_kw.max(record.grid_import_kw);
                        summary.energy_cost += record.energy_cost;
                        summary.carbon_kg += record.carbon_kg;
                    }
                }
                CycleOutcome::Failed { .. } => {
                    summary.failed_cycles += 1;
                }
            }
        }

        if summary.committed_cycles > 0 {
            summary.mean_solve_ms = solve_ms_sum / summary.committed_cycles as f64;
        }
        if battery_capacity_kwh > 0.0 {
            summary.battery_equivalent_full_cycles =
                summary.battery_throughput_kwh / (2.0 * battery_capacity_kwh);
        }
        summary
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Run Summary ---")?;
        writeln!(
            f,
            "Cycles:                {} ({} committed, {} failed, {} escalated)",
            self.cycles, self.committed_cycles, self.failed_cycles, self.escalated_cycles
        )?;
        writeln!(
            f,
            "Committed records:     {} ({} imputed)",
            self.records, self.imputed_records
        )?;
        writeln!(
            f,
            "Grid import:           {:.2} kWh (peak {:.2} kW)",
            self.import_kwh, self.peak_import_kw
        )?;
        writeln!(f, "Grid export:           {:.2} kWh", self.export_kwh)?;
        writeln!(f, "PV generation:         {:.2} kWh", self.pv_kwh)?;
        writeln!(f, "Load shed:             {:.2} kWh", self.shed_kwh)?;
        writeln!(
            f,
            "Battery throughput:    {:.2} kWh ({:.2} equiv. cycles)",
            self.battery_throughput_kwh, self.battery_equivalent_full_cycles
        )?;
        writeln!(f, "Energy cost:           {:.2}", self.energy_cost)?;
        writeln!(f, "Carbon:                {:.2} kg", self.carbon_kg)?;
        write!(f, "Mean solve time:       {:.1} ms", self.mean_solve_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{DemandUnit, GridTie, SystemObjective};
    use crate::controller::CycleReport;
    use crate::grid::{Resolution, TimeGrid};
    use crate::solver::{MicrolpSolver, Solver, SolverOptions};
    use chrono::TimeZone;
    use std::time::Duration;

    fn solved_scenario() -> Scenario {
        let anchor = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let grid = TimeGrid::new(anchor, Resolution::Min15, 60);
        let mut scenario = Scenario::new(grid.clone());
        let mut demand = DemandUnit::new("demand", "meter");
        demand.flexibility = 0.0;
        demand.set_baseline(vec![100.0; grid.len()]);
        let mut tie = GridTie::new("grid");
        tie.set_import_price(vec![0.2; grid.len()]);
        scenario.attach(Component::ElectricDemand(demand));
        scenario.attach(Component::GridConnection(tie));
        scenario.attach(Component::SystemObjective(SystemObjective::new()));
        scenario.build().unwrap();
        let outcome = MicrolpSolver::new()
            .solve(scenario.model().unwrap(), &SolverOptions::default())
            .unwrap();
        scenario.set_outcome(outcome);
        scenario
    }

    #[test]
    fn records_flatten_the_committed_steps() {
        let scenario = solved_scenario();
        let records = committed_records(&scenario, &[0, 1]);
        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.step_minutes, 15);
        assert!((first.baseline_kw - 100.0).abs() < 1e-6);
        assert!((first.served_kw - 100.0).abs() < 1e-6);
        assert!((first.grid_import_kw - 100.0).abs() < 1e-6);
        // 100 kW for a quarter hour at 0.2 per kWh.
        assert!((first.energy_cost - 5.0).abs() < 1e-6);
        assert!(!first.imputed_inputs);
        assert_eq!(records[1].timestamp, scenario.grid().timestamp(1));
    }

    #[test]
    fn absent_components_report_zeros() {
        let scenario = solved_scenario();
        let records = committed_records(&scenario, &[0]);
        assert_eq!(records[0].battery_charge_kw, 0.0);
        assert_eq!(records[0].pv_generation_kw, 0.0);
        assert_eq!(records[0].hvac_power_kw, 0.0);
    }

    #[test]
    fn summary_aggregates_committed_cycles() {
        let scenario = solved_scenario();
        let records = committed_records(&scenario, &[0, 1, 2, 3]);
        let anchor = scenario.grid().anchor();
        let reports = vec![CycleReport {
            cycle: 1,
            anchor,
            outcome: CycleOutcome::Committed {
                objective: 20.0,
                gap: 0.0,
                solve_wall: Duration::from_millis(10),
                records,
                commands: Vec::new(),
                publish_failures: 0,
            },
            warnings: Vec::new(),
            escalated: false,
        }];
        let summary = RunSummary::from_reports(&reports, 200.0);
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.committed_cycles, 1);
        assert_eq!(summary.records, 4);
        // 100 kW over four quarter-hour steps.
        assert!((summary.import_kwh - 100.0).abs() < 1e-6);
        assert!((summary.peak_import_kw - 100.0).abs() < 1e-6);
        assert!((summary.energy_cost - 20.0).abs() < 1e-6);
        assert!((summary.mean_solve_ms - 10.0).abs() < 1e-6);
    }

    #[test]
    fn empty_run_summarizes_to_zeros() {
        let summary = RunSummary::from_reports(&[], 200.0);
        assert_eq!(summary.cycles, 0);
        assert_eq!(summary.records, 0);
        assert_eq!(summary.mean_solve_ms, 0.0);
        assert_eq!(summary.battery_equivalent_full_cycles, 0.0);
    }
}
