//! Shared test fixtures for integration tests.

use chrono::{DateTime, TimeZone, Utc};

use bems_ctl::components::{
    BatteryUnit, Component, DemandUnit, GridTie, HvacUnit, PvUnit, SystemObjective,
};
use bems_ctl::grid::{Resolution, TimeGrid};
use bems_ctl::scenario::Scenario;
use bems_ctl::solver::{MicrolpSolver, SolveStatus, SolverOptions};

/// Fixed planning anchor (2025-06-01 00:00 UTC), aligned for every resolution.
pub fn anchor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
}

/// Hourly grid of `hours` steps starting at [`anchor`].
pub fn hourly_grid(hours: u32) -> TimeGrid {
    TimeGrid::new(anchor(), Resolution::Min60, hours * 60)
}

/// Flat demand unit (10% flexibility, 0.15/kWh shed penalty) with the
/// baseline already bound.
pub fn flat_demand(base_kw: f64, steps: usize) -> DemandUnit {
    let mut unit = DemandUnit::new("demand", "hotel_main_meter_001");
    unit.base_kw = base_kw;
    unit.flexibility = 0.10;
    unit.comfort_penalty_per_kwh = 0.15;
    unit.set_baseline(vec![base_kw; steps]);
    unit
}

/// Grid tie with a fixed per-step import price already bound.
pub fn priced_tie(prices: Vec<f64>) -> GridTie {
    let mut tie = GridTie::new("grid");
    tie.set_import_price(prices);
    tie
}

/// Default battery (200 kWh, 0.5C, 95%/95% efficiency) seeded at half
/// capacity with a fresh daily throughput budget.
pub fn seeded_battery() -> BatteryUnit {
    let mut unit = BatteryUnit::new("battery", "battery_bms_001");
    unit.set_initial_soc(0.5 * unit.capacity_kwh);
    unit.set_throughput_budget(unit.daily_throughput_allowance_kwh());
    unit
}

/// Default HVAC zone (22 C setpoint, 1 C deadband) seeded at setpoint under
/// a constant ambient temperature.
pub fn seeded_hvac(ambient_c: f64, steps: usize) -> HvacUnit {
    let mut unit = HvacUnit::new("hvac", "hvac_zone1_temp_001", "weather_station_001");
    unit.set_initial_temp(unit.setpoint_c);
    unit.set_ambient(vec![ambient_c; steps]);
    unit
}

/// PV plant bound to a fixed generation potential.
pub fn bound_pv(potential_kw: Vec<f64>) -> PvUnit {
    let mut unit = PvUnit::new("pv", "pv_inverter_001", "weather_station_001");
    unit.set_potential(potential_kw);
    unit
}

/// Assembles a scenario from pre-bound components plus the system objective.
pub fn scenario_with(grid: TimeGrid, components: Vec<Component>) -> Scenario {
    let mut scenario = Scenario::new(grid);
    for component in components {
        scenario.attach(component);
    }
    scenario.attach(Component::SystemObjective(SystemObjective::new()));
    scenario
}

/// Builds and solves in place, panicking on anything but an optimal result.
pub fn solve(scenario: &mut Scenario) {
    scenario.build().expect("model should build");
    let status = scenario
        .solve(&MicrolpSolver::new(), &SolverOptions::default())
        .expect("solve should succeed");
    assert_eq!(status, SolveStatus::Optimal);
}
