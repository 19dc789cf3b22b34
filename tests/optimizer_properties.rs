//! Integration tests for the dispatch model: balance closure, determinism,
//! asset constraints, and economic behavior of solved plans.

mod common;

use bems_ctl::components::{BatteryUnit, Component, HourWindow};
use bems_ctl::grid::{Resolution, TimeGrid};
use bems_ctl::scenario::Scenario;

/// Full fleet over `steps` hourly steps with a flat price.
fn fleet_scenario(steps: usize, price: f64) -> Scenario {
    let grid = common::hourly_grid(steps as u32);
    common::scenario_with(
        grid,
        vec![
            Component::ElectricDemand(common::flat_demand(120.0, steps)),
            Component::Hvac(common::seeded_hvac(30.0, steps)),
            Component::Battery(common::seeded_battery()),
            Component::SolarPv(common::bound_pv(vec![40.0; steps])),
            Component::GridConnection(common::priced_tie(vec![price; steps])),
        ],
    )
}

#[test]
fn energy_balance_closes_at_every_step_for_all_resolutions() {
    for resolution in Resolution::ALL {
        let steps = 4;
        let grid = TimeGrid::new(common::anchor(), resolution, resolution.minutes() * steps as u32);
        let mut scenario = common::scenario_with(
            grid,
            vec![
                Component::ElectricDemand(common::flat_demand(120.0, steps)),
                Component::Hvac(common::seeded_hvac(30.0, steps)),
                Component::Battery(common::seeded_battery()),
                Component::SolarPv(common::bound_pv(vec![40.0; steps])),
                Component::GridConnection(common::priced_tie(vec![0.2; steps])),
            ],
        );
        common::solve(&mut scenario);

        for t in 0..steps {
            let residual = scenario
                .constraint_residual(&format!("energy_balance[{t}]"))
                .unwrap();
            assert!(
                residual.abs() < 1e-6,
                "balance open at {resolution:?} step {t}: residual {residual}"
            );
        }
    }
}

#[test]
fn rebuilding_a_bound_scenario_is_deterministic() {
    let mut scenario = fleet_scenario(24, 0.2);

    common::solve(&mut scenario);
    let model = scenario.model().unwrap();
    let first = (model.num_variables(), model.num_constraints());
    let objective1 = scenario.objective_value().unwrap();

    common::solve(&mut scenario);
    let model = scenario.model().unwrap();
    assert_eq!(first, (model.num_variables(), model.num_constraints()));
    let objective2 = scenario.objective_value().unwrap();

    assert!(
        (objective1 - objective2).abs() < 1e-9,
        "objective drifted across rebuilds: {objective1} vs {objective2}"
    );
}

#[test]
fn battery_plan_respects_soc_bounds_and_cycle_budget() {
    let steps = 24;
    let grid = common::hourly_grid(24);

    // Tight budget (a quarter cycle per day) under a strong price spread, so
    // unconstrained arbitrage would blow well past it.
    let mut battery = BatteryUnit::new("battery", "battery_bms_001");
    battery.max_cycles_per_day = 0.25;
    battery.set_initial_soc(0.5 * battery.capacity_kwh);
    battery.set_throughput_budget(battery.daily_throughput_allowance_kwh());
    let budget = battery.daily_throughput_allowance_kwh();
    let floor = battery.min_soc_frac * battery.capacity_kwh;
    let capacity = battery.capacity_kwh;

    let mut prices = vec![0.05; steps];
    for p in prices.iter_mut().skip(12) {
        *p = 0.40;
    }
    let mut scenario = common::scenario_with(
        grid.clone(),
        vec![
            Component::ElectricDemand(common::flat_demand(100.0, steps)),
            Component::Battery(battery),
            Component::GridConnection(common::priced_tie(prices)),
        ],
    );
    common::solve(&mut scenario);

    let soc = scenario.decision_series("battery", "soc").unwrap();
    for (t, s) in soc.iter().enumerate() {
        assert!(
            *s >= floor - 1e-6 && *s <= capacity + 1e-6,
            "state of charge out of bounds at step {t}: {s}"
        );
    }

    let charge = scenario.decision_series("battery", "charge").unwrap();
    let discharge = scenario.decision_series("battery", "discharge").unwrap();
    let moved: f64 = (0..steps)
        .map(|t| (charge[t] + discharge[t]) * grid.step_hours(t))
        .sum();
    assert!(
        moved <= budget + 1e-6,
        "throughput {moved} kWh exceeds budget {budget} kWh"
    );
    // The spread makes every budgeted kWh profitable, so the plan should
    // spend most of the allowance.
    assert!(
        moved > 0.9 * budget,
        "plan left the throughput budget unused: {moved} of {budget} kWh"
    );
}

#[test]
fn hvac_widens_comfort_only_inside_the_override_window() {
    let steps = 24;
    let grid = common::hourly_grid(24);
    let mut hvac = common::seeded_hvac(35.0, steps);
    hvac.override_window = Some(HourWindow::new(14, 18));
    hvac.comfort_penalty_per_deg_h = 0.05;
    let setpoint = hvac.setpoint_c;
    let deadband = hvac.deadband_c;
    let max_offset = hvac.max_offset_c;

    let mut scenario = common::scenario_with(
        grid.clone(),
        vec![
            Component::Hvac(hvac),
            Component::GridConnection(common::priced_tie(vec![0.30; steps])),
        ],
    );
    common::solve(&mut scenario);

    let temp = scenario.decision_series("hvac", "temp").unwrap();
    let mut drifted_past_deadband = false;
    for (t, temp_c) in temp.iter().enumerate() {
        let hour = grid.hour_of_day(t);
        let limit = if (14..18).contains(&hour) {
            setpoint + max_offset
        } else {
            setpoint + deadband
        };
        assert!(
            *temp_c <= limit + 1e-6,
            "zone at {temp_c:.2} C exceeds the {limit:.1} C limit at hour {hour}"
        );
        assert!(
            *temp_c >= setpoint - max_offset - 1e-6,
            "zone at {temp_c:.2} C below the floor at hour {hour}"
        );
        if (14..18).contains(&hour) && *temp_c > setpoint + deadband + 1e-3 {
            drifted_past_deadband = true;
        }
    }
    // Under a hot ambient and a cheap comfort penalty the cooling savings
    // should pull the zone past the deadband while the window allows it.
    assert!(
        drifted_past_deadband,
        "plan never used the override slack: {temp:?}"
    );
}

#[test]
fn shed_lands_on_the_price_spike_alone() {
    let steps = 24;
    let spike_step = 18;
    let mut prices = vec![0.10; steps];
    prices[spike_step] = 0.30;

    let mut scenario = common::scenario_with(
        common::hourly_grid(24),
        vec![
            Component::ElectricDemand(common::flat_demand(100.0, steps)),
            Component::GridConnection(common::priced_tie(prices)),
        ],
    );
    common::solve(&mut scenario);

    let shed = scenario.decision_series("demand", "shed").unwrap();
    for (t, kw) in shed.iter().enumerate() {
        if t == spike_step {
            // Shedding saves 0.30 and costs 0.15 per kWh, so the full 10%
            // flexibility should be used.
            assert!(
                (*kw - 10.0).abs() < 1e-6,
                "expected full shed at the spike, got {kw} kW"
            );
        } else {
            // Off-spike the penalty exceeds the energy price.
            assert!(*kw < 1e-6, "unexpected shed of {kw} kW at step {t}");
        }
    }

    let no_flex_cost = 23.0 * 100.0 * 0.10 + 100.0 * 0.30;
    let objective = scenario.objective_value().unwrap();
    assert!(
        objective < no_flex_cost - 1e-6,
        "flexibility did not lower cost: {objective} vs {no_flex_cost}"
    );
}

#[test]
fn zero_flexibility_reproduces_the_baseline() {
    let steps = 24;
    let mut demand = common::flat_demand(80.0, steps);
    demand.flexibility = 0.0;
    demand.set_baseline(vec![80.0; steps]);

    let mut scenario = common::scenario_with(
        common::hourly_grid(24),
        vec![
            Component::ElectricDemand(demand),
            Component::GridConnection(common::priced_tie(vec![0.15; steps])),
        ],
    );
    common::solve(&mut scenario);

    let shed = scenario.decision_series("demand", "shed").unwrap();
    let import = scenario.decision_series("grid", "import").unwrap();
    for t in 0..steps {
        assert!(shed[t].abs() < 1e-9, "shed {} at step {t}", shed[t]);
        assert!(
            (import[t] - 80.0).abs() < 1e-6,
            "import {} diverges from baseline at step {t}",
            import[t]
        );
    }
}

#[test]
fn battery_discharges_into_the_expensive_hours() {
    let steps = 24;
    let mut prices = vec![0.05; steps];
    for p in prices.iter_mut().skip(12) {
        *p = 0.40;
    }

    let mut without = common::scenario_with(
        common::hourly_grid(24),
        vec![
            Component::ElectricDemand(common::flat_demand(100.0, steps)),
            Component::GridConnection(common::priced_tie(prices.clone())),
        ],
    );
    common::solve(&mut without);
    let cost_without = without.objective_value().unwrap();

    let mut with = common::scenario_with(
        common::hourly_grid(24),
        vec![
            Component::ElectricDemand(common::flat_demand(100.0, steps)),
            Component::Battery(common::seeded_battery()),
            Component::GridConnection(common::priced_tie(prices)),
        ],
    );
    common::solve(&mut with);
    let cost_with = with.objective_value().unwrap();

    assert!(
        cost_with < cost_without - 1.0,
        "battery arbitrage should beat the no-storage cost: {cost_with} vs {cost_without}"
    );

    let discharge = with.decision_series("battery", "discharge").unwrap();
    let peak_discharge: f64 = discharge.iter().skip(12).sum();
    assert!(
        peak_discharge > 1.0,
        "no discharge during the expensive half: {discharge:?}"
    );
}

#[test]
fn demand_charge_pulls_the_billing_peak_down() {
    let steps = 24;
    let mut baseline = vec![80.0; steps];
    for kw in baseline.iter_mut().skip(12) {
        *kw = 160.0;
    }
    let mut demand = common::flat_demand(0.0, steps);
    demand.flexibility = 0.0;
    demand.set_baseline(baseline);

    let mut tie = common::priced_tie(vec![0.10; steps]);
    tie.demand_charge_per_kw = 5.0;

    let grid = common::hourly_grid(24);
    let mut scenario = common::scenario_with(
        grid,
        vec![
            Component::ElectricDemand(demand),
            Component::Battery(common::seeded_battery()),
            Component::GridConnection(tie),
        ],
    );
    common::solve(&mut scenario);

    let peak = scenario.decision_scalar("grid", "peak").unwrap();
    let import = scenario.decision_series("grid", "import").unwrap();
    let max_import = import.iter().cloned().fold(f64::MIN, f64::max);

    // The charge prices the peak, so the variable sits exactly on the
    // maximum import and the battery shaves the expensive half.
    assert!(
        (peak - max_import).abs() < 1e-6,
        "peak variable {peak} detached from max import {max_import}"
    );
    assert!(
        peak < 150.0,
        "battery failed to shave the billing peak: {peak} kW"
    );
}
