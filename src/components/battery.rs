//! Stationary battery with efficiency-corrected state-of-charge dynamics, a
//! linear complementarity row, and a rolling daily throughput cap.

use crate::error::{BuildError, DataQualityWarning};
use crate::grid::TimeGrid;
use crate::model::{Comparison, LinearExpr, ModelBuilder};
use crate::telemetry::{ChannelKind, ChannelSpec, TelemetryFrame};

pub const CHANNEL_SOC: &str = "soc_percent";

#[derive(Debug, Clone)]
pub struct BatteryUnit {
    id: String,
    device: String,
    pub capacity_kwh: f64,
    /// Power limit as a fraction of capacity per hour.
    pub c_rate: f64,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
    /// Fractional energy lost per hour while idle.
    pub self_discharge_per_hour: f64,
    /// Lower state-of-charge bound as a fraction of capacity.
    pub min_soc_frac: f64,
    /// Optional floor on the final-step state of charge.
    pub final_soc_frac: Option<f64>,
    /// Full-cycle equivalents allowed per rolling day.
    pub max_cycles_per_day: f64,
    /// Wear cost per kWh moved in either direction.
    pub throughput_cost_per_kwh: f64,
    initial_soc_kwh: Option<f64>,
    throughput_budget_kwh: Option<f64>,
}

impl BatteryUnit {
    pub fn new(id: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            device: device.into(),
            capacity_kwh: 200.0,
            c_rate: 0.5,
            charge_efficiency: 0.95,
            discharge_efficiency: 0.95,
            self_discharge_per_hour: 0.001,
            min_soc_frac: 0.10,
            final_soc_frac: None,
            max_cycles_per_day: 1.5,
            throughput_cost_per_kwh: 0.01,
            initial_soc_kwh: None,
            throughput_budget_kwh: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn channels(&self) -> Vec<ChannelSpec> {
        vec![ChannelSpec::new(
            self.device.clone(),
            CHANNEL_SOC,
            ChannelKind::SocPercent,
        )]
    }

    pub fn power_limit_kw(&self) -> f64 {
        self.c_rate * self.capacity_kwh
    }

    fn soc_floor_kwh(&self) -> f64 {
        self.min_soc_frac * self.capacity_kwh
    }

    /// Daily throughput allowance: a full cycle moves twice the capacity.
    pub fn daily_throughput_allowance_kwh(&self) -> f64 {
        2.0 * self.capacity_kwh * self.max_cycles_per_day
    }

    pub fn set_initial_soc(&mut self, soc_kwh: f64) {
        self.initial_soc_kwh = Some(soc_kwh);
    }

    pub fn set_throughput_budget(&mut self, budget_kwh: f64) {
        self.throughput_budget_kwh = Some(budget_kwh.max(0.0));
    }

    pub fn initial_soc(&self) -> Option<f64> {
        self.initial_soc_kwh
    }

    /// Binds the starting state of charge and the remaining throughput
    /// budget. The newest BMS reading wins, then the persisted state, then
    /// half capacity. The seed is clamped into the operating range so an
    /// excursion inherited from outside the controller cannot make the
    /// first step infeasible.
    pub fn bind(
        &mut self,
        frame: &TelemetryFrame,
        persisted_soc_kwh: Option<f64>,
        throughput_used_24h_kwh: f64,
    ) -> Vec<DataQualityWarning> {
        let mut warnings = Vec::new();

        let measured = frame
            .get(&self.device, CHANNEL_SOC)
            .and_then(|c| c.trailing.as_ref())
            .and_then(|series| series.latest_measured())
            .map(|pct| pct / 100.0 * self.capacity_kwh);
        let raw = if let Some(soc) = measured {
            soc
        } else if let Some(soc) = persisted_soc_kwh {
            soc
        } else {
            warnings.push(DataQualityWarning::new(
                &self.device,
                CHANNEL_SOC,
                "no state of charge available, assuming half capacity",
            ));
            0.5 * self.capacity_kwh
        };

        let clamped = raw.clamp(self.soc_floor_kwh(), self.capacity_kwh);
        if (clamped - raw).abs() > 1e-9 {
            warnings.push(DataQualityWarning::new(
                &self.device,
                CHANNEL_SOC,
                format!("state of charge {raw:.1} kWh outside operating range, seeded at {clamped:.1} kWh"),
            ));
        }
        self.initial_soc_kwh = Some(clamped);
        self.throughput_budget_kwh =
            Some((self.daily_throughput_allowance_kwh() - throughput_used_24h_kwh).max(0.0));
        warnings
    }

    pub fn register(&self, builder: &mut ModelBuilder, grid: &TimeGrid) -> Result<(), BuildError> {
        let soc0 = self
            .initial_soc_kwh
            .ok_or_else(|| BuildError::UnboundComponent {
                component: self.id.clone(),
            })?;
        let budget = self
            .throughput_budget_kwh
            .ok_or_else(|| BuildError::UnboundComponent {
                component: self.id.clone(),
            })?;

        let p_max = self.power_limit_kw();
        let floor = self.soc_floor_kwh();
        let sd = self.self_discharge_per_hour;

        let mut throughput = LinearExpr::default();
        let mut wear = LinearExpr::default();
        let mut prev_soc = None;
        let mut last_soc = None;
        for t in 0..grid.len() {
            let dt = grid.step_hours(t);
            let charge = builder.add_variable(&self.id, "charge", Some(t), 0.0, p_max);
            let discharge = builder.add_variable(&self.id, "discharge", Some(t), 0.0, p_max);
            let soc = builder.add_variable(&self.id, "soc", Some(t), floor, self.capacity_kwh);

            builder.add_supply(t, LinearExpr::term(discharge, 1.0));
            builder.add_demand(t, LinearExpr::term(charge, 1.0));

            // One normalized row replaces a binary mode variable: charging
            // and discharging cannot both run at full power in one step.
            if p_max > 0.0 {
                builder.add_constraint(
                    format!("{}:exclusive[{t}]", self.id),
                    LinearExpr::term(charge, 1.0 / p_max).plus_term(discharge, 1.0 / p_max),
                    Comparison::Le,
                    1.0,
                );
            }

            let keep = 1.0 - sd * dt;
            let lhs = LinearExpr::term(soc, 1.0)
                .plus_term(charge, -self.charge_efficiency * dt)
                .plus_term(discharge, dt / self.discharge_efficiency);
            let (lhs, rhs) = match prev_soc {
                Some(prev) => (lhs.plus_term(prev, -keep), 0.0),
                None => (lhs, soc0 * keep),
            };
            builder.add_constraint(
                format!("{}:dynamics[{t}]", self.id),
                lhs,
                Comparison::Eq,
                rhs,
            );

            throughput = throughput.plus_term(charge, dt).plus_term(discharge, dt);
            wear = wear
                .plus_term(charge, self.throughput_cost_per_kwh * dt)
                .plus_term(discharge, self.throughput_cost_per_kwh * dt);
            prev_soc = Some(soc);
            last_soc = Some(soc);
        }

        builder.add_constraint(
            format!("{}:cycle_budget", self.id),
            throughput,
            Comparison::Le,
            budget,
        );
        if let (Some(frac), Some(soc)) = (self.final_soc_frac, last_soc) {
            builder.add_constraint(
                format!("{}:final_soc", self.id),
                LinearExpr::term(soc, 1.0),
                Comparison::Ge,
                frac * self.capacity_kwh,
            );
        }
        if self.throughput_cost_per_kwh > 0.0 {
            builder.add_cost(&format!("{}:wear", self.id), wear);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Resolution;
    use chrono::{TimeZone, Utc};

    fn grid() -> TimeGrid {
        let anchor = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        TimeGrid::new(anchor, Resolution::Min15, 60)
    }

    #[test]
    fn register_without_bind_is_an_error() {
        let unit = BatteryUnit::new("battery", "battery_bms_001");
        let mut builder = ModelBuilder::new(4);
        assert!(matches!(
            unit.register(&mut builder, &grid()),
            Err(BuildError::UnboundComponent { .. })
        ));
    }

    #[test]
    fn bind_clamps_seed_into_operating_range() {
        let mut unit = BatteryUnit::new("battery", "battery_bms_001");
        let warnings = unit.bind(&TelemetryFrame::default(), Some(250.0), 0.0);
        assert!((unit.initial_soc().unwrap() - 200.0).abs() < 1e-9);
        assert!(
            warnings
                .iter()
                .any(|w| w.to_string().contains("outside operating range"))
        );
    }

    #[test]
    fn bind_without_any_source_assumes_half_capacity() {
        let mut unit = BatteryUnit::new("battery", "battery_bms_001");
        let warnings = unit.bind(&TelemetryFrame::default(), None, 0.0);
        assert!((unit.initial_soc().unwrap() - 100.0).abs() < 1e-9);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn throughput_budget_subtracts_trailing_usage() {
        let grid = grid();
        let mut unit = BatteryUnit::new("battery", "battery_bms_001");
        // Allowance is 2 * 200 * 1.5 = 600 kWh per rolling day.
        unit.bind(&TelemetryFrame::default(), Some(100.0), 550.0);
        let mut builder = ModelBuilder::new(grid.len());
        unit.register(&mut builder, &grid).unwrap();
        let model = builder.into_model();
        let budget = model.constraint_named("battery:cycle_budget").unwrap();
        assert!((budget.rhs - 50.0).abs() < 1e-9);
    }

    #[test]
    fn exhausted_budget_clamps_to_zero() {
        let mut unit = BatteryUnit::new("battery", "battery_bms_001");
        unit.bind(&TelemetryFrame::default(), Some(100.0), 900.0);
        let grid = grid();
        let mut builder = ModelBuilder::new(grid.len());
        unit.register(&mut builder, &grid).unwrap();
        let model = builder.into_model();
        assert_eq!(model.constraint_named("battery:cycle_budget").unwrap().rhs, 0.0);
    }

    #[test]
    fn soc_bounds_follow_floor_and_capacity() {
        let grid = grid();
        let mut unit = BatteryUnit::new("battery", "battery_bms_001");
        unit.set_initial_soc(100.0);
        unit.set_throughput_budget(600.0);
        let mut builder = ModelBuilder::new(grid.len());
        unit.register(&mut builder, &grid).unwrap();
        let model = builder.into_model();
        for id in model.series("battery", "soc").unwrap() {
            let def = &model.variables()[id.index()];
            assert!((def.lower - 20.0).abs() < 1e-9);
            assert!((def.upper - 200.0).abs() < 1e-9);
        }
    }

    #[test]
    fn final_soc_floor_yields_terminal_constraint() {
        let grid = grid();
        let mut unit = BatteryUnit::new("battery", "battery_bms_001");
        unit.final_soc_frac = Some(0.25);
        unit.set_initial_soc(100.0);
        unit.set_throughput_budget(600.0);
        let mut builder = ModelBuilder::new(grid.len());
        unit.register(&mut builder, &grid).unwrap();
        let model = builder.into_model();
        let terminal = model.constraint_named("battery:final_soc").unwrap();
        assert!((terminal.rhs - 50.0).abs() < 1e-9);
        assert_eq!(terminal.comparison, Comparison::Ge);
    }
}
