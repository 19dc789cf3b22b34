//! The closed set of asset types the controller can model. Each variant
//! declares its telemetry channels, binds fetched data into input series,
//! and registers its variables and constraints with the model builder.

pub mod battery;
pub mod demand;
pub mod grid_tie;
pub mod hvac;
pub mod objective;
pub mod pv;

pub use battery::BatteryUnit;
pub use demand::DemandUnit;
pub use grid_tie::{CarbonIntensity, FeedInTariff, GridTie, TariffSchedule};
pub use hvac::{HourWindow, HvacUnit};
pub use objective::SystemObjective;
pub use pv::PvUnit;

use crate::error::{BuildError, DataQualityWarning};
use crate::grid::TimeGrid;
use crate::model::ModelBuilder;
use crate::telemetry::{ChannelSpec, GridSeries, Quality, TelemetryFrame};

/// Cross-cycle physical state handed to components at bind time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeedState {
    pub battery_soc_kwh: Option<f64>,
    pub hvac_temp_c: Option<f64>,
    /// Battery throughput already spent in the trailing 24 h, kWh.
    pub battery_throughput_used_24h_kwh: f64,
}

#[derive(Debug, Clone)]
pub enum Component {
    ElectricDemand(DemandUnit),
    Hvac(HvacUnit),
    Battery(BatteryUnit),
    SolarPv(PvUnit),
    GridConnection(GridTie),
    SystemObjective(SystemObjective),
}

impl Component {
    pub fn id(&self) -> &str {
        match self {
            Component::ElectricDemand(u) => u.id(),
            Component::Hvac(u) => u.id(),
            Component::Battery(u) => u.id(),
            Component::SolarPv(u) => u.id(),
            Component::GridConnection(u) => u.id(),
            Component::SystemObjective(_) => "objective",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Component::ElectricDemand(_) => "demand",
            Component::Hvac(_) => "hvac",
            Component::Battery(_) => "battery",
            Component::SolarPv(_) => "pv",
            Component::GridConnection(_) => "grid",
            Component::SystemObjective(_) => "objective",
        }
    }

    pub fn is_objective(&self) -> bool {
        matches!(self, Component::SystemObjective(_))
    }

    /// Channels the telemetry adapter should fetch for this component.
    pub fn channels(&self) -> Vec<ChannelSpec> {
        match self {
            Component::ElectricDemand(u) => u.channels(),
            Component::Hvac(u) => u.channels(),
            Component::Battery(u) => u.channels(),
            Component::SolarPv(u) => u.channels(),
            Component::GridConnection(u) => u.channels(),
            Component::SystemObjective(_) => Vec::new(),
        }
    }

    /// Turns fetched channel data and persisted state into the input series
    /// this component needs, applying per-component fallbacks.
    pub fn bind_telemetry(
        &mut self,
        frame: &TelemetryFrame,
        grid: &TimeGrid,
        seed: &SeedState,
    ) -> Vec<DataQualityWarning> {
        match self {
            Component::ElectricDemand(u) => u.bind(frame, grid),
            Component::Hvac(u) => u.bind(frame, grid, seed.hvac_temp_c),
            Component::Battery(u) => u.bind(
                frame,
                seed.battery_soc_kwh,
                seed.battery_throughput_used_24h_kwh,
            ),
            Component::SolarPv(u) => u.bind(frame, grid),
            Component::GridConnection(u) => u.bind(frame, grid),
            Component::SystemObjective(_) => Vec::new(),
        }
    }

    /// Registers variables, constraints, and collector terms. The objective
    /// variant must be registered last; the scenario enforces that order.
    pub fn register(&self, builder: &mut ModelBuilder, grid: &TimeGrid) -> Result<(), BuildError> {
        match self {
            Component::ElectricDemand(u) => u.register(builder, grid),
            Component::Hvac(u) => u.register(builder, grid),
            Component::Battery(u) => u.register(builder, grid),
            Component::SolarPv(u) => u.register(builder, grid),
            Component::GridConnection(u) => u.register(builder, grid),
            Component::SystemObjective(o) => o.register(builder),
        }
    }

    /// Whether any forecast input series backing this component is imputed
    /// at one of the given steps.
    pub fn inputs_imputed(&self, steps: &[usize]) -> bool {
        fn any_imputed(series: Option<&GridSeries>, steps: &[usize]) -> bool {
            series.is_some_and(|s| {
                steps
                    .iter()
                    .any(|&t| matches!(s.quality.get(t), Some(Quality::Imputed)))
            })
        }
        match self {
            Component::ElectricDemand(u) => any_imputed(u.baseline(), steps),
            Component::Hvac(u) => any_imputed(u.ambient(), steps),
            Component::SolarPv(u) => any_imputed(u.potential(), steps),
            Component::GridConnection(u) => any_imputed(u.import_price(), steps),
            Component::Battery(_) | Component::SystemObjective(_) => false,
        }
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
    fn ids_and_kinds_dispatch_per_variant() {
        let demand = Component::ElectricDemand(DemandUnit::new("d1", "meter"));
        assert_eq!(demand.id(), "d1");
        assert_eq!(demand.kind(), "demand");
        assert!(!demand.is_objective());

        let objective = Component::SystemObjective(SystemObjective::new());
        assert_eq!(objective.kind(), "objective");
        assert!(objective.is_objective());
        assert!(objective.channels().is_empty());
    }

    #[test]
    fn demand_declares_its_meter_channel() {
        let demand = Component::ElectricDemand(DemandUnit::new("d1", "hotel_main_meter_001"));
        let channels = demand.channels();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].device, "hotel_main_meter_001");
    }

    #[test]
    fn imputed_inputs_detected_after_fallback_bind() {
        let grid = grid();
        let mut demand = Component::ElectricDemand(DemandUnit::new("d1", "meter"));
        demand.bind_telemetry(&TelemetryFrame::default(), &grid, &SeedState::default());
        assert!(demand.inputs_imputed(&[0, 1]));

        let mut direct = DemandUnit::new("d2", "meter");
        direct.set_baseline(vec![100.0; grid.len()]);
        let direct = Component::ElectricDemand(direct);
        assert!(!direct.inputs_imputed(&[0, 1]));
    }

    #[test]
    fn seed_state_flows_to_battery_bind() {
        let grid = grid();
        let seed = SeedState {
            battery_soc_kwh: Some(120.0),
            hvac_temp_c: None,
            battery_throughput_used_24h_kwh: 100.0,
        };
        let mut battery = Component::Battery(BatteryUnit::new("b1", "battery_bms_001"));
        battery.bind_telemetry(&TelemetryFrame::default(), &grid, &seed);
        match battery {
            Component::Battery(unit) => {
                assert!((unit.initial_soc().unwrap() - 120.0).abs() < 1e-9);
            }
            _ => unreachable!(),
        }
    }
}
