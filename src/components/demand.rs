//! Flexible electric demand: a metered baseline load of which a configured
//! fraction may be shed at a comfort cost.

use crate::error::{BuildError, DataQualityWarning};
use crate::forecast;
use crate::grid::TimeGrid;
use crate::model::{LinearExpr, ModelBuilder};
use crate::telemetry::{ChannelKind, ChannelSpec, GridSeries, Quality, TelemetryFrame};

pub const CHANNEL_POWER: &str = "power_kw";

#[derive(Debug, Clone)]
pub struct DemandUnit {
    id: String,
    device: String,
    /// Mean load for the fallback daily shape when no history exists, kW.
    pub base_kw: f64,
    /// Fraction of the baseline that may be shed per step.
    pub flexibility: f64,
    /// Penalty per shed kWh, currency.
    pub comfort_penalty_per_kwh: f64,
    baseline: Option<GridSeries>,
}

impl DemandUnit {
    pub fn new(id: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            device: device.into(),
            base_kw: 200.0,
            flexibility: 0.10,
            comfort_penalty_per_kwh: 0.12,
            baseline: None,
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
            CHANNEL_POWER,
            ChannelKind::PowerKw,
        )]
    }

    /// Injects a baseline directly, bypassing telemetry. Values are treated
    /// as measured.
    pub fn set_baseline(&mut self, values: Vec<f64>) {
        self.baseline = Some(GridSeries::from_values(values, Quality::Measured));
    }

    pub fn baseline(&self) -> Option<&GridSeries> {
        self.baseline.as_ref()
    }

    /// Binds the baseline from the frame: a forward-dated forecast wins,
    /// then persistence from trailing actuals, then the canonical shape.
    pub fn bind(&mut self, frame: &TelemetryFrame, grid: &TimeGrid) -> Vec<DataQualityWarning> {
        let mut warnings = Vec::new();
        let data = frame.get(&self.device, CHANNEL_POWER);
        let baseline = if let Some(forward) = data.and_then(|c| c.forward.clone()) {
            forward
        } else if let Some(trailing) = data.and_then(|c| c.trailing.as_ref()) {
            forecast::persistence(trailing, grid.len())
        } else {
            warnings.push(DataQualityWarning::new(
                &self.device,
                CHANNEL_POWER,
                "no usable load history, using canonical daily shape",
            ));
            GridSeries::from_values(forecast::demand_profile(grid, self.base_kw), Quality::Imputed)
        };
        self.baseline = Some(baseline);
        warnings
    }

    pub fn register(&self, builder: &mut ModelBuilder, grid: &TimeGrid) -> Result<(), BuildError> {
        let baseline = self
            .baseline
            .as_ref()
            .ok_or_else(|| BuildError::UnboundComponent {
                component: self.id.clone(),
            })?;
        debug_assert_eq!(baseline.len(), grid.len());

        let mut comfort = LinearExpr::default();
        for t in 0..grid.len() {
            let load = baseline.values[t].max(0.0);
            let shed_cap = self.flexibility * load;
            let shed = builder.add_variable(&self.id, "shed", Some(t), 0.0, shed_cap);
            // Served load is baseline minus shed, on the demand side of the
            // balance.
            builder.add_demand(t, LinearExpr::constant(load).plus_term(shed, -1.0));
            comfort = comfort.plus_term(shed, self.comfort_penalty_per_kwh * grid.step_hours(t));
        }
        if !comfort.is_empty() {
            builder.add_cost(&format!("{}:comfort", self.id), comfort);
        }
        Ok(())
    }
}
