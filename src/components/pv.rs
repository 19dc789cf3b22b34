//! Rooftop PV: generation bounded by a weather-corrected potential series.
//! Generation below potential is implicit curtailment; the model never
//! commands it.

use crate::error::{BuildError, DataQualityWarning};
use crate::forecast;
use crate::grid::TimeGrid;
use crate::model::{LinearExpr, ModelBuilder};
use crate::telemetry::{ChannelKind, ChannelSpec, GridSeries, Quality, TelemetryFrame};

pub const CHANNEL_POWER: &str = "power_kw";
pub const CHANNEL_IRRADIANCE: &str = "irradiance_wm2";
pub const CHANNEL_AMBIENT: &str = "temp_c";

/// Standard test condition irradiance, W/m2.
const REFERENCE_IRRADIANCE: f64 = 1000.0;

/// Output loss per degree of module temperature above the rating point.
const DERATE_PER_C: f64 = 0.004;
const DERATE_KNEE_C: f64 = 25.0;
const DERATE_FLOOR: f64 = 0.8;

/// Temperature derating factor, clamped to [0.8, 1.0].
pub fn temperature_derate(ambient_c: f64) -> f64 {
    (1.0 - DERATE_PER_C * (ambient_c - DERATE_KNEE_C).max(0.0)).clamp(DERATE_FLOOR, 1.0)
}

#[derive(Debug, Clone)]
pub struct PvUnit {
    id: String,
    inverter_device: String,
    weather_device: String,
    /// Nameplate AC capacity, kW.
    pub capacity_kw: f64,
    potential: Option<GridSeries>,
}

impl PvUnit {
    pub fn new(
        id: impl Into<String>,
        inverter_device: impl Into<String>,
        weather_device: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            inverter_device: inverter_device.into(),
            weather_device: weather_device.into(),
            capacity_kw: 150.0,
            potential: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channels(&self) -> Vec<ChannelSpec> {
        vec![
            ChannelSpec::new(
                self.inverter_device.clone(),
                CHANNEL_POWER,
                ChannelKind::PowerKw,
            ),
            ChannelSpec::new(
                self.weather_device.clone(),
                CHANNEL_IRRADIANCE,
                ChannelKind::IrradianceWm2,
            ),
            ChannelSpec::new(
                self.weather_device.clone(),
                CHANNEL_AMBIENT,
                ChannelKind::TemperatureC,
            ),
        ]
    }

    pub fn set_potential(&mut self, values: Vec<f64>) {
        self.potential = Some(GridSeries::from_values(values, Quality::Measured));
    }

    pub fn potential(&self) -> Option<&GridSeries> {
        self.potential.as_ref()
    }

    /// Builds the potential series: irradiance forecast scaled to nameplate
    /// and temperature-derated, falling back to inverter power persistence
    /// (already net of derating), then to the clear-sky bell.
    pub fn bind(&mut self, frame: &TelemetryFrame, grid: &TimeGrid) -> Vec<DataQualityWarning> {
        let mut warnings = Vec::new();

        let weather = frame.get(&self.weather_device, CHANNEL_AMBIENT);
        let ambient = if let Some(forward) = weather.and_then(|c| c.forward.clone()) {
            Some(forward)
        } else {
            weather
                .and_then(|c| c.trailing.as_ref())
                .map(|trailing| forecast::persistence(trailing, grid.len()))
        };
        let derate_at = |t: usize| {
            ambient
                .as_ref()
                .map_or(1.0, |a| temperature_derate(a.values[t]))
        };

        let irradiance = frame.get(&self.weather_device, CHANNEL_IRRADIANCE);
        let irradiance = if let Some(forward) = irradiance.and_then(|c| c.forward.clone()) {
            Some(forward)
        } else {
            irradiance
                .and_then(|c| c.trailing.as_ref())
                .map(|trailing| forecast::persistence(trailing, grid.len()))
        };

        let potential = if let Some(irr) = irradiance {
            let values = (0..grid.len())
                .map(|t| {
                    let ratio = (irr.values[t] / REFERENCE_IRRADIANCE).clamp(0.0, 1.0);
                    self.capacity_kw * ratio * derate_at(t)
                })
                .collect();
            GridSeries {
                values,
                quality: irr.quality,
            }
        } else if let Some(trailing) = frame
            .get(&self.inverter_device, CHANNEL_POWER)
            .and_then(|c| c.trailing.as_ref())
        {
            forecast::persistence(trailing, grid.len())
        } else {
            warnings.push(DataQualityWarning::new(
                &self.weather_device,
                CHANNEL_IRRADIANCE,
                "no irradiance or production history, using clear-sky shape",
            ));
            let values = (0..grid.len()).map(|t| derate_at(t)).collect::<Vec<_>>();
            let bell = forecast::pv_profile(grid, self.capacity_kw);
            GridSeries::from_values(
                bell.iter().zip(values).map(|(b, d)| b * d).collect(),
                Quality::Imputed,
            )
        };
        self.potential = Some(potential);
        warnings
    }

    pub fn register(&self, builder: &mut ModelBuilder, grid: &TimeGrid) -> Result<(), BuildError> {
        let potential = self
            .potential
            .as_ref()
            .ok_or_else(|| BuildError::UnboundComponent {
                component: self.id.clone(),
            })?;
        debug_assert_eq!(potential.len(), grid.len());
        for t in 0..grid.len() {
            let ceiling = potential.values[t].clamp(0.0, self.capacity_kw);
            let r#gen = builder.add_variable(&self.id, "pv_gen", Some(t), 0.0, ceiling);
            builder.add_supply(t, LinearExpr::term(r#gen, 1.0));
        }
        Ok(())
    }
}
