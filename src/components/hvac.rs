//! HVAC zone with a first-order thermal model, a hard comfort band, and an
//! optional demand-response override window that widens the band at a
//! per-degree-hour penalty.

use crate::error::{BuildError, DataQualityWarning};
use crate::forecast;
use crate::grid::TimeGrid;
use crate::model::{Comparison, LinearExpr, ModelBuilder};
use crate::telemetry::{ChannelKind, ChannelSpec, GridSeries, Quality, TelemetryFrame};

pub const CHANNEL_TEMP: &str = "temp_c";

/// Daily hour window, end exclusive, wrapping midnight when `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl HourWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[derive(Debug, Clone)]
pub struct HvacUnit {
    id: String,
    zone_device: String,
    weather_device: String,
    /// Comfort target, degrees C.
    pub setpoint_c: f64,
    /// Half-width of the always-allowed band around the setpoint.
    pub deadband_c: f64,
    /// Hard cap on total deviation from the setpoint during an override.
    pub max_offset_c: f64,
    /// Hours of day during which the band may widen to `max_offset_c`.
    pub override_window: Option<HourWindow>,
    /// Penalty per degree-hour of deviation beyond the deadband.
    pub comfort_penalty_per_deg_h: f64,
    /// Thermal heating output limit, kW.
    pub heat_capacity_kw: f64,
    /// Thermal cooling output limit, kW.
    pub cool_capacity_kw: f64,
    pub cop_heat: f64,
    pub cop_cool: f64,
    /// Time constant of drift toward ambient, hours.
    pub thermal_mass_hours: f64,
    /// Zone heat capacity, kWh per degree C.
    pub thermal_capacity_kwh_per_c: f64,
    initial_temp_c: Option<f64>,
    ambient: Option<GridSeries>,
}

impl HvacUnit {
    pub fn new(
        id: impl Into<String>,
        zone_device: impl Into<String>,
        weather_device: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            zone_device: zone_device.into(),
            weather_device: weather_device.into(),
            setpoint_c: 22.0,
            deadband_c: 1.0,
            max_offset_c: 3.0,
            override_window: None,
            comfort_penalty_per_deg_h: 0.5,
            heat_capacity_kw: 40.0,
            cool_capacity_kw: 60.0,
            cop_heat: 3.5,
            cop_cool: 3.0,
            thermal_mass_hours: 6.0,
            thermal_capacity_kwh_per_c: 20.0,
            initial_temp_c: None,
            ambient: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn zone_device(&self) -> &str {
        &self.zone_device
    }

    pub fn channels(&self) -> Vec<ChannelSpec> {
        vec![
            ChannelSpec::new(
                self.zone_device.clone(),
                CHANNEL_TEMP,
                ChannelKind::TemperatureC,
            ),
            ChannelSpec::new(
                self.weather_device.clone(),
                CHANNEL_TEMP,
                ChannelKind::TemperatureC,
            ),
        ]
    }

    pub fn set_initial_temp(&mut self, temp_c: f64) {
        self.initial_temp_c = Some(temp_c);
    }

    pub fn set_ambient(&mut self, values: Vec<f64>) {
        self.ambient = Some(GridSeries::from_values(values, Quality::Measured));
    }

    pub fn ambient(&self) -> Option<&GridSeries> {
        self.ambient.as_ref()
    }

    pub fn initial_temp(&self) -> Option<f64> {
        self.initial_temp_c
    }

    fn band_low(&self) -> f64 {
        self.setpoint_c - self.deadband_c
    }

    fn band_high(&self) -> f64 {
        self.setpoint_c + self.deadband_c
    }

    /// Binds the ambient forecast and the starting zone temperature.
    ///
    /// The starting temperature comes from the newest zone reading, then the
    /// persisted thermal state, then the setpoint. Whatever the source, it
    /// is clamped into the comfort band: an inherited excursion must not
    /// make the first step infeasible.
    pub fn bind(
        &mut self,
        frame: &TelemetryFrame,
        grid: &TimeGrid,
        persisted_temp_c: Option<f64>,
    ) -> Vec<DataQualityWarning> {
        let mut warnings = Vec::new();

        let weather = frame.get(&self.weather_device, CHANNEL_TEMP);
        let ambient = if let Some(forward) = weather.and_then(|c| c.forward.clone()) {
            forward
        } else if let Some(trailing) = weather.and_then(|c| c.trailing.as_ref()) {
            forecast::persistence(trailing, grid.len())
        } else {
            warnings.push(DataQualityWarning::new(
                &self.weather_device,
                CHANNEL_TEMP,
                "no ambient history, using canonical daily swing",
            ));
            GridSeries::from_values(forecast::ambient_profile(grid, 20.0, 10.0), Quality::Imputed)
        };
        self.ambient = Some(ambient);

        let measured = frame
            .get(&self.zone_device, CHANNEL_TEMP)
            .and_then(|c| c.trailing.as_ref())
            .and_then(|series| series.latest_measured());
        let raw = if let Some(temp) = measured {
            temp
        } else if let Some(temp) = persisted_temp_c {
            temp
        } else {
            warnings.push(DataQualityWarning::new(
                &self.zone_device,
                CHANNEL_TEMP,
                "no zone temperature available, assuming setpoint",
            ));
            self.setpoint_c
        };

        let clamped = raw.clamp(self.band_low(), self.band_high());
        if (clamped - raw).abs() > f64::EPSILON {
            warnings.push(DataQualityWarning::new(
                &self.zone_device,
                CHANNEL_TEMP,
                format!("starting temperature {raw:.1} C outside comfort band, seeded at {clamped:.1} C"),
            ));
        }
        self.initial_temp_c = Some(clamped);
        warnings
    }

    pub fn register(&self, builder: &mut ModelBuilder, grid: &TimeGrid) -> Result<(), BuildError> {
        let ambient = self
            .ambient
            .as_ref()
            .ok_or_else(|| BuildError::UnboundComponent {
                component: self.id.clone(),
            })?;
        let start_temp = self
            .initial_temp_c
            .ok_or_else(|| BuildError::UnboundComponent {
                component: self.id.clone(),
            })?;
        debug_assert_eq!(ambient.len(), grid.len());

        let tau = self.thermal_mass_hours;
        let cap = self.thermal_capacity_kwh_per_c;
        let slack_cap = (self.max_offset_c - self.deadband_c).max(0.0);
        let max_power_kw = self.heat_capacity_kw / self.cop_heat + self.cool_capacity_kw / self.cop_cool;

        let mut comfort = LinearExpr::default();
        let mut prev_temp = None;
        for t in 0..grid.len() {
            let dt = grid.step_hours(t);
            let heat = builder.add_variable(&self.id, "q_heat", Some(t), 0.0, self.heat_capacity_kw);
            let cool = builder.add_variable(&self.id, "q_cool", Some(t), 0.0, self.cool_capacity_kw);
            let temp = builder.add_variable(
                &self.id,
                "temp",
                Some(t),
                self.setpoint_c - self.max_offset_c,
                self.setpoint_c + self.max_offset_c,
            );
            let power = builder.add_variable(&self.id, "power", Some(t), 0.0, max_power_kw);

            // Electrical draw implied by the thermal outputs.
            builder.add_constraint(
                format!("{}:power[{t}]", self.id),
                LinearExpr::term(power, 1.0)
                    .plus_term(heat, -1.0 / self.cop_heat)
                    .plus_term(cool, -1.0 / self.cop_cool),
                Comparison::Eq,
                0.0,
            );
            builder.add_demand(t, LinearExpr::term(power, 1.0));

            // First-order drift toward ambient plus forced thermal output.
            let drift = dt / tau;
            let gain = dt / cap;
            let lhs = LinearExpr::term(temp, 1.0)
                .plus_term(heat, -gain)
                .plus_term(cool, gain);
            let (lhs, rhs) = match prev_temp {
                Some(prev) => (
                    lhs.plus_term(prev, -(1.0 - drift)),
                    ambient.values[t] * drift,
                ),
                None => (lhs, start_temp * (1.0 - drift) + ambient.values[t] * drift),
            };
            builder.add_constraint(
                format!("{}:dynamics[{t}]", self.id),
                lhs,
                Comparison::Eq,
                rhs,
            );

            // Band edges, widened by override slack where the window allows.
            let in_override = self
                .override_window
                .is_some_and(|w| w.contains(grid.hour_of_day(t)));
            let slack = if in_override { slack_cap } else { 0.0 };
            let dev_hi = builder.add_variable(&self.id, "dev_hi", Some(t), 0.0, slack);
            let dev_lo = builder.add_variable(&self.id, "dev_lo", Some(t), 0.0, slack);
            builder.add_constraint(
                format!("{}:band_hi[{t}]", self.id),
                LinearExpr::term(temp, 1.0).plus_term(dev_hi, -1.0),
                Comparison::Le,
                self.band_high(),
            );
            builder.add_constraint(
                format!("{}:band_lo[{t}]", self.id),
                LinearExpr::term(temp, 1.0).plus_term(dev_lo, 1.0),
                Comparison::Ge,
                self.band_low(),
            );
            if in_override {
                comfort = comfort
                    .plus_term(dev_hi, self.comfort_penalty_per_deg_h * dt)
                    .plus_term(dev_lo, self.comfort_penalty_per_deg_h * dt);
            }

            prev_temp = Some(temp);
        }
        if !comfort.is_empty() {
            builder.add_cost(&format!("{}:comfort", self.id), comfort);
        }
        Ok(())
    }
}
