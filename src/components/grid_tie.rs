//! Utility interconnection: priced import, credited export, an optional
//! demand charge on the billing peak, and carbon accounting.

use crate::error::{BuildError, DataQualityWarning};
use crate::forecast;
use crate::grid::TimeGrid;
use crate::model::{Comparison, LinearExpr, ModelBuilder};
use crate::telemetry::{ChannelKind, ChannelSpec, GridSeries, Quality, TelemetryFrame};

/// Import price source.
#[derive(Debug, Clone)]
pub enum TariffSchedule {
    /// Fixed hourly rates, currency per kWh, indexed by hour of day.
    TimeOfUse([f64; 24]),
    /// Real-time prices delivered over a telemetry channel.
    RealTime { device: String, channel: String },
}

/// Export credit.
#[derive(Debug, Clone, Copy)]
pub enum FeedInTariff {
    /// Credit as a fraction of the concurrent import price.
    FractionOfImport(f64),
    /// Flat credit, currency per kWh.
    Flat(f64),
}

/// Grid carbon intensity, kg CO2 per kWh imported.
#[derive(Debug, Clone)]
pub enum CarbonIntensity {
    Flat(f64),
    Hourly([f64; 24]),
}

impl CarbonIntensity {
    pub fn at_hour(&self, hour: u32) -> f64 {
        match self {
            CarbonIntensity::Flat(v) => *v,
            CarbonIntensity::Hourly(rates) => rates[hour as usize % 24],
        }
    }
}

#[derive(Debug, Clone)]
pub struct GridTie {
    id: String,
    pub max_import_kw: f64,
    pub max_export_kw: f64,
    pub tariff: TariffSchedule,
    pub feed_in: FeedInTariff,
    /// Demand charge already amortized to the horizon, currency per kW of
    /// billing peak.
    pub demand_charge_per_kw: f64,
    pub carbon: CarbonIntensity,
    import_price: Option<GridSeries>,
}

impl GridTie {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            max_import_kw: 1500.0,
            max_export_kw: 500.0,
            tariff: TariffSchedule::TimeOfUse(forecast::tou_default_hourly()),
            feed_in: FeedInTariff::FractionOfImport(0.7),
            demand_charge_per_kw: 0.0,
            carbon: CarbonIntensity::Flat(0.4),
            import_price: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channels(&self) -> Vec<ChannelSpec> {
        match &self.tariff {
            TariffSchedule::TimeOfUse(_) => Vec::new(),
            TariffSchedule::RealTime { device, channel } => vec![ChannelSpec::new(
                device.clone(),
                channel.clone(),
                ChannelKind::PricePerKwh,
            )],
        }
    }

    pub fn set_import_price(&mut self, values: Vec<f64>) {
        self.import_price = Some(GridSeries::from_values(values, Quality::Measured));
    }

    pub fn import_price(&self) -> Option<&GridSeries> {
        self.import_price.as_ref()
    }

    /// Resolves the per-step import price. A time-of-use schedule reads
    /// straight from config; a real-time tariff takes the forward-dated feed,
    /// then price persistence, then the canonical two-tier schedule.
    pub fn bind(&mut self, frame: &TelemetryFrame, grid: &TimeGrid) -> Vec<DataQualityWarning> {
        let mut warnings = Vec::new();
        let price = match &self.tariff {
            TariffSchedule::TimeOfUse(rates) => {
                let values = (0..grid.len())
                    .map(|t| rates[grid.hour_of_day(t) as usize % 24])
                    .collect();
                GridSeries::from_values(values, Quality::Measured)
            }
            TariffSchedule::RealTime { device, channel } => {
                let data = frame.get(device, channel);
                if let Some(forward) = data.and_then(|c| c.forward.clone()) {
                    forward
                } else if let Some(trailing) = data.and_then(|c| c.trailing.as_ref()) {
                    forecast::persistence(trailing, grid.len())
                } else {
                    warnings.push(DataQualityWarning::new(
                        device,
                        channel,
                        "no price feed, using default time-of-use schedule",
                    ));
                    let rates = forecast::tou_default_hourly();
                    let values = (0..grid.len())
                        .map(|t| rates[grid.hour_of_day(t) as usize % 24])
                        .collect();
                    GridSeries::from_values(values, Quality::Imputed)
                }
            }
        };
        self.import_price = Some(price);
        warnings
    }

    /// Credit rate for exported energy at the given import price.
    pub fn feed_in_rate(&self, import_price: f64) -> f64 {
        match self.feed_in {
            FeedInTariff::FractionOfImport(frac) => frac * import_price,
            FeedInTariff::Flat(rate) => rate,
        }
    }

    pub fn register(&self, builder: &mut ModelBuilder, grid: &TimeGrid) -> Result<(), BuildError> {
        let price = self
            .import_price
            .as_ref()
            .ok_or_else(|| BuildError::UnboundComponent {
                component: self.id.clone(),
            })?;
        debug_assert_eq!(price.len(), grid.len());

        let peak = (self.demand_charge_per_kw > 0.0)
            .then(|| builder.add_variable(&self.id, "peak", None, 0.0, self.max_import_kw));

        let mut energy = LinearExpr::default();
        let mut carbon = LinearExpr::default();
        for t in 0..grid.len() {
            let dt = grid.step_hours(t);
            let import = builder.add_variable(&self.id, "import", Some(t), 0.0, self.max_import_kw);
            let export = builder.add_variable(&self.id, "export", Some(t), 0.0, self.max_export_kw);
            builder.add_supply(t, LinearExpr::term(import, 1.0));
            builder.add_demand(t, LinearExpr::term(export, 1.0));

            let rate = price.values[t];
            energy = energy
                .plus_term(import, rate * dt)
                .plus_term(export, -self.feed_in_rate(rate) * dt);
            carbon = carbon.plus_term(import, self.carbon.at_hour(grid.hour_of_day(t)) * dt);

            if let Some(peak) = peak {
                builder.add_constraint(
                    format!("{}:peak[{t}]", self.id),
                    LinearExpr::term(peak, 1.0).plus_term(import, -1.0),
                    Comparison::Ge,
                    0.0,
                );
            }
        }

        builder.add_cost(&format!("{}:energy", self.id), energy);
        if let Some(peak) = peak {
            builder.add_cost(
                &format!("{}:demand_charge", self.id),
                LinearExpr::term(peak, self.demand_charge_per_kw),
            );
        }
        builder.add_emission(&format!("{}:carbon", self.id), carbon);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Resolution;
    use chrono::{TimeZone, Utc};

    fn grid() -> TimeGrid {
        // 07:30 anchor so the horizon crosses the 08:00 tariff boundary.
        let anchor = Utc.with_ymd_and_hms(2025, 6, 1, 7, 30, 0).unwrap();
        TimeGrid::new(anchor, Resolution::Min30, 120)
    }

    #[test]
    fn tou_prices_follow_hour_of_day() {
        let grid = grid();
        let mut tie = GridTie::new("grid");
        let warnings = tie.bind(&TelemetryFrame::default(), &grid);
        assert!(warnings.is_empty());
        let price = tie.import_price().unwrap();
        assert!((price.values[0] - 0.14).abs() < 1e-12);
        assert!((price.values[1] - 0.25).abs() < 1e-12);
        assert!(price.quality.iter().all(|q| *q == Quality::Measured));
    }

    #[test]
    fn real_time_tariff_without_feed_warns_and_falls_back() {
        let grid = grid();
        let mut tie = GridTie::new("grid");
        tie.tariff = TariffSchedule::RealTime {
            device: "grid_rtp_feed".to_string(),
            channel: "price_import".to_string(),
        };
        let warnings = tie.bind(&TelemetryFrame::default(), &grid);
        assert_eq!(warnings.len(), 1);
        let price = tie.import_price().unwrap();
        assert!(price.quality.iter().all(|q| *q == Quality::Imputed));
    }

    #[test]
    fn demand_charge_adds_peak_variable_and_rows() {
        let grid = grid();
        let mut tie = GridTie::new("grid");
        tie.demand_charge_per_kw = 2.5;
        tie.set_import_price(vec![0.2; grid.len()]);
        let mut builder = ModelBuilder::new(grid.len());
        tie.register(&mut builder, &grid).unwrap();
        let model = builder.into_model();
        assert!(model.scalar("grid", "peak").is_some());
        assert!(model.constraint_named("grid:peak[0]").is_some());
        assert!(model.constraint_named("grid:peak[3]").is_some());
    }

    #[test]
    fn no_demand_charge_means_no_peak_variable() {
        let grid = grid();
        let mut tie = GridTie::new("grid");
        tie.set_import_price(vec![0.2; grid.len()]);
        let mut builder = ModelBuilder::new(grid.len());
        tie.register(&mut builder, &grid).unwrap();
        let model = builder.into_model();
        assert!(model.scalar("grid", "peak").is_none());
    }

    #[test]
    fn flat_feed_in_ignores_import_price() {
        let mut tie = GridTie::new("grid");
        tie.feed_in = FeedInTariff::Flat(0.08);
        assert!((tie.feed_in_rate(0.30) - 0.08).abs() < 1e-12);
        tie.feed_in = FeedInTariff::FractionOfImport(0.7);
        assert!((tie.feed_in_rate(0.30) - 0.21).abs() < 1e-12);
    }

    #[test]
    fn register_without_bind_is_an_error() {
        let grid = grid();
        let tie = GridTie::new("grid");
        let mut builder = ModelBuilder::new(grid.len());
        assert!(matches!(
            tie.register(&mut builder, &grid),
            Err(BuildError::UnboundComponent { .. })
        ));
    }
}
