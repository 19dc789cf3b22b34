//! Baseline forecasting: persistence from trailing actuals, plus canonical
//! daily shapes used when a channel has no usable history at all.

use std::f64::consts::PI;

use chrono::{DateTime, Timelike, Utc};

use crate::grid::TimeGrid;
use crate::telemetry::{GridSeries, Quality};

/// Naive "tomorrow looks like today" forecast.
///
/// Repeats the trailing actuals onto the horizon, wrapping modulo the
/// trailing length when the horizon is longer. Quality flags travel with
/// their source values, so a forecast built from imputed history stays
/// marked as imputed.
///
/// # Arguments
///
/// * `trailing` - Resampled actuals ending at the grid anchor
/// * `steps` - Number of horizon steps to produce
pub fn persistence(trailing: &GridSeries, steps: usize) -> GridSeries {
    if steps == 0 {
        return GridSeries {
            values: Vec::new(),
            quality: Vec::new(),
        };
    }
    if trailing.is_empty() {
        return GridSeries::uniform(steps, 0.0, Quality::Imputed);
    }

    let n = trailing.len();
    let mut values = Vec::with_capacity(steps);
    let mut quality = Vec::with_capacity(steps);
    for i in 0..steps {
        values.push(trailing.values[i % n]);
        quality.push(trailing.quality[i % n]);
    }
    GridSeries { values, quality }
}

/// Hour of day with minute resolution, e.g. 13.25 for 13:15.
pub fn fractional_hour(ts: DateTime<Utc>) -> f64 {
    f64::from(ts.hour()) + f64::from(ts.minute()) / 60.0
}

/// Daily load shape at fractional hour `h`: mean `base_kw`, trough at
/// midnight, twice the base at noon.
pub fn demand_at(h: f64, base_kw: f64) -> f64 {
    base_kw * (1.0 + (2.0 * PI * h / 24.0 - PI / 2.0).sin())
}

/// Outdoor temperature at fractional hour `h`: `mean_c` average with
/// `swing_c` amplitude, coldest at midnight and warmest at noon.
pub fn ambient_at(h: f64, mean_c: f64, swing_c: f64) -> f64 {
    mean_c + swing_c * (2.0 * PI * h / 24.0 - PI / 2.0).sin()
}

/// Clear-sky production at fractional hour `h`: zero outside 06:00-18:00,
/// sine arch peaking at `peak_kw` at solar noon.
pub fn pv_at(h: f64, peak_kw: f64) -> f64 {
    (peak_kw * (PI * (h - 6.0) / 12.0).sin()).max(0.0)
}

/// Sinusoidal daily load shape sampled on `grid`.
pub fn demand_profile(grid: &TimeGrid, base_kw: f64) -> Vec<f64> {
    (0..grid.len())
        .map(|i| demand_at(fractional_hour(grid.timestamp(i)), base_kw))
        .collect()
}

/// Sinusoidal outdoor temperature sampled on `grid`.
pub fn ambient_profile(grid: &TimeGrid, mean_c: f64, swing_c: f64) -> Vec<f64> {
    (0..grid.len())
        .map(|i| ambient_at(fractional_hour(grid.timestamp(i)), mean_c, swing_c))
        .collect()
}

/// Clear-sky production bell sampled on `grid`.
pub fn pv_profile(grid: &TimeGrid, peak_kw: f64) -> Vec<f64> {
    (0..grid.len())
        .map(|i| pv_at(fractional_hour(grid.timestamp(i)), peak_kw))
        .collect()
}

/// Two-tier time-of-use import tariff, currency per kWh: a daytime block
/// (08:00-20:00) at the peak rate, off-peak otherwise.
pub fn tou_default_hourly() -> [f64; 24] {
    let mut rates = [0.14_f64; 24];
    for rate in rates.iter_mut().take(20).skip(8) {
        *rate = 0.25;
    }
    rates
}
