//! Telemetry ingestion: raw samples, physical validation, and resampling
//! onto the optimization grid.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{DataQualityWarning, TelemetryError};
use crate::grid::TimeGrid;

/// What a channel physically measures. Determines the plausible value range
/// and the resampling rule used when mapping samples onto grid steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Electrical power, kW. Averaged within a step.
    PowerKw,
    /// Battery state of charge, percent of capacity. Last observation wins.
    SocPercent,
    /// Air temperature, degrees C. Last observation wins.
    TemperatureC,
    /// Energy price, currency per kWh. Last observation wins.
    PricePerKwh,
    /// Solar irradiance, W/m2. Averaged within a step.
    IrradianceWm2,
}

impl ChannelKind {
    /// Plausible physical range. Readings outside are clamped and flagged,
    /// never dropped, so a miscalibrated sensor degrades gracefully.
    pub fn bounds(self) -> (f64, f64) {
        match self {
            ChannelKind::PowerKw => (0.0, 50_000.0),
            ChannelKind::SocPercent => (0.0, 100.0),
            ChannelKind::TemperatureC => (-50.0, 60.0),
            // Negative real-time prices are legitimate.
            ChannelKind::PricePerKwh => (-1.0, 10.0),
            ChannelKind::IrradianceWm2 => (0.0, 1500.0),
        }
    }

    /// Whether resampling averages samples within a step (rates) or keeps
    /// the last observation (instantaneous states). Linear interpolation is
    /// deliberately not offered for power channels.
    pub fn averages(self) -> bool {
        matches!(self, ChannelKind::PowerKw | ChannelKind::IrradianceWm2)
    }
}

/// One channel of one device that the adapter should fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    pub device: String,
    pub channel: String,
    pub kind: ChannelKind,
}

impl ChannelSpec {
    pub fn new(device: impl Into<String>, channel: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            device: device.into(),
            channel: channel.into(),
            kind,
        }
    }
}

/// One timestamped reading from a device channel.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub device: String,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Provenance of a value after validation and resampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// Backed by at least one in-range measurement.
    Measured,
    /// Filled by hold-over, back-fill, or a configured default.
    Imputed,
    /// Backed by a measurement that had to be clamped into range.
    OutOfBoundsClamped,
}

/// A channel series aligned to a grid: one value and one quality flag per
/// step.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSeries {
    pub values: Vec<f64>,
    pub quality: Vec<Quality>,
}

impl GridSeries {
    pub fn uniform(len: usize, value: f64, quality: Quality) -> Self {
        Self {
            values: vec![value; len],
            quality: vec![quality; len],
        }
    }

    pub fn from_values(values: Vec<f64>, quality: Quality) -> Self {
        let flags = vec![quality; values.len()];
        Self {
            values,
            quality: flags,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fraction of steps backed by a measurement (clamped counts).
    pub fn measured_fraction(&self) -> f64 {
        if self.quality.is_empty() {
            return 0.0;
        }
        let measured = self
            .quality
            .iter()
            .filter(|q| !matches!(q, Quality::Imputed))
            .count();
        measured as f64 / self.quality.len() as f64
    }

    /// Last value backed by a measurement, scanning from the end.
    pub fn latest_measured(&self) -> Option<f64> {
        self.values
            .iter()
            .zip(&self.quality)
            .rev()
            .find(|(_, q)| !matches!(q, Quality::Imputed))
            .map(|(v, _)| *v)
    }
}

/// Resampled data for one channel: trailing actuals ending at the grid
/// anchor plus any forward-dated samples (price feeds, external forecasts)
/// mapped onto the horizon itself.
#[derive(Debug, Clone)]
pub struct ChannelData {
    pub trailing: Option<GridSeries>,
    pub forward: Option<GridSeries>,
    /// Newest raw sample timestamp, before any resampling.
    pub newest: Option<DateTime<Utc>>,
}

/// All channel data fetched for one cycle, keyed by (device, channel).
#[derive(Debug, Default)]
pub struct TelemetryFrame {
    channels: HashMap<(String, String), ChannelData>,
    pub attempted_fetches: usize,
    pub failed_fetches: usize,
    pub warnings: Vec<DataQualityWarning>,
}

impl TelemetryFrame {
    pub fn get(&self, device: &str, channel: &str) -> Option<&ChannelData> {
        self.channels
            .get(&(device.to_string(), channel.to_string()))
    }

    pub fn insert(&mut self, device: &str, channel: &str, data: ChannelData) {
        self.channels
            .insert((device.to_string(), channel.to_string()), data);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// True when every attempted fetch failed at the transport level. An
    /// empty result set is not a failure; it means the store has no data
    /// and the components should impute.
    pub fn is_total_failure(&self) -> bool {
        self.attempted_fetches > 0 && self.failed_fetches == self.attempted_fetches
    }
}

/// A store or broker that can answer historical range queries per channel.
///
/// Sources may return future-dated samples inside the requested range;
/// those are treated as externally supplied forecasts (real-time price
/// feeds do this).
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch(
        &self,
        device: &str,
        channel: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>, TelemetryError>;
}

/// Validates and resamples `samples` onto `grid`.
///
/// Samples are sorted by timestamp and deduplicated (the later-arriving
/// sample wins a timestamp collision), clamped to the kind's physical
/// range, then bucketed per step: rate channels average, state channels
/// keep the last observation. Gaps hold the previous value and leading
/// gaps back-fill from the first observation, both flagged [`Quality::Imputed`].
///
/// Returns `None` when no sample falls inside the grid, plus the number of
/// clamped samples either way.
pub fn resample_onto(
    grid: &TimeGrid,
    kind: ChannelKind,
    samples: &[TelemetrySample],
) -> (Option<GridSeries>, usize) {
    let mut sorted: Vec<&TelemetrySample> = samples.iter().collect();
    sorted.sort_by_key(|s| s.timestamp);
    let mut deduped: Vec<&TelemetrySample> = Vec::with_capacity(sorted.len());
    for s in sorted {
        match deduped.last_mut() {
            Some(last) if last.timestamp == s.timestamp => *last = s,
            _ => deduped.push(s),
        }
    }

    let (lo, hi) = kind.bounds();
    let step_secs = i64::from(grid.resolution().minutes()) * 60;
    let anchor = grid.anchor();
    let end = grid.end();
    let n = grid.len();

    let mut sums = vec![0.0_f64; n];
    let mut counts = vec![0_usize; n];
    let mut lasts: Vec<Option<f64>> = vec![None; n];
    let mut clamped_in_step = vec![false; n];
    let mut clamped_total = 0_usize;

    for s in deduped {
        if s.timestamp < anchor || s.timestamp >= end || !s.value.is_finite() {
            continue;
        }
        let offset = (s.timestamp - anchor).num_seconds();
        let idx = ((offset / step_secs) as usize).min(n - 1);
        let clamped = s.value < lo || s.value > hi;
        if clamped {
            clamped_total += 1;
            clamped_in_step[idx] = true;
        }
        let value = s.value.clamp(lo, hi);
        sums[idx] += value;
        counts[idx] += 1;
        lasts[idx] = Some(value);
    }

    if counts.iter().all(|&c| c == 0) {
        return (None, clamped_total);
    }

    let mut values = vec![0.0_f64; n];
    let mut quality = vec![Quality::Imputed; n];
    for t in 0..n {
        if counts[t] > 0 {
            values[t] = if kind.averages() {
                sums[t] / counts[t] as f64
            } else {
                lasts[t].unwrap_or(sums[t] / counts[t] as f64)
            };
            quality[t] = if clamped_in_step[t] {
                Quality::OutOfBoundsClamped
            } else {
                Quality::Measured
            };
        }
    }

    // Hold-over for interior gaps, back-fill for leading ones.
    let first_filled = counts.iter().position(|&c| c > 0).unwrap_or(0);
    for t in 0..first_filled {
        values[t] = values[first_filled];
    }
    for t in (first_filled + 1)..n {
        if counts[t] == 0 {
            values[t] = values[t - 1];
        }
    }

    (Some(GridSeries { values, quality }), clamped_total)
}

/// Validation and resampling policy between raw sources and the model.
///
/// Fetches all requested channels concurrently with a per-device timeout;
/// individual failures leave the channel absent so the owning component
/// falls back to defaults, while the failure counts let the controller
/// distinguish a partial from a total outage.
pub struct TelemetryAdapter {
    source: Arc<dyn TelemetrySource>,
    fetch_timeout: StdDuration,
    staleness_minutes: i64,
    trailing_hours: u32,
}

impl TelemetryAdapter {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        fetch_timeout: StdDuration,
        staleness_minutes: i64,
        trailing_hours: u32,
    ) -> Self {
        Self {
            source,
            fetch_timeout,
            staleness_minutes,
            trailing_hours: trailing_hours.max(1),
        }
    }

    /// Fetches every spec (deduplicated) over the trailing window plus the
    /// horizon, and resamples per channel.
    pub async fn fetch_frame(&self, specs: &[ChannelSpec], grid: &TimeGrid) -> TelemetryFrame {
        let mut unique: Vec<ChannelSpec> = Vec::new();
        for spec in specs {
            if !unique.contains(spec) {
                unique.push(spec.clone());
            }
        }

        let trailing_minutes = self.trailing_hours * 60;
        let fetch_start = grid.anchor() - Duration::minutes(i64::from(trailing_minutes));
        let fetch_end = grid.end();

        let mut set: JoinSet<(ChannelSpec, Result<Vec<TelemetrySample>, TelemetryError>)> =
            JoinSet::new();
        for spec in &unique {
            let source = Arc::clone(&self.source);
            let spec = spec.clone();
            let timeout = self.fetch_timeout;
            set.spawn(async move {
                let result = tokio::time::timeout(
                    timeout,
                    source.fetch(&spec.device, &spec.channel, fetch_start, fetch_end),
                )
                .await;
                let result = match result {
                    Ok(inner) => inner,
                    Err(_) => Err(TelemetryError::Timeout {
                        device: spec.device.clone(),
                        channel: spec.channel.clone(),
                        timeout_secs: timeout.as_secs(),
                    }),
                };
                (spec, result)
            });
        }

        let mut results: HashMap<(String, String), Result<Vec<TelemetrySample>, TelemetryError>> =
            HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((spec, result)) => {
                    results.insert((spec.device, spec.channel), result);
                }
                Err(e) => warn!(error = %e, "telemetry fetch task failed to join"),
            }
        }

        let mut frame = TelemetryFrame {
            attempted_fetches: unique.len(),
            ..TelemetryFrame::default()
        };

        let trailing_grid = TimeGrid::new(fetch_start, grid.resolution(), trailing_minutes);
        for spec in &unique {
            let key = (spec.device.clone(), spec.channel.clone());
            match results.remove(&key) {
                Some(Ok(samples)) => {
                    self.ingest(&mut frame, spec, &samples, grid, &trailing_grid);
                }
                Some(Err(e)) => {
                    frame.failed_fetches += 1;
                    warn!(device = %spec.device, channel = %spec.channel, error = %e,
                        "telemetry fetch failed");
                    frame.warnings.push(DataQualityWarning::new(
                        &spec.device,
                        &spec.channel,
                        format!("fetch failed: {e}"),
                    ));
                }
                None => {
                    frame.failed_fetches += 1;
                    frame.warnings.push(DataQualityWarning::new(
                        &spec.device,
                        &spec.channel,
                        "fetch task lost",
                    ));
                }
            }
        }
        frame
    }

    fn ingest(
        &self,
        frame: &mut TelemetryFrame,
        spec: &ChannelSpec,
        samples: &[TelemetrySample],
        grid: &TimeGrid,
        trailing_grid: &TimeGrid,
    ) {
        let newest = samples.iter().map(|s| s.timestamp).max();
        let (forward, clamped_fwd) = resample_onto(grid, spec.kind, samples);
        let (trailing, clamped_trail) = resample_onto(trailing_grid, spec.kind, samples);
        let clamped = clamped_fwd + clamped_trail;
        if clamped > 0 {
            frame.warnings.push(DataQualityWarning::new(
                &spec.device,
                &spec.channel,
                format!("{clamped} reading(s) clamped to physical bounds"),
            ));
        }

        // A channel whose newest actual is older than the staleness gate and
        // that carries no forward data is useless for this cycle.
        let stale_cutoff = grid.anchor() - Duration::minutes(self.staleness_minutes);
        let stale = newest.is_none_or(|ts| ts < stale_cutoff);
        if stale && forward.is_none() {
            debug!(device = %spec.device, channel = %spec.channel,
                "channel stale or empty, leaving absent");
            frame.warnings.push(DataQualityWarning::new(
                &spec.device,
                &spec.channel,
                "no fresh samples inside the staleness window",
            ));
            return;
        }

        frame.insert(
            &spec.device,
            &spec.channel,
            ChannelData {
                trailing,
                forward,
                newest,
            },
        );
    }
}
