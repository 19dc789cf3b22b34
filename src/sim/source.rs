//! Simulated building telemetry with reproducible noise.

use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::config::SiteConfig;
use crate::error::TelemetryError;
use crate::forecast;
use crate::telemetry::{TelemetrySample, TelemetrySource};

/// What a simulated channel reads like over the day.
#[derive(Debug, Clone)]
pub enum ChannelProfile {
    /// Building load meter following the canonical daily shape.
    Demand { base_kw: f64 },
    /// Outdoor air temperature, coldest at midnight.
    Ambient { mean_c: f64, swing_c: f64 },
    /// Conditioned zone hovering near its setpoint.
    Zone { setpoint_c: f64 },
    /// BMS state of charge in percent.
    Soc { percent: f64 },
    /// Plane-of-array irradiance under a clear sky (W/m2).
    Irradiance,
    /// Inverter AC output.
    PvPower { peak_kw: f64 },
    /// Real-time tariff feed publishing hourly prices ahead of time.
    Price { hourly: [f64; 24] },
}

impl ChannelProfile {
    /// Price feeds carry forward data; everything else is a measurement
    /// that stops at the present.
    fn is_forecast(&self) -> bool {
        matches!(self, ChannelProfile::Price { .. })
    }

    fn sample_minutes(&self, default: i64) -> i64 {
        match self {
            ChannelProfile::Price { .. } => 60,
            _ => default,
        }
    }

    fn value_at(&self, ts: DateTime<Utc>, noise_fraction: f64, rng: &mut StdRng) -> f64 {
        let h = forecast::fractional_hour(ts);
        match self {
            ChannelProfile::Demand { base_kw } => {
                let noise = gaussian_noise(rng, noise_fraction * base_kw);
                (forecast::demand_at(h, *base_kw) + noise).max(0.0)
            }
            ChannelProfile::Ambient { mean_c, swing_c } => {
                forecast::ambient_at(h, *mean_c, *swing_c) + gaussian_noise(rng, 0.5)
            }
            ChannelProfile::Zone { setpoint_c } => *setpoint_c + gaussian_noise(rng, 0.3),
            ChannelProfile::Soc { percent } => {
                (*percent + gaussian_noise(rng, 1.0)).clamp(0.0, 100.0)
            }
            ChannelProfile::Irradiance => {
                let clear_sky = forecast::pv_at(h, 1000.0);
                (clear_sky + gaussian_noise(rng, noise_fraction * 1000.0)).max(0.0)
            }
            ChannelProfile::PvPower { peak_kw } => {
                let noise = gaussian_noise(rng, noise_fraction * peak_kw);
                (forecast::pv_at(h, *peak_kw) + noise).max(0.0)
            }
            ChannelProfile::Price { hourly } => {
                hourly[ts.hour() as usize] + gaussian_noise(rng, 0.005)
            }
        }
    }
}

/// Zero-mean Gaussian noise via the Box-Muller transform.
fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    let u1: f64 = rng.random::<f64>().clamp(1e-12, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    z0 * std_dev
}

/// An in-process [`TelemetrySource`] generating plausible building data.
///
/// Fetches are deterministic per (seed, device, channel, range), so repeated
/// runs of a demo or test produce identical telemetry. Devices listed
/// offline fail with [`TelemetryError::Unreachable`]; unknown channels
/// yield no samples rather than an error.
///
/// The fetch range opens one trailing window before the present, so the
/// source treats `start` plus its configured trailing window as the current
/// instant: measurements stop there, forecasts continue to `end`.
#[derive(Debug, Clone)]
pub struct SimTelemetrySource {
    seed: u64,
    trailing_minutes: i64,
    sample_minutes: i64,
    noise_fraction: f64,
    offline: HashSet<String>,
    profiles: HashMap<(String, String), ChannelProfile>,
}

impl SimTelemetrySource {
    pub fn new(seed: u64, trailing_hours: u32) -> Self {
        Self {
            seed,
            trailing_minutes: i64::from(trailing_hours) * 60,
            sample_minutes: 5,
            noise_fraction: 0.05,
            offline: HashSet::new(),
            profiles: HashMap::new(),
        }
    }

    /// Builds the full device fleet for a configured site.
    pub fn from_config(config: &SiteConfig, seed: u64) -> Self {
        let mut source = Self::new(seed, config.control.trailing_window_hours);
        source.noise_fraction = config.sim.noise_fraction;

        source.register(
            &config.demand.device,
            "power_kw",
            ChannelProfile::Demand {
                base_kw: config.demand.base_kw,
            },
        );
        if let Some(hvac) = &config.hvac {
            source.register(
                &hvac.zone_device,
                "temp_c",
                ChannelProfile::Zone {
                    setpoint_c: hvac.setpoint_c,
                },
            );
            source.register(
                &hvac.weather_device,
                "temp_c",
                ChannelProfile::Ambient {
                    mean_c: config.sim.ambient_mean_c,
                    swing_c: config.sim.ambient_swing_c,
                },
            );
        }
        if let Some(battery) = &config.battery {
            source.register(
                &battery.device,
                "soc_percent",
                ChannelProfile::Soc {
                    percent: config.sim.battery_soc_percent,
                },
            );
        }
        if let Some(pv) = &config.pv {
            source.register(
                &pv.inverter_device,
                "power_kw",
                ChannelProfile::PvPower {
                    peak_kw: pv.capacity_kw,
                },
            );
            source.register(&pv.weather_device, "irradiance_wm2", ChannelProfile::Irradiance);
            source.register(
                &pv.weather_device,
                "temp_c",
                ChannelProfile::Ambient {
                    mean_c: config.sim.ambient_mean_c,
                    swing_c: config.sim.ambient_swing_c,
                },
            );
        }
        if let Some(device) = &config.grid.price_device {
            source.register(
                device,
                &config.grid.price_channel,
                ChannelProfile::Price {
                    hourly: config.grid.tou_price_table(),
                },
            );
        }
        for device in &config.sim.offline_devices {
            source.offline.insert(device.clone());
        }
        source
    }

    pub fn register(&mut self, device: &str, channel: &str, profile: ChannelProfile) {
        self.profiles
            .insert((device.to_string(), channel.to_string()), profile);
    }

    pub fn set_offline(&mut self, device: impl Into<String>) {
        self.offline.insert(device.into());
    }

    /// Removes measurement noise; every sample equals its profile value.
    pub fn with_noise(mut self, noise_fraction: f64) -> Self {
        self.noise_fraction = noise_fraction.max(0.0);
        self
    }

    fn rng_for(&self, device: &str, channel: &str, start: DateTime<Utc>) -> StdRng {
        let mut hasher = DefaultHasher::new();
        device.hash(&mut hasher);
        channel.hash(&mut hasher);
        start.timestamp().hash(&mut hasher);
        StdRng::seed_from_u64(self.seed ^ hasher.finish())
    }
}

#[async_trait]
impl TelemetrySource for SimTelemetrySource {
    async fn fetch(
        &self,
        device: &str,
        channel: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>, TelemetryError> {
        if self.offline.contains(device) {
            return Err(TelemetryError::Unreachable {
                device: device.to_string(),
                reason: "simulated outage".to_string(),
            });
        }
        let key = (device.to_string(), channel.to_string());
        let Some(profile) = self.profiles.get(&key) else {
            return Ok(Vec::new());
        };

        let now = start + Duration::minutes(self.trailing_minutes);
        let cutoff = if profile.is_forecast() {
            end
        } else {
            now.min(end)
        };
        let step = Duration::minutes(profile.sample_minutes(self.sample_minutes));

        let mut rng = self.rng_for(device, channel, start);
        let mut samples = Vec::new();
        let mut ts = start;
        while ts < cutoff {
            samples.push(TelemetrySample {
                device: device.to_string(),
                channel: channel.to_string(),
                timestamp: ts,
                value: profile.value_at(ts, self.noise_fraction, &mut rng),
            });
            ts += step;
        }
        Ok(samples)
    }
}
