//! Cross-cycle window state: what the controller must remember between
//! solves, persisted as a JSON map keyed by site id.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::components::SeedState;
use crate::dispatch::DispatchCommand;
use crate::error::StateError;

/// One battery charge or discharge event, kWh moved, for the rolling
/// daily cycle cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputEvent {
    pub at: DateTime<Utc>,
    pub kwh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowState {
    pub site: String,
    pub anchor: DateTime<Utc>,
    pub battery_soc_kwh: Option<f64>,
    pub hvac_temp_c: Option<f64>,
    #[serde(default)]
    pub throughput_events: Vec<ThroughputEvent>,
    #[serde(default)]
    pub last_dispatch: Vec<DispatchCommand>,
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl WindowState {
    pub fn new(site: impl Into<String>, anchor: DateTime<Utc>) -> Self {
        Self {
            site: site.into(),
            anchor,
            battery_soc_kwh: None,
            hvac_temp_c: None,
            throughput_events: Vec::new(),
            last_dispatch: Vec::new(),
            consecutive_failures: 0,
        }
    }

    /// Physical state handed to components when the next cycle binds.
    pub fn seed(&self) -> SeedState {
        SeedState {
            battery_soc_kwh: self.battery_soc_kwh,
            hvac_temp_c: self.hvac_temp_c,
            battery_throughput_used_24h_kwh: self.throughput_trailing_day(),
        }
    }

    pub fn record_throughput(&mut self, at: DateTime<Utc>, kwh: f64) {
        if kwh > 0.0 {
            self.throughput_events.push(ThroughputEvent { at, kwh });
        }
    }

    /// Battery energy moved within 24 h before the current anchor.
    pub fn throughput_trailing_day(&self) -> f64 {
        let cutoff = self.anchor - Duration::hours(24);
        self.throughput_events
            .iter()
            .filter(|e| e.at >= cutoff)
            .map(|e| e.kwh)
            .sum()
    }

    /// Drops throughput events that can no longer affect the trailing-day
    /// ledger.
    pub fn prune_throughput(&mut self) {
        let cutoff = self.anchor - Duration::hours(24);
        self.throughput_events.retain(|e| e.at >= cutoff);
    }

    /// Moves the window forward one cadence. Called once per cycle whether
    /// the cycle committed or failed.
    pub fn advance(&mut self, cadence_minutes: u32) {
        self.anchor += Duration::minutes(i64::from(cadence_minutes));
        self.prune_throughput();
    }
}

/// Load/save of per-site window state. A store without a path is ephemeral:
/// saves succeed and load nothing, which is what tests and the demo want.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: Option<PathBuf>,
}

impl StateStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn ephemeral() -> Self {
        Self { path: None }
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    pub fn load(&self, site: &str) -> Result<Option<WindowState>, StateError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|source| StateError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let map: BTreeMap<String, WindowState> =
            serde_json::from_str(&raw).map_err(|source| StateError::Corrupt {
                path: path.display().to_string(),
                source,
            })?;
        Ok(map.get(site).cloned())
    }

    /// Writes through a sibling temp file and renames into place, so a
    /// crash mid-write never leaves a truncated store.
    pub fn save(&self, state: &WindowState) -> Result<(), StateError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut map: BTreeMap<String, WindowState> = if path.exists() {
            match fs::read_to_string(path) {
                Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                    warn!(path = %path.display(), error = %e,
                        "state store unreadable, starting fresh");
                    BTreeMap::new()
                }),
                Err(source) => {
                    return Err(StateError::Read {
                        path: path.display().to_string(),
                        source,
                    });
                }
            }
        } else {
            BTreeMap::new()
        };
        map.insert(state.site.clone(), state.clone());

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| StateError::Write {
                path: path.display().to_string(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(&map).map_err(|source| StateError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|source| StateError::Write {
            path: tmp.display().to_string(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| StateError::Write {
            path: path.display().to_string(),
            source,
        })?;
        debug!(site = %state.site, path = %path.display(), "window state saved");
        Ok(())
    }
}
