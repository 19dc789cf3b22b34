//! Horizon time grid and step resolution.

use chrono::{DateTime, Duration, Timelike, Utc};

/// Step resolution of the optimization grid.
///
/// Only these five values are accepted. They divide an hour evenly and match
/// the meter cadences building telemetry stores actually deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Min1,
    Min5,
    Min15,
    Min30,
    Min60,
}

impl Resolution {
    /// All valid resolutions, coarsest last.
    pub const ALL: [Resolution; 5] = [
        Resolution::Min1,
        Resolution::Min5,
        Resolution::Min15,
        Resolution::Min30,
        Resolution::Min60,
    ];

    /// Maps a minute count onto a resolution, rejecting anything outside
    /// the valid set.
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        match minutes {
            1 => Some(Resolution::Min1),
            5 => Some(Resolution::Min5),
            15 => Some(Resolution::Min15),
            30 => Some(Resolution::Min30),
            60 => Some(Resolution::Min60),
            _ => None,
        }
    }

    pub fn minutes(self) -> u32 {
        match self {
            Resolution::Min1 => 1,
            Resolution::Min5 => 5,
            Resolution::Min15 => 15,
            Resolution::Min30 => 30,
            Resolution::Min60 => 60,
        }
    }

    /// Nominal step duration in hours.
    pub fn step_hours(self) -> f64 {
        f64::from(self.minutes()) / 60.0
    }

    pub fn steps_per_hour(self) -> usize {
        (60 / self.minutes()) as usize
    }
}

/// Equally spaced horizon timestamps anchored at a wall-clock instant.
///
/// When the horizon is not an exact multiple of the resolution the final
/// step is shorter; [`TimeGrid::step_hours`] reports the true duration so
/// energy and cost coefficients stay correct on that step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeGrid {
    anchor: DateTime<Utc>,
    resolution: Resolution,
    steps: usize,
    final_step_minutes: u32,
}

impl TimeGrid {
    /// Builds a grid covering `horizon_minutes` forward from `anchor`.
    ///
    /// # Panics
    ///
    /// Panics if `horizon_minutes` is zero.
    pub fn new(anchor: DateTime<Utc>, resolution: Resolution, horizon_minutes: u32) -> Self {
        assert!(horizon_minutes > 0, "horizon must cover at least one minute");
        let res = resolution.minutes();
        let full = horizon_minutes / res;
        let remainder = horizon_minutes % res;
        let (steps, final_step_minutes) = if remainder == 0 {
            (full, res)
        } else {
            (full + 1, remainder)
        };
        Self {
            anchor,
            resolution,
            steps: steps as usize,
            final_step_minutes,
        }
    }

    pub fn anchor(&self) -> DateTime<Utc> {
        self.anchor
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Number of steps in the horizon (always at least one).
    pub fn len(&self) -> usize {
        self.steps
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Start timestamp of `step`.
    pub fn timestamp(&self, step: usize) -> DateTime<Utc> {
        debug_assert!(step < self.steps);
        self.anchor + Duration::minutes(i64::from(self.resolution.minutes()) * step as i64)
    }

    /// True duration of `step` in minutes. Shorter than the resolution only
    /// on the final step of an uneven horizon.
    pub fn step_minutes(&self, step: usize) -> u32 {
        debug_assert!(step < self.steps);
        if step + 1 == self.steps {
            self.final_step_minutes
        } else {
            self.resolution.minutes()
        }
    }

    /// True duration of `step` in hours.
    pub fn step_hours(&self, step: usize) -> f64 {
        f64::from(self.step_minutes(step)) / 60.0
    }

    /// Total horizon length in minutes.
    pub fn horizon_minutes(&self) -> u32 {
        (self.steps as u32 - 1) * self.resolution.minutes() + self.final_step_minutes
    }

    /// End of the horizon (exclusive).
    pub fn end(&self) -> DateTime<Utc> {
        self.anchor + Duration::minutes(i64::from(self.horizon_minutes()))
    }

    /// Wall-clock hour of day (0..24) at the start of `step`.
    pub fn hour_of_day(&self, step: usize) -> u32 {
        self.timestamp(step).hour()
    }
}

/// Floors an instant to the previous resolution boundary.
pub fn align_to_resolution(instant: DateTime<Utc>, resolution: Resolution) -> DateTime<Utc> {
    let step_secs = i64::from(resolution.minutes()) * 60;
    let secs = instant.timestamp();
    let floored = secs - secs.rem_euclid(step_secs);
    DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(instant)
}
