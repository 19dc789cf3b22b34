//! Failure domains of the controller, one enum per pipeline seam.

use std::fmt;

use thiserror::Error;

/// Errors surfaced while fetching raw samples from a telemetry source.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The source could not be reached at all.
    #[error("device \"{device}\" unreachable: {reason}")]
    Unreachable { device: String, reason: String },
    /// One fetch exceeded its per-device timeout.
    #[error("fetch for {device}/{channel} timed out after {timeout_secs} s")]
    Timeout {
        device: String,
        channel: String,
        timeout_secs: u64,
    },
    /// The source answered with a payload the adapter cannot use.
    #[error("malformed payload from {device}/{channel}: {reason}")]
    Malformed {
        device: String,
        channel: String,
        reason: String,
    },
}

/// Errors raised while assembling the optimization model.
#[derive(Debug, Error)]
pub enum BuildError {
    /// One or more steps lack a supply or a demand term, so the energy
    /// balance cannot close. Lists the offending step indices.
    #[error("energy balance incomplete at {} step(s): {steps:?}", steps.len())]
    IncompleteBalance { steps: Vec<usize> },
    /// No `SystemObjective` component was attached.
    #[error("scenario has no system objective component")]
    MissingObjective,
    /// More than one `SystemObjective` component was attached.
    #[error("scenario has {count} system objective components, expected exactly one")]
    DuplicateObjective { count: usize },
    /// A component was asked to register before `bind_telemetry` gave it
    /// input series for the horizon.
    #[error("component \"{component}\" registered without bound inputs")]
    UnboundComponent { component: String },
    /// A NaN or infinite coefficient reached the model.
    #[error("non-finite coefficient in {location}")]
    NonFiniteCoefficient { location: String },
}

/// Errors raised by a solver backend or lifted from a failed solve status.
#[derive(Debug, Error)]
pub enum SolveError {
    /// The constraint system admits no solution. Diagnostics are
    /// best-effort hints naming steps where demand outruns supply.
    #[error("model infeasible ({} diagnostic hint(s))", diagnostics.len())]
    Infeasible { diagnostics: Vec<String> },
    /// The time limit elapsed before any incumbent was found.
    #[error("solve hit the time limit with no incumbent")]
    Timeout,
    /// The objective is unbounded below, which indicates a sign error in
    /// tariffs or a missing variable bound.
    #[error("model unbounded; check tariff signs and variable bounds")]
    Unbounded,
    /// `solve` was called on a scenario that was never built.
    #[error("scenario has no built model to solve")]
    NotBuilt,
    /// Anything else the backend reports.
    #[error("solver backend failure: {0}")]
    Backend(String),
}

/// Errors publishing dispatch commands to devices.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transport failure publishing to \"{device}\": {reason}")]
    Transport { device: String, reason: String },
    #[error("device \"{device}\" rejected the command: {reason}")]
    Rejected { device: String, reason: String },
}

/// Errors reading or writing the persisted controller state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write state file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A cycle-fatal failure that routes the controller into backoff.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Every attempted channel fetch failed, so nothing can be imputed
    /// against. Partial failures do not raise this.
    #[error("telemetry source unavailable: {failed} of {attempted} channel fetches failed")]
    SourceUnavailable { failed: usize, attempted: usize },
    #[error("model build failed: {0}")]
    Build(#[from] BuildError),
    #[error("solve failed: {0}")]
    Solve(#[from] SolveError),
    /// The solve overran the hard cycle deadline and was abandoned.
    #[error("solve missed the cycle deadline")]
    DeadlineExceeded,
}

/// A non-fatal data-quality finding recorded while binding telemetry.
///
/// Warnings ride on the cycle report and are logged; they never abort a
/// cycle on their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataQualityWarning {
    /// Component id that observed the issue.
    pub component: String,
    /// Channel name, or a pseudo-channel like `"seed"` for state issues.
    pub channel: String,
    /// What happened and what was substituted.
    pub reason: String,
}

impl DataQualityWarning {
    pub fn new(
        component: impl Into<String>,
        channel: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            channel: channel.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.component, self.channel, self.reason)
    }
}
