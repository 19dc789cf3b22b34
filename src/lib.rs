//! Rolling-horizon energy-dispatch controller for a metered building.
//!
//! Every cadence interval the controller fetches telemetry for the site's
//! assets, builds a linear dispatch model over the horizon, solves it,
//! commits the first cadence interval of the plan and publishes dispatch
//! commands, then rolls the window forward.

pub mod components;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod forecast;
pub mod grid;
pub mod io;
pub mod model;
pub mod report;
pub mod scenario;
/// Simulated telemetry source and dispatch sink.
pub mod sim;
pub mod solver;
pub mod state;
pub mod telemetry;
