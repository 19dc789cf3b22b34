//! Simulated site: a telemetry source with plausible daily profiles and a
//! recording dispatch sink, for the demo binary and integration tests.

pub mod sink;
pub mod source;

pub use sink::RecordingSink;
pub use source::{ChannelProfile, SimTelemetrySource};
