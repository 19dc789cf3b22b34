//! Translation of a committed plan interval into per-device commands, and
//! the sink trait they are published through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::components::Component;
use crate::error::DispatchError;
use crate::scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerDirection {
    Charge,
    Discharge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DispatchAction {
    ReduceLoad {
        reduction_kw: f64,
        duration_minutes: u32,
        priority: Priority,
    },
    AdjustSetpoint {
        temperature_delta_c: f64,
        duration_minutes: u32,
        comfort_priority: Priority,
    },
    BatteryDispatch {
        power_kw: f64,
        direction: PowerDirection,
    },
}

/// One command for one device, valid for at most the committed interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchCommand {
    pub device: String,
    pub issued_at: DateTime<Utc>,
    pub valid_for_minutes: u32,
    #[serde(flatten)]
    pub action: DispatchAction,
}

/// Transport for outgoing commands. Publishing is fire-and-forget at the
/// call site: a failed publish is logged and counted, never fatal.
#[async_trait]
pub trait DispatchSink: Send + Sync {
    async fn publish(&self, command: &DispatchCommand) -> Result<(), DispatchError>;
}

/// Duration-weighted mean of a series over the committed steps, in the
/// series' own unit.
fn committed_mean(scenario: &Scenario, series: &[f64], steps: &[usize]) -> f64 {
    let grid = scenario.grid();
    let mut weighted = 0.0;
    let mut hours = 0.0;
    for &t in steps {
        let dt = grid.step_hours(t);
        weighted += series[t] * dt;
        hours += dt;
    }
    if hours > 0.0 { weighted / hours } else { 0.0 }
}

/// Builds the command set for the committed interval.
///
/// Quantities below `threshold_kw` (or 0.1 degrees for setpoint moves) stay
/// uncommanded; tiny dispatches would only exercise the hardware.
pub fn build_commands(
    scenario: &Scenario,
    committed_steps: &[usize],
    issued_at: DateTime<Utc>,
    threshold_kw: f64,
) -> Vec<DispatchCommand> {
    if committed_steps.is_empty() {
        return Vec::new();
    }
    let grid = scenario.grid();
    let duration_minutes: u32 = committed_steps.iter().map(|&t| grid.step_minutes(t)).sum();

    let mut commands = Vec::new();
    for component in scenario.components() {
        match component {
            Component::ElectricDemand(unit) => {
                let Some(shed) = scenario.decision_series(unit.id(), "shed") else {
                    continue;
                };
                let reduction_kw = committed_mean(scenario, &shed, committed_steps);
                if reduction_kw <= threshold_kw {
                    continue;
                }
                let capability = unit.baseline().map_or(0.0, |b| {
                    unit.flexibility * committed_mean(scenario, &b.values, committed_steps)
                });
                let ratio = if capability > 0.0 {
                    reduction_kw / capability
                } else {
                    0.0
                };
                let priority = if ratio >= 0.75 {
                    Priority::High
                } else if ratio >= 0.25 {
                    Priority::Normal
                } else {
                    Priority::Low
                };
                commands.push(DispatchCommand {
                    device: unit.device().to_string(),
                    issued_at,
                    valid_for_minutes: duration_minutes,
                    action: DispatchAction::ReduceLoad {
                        reduction_kw,
                        duration_minutes,
                        priority,
                    },
                });
            }
            Component::Hvac(unit) => {
                let Some(temp) = scenario.decision_series(unit.id(), "temp") else {
                    continue;
                };
                let offset =
                    committed_mean(scenario, &temp, committed_steps) - unit.setpoint_c;
                if offset.abs() < 0.1 {
                    continue;
                }
                let delta = offset.clamp(-unit.max_offset_c, unit.max_offset_c);
                let comfort_priority = if offset.abs() > unit.deadband_c {
                    Priority::High
                } else {
                    Priority::Low
                };
                commands.push(DispatchCommand {
                    device: unit.zone_device().to_string(),
                    issued_at,
                    valid_for_minutes: duration_minutes,
                    action: DispatchAction::AdjustSetpoint {
                        temperature_delta_c: delta,
                        duration_minutes,
                        comfort_priority,
                    },
                });
            }
            Component::Battery(unit) => {
                let (Some(charge), Some(discharge)) = (
                    scenario.decision_series(unit.id(), "charge"),
                    scenario.decision_series(unit.id(), "discharge"),
                ) else {
                    continue;
                };
                let net: Vec<f64> = charge
                    .iter()
                    .zip(&discharge)
                    .map(|(c, d)| c - d)
                    .collect();
                let net_kw = committed_mean(scenario, &net, committed_steps);
                if net_kw.abs() <= threshold_kw {
                    continue;
                }
                let direction = if net_kw > 0.0 {
                    PowerDirection::Charge
                } else {
                    PowerDirection::Discharge
                };
                commands.push(DispatchCommand {
                    device: unit.device().to_string(),
                    issued_at,
                    valid_for_minutes: duration_minutes,
                    action: DispatchAction::BatteryDispatch {
                        power_kw: net_kw.abs(),
                        direction,
                    },
                });
            }
            Component::SolarPv(_)
            | Component::GridConnection(_)
            | Component::SystemObjective(_) => {}
        }
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn issued() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn battery_command_serializes_with_flat_action_tag() {
        let command = DispatchCommand {
            device: "battery_bms_001".to_string(),
            issued_at: issued(),
            valid_for_minutes: 15,
            action: DispatchAction::BatteryDispatch {
                power_kw: 50.0,
                direction: PowerDirection::Discharge,
            },
        };
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["action"], json!("battery_dispatch"));
        assert_eq!(value["power_kw"], json!(50.0));
        assert_eq!(value["direction"], json!("discharge"));
        assert_eq!(value["device"], json!("battery_bms_001"));
    }

    #[test]
    fn reduce_load_round_trips_through_json() {
        let command = DispatchCommand {
            device: "hotel_main_meter_001".to_string(),
            issued_at: issued(),
            valid_for_minutes: 15,
            action: DispatchAction::ReduceLoad {
                reduction_kw: 12.5,
                duration_minutes: 15,
                priority: Priority::Normal,
            },
        };
        let raw = serde_json::to_string(&command).unwrap();
        let parsed: DispatchCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, command);
    }

    #[test]
    fn setpoint_command_round_trips_through_json() {
        let command = DispatchCommand {
            device: "hvac_zone1_temp_001".to_string(),
            issued_at: issued(),
            valid_for_minutes: 30,
            action: DispatchAction::AdjustSetpoint {
                temperature_delta_c: 1.5,
                duration_minutes: 30,
                comfort_priority: Priority::High,
            },
        };
        let raw = serde_json::to_string(&command).unwrap();
        let parsed: DispatchCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, command);
        assert!(raw.contains("\"action\":\"adjust_setpoint\""));
    }
}
