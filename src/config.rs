//! TOML-based site configuration and preset definitions.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::components::{
    BatteryUnit, CarbonIntensity, Component, DemandUnit, FeedInTariff, GridTie, HourWindow,
    HvacUnit, PvUnit, SystemObjective, TariffSchedule,
};
use crate::controller::ControllerSettings;
use crate::forecast::tou_default_hourly;
use crate::grid::Resolution;
use crate::solver::SolverOptions;

/// Hours in an average billing month, for spreading a monthly demand
/// charge over one optimization horizon.
const HOURS_PER_MONTH: f64 = 730.0;

/// Top-level site configuration parsed from TOML.
///
/// All fields have defaults matching the hotel preset's core. Load from
/// TOML with [`SiteConfig::from_toml_file`] or use [`SiteConfig::hotel`]
/// for the built-in default. The `hvac`, `battery` and `pv` sections are
/// optional; a site without them is just a metered load on a tariff.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    /// Site identity.
    #[serde(default)]
    pub site: SiteSection,
    /// Control loop timing and thresholds.
    #[serde(default)]
    pub control: ControlSection,
    /// Solver limits.
    #[serde(default)]
    pub solver: SolverSection,
    /// Objective weighting.
    #[serde(default)]
    pub objective: ObjectiveSection,
    /// Flexible building load.
    #[serde(default)]
    pub demand: DemandSection,
    /// Thermostatically controlled zone, if the site has one.
    #[serde(default)]
    pub hvac: Option<HvacSection>,
    /// Battery storage, if the site has one.
    #[serde(default)]
    pub battery: Option<BatterySection>,
    /// Solar PV array, if the site has one.
    #[serde(default)]
    pub pv: Option<PvSection>,
    /// Grid connection and tariffs.
    #[serde(default)]
    pub grid: GridSection,
    /// Simulated-source parameters for the demo binary.
    #[serde(default)]
    pub sim: SimSection,
}

/// Site identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteSection {
    /// Keyed into the persisted window state.
    pub name: String,
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            name: "hotel_main".to_string(),
        }
    }
}

/// Control loop timing and thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlSection {
    /// Grid step length (minutes); one of 1, 5, 15, 30, 60.
    pub resolution_minutes: u32,
    /// Optimization horizon (hours).
    pub horizon_hours: f64,
    /// Re-solve and commit interval (minutes); multiple of the resolution.
    pub cadence_minutes: u32,
    /// Trailing actuals fetched per cycle (hours).
    pub trailing_window_hours: u32,
    /// Newest-sample age beyond which a channel is ignored (minutes).
    pub staleness_minutes: i64,
    /// Per-device fetch timeout (seconds).
    pub fetch_timeout_secs: f64,
    /// Consecutive failed cycles before the operator flag is raised.
    pub failure_alert_threshold: u32,
    /// Grace on top of the solver time limit (seconds).
    pub deadline_margin_secs: f64,
    /// Smallest dispatch quantity worth commanding (kW).
    pub command_threshold_kw: f64,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            resolution_minutes: 15,
            horizon_hours: 24.0,
            cadence_minutes: 60,
            trailing_window_hours: 24,
            staleness_minutes: 30,
            fetch_timeout_secs: 5.0,
            failure_alert_threshold: 3,
            deadline_margin_secs: 5.0,
            command_threshold_kw: 0.5,
        }
    }
}

/// Solver limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverSection {
    /// Time limit per solve (seconds).
    pub time_limit_secs: f64,
    /// Acceptable relative optimality gap.
    pub gap_tolerance: f64,
    /// Solver worker threads.
    pub threads: u32,
}

impl Default for SolverSection {
    fn default() -> Self {
        Self {
            time_limit_secs: 20.0,
            gap_tolerance: 0.01,
            threads: 2,
        }
    }
}

/// Objective weighting.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectiveSection {
    /// Price on import carbon (currency per kg CO2); zero for pure cost.
    pub carbon_price_per_kg: f64,
}

impl Default for ObjectiveSection {
    fn default() -> Self {
        Self {
            carbon_price_per_kg: 0.0,
        }
    }
}

/// Flexible building load.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemandSection {
    /// Main meter device id.
    pub device: String,
    /// Mean daily load (kW), used when no history exists.
    pub base_kw: f64,
    /// Curtailable fraction of the baseline (0.0-1.0).
    pub flexibility: f64,
    /// Discomfort price of shedding (currency per kWh).
    pub comfort_penalty_per_kwh: f64,
}

impl Default for DemandSection {
    fn default() -> Self {
        Self {
            device: "hotel_main_meter_001".to_string(),
            base_kw: 200.0,
            flexibility: 0.10,
            comfort_penalty_per_kwh: 0.12,
        }
    }
}

/// Thermostatically controlled zone.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HvacSection {
    /// Zone temperature sensor device id.
    pub zone_device: String,
    /// Outdoor temperature device id.
    pub weather_device: String,
    /// Comfort setpoint (degrees C).
    pub setpoint_c: f64,
    /// Free half-width around the setpoint (degrees C).
    pub deadband_c: f64,
    /// Hard excursion limit from the setpoint (degrees C).
    pub max_offset_c: f64,
    /// First hour of the demand-response override window, if any.
    pub override_start_hour: Option<u32>,
    /// End hour (exclusive) of the override window, if any.
    pub override_end_hour: Option<u32>,
    /// Discomfort price of leaving the deadband (currency per degree-hour).
    pub comfort_penalty_per_deg_h: f64,
    /// Thermal heating capacity (kW).
    pub heat_capacity_kw: f64,
    /// Thermal cooling capacity (kW).
    pub cool_capacity_kw: f64,
    /// Heating coefficient of performance.
    pub cop_heat: f64,
    /// Cooling coefficient of performance.
    pub cop_cool: f64,
    /// Zone thermal time constant (hours).
    pub thermal_mass_hours: f64,
    /// Zone thermal capacitance (kWh per degree C).
    pub thermal_capacity_kwh_per_c: f64,
}

impl Default for HvacSection {
    fn default() -> Self {
        Self {
            zone_device: "hvac_zone1_temp_001".to_string(),
            weather_device: "weather_station_001".to_string(),
            setpoint_c: 22.0,
            deadband_c: 1.0,
            max_offset_c: 3.0,
            override_start_hour: None,
            override_end_hour: None,
            comfort_penalty_per_deg_h: 0.5,
            heat_capacity_kw: 40.0,
            cool_capacity_kw: 60.0,
            cop_heat: 3.5,
            cop_cool: 3.0,
            thermal_mass_hours: 6.0,
            thermal_capacity_kwh_per_c: 20.0,
        }
    }
}

/// Battery storage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatterySection {
    /// BMS device id.
    pub device: String,
    /// Usable energy capacity (kWh).
    pub capacity_kwh: f64,
    /// Power limit as a fraction of capacity per hour.
    pub c_rate: f64,
    /// Charge efficiency (0.0-1.0].
    pub charge_efficiency: f64,
    /// Discharge efficiency (0.0-1.0].
    pub discharge_efficiency: f64,
    /// Standing loss per hour as a fraction of stored energy.
    pub self_discharge_per_hour: f64,
    /// Reserve floor as a fraction of capacity.
    pub min_soc_frac: f64,
    /// Required end-of-horizon state of charge fraction, if any.
    pub final_soc_frac: Option<f64>,
    /// Rolling daily limit on equivalent full cycles.
    pub max_cycles_per_day: f64,
    /// Wear price on energy moved (currency per kWh).
    pub throughput_cost_per_kwh: f64,
}

impl Default for BatterySection {
    fn default() -> Self {
        Self {
            device: "battery_bms_001".to_string(),
            capacity_kwh: 200.0,
            c_rate: 0.5,
            charge_efficiency: 0.95,
            discharge_efficiency: 0.95,
            self_discharge_per_hour: 0.001,
            min_soc_frac: 0.10,
            final_soc_frac: None,
            max_cycles_per_day: 1.5,
            throughput_cost_per_kwh: 0.01,
        }
    }
}

/// Solar PV array.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PvSection {
    /// Inverter device id.
    pub inverter_device: String,
    /// Irradiance/temperature device id.
    pub weather_device: String,
    /// Nameplate AC capacity (kW).
    pub capacity_kw: f64,
}

impl Default for PvSection {
    fn default() -> Self {
        Self {
            inverter_device: "pv_inverter_001".to_string(),
            weather_device: "weather_station_001".to_string(),
            capacity_kw: 150.0,
        }
    }
}

/// Grid connection and tariffs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridSection {
    /// Interconnection import limit (kW).
    pub max_import_kw: f64,
    /// Interconnection export limit (kW).
    pub max_export_kw: f64,
    /// Real-time price feed device id; absent means time-of-use pricing.
    pub price_device: Option<String>,
    /// Channel name on the price feed.
    pub price_channel: String,
    /// Hour-of-day import prices (24 entries); absent means the built-in
    /// two-tier default.
    pub tou_prices: Option<Vec<f64>>,
    /// Export credit as a fraction of the import price.
    pub feed_in_fraction: f64,
    /// Flat export credit (currency per kWh); overrides the fraction.
    pub feed_in_flat: Option<f64>,
    /// Monthly demand charge (currency per kW of monthly peak).
    pub demand_charge_per_kw_month: f64,
    /// Flat import carbon intensity (kg CO2 per kWh).
    pub carbon_kg_per_kwh: f64,
    /// Hour-of-day carbon intensities (24 entries); overrides the flat value.
    pub carbon_hourly: Option<Vec<f64>>,
}

impl Default for GridSection {
    fn default() -> Self {
        Self {
            max_import_kw: 1500.0,
            max_export_kw: 500.0,
            price_device: None,
            price_channel: "price_per_kwh".to_string(),
            tou_prices: None,
            feed_in_fraction: 0.7,
            feed_in_flat: None,
            demand_charge_per_kw_month: 0.0,
            carbon_kg_per_kwh: 0.4,
            carbon_hourly: None,
        }
    }
}

impl GridSection {
    /// The hour-of-day import price table, configured or default.
    pub fn tou_price_table(&self) -> [f64; 24] {
        match &self.tou_prices {
            Some(prices) if prices.len() == 24 => {
                let mut table = [0.0; 24];
                table.copy_from_slice(prices);
                table
            }
            _ => tou_default_hourly(),
        }
    }
}

/// Simulated-source parameters for the demo binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimSection {
    /// Master random seed.
    pub seed: u64,
    /// Relative measurement noise on power channels.
    pub noise_fraction: f64,
    /// Daily mean outdoor temperature (degrees C).
    pub ambient_mean_c: f64,
    /// Daily outdoor temperature amplitude (degrees C).
    pub ambient_swing_c: f64,
    /// Reported battery state of charge (percent).
    pub battery_soc_percent: f64,
    /// Devices that fail every fetch.
    pub offline_devices: Vec<String>,
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            seed: 42,
            noise_fraction: 0.05,
            ambient_mean_c: 20.0,
            ambient_swing_c: 10.0,
            battery_soc_percent: 55.0,
            offline_devices: Vec::new(),
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"control.cadence_minutes"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self::hotel()
    }
}

impl SiteConfig {
    /// The reference site: 200 kW hotel with HVAC, a 200 kWh battery,
    /// 150 kW of PV and time-of-use pricing.
    pub fn hotel() -> Self {
        Self {
            site: SiteSection::default(),
            control: ControlSection::default(),
            solver: SolverSection::default(),
            objective: ObjectiveSection::default(),
            demand: DemandSection::default(),
            hvac: Some(HvacSection::default()),
            battery: Some(BatterySection::default()),
            pv: Some(PvSection::default()),
            grid: GridSection::default(),
            sim: SimSection::default(),
        }
    }

    /// Export-heavy variant: oversized PV on a real-time tariff with a
    /// carbon price, so midday export and clean charging dominate.
    pub fn high_pv() -> Self {
        Self {
            site: SiteSection {
                name: "hotel_high_pv".to_string(),
            },
            objective: ObjectiveSection {
                carbon_price_per_kg: 0.05,
            },
            battery: Some(BatterySection {
                capacity_kwh: 400.0,
                ..BatterySection::default()
            }),
            pv: Some(PvSection {
                capacity_kw: 400.0,
                ..PvSection::default()
            }),
            grid: GridSection {
                max_export_kw: 800.0,
                price_device: Some("grid_rtp_feed".to_string()),
                ..GridSection::default()
            },
            ..Self::hotel()
        }
    }

    /// Peak-event variant: demand charge in force, wider HVAC excursions
    /// allowed during the afternoon window, more load flexibility.
    pub fn dr_event() -> Self {
        Self {
            site: SiteSection {
                name: "hotel_dr_event".to_string(),
            },
            demand: DemandSection {
                flexibility: 0.15,
                ..DemandSection::default()
            },
            hvac: Some(HvacSection {
                override_start_hour: Some(14),
                override_end_hour: Some(18),
                ..HvacSection::default()
            }),
            grid: GridSection {
                max_import_kw: 800.0,
                demand_charge_per_kw_month: 12.0,
                ..GridSection::default()
            },
            ..Self::hotel()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["hotel", "high_pv", "dr_event"];

    /// Loads a site from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "hotel" => Ok(Self::hotel()),
            "high_pv" => Ok(Self::high_pv()),
            "dr_event" => Ok(Self::dr_event()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a site from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is
    /// invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "site".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a site from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown
    /// fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    pub fn horizon_minutes(&self) -> u32 {
        (self.control.horizon_hours * 60.0).round() as u32
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ConfigError {
                field: field.to_string(),
                message,
            });
        };

        let c = &self.control;
        if Resolution::from_minutes(c.resolution_minutes).is_none() {
            push(
                "control.resolution_minutes",
                "must be one of 1, 5, 15, 30, 60".to_string(),
            );
        }
        if c.cadence_minutes == 0 || c.cadence_minutes % c.resolution_minutes.max(1) != 0 {
            push(
                "control.cadence_minutes",
                "must be a positive multiple of control.resolution_minutes".to_string(),
            );
        }
        if self.horizon_minutes() < c.cadence_minutes {
            push(
                "control.horizon_hours",
                "must cover at least one cadence interval".to_string(),
            );
        }
        if c.trailing_window_hours == 0 {
            push("control.trailing_window_hours", "must be >= 1".to_string());
        }
        if c.fetch_timeout_secs <= 0.0 {
            push("control.fetch_timeout_secs", "must be > 0".to_string());
        }
        if c.deadline_margin_secs < 0.0 {
            push("control.deadline_margin_secs", "must be >= 0".to_string());
        }

        if self.solver.time_limit_secs <= 0.0 {
            push("solver.time_limit_secs", "must be > 0".to_string());
        }
        if self.solver.threads == 0 {
            push("solver.threads", "must be >= 1".to_string());
        }
        if self.objective.carbon_price_per_kg < 0.0 {
            push("objective.carbon_price_per_kg", "must be >= 0".to_string());
        }

        let d = &self.demand;
        if d.base_kw <= 0.0 {
            push("demand.base_kw", "must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&d.flexibility) {
            push("demand.flexibility", "must be in [0.0, 1.0]".to_string());
        }

        if let Some(h) = &self.hvac {
            if h.deadband_c <= 0.0 {
                push("hvac.deadband_c", "must be > 0".to_string());
            }
            if h.max_offset_c < h.deadband_c {
                push("hvac.max_offset_c", "must be >= hvac.deadband_c".to_string());
            }
            if h.cop_heat <= 0.0 || h.cop_cool <= 0.0 {
                push("hvac.cop_heat", "COPs must be > 0".to_string());
            }
            if h.heat_capacity_kw <= 0.0 || h.cool_capacity_kw <= 0.0 {
                push("hvac.heat_capacity_kw", "capacities must be > 0".to_string());
            }
            if h.thermal_capacity_kwh_per_c <= 0.0 {
                push("hvac.thermal_capacity_kwh_per_c", "must be > 0".to_string());
            }
            // First-order dynamics need dt strictly below the time constant.
            if h.thermal_mass_hours <= f64::from(c.resolution_minutes) / 60.0 {
                push(
                    "hvac.thermal_mass_hours",
                    "must exceed the grid resolution".to_string(),
                );
            }
            match (h.override_start_hour, h.override_end_hour) {
                (Some(start), Some(end)) => {
                    if start >= 24 || end >= 24 {
                        push("hvac.override_start_hour", "hours must be < 24".to_string());
                    }
                }
                (None, None) => {}
                _ => push(
                    "hvac.override_start_hour",
                    "override window needs both start and end".to_string(),
                ),
            }
        }

        if let Some(b) = &self.battery {
            if b.capacity_kwh <= 0.0 {
                push("battery.capacity_kwh", "must be > 0".to_string());
            }
            if b.c_rate <= 0.0 {
                push("battery.c_rate", "must be > 0".to_string());
            }
            if !(0.0..=1.0).contains(&b.charge_efficiency)
                || b.charge_efficiency == 0.0
                || !(0.0..=1.0).contains(&b.discharge_efficiency)
                || b.discharge_efficiency == 0.0
            {
                push(
                    "battery.charge_efficiency",
                    "efficiencies must be in (0.0, 1.0]".to_string(),
                );
            }
            if !(0.0..1.0).contains(&b.min_soc_frac) {
                push("battery.min_soc_frac", "must be in [0.0, 1.0)".to_string());
            }
            if let Some(f) = b.final_soc_frac
                && !(b.min_soc_frac..=1.0).contains(&f)
            {
                push(
                    "battery.final_soc_frac",
                    "must be in [min_soc_frac, 1.0]".to_string(),
                );
            }
            if b.max_cycles_per_day <= 0.0 {
                push("battery.max_cycles_per_day", "must be > 0".to_string());
            }
            if !(0.0..1.0).contains(&b.self_discharge_per_hour) {
                push(
                    "battery.self_discharge_per_hour",
                    "must be in [0.0, 1.0)".to_string(),
                );
            }
        }

        if let Some(p) = &self.pv
            && p.capacity_kw <= 0.0
        {
            push("pv.capacity_kw", "must be > 0".to_string());
        }

        let g = &self.grid;
        if g.max_import_kw <= 0.0 {
            push("grid.max_import_kw", "must be > 0".to_string());
        }
        if g.max_export_kw < 0.0 {
            push("grid.max_export_kw", "must be >= 0".to_string());
        }
        if let Some(prices) = &g.tou_prices
            && prices.len() != 24
        {
            push("grid.tou_prices", "must have exactly 24 entries".to_string());
        }
        if let Some(ci) = &g.carbon_hourly
            && ci.len() != 24
        {
            push(
                "grid.carbon_hourly",
                "must have exactly 24 entries".to_string(),
            );
        }
        if !(0.0..=1.0).contains(&g.feed_in_fraction) {
            push("grid.feed_in_fraction", "must be in [0.0, 1.0]".to_string());
        }
        if g.demand_charge_per_kw_month < 0.0 {
            push("grid.demand_charge_per_kw_month", "must be >= 0".to_string());
        }

        if self.sim.noise_fraction < 0.0 {
            push("sim.noise_fraction", "must be >= 0".to_string());
        }

        errors
    }

    /// Instantiates the component fleet this configuration describes,
    /// objective included. Call after [`SiteConfig::validate`].
    pub fn build_components(&self) -> Vec<Component> {
        let mut components = Vec::new();

        let mut demand = DemandUnit::new("demand", &self.demand.device);
        demand.base_kw = self.demand.base_kw;
        demand.flexibility = self.demand.flexibility;
        demand.comfort_penalty_per_kwh = self.demand.comfort_penalty_per_kwh;
        components.push(Component::ElectricDemand(demand));

        if let Some(h) = &self.hvac {
            let mut hvac = HvacUnit::new("hvac", &h.zone_device, &h.weather_device);
            hvac.setpoint_c = h.setpoint_c;
            hvac.deadband_c = h.deadband_c;
            hvac.max_offset_c = h.max_offset_c;
            hvac.comfort_penalty_per_deg_h = h.comfort_penalty_per_deg_h;
            hvac.heat_capacity_kw = h.heat_capacity_kw;
            hvac.cool_capacity_kw = h.cool_capacity_kw;
            hvac.cop_heat = h.cop_heat;
            hvac.cop_cool = h.cop_cool;
            hvac.thermal_mass_hours = h.thermal_mass_hours;
            hvac.thermal_capacity_kwh_per_c = h.thermal_capacity_kwh_per_c;
            if let (Some(start), Some(end)) = (h.override_start_hour, h.override_end_hour) {
                hvac.override_window = Some(HourWindow::new(start, end));
            }
            components.push(Component::Hvac(hvac));
        }

        if let Some(b) = &self.battery {
            let mut battery = BatteryUnit::new("battery", &b.device);
            battery.capacity_kwh = b.capacity_kwh;
            battery.c_rate = b.c_rate;
            battery.charge_efficiency = b.charge_efficiency;
            battery.discharge_efficiency = b.discharge_efficiency;
            battery.self_discharge_per_hour = b.self_discharge_per_hour;
            battery.min_soc_frac = b.min_soc_frac;
            battery.final_soc_frac = b.final_soc_frac;
            battery.max_cycles_per_day = b.max_cycles_per_day;
            battery.throughput_cost_per_kwh = b.throughput_cost_per_kwh;
            components.push(Component::Battery(battery));
        }

        if let Some(p) = &self.pv {
            let mut pv = PvUnit::new("pv", &p.inverter_device, &p.weather_device);
            pv.capacity_kw = p.capacity_kw;
            components.push(Component::SolarPv(pv));
        }

        let mut tie = GridTie::new("grid");
        tie.max_import_kw = self.grid.max_import_kw;
        tie.max_export_kw = self.grid.max_export_kw;
        tie.tariff = match &self.grid.price_device {
            Some(device) => TariffSchedule::RealTime {
                device: device.clone(),
                channel: self.grid.price_channel.clone(),
            },
            None => TariffSchedule::TimeOfUse(self.grid.tou_price_table()),
        };
        tie.feed_in = match self.grid.feed_in_flat {
            Some(rate) => FeedInTariff::Flat(rate),
            None => FeedInTariff::FractionOfImport(self.grid.feed_in_fraction),
        };
        tie.carbon = match &self.grid.carbon_hourly {
            Some(ci) if ci.len() == 24 => {
                let mut table = [0.0; 24];
                table.copy_from_slice(ci);
                CarbonIntensity::Hourly(table)
            }
            _ => CarbonIntensity::Flat(self.grid.carbon_kg_per_kwh),
        };
        tie.demand_charge_per_kw = self.grid.demand_charge_per_kw_month
            * self.control.horizon_hours
            / HOURS_PER_MONTH;
        components.push(Component::GridConnection(tie));

        components.push(Component::SystemObjective(SystemObjective::with_carbon_price(
            self.objective.carbon_price_per_kg,
        )));

        components
    }

    /// Loop parameters for [`crate::controller::Controller`]. Call after
    /// [`SiteConfig::validate`].
    pub fn to_controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            site: self.site.name.clone(),
            resolution: Resolution::from_minutes(self.control.resolution_minutes)
                .unwrap_or(Resolution::Min15),
            horizon_minutes: self.horizon_minutes(),
            cadence_minutes: self.control.cadence_minutes,
            trailing_window_hours: self.control.trailing_window_hours,
            staleness_minutes: self.control.staleness_minutes,
            fetch_timeout: Duration::from_secs_f64(self.control.fetch_timeout_secs),
            failure_alert_threshold: self.control.failure_alert_threshold,
            deadline_margin_secs: self.control.deadline_margin_secs,
            command_threshold_kw: self.control.command_threshold_kw,
            solver: SolverOptions {
                time_limit_secs: self.solver.time_limit_secs,
                gap_tolerance: self.solver.gap_tolerance,
                threads: self.solver.threads,
            },
        }
    }
}
