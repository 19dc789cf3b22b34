//! Controller entry point: CLI wiring and config-driven loop construction.

use std::path::Path;
use std::process;
use std::sync::Arc;

use chrono::Utc;
use tracing_subscriber::EnvFilter;

use bems_ctl::config::SiteConfig;
use bems_ctl::controller::{Controller, CycleOutcome};
use bems_ctl::dispatch::DispatchSink;
use bems_ctl::io::export::export_csv;
use bems_ctl::report::{CommittedRecord, RunSummary};
use bems_ctl::sim::{RecordingSink, SimTelemetrySource};
use bems_ctl::solver::{MicrolpSolver, Solver};
use bems_ctl::state::StateStore;
use bems_ctl::telemetry::TelemetrySource;

/// Parsed CLI arguments.
struct CliArgs {
    config_path: Option<String>,
    preset: Option<String>,
    cycles: u64,
    seed_override: Option<u64>,
    csv_out: Option<String>,
    state_path: Option<String>,
}

fn print_help() {
    eprintln!("bems-ctl: automated energy-dispatch controller, demo against a simulated site");
    eprintln!();
    eprintln!("Usage: bems-ctl [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>   Load site from a TOML config file");
    eprintln!("  --preset <name>   Use a built-in preset (hotel, high_pv, dr_event)");
    eprintln!("  --cycles <n>      Number of control cycles to run (default: 8)");
    eprintln!("  --seed <u64>      Override the simulation random seed");
    eprintln!("  --csv <path>      Export committed records to CSV");
    eprintln!("  --state <path>    Persist window state to a JSON file");
    eprintln!("  --help            Show this help message");
    eprintln!();
    eprintln!("If no --config or --preset is given, the hotel preset is used.");
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: None,
        preset: None,
        cycles: 8,
        seed_override: None,
        csv_out: None,
        state_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --config requires a path argument");
                    process::exit(1);
                }
                cli.config_path = Some(args[i].clone());
            }
            "--preset" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --preset requires a name argument");
                    process::exit(1);
                }
                cli.preset = Some(args[i].clone());
            }
            "--cycles" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --cycles requires a count argument");
                    process::exit(1);
                }
                if let Ok(n) = args[i].parse::<u64>() {
                    cli.cycles = n;
                } else {
                    eprintln!("error: --cycles value \"{}\" is not a valid u64", args[i]);
                    process::exit(1);
                }
            }
            "--seed" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --seed requires a u64 argument");
                    process::exit(1);
                }
                if let Ok(s) = args[i].parse::<u64>() {
                    cli.seed_override = Some(s);
                } else {
                    eprintln!("error: --seed value \"{}\" is not a valid u64", args[i]);
                    process::exit(1);
                }
            }
            "--csv" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --csv requires a path argument");
                    process::exit(1);
                }
                cli.csv_out = Some(args[i].clone());
            }
            "--state" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --state requires a path argument");
                    process::exit(1);
                }
                cli.state_path = Some(args[i].clone());
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

async fn run(config: SiteConfig, cli: CliArgs) {
    let settings = config.to_controller_settings();
    let battery_capacity_kwh = config
        .battery
        .as_ref()
        .map(|b| b.capacity_kwh)
        .unwrap_or_default();

    let source: Arc<dyn TelemetrySource> =
        Arc::new(SimTelemetrySource::from_config(&config, config.sim.seed));
    let sink: Arc<dyn DispatchSink> = Arc::new(RecordingSink::new());
    let solver: Arc<dyn Solver> = Arc::new(MicrolpSolver::new());
    let store = match &cli.state_path {
        Some(path) => StateStore::at(path),
        None => StateStore::ephemeral(),
    };

    let mut controller = match Controller::new(
        settings,
        config.build_components(),
        source,
        sink,
        solver,
        store,
        Utc::now(),
    ) {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("error: cannot load window state: {e}");
            process::exit(1);
        }
    };

    // Cycles run back to back; the cadence interval only matters to the
    // planning window, not to the demo clock.
    let mut reports = Vec::with_capacity(cli.cycles as usize);
    for _ in 0..cli.cycles {
        let report = controller.run_cycle().await;
        println!("{report}");
        reports.push(report);
    }

    // Show the wire format of whatever the final committed cycle dispatched.
    if let Some(commands) = reports.iter().rev().find_map(|r| match &r.outcome {
        CycleOutcome::Committed { commands, .. } => Some(commands),
        CycleOutcome::Failed { .. } => None,
    }) && !commands.is_empty()
    {
        println!("\n--- Last dispatch ---");
        for command in commands {
            if let Ok(line) = serde_json::to_string(command) {
                println!("{line}");
            }
        }
    }

    let summary = RunSummary::from_reports(&reports, battery_capacity_kwh);
    println!("\n{summary}");

    if let Some(ref path) = cli.csv_out {
        let records: Vec<CommittedRecord> = reports
            .iter()
            .filter_map(|r| match &r.outcome {
                CycleOutcome::Committed { records, .. } => Some(records.clone()),
                CycleOutcome::Failed { .. } => None,
            })
            .flatten()
            .collect();
        if let Err(e) = export_csv(&records, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Committed records written to {path}");
    }
}

fn main() {
    let cli = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // Load config: --config takes priority, then --preset, then the hotel
    // default.
    let mut config = if let Some(ref path) = cli.config_path {
        match SiteConfig::from_toml_file(Path::new(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else if let Some(ref name) = cli.preset {
        match SiteConfig::from_preset(name) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else {
        SiteConfig::hotel()
    };

    if let Some(seed) = cli.seed_override {
        config.sim.seed = seed;
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("error: failed to create tokio runtime: {e}");
        process::exit(1);
    });
    rt.block_on(run(config, cli));
}
