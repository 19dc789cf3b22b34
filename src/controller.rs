//! The rolling-horizon control loop.
//!
//! Each cycle walks Idle -> Fetching -> Building -> Solving -> Committing
//! and back to Idle, or drops into ErrorBackoff at the first fatal step.
//! The window anchor advances by exactly one cadence per cycle either way,
//! so the plan stays aligned with wall time across outages.

use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::components::Component;
use crate::dispatch::{DispatchCommand, DispatchSink, build_commands};
use crate::error::{CycleError, DataQualityWarning, SolveError, StateError};
use crate::grid::{Resolution, TimeGrid, align_to_resolution};
use crate::report::{CommittedRecord, committed_records};
use crate::scenario::Scenario;
use crate::solver::{SolveStatus, Solver, SolverOptions};
use crate::state::{StateStore, WindowState};
use crate::telemetry::{TelemetryAdapter, TelemetrySource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Building,
    Solving,
    Committing,
    ErrorBackoff,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Fetching => "fetching",
            CyclePhase::Building => "building",
            CyclePhase::Solving => "solving",
            CyclePhase::Committing => "committing",
            CyclePhase::ErrorBackoff => "error_backoff",
        };
        f.write_str(name)
    }
}

/// Loop parameters, usually produced from [`crate::config::SiteConfig`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub site: String,
    pub resolution: Resolution,
    pub horizon_minutes: u32,
    /// How far the window advances per cycle, and how much of each plan is
    /// committed. Must be a multiple of the resolution.
    pub cadence_minutes: u32,
    pub trailing_window_hours: u32,
    pub staleness_minutes: i64,
    pub fetch_timeout: StdDuration,
    /// Consecutive failed cycles before the report is flagged for an
    /// operator.
    pub failure_alert_threshold: u32,
    /// Grace on top of the solver time limit before the cycle is abandoned.
    pub deadline_margin_secs: f64,
    /// Dispatch quantities below this are not worth commanding.
    pub command_threshold_kw: f64,
    pub solver: SolverOptions,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            site: "site".to_string(),
            resolution: Resolution::Min15,
            horizon_minutes: 24 * 60,
            cadence_minutes: 60,
            trailing_window_hours: 24,
            staleness_minutes: 30,
            fetch_timeout: StdDuration::from_secs(5),
            failure_alert_threshold: 3,
            deadline_margin_secs: 5.0,
            command_threshold_kw: 0.5,
            solver: SolverOptions::default(),
        }
    }
}

impl ControllerSettings {
    /// Grid steps per committed interval.
    pub fn committed_step_count(&self) -> usize {
        (self.cadence_minutes / self.resolution.minutes()) as usize
    }

    fn solve_deadline(&self) -> StdDuration {
        StdDuration::from_secs_f64(self.solver.time_limit_secs + self.deadline_margin_secs)
    }
}

/// What one cycle produced.
#[derive(Debug)]
pub enum CycleOutcome {
    Committed {
        objective: f64,
        gap: f64,
        solve_wall: StdDuration,
        records: Vec<CommittedRecord>,
        commands: Vec<DispatchCommand>,
        /// Publish attempts that failed; logged, never cycle-fatal.
        publish_failures: usize,
    },
    Failed {
        error: CycleError,
        /// Commands from the last committed plan re-sent during backoff.
        retransmitted: usize,
    },
}

impl CycleOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CycleOutcome::Committed { .. })
    }
}

#[derive(Debug)]
pub struct CycleReport {
    pub cycle: u64,
    /// Window anchor the cycle planned from.
    pub anchor: DateTime<Utc>,
    pub outcome: CycleOutcome,
    pub warnings: Vec<DataQualityWarning>,
    /// Set when the consecutive-failure threshold was reached.
    pub escalated: bool,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle {:>3} @ {}: ", self.cycle, self.anchor.format("%Y-%m-%d %H:%M"))?;
        match &self.outcome {
            CycleOutcome::Committed {
                objective,
                records,
                commands,
                ..
            } => write!(
                f,
                "committed {} steps, {} commands, objective {:.2}",
                records.len(),
                commands.len(),
                objective
            )?,
            CycleOutcome::Failed {
                error,
                retransmitted,
            } => write!(f, "FAILED ({error}), retransmitted {retransmitted} commands")?,
        }
        if !self.warnings.is_empty() {
            write!(f, ", {} warnings", self.warnings.len())?;
        }
        if self.escalated {
            write!(f, " [ESCALATED]")?;
        }
        Ok(())
    }
}

/// Drives the fetch/build/solve/commit loop for one site.
pub struct Controller {
    settings: ControllerSettings,
    /// Prototype components; each cycle binds a fresh clone so no solver
    /// state leaks between windows.
    template: Vec<Component>,
    adapter: TelemetryAdapter,
    sink: Arc<dyn DispatchSink>,
    solver: Arc<dyn Solver>,
    store: StateStore,
    state: WindowState,
    cycle: u64,
    phase: CyclePhase,
}

impl Controller {
    /// Loads (or initializes) the site's window state and assembles the
    /// loop. `now` seeds the anchor on a cold start and re-aligns a stale
    /// one after downtime.
    pub fn new(
        settings: ControllerSettings,
        components: Vec<Component>,
        source: Arc<dyn TelemetrySource>,
        sink: Arc<dyn DispatchSink>,
        solver: Arc<dyn Solver>,
        store: StateStore,
        now: DateTime<Utc>,
    ) -> Result<Self, StateError> {
        assert!(
            settings.cadence_minutes > 0
                && settings.cadence_minutes % settings.resolution.minutes() == 0,
            "cadence must be a positive multiple of the resolution"
        );
        assert!(
            settings.horizon_minutes >= settings.cadence_minutes,
            "horizon must cover at least one cadence interval"
        );

        let adapter = TelemetryAdapter::new(
            source,
            settings.fetch_timeout,
            settings.staleness_minutes,
            settings.trailing_window_hours,
        );

        let aligned_now = align_to_resolution(now, settings.resolution);
        let state = match store.load(&settings.site)? {
            Some(mut state) => {
                let drift = (now - state.anchor).num_minutes().abs();
                if drift > i64::from(settings.cadence_minutes) {
                    warn!(
                        site = %settings.site,
                        stale_anchor = %state.anchor,
                        drift_minutes = drift,
                        "window anchor re-aligned to current time"
                    );
                    state.anchor = aligned_now;
                    state.prune_throughput();
                }
                state
            }
            None => WindowState::new(&settings.site, aligned_now),
        };

        Ok(Self {
            settings,
            template: components,
            adapter,
            sink,
            solver,
            store,
            state,
            cycle: 0,
            phase: CyclePhase::Idle,
        })
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn state(&self) -> &WindowState {
        &self.state
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Runs one full cycle against the current anchor and advances the
    /// window. Callable directly, without a timer, for tests and demos.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        let cycle = self.cycle;
        let anchor = self.state.anchor;
        let grid = TimeGrid::new(anchor, self.settings.resolution, self.settings.horizon_minutes);
        debug!(cycle, %anchor, steps = grid.len(), "cycle window opened");

        let mut warnings = Vec::new();
        let (outcome, escalated) = match self.plan(&grid, &mut warnings).await {
            Ok(scenario) => (self.commit(&scenario).await, false),
            Err(error) => self.back_off(cycle, error).await,
        };

        for warning in &warnings {
            debug!(cycle, %warning, "data quality");
        }

        self.state.advance(self.settings.cadence_minutes);
        if let Err(error) = self.store.save(&self.state) {
            error!(site = %self.settings.site, %error, "window state save failed");
        }
        self.phase = CyclePhase::Idle;

        CycleReport {
            cycle,
            anchor,
            outcome,
            warnings,
            escalated,
        }
    }

    /// Runs `max_cycles` cycles on the cadence interval. The first cycle
    /// fires immediately; late ticks are not bunched up.
    pub async fn run(&mut self, max_cycles: u64) -> Vec<CycleReport> {
        let period = StdDuration::from_secs(u64::from(self.settings.cadence_minutes) * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut reports = Vec::with_capacity(max_cycles as usize);
        for _ in 0..max_cycles {
            ticker.tick().await;
            let report = self.run_cycle().await;
            info!("{report}");
            reports.push(report);
        }
        reports
    }

    /// Fetching, Building and Solving. Returns a solved scenario with an
    /// incumbent, or the error that routes the cycle into backoff.
    async fn plan(
        &mut self,
        grid: &TimeGrid,
        warnings: &mut Vec<DataQualityWarning>,
    ) -> Result<Scenario, CycleError> {
        self.phase = CyclePhase::Fetching;
        let mut scenario = Scenario::new(grid.clone());
        for component in self.template.clone() {
            scenario.attach(component);
        }

        let specs = scenario.channel_specs();
        let frame = self.adapter.fetch_frame(&specs, grid).await;
        if frame.is_total_failure() {
            return Err(CycleError::SourceUnavailable {
                failed: frame.failed_fetches,
                attempted: frame.attempted_fetches,
            });
        }
        warnings.extend(frame.warnings.iter().cloned());

        self.phase = CyclePhase::Building;
        warnings.extend(scenario.bind(&frame, &self.state.seed()));
        scenario.build()?;

        self.phase = CyclePhase::Solving;
        let model = match scenario.model() {
            Some(model) => model.clone(),
            None => return Err(CycleError::Solve(SolveError::NotBuilt)),
        };
        let solver = Arc::clone(&self.solver);
        let options = self.settings.solver;
        let handle = tokio::task::spawn_blocking(move || solver.solve(&model, &options));
        // On deadline overrun the blocking solve keeps running detached;
        // its result is discarded.
        let outcome = match tokio::time::timeout(self.settings.solve_deadline(), handle).await {
            Err(_) => return Err(CycleError::DeadlineExceeded),
            Ok(Err(join)) => return Err(CycleError::Solve(SolveError::Backend(join.to_string()))),
            Ok(Ok(Err(error))) => return Err(CycleError::Solve(error)),
            Ok(Ok(Ok(outcome))) => outcome,
        };

        match outcome.status {
            SolveStatus::Optimal | SolveStatus::Feasible => {
                scenario.set_outcome(outcome);
                Ok(scenario)
            }
            SolveStatus::Infeasible => Err(CycleError::Solve(SolveError::Infeasible {
                diagnostics: scenario.diagnose_infeasibility(),
            })),
            SolveStatus::TimeoutNoIncumbent => Err(CycleError::Solve(SolveError::Timeout)),
        }
    }

    /// Committing: extract the first cadence interval, publish commands and
    /// roll the persisted physical state forward.
    async fn commit(&mut self, scenario: &Scenario) -> CycleOutcome {
        self.phase = CyclePhase::Committing;
        let grid = scenario.grid();
        let steps: Vec<usize> =
            (0..self.settings.committed_step_count().min(grid.len())).collect();

        let records = committed_records(scenario, &steps);
        let commands = build_commands(
            scenario,
            &steps,
            self.state.anchor,
            self.settings.command_threshold_kw,
        );

        let mut publish_failures = 0;
        let sink = Arc::clone(&self.sink);
        for command in &commands {
            if let Err(error) = sink.publish(command).await {
                warn!(device = %command.device, %error, "dispatch publish failed");
                publish_failures += 1;
            }
        }

        self.roll_state_forward(scenario, &steps);
        self.state.last_dispatch = commands.clone();
        self.state.consecutive_failures = 0;

        let (objective, gap, solve_wall) = match scenario.outcome() {
            Some(outcome) => (outcome.objective, outcome.gap, outcome.wall_time),
            None => (0.0, 0.0, StdDuration::ZERO),
        };
        info!(
            cycle = self.cycle,
            objective,
            commands = commands.len(),
            publish_failures,
            "cycle committed"
        );

        CycleOutcome::Committed {
            objective,
            gap,
            solve_wall,
            records,
            commands,
            publish_failures,
        }
    }

    /// Carries battery SoC, the throughput ledger and the HVAC thermal
    /// state across the committed interval.
    fn roll_state_forward(&mut self, scenario: &Scenario, steps: &[usize]) {
        let Some(&last) = steps.last() else {
            return;
        };
        let grid = scenario.grid();
        let anchor = self.state.anchor;
        for component in scenario.components() {
            match component {
                Component::Battery(unit) => {
                    if let Some(soc) = scenario.decision_series(unit.id(), "soc") {
                        self.state.battery_soc_kwh = Some(soc[last]);
                    }
                    if let (Some(charge), Some(discharge)) = (
                        scenario.decision_series(unit.id(), "charge"),
                        scenario.decision_series(unit.id(), "discharge"),
                    ) {
                        let moved: f64 = steps
                            .iter()
                            .map(|&t| (charge[t] + discharge[t]) * grid.step_hours(t))
                            .sum();
                        self.state.record_throughput(anchor, moved);
                    }
                }
                Component::Hvac(unit) => {
                    if let Some(temp) = scenario.decision_series(unit.id(), "temp") {
                        self.state.hvac_temp_c = Some(temp[last]);
                    }
                }
                _ => {}
            }
        }
    }

    /// ErrorBackoff: keep the site on the last committed dispatch, count
    /// the failure and escalate past the threshold.
    async fn back_off(&mut self, cycle: u64, error: CycleError) -> (CycleOutcome, bool) {
        self.phase = CyclePhase::ErrorBackoff;

        let sink = Arc::clone(&self.sink);
        let mut retransmitted = 0;
        for command in &self.state.last_dispatch {
            match sink.publish(command).await {
                Ok(()) => retransmitted += 1,
                Err(publish_error) => {
                    warn!(device = %command.device, error = %publish_error, "retransmit failed");
                }
            }
        }

        self.state.consecutive_failures += 1;
        let escalated = self.state.consecutive_failures >= self.settings.failure_alert_threshold;
        if escalated {
            error!(
                site = %self.settings.site,
                consecutive = self.state.consecutive_failures,
                %error,
                "operator alert: repeated cycle failures"
            );
        } else {
            warn!(cycle, consecutive = self.state.consecutive_failures, %error, "cycle failed");
        }

        (
            CycleOutcome::Failed {
                error,
                retransmitted,
            },
            escalated,
        )
    }
}
