use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::cistern::{is_reading_valid, Reading};

use super::history::RunHistory;
use super::state::{PumpCommand, PumpState};

/// Control parameters, fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Fill level at or above which the pump must not run.
    pub desired_level: f64,
    pub poll_interval: Duration,
    /// Longest continuous run before the pump is forced off.
    pub max_run_time: Duration,
    /// Minimum idle time after an off before the next start.
    pub cooldown: Duration,
    /// Window over which the level must have moved while running.
    pub level_must_move_window: Duration,
    /// Minimum cumulative level change over the window.
    pub level_change_threshold: f64,
}

/// The pump state machine, stepped once per tick by the control loop.
///
/// `decide` is free of I/O and clock reads; the loop hands it the latest
/// reading and both "now"s (monotonic for elapsed-time guards, wall clock
/// for reading freshness), which keeps every transition testable without
/// timers.
pub struct PumpController {
    state: PumpState,
    tuning: Tuning,
    /// Most recent OFF→ON edge. `None` until the pump first runs, which
    /// deliberately leaves the runtime guard permissive at startup.
    pump_on_time: Option<Instant>,
    /// Most recent ON→OFF edge. `None` means the cooldown gate is open.
    pump_off_time: Option<Instant>,
    level_at_pump_on: Option<f64>,
    run_history: RunHistory,
}

impl PumpController {
    pub fn new(tuning: Tuning) -> Self {
        let run_history = RunHistory::with_window(tuning.level_must_move_window, tuning.poll_interval);
        Self {
            state: PumpState::Off,
            tuning,
            pump_on_time: None,
            pump_off_time: None,
            level_at_pump_on: None,
            run_history,
        }
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    pub fn pump_on_time(&self) -> Option<Instant> {
        self.pump_on_time
    }

    pub fn pump_off_time(&self) -> Option<Instant> {
        self.pump_off_time
    }

    pub fn run_history(&self) -> &RunHistory {
        &self.run_history
    }

    /// Evaluate one tick: consume the latest (possibly absent) reading and
    /// produce the relay command, updating the state machine.
    ///
    /// Rule order matters: the fault latch and the runtime cutoff are
    /// checked before the reading is even considered, so no transient
    /// sensor data can override a hard safety limit.
    pub fn decide(
        &mut self,
        reading: Option<&Reading>,
        now: Instant,
        wall_now: DateTime<Utc>,
    ) -> PumpCommand {
        // Once faulted, stay faulted. Only a restart clears this.
        if self.state == PumpState::Fault {
            return self.command_off(PumpState::Fault, now);
        }

        if self.state == PumpState::On && !self.max_runtime_allows_running(now) {
            info!("max allowed runtime exceeded, pump off");
            return self.command_off(PumpState::Off, now);
        }

        // One missed poll is tolerated, two are not.
        let max_age = self.tuning.poll_interval * 2;
        let reading = match reading {
            Some(reading) if is_reading_valid(Some(reading), wall_now, max_age) => reading,
            _ => {
                warn!("unable to get a valid reading, pump off");
                return self.command_off(PumpState::CommError, now);
            }
        };

        if reading.level >= self.tuning.desired_level {
            debug!(
                "not running pump, level is {} desired is {}",
                reading.level, self.tuning.desired_level
            );
            return self.command_off(PumpState::Off, now);
        }

        // Below target: we want to run, if the safety gates agree.
        if (self.state != PumpState::On && self.cooldown_allows_running(now))
            || (self.state == PumpState::On
                && self.pipe_break_detect_allows_running(now)
                && self.max_runtime_allows_running(now))
        {
            info!(
                "running pump, level is {} desired is {}",
                reading.level, self.tuning.desired_level
            );
            return self.command_on(now, reading.level);
        }

        if self.state != PumpState::On && !self.cooldown_allows_running(now) {
            info!(
                "not running pump, level is {} desired is {}, within cooldown period",
                reading.level, self.tuning.desired_level
            );
            return self.command_off(PumpState::Off, now);
        }

        if self.state == PumpState::On && !self.max_runtime_allows_running(now) {
            info!(
                "not running pump, level is {} desired is {}, exceeded max runtime",
                reading.level, self.tuning.desired_level
            );
            return self.command_off(PumpState::Off, now);
        }

        if self.state == PumpState::On && !self.pipe_break_detect_allows_running(now) {
            warn!(
                "fault! level is {} desired is {}, pipe break suspected",
                reading.level, self.tuning.desired_level
            );
            return self.command_off(PumpState::Fault, now);
        }

        // Anything not reasoned about above fails safe.
        warn!(
            "fault! level is {} state is {:?}, unsupported state condition",
            reading.level, self.state
        );
        self.command_off(PumpState::Fault, now)
    }

    /// Transition to `next` (an off-commanding state), recording the off
    /// edge only when the pump was actually running. Repeating an off
    /// command never moves `pump_off_time`.
    fn command_off(&mut self, next: PumpState, now: Instant) -> PumpCommand {
        if self.state == PumpState::On {
            self.pump_off_time = Some(now);
        }
        self.state = next;
        PumpCommand::Off
    }

    /// Keep or start running. The history resets on a real OFF→ON edge and
    /// accumulates one sample per tick the pump stays on.
    fn command_on(&mut self, now: Instant, level: f64) -> PumpCommand {
        if self.state != PumpState::On {
            self.run_history.clear();
            self.pump_on_time = Some(now);
            self.level_at_pump_on = Some(level);
        } else {
            self.run_history.push(now, level);
        }
        self.state = PumpState::On;
        PumpCommand::On
    }

    fn max_runtime_allows_running(&self, now: Instant) -> bool {
        match self.pump_on_time {
            Some(on) => now.duration_since(on) < self.tuning.max_run_time,
            None => true,
        }
    }

    fn cooldown_allows_running(&self, now: Instant) -> bool {
        match self.pump_off_time {
            Some(off) => now.duration_since(off) > self.tuning.cooldown,
            None => true,
        }
    }

    fn pipe_break_detect_allows_running(&self, now: Instant) -> bool {
        let Some(on) = self.pump_on_time else {
            return true;
        };
        let running_for = now.duration_since(on);
        if running_for < self.tuning.level_must_move_window {
            // Not enough run time to judge movement yet.
            return true;
        }
        let change = self.run_history.cumulative_change();
        debug!(
            "running for {}s since starting at level {:?}, cumulative change {} threshold {}",
            running_for.as_secs(),
            self.level_at_pump_on,
            change,
            self.tuning.level_change_threshold
        );
        change > self.tuning.level_change_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const POLL: Duration = Duration::from_secs(10);

    fn tuning() -> Tuning {
        Tuning {
            desired_level: 0.8,
            poll_interval: POLL,
            max_run_time: Duration::from_secs(120),
            cooldown: Duration::from_secs(60),
            level_must_move_window: Duration::from_secs(30),
            level_change_threshold: 0.05,
        }
    }

    /// Paired monotonic/wall clocks so readings are always fresh unless a
    /// test says otherwise.
    struct Clock {
        t0: Instant,
        w0: DateTime<Utc>,
    }

    impl Clock {
        fn new() -> Self {
            Self {
                t0: Instant::now(),
                w0: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            }
        }

        fn at(&self, secs: u64) -> (Instant, DateTime<Utc>) {
            (
                self.t0 + Duration::from_secs(secs),
                self.w0 + chrono::Duration::seconds(secs as i64),
            )
        }

        /// Tick with a fresh reading of `level` at `secs`.
        fn tick(&self, c: &mut PumpController, level: f64, secs: u64) -> PumpCommand {
            let (now, wall) = self.at(secs);
            let reading = Reading {
                level,
                timestamp: wall,
            };
            c.decide(Some(&reading), now, wall)
        }

        /// Tick with no reading at all.
        fn tick_absent(&self, c: &mut PumpController, secs: u64) -> PumpCommand {
            let (now, wall) = self.at(secs);
            c.decide(None, now, wall)
        }
    }

    /// Drive a fresh controller into a confirmed stall fault.
    fn faulted(clock: &Clock) -> PumpController {
        let mut c = PumpController::new(tuning());
        assert_eq!(clock.tick(&mut c, 0.2, 0), PumpCommand::On);
        for secs in [10, 20] {
            assert_eq!(clock.tick(&mut c, 0.2, secs), PumpCommand::On);
        }
        assert_eq!(clock.tick(&mut c, 0.2, 30), PumpCommand::Off);
        assert_eq!(c.state(), PumpState::Fault);
        c
    }

    #[test]
    fn starts_off_with_open_gates() {
        let c = PumpController::new(tuning());
        assert_eq!(c.state(), PumpState::Off);
        assert_eq!(c.pump_on_time(), None);
        assert_eq!(c.pump_off_time(), None);
    }

    #[test]
    fn first_below_target_reading_starts_the_pump() {
        // Fresh process: no previous off edge, so cooldown does not apply.
        let clock = Clock::new();
        let mut c = PumpController::new(tuning());
        assert_eq!(clock.tick(&mut c, 0.2, 0), PumpCommand::On);
        assert_eq!(c.state(), PumpState::On);
        assert_eq!(c.pump_on_time(), Some(clock.at(0).0));
    }

    #[test]
    fn at_or_above_target_turns_off() {
        let clock = Clock::new();
        let mut c = PumpController::new(tuning());
        clock.tick(&mut c, 0.2, 0);
        // Exactly at target counts as reached.
        assert_eq!(clock.tick(&mut c, 0.8, 10), PumpCommand::Off);
        assert_eq!(c.state(), PumpState::Off);
    }

    #[test]
    fn target_reached_turns_off_from_comm_error_too() {
        let clock = Clock::new();
        let mut c = PumpController::new(tuning());
        clock.tick_absent(&mut c, 0);
        assert_eq!(c.state(), PumpState::CommError);
        assert_eq!(clock.tick(&mut c, 0.9, 10), PumpCommand::Off);
        assert_eq!(c.state(), PumpState::Off);
    }

    #[test]
    fn absent_reading_goes_comm_error_and_off() {
        let clock = Clock::new();
        let mut c = PumpController::new(tuning());
        clock.tick(&mut c, 0.2, 0);
        assert_eq!(c.state(), PumpState::On);
        // Sensor down while running: off no later than this tick.
        assert_eq!(clock.tick_absent(&mut c, 10), PumpCommand::Off);
        assert_eq!(c.state(), PumpState::CommError);
        assert_eq!(clock.tick_absent(&mut c, 20), PumpCommand::Off);
        assert_eq!(c.state(), PumpState::CommError);
    }

    #[test]
    fn stale_reading_goes_comm_error() {
        let clock = Clock::new();
        let mut c = PumpController::new(tuning());
        let (now, wall) = clock.at(40);
        // Stamped two polls ago: age == 2 × poll is already invalid.
        let stale = Reading {
            level: 0.2,
            timestamp: wall - chrono::Duration::seconds(20),
        };
        assert_eq!(c.decide(Some(&stale), now, wall), PumpCommand::Off);
        assert_eq!(c.state(), PumpState::CommError);
    }

    #[test]
    fn comm_error_recovers_when_readings_return() {
        let clock = Clock::new();
        let mut c = PumpController::new(tuning());
        clock.tick_absent(&mut c, 0);
        assert_eq!(c.state(), PumpState::CommError);
        // Never ran, so no cooldown stands in the way.
        assert_eq!(clock.tick(&mut c, 0.2, 10), PumpCommand::On);
        assert_eq!(c.state(), PumpState::On);
    }

    #[test]
    fn runtime_cutoff_forces_off_regardless_of_level() {
        let mut t = tuning();
        t.max_run_time = Duration::from_secs(60);
        let clock = Clock::new();
        let mut c = PumpController::new(t);
        clock.tick(&mut c, 0.2, 0);
        for secs in (10..60).step_by(10) {
            // Keep the level moving so the stall gate stays open.
            clock.tick(&mut c, 0.2 + secs as f64 * 0.006, secs);
        }
        assert_eq!(c.state(), PumpState::On);
        // Elapsed run time hits max_run_time exactly: forced off.
        assert_eq!(clock.tick(&mut c, 0.5, 60), PumpCommand::Off);
        assert_eq!(c.state(), PumpState::Off);
        assert_eq!(c.pump_off_time(), Some(clock.at(60).0));
    }

    #[test]
    fn cooldown_withholds_restart_until_strictly_elapsed() {
        let clock = Clock::new();
        let mut c = PumpController::new(tuning());
        clock.tick(&mut c, 0.2, 0);
        // Target reached at t=10: off edge recorded.
        clock.tick(&mut c, 0.9, 10);
        assert_eq!(c.pump_off_time(), Some(clock.at(10).0));

        // Below target again, but only 50s into a 60s cooldown.
        assert_eq!(clock.tick(&mut c, 0.2, 60), PumpCommand::Off);
        assert_eq!(c.state(), PumpState::Off);
        // Exactly at the cooldown boundary still withholds.
        assert_eq!(clock.tick(&mut c, 0.2, 70), PumpCommand::Off);
        // Strictly past it, the pump restarts.
        assert_eq!(clock.tick(&mut c, 0.2, 80), PumpCommand::On);
        assert_eq!(c.state(), PumpState::On);
    }

    #[test]
    fn repeated_off_commands_do_not_move_the_off_edge() {
        let clock = Clock::new();
        let mut c = PumpController::new(tuning());
        clock.tick(&mut c, 0.2, 0);
        clock.tick(&mut c, 0.9, 10);
        let first_off = c.pump_off_time();
        assert_eq!(clock.tick(&mut c, 0.9, 20), PumpCommand::Off);
        assert_eq!(clock.tick(&mut c, 0.9, 30), PumpCommand::Off);
        assert_eq!(c.pump_off_time(), first_off);
    }

    #[test]
    fn continued_running_does_not_move_the_on_edge() {
        let clock = Clock::new();
        let mut c = PumpController::new(tuning());
        clock.tick(&mut c, 0.2, 0);
        let first_on = c.pump_on_time();
        clock.tick(&mut c, 0.25, 10);
        assert_eq!(c.pump_on_time(), first_on);
    }

    #[test]
    fn flat_level_past_window_faults() {
        let clock = Clock::new();
        let c = faulted(&clock);
        assert_eq!(c.state(), PumpState::Fault);
    }

    #[test]
    fn moving_level_keeps_running_past_window() {
        let clock = Clock::new();
        let mut c = PumpController::new(tuning());
        clock.tick(&mut c, 0.20, 0);
        clock.tick(&mut c, 0.26, 10);
        clock.tick(&mut c, 0.32, 20);
        // Past the 30s window, but the recorded change clears the threshold.
        assert_eq!(clock.tick(&mut c, 0.38, 30), PumpCommand::On);
        assert_eq!(c.state(), PumpState::On);
    }

    #[test]
    fn fault_latches_against_every_input() {
        let clock = Clock::new();
        let mut c = faulted(&clock);
        // Valid below-target reading.
        assert_eq!(clock.tick(&mut c, 0.1, 40), PumpCommand::Off);
        assert_eq!(c.state(), PumpState::Fault);
        // Valid at-target reading.
        assert_eq!(clock.tick(&mut c, 0.9, 50), PumpCommand::Off);
        assert_eq!(c.state(), PumpState::Fault);
        // No reading at all.
        assert_eq!(clock.tick_absent(&mut c, 60), PumpCommand::Off);
        assert_eq!(c.state(), PumpState::Fault);
        // Even hours later.
        assert_eq!(clock.tick(&mut c, 0.1, 7200), PumpCommand::Off);
        assert_eq!(c.state(), PumpState::Fault);
    }

    #[test]
    fn history_resets_on_each_fresh_start() {
        let clock = Clock::new();
        let mut c = PumpController::new(tuning());
        clock.tick(&mut c, 0.2, 0);
        clock.tick(&mut c, 0.3, 10);
        clock.tick(&mut c, 0.4, 20);
        assert_eq!(c.run_history().len(), 2);
        // Target reached, then a restart after cooldown.
        clock.tick(&mut c, 0.9, 30);
        assert_eq!(clock.tick(&mut c, 0.2, 100), PumpCommand::On);
        assert!(c.run_history().is_empty());
    }

    #[test]
    fn below_target_sequence_starts_pump_with_zero_cooldown() {
        let mut t = tuning();
        t.cooldown = Duration::ZERO;
        let clock = Clock::new();
        let mut c = PumpController::new(t);
        // First valid below-target reading flips OFF→ON.
        assert_eq!(clock.tick(&mut c, 0.2, 0), PumpCommand::On);
        assert_eq!(c.state(), PumpState::On);
        assert_eq!(clock.tick(&mut c, 0.2, 10), PumpCommand::On);
    }
}
