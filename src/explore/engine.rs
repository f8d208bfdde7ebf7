use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::ExplorationConfig;
use crate::protocol::{
    format_number, is_homing_alarm, Axis, Direction, MachineSettings, Realtime, Response,
    StatusReport,
};
use crate::sender::reader::SERIAL_ERROR_PREFIX;
use crate::sender::MachineLink;

use super::phase::{AfterUnlock, Await, FinalStep, Phase, Ramp};
use super::report::ExplorationReport;
use super::ExplorationError;

/// A measurement below this share of a known limit is a false trigger.
const KNOWN_LIMIT_RATIO: f64 = 0.8;
/// Without a known limit, a measurement under this many probe steps is a
/// false trigger. Also the minimum backoff, in steps.
const MIN_PROBE_STEPS: f64 = 2.0;
/// Backoff growth per fault recovery.
const RECOVERY_BACKOFF_GROWTH: f64 = 1.5;

/// Result of one [`LimitExplorationEngine::tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No run in progress.
    Idle,
    InProgress,
    Completed(ExplorationReport),
    /// The run gave up; the machine is left as it is.
    Aborted(String),
}

enum Flow {
    Continue,
    Finished,
}

/// Per-run bookkeeping. Dropped when the run completes, aborts or stops.
struct Run {
    id: Uuid,
    axis: Axis,
    pending: VecDeque<Axis>,
    direction: Direction,
    phase: Phase,
    limits: BTreeMap<Axis, f64>,
    retried: BTreeSet<Axis>,
    recoveries: u32,
    backoff_scale: f64,
    /// The settings query timed out with its reply still owed; the next
    /// `ok` or `error:` answers `$$`, not the command sent after it.
    settings_ack_pending: bool,
}

/// Measures axis travel by probing each selected axis into its limit switch.
///
/// Construct once per connection with the exploration parameters and the
/// controller settings known so far; settings read during a run's preflight
/// are merged in and kept for later runs.
pub struct LimitExplorationEngine {
    config: ExplorationConfig,
    settings: MachineSettings,
    known_limits: BTreeMap<Axis, f64>,
    run: Option<Run>,
    messages: Vec<String>,
}

impl LimitExplorationEngine {
    pub fn new(config: ExplorationConfig, settings: MachineSettings) -> Self {
        Self {
            config,
            settings,
            known_limits: BTreeMap::new(),
            run: None,
            messages: Vec::new(),
        }
    }

    /// Limits measured earlier (or entered by the operator). A trigger well
    /// short of a known limit is treated as premature.
    pub fn with_known_limits(mut self, limits: impl IntoIterator<Item = (Axis, f64)>) -> Self {
        self.known_limits.extend(limits);
        self
    }

    pub fn config(&self) -> &ExplorationConfig {
        &self.config
    }

    pub fn settings(&self) -> &MachineSettings {
        &self.settings
    }

    /// Records a controller setting seen on the link.
    pub fn observe_setting(&mut self, number: u32, value: &str) {
        if self.settings.observe(number, value) {
            tracing::debug!(number, value, "setting observed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    pub fn current_axis(&self) -> Option<Axis> {
        self.run.as_ref().map(|run| run.axis)
    }

    pub fn phase(&self) -> Option<&Phase> {
        self.run.as_ref().map(|run| &run.phase)
    }

    /// Takes the human-readable progress messages produced since the last
    /// call.
    pub fn drain_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    // ── lifecycle ────────────────────────────────────────────────────────────

    /// Starts a run over `axes` (duplicates dropped, order kept) and sends the
    /// settings query.
    pub fn start(
        &mut self,
        link: &mut dyn MachineLink,
        axes: &[Axis],
        now: Instant,
    ) -> Result<(), ExplorationError> {
        if self.run.is_some() {
            return Err(ExplorationError::AlreadyRunning);
        }
        if link.is_streaming() {
            return Err(ExplorationError::StreamActive);
        }

        let mut pending = VecDeque::new();
        for axis in axes {
            if !pending.contains(axis) {
                pending.push_back(*axis);
            }
        }
        let Some(axis) = pending.pop_front() else {
            return Err(ExplorationError::NoAxes);
        };

        link.send_line("$$")?;
        let run = Run {
            id: Uuid::new_v4(),
            axis,
            pending,
            direction: self.probe_direction(axis),
            phase: Phase::Preflight {
                started: now,
                query_sent: true,
            },
            limits: BTreeMap::new(),
            retried: BTreeSet::new(),
            recoveries: 0,
            backoff_scale: 1.0,
            settings_ack_pending: false,
        };
        tracing::info!(run_id = %run.id, ?axes, "exploration started");
        let names: Vec<String> = std::iter::once(axis)
            .chain(run.pending.iter().copied())
            .map(|a| a.to_string())
            .collect();
        self.note(format!("Exploring limits: {}", names.join(", ")));
        self.run = Some(run);
        Ok(())
    }

    /// Cancels the run. Motion in progress is held and the controller reset.
    pub fn stop(&mut self, link: &mut dyn MachineLink) {
        let Some(run) = self.run.take() else {
            return;
        };
        if run.phase.in_motion() {
            for command in [Realtime::FeedHold, Realtime::SoftReset] {
                if let Err(e) = link.send_realtime(command) {
                    tracing::warn!(error = %e, ?command, "stop command failed");
                }
            }
        }
        tracing::info!(run_id = %run.id, phase = run.phase.name(), "exploration stopped");
        self.note("Exploration stopped".to_string());
    }

    /// Drains the link, reacts to every line received and issues the next
    /// command the current phase needs.
    pub fn tick(&mut self, link: &mut dyn MachineLink, now: Instant) -> TickOutcome {
        let Some(mut run) = self.run.take() else {
            return TickOutcome::Idle;
        };
        let lines = link.poll();

        match self.step(&mut run, link, &lines, now) {
            Ok(Flow::Continue) => {
                self.run = Some(run);
                TickOutcome::InProgress
            }
            Ok(Flow::Finished) => {
                let report = ExplorationReport::new(
                    run.id,
                    run.limits,
                    run.retried.into_iter().collect(),
                    run.recoveries,
                );
                tracing::info!(run_id = %report.run_id, limits = ?report.limits, "exploration complete");
                self.note(format!("Exploration complete: {}", report.summary()));
                TickOutcome::Completed(report)
            }
            Err(reason) => {
                tracing::error!(
                    run_id = %run.id,
                    axis = %run.axis,
                    phase = run.phase.name(),
                    %reason,
                    "exploration aborted"
                );
                self.note(format!("Exploration aborted: {reason}"));
                TickOutcome::Aborted(reason)
            }
        }
    }

    fn step(
        &mut self,
        run: &mut Run,
        link: &mut dyn MachineLink,
        lines: &[String],
        now: Instant,
    ) -> Result<Flow, String> {
        for line in lines {
            if let Flow::Finished = self.handle_line(run, link, line)? {
                return Ok(Flow::Finished);
            }
        }
        self.advance(run, link, now)?;
        Ok(Flow::Continue)
    }

    // ── inbound ──────────────────────────────────────────────────────────────

    fn handle_line(
        &mut self,
        run: &mut Run,
        link: &mut dyn MachineLink,
        line: &str,
    ) -> Result<Flow, String> {
        if line.starts_with(SERIAL_ERROR_PREFIX) {
            return Err(line.to_string());
        }

        let response = Response::classify(line);
        if run.settings_ack_pending {
            match &response {
                Response::Ok | Response::Error(_) => {
                    tracing::debug!(%line, "late reply to settings query");
                    run.settings_ack_pending = false;
                    return Ok(Flow::Continue);
                }
                Response::Banner(_) => run.settings_ack_pending = false,
                _ => {}
            }
        }

        match response {
            Response::Ok => return Ok(self.on_ack(run, link)),
            Response::Alarm(text) => self.on_fault(run, text, true)?,
            Response::Error(text) => self.on_fault(run, text, false)?,
            Response::Banner(_) => self.on_reset(run)?,
            Response::Status(report) => self.on_status(run, &report),
            Response::Setting { number, value } => self.observe_setting(number, &value),
            response if response.is_unlock_notice() => {
                tracing::debug!(axis = %run.axis, "unlock notice");
            }
            _ => {}
        }
        Ok(Flow::Continue)
    }

    fn on_ack(&mut self, run: &mut Run, link: &mut dyn MachineLink) -> Flow {
        match run.phase.clone() {
            Phase::Preflight {
                query_sent: true, ..
            } => self.preflight_done(run, link),
            Phase::Move {
                travelled_mm,
                awaiting_ack: true,
            } => {
                run.phase = Phase::Move {
                    travelled_mm: travelled_mm + self.config.step_mm,
                    awaiting_ack: false,
                };
            }
            Phase::Unlock { then, attempts, .. } if attempts > 0 => self.unlocked(run, then),
            Phase::Backoff {
                distance_mm,
                recovery,
                wait: Await::Ack,
            } => {
                run.phase = Phase::Backoff {
                    distance_mm,
                    recovery,
                    wait: Await::Idle { last_query: None },
                };
            }
            Phase::Ramp(mut ramp) if ramp.awaiting_ack => {
                let distance = ramp.next_step(self.config.ramp_step_mm);
                ramp.advance(distance);
                run.phase = Phase::Ramp(ramp);
            }
            Phase::PrehomePullOff { wait: Await::Ack } => {
                run.phase = Phase::PrehomePullOff {
                    wait: Await::Idle { last_query: None },
                };
            }
            Phase::Home { wait: Await::Ack } => {
                set_phase(run, Phase::WaitIdle { last_query: None });
            }
            Phase::Finalize {
                step: FinalStep::Unlock,
                wait: Await::Ack,
            } => {
                run.phase = Phase::Finalize {
                    step: FinalStep::Home,
                    wait: Await::Send,
                };
            }
            Phase::Finalize {
                step: FinalStep::Home,
                wait: Await::Ack,
            } => {
                run.phase = Phase::Finalize {
                    step: FinalStep::Home,
                    wait: Await::Idle { last_query: None },
                };
            }
            Phase::Finalize {
                step: FinalStep::Restore,
                wait: Await::Ack,
            } => return Flow::Finished,
            _ => {}
        }
        Flow::Continue
    }

    fn on_status(&mut self, run: &mut Run, report: &StatusReport) {
        if !report.is_idle() {
            return;
        }
        match run.phase.clone() {
            // An outstanding `$X` is answered with `ok`; only trust idle
            // before one was sent.
            Phase::Unlock {
                then, attempts: 0, ..
            } => self.unlocked(run, then),
            Phase::Backoff {
                recovery,
                wait: Await::Idle { .. },
                ..
            } => {
                if recovery {
                    set_phase(run, Phase::PrehomePullOff { wait: Await::Send });
                } else {
                    let ramp = Ramp::plan(
                        self.config.ramp_distance_mm,
                        self.config.ramp_step_mm,
                        self.config.test_feed_mm_min,
                        self.settings.max_rate(run.axis),
                    );
                    set_phase(run, Phase::Ramp(ramp));
                }
            }
            Phase::PrehomePullOff {
                wait: Await::Idle { .. },
            } => set_phase(run, Phase::Home { wait: Await::Send }),
            Phase::WaitIdle { .. } => self.next_axis(run),
            Phase::Finalize {
                step: FinalStep::Home,
                wait: Await::Idle { .. },
            } => {
                run.phase = Phase::Finalize {
                    step: FinalStep::Restore,
                    wait: Await::Send,
                };
            }
            _ => {}
        }
    }

    fn on_fault(&mut self, run: &mut Run, text: String, alarm: bool) -> Result<(), String> {
        if run.phase.expects_alarm() && alarm {
            tracing::debug!(axis = %run.axis, phase = run.phase.name(), line = %text, "alarm");
        }
        match run.phase.clone() {
            Phase::Preflight { .. } if alarm => {
                self.note(format!("{text} before probing; unlocking first"));
                set_phase(run, Phase::unlock(AfterUnlock::StartAxis));
                Ok(())
            }
            Phase::Preflight { .. } => {
                tracing::warn!(line = %text, "settings query rejected");
                Ok(())
            }
            Phase::Move { travelled_mm, .. } if alarm => {
                self.on_limit(run, travelled_mm, &text);
                Ok(())
            }
            Phase::Move { .. } => Err(format!("probe step on {} rejected: {text}", run.axis)),
            // Alarms and lock errors are expected until the unlock lands.
            Phase::Unlock { .. } => Ok(()),
            Phase::Finalize { .. } => self.recover(run, text, AfterUnlock::Finalize),
            _ => self.recover(run, text, AfterUnlock::Recover),
        }
    }

    fn on_reset(&mut self, run: &mut Run) -> Result<(), String> {
        match run.phase.clone() {
            Phase::Preflight { started, .. } => {
                run.phase = Phase::Preflight {
                    started,
                    query_sent: false,
                };
                Ok(())
            }
            Phase::Unlock { then, attempts, .. } => {
                tracing::info!(axis = %run.axis, "controller reset; restarting unlock");
                run.phase = Phase::Unlock {
                    then,
                    reset_sent: true,
                    attempts,
                    last_sent: None,
                };
                Ok(())
            }
            Phase::Move { .. } => Err(format!("controller reset while probing {}", run.axis)),
            Phase::Finalize { .. } => {
                self.recover(run, "controller reset".to_string(), AfterUnlock::Finalize)
            }
            _ => self.recover(run, "controller reset".to_string(), AfterUnlock::Recover),
        }
    }

    // ── transitions ──────────────────────────────────────────────────────────

    fn preflight_done(&mut self, run: &mut Run, link: &dyn MachineLink) {
        let settings = &self.settings;
        tracing::info!(
            homing_dir_mask = settings.homing_dir_mask,
            pull_off_mm = settings.pull_off_mm,
            max_rate = ?settings.max_rate_mm_min,
            "preflight complete"
        );
        if link.status().is_some_and(StatusReport::is_alarm) {
            self.note("Machine is alarmed; unlocking before probing".to_string());
            set_phase(run, Phase::unlock(AfterUnlock::StartAxis));
        } else {
            self.begin_axis(run);
        }
    }

    fn begin_axis(&mut self, run: &mut Run) {
        run.direction = self.probe_direction(run.axis);
        run.backoff_scale = 1.0;
        self.note(format!(
            "Probing {} toward {}",
            run.axis,
            direction_label(run.direction)
        ));
        set_phase(
            run,
            Phase::Move {
                travelled_mm: 0.0,
                awaiting_ack: false,
            },
        );
    }

    fn next_axis(&mut self, run: &mut Run) {
        match run.pending.pop_front() {
            Some(axis) => {
                run.axis = axis;
                self.begin_axis(run);
            }
            None => {
                self.note("All axes measured; homing".to_string());
                set_phase(
                    run,
                    Phase::Finalize {
                        step: FinalStep::Unlock,
                        wait: Await::Send,
                    },
                );
            }
        }
    }

    /// Caller-supplied limit for `axis`, else the controller's max travel
    /// when configured to trust it.
    fn known_limit(&self, axis: Axis) -> Option<f64> {
        self.known_limits.get(&axis).copied().or_else(|| {
            self.config
                .trust_controller_travel
                .then(|| self.settings.max_travel(axis))
                .flatten()
                .filter(|travel| *travel > 0.0)
        })
    }

    fn on_limit(&mut self, run: &mut Run, travelled_mm: f64, alarm: &str) {
        let axis = run.axis;
        let measured = travelled_mm - self.config.margin_mm;
        let known = self.known_limit(axis);
        let premature = is_premature(measured, self.config.step_mm, known);

        if premature && run.retried.insert(axis) {
            run.direction = run.direction.flipped();
            tracing::warn!(%axis, travelled_mm, ?known, "premature trigger; reversing");
            self.note(format!(
                "{alarm} on {axis} after {} mm looks premature; retrying toward {}",
                format_number(travelled_mm),
                direction_label(run.direction)
            ));
            set_phase(run, Phase::unlock(AfterUnlock::Reprobe));
            return;
        }

        if premature {
            tracing::warn!(%axis, measured, "short trigger after retry; accepting");
        }
        let limit = measured.max(0.0);
        run.limits.insert(axis, limit);
        self.note(format!("{axis} limit: {} mm", format_number(limit)));
        set_phase(run, Phase::unlock(AfterUnlock::Backoff));
    }

    fn unlocked(&mut self, run: &mut Run, then: AfterUnlock) {
        tracing::debug!(axis = %run.axis, ?then, "unlocked");
        match then {
            AfterUnlock::StartAxis => self.begin_axis(run),
            AfterUnlock::Reprobe => set_phase(
                run,
                Phase::Move {
                    travelled_mm: 0.0,
                    awaiting_ack: false,
                },
            ),
            AfterUnlock::Backoff | AfterUnlock::Recover => {
                let distance_mm =
                    backoff_distance(&self.config, &self.settings) * run.backoff_scale;
                set_phase(
                    run,
                    Phase::Backoff {
                        distance_mm,
                        recovery: then == AfterUnlock::Recover,
                        wait: Await::Send,
                    },
                );
            }
            AfterUnlock::Finalize => set_phase(
                run,
                Phase::Finalize {
                    step: FinalStep::Home,
                    wait: Await::Send,
                },
            ),
        }
    }

    fn recover(&mut self, run: &mut Run, fault: String, then: AfterUnlock) -> Result<(), String> {
        run.recoveries += 1;
        let limit = self.config.max_recovery_attempts;
        if run.recoveries > limit {
            return Err(format!("{fault}: giving up after {limit} recovery attempts"));
        }
        run.backoff_scale *= RECOVERY_BACKOFF_GROWTH;

        let homing = Response::classify(&fault)
            .code()
            .is_some_and(is_homing_alarm);
        tracing::warn!(
            axis = %run.axis,
            phase = run.phase.name(),
            %fault,
            homing,
            attempt = run.recoveries,
            "recovering"
        );
        let what = if homing { "homing failed" } else { "fault" };
        self.note(format!(
            "{fault} ({what}) on {}; recovery {}/{limit}",
            run.axis, run.recoveries
        ));
        set_phase(run, Phase::unlock(then));
        Ok(())
    }

    // ── outbound ─────────────────────────────────────────────────────────────

    fn advance(
        &mut self,
        run: &mut Run,
        link: &mut dyn MachineLink,
        now: Instant,
    ) -> Result<(), String> {
        let away = -run.direction.sign();
        let axis = run.axis;
        let feed = self.config.feed_mm_min;

        match run.phase.clone() {
            Phase::Preflight { started, query_sent } => {
                if !query_sent {
                    send(link, "$$")?;
                    run.phase = Phase::Preflight {
                        started,
                        query_sent: true,
                    };
                } else if now.saturating_duration_since(started)
                    >= millis(self.config.preflight_timeout_ms)
                {
                    tracing::warn!("settings query timed out; using known settings");
                    self.note("No settings reply; continuing with defaults".to_string());
                    run.settings_ack_pending = true;
                    self.preflight_done(run, link);
                }
            }
            Phase::Move {
                travelled_mm,
                awaiting_ack: false,
            } => {
                if travelled_mm >= self.config.max_probe_distance_mm {
                    return Err(format!(
                        "no limit found on {axis} within {} mm",
                        format_number(travelled_mm)
                    ));
                }
                let distance = run.direction.sign() * self.config.step_mm;
                send(link, &relative_move(axis, distance, feed))?;
                run.phase = Phase::Move {
                    travelled_mm,
                    awaiting_ack: true,
                };
            }
            Phase::Move { .. } => {}
            Phase::Unlock {
                then,
                reset_sent,
                attempts,
                last_sent,
            } => {
                if !reset_sent {
                    send_realtime(link, Realtime::SoftReset)?;
                    run.phase = Phase::Unlock {
                        then,
                        reset_sent: true,
                        attempts,
                        last_sent: Some(now),
                    };
                } else if due(last_sent, now, millis(self.config.unlock_interval_ms)) {
                    if attempts >= self.config.max_unlock_attempts {
                        return Err(format!(
                            "{axis} still locked after {attempts} unlock attempts"
                        ));
                    }
                    send(link, "$X")?;
                    run.phase = Phase::Unlock {
                        then,
                        reset_sent,
                        attempts: attempts + 1,
                        last_sent: Some(now),
                    };
                }
            }
            Phase::Backoff {
                distance_mm,
                recovery,
                wait,
            } => {
                let command = || relative_move(axis, away * distance_mm, feed);
                run.phase = Phase::Backoff {
                    distance_mm,
                    recovery,
                    wait: self.drive(link, wait, command, now)?,
                };
            }
            Phase::Ramp(mut ramp) => {
                if ramp.is_done() {
                    set_phase(run, Phase::PrehomePullOff { wait: Await::Send });
                } else if !ramp.awaiting_ack {
                    let distance = ramp.next_step(self.config.ramp_step_mm);
                    send(link, &relative_move(axis, away * distance, ramp.feed))?;
                    ramp.awaiting_ack = true;
                    run.phase = Phase::Ramp(ramp);
                }
            }
            Phase::PrehomePullOff { wait } => {
                let distance = self.config.prehome_pull_off_mm;
                if distance <= 0.0 {
                    set_phase(run, Phase::Home { wait: Await::Send });
                } else {
                    let command = || relative_move(axis, away * distance, feed);
                    run.phase = Phase::PrehomePullOff {
                        wait: self.drive(link, wait, command, now)?,
                    };
                }
            }
            Phase::Home { wait } => {
                run.phase = Phase::Home {
                    wait: self.drive(link, wait, || "$H".to_string(), now)?,
                };
            }
            Phase::WaitIdle { last_query } => {
                run.phase = Phase::WaitIdle {
                    last_query: self.query_status(link, last_query, now)?,
                };
            }
            Phase::Finalize { step, wait } => {
                let command = match step {
                    FinalStep::Unlock => "$X",
                    FinalStep::Home => "$H",
                    FinalStep::Restore => "G90",
                };
                run.phase = Phase::Finalize {
                    step,
                    wait: self.drive(link, wait, || command.to_string(), now)?,
                };
            }
        }
        Ok(())
    }

    /// Sends the command of a send → ack → idle sequence, or polls status
    /// while waiting for idle.
    fn drive(
        &self,
        link: &mut dyn MachineLink,
        wait: Await,
        command: impl FnOnce() -> String,
        now: Instant,
    ) -> Result<Await, String> {
        match wait {
            Await::Send => {
                send(link, &command())?;
                Ok(Await::Ack)
            }
            Await::Ack => Ok(Await::Ack),
            Await::Idle { last_query } => Ok(Await::Idle {
                last_query: self.query_status(link, last_query, now)?,
            }),
        }
    }

    fn query_status(
        &self,
        link: &mut dyn MachineLink,
        last_query: Option<Instant>,
        now: Instant,
    ) -> Result<Option<Instant>, String> {
        if due(last_query, now, millis(self.config.status_interval_ms)) {
            send_realtime(link, Realtime::StatusQuery)?;
            Ok(Some(now))
        } else {
            Ok(last_query)
        }
    }

    /// Configured override, else away from the homing switch.
    fn probe_direction(&self, axis: Axis) -> Direction {
        self.config
            .direction_override(axis)
            .unwrap_or_else(|| self.settings.homing_direction(axis).flipped())
    }

    fn note(&mut self, message: String) {
        tracing::info!(%message, "exploration");
        self.messages.push(message);
    }
}

/// Distance that clears the switch after a trigger: the largest of
/// pull-off + margin, margin + fixed offset, and two probe steps.
pub fn backoff_distance(config: &ExplorationConfig, settings: &MachineSettings) -> f64 {
    (settings.pull_off_mm + config.margin_mm)
        .max(config.margin_mm + config.backoff_offset_mm)
        .max(config.step_mm * MIN_PROBE_STEPS)
}

/// `true` when a measured travel is too short to be believed.
pub fn is_premature(measured_mm: f64, step_mm: f64, known_limit: Option<f64>) -> bool {
    match known_limit {
        Some(limit) if limit > 0.0 => measured_mm < limit * KNOWN_LIMIT_RATIO,
        _ => measured_mm < step_mm * MIN_PROBE_STEPS,
    }
}

/// One relative feed move, e.g. `G91 G1 X-5 F500`.
pub fn relative_move(axis: Axis, distance_mm: f64, feed_mm_min: f64) -> String {
    format!(
        "G91 G1 {}{} F{}",
        axis.letter(),
        format_number(distance_mm),
        format_number(feed_mm_min)
    )
}

fn set_phase(run: &mut Run, phase: Phase) {
    tracing::info!(
        axis = %run.axis,
        from = run.phase.name(),
        to = phase.name(),
        "exploration phase"
    );
    run.phase = phase;
}

fn send(link: &mut dyn MachineLink, line: &str) -> Result<(), String> {
    tracing::debug!(%line, "explore send");
    link.send_line(line)
        .map_err(|e| format!("write failed: {e}"))
}

fn send_realtime(link: &mut dyn MachineLink, command: Realtime) -> Result<(), String> {
    link.send_realtime(command)
        .map_err(|e| format!("write failed: {e}"))
}

fn due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    last.map_or(true, |t| now.saturating_duration_since(t) >= interval)
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Positive => "+",
        Direction::Negative => "-",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::SessionError;

    /// Records what the engine sends; lines to deliver are pushed by the test.
    #[derive(Default)]
    struct ScriptedLink {
        inbound: Vec<String>,
        sent: Vec<String>,
        realtime: Vec<Realtime>,
        status: Option<StatusReport>,
        streaming: bool,
    }

    impl ScriptedLink {
        fn reply(&mut self, line: &str) {
            self.inbound.push(line.to_string());
        }
    }

    impl MachineLink for ScriptedLink {
        fn poll(&mut self) -> Vec<String> {
            let lines = std::mem::take(&mut self.inbound);
            for line in &lines {
                if let Some(report) = StatusReport::parse(line) {
                    self.status = Some(report);
                }
            }
            lines
        }

        fn status(&self) -> Option<&StatusReport> {
            self.status.as_ref()
        }

        fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
            self.sent.push(line.to_string());
            Ok(())
        }

        fn send_realtime(&mut self, command: Realtime) -> Result<(), SessionError> {
            self.realtime.push(command);
            Ok(())
        }

        fn is_streaming(&self) -> bool {
            self.streaming
        }
    }

    fn engine() -> LimitExplorationEngine {
        LimitExplorationEngine::new(ExplorationConfig::default(), MachineSettings::default())
    }

    // ── helpers ──────────────────────────────────────────────────────────────

    #[test]
    fn backoff_takes_largest_candidate() {
        let config = ExplorationConfig::default();
        let mut settings = MachineSettings::default();
        // step 5 → 10 beats margin 2 + offset 3 and pull-off 1 + margin 2.
        assert_eq!(backoff_distance(&config, &settings), 10.0);
        settings.pull_off_mm = 12.0;
        assert_eq!(backoff_distance(&config, &settings), 14.0);
    }

    #[test]
    fn premature_against_step_or_known_limit() {
        assert!(is_premature(3.0, 5.0, None));
        assert!(!is_premature(10.0, 5.0, None));
        assert!(is_premature(300.0, 5.0, Some(400.0)));
        assert!(!is_premature(330.0, 5.0, Some(400.0)));
    }

    #[test]
    fn relative_move_formats_words() {
        assert_eq!(relative_move(Axis::X, -5.0, 500.0), "G91 G1 X-5 F500");
        assert_eq!(relative_move(Axis::Z, 2.25, 1200.0), "G91 G1 Z2.25 F1200");
    }

    // ── start ────────────────────────────────────────────────────────────────

    #[test]
    fn start_sends_settings_query() {
        let mut link = ScriptedLink::default();
        let mut engine = engine();
        engine
            .start(&mut link, &[Axis::X, Axis::X, Axis::Y], Instant::now())
            .expect("start");
        assert_eq!(link.sent, vec!["$$".to_string()]);
        assert_eq!(engine.current_axis(), Some(Axis::X));
        assert!(engine.is_running());
    }

    #[test]
    fn start_refuses_empty_axes_and_double_start() {
        let mut link = ScriptedLink::default();
        let mut engine = engine();
        let now = Instant::now();
        assert!(matches!(
            engine.start(&mut link, &[], now),
            Err(ExplorationError::NoAxes)
        ));
        engine.start(&mut link, &[Axis::X], now).expect("start");
        assert!(matches!(
            engine.start(&mut link, &[Axis::X], now),
            Err(ExplorationError::AlreadyRunning)
        ));
    }

    #[test]
    fn start_refuses_while_streaming() {
        let mut link = ScriptedLink {
            streaming: true,
            ..ScriptedLink::default()
        };
        let result = engine().start(&mut link, &[Axis::X], Instant::now());
        assert!(matches!(result, Err(ExplorationError::StreamActive)));
        assert!(link.sent.is_empty());
    }

    // ── preflight / move ─────────────────────────────────────────────────────

    #[test]
    fn preflight_reads_settings_then_probes_away_from_home() {
        let mut link = ScriptedLink::default();
        let mut engine = engine();
        let now = Instant::now();
        engine.start(&mut link, &[Axis::X], now).expect("start");

        link.reply("$23=1");
        link.reply("$110=2400");
        link.reply("ok");
        assert_eq!(engine.tick(&mut link, now), TickOutcome::InProgress);

        assert_eq!(engine.settings().homing_dir_mask, 1);
        // Homing toward −X, so probing goes +X.
        assert_eq!(link.sent.last().map(String::as_str), Some("G91 G1 X5 F500"));
    }

    #[test]
    fn preflight_times_out_and_continues() {
        let mut link = ScriptedLink::default();
        let mut engine = engine();
        let start = Instant::now();
        engine.start(&mut link, &[Axis::Y], start).expect("start");

        engine.tick(&mut link, start + Duration::from_millis(100));
        assert_eq!(link.sent.len(), 1);

        engine.tick(&mut link, start + Duration::from_secs(4));
        assert!(matches!(engine.phase(), Some(Phase::Move { .. })));
    }

    #[test]
    fn move_sends_one_step_per_ack() {
        let mut link = ScriptedLink::default();
        let mut engine = engine();
        let now = Instant::now();
        engine.start(&mut link, &[Axis::X], now).expect("start");
        link.reply("ok");
        engine.tick(&mut link, now);
        assert_eq!(link.sent.len(), 2);

        // No ack yet: nothing new goes out.
        engine.tick(&mut link, now);
        assert_eq!(link.sent.len(), 2);

        link.reply("ok");
        engine.tick(&mut link, now);
        assert_eq!(link.sent.len(), 3);
        assert_eq!(
            engine.phase(),
            Some(&Phase::Move {
                travelled_mm: 5.0,
                awaiting_ack: true
            })
        );
    }

    #[test]
    fn late_settings_ack_after_timeout_is_not_a_step_ack() {
        let mut link = ScriptedLink::default();
        let mut engine = engine();
        let start = Instant::now();
        engine.start(&mut link, &[Axis::X], start).expect("start");

        let later = start + Duration::from_secs(4);
        engine.tick(&mut link, later);
        engine.tick(&mut link, later);
        assert_eq!(link.sent.len(), 2);

        // The `$$` reply finally lands: the step is still outstanding.
        link.reply("$23=0");
        link.reply("ok");
        engine.tick(&mut link, later);
        assert_eq!(link.sent.len(), 2);
        assert_eq!(
            engine.phase(),
            Some(&Phase::Move {
                travelled_mm: 0.0,
                awaiting_ack: true
            })
        );

        link.reply("ok");
        engine.tick(&mut link, later);
        assert_eq!(link.sent.len(), 3);
        assert_eq!(
            engine.phase(),
            Some(&Phase::Move {
                travelled_mm: 5.0,
                awaiting_ack: true
            })
        );
    }

    #[test]
    fn error_during_move_aborts_without_sending() {
        let mut link = ScriptedLink::default();
        let mut engine = engine();
        let now = Instant::now();
        engine.start(&mut link, &[Axis::X], now).expect("start");
        link.reply("ok");
        engine.tick(&mut link, now);
        let sent = link.sent.len();

        link.reply("error:20");
        let outcome = engine.tick(&mut link, now);
        assert!(matches!(outcome, TickOutcome::Aborted(reason) if reason.contains("error:20")));
        assert_eq!(link.sent.len(), sent);
        assert!(!engine.is_running());
    }

    #[test]
    fn serial_error_aborts() {
        let mut link = ScriptedLink::default();
        let mut engine = engine();
        let now = Instant::now();
        engine.start(&mut link, &[Axis::X], now).expect("start");
        link.reply("[serial error] device unplugged");
        assert!(matches!(
            engine.tick(&mut link, now),
            TickOutcome::Aborted(_)
        ));
    }

    // ── alarm handling ───────────────────────────────────────────────────────

    fn probe_until_alarm(engine: &mut LimitExplorationEngine, link: &mut ScriptedLink, acks: usize) {
        let now = Instant::now();
        engine.start(link, &[Axis::X], now).expect("start");
        link.reply("ok");
        engine.tick(link, now);
        for _ in 0..acks {
            link.reply("ok");
            engine.tick(link, now);
        }
        link.reply("ALARM:1");
        engine.tick(link, now);
    }

    #[test]
    fn short_trigger_flips_direction_once() {
        let mut link = ScriptedLink::default();
        let mut engine = engine();
        probe_until_alarm(&mut engine, &mut link, 1);

        // 5 mm − 2 mm margin = 3 mm < 2 steps: premature.
        assert!(matches!(
            engine.phase(),
            Some(Phase::Unlock {
                then: AfterUnlock::Reprobe,
                reset_sent: true,
                ..
            })
        ));
        assert_eq!(link.realtime, vec![Realtime::SoftReset]);
        assert!(engine
            .drain_messages()
            .iter()
            .any(|m| m.contains("premature")));
    }

    #[test]
    fn long_trigger_is_accepted() {
        let mut link = ScriptedLink::default();
        let mut engine = engine();
        probe_until_alarm(&mut engine, &mut link, 10);
        assert!(matches!(
            engine.phase(),
            Some(Phase::Unlock {
                then: AfterUnlock::Backoff,
                ..
            })
        ));
    }

    #[test]
    fn known_limit_marks_short_trigger_premature() {
        let mut link = ScriptedLink::default();
        let mut engine = engine().with_known_limits([(Axis::X, 100.0)]);
        // 50 mm − 2 = 48 mm is plenty of steps but well short of 100 mm.
        probe_until_alarm(&mut engine, &mut link, 10);
        assert!(matches!(
            engine.phase(),
            Some(Phase::Unlock {
                then: AfterUnlock::Reprobe,
                ..
            })
        ));
    }

    #[test]
    fn controller_travel_counts_as_known_limit_only_when_trusted() {
        let mut config = ExplorationConfig::default();
        config.trust_controller_travel = true;
        let mut trusting = LimitExplorationEngine::new(config, MachineSettings::default());
        trusting.observe_setting(130, "100.000");
        probe_until_alarm(&mut trusting, &mut ScriptedLink::default(), 10);
        assert!(matches!(
            trusting.phase(),
            Some(Phase::Unlock {
                then: AfterUnlock::Reprobe,
                ..
            })
        ));

        let mut plain = engine();
        plain.observe_setting(130, "100.000");
        probe_until_alarm(&mut plain, &mut ScriptedLink::default(), 10);
        assert!(matches!(
            plain.phase(),
            Some(Phase::Unlock {
                then: AfterUnlock::Backoff,
                ..
            })
        ));
    }

    #[test]
    fn unlock_retries_until_acknowledged() {
        let mut link = ScriptedLink::default();
        let mut engine = engine();
        probe_until_alarm(&mut engine, &mut link, 10);
        let base = link.sent.len();
        let start = Instant::now();

        engine.tick(&mut link, start + Duration::from_millis(600));
        assert_eq!(link.sent.last().map(String::as_str), Some("$X"));
        engine.tick(&mut link, start + Duration::from_millis(700));
        assert_eq!(link.sent.len(), base + 1);
        engine.tick(&mut link, start + Duration::from_millis(1200));
        assert_eq!(link.sent.len(), base + 2);

        link.reply("[MSG:Caution: Unlocked]");
        link.reply("ok");
        engine.tick(&mut link, start + Duration::from_millis(1300));
        // Unlocked, and the backoff move (10 mm, away from the -X switch)
        // goes out in the same tick.
        assert_eq!(
            link.sent.last().map(String::as_str),
            Some("G91 G1 X10 F500")
        );
    }

    #[test]
    fn banner_during_unlock_resends_immediately() {
        let mut link = ScriptedLink::default();
        let mut engine = engine();
        probe_until_alarm(&mut engine, &mut link, 10);
        let base = link.sent.len();

        link.reply("Grbl 1.1h ['$' for help]");
        engine.tick(&mut link, Instant::now());
        assert_eq!(link.sent.len(), base + 1);
        assert_eq!(link.sent.last().map(String::as_str), Some("$X"));
    }

    #[test]
    fn unlock_gives_up_after_max_attempts() {
        let mut link = ScriptedLink::default();
        let mut config = ExplorationConfig::default();
        config.max_unlock_attempts = 2;
        let mut engine = LimitExplorationEngine::new(config, MachineSettings::default());
        probe_until_alarm(&mut engine, &mut link, 10);

        let start = Instant::now();
        let mut outcome = TickOutcome::InProgress;
        for i in 1..=5 {
            outcome = engine.tick(&mut link, start + Duration::from_secs(i));
            if outcome != TickOutcome::InProgress {
                break;
            }
        }
        assert!(matches!(outcome, TickOutcome::Aborted(reason) if reason.contains("locked")));
    }

    // ── stop ─────────────────────────────────────────────────────────────────

    #[test]
    fn stop_holds_and_resets_during_motion() {
        let mut link = ScriptedLink::default();
        let mut engine = engine();
        let now = Instant::now();
        engine.start(&mut link, &[Axis::X], now).expect("start");
        link.reply("ok");
        engine.tick(&mut link, now);

        engine.stop(&mut link);
        assert_eq!(link.realtime, vec![Realtime::FeedHold, Realtime::SoftReset]);
        assert!(!engine.is_running());
        assert_eq!(engine.tick(&mut link, now), TickOutcome::Idle);

        // Second stop is a no-op.
        engine.stop(&mut link);
        assert_eq!(link.realtime.len(), 2);
    }
}
