//! A simulated GRBL controller for driving the exploration engine without
//! hardware.

use std::collections::VecDeque;

use routerking_lib::protocol::{Axis, Realtime, StatusReport};
use routerking_lib::sender::{MachineLink, SessionError};

pub const BANNER: &str = "Grbl 1.1h ['$' for help]";

/// Responds to commands the way the firmware does, with hard limits at
/// fixed positions relative to where the axes start.
pub struct SimController {
    /// `(negative, positive)` limit position per axis, in mm from the start.
    pub limits: [(f64, f64); 3],
    pub position: [f64; 3],
    pub settings: Vec<(u32, String)>,
    /// Every line written, in order.
    pub sent: Vec<String>,
    pub realtime: Vec<Realtime>,
    /// Moves of exactly this length count as probe steps.
    pub probe_step: f64,
    /// Alarm on the probe step after this many, regardless of position.
    pub false_trigger_after: Option<usize>,
    /// `$H` fails with `ALARM:9` this many times before succeeding.
    pub home_failures: u32,
    pub streaming: bool,
    locked: bool,
    probe_steps: usize,
    outbox: VecDeque<String>,
    status: Option<StatusReport>,
}

impl SimController {
    pub fn new() -> Self {
        Self {
            limits: [(-120.0, 500.0), (-80.0, 500.0), (-50.0, 500.0)],
            position: [0.0; 3],
            settings: vec![
                (23, "0".to_string()),
                (27, "1.000".to_string()),
                (110, "3000.000".to_string()),
                (111, "3000.000".to_string()),
                (112, "600.000".to_string()),
                (130, "200.000".to_string()),
            ],
            sent: Vec::new(),
            realtime: Vec::new(),
            probe_step: 5.0,
            false_trigger_after: None,
            home_failures: 0,
            streaming: false,
            locked: false,
            probe_steps: 0,
            outbox: VecDeque::new(),
            status: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Probe steps sent with the given sign on `axis`.
    pub fn probe_moves(&self, axis: Axis, sign: f64) -> usize {
        self.sent
            .iter()
            .filter_map(|line| parse_move(line))
            .filter(|(a, d)| *a == axis && (d.abs() - self.probe_step).abs() < 1e-9)
            .filter(|(_, d)| d.signum() == sign)
            .count()
    }

    fn reply(&mut self, line: impl Into<String>) {
        self.outbox.push_back(line.into());
    }

    fn alarm(&mut self, code: u32) {
        self.locked = true;
        self.reply(format!("ALARM:{code}"));
    }

    fn execute(&mut self, line: &str) {
        match line {
            "$$" => {
                let settings: Vec<String> = self
                    .settings
                    .iter()
                    .map(|(n, v)| format!("${n}={v}"))
                    .collect();
                for setting in settings {
                    self.reply(setting);
                }
                self.reply("ok");
            }
            "$X" => {
                if self.locked {
                    self.locked = false;
                    self.reply("[MSG:Caution: Unlocked]");
                }
                self.probe_steps = 0;
                self.reply("ok");
            }
            "$H" => {
                if self.home_failures > 0 {
                    self.home_failures -= 1;
                    self.alarm(9);
                } else {
                    self.locked = false;
                    self.position = [0.0; 3];
                    self.reply("ok");
                }
            }
            _ => match parse_move(line) {
                Some(_) if self.locked => self.reply("error:9"),
                Some((axis, distance)) => self.travel(axis, distance),
                None => self.reply("ok"),
            },
        }
    }

    fn travel(&mut self, axis: Axis, distance: f64) {
        if (distance.abs() - self.probe_step).abs() < 1e-9 {
            self.probe_steps += 1;
            if self.false_trigger_after.is_some_and(|n| self.probe_steps > n) {
                self.alarm(1);
                return;
            }
        }

        let i = axis.index();
        let target = self.position[i] + distance;
        let (low, high) = self.limits[i];
        if target < low || target > high {
            self.position[i] = target.clamp(low, high);
            self.alarm(1);
        } else {
            self.position[i] = target;
            self.reply("ok");
        }
    }

    fn status_line(&self) -> String {
        let state = if self.locked { "Alarm" } else { "Idle" };
        let [x, y, z] = self.position;
        format!("<{state}|MPos:{x:.3},{y:.3},{z:.3}|FS:0,0>")
    }
}

impl MachineLink for SimController {
    fn poll(&mut self) -> Vec<String> {
        let lines: Vec<String> = self.outbox.drain(..).collect();
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
        self.execute(line);
        Ok(())
    }

    fn send_realtime(&mut self, command: Realtime) -> Result<(), SessionError> {
        self.realtime.push(command);
        match command {
            Realtime::StatusQuery => {
                let line = self.status_line();
                self.reply(line);
            }
            Realtime::SoftReset => {
                self.probe_steps = 0;
                self.reply(BANNER);
                if self.locked {
                    self.reply("[MSG:'$H'|'$X' to unlock]");
                }
            }
            Realtime::FeedHold | Realtime::CycleResume => {}
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }
}

/// `G91 G1 X-5 F500` → `(X, -5.0)`.
pub fn parse_move(line: &str) -> Option<(Axis, f64)> {
    if !line.starts_with("G91") {
        return None;
    }
    line.split_whitespace().find_map(|word| {
        let mut chars = word.chars();
        let axis = Axis::from_letter(chars.next()?)?;
        Some((axis, chars.as_str().parse().ok()?))
    })
}
