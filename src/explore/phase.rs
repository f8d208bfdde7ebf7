//! Exploration phases. Each variant carries only the data its phase needs.

use std::time::Instant;

/// Progress of a command that must be acknowledged and then run to
/// completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Await {
    /// Command not written yet.
    Send,
    /// Written; waiting for `ok`.
    Ack,
    /// Acknowledged; polling status until the machine reports idle.
    Idle { last_query: Option<Instant> },
}

/// Where to go once the alarm lock has been cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterUnlock {
    /// Start probing the current axis.
    StartAxis,
    /// Probe the current axis again in its flipped direction.
    Reprobe,
    /// Back away from the switch that was just hit, then ramp.
    Backoff,
    /// Homing failed: back away further and go straight to homing.
    Recover,
    /// Retry the closing unlock + home.
    Finalize,
}

/// Ramp progress: steps away from the switch at increasing feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ramp {
    pub remaining_mm: f64,
    pub feed: f64,
    pub target_feed: f64,
    pub increment: f64,
    pub awaiting_ack: bool,
}

impl Ramp {
    /// Plans a ramp over `distance` in steps of `step`, starting at
    /// `min(test_feed, max_feed)` and rising linearly toward `max_feed`.
    pub fn plan(distance: f64, step: f64, test_feed: f64, max_feed: f64) -> Self {
        let feed = test_feed.min(max_feed);
        let steps = (distance / step).ceil().max(1.0);
        Self {
            remaining_mm: distance,
            feed,
            target_feed: max_feed,
            increment: ((max_feed - feed) / steps).max(0.0),
            awaiting_ack: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.remaining_mm <= 1e-9
    }

    /// Length of the next step.
    pub fn next_step(&self, step: f64) -> f64 {
        step.min(self.remaining_mm)
    }

    /// Records an acknowledged step of `distance` and raises the feed.
    pub fn advance(&mut self, distance: f64) {
        self.remaining_mm -= distance;
        self.feed = (self.feed + self.increment).min(self.target_feed);
        self.awaiting_ack = false;
    }
}

/// Steps of the closing unlock + home.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalStep {
    Unlock,
    Home,
    /// Back to absolute distance mode after the relative probing moves.
    Restore,
}

/// The exploration state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    /// Reading controller settings before the first move.
    Preflight { started: Instant, query_sent: bool },
    /// Stepping toward the limit switch.
    Move { travelled_mm: f64, awaiting_ack: bool },
    /// Clearing the alarm lock.
    Unlock {
        then: AfterUnlock,
        reset_sent: bool,
        attempts: u32,
        last_sent: Option<Instant>,
    },
    /// Moving off the switch by a safe distance.
    Backoff {
        distance_mm: f64,
        recovery: bool,
        wait: Await,
    },
    Ramp(Ramp),
    /// Small extra retreat before homing.
    PrehomePullOff { wait: Await },
    Home { wait: Await },
    WaitIdle { last_query: Option<Instant> },
    Finalize { step: FinalStep, wait: Await },
}

impl Phase {
    /// Fresh unlock sequence; the soft reset goes out on the next tick.
    pub fn unlock(then: AfterUnlock) -> Self {
        Phase::Unlock {
            then,
            reset_sent: false,
            attempts: 0,
            last_sent: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Preflight { .. } => "preflight",
            Phase::Move { .. } => "move",
            Phase::Unlock { .. } => "unlock",
            Phase::Backoff { .. } => "backoff",
            Phase::Ramp(_) => "ramp",
            Phase::PrehomePullOff { .. } => "prehome-pull-off",
            Phase::Home { .. } => "home",
            Phase::WaitIdle { .. } => "wait-idle",
            Phase::Finalize { .. } => "finalize",
        }
    }

    /// `true` when a machine alarm here is the expected limit signal rather
    /// than a fault.
    pub fn expects_alarm(&self) -> bool {
        matches!(self, Phase::Move { .. } | Phase::Unlock { .. })
    }

    /// `true` while the machine may be executing a move issued by the
    /// explorer.
    pub fn in_motion(&self) -> bool {
        !matches!(self, Phase::Preflight { .. } | Phase::Unlock { .. })
    }
}
