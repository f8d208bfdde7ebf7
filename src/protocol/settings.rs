//! Controller configuration learned from `$<n>=<value>` lines, and the
//! formatting used when writing settings back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// `$23`: homing direction invert mask.
pub const HOMING_DIR_MASK: u32 = 23;
/// `$27`: homing pull-off distance (mm).
pub const HOMING_PULL_OFF: u32 = 27;
/// `$110`..`$112`: per-axis max rate (mm/min).
pub const MAX_RATE_BASE: u32 = 110;
/// `$130`..`$132`: per-axis max travel (mm).
pub const MAX_TRAVEL_BASE: u32 = 130;

/// Decimal places used for every numeric setting value written out.
const SETTING_DECIMALS: usize = 3;

/// A linear machine axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            _ => None,
        }
    }

    pub fn max_rate_setting(self) -> u32 {
        MAX_RATE_BASE + self.index() as u32
    }

    pub fn max_travel_setting(self) -> u32 {
        MAX_TRAVEL_BASE + self.index() as u32
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Axis::from_letter(c).ok_or_else(|| format!("unknown axis '{s}'")),
            _ => Err(format!("unknown axis '{s}'")),
        }
    }
}

/// Travel direction along an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Positive => 1.0,
            Direction::Negative => -1.0,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Direction::Positive => Direction::Negative,
            Direction::Negative => Direction::Positive,
        }
    }
}

/// Controller settings relevant to motion and homing.
///
/// Starts at firmware defaults and is updated through
/// [`observe`](MachineSettings::observe) whenever a settings line is seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineSettings {
    pub homing_dir_mask: u8,
    pub pull_off_mm: f64,
    pub max_rate_mm_min: [f64; 3],
    /// `$130`..`$132`, once the controller has reported them.
    pub max_travel_mm: [Option<f64>; 3],
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            homing_dir_mask: 0,
            pull_off_mm: 1.0,
            max_rate_mm_min: [500.0; 3],
            max_travel_mm: [None; 3],
        }
    }
}

impl MachineSettings {
    /// Records a `$<number>=<value>` pair. Returns `false` for settings that
    /// are not tracked or values that do not parse.
    pub fn observe(&mut self, number: u32, value: &str) -> bool {
        let Ok(parsed) = value.trim().parse::<f64>() else {
            return false;
        };
        match number {
            HOMING_DIR_MASK => self.homing_dir_mask = parsed as u8,
            HOMING_PULL_OFF => self.pull_off_mm = parsed,
            n if (MAX_RATE_BASE..MAX_RATE_BASE + 3).contains(&n) => {
                self.max_rate_mm_min[(n - MAX_RATE_BASE) as usize] = parsed;
            }
            n if (MAX_TRAVEL_BASE..MAX_TRAVEL_BASE + 3).contains(&n) => {
                self.max_travel_mm[(n - MAX_TRAVEL_BASE) as usize] = Some(parsed);
            }
            _ => return false,
        }
        true
    }

    /// Direction the controller homes `axis` toward.
    ///
    /// A set mask bit inverts homing to the negative end.
    pub fn homing_direction(&self, axis: Axis) -> Direction {
        if self.homing_dir_mask & (1 << axis.index()) != 0 {
            Direction::Negative
        } else {
            Direction::Positive
        }
    }

    pub fn max_rate(&self, axis: Axis) -> f64 {
        self.max_rate_mm_min[axis.index()]
    }

    pub fn max_travel(&self, axis: Axis) -> Option<f64> {
        self.max_travel_mm[axis.index()]
    }
}

/// Formats a number for the wire: three decimals, trailing zeros stripped.
pub fn format_number(value: f64) -> String {
    let s = format!("{:.prec$}", value, prec = SETTING_DECIMALS);
    let s = if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    };
    if s == "-0" {
        "0".to_string()
    } else {
        s
    }
}

/// Builds the `$<n>=<value>` line that writes a numeric setting.
pub fn setting_command(number: u32, value: f64) -> String {
    format!("${number}={}", format_number(value))
}
