//! Classification of lines received from the controller.

use std::collections::BTreeMap;

use serde::Serialize;

/// Parsed `<State|Key:Value|...>` status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Machine state as reported, including any sub-state (`"Hold:0"`).
    pub state: String,
    pub fields: BTreeMap<String, String>,
}

impl StatusReport {
    /// Parses a status line. Returns `None` unless `line` is framed by `<`
    /// and `>`.
    pub fn parse(line: &str) -> Option<Self> {
        let body = line.strip_prefix('<')?.strip_suffix('>')?;
        let mut parts = body.split('|');
        let state = match parts.next() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => "?".to_string(),
        };
        let fields = parts
            .filter_map(|part| part.split_once(':'))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Some(Self { state, fields })
    }

    /// State name without sub-state (`"Hold:0"` → `"Hold"`).
    pub fn state_name(&self) -> &str {
        self.state.split(':').next().unwrap_or(&self.state)
    }

    pub fn is_idle(&self) -> bool {
        self.state_name().eq_ignore_ascii_case("idle")
    }

    pub fn is_alarm(&self) -> bool {
        self.state_name().eq_ignore_ascii_case("alarm")
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Machine position (`MPos`) as `[x, y, z]`, when reported.
    pub fn machine_position(&self) -> Option<[f64; 3]> {
        parse_triplet(self.field("MPos")?)
    }

    /// Work position (`WPos`) as `[x, y, z]`, when reported.
    pub fn work_position(&self) -> Option<[f64; 3]> {
        parse_triplet(self.field("WPos")?)
    }
}

fn parse_triplet(value: &str) -> Option<[f64; 3]> {
    let mut it = value.split(',').map(|v| v.trim().parse::<f64>());
    let x = it.next()?.ok()?;
    let y = it.next()?.ok()?;
    let z = it.next()?.ok()?;
    Some([x, y, z])
}

/// One received line, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Acknowledges one buffered line.
    Ok,
    /// `error:<n>`: one line rejected. Holds the full line.
    Error(String),
    /// `ALARM:<n>`: machine fault. Holds the full line.
    Alarm(String),
    Status(StatusReport),
    /// `$<n>=<value>` settings dump entry.
    Setting { number: u32, value: String },
    /// Startup banner printed after a reset.
    Banner(String),
    /// Bracketed feedback such as `[MSG:Caution: Unlocked]`.
    Feedback(String),
    Other(String),
}

impl Response {
    pub fn classify(line: &str) -> Self {
        let line = line.trim();
        if let Some(status) = StatusReport::parse(line) {
            return Response::Status(status);
        }

        let lower = line.to_ascii_lowercase();
        if lower.starts_with("ok") {
            Response::Ok
        } else if lower.starts_with("error") {
            Response::Error(line.to_string())
        } else if lower.starts_with("alarm") {
            Response::Alarm(line.to_string())
        } else if lower.starts_with("grbl") {
            Response::Banner(line.to_string())
        } else if line.starts_with('[') && line.ends_with(']') {
            Response::Feedback(line.to_string())
        } else if let Some((number, value)) = parse_setting(line) {
            Response::Setting { number, value }
        } else {
            Response::Other(line.to_string())
        }
    }

    /// Numeric code of an `error:` or `ALARM:` line.
    pub fn code(&self) -> Option<u32> {
        match self {
            Response::Error(line) | Response::Alarm(line) => {
                line.split_once(':')?.1.trim().parse().ok()
            }
            _ => None,
        }
    }

    /// `true` for feedback announcing that the alarm lock was cleared.
    pub fn is_unlock_notice(&self) -> bool {
        matches!(self, Response::Feedback(text) if text.to_ascii_lowercase().contains("unlocked"))
    }
}

fn parse_setting(line: &str) -> Option<(u32, String)> {
    let rest = line.strip_prefix('$')?;
    let (number, value) = rest.split_once('=')?;
    let number = number.trim().parse().ok()?;
    // Some firmware appends a description in parentheses.
    let value = value.split('(').next().unwrap_or(value).trim().to_string();
    Some((number, value))
}

/// Alarm codes that indicate a failed homing cycle.
pub fn is_homing_alarm(code: u32) -> bool {
    (6..=9).contains(&code)
}
