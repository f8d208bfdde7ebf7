use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::protocol::{format_number, setting_command, Axis};

/// Result of a completed exploration run.
///
/// The explorer never writes anything back to the controller; callers that
/// want the measurements persisted send the lines from
/// [`settings_commands`](ExplorationReport::settings_commands) themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationReport {
    pub run_id: Uuid,
    pub finished_at: DateTime<Utc>,
    /// Measured travel per axis (mm).
    pub limits: BTreeMap<Axis, f64>,
    /// Axes whose first trigger was rejected as premature.
    pub retried_axes: Vec<Axis>,
    /// Fault recoveries performed during the run.
    pub recoveries: u32,
}

impl ExplorationReport {
    pub fn new(
        run_id: Uuid,
        limits: BTreeMap<Axis, f64>,
        retried_axes: Vec<Axis>,
        recoveries: u32,
    ) -> Self {
        Self {
            run_id,
            finished_at: Utc::now(),
            limits,
            retried_axes,
            recoveries,
        }
    }

    pub fn limit(&self, axis: Axis) -> Option<f64> {
        self.limits.get(&axis).copied()
    }

    /// `$13x=<travel>` lines that store each measured limit as the axis's
    /// max travel.
    pub fn settings_commands(&self) -> Vec<String> {
        self.limits
            .iter()
            .map(|(axis, travel)| setting_command(axis.max_travel_setting(), *travel))
            .collect()
    }

    /// One-line summary, e.g. `X=412.5 mm, Y=300 mm`.
    pub fn summary(&self) -> String {
        self.limits
            .iter()
            .map(|(axis, travel)| format!("{axis}={} mm", format_number(*travel)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
