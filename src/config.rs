//! TOML configuration: serial connection and limit-exploration parameters.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! usable configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::protocol::{Axis, Direction};

/// Configuration loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Invalid(String),
    #[error("cannot read config {path}: {message}")]
    Read { path: PathBuf, message: String },
}

/// Root of `routerking.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub exploration: ExplorationConfig,
}

/// `[connection]`: serial link parameters.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ConnectionConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Read timeout; also how often the reader checks for shutdown.
    pub read_timeout_ms: u64,
    /// Pause after the connect flush before stale input is discarded.
    pub settle_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            read_timeout_ms: 100,
            settle_ms: 100,
        }
    }
}

/// `[exploration]`: limit-exploration tuning.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ExplorationConfig {
    /// Axes to explore, in order.
    pub axes: Vec<Axis>,
    /// Distance of one probing step (mm).
    pub step_mm: f64,
    /// Subtracted from the travelled distance when a limit is hit (mm).
    pub margin_mm: f64,
    /// Feed rate used while probing (mm/min).
    pub feed_mm_min: f64,
    /// Starting feed of the post-backoff ramp (mm/min).
    pub test_feed_mm_min: f64,
    /// Total distance covered by the ramp (mm).
    pub ramp_distance_mm: f64,
    /// Length of each ramp step (mm).
    pub ramp_step_mm: f64,
    /// Probing distance after which a run gives up without seeing an
    /// alarm (mm).
    pub max_probe_distance_mm: f64,
    /// Extra move away from the switch before homing (mm).
    pub prehome_pull_off_mm: f64,
    /// Fixed offset added to the margin when computing the backoff (mm).
    pub backoff_offset_mm: f64,
    pub preflight_timeout_ms: u64,
    /// Minimum spacing between repeated unlock commands.
    pub unlock_interval_ms: u64,
    /// Status query cadence while waiting for the machine.
    pub status_interval_ms: u64,
    /// Unlock commands sent before the run is aborted.
    pub max_unlock_attempts: u32,
    /// Homing-failure recoveries allowed before the run is aborted.
    pub max_recovery_attempts: u32,
    /// Treat the controller's `$130`..`$132` as known limits when the caller
    /// supplies none.
    pub trust_controller_travel: bool,
    /// Overrides the probing direction derived from the homing mask, keyed
    /// by axis letter.
    pub directions: BTreeMap<String, Direction>,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            axes: vec![Axis::X, Axis::Y],
            step_mm: 5.0,
            margin_mm: 2.0,
            feed_mm_min: 500.0,
            test_feed_mm_min: 1000.0,
            ramp_distance_mm: 10.0,
            ramp_step_mm: 2.0,
            max_probe_distance_mm: 2000.0,
            prehome_pull_off_mm: 2.0,
            backoff_offset_mm: 3.0,
            preflight_timeout_ms: 3000,
            unlock_interval_ms: 500,
            status_interval_ms: 250,
            max_unlock_attempts: 20,
            max_recovery_attempts: 3,
            trust_controller_travel: false,
            directions: BTreeMap::new(),
        }
    }
}

impl ExplorationConfig {
    /// Configured probing direction for `axis`, if overridden.
    pub fn direction_override(&self, axis: Axis) -> Option<Direction> {
        self.directions
            .iter()
            .find(|(key, _)| key.parse::<Axis>() == Ok(axis))
            .map(|(_, dir)| *dir)
    }
}

/// Parse a TOML string into an [`AppConfig`], running validation.
pub fn parse(toml_str: &str) -> Result<AppConfig, ConfigError> {
    let cfg: AppConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Load and validate the config at `path`. A missing file yields defaults.
pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Ok(AppConfig::default())
        }
        Err(e) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

/// `<config dir>/routerking/routerking.toml`.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_default()
        .join("routerking")
        .join("routerking.toml")
}

fn validate(cfg: &AppConfig) -> Result<(), ConfigError> {
    if cfg.connection.baud_rate == 0 {
        return Err(ConfigError::Invalid(
            "connection.baud_rate must be positive".to_string(),
        ));
    }

    let ex = &cfg.exploration;
    for (name, value) in [
        ("step_mm", ex.step_mm),
        ("feed_mm_min", ex.feed_mm_min),
        ("test_feed_mm_min", ex.test_feed_mm_min),
        ("ramp_step_mm", ex.ramp_step_mm),
        ("max_probe_distance_mm", ex.max_probe_distance_mm),
    ] {
        if !(value > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "exploration.{name} must be positive"
            )));
        }
    }
    for (name, value) in [
        ("margin_mm", ex.margin_mm),
        ("ramp_distance_mm", ex.ramp_distance_mm),
        ("prehome_pull_off_mm", ex.prehome_pull_off_mm),
        ("backoff_offset_mm", ex.backoff_offset_mm),
    ] {
        if !(value >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "exploration.{name} must not be negative"
            )));
        }
    }
    if let Some(key) = ex.directions.keys().find(|k| k.parse::<Axis>().is_err()) {
        return Err(ConfigError::Invalid(format!(
            "exploration.directions: unknown axis '{key}'"
        )));
    }
    if ex.axes.is_empty() {
        return Err(ConfigError::Invalid(
            "exploration.axes must name at least one axis".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = parse("").expect("parse empty");
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.connection.baud_rate, 115_200);
        assert_eq!(cfg.exploration.step_mm, 5.0);
    }

    #[test]
    fn partial_config_overrides_fields() {
        let cfg = parse(
            r#"
[connection]
port = "/dev/ttyUSB0"

[exploration]
axes = ["Z"]
step_mm = 2.5

[exploration.directions]
Z = "negative"
"#,
        )
        .expect("parse");
        assert_eq!(cfg.connection.port, "/dev/ttyUSB0");
        assert_eq!(cfg.connection.baud_rate, 115_200);
        assert_eq!(cfg.exploration.axes, vec![Axis::Z]);
        assert_eq!(cfg.exploration.step_mm, 2.5);
        assert_eq!(
            cfg.exploration.direction_override(Axis::Z),
            Some(Direction::Negative)
        );
        assert_eq!(cfg.exploration.direction_override(Axis::X), None);
    }

    #[test]
    fn invalid_toml_returns_config_error() {
        let result = parse("this is not valid toml ::::");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn non_positive_step_is_rejected() {
        let err = parse("[exploration]\nstep_mm = 0.0").expect_err("zero step");
        assert!(err.to_string().contains("step_mm"));
    }

    #[test]
    fn negative_margin_is_rejected() {
        let err = parse("[exploration]\nmargin_mm = -1.0").expect_err("negative margin");
        assert!(err.to_string().contains("margin_mm"));
    }

    #[test]
    fn unknown_direction_axis_is_rejected() {
        let err = parse("[exploration.directions]\nA = \"positive\"").expect_err("bad axis");
        assert!(err.to_string().contains("'A'"));
    }

    #[test]
    fn empty_axes_are_rejected() {
        let err = parse("[exploration]\naxes = []").expect_err("no axes");
        assert!(err.to_string().contains("axes"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("routerking_test_missing_config.toml");
        let _ = std::fs::remove_file(&path);
        assert_eq!(load(&path).expect("load"), AppConfig::default());
    }

    #[test]
    fn load_reads_file_from_disk() {
        let path = std::env::temp_dir().join("routerking_test_load_config.toml");
        std::fs::write(&path, "[connection]\nbaud_rate = 250000\n").expect("write config");
        let cfg = load(&path).expect("load");
        let _ = std::fs::remove_file(&path);
        assert_eq!(cfg.connection.baud_rate, 250_000);
    }
}
