//! Application-level error type returned by the binary and any host that
//! embeds the library.
//!
//! `AppError` is serialized to `{ kind, message }` payloads so a frontend
//! can pattern-match on a stable `kind` string.

use crate::config::ConfigError;
use crate::explore::ExplorationError;
use crate::sender::SessionError;

/// Top-level error.
///
/// Serialized with serde's adjacently-tagged representation:
/// `{ "kind": "<variant>", "message": "<human-readable text>" }`
#[derive(Debug, thiserror::Error, serde::Serialize)]
#[serde(tag = "kind", content = "message")]
pub enum AppError {
    /// A required file path does not exist on disk.
    #[error("file not found")]
    FileNotFound,

    /// The configuration file could not be read or failed validation.
    #[error("{0}")]
    Config(String),

    /// The controller link failed or refused the request.
    #[error("{0}")]
    Connection(String),

    /// A program stream was refused or halted by the controller.
    #[error("{0}")]
    Stream(String),

    /// Limit exploration could not start or was aborted.
    #[error("{0}")]
    Exploration(String),

    /// A generic I/O error, stringified so it stays serializable.
    #[error("{0}")]
    Io(String),
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<SessionError> for AppError {
    /// Stream refusals map to [`AppError::Stream`]; everything else is a
    /// connection problem.
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::StreamActive => Self::Stream(e.to_string()),
            other => Self::Connection(other.to_string()),
        }
    }
}

impl From<ExplorationError> for AppError {
    fn from(e: ExplorationError) -> Self {
        match e {
            ExplorationError::Link(inner) => inner.into(),
            other => Self::Exploration(other.to_string()),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound
        } else {
            Self::Io(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_serializes_to_kind_message() {
        let err = AppError::Io("disk full".to_string());
        let value = serde_json::to_value(&err).expect("serialize AppError::Io");
        assert_eq!(value["kind"], "Io");
        assert_eq!(value["message"], "disk full");
    }

    #[test]
    fn file_not_found_serializes_with_kind() {
        let value = serde_json::to_value(AppError::FileNotFound).expect("serialize");
        assert_eq!(value["kind"], "FileNotFound");
    }

    #[test]
    fn from_config_error_produces_config_variant() {
        let err = AppError::from(ConfigError::Invalid("bad step".to_string()));
        let value = serde_json::to_value(&err).expect("serialize");
        assert_eq!(value["kind"], "Config");
        assert_eq!(value["message"], "config error: bad step");
    }

    #[test]
    fn from_session_error_splits_stream_and_connection() {
        assert!(matches!(
            AppError::from(SessionError::StreamActive),
            AppError::Stream(_)
        ));
        assert!(matches!(
            AppError::from(SessionError::NotConnected),
            AppError::Connection(_)
        ));
    }

    #[test]
    fn from_exploration_error_unwraps_link_failures() {
        let err = AppError::from(ExplorationError::Link(SessionError::NotConnected));
        assert!(matches!(err, AppError::Connection(ref m) if m == "not connected"));
        let err = AppError::from(ExplorationError::NoAxes);
        assert!(matches!(err, AppError::Exploration(_)));
    }

    #[test]
    fn from_io_error_maps_not_found() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(AppError::from(missing), AppError::FileNotFound));
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(AppError::from(denied), AppError::Io(_)));
    }

    #[test]
    fn app_error_display_is_human_readable() {
        assert_eq!(AppError::FileNotFound.to_string(), "file not found");
        assert_eq!(
            AppError::Exploration("no axes selected".to_string()).to_string(),
            "no axes selected"
        );
    }
}
