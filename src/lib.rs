pub mod config;
pub mod error;
pub mod explore;
pub mod gcode;
pub mod protocol;
pub mod sender;

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;

/// Directory holding the log file.
///
///   Linux    ~/.local/share/routerking/
///   macOS    ~/Library/Application Support/routerking/
///   Windows  %LOCALAPPDATA%\routerking\
pub fn log_dir() -> PathBuf {
    dirs::data_local_dir().unwrap_or_default().join("routerking")
}

/// Installs the global tracing subscriber, writing to
/// `<log dir>/routerking.log`.
///
/// Log level is controlled by the RUST_LOG environment variable and
/// defaults to INFO. Keep the returned guard alive for the life of the
/// process; dropping it flushes and stops the background writer.
pub fn init_tracing() -> WorkerGuard {
    let log_dir = log_dir();

    // rolling::never panics if it cannot open the file, so create the
    // directory first. An unwritable data dir is fatal either way.
    let _ = std::fs::create_dir_all(&log_dir);

    let file_appender = tracing_appender::rolling::never(&log_dir, "routerking.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(non_blocking)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "RouterKing starting");
    guard
}
