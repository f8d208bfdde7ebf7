//! Flow-controlled streaming session over a controller link.
//!
//! # Module structure
//!
//! ```text
//! sender/
//! ├── transport.rs — Transport trait + serial port implementation
//! ├── loopback.rs  — in-memory Transport paired with a controller-side peer
//! ├── reader.rs    — background thread: bytes → lines → inbound queue
//! └── session.rs   — connection lifecycle, ack-gated streaming, status
//! ```
//!
//! Threading: the reader thread is the only producer on the inbound queue;
//! everything else runs on whichever thread calls [`StreamingSession::poll`].
//! Writes go through a mutex so realtime bytes from another thread (via a
//! [`RealtimeHandle`]) never interleave with a line write.

pub mod loopback;
pub mod reader;
pub mod session;
pub mod transport;

pub use session::{ConnectionState, RealtimeHandle, StreamingProgress, StreamingSession};
pub use transport::{open_serial, Transport};

use crate::protocol::{Realtime, StatusReport};

/// Errors surfaced synchronously by the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,

    /// The transport could not be opened.
    #[error("cannot open port: {0}")]
    Open(String),

    /// A stream is already running; the call was refused.
    #[error("a stream is already active")]
    StreamActive,

    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The operations the limit explorer needs from a controller link.
///
/// Implemented by [`StreamingSession`]; tests substitute a simulated
/// controller.
pub trait MachineLink {
    /// Drains and returns every line received since the last call.
    fn poll(&mut self) -> Vec<String>;

    /// Latest status report, if any has been received.
    fn status(&self) -> Option<&StatusReport>;

    fn send_line(&mut self, line: &str) -> Result<(), SessionError>;

    fn send_realtime(&mut self, command: Realtime) -> Result<(), SessionError>;

    /// `true` while a program stream owns the ack-gate.
    fn is_streaming(&self) -> bool;
}
