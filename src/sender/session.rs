use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use super::reader::{self, SERIAL_ERROR_PREFIX};
use super::transport::{open_serial, Transport};
use super::{MachineLink, SessionError};
use crate::config::ConnectionConfig;
use crate::protocol::{Realtime, Response, StatusReport};

/// Default pause after the connect flush before stale input is discarded.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

/// Upper bound on how long `disconnect` waits for the reader thread.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

type SharedWriter = Arc<Mutex<Box<dyn Transport>>>;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of the program stream.
///
/// `acked <= sent <= total` always holds. `awaiting_ack` is set only while
/// exactly one streamed line is outstanding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingProgress {
    pub total: usize,
    pub sent: usize,
    pub acked: usize,
    pub streaming: bool,
    pub paused: bool,
    pub awaiting_ack: bool,
    pub last_error: Option<String>,
}

/// Cloneable handle for sending realtime bytes from another thread.
///
/// Shares the session's write lock.
#[derive(Clone)]
pub struct RealtimeHandle {
    writer: SharedWriter,
}

impl RealtimeHandle {
    pub fn send(&self, command: Realtime) -> Result<(), SessionError> {
        write_locked(&self.writer, command.as_bytes())
    }
}

fn write_locked(writer: &SharedWriter, payload: &[u8]) -> Result<(), SessionError> {
    let mut guard = writer
        .lock()
        .map_err(|_| SessionError::Io(std::io::Error::other("transport lock poisoned")))?;
    guard.write_all(payload)?;
    guard.flush()?;
    Ok(())
}

/// Owns the controller link and enforces the one-outstanding-line discipline
/// while streaming a program.
pub struct StreamingSession {
    state: ConnectionState,
    settle: Duration,
    writer: Option<SharedWriter>,
    inbound: Option<UnboundedReceiver<String>>,
    reader: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    queue: VecDeque<String>,
    progress: StreamingProgress,
    status: Option<StatusReport>,
}

impl Default for StreamingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingSession {
    pub fn new() -> Self {
        Self::with_settle(DEFAULT_SETTLE)
    }

    /// Creates a session that waits `settle` after the connect flush.
    pub fn with_settle(settle: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            settle,
            writer: None,
            inbound: None,
            reader: None,
            stop: Arc::new(AtomicBool::new(false)),
            queue: VecDeque::new(),
            progress: StreamingProgress::default(),
            status: None,
        }
    }

    // ── connection lifecycle ─────────────────────────────────────────────────

    /// Opens the serial port described by `config` and connects over it.
    ///
    /// A no-op when already connected.
    pub fn connect_serial(&mut self, config: &ConnectionConfig) -> Result<(), SessionError> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        let transport = open_serial(
            &config.port,
            config.baud_rate,
            Duration::from_millis(config.read_timeout_ms),
        )?;
        self.connect(transport)
    }

    /// Takes ownership of `transport`, flushes the controller's line buffer
    /// and starts the background reader.
    ///
    /// A no-op when already connected.
    pub fn connect(&mut self, mut transport: Box<dyn Transport>) -> Result<(), SessionError> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;

        // Two blank lines terminate any partial command the controller holds.
        let flushed = transport
            .write_all(b"\r\n\r\n")
            .and_then(|()| transport.flush());
        if let Err(e) = flushed {
            tracing::warn!(error = %e, "connect flush failed");
        }
        std::thread::sleep(self.settle);
        if let Err(e) = transport.discard_input() {
            tracing::warn!(error = %e, "discarding stale input failed");
        }

        let source = match transport.try_clone_reader() {
            Ok(source) => source,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };

        let (tx, rx) = unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = match reader::spawn(source, tx, Arc::clone(&stop)) {
            Ok(handle) => handle,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };

        self.writer = Some(Arc::new(Mutex::new(transport)));
        self.inbound = Some(rx);
        self.reader = Some(handle);
        self.stop = stop;
        self.status = None;
        self.state = ConnectionState::Connected;
        tracing::info!("controller connected");
        Ok(())
    }

    /// Stops any stream, ends the reader and releases the transport.
    ///
    /// Idempotent.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.stop_stream();
        self.stop.store(true, Ordering::Relaxed);

        if let Some(handle) = self.reader.take() {
            let deadline = Instant::now() + READER_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::warn!("reader thread did not stop in time; detaching");
            }
        }

        self.writer = None;
        self.inbound = None;
        self.state = ConnectionState::Disconnected;
        tracing::info!("controller disconnected");
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    // ── direct commands ──────────────────────────────────────────────────────

    /// Sends one newline-terminated line outside the ack-gate.
    ///
    /// Empty lines are ignored. The caller correlates any response.
    pub fn send_line(&self, line: &str) -> Result<(), SessionError> {
        let line = line.trim_end();
        if line.is_empty() {
            return Ok(());
        }
        tracing::debug!(%line, "tx");
        self.write(format!("{line}\n").as_bytes())
    }

    /// Sends a realtime command byte with no newline.
    pub fn send_realtime_command(&self, command: Realtime) -> Result<(), SessionError> {
        self.write(command.as_bytes())
    }

    pub fn send_soft_reset(&self) -> Result<(), SessionError> {
        self.send_realtime_command(Realtime::SoftReset)
    }

    pub fn request_status(&self) -> Result<(), SessionError> {
        self.send_realtime_command(Realtime::StatusQuery)
    }

    pub fn send_feed_hold(&self) -> Result<(), SessionError> {
        self.send_realtime_command(Realtime::FeedHold)
    }

    pub fn send_cycle_resume(&self) -> Result<(), SessionError> {
        self.send_realtime_command(Realtime::CycleResume)
    }

    /// Handle for sending realtime bytes from another thread, while connected.
    pub fn realtime_handle(&self) -> Option<RealtimeHandle> {
        self.writer.as_ref().map(|writer| RealtimeHandle {
            writer: Arc::clone(writer),
        })
    }

    fn write(&self, payload: &[u8]) -> Result<(), SessionError> {
        match (&self.state, &self.writer) {
            (ConnectionState::Connected, Some(writer)) => write_locked(writer, payload),
            _ => Err(SessionError::NotConnected),
        }
    }

    // ── inbound ──────────────────────────────────────────────────────────────

    /// Returns up to `limit` received lines without blocking and without
    /// processing them.
    pub fn drain_lines(&mut self, limit: Option<usize>) -> Vec<String> {
        let mut lines = Vec::new();
        let Some(rx) = self.inbound.as_mut() else {
            return lines;
        };
        while limit.map_or(true, |max| lines.len() < max) {
            match rx.try_recv() {
                Ok(line) => lines.push(line),
                Err(_) => break,
            }
        }
        lines
    }

    /// Drains received lines, updates stream and status state from them and
    /// returns them for display.
    pub fn poll(&mut self) -> Vec<String> {
        let lines = self.drain_lines(None);
        for line in &lines {
            self.handle_line(line);
        }
        lines
    }

    /// Latest status report.
    pub fn status(&self) -> Option<&StatusReport> {
        self.status.as_ref()
    }

    fn handle_line(&mut self, line: &str) {
        if line.starts_with(SERIAL_ERROR_PREFIX) {
            tracing::warn!(%line, "reader stopped");
            if self.progress.streaming {
                self.halt_stream(line.to_string());
            }
            return;
        }

        match Response::classify(line) {
            Response::Status(report) => self.status = Some(report),
            Response::Ok => {
                if !self.progress.streaming || !self.progress.awaiting_ack {
                    return;
                }
                self.progress.acked += 1;
                self.progress.awaiting_ack = false;
                if let Err(e) = self.send_next_line() {
                    self.halt_stream(format!("write failed: {e}"));
                }
            }
            Response::Error(text) | Response::Alarm(text) => {
                tracing::warn!(line = %text, "controller fault");
                self.halt_stream(text);
            }
            _ => {}
        }
    }

    // ── streaming ────────────────────────────────────────────────────────────

    /// Loads `lines` and sends the first one.
    ///
    /// Blank lines are dropped before counting. Refused while another stream
    /// is active.
    pub fn start_stream<I, S>(&mut self, lines: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        if self.progress.streaming {
            return Err(SessionError::StreamActive);
        }

        self.queue.clear();
        self.queue.extend(lines.into_iter().filter_map(|line| {
            let line: String = line.into();
            let line = line.trim();
            (!line.is_empty()).then(|| line.to_string())
        }));
        self.progress = StreamingProgress {
            total: self.queue.len(),
            streaming: !self.queue.is_empty(),
            ..StreamingProgress::default()
        };
        tracing::info!(total = self.progress.total, "stream started");

        if let Err(e) = self.send_next_line() {
            self.halt_stream(format!("write failed: {e}"));
            return Err(e);
        }
        Ok(())
    }

    /// Stops sending further lines; the queue is kept.
    pub fn pause_stream(&mut self) {
        if self.progress.streaming {
            self.progress.paused = true;
        }
    }

    /// Clears the pause and sends the next line unless one is outstanding.
    pub fn resume_stream(&mut self) -> Result<(), SessionError> {
        if !self.progress.streaming {
            return Ok(());
        }
        self.progress.paused = false;
        if let Err(e) = self.send_next_line() {
            self.halt_stream(format!("write failed: {e}"));
            return Err(e);
        }
        Ok(())
    }

    /// Drops the queue and clears the streaming flags. Counters are kept until
    /// the next `start_stream`.
    pub fn stop_stream(&mut self) {
        self.queue.clear();
        self.progress.streaming = false;
        self.progress.paused = false;
        self.progress.awaiting_ack = false;
    }

    pub fn is_streaming(&self) -> bool {
        self.progress.streaming
    }

    pub fn is_paused(&self) -> bool {
        self.progress.paused
    }

    pub fn progress(&self) -> &StreamingProgress {
        &self.progress
    }

    /// Lines loaded but not yet sent.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn send_next_line(&mut self) -> Result<(), SessionError> {
        let p = &self.progress;
        if !p.streaming || p.paused || p.awaiting_ack {
            return Ok(());
        }
        let Some(line) = self.queue.pop_front() else {
            self.progress.streaming = false;
            tracing::info!(acked = self.progress.acked, "stream complete");
            return Ok(());
        };
        self.send_line(&line)?;
        self.progress.sent += 1;
        self.progress.awaiting_ack = true;
        Ok(())
    }

    fn halt_stream(&mut self, reason: String) {
        self.progress.last_error = Some(reason);
        self.progress.streaming = false;
        self.progress.paused = false;
        self.progress.awaiting_ack = false;
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl MachineLink for StreamingSession {
    fn poll(&mut self) -> Vec<String> {
        StreamingSession::poll(self)
    }

    fn status(&self) -> Option<&StatusReport> {
        StreamingSession::status(self)
    }

    fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        StreamingSession::send_line(self, line)
    }

    fn send_realtime(&mut self, command: Realtime) -> Result<(), SessionError> {
        self.send_realtime_command(command)
    }

    fn is_streaming(&self) -> bool {
        StreamingSession::is_streaming(self)
    }
}
