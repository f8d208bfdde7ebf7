//! In-memory [`Transport`] for dry runs and tests.
//!
//! A [`LoopbackTransport`] is paired with a [`LoopbackPeer`] that plays the
//! controller side: it sees every byte the session writes and can inject
//! response lines or make writes fail.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::transport::Transport;

/// How long a loopback read waits before reporting a timeout.
const READ_POLL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Shared {
    written: Mutex<Vec<u8>>,
    fail_writes: AtomicBool,
}

/// Session-side half of the loopback pair.
pub struct LoopbackTransport {
    shared: Arc<Shared>,
    inbound: Arc<Mutex<Receiver<Vec<u8>>>>,
}

/// Controller-side half of the loopback pair.
#[derive(Clone)]
pub struct LoopbackPeer {
    shared: Arc<Shared>,
    tx: Sender<Vec<u8>>,
}

/// Creates a connected transport/peer pair.
pub fn pair() -> (LoopbackTransport, LoopbackPeer) {
    let shared = Arc::new(Shared::default());
    let (tx, rx) = mpsc::channel();
    (
        LoopbackTransport {
            shared: Arc::clone(&shared),
            inbound: Arc::new(Mutex::new(rx)),
        },
        LoopbackPeer { shared, tx },
    )
}

impl LoopbackPeer {
    /// Queues `line` (newline appended) for the session's reader.
    pub fn push_line(&self, line: &str) {
        let _ = self.tx.send(format!("{line}\n").into_bytes());
    }

    /// Everything written so far, decoded lossily.
    pub fn written(&self) -> String {
        let bytes = self
            .shared
            .written
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Newline-terminated lines written so far, with realtime bytes and
    /// blank flush lines removed.
    pub fn written_lines(&self) -> Vec<String> {
        self.written()
            .split('\n')
            .map(|l| {
                l.chars()
                    .filter(|c| !matches!(c, '?' | '!' | '~' | '\x18' | '\r'))
                    .collect::<String>()
            })
            .filter(|l| !l.is_empty())
            .collect()
    }

    pub fn clear_written(&self) {
        if let Ok(mut w) = self.shared.written.lock() {
            w.clear();
        }
    }

    /// Makes every subsequent write fail with `BrokenPipe`.
    pub fn fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::Relaxed);
    }
}

impl Write for LoopbackTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.shared.fail_writes.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "port closed"));
        }
        self.shared
            .written
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "loopback lock poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for LoopbackTransport {
    fn try_clone_reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(LoopbackReader {
            inbound: Arc::clone(&self.inbound),
            buffered: Vec::new(),
        }))
    }

    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct LoopbackReader {
    inbound: Arc<Mutex<Receiver<Vec<u8>>>>,
    buffered: Vec<u8>,
}

impl Read for LoopbackReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffered.is_empty() {
            let rx = self
                .inbound
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "loopback lock poisoned"))?;
            match rx.recv_timeout(READ_POLL) {
                Ok(bytes) => self.buffered = bytes,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = self.buffered.len().min(buf.len());
        buf[..n].copy_from_slice(&self.buffered[..n]);
        self.buffered.drain(..n);
        Ok(n)
    }
}
