//! Background reader: turns the transport's byte stream into lines.

use std::io::{self, BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::UnboundedSender;

/// Prefix of the diagnostic line pushed when a read fails.
pub const SERIAL_ERROR_PREFIX: &str = "[serial error]";

/// Spawns the reader thread.
///
/// Complete, trimmed, non-empty lines are sent on `tx`. Read timeouts are
/// not errors; they give the loop a chance to observe `stop`. Any other read
/// failure (or EOF) pushes one diagnostic line and ends the thread, after
/// any unterminated last line.
pub fn spawn(
    source: Box<dyn Read + Send>,
    tx: UnboundedSender<String>,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("routerking-reader".to_string())
        .spawn(move || run(source, &tx, &stop))
}

fn run(source: Box<dyn Read + Send>, tx: &UnboundedSender<String>, stop: &AtomicBool) {
    let mut reader = BufReader::new(source);
    // Bytes of a line that was interrupted by a read timeout.
    let mut pending = Vec::new();

    while !stop.load(Ordering::Relaxed) {
        match reader.read_until(b'\n', &mut pending) {
            Ok(0) => {
                emit(&mut pending, tx);
                let _ = tx.send(format!("{SERIAL_ERROR_PREFIX} connection closed"));
                break;
            }
            Ok(_) => {
                if pending.last() != Some(&b'\n') {
                    // EOF in the middle of a line; keep it for the next pass.
                    continue;
                }
                if !emit(&mut pending, tx) {
                    // Receiver gone: the session was dropped.
                    break;
                }
            }
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "serial read failed, reader exiting");
                emit(&mut pending, tx);
                let _ = tx.send(format!("{SERIAL_ERROR_PREFIX} {e}"));
                break;
            }
        }
    }
}

/// Sends the buffered line, if it has any content, and clears the buffer.
/// Returns `false` once the receiver is gone.
fn emit(pending: &mut Vec<u8>, tx: &UnboundedSender<String>) -> bool {
    let line = String::from_utf8_lossy(pending).trim().to_string();
    pending.clear();
    if line.is_empty() {
        return true;
    }
    tracing::debug!(%line, "rx");
    tx.send(line).is_ok()
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
