//! Byte transport to the controller.
//!
//! [`Transport`] is the seam between the session and the physical link so
//! the session can be driven by an in-memory double in tests.

use std::io::{self, Read, Write};
use std::time::Duration;

use super::SessionError;

/// A full-duplex byte link.
///
/// The session keeps the `Transport` itself for writing and hands the
/// reader returned by [`try_clone_reader`](Transport::try_clone_reader) to
/// its background thread. Reads on that handle should time out periodically
/// (`ErrorKind::TimedOut` or `WouldBlock`) so the reader can observe its
/// stop flag.
pub trait Transport: Write + Send {
    /// Returns an independent handle for reading.
    fn try_clone_reader(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Drops any bytes received but not yet read.
    fn discard_input(&mut self) -> io::Result<()>;
}

/// Opens a serial port in 8N1 with the given read/write timeout.
pub fn open_serial(
    port: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn Transport>, SessionError> {
    if port.is_empty() {
        return Err(SessionError::Open("port is required".to_string()));
    }
    let serial = serialport::new(port, baud_rate)
        .timeout(timeout)
        .open()
        .map_err(|e| SessionError::Open(format!("{port}: {e}")))?;
    Ok(Box::new(SerialTransport { port: serial }))
}

/// [`Transport`] over a `serialport` handle.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn try_clone_reader(&self) -> io::Result<Box<dyn Read + Send>> {
        let clone = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(clone))
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}
