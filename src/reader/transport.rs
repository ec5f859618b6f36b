//! Serial transport layer for the reader link.
//!
//! Provides a trait-based abstraction over serial communication,
//! enabling both real hardware and scripted test ports.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::debug;

use super::config::{READER_BAUD_RATE, SERIAL_READ_TIMEOUT};
use super::error::{ReaderError, ReaderResult};

/// Byte-level operations on one open port.
pub trait ReaderTransport: Send {
    /// Name of the port this transport was opened on.
    fn port_name(&self) -> &str;

    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> ReaderResult<()>;

    /// Read whatever is available, waiting at most `timeout`.
    ///
    /// # Returns
    /// Number of bytes read; `0` means nothing arrived in time.
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> ReaderResult<usize>;

    /// Flush any buffered output.
    fn flush(&mut self) -> ReaderResult<()>;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> ReaderResult<()>;
}

/// Opens transports by port name.
///
/// Dropping the returned transport closes the port.
pub trait TransportOpener: Send + Sync {
    fn open(&self, port: &str) -> ReaderResult<Box<dyn ReaderTransport>>;
}

/// Serial port transport implementation.
pub struct SerialTransport {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open a serial port at the reader's baud rate.
    pub fn open(port_name: &str) -> ReaderResult<Self> {
        Self::open_with_baud(port_name, READER_BAUD_RATE)
    }

    /// Open a serial port with a specific baud rate.
    ///
    /// Retries a few times on transient errors, which show up while a USB
    /// device is still re-enumerating after a reset.
    pub fn open_with_baud(port_name: &str, baud_rate: u32) -> ReaderResult<Self> {
        let normalized_name = normalize_port_name(port_name);

        const MAX_OPEN_RETRIES: u32 = 3;
        const RETRY_DELAY: Duration = Duration::from_millis(200);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = serialport::new(&normalized_name, baud_rate)
                .timeout(SERIAL_READ_TIMEOUT)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::None)
                .open();

            match result {
                Ok(port) => {
                    debug!(port = %port_name, baud_rate, "Serial port opened");
                    return Ok(Self {
                        name: port_name.to_string(),
                        port,
                    });
                }
                Err(e) => {
                    let err_str = e.to_string().to_lowercase();

                    let is_transient = err_str.contains("not functioning")
                        || err_str.contains("temporarily unavailable")
                        || err_str.contains("interrupted");

                    if is_transient && attempt < MAX_OPEN_RETRIES {
                        debug!(port = %port_name, attempt, error = %e, "Transient open failure, retrying");
                        std::thread::sleep(RETRY_DELAY);
                        continue;
                    }

                    return Err(classify_open_error(port_name, e));
                }
            }
        }
    }
}

fn classify_open_error(port_name: &str, e: serialport::Error) -> ReaderError {
    let err_str = e.to_string().to_lowercase();
    match e.kind() {
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            ReaderError::PortPermissionDenied {
                port: port_name.to_string(),
            }
        }
        _ if err_str.contains("busy") || err_str.contains("in use") => ReaderError::PortBusy {
            port: port_name.to_string(),
        },
        _ => ReaderError::PortOpenFailed {
            port: port_name.to_string(),
            reason: e.to_string(),
        },
    }
}

impl ReaderTransport for SerialTransport {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> ReaderResult<()> {
        self.port.write_all(data).map_err(ReaderError::Io)
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> ReaderResult<usize> {
        self.port.set_timeout(timeout).map_err(ReaderError::Serial)?;

        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(ReaderError::Io(e)),
        }
    }

    fn flush(&mut self) -> ReaderResult<()> {
        self.port.flush().map_err(ReaderError::Io)
    }

    fn clear_buffers(&mut self) -> ReaderResult<()> {
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(ReaderError::Serial)
    }
}

/// Opens [`SerialTransport`]s at a fixed baud rate.
#[derive(Debug, Clone, Copy)]
pub struct SerialOpener {
    baud_rate: u32,
}

impl SerialOpener {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialOpener {
    fn default() -> Self {
        Self::new(READER_BAUD_RATE)
    }
}

impl TransportOpener for SerialOpener {
    fn open(&self, port: &str) -> ReaderResult<Box<dyn ReaderTransport>> {
        let transport = SerialTransport::open_with_baud(port, self.baud_rate)?;
        Ok(Box::new(transport))
    }
}

/// Normalize a port name for cross-platform compatibility.
fn normalize_port_name(name: &str) -> String {
    #[cfg(target_os = "macos")]
    {
        // Prefer cu. over tty. for better compatibility
        if name.starts_with("/dev/tty.") {
            return name.replace("/dev/tty.", "/dev/cu.");
        }
    }

    #[cfg(target_os = "windows")]
    {
        // COM ports > 9 need \\.\\ prefix
        if let Some(number) = name.strip_prefix("COM") {
            if let Ok(n) = number.parse::<u32>() {
                if n > 9 {
                    return format!("\\\\.\\{}", name);
                }
            }
        }
    }

    name.to_string()
}
