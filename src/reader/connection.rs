//! The single persistent connection to the confirmed reader port.
//!
//! [`ConnectionManager`] owns the one live [`LineChannel`]. Every read and
//! write goes through the same lock, so bytes of different callers never
//! interleave on the wire. Reads poll in short slices and drop the lock in
//! between, letting other callers in while a long read is pending.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::config::{pause, LinkTiming};
use super::error::{ReaderError, ReaderResult};
use super::handshake::{exchange_healthcheck, HandshakeOutcome, LineLink};
use super::lines::LineChannel;
use super::transport::TransportOpener;

/// The live transport handle.
struct Connection {
    port: String,
    opened_at: DateTime<Utc>,
    channel: LineChannel,
}

#[derive(Default)]
struct Slot {
    active: Option<Connection>,
    last_port: Option<String>,
}

/// Owner of the one live connection.
pub struct ConnectionManager {
    opener: Arc<dyn TransportOpener>,
    timing: LinkTiming,
    slot: Mutex<Slot>,
    /// Held for a whole `open` so two opens never hold handles at once.
    opening: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(opener: Arc<dyn TransportOpener>, timing: LinkTiming) -> Self {
        Self {
            opener,
            timing,
            slot: Mutex::new(Slot::default()),
            opening: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // A panicking caller cannot leave the slot half-updated.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn timing(&self) -> &LinkTiming {
        &self.timing
    }

    /// Open `port`, closing any existing connection first.
    ///
    /// Waits for the board to boot and clears stale buffered bytes, since
    /// opening the line usually resets the microcontroller. The slot is not
    /// locked during the wait, so status queries stay responsive and report
    /// no connection until the new one is in place.
    pub fn open(&self, port: &str) -> ReaderResult<()> {
        let _opening = self.opening.lock().unwrap_or_else(|e| e.into_inner());

        let previous = {
            let mut slot = self.lock();
            slot.last_port = Some(port.to_string());
            slot.active.take()
        };
        if let Some(previous) = previous {
            info!(port = %previous.port, "Closing previous connection");
            drop(previous);
        }

        let transport = self.opener.open(port)?;
        let mut channel = LineChannel::new(transport);

        pause(self.timing.boot_settle);

        if let Err(e) = channel.clear() {
            warn!(port = %port, error = %e, "Failed to clear port buffers");
        }

        self.lock().active = Some(Connection {
            port: port.to_string(),
            opened_at: Utc::now(),
            channel,
        });
        info!(port = %port, "Connection opened");
        Ok(())
    }

    /// Reopen the last port passed to [`open`](Self::open).
    pub fn reopen(&self) -> ReaderResult<String> {
        let port = self.last_port().ok_or(ReaderError::NotConnected)?;
        self.open(&port)?;
        Ok(port)
    }

    /// Release the handle. Safe to call when already closed.
    pub fn close(&self) {
        if let Some(connection) = self.lock().active.take() {
            info!(port = %connection.port, "Connection closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Port of the live connection.
    pub fn port(&self) -> Option<String> {
        self.lock().active.as_ref().map(|c| c.port.clone())
    }

    /// Last port opened, kept after the connection is lost or closed.
    pub fn last_port(&self) -> Option<String> {
        self.lock().last_port.clone()
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.lock().active.as_ref().map(|c| c.opened_at)
    }

    /// Wait up to `timeout` for the next complete line.
    ///
    /// # Returns
    /// - `Ok(Some(line))` for a decoded line (possibly empty)
    /// - `Ok(None)` if no terminator arrived in time; a partial line is dropped
    /// - `Err(IoDisconnect)` if the device or port went away; the handle is
    ///   released
    /// - any other I/O error as is, with the connection left open
    pub fn read_line_with_timeout(&self, timeout: Duration) -> ReaderResult<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut slot = self.lock();
                let connection = slot.active.as_mut().ok_or(ReaderError::NotConnected)?;

                let remaining = deadline.saturating_duration_since(Instant::now());
                let slice = remaining.min(self.timing.poll_slice);

                match connection.channel.poll_line(slice) {
                    Ok(Some(line)) => return Ok(Some(line)),
                    Ok(None) => {}
                    Err(e) if e.is_device_loss() => return Err(Self::fail(&mut slot, e)),
                    Err(e) => {
                        debug!(port = %connection.port, error = %e, "Transient read error");
                        return Err(e);
                    }
                }

                if Instant::now() >= deadline {
                    connection.channel.discard_partial();
                    return Ok(None);
                }
            }
            std::thread::yield_now();
        }
    }

    /// Write and flush `payload` on the live connection.
    pub fn write(&self, payload: &[u8]) -> ReaderResult<()> {
        let mut slot = self.lock();
        let connection = slot.active.as_mut().ok_or(ReaderError::NotConnected)?;

        match connection.channel.send(payload) {
            Ok(()) => Ok(()),
            Err(e) if e.is_device_loss() => Err(Self::fail(&mut slot, e)),
            Err(e) => {
                warn!(port = %connection.port, error = %e, "Write failed");
                Err(e)
            }
        }
    }

    /// Run the healthcheck exchange over the live connection.
    pub fn confirm_online(&self) -> ReaderResult<()> {
        let port = self.port().ok_or(ReaderError::NotConnected)?;
        let mut link = LiveLink { manager: self };

        match exchange_healthcheck(&self.timing, &mut link) {
            Ok(_) => {
                debug!(port = %port, "Reader confirmed online");
                Ok(())
            }
            Err(failure) => {
                let outcome = HandshakeOutcome {
                    port: port.clone(),
                    reason: failure.reason,
                    detail: Some(failure.detail),
                    ignored_lines: failure.ignored_lines,
                };
                Err(outcome
                    .to_error(&self.timing)
                    .unwrap_or(ReaderError::HandshakeTimeout {
                        port,
                        window_ms: self.timing.listen_window.as_millis() as u64,
                    }))
            }
        }
    }

    /// Release the handle of a lost device and report it as a disconnect.
    fn fail(slot: &mut Slot, error: ReaderError) -> ReaderError {
        let port = slot
            .active
            .take()
            .map(|c| c.port)
            .or_else(|| slot.last_port.clone())
            .unwrap_or_default();
        warn!(port = %port, error = %error, "Connection I/O failed");
        ReaderError::IoDisconnect {
            port,
            reason: error.to_string(),
        }
    }
}

/// [`LineLink`] over the live connection, going through the manager's lock.
struct LiveLink<'m> {
    manager: &'m ConnectionManager,
}

impl LineLink for LiveLink<'_> {
    fn send_payload(&mut self, payload: &[u8]) -> ReaderResult<()> {
        self.manager.write(payload)
    }

    fn next_line(&mut self, timeout: Duration) -> ReaderResult<Option<String>> {
        self.manager.read_line_with_timeout(timeout)
    }
}
