//! Healthcheck handshake used to recognize the reader firmware.
//!
//! The probe opens one candidate port, waits for the board to boot,
//! transmits the healthcheck a fixed number of times and then listens for
//! a `{"status":"online"}` line. The port is closed again before the probe
//! returns, whatever the result.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::config::{pause, LinkTiming};
use super::error::{ReaderError, ReaderResult};
use super::lines::LineChannel;
use super::message::{is_online_reply, HealthcheckRequest};
use super::transport::TransportOpener;

/// Why a probe ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeReason {
    Online,
    OpenFailed,
    WriteFailed,
    NoResponse,
}

/// Result of probing one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeOutcome {
    pub port: String,
    pub reason: HandshakeReason,
    /// Diagnostic text for failures.
    pub detail: Option<String>,
    /// Non-empty lines received that did not announce an online reader.
    pub ignored_lines: usize,
}

impl HandshakeOutcome {
    pub fn succeeded(&self) -> bool {
        self.reason == HandshakeReason::Online
    }

    /// Convert a failed outcome into the matching error.
    ///
    /// Returns `None` for a successful probe.
    pub fn to_error(&self, timing: &LinkTiming) -> Option<ReaderError> {
        let port = self.port.clone();
        let reason = self.detail.clone().unwrap_or_default();
        match self.reason {
            HandshakeReason::Online => None,
            HandshakeReason::OpenFailed => Some(ReaderError::PortOpenFailed { port, reason }),
            HandshakeReason::WriteFailed => Some(ReaderError::WriteFailed { port, reason }),
            HandshakeReason::NoResponse if self.ignored_lines > 0 => {
                Some(ReaderError::HandshakeMalformed {
                    port,
                    ignored_lines: self.ignored_lines,
                })
            }
            HandshakeReason::NoResponse => Some(ReaderError::HandshakeTimeout {
                port,
                window_ms: timing.listen_window.as_millis() as u64,
            }),
        }
    }
}

/// Failure of the request/response part of a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandshakeFailure {
    pub reason: HandshakeReason,
    pub detail: String,
    pub ignored_lines: usize,
}

/// A line-oriented link the healthcheck can run over: a fresh probe
/// channel or the live connection.
pub(crate) trait LineLink {
    /// Write and flush one payload.
    fn send_payload(&mut self, payload: &[u8]) -> ReaderResult<()>;

    /// Wait up to `timeout` for the next complete line.
    fn next_line(&mut self, timeout: Duration) -> ReaderResult<Option<String>>;
}

/// [`LineLink`] over a channel owned by a probe.
struct ProbeLink<'c> {
    channel: &'c mut LineChannel,
    slice: Duration,
}

impl LineLink for ProbeLink<'_> {
    fn send_payload(&mut self, payload: &[u8]) -> ReaderResult<()> {
        self.channel.send(payload)
    }

    fn next_line(&mut self, timeout: Duration) -> ReaderResult<Option<String>> {
        self.channel.read_line(timeout, self.slice)
    }
}

/// Send the healthcheck and wait for the online reply.
///
/// Returns the number of ignored lines on success.
pub(crate) fn exchange_healthcheck(
    timing: &LinkTiming,
    link: &mut dyn LineLink,
) -> Result<usize, HandshakeFailure> {
    let payload = HealthcheckRequest::wire_bytes();

    // Sent unconditionally; the first bytes after a reset are often lost.
    for attempt in 1..=timing.healthcheck_attempts {
        link.send_payload(payload).map_err(|e| HandshakeFailure {
            reason: HandshakeReason::WriteFailed,
            detail: e.to_string(),
            ignored_lines: 0,
        })?;
        debug!(attempt, "Healthcheck sent");
        pause(timing.healthcheck_interval);
    }

    let deadline = Instant::now() + timing.listen_window;
    let mut ignored_lines = 0;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match link.next_line(remaining) {
            Ok(Some(line)) => {
                if line.is_empty() {
                    continue;
                }
                if is_online_reply(&line) {
                    return Ok(ignored_lines);
                }
                debug!(line = %line, "Ignoring non-qualifying line");
                ignored_lines += 1;
            }
            Ok(None) => break,
            Err(e) => {
                return Err(HandshakeFailure {
                    reason: HandshakeReason::NoResponse,
                    detail: format!("read failed: {}", e),
                    ignored_lines,
                })
            }
        }
    }

    Err(HandshakeFailure {
        reason: HandshakeReason::NoResponse,
        detail: format!(
            "no online reply within {}ms",
            timing.listen_window.as_millis()
        ),
        ignored_lines,
    })
}

/// Probes candidate ports for the reader firmware.
pub struct HandshakeProbe<'a> {
    opener: &'a dyn TransportOpener,
    timing: LinkTiming,
}

impl<'a> HandshakeProbe<'a> {
    pub fn new(opener: &'a dyn TransportOpener, timing: LinkTiming) -> Self {
        Self { opener, timing }
    }

    /// Probe one port. Never leaves the port open.
    pub fn probe(&self, port: &str) -> HandshakeOutcome {
        let transport = match self.opener.open(port) {
            Ok(transport) => transport,
            Err(e) => {
                debug!(port = %port, error = %e, "Probe could not open port");
                return HandshakeOutcome {
                    port: port.to_string(),
                    reason: HandshakeReason::OpenFailed,
                    detail: Some(e.to_string()),
                    ignored_lines: 0,
                };
            }
        };

        // Dropping the channel at the end of this function closes the port.
        let mut channel = LineChannel::new(transport);

        pause(self.timing.boot_settle);

        if let Err(e) = channel.clear() {
            warn!(port = %port, error = %e, "Failed to clear port buffers");
        }

        let mut link = ProbeLink {
            channel: &mut channel,
            slice: self.timing.poll_slice,
        };
        let result = exchange_healthcheck(&self.timing, &mut link);

        let outcome = match result {
            Ok(ignored_lines) => HandshakeOutcome {
                port: port.to_string(),
                reason: HandshakeReason::Online,
                detail: None,
                ignored_lines,
            },
            Err(failure) => HandshakeOutcome {
                port: port.to_string(),
                reason: failure.reason,
                detail: Some(failure.detail),
                ignored_lines: failure.ignored_lines,
            },
        };

        drop(channel);
        debug!(port = %port, reason = ?outcome.reason, "Probe finished, port closed");
        outcome
    }
}
