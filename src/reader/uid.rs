//! Card UID reads over the live connection.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::connection::ConnectionManager;
use super::error::{ReaderError, ReaderResult};
use super::message::parse_uid_line;

/// A card presented to the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UidEvent {
    pub uid: String,
    pub observed_at: DateTime<Utc>,
}

impl UidEvent {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            observed_at: Utc::now(),
        }
    }
}

/// Filters the line stream of a connection down to UID messages.
///
/// The firmware also prints diagnostics, so anything that is not a JSON
/// object with a string `uid` is skipped.
pub struct UidReader<'a> {
    connection: &'a ConnectionManager,
}

impl<'a> UidReader<'a> {
    pub fn new(connection: &'a ConnectionManager) -> Self {
        Self { connection }
    }

    /// Return the first UID observed within `timeout`.
    ///
    /// # Errors
    /// - `ReadTimeout` if no card was presented in time
    /// - device-loss errors (`IoDisconnect`) are passed through untouched;
    ///   other read errors are skipped like noise
    pub fn read_uid(&self, timeout: Duration) -> ReaderResult<UidEvent> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match self.connection.read_line_with_timeout(remaining) {
                Ok(Some(line)) => {
                    if line.is_empty() {
                        continue;
                    }
                    match parse_uid_line(&line) {
                        Some(uid) => {
                            info!(uid = %uid, "UID read");
                            return Ok(UidEvent::new(uid));
                        }
                        None => debug!(line = %line, "Skipping non-UID line"),
                    }
                }
                Ok(None) => break,
                Err(e) if e.is_device_loss() || matches!(e, ReaderError::NotConnected) => {
                    return Err(e)
                }
                Err(e) => {
                    debug!(error = %e, "Ignoring read error");
                    std::thread::yield_now();
                }
            }
        }

        Err(ReaderError::ReadTimeout {
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::mock_port::{fast_timing, PortScript, ScriptedOpener};
    use std::sync::Arc;

    const PORT: &str = "/dev/ttyACM0";

    fn connected(script: PortScript) -> ConnectionManager {
        let opener = Arc::new(ScriptedOpener::new().with_port(PORT, script));
        let manager = ConnectionManager::new(opener, fast_timing());
        manager.open(PORT).unwrap();
        manager
    }

    #[test]
    fn test_reads_uid() {
        let manager = connected(PortScript::new().line("{\"uid\":\"04A1B2C3\"}"));

        let event = UidReader::new(&manager).read_uid(Duration::from_millis(200)).unwrap();

        assert_eq!(event.uid, "04A1B2C3");
    }

    #[test]
    fn test_extra_fields_ignored() {
        let manager = connected(PortScript::new().line("{\"uid\":\"04A1B2C3\",\"extra\":true}"));

        let event = UidReader::new(&manager).read_uid(Duration::from_millis(200)).unwrap();

        assert_eq!(event.uid, "04A1B2C3");
    }

    #[test]
    fn test_noise_is_skipped() {
        let manager = connected(
            PortScript::new()
                .line("Scan PICC to see UID")
                .line("")
                .line("{\"status\":\"online\"}")
                .line("{\"uid\":42}")
                .line("{\"uid\":\"DEADBEEF\"}"),
        );

        let event = UidReader::new(&manager).read_uid(Duration::from_millis(200)).unwrap();

        assert_eq!(event.uid, "DEADBEEF");
    }

    #[test]
    fn test_timeout_without_card() {
        let manager = connected(PortScript::new().line("waiting"));

        let err = UidReader::new(&manager).read_uid(Duration::from_millis(40)).unwrap_err();

        assert!(matches!(err, ReaderError::ReadTimeout { timeout_ms: 40 }));
        assert!(err.is_timeout());
        assert!(manager.is_open());
    }

    #[test]
    fn test_disconnect_is_propagated() {
        let manager = connected(PortScript::new().fail_read(std::io::ErrorKind::BrokenPipe));

        let err = UidReader::new(&manager).read_uid(Duration::from_millis(100)).unwrap_err();

        assert!(err.is_device_loss());
    }

    #[test]
    fn test_transient_read_error_is_skipped() {
        let opener = Arc::new(ScriptedOpener::new().with_port(
            PORT,
            PortScript::new()
                .fail_read(std::io::ErrorKind::InvalidData)
                .line("{\"uid\":\"04A1B2C3\"}"),
        ));
        let manager = ConnectionManager::new(opener.clone(), fast_timing());
        manager.open(PORT).unwrap();

        let event = UidReader::new(&manager).read_uid(Duration::from_millis(200)).unwrap();

        assert_eq!(event.uid, "04A1B2C3");
        assert!(manager.is_open());
        assert_eq!(opener.open_attempts(PORT), 1);
    }

    #[test]
    fn test_uid_event_serializes_camel_case() {
        let event = UidEvent::new("04A1B2C3");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"observedAt\""));
        assert!(json.contains("\"uid\":\"04A1B2C3\""));
    }
}
