//! Sequential discovery of the reader among the host's serial ports.
//!
//! Candidates are probed one at a time, in enumeration order. The first
//! port that answers the healthcheck wins and the remaining ports are never
//! touched.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::LinkTiming;
use super::error::{ReaderError, ReaderResult};
use super::handshake::{HandshakeOutcome, HandshakeProbe};
use super::transport::TransportOpener;
use crate::traits::PortLister;

/// Discovery progress stages for UI feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data")]
pub enum DiscoveryStage {
    /// Port list obtained.
    Scanning { ports: usize },
    /// About to probe a candidate.
    Probing {
        port: String,
        index: usize,
        total: usize,
    },
    /// A candidate was probed and rejected.
    Probed { outcome: HandshakeOutcome },
    /// The reader answered on this port.
    Found { port: String },
    /// Every candidate was rejected.
    NotFound { probed: usize },
}

impl DiscoveryStage {
    /// Get a human-readable message for this stage.
    pub fn message(&self) -> String {
        match self {
            DiscoveryStage::Scanning { ports } => format!("Found {} serial port(s)", ports),
            DiscoveryStage::Probing { port, index, total } => {
                format!("Probing {} ({}/{})...", port, index + 1, total)
            }
            DiscoveryStage::Probed { outcome } => match &outcome.detail {
                Some(detail) => format!("No reader on {}: {}", outcome.port, detail),
                None => format!("No reader on {}", outcome.port),
            },
            DiscoveryStage::Found { port } => format!("Reader found on {}", port),
            DiscoveryStage::NotFound { probed } => {
                format!("No reader found after probing {} port(s)", probed)
            }
        }
    }
}

/// Finds the port the reader is attached to.
pub struct Discovery<'a> {
    lister: &'a dyn PortLister,
    opener: &'a dyn TransportOpener,
    timing: LinkTiming,
}

impl<'a> Discovery<'a> {
    pub fn new(lister: &'a dyn PortLister, opener: &'a dyn TransportOpener, timing: LinkTiming) -> Self {
        Self {
            lister,
            opener,
            timing,
        }
    }

    /// Return the first port whose probe succeeds.
    ///
    /// # Errors
    /// `NoReaderFound` if the list is empty or every probe fails.
    pub fn discover(&self) -> ReaderResult<String> {
        self.discover_with(|_| {})
    }

    /// Like [`discover`](Self::discover), reporting each stage to `on_progress`.
    pub fn discover_with<F>(&self, mut on_progress: F) -> ReaderResult<String>
    where
        F: FnMut(DiscoveryStage),
    {
        let ports = self.lister.list_ports();
        let total = ports.len();
        info!(
            ports = total,
            per_port_ms = self.timing.probe_budget().as_millis() as u64,
            "Discovering reader"
        );
        on_progress(DiscoveryStage::Scanning { ports: total });

        let probe = HandshakeProbe::new(self.opener, self.timing);

        for (index, port) in ports.into_iter().enumerate() {
            on_progress(DiscoveryStage::Probing {
                port: port.clone(),
                index,
                total,
            });

            let outcome = probe.probe(&port);
            if outcome.succeeded() {
                info!(port = %port, "Reader found");
                on_progress(DiscoveryStage::Found { port: port.clone() });
                return Ok(port);
            }

            if let Some(e) = outcome.to_error(&self.timing) {
                debug!(port = %port, error = %e, code = e.error_code(), "Port rejected");
            }
            on_progress(DiscoveryStage::Probed { outcome });
        }

        warn!(probed = total, "No reader found");
        on_progress(DiscoveryStage::NotFound { probed: total });
        Err(ReaderError::NoReaderFound { probed: total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::mock_port::{fast_timing, PortScript, ScriptedOpener};
    use crate::traits::MockPortLister;

    const ONLINE: &str = "{\"status\":\"online\"}";

    fn lister(ports: &[&str]) -> MockPortLister {
        let ports: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
        let mut lister = MockPortLister::new();
        lister.expect_list_ports().times(1).return_const(ports);
        lister
    }

    #[test]
    fn test_empty_port_list() {
        let lister = lister(&[]);
        let opener = ScriptedOpener::new();

        let err = Discovery::new(&lister, &opener, fast_timing())
            .discover()
            .unwrap_err();

        assert!(matches!(err, ReaderError::NoReaderFound { probed: 0 }));
        assert_eq!(opener.total_attempts(), 0);
    }

    #[test]
    fn test_no_reader_probes_each_port_once() {
        let ports = ["/dev/ttyS0", "/dev/ttyUSB0", "/dev/ttyACM0"];
        let lister = lister(&ports);
        let opener = ScriptedOpener::new()
            .with_port(ports[0], PortScript::new().refuse_open())
            .with_port(ports[1], PortScript::new().line("garbage"))
            .with_port(ports[2], PortScript::new());

        let err = Discovery::new(&lister, &opener, fast_timing())
            .discover()
            .unwrap_err();

        assert!(matches!(err, ReaderError::NoReaderFound { probed: 3 }));
        for port in ports {
            assert_eq!(opener.open_attempts(port), 1, "{}", port);
        }
        assert!(opener.links(ports[1]).iter().all(|l| !l.is_open()));
        assert!(opener.links(ports[2]).iter().all(|l| !l.is_open()));
    }

    #[test]
    fn test_stops_at_first_reader() {
        let ports = ["/dev/ttyS0", "/dev/ttyACM0", "/dev/ttyACM1"];
        let lister = lister(&ports);
        let opener = ScriptedOpener::new()
            .with_port(ports[0], PortScript::new())
            .with_port(ports[1], PortScript::new().line(ONLINE))
            .with_port(ports[2], PortScript::new().line(ONLINE));

        let found = Discovery::new(&lister, &opener, fast_timing())
            .discover()
            .unwrap();

        assert_eq!(found, "/dev/ttyACM0");
        assert_eq!(opener.open_attempts(ports[2]), 0);
        assert!(!opener.last_link(ports[1]).is_open());
    }

    #[test]
    fn test_progress_events() {
        let ports = ["/dev/ttyS0", "/dev/ttyACM0"];
        let lister = lister(&ports);
        let opener = ScriptedOpener::new()
            .with_port(ports[0], PortScript::new().refuse_open())
            .with_port(ports[1], PortScript::new().line(ONLINE));

        let mut stages = Vec::new();
        Discovery::new(&lister, &opener, fast_timing())
            .discover_with(|stage| stages.push(stage))
            .unwrap();

        assert_eq!(stages.len(), 5);
        assert_eq!(stages[0], DiscoveryStage::Scanning { ports: 2 });
        assert!(matches!(stages[1], DiscoveryStage::Probing { index: 0, total: 2, .. }));
        assert!(matches!(stages[2], DiscoveryStage::Probed { .. }));
        assert!(matches!(stages[3], DiscoveryStage::Probing { index: 1, .. }));
        assert_eq!(
            stages[4],
            DiscoveryStage::Found {
                port: "/dev/ttyACM0".to_string()
            }
        );
    }

    #[test]
    fn test_stage_messages() {
        assert_eq!(
            DiscoveryStage::Probing {
                port: "COM3".to_string(),
                index: 0,
                total: 2
            }
            .message(),
            "Probing COM3 (1/2)..."
        );
        assert_eq!(
            DiscoveryStage::NotFound { probed: 4 }.message(),
            "No reader found after probing 4 port(s)"
        );
    }

    #[test]
    fn test_stage_serialization_is_tagged() {
        let json = serde_json::to_value(DiscoveryStage::Found {
            port: "COM3".to_string(),
        })
        .unwrap();

        assert_eq!(json["stage"], "Found");
        assert_eq!(json["data"]["port"], "COM3");
    }
}
