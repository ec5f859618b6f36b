//! Async commands for reader discovery and card reads.
//!
//! The reader core is blocking; these wrappers move it onto tokio's
//! blocking pool and flatten errors into display strings for callers that
//! only show them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::reader::{detect_ports, DetectedPort, DiscoveryStage, ReaderError, ReaderSession, UidEvent};

/// Serial port information for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPortEntry {
    /// Serial port path.
    pub port: String,
    /// Display label for the port.
    pub label: String,
    /// USB Vendor ID.
    pub vid: Option<u16>,
    /// USB Product ID.
    pub pid: Option<u16>,
    /// Device serial number (if available).
    pub serial_number: Option<String>,
}

impl From<DetectedPort> for SerialPortEntry {
    fn from(detected: DetectedPort) -> Self {
        Self {
            label: detected.display_label(),
            port: detected.port,
            vid: detected.vid,
            pid: detected.pid,
            serial_number: detected.serial_number,
        }
    }
}

/// Progress event sent to the caller during discovery.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryProgressEvent {
    /// Current stage name.
    pub stage: String,
    /// Port the stage refers to.
    pub port: Option<String>,
    /// Zero-based index of the probed port.
    pub index: Option<usize>,
    /// Number of candidate ports.
    pub total: Option<usize>,
    /// Human-readable message.
    pub message: String,
}

impl From<DiscoveryStage> for DiscoveryProgressEvent {
    fn from(stage: DiscoveryStage) -> Self {
        let (stage_name, port, index, total) = match &stage {
            DiscoveryStage::Scanning { ports } => ("scanning", None, None, Some(*ports)),
            DiscoveryStage::Probing { port, index, total } => {
                ("probing", Some(port.clone()), Some(*index), Some(*total))
            }
            DiscoveryStage::Probed { outcome } => {
                ("rejected", Some(outcome.port.clone()), None, None)
            }
            DiscoveryStage::Found { port } => ("found", Some(port.clone()), None, None),
            DiscoveryStage::NotFound { probed } => ("not_found", None, None, Some(*probed)),
        };

        Self {
            stage: stage_name.to_string(),
            port,
            index,
            total,
            message: stage.message(),
        }
    }
}

/// A card read, as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRead {
    pub uid: String,
    pub port: Option<String>,
    pub read_at: DateTime<Utc>,
}

impl CardRead {
    pub fn new(event: UidEvent, port: Option<String>) -> Self {
        Self {
            uid: event.uid,
            port,
            read_at: event.observed_at,
        }
    }
}

/// Format an error with its support code.
pub fn describe_error(error: &ReaderError) -> String {
    format!("[{}] {}", error.error_code(), error)
}

/// Number ports that share a display label ("Device #1", "Device #2").
fn number_duplicate_labels(entries: &mut [SerialPortEntry]) {
    let mut label_counts: HashMap<String, usize> = HashMap::new();
    for entry in entries.iter() {
        *label_counts.entry(entry.label.clone()).or_insert(0) += 1;
    }

    let mut label_indices: HashMap<String, usize> = HashMap::new();
    for entry in entries.iter_mut() {
        if label_counts.get(&entry.label).copied().unwrap_or(0) > 1 {
            let index = label_indices.entry(entry.label.clone()).or_insert(0);
            *index += 1;
            entry.label = format!("{} #{}", entry.label, index);
        }
    }
}

/// List the serial ports visible to the host.
pub async fn list_serial_ports() -> Result<Vec<SerialPortEntry>, String> {
    tokio::task::spawn_blocking(|| {
        let mut entries: Vec<SerialPortEntry> =
            detect_ports().into_iter().map(SerialPortEntry::from).collect();
        number_duplicate_labels(&mut entries);
        entries
    })
    .await
    .map_err(|e| format!("Failed to list ports: {}", e))
}

/// Find the reader and connect to it, reporting progress to `on_progress`.
pub async fn discover_reader<F>(session: Arc<ReaderSession>, on_progress: F) -> Result<String, String>
where
    F: Fn(DiscoveryProgressEvent) + Send + 'static,
{
    // Forward progress from the blocking thread
    let (tx, rx) = mpsc::channel::<DiscoveryStage>();
    let progress_task = thread::spawn(move || {
        while let Ok(stage) = rx.recv() {
            on_progress(DiscoveryProgressEvent::from(stage));
        }
    });

    let result = tokio::task::spawn_blocking(move || {
        session.discover_with(|stage| {
            let _ = tx.send(stage);
        })
    })
    .await
    .map_err(|e| format!("Discovery task panicked: {}", e))?;

    // Wait for progress forwarding to complete
    let _ = progress_task.join();

    result.map_err(|e| describe_error(&e))
}

/// Connect to a known port without probing.
pub async fn connect_reader(session: Arc<ReaderSession>, port: String) -> Result<String, String> {
    tokio::task::spawn_blocking(move || session.connect_to(&port))
        .await
        .map_err(|e| format!("Connect task panicked: {}", e))?
        .map_err(|e| describe_error(&e))
}

/// Wait for the next card on the connected reader.
pub async fn read_card(session: Arc<ReaderSession>, timeout_ms: u64) -> Result<CardRead, String> {
    tokio::task::spawn_blocking(move || {
        session
            .read_uid(Duration::from_millis(timeout_ms))
            .map(|event| CardRead::new(event, session.port()))
    })
    .await
    .map_err(|e| format!("Read task panicked: {}", e))?
    .map_err(|e| describe_error(&e))
}

/// Close the reader connection.
pub async fn disconnect_reader(session: Arc<ReaderSession>) -> Result<(), String> {
    tokio::task::spawn_blocking(move || session.shutdown())
        .await
        .map_err(|e| format!("Disconnect task panicked: {}", e))
}
