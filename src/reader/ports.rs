//! Serial port enumeration.
//!
//! Discovery only needs port names, in the order the host reports them.
//! [`detect_ports`] adds the USB details for listings.

use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortInfo, SerialPortType};
use tracing::{debug, warn};

/// Kind of device behind a serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

impl From<&SerialPortType> for PortKind {
    fn from(port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(_) => PortKind::Usb,
            SerialPortType::PciPort => PortKind::Pci,
            SerialPortType::BluetoothPort => PortKind::Bluetooth,
            SerialPortType::Unknown => PortKind::Unknown,
        }
    }
}

/// A serial port visible to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedPort {
    /// Serial port path (e.g., "/dev/ttyACM0" or "COM3").
    pub port: String,
    pub kind: PortKind,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub product_name: Option<String>,
    pub manufacturer: Option<String>,
}

impl DetectedPort {
    fn from_info(info: &SerialPortInfo) -> Self {
        let mut detected = DetectedPort {
            port: info.port_name.clone(),
            kind: PortKind::from(&info.port_type),
            vid: None,
            pid: None,
            serial_number: None,
            product_name: None,
            manufacturer: None,
        };

        if let SerialPortType::UsbPort(usb) = &info.port_type {
            detected.vid = Some(usb.vid);
            detected.pid = Some(usb.pid);
            detected.serial_number = usb.serial_number.clone();
            detected.product_name = usb.product.clone();
            detected.manufacturer = usb.manufacturer.clone();
        }

        detected
    }

    /// Get a display label for this port.
    pub fn display_label(&self) -> String {
        match (&self.product_name, self.vid, self.pid) {
            (Some(name), _, _) => format!("{} ({})", name, self.port),
            (None, Some(vid), Some(pid)) => {
                format!("USB {:04x}:{:04x} ({})", vid, pid, self.port)
            }
            _ => self.port.clone(),
        }
    }
}

/// Whether `port_name` is the blocking `tty.*` twin of a macOS `cu.*` device.
///
/// Each USB serial device appears as both; the `cu.*` variant does not wait
/// for DCD.
fn is_macos_tty_twin(port_name: &str) -> bool {
    port_name.starts_with("/dev/tty.")
}

fn keep_port(port_name: &str) -> bool {
    !(cfg!(target_os = "macos") && is_macos_tty_twin(port_name))
}

/// Every serial port currently visible, with USB details where available.
///
/// Returns an empty list if enumeration fails.
pub fn detect_ports() -> Vec<DetectedPort> {
    let ports = match available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!(error = %e, "Serial port enumeration failed");
            return Vec::new();
        }
    };

    let detected: Vec<DetectedPort> = ports
        .iter()
        .filter(|info| keep_port(&info.port_name))
        .map(DetectedPort::from_info)
        .collect();

    debug!(count = detected.len(), "Serial ports enumerated");
    detected
}

/// Names of every serial port currently visible, in host order.
pub fn list_ports() -> Vec<String> {
    detect_ports().into_iter().map(|p| p.port).collect()
}
