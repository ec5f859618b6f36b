#[cfg(test)]
use mockall::automock;

use crate::reader::ports::list_ports;

/// Abstraction over serial port enumeration.
/// This allows discovery to run against a fixed port list in tests.
#[cfg_attr(test, automock)]
pub trait PortLister: Send + Sync {
    /// Names of the ports currently visible, in host order
    fn list_ports(&self) -> Vec<String>;
}

/// Real implementation that asks the operating system
#[derive(Default)]
pub struct SystemPortLister;

impl PortLister for SystemPortLister {
    fn list_ports(&self) -> Vec<String> {
        list_ports()
    }
}
