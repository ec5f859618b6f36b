//! Discovery of and persistent connection to a serial RFID reader.

pub mod cli;
pub mod commands;
pub mod logging;
pub mod reader;
pub mod settings;
pub mod traits;

#[cfg(test)]
mod test_helpers;
