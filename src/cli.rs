use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Find a serial RFID reader and read card UIDs from it.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a reader settings file
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Print results as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// List the serial ports visible to this host.
    Ports,

    /// Probe every port and report where the reader is.
    Discover,

    /// Wait for one card and print its UID.
    Read {
        /// Use this port instead of discovering the reader
        #[arg(long)]
        port: Option<String>,

        /// How long to wait for a card
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Print every card presented until interrupted.
    Watch {
        /// Use this port instead of discovering the reader
        #[arg(long)]
        port: Option<String>,

        /// Drop repeated reads of the same card within this window
        #[arg(long)]
        cooldown_ms: Option<u64>,

        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Write a settings file containing the defaults.
    InitSettings {
        /// Where to write the file
        path: PathBuf,
    },
}
