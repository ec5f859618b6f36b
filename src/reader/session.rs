//! One reader, wired up end to end.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::config::LinkTiming;
use super::connection::ConnectionManager;
use super::discovery::{Discovery, DiscoveryStage};
use super::error::ReaderResult;
use super::supervisor::{ConnectionState, ReconnectionSupervisor, StateChange};
use super::transport::{SerialOpener, TransportOpener};
use super::uid::UidEvent;
use super::watch::{DuplicatePolicy, UidWatch};
use crate::settings::ReaderSettings;
use crate::traits::{PortLister, SystemPortLister};

/// Discovery, the live connection and reconnection behind one handle.
pub struct ReaderSession {
    lister: Arc<dyn PortLister>,
    opener: Arc<dyn TransportOpener>,
    supervisor: Arc<ReconnectionSupervisor>,
    timing: LinkTiming,
}

impl ReaderSession {
    pub fn new(
        lister: Arc<dyn PortLister>,
        opener: Arc<dyn TransportOpener>,
        timing: LinkTiming,
        verify_on_reconnect: bool,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::new(opener.clone(), timing));
        let supervisor =
            ReconnectionSupervisor::new(manager).with_verification(verify_on_reconnect);
        Self {
            lister,
            opener,
            supervisor: Arc::new(supervisor),
            timing,
        }
    }

    /// Session over the host's real serial ports.
    pub fn from_settings(settings: &ReaderSettings) -> Self {
        if settings.has_non_default_settings() {
            info!(settings = ?settings, "Using non-default reader settings");
        }
        Self::new(
            Arc::new(SystemPortLister),
            Arc::new(SerialOpener::new(settings.baud_rate)),
            settings.to_timing(),
            settings.verify_on_reconnect,
        )
    }

    pub fn timing(&self) -> &LinkTiming {
        &self.timing
    }

    /// Find the reader and open a connection to it.
    pub fn discover(&self) -> ReaderResult<String> {
        self.discover_with(|_| {})
    }

    pub fn discover_with<F>(&self, on_progress: F) -> ReaderResult<String>
    where
        F: FnMut(DiscoveryStage),
    {
        let discovery = Discovery::new(self.lister.as_ref(), self.opener.as_ref(), self.timing);
        self.supervisor
            .connect(move || discovery.discover_with(on_progress))
    }

    /// Open a known port without probing it.
    pub fn connect_to(&self, port: &str) -> ReaderResult<String> {
        self.supervisor.connect(|| Ok(port.to_string()))
    }

    pub fn read_uid(&self, timeout: Duration) -> ReaderResult<UidEvent> {
        self.supervisor.read_uid(timeout)
    }

    /// Start a background watch loop on this session's connection.
    pub fn watch(&self, poll_timeout: Duration, policy: DuplicatePolicy) -> UidWatch {
        UidWatch::spawn(self.supervisor.clone(), poll_timeout, policy)
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn subscribe(&self) -> Receiver<StateChange> {
        self.supervisor.subscribe()
    }

    /// Port of the live connection, if any.
    pub fn port(&self) -> Option<String> {
        self.supervisor.manager().port()
    }

    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }
}
