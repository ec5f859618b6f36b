//! Connection state tracking and single-shot reconnection.
//!
//! # State Transition Diagram
//!
//! ```text
//!  Disconnected ──connect──► Probing ──found──► Connected
//!       ▲                      │                   │
//!       └────────not found─────┘          device lost
//!       │                                          ▼
//!       └─────────reopen failed─────────── Reconnecting
//!                                                  │
//!                          Connected ◄──reopened───┘
//! ```

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::connection::ConnectionManager;
use super::error::{ReaderError, ReaderResult};
use super::uid::{UidEvent, UidReader};

/// Lifecycle of the reader connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Probing,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Probing => "probing",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// One observed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub at: DateTime<Utc>,
}

/// Wraps the connection manager and reacts to lost devices.
pub struct ReconnectionSupervisor {
    manager: Arc<ConnectionManager>,
    verify_on_reconnect: bool,
    state: Mutex<ConnectionState>,
    observers: Mutex<Vec<Sender<StateChange>>>,
    /// Serializes connect, recovery and shutdown.
    lifecycle: Mutex<()>,
}

impl ReconnectionSupervisor {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            verify_on_reconnect: false,
            state: Mutex::new(ConnectionState::Disconnected),
            observers: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(()),
        }
    }

    /// Whether a reopened port must answer the healthcheck again before it
    /// counts as connected.
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_on_reconnect = verify;
        self
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    fn state_lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lifecycle_lock(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_lock()
    }

    /// Receive every state transition from now on.
    pub fn subscribe(&self) -> Receiver<StateChange> {
        let (tx, rx) = mpsc::channel();
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn transition(&self, to: ConnectionState) {
        let from = {
            let mut state = self.state_lock();
            if *state == to {
                return;
            }
            std::mem::replace(&mut *state, to)
        };

        info!(from = from.label(), to = to.label(), "Connection state changed");

        let change = StateChange {
            from,
            to,
            at: Utc::now(),
        };
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Locate the reader with `find` and open the port it returns.
    ///
    /// Any live connection is closed before `find` runs, so probing never
    /// opens a second handle on the port already in use.
    pub fn connect<F>(&self, find: F) -> ReaderResult<String>
    where
        F: FnOnce() -> ReaderResult<String>,
    {
        let _lifecycle = self.lifecycle_lock();
        self.manager.close();
        self.transition(ConnectionState::Probing);

        let result = find().and_then(|port| {
            self.manager.open(&port)?;
            Ok(port)
        });

        match &result {
            Ok(_) => self.transition(ConnectionState::Connected),
            Err(_) => {
                self.manager.close();
                self.transition(ConnectionState::Disconnected);
            }
        }
        result
    }

    /// Read the next UID, recovering once from a lost device.
    ///
    /// After a successful reopen the read continues with whatever is left
    /// of `timeout`. A caller that finds the handle gone while another
    /// caller is recovering waits for that recovery instead of failing.
    pub fn read_uid(&self, timeout: Duration) -> ReaderResult<UidEvent> {
        if self.state() == ConnectionState::Disconnected {
            return Err(ReaderError::NotConnected);
        }

        let deadline = Instant::now() + timeout;

        match UidReader::new(&self.manager).read_uid(timeout) {
            Err(e) if e.is_device_loss() || matches!(e, ReaderError::NotConnected) => {
                self.recover(&e)?;
                let remaining = deadline.saturating_duration_since(Instant::now());
                match UidReader::new(&self.manager).read_uid(remaining) {
                    Err(e) if e.is_device_loss() => {
                        error!(error = %e, "Connection lost again right after reconnect");
                        let _lifecycle = self.lifecycle_lock();
                        self.manager.close();
                        self.transition(ConnectionState::Disconnected);
                        Err(e)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Make exactly one attempt to reopen the last port.
    ///
    /// Succeeds without reopening if another caller already restored the
    /// connection. Fails with `NotConnected` if the connection was closed
    /// on purpose, by `shutdown` or a failed recovery.
    fn recover(&self, cause: &ReaderError) -> ReaderResult<()> {
        let _lifecycle = self.lifecycle_lock();

        if self.manager.is_open() {
            debug!("Connection already restored");
            return Ok(());
        }
        if self.state() != ConnectionState::Connected {
            return Err(ReaderError::NotConnected);
        }

        self.transition(ConnectionState::Reconnecting);
        warn!(error = %cause, "Reader connection lost, reopening");

        let result = self.manager.reopen().and_then(|port| {
            if self.verify_on_reconnect {
                self.manager.confirm_online()?;
            }
            Ok(port)
        });

        match result {
            Ok(port) => {
                info!(port = %port, "Reader reconnected");
                self.transition(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                let port = self.manager.last_port().unwrap_or_default();
                error!(port = %port, error = %e, "Reconnect failed");
                self.manager.close();
                self.transition(ConnectionState::Disconnected);
                Err(ReaderError::ReconnectFailed {
                    port,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Close the connection and return to `Disconnected`.
    pub fn shutdown(&self) {
        let _lifecycle = self.lifecycle_lock();
        self.transition(ConnectionState::Disconnected);
        self.manager.close();
    }
}
