//! Continuous UID watching on a background thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::config::DEFAULT_DUPLICATE_COOLDOWN;
use super::error::{ReaderError, ReaderResult};
use super::supervisor::ReconnectionSupervisor;
use super::uid::UidEvent;

/// How repeated reads of the same card are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicatePolicy {
    /// A UID equal to the last emitted one is dropped within this window.
    /// Zero disables suppression.
    pub cooldown: Duration,
}

impl DuplicatePolicy {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub fn emit_all() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DUPLICATE_COOLDOWN)
    }
}

/// Tracks the last emitted UID.
#[derive(Debug)]
pub struct DuplicateFilter {
    policy: DuplicatePolicy,
    last: Option<(String, Instant)>,
}

impl DuplicateFilter {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self { policy, last: None }
    }

    /// Whether `uid` observed at `now` should be emitted. Records it if so.
    pub fn admit(&mut self, uid: &str, now: Instant) -> bool {
        if let Some((last_uid, emitted_at)) = &self.last {
            if last_uid == uid && now.saturating_duration_since(*emitted_at) < self.policy.cooldown {
                return false;
            }
        }
        self.last = Some((uid.to_string(), now));
        true
    }
}

/// Handle to a running watch loop.
pub struct UidWatch {
    stop: Arc<AtomicBool>,
    events: Receiver<UidEvent>,
    handle: JoinHandle<ReaderResult<()>>,
}

impl UidWatch {
    /// Start reading UIDs through `supervisor` until stopped.
    ///
    /// Each cycle waits at most `poll_timeout`, so a stop request is honored
    /// within about one poll.
    pub fn spawn(
        supervisor: Arc<ReconnectionSupervisor>,
        poll_timeout: Duration,
        policy: DuplicatePolicy,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, events) = mpsc::channel();

        let flag = stop.clone();
        let handle = thread::spawn(move || {
            let mut filter = DuplicateFilter::new(policy);
            info!(poll_ms = poll_timeout.as_millis() as u64, "UID watch started");

            while !flag.load(Ordering::SeqCst) {
                match supervisor.read_uid(poll_timeout) {
                    Ok(event) => {
                        if !filter.admit(&event.uid, Instant::now()) {
                            debug!(uid = %event.uid, "Suppressing repeated UID");
                            continue;
                        }
                        if tx.send(event).is_err() {
                            debug!("UID receiver dropped, stopping watch");
                            break;
                        }
                    }
                    Err(e) if e.is_timeout() => {}
                    Err(e) => {
                        warn!(error = %e, "UID watch ended");
                        return Err(e);
                    }
                }
            }

            info!("UID watch stopped");
            Ok(())
        });

        Self {
            stop,
            events,
            handle,
        }
    }

    /// Flag that ends the loop when set; can be shared with signal handlers.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn events(&self) -> &Receiver<UidEvent> {
        &self.events
    }

    /// Whether the loop has already returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Request a stop and wait for the loop to finish.
    ///
    /// # Errors
    /// The error that ended the loop, or an I/O error if the loop panicked.
    pub fn stop(self) -> ReaderResult<()> {
        self.stop.store(true, Ordering::SeqCst);
        drop(self.events);
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => {
                warn!("UID watch thread panicked");
                Err(ReaderError::Io(std::io::Error::other("UID watch thread panicked")))
            }
        }
    }
}
