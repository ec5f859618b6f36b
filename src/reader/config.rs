//! Configuration constants for the reader link protocol.

use std::time::Duration;

// ============================================================================
// Serial Communication
// ============================================================================

/// Baud rate the reader firmware listens on.
pub const READER_BAUD_RATE: u32 = 9_600;

/// Per-operation read timeout applied when a port is opened.
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound for a single buffered line. Longer input is dropped up to the
/// next terminator.
pub const MAX_LINE_LENGTH: usize = 1024;

// ============================================================================
// Handshake
// ============================================================================

/// Healthcheck request, byte-exact as the firmware expects it.
///
/// The key is spelled `healtcheck` on the wire.
pub const HEALTHCHECK_LINE: &str = "{\"healtcheck\": 1}\n";

/// Value of the `status` field announcing a ready reader.
pub const STATUS_ONLINE: &str = "online";

/// Delay after opening a port. Most boards reset when the host opens the
/// line and need this long before the firmware answers.
pub const BOOT_SETTLE_DELAY: Duration = Duration::from_millis(2000);

/// How many times the healthcheck is transmitted per probe.
pub const HEALTHCHECK_ATTEMPTS: u32 = 3;

/// Pause after each healthcheck transmission.
pub const HEALTHCHECK_INTERVAL: Duration = Duration::from_millis(150);

/// How long to listen for the status reply after the last transmission.
pub const HEALTHCHECK_LISTEN_WINDOW: Duration = Duration::from_millis(2500);

// ============================================================================
// Steady-state reads
// ============================================================================

/// Slice used when polling the port for a line terminator. The connection
/// lock is released between slices.
pub const READ_POLL_SLICE: Duration = Duration::from_millis(100);

/// Default time to wait for a card.
pub const DEFAULT_UID_TIMEOUT: Duration = Duration::from_secs(10);

/// Default window in which the same UID is not reported twice by the
/// continuous watch loop.
pub const DEFAULT_DUPLICATE_COOLDOWN: Duration = Duration::from_millis(1500);

/// Timing knobs for probing and for the live connection.
///
/// The defaults match the constants above; tests and the settings file may
/// shrink or stretch them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    pub boot_settle: Duration,
    pub healthcheck_attempts: u32,
    pub healthcheck_interval: Duration,
    pub listen_window: Duration,
    pub poll_slice: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            boot_settle: BOOT_SETTLE_DELAY,
            healthcheck_attempts: HEALTHCHECK_ATTEMPTS,
            healthcheck_interval: HEALTHCHECK_INTERVAL,
            listen_window: HEALTHCHECK_LISTEN_WINDOW,
            poll_slice: READ_POLL_SLICE,
        }
    }
}

impl LinkTiming {
    /// Worst-case time a single probe can take, excluding the open call.
    pub fn probe_budget(&self) -> Duration {
        self.boot_settle
            + self.healthcheck_interval * self.healthcheck_attempts
            + self.listen_window
    }
}

/// Sleep for `delay`, skipping the syscall for zero durations.
pub(crate) fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing_matches_firmware_expectations() {
        let timing = LinkTiming::default();
        assert_eq!(timing.boot_settle, Duration::from_secs(2));
        assert_eq!(timing.healthcheck_attempts, 3);
        assert_eq!(timing.healthcheck_interval, Duration::from_millis(150));
        assert_eq!(timing.listen_window, Duration::from_millis(2500));
    }

    #[test]
    fn test_probe_budget() {
        let timing = LinkTiming::default();
        assert_eq!(timing.probe_budget(), Duration::from_millis(2000 + 450 + 2500));
    }

    #[test]
    fn test_healthcheck_line_is_newline_terminated() {
        assert!(HEALTHCHECK_LINE.ends_with('\n'));
        assert_eq!(HEALTHCHECK_LINE.matches('\n').count(), 1);
    }
}
