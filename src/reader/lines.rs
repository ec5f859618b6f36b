//! Newline framing on top of a [`ReaderTransport`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::config::MAX_LINE_LENGTH;
use super::error::ReaderResult;
use super::transport::ReaderTransport;

/// Streaming line decoder for incremental parsing.
///
/// Bytes are fed one at a time; a complete line is returned when `\n`
/// arrives. Carriage returns and surrounding whitespace are trimmed and
/// invalid UTF-8 is replaced rather than rejected.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    max_len: usize,
    overflowed: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_len(MAX_LINE_LENGTH)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(128),
            max_len,
            overflowed: false,
        }
    }

    /// Feed a byte to the decoder.
    ///
    /// # Returns
    /// - `Some(line)` when a terminator completes a line (possibly empty)
    /// - `None` if more data is needed
    pub fn feed(&mut self, byte: u8) -> Option<String> {
        if byte == b'\n' {
            let raw = std::mem::take(&mut self.buffer);
            if std::mem::replace(&mut self.overflowed, false) {
                return None;
            }
            return Some(String::from_utf8_lossy(&raw).trim().to_string());
        }

        if self.overflowed {
            return None;
        }

        if self.buffer.len() >= self.max_len {
            // Drop the oversized line entirely, up to its terminator.
            self.buffer.clear();
            self.overflowed = true;
            return None;
        }

        self.buffer.push(byte);
        None
    }

    /// Check whether bytes of an unterminated line are buffered.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || self.overflowed
    }

    /// Reset decoder state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }
}

/// A transport paired with a line decoder.
///
/// Complete lines that arrive together in one read are queued and handed
/// out one per call.
pub struct LineChannel {
    transport: Box<dyn ReaderTransport>,
    decoder: LineDecoder,
    ready: VecDeque<String>,
}

impl LineChannel {
    pub fn new(transport: Box<dyn ReaderTransport>) -> Self {
        Self {
            transport,
            decoder: LineDecoder::new(),
            ready: VecDeque::new(),
        }
    }

    pub fn port_name(&self) -> &str {
        self.transport.port_name()
    }

    /// Write and flush `payload`.
    pub fn send(&mut self, payload: &[u8]) -> ReaderResult<()> {
        self.transport.write(payload)?;
        self.transport.flush()
    }

    /// Perform a single read of at most `slice` and return the next
    /// complete line, if one is available.
    pub fn poll_line(&mut self, slice: Duration) -> ReaderResult<Option<String>> {
        if let Some(line) = self.ready.pop_front() {
            return Ok(Some(line));
        }

        let mut buffer = [0u8; 256];
        let bytes_read = self.transport.read(&mut buffer, slice)?;

        for &byte in &buffer[..bytes_read] {
            if let Some(line) = self.decoder.feed(byte) {
                self.ready.push_back(line);
            }
        }

        Ok(self.ready.pop_front())
    }

    /// Wait up to `timeout` for a complete line, polling in `slice` steps.
    ///
    /// An unterminated line still buffered at the deadline is discarded.
    pub fn read_line(&mut self, timeout: Duration, slice: Duration) -> ReaderResult<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(line) = self.poll_line(remaining.min(slice))? {
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                self.discard_partial();
                return Ok(None);
            }
        }
    }

    /// Drop an unterminated line. Already complete lines are kept.
    pub fn discard_partial(&mut self) {
        self.decoder.reset();
    }

    /// Clear the port's buffers and every queued or partial line.
    pub fn clear(&mut self) -> ReaderResult<()> {
        self.ready.clear();
        self.decoder.reset();
        self.transport.clear_buffers()
    }
}
