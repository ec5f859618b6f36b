//! Scripted in-memory serial ports for tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::reader::config::LinkTiming;
use crate::reader::error::{ReaderError, ReaderResult};
use crate::reader::transport::{ReaderTransport, TransportOpener};

/// One scripted response to a `read` call.
#[derive(Debug, Clone)]
pub enum ReadStep {
    Data(Vec<u8>),
    Fail(io::ErrorKind),
    Panic,
}

/// Builder describing how one opened port behaves.
#[derive(Debug, Clone, Default)]
pub struct PortScript {
    refuse_open: bool,
    fail_writes: bool,
    reads: VecDeque<ReadStep>,
}

impl PortScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `line` followed by a newline in one read.
    pub fn line(self, line: &str) -> Self {
        self.bytes(format!("{}\n", line).as_bytes())
    }

    /// Deliver raw bytes in one read.
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.reads.push_back(ReadStep::Data(data.to_vec()));
        self
    }

    /// Fail the next read with an I/O error of `kind`.
    pub fn fail_read(mut self, kind: io::ErrorKind) -> Self {
        self.reads.push_back(ReadStep::Fail(kind));
        self
    }

    /// Panic inside the next read, as a broken driver would.
    pub fn panic_on_read(mut self) -> Self {
        self.reads.push_back(ReadStep::Panic);
        self
    }

    pub fn refuse_open(mut self) -> Self {
        self.refuse_open = true;
        self
    }

    pub fn fail_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

#[derive(Debug, Default)]
struct LinkState {
    open: bool,
    written: Vec<u8>,
    flushes: usize,
    clears: usize,
}

/// Observer handle onto one scripted port, usable after the transport is
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct MockLink(Arc<Mutex<LinkState>>);

impl MockLink {
    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.written())
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.state().flushes
    }

    pub fn clears(&self) -> usize {
        self.state().clears
    }
}

/// Transport that replays a [`PortScript`].
///
/// Writes land on the link one byte at a time with a yield in between, so
/// unsynchronized concurrent writers would visibly interleave.
pub struct ScriptedTransport {
    name: String,
    link: MockLink,
    reads: VecDeque<ReadStep>,
    fail_writes: bool,
}

impl ScriptedTransport {
    pub fn new(name: &str, script: PortScript) -> (Self, MockLink) {
        let link = MockLink::default();
        link.state().open = true;
        let transport = Self {
            name: name.to_string(),
            link: link.clone(),
            reads: script.reads,
            fail_writes: script.fail_writes,
        };
        (transport, link)
    }
}

impl ReaderTransport for ScriptedTransport {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> ReaderResult<()> {
        if self.fail_writes {
            return Err(ReaderError::Io(io::ErrorKind::BrokenPipe.into()));
        }
        for &byte in data {
            self.link.state().written.push(byte);
            std::thread::yield_now();
        }
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> ReaderResult<usize> {
        match self.reads.pop_front() {
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buffer.len());
                buffer[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    self.reads.push_front(ReadStep::Data(rest));
                }
                Ok(n)
            }
            Some(ReadStep::Fail(kind)) => Err(ReaderError::Io(kind.into())),
            Some(ReadStep::Panic) => panic!("scripted read panic on {}", self.name),
            None => {
                if !timeout.is_zero() {
                    std::thread::sleep(timeout);
                }
                Ok(0)
            }
        }
    }

    fn flush(&mut self) -> ReaderResult<()> {
        self.link.state().flushes += 1;
        Ok(())
    }

    fn clear_buffers(&mut self) -> ReaderResult<()> {
        self.link.state().clears += 1;
        Ok(())
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        self.link.state().open = false;
    }
}

/// Opener handing out scripted transports per port, in order.
///
/// Each successful or refused `open` consumes the next script queued for
/// that port; a port without a remaining script fails to open.
#[derive(Default)]
pub struct ScriptedOpener {
    scripts: Mutex<HashMap<String, VecDeque<PortScript>>>,
    attempts: Mutex<Vec<String>>,
    links: Mutex<Vec<(String, MockLink)>>,
    peak_open: Mutex<HashMap<String, usize>>,
}

impl ScriptedOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `script` for the next open of `port`.
    pub fn with_port(self, port: &str, script: PortScript) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(port.to_string())
            .or_default()
            .push_back(script);
        self
    }

    pub fn open_attempts(&self, port: &str) -> usize {
        self.attempts.lock().unwrap().iter().filter(|p| *p == port).count()
    }

    pub fn total_attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Links of every transport handed out for `port`, oldest first.
    pub fn links(&self, port: &str) -> Vec<MockLink> {
        self.links
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == port)
            .map(|(_, link)| link.clone())
            .collect()
    }

    /// Most handles on `port` that were open at the same time.
    pub fn peak_open_handles(&self, port: &str) -> usize {
        self.peak_open.lock().unwrap().get(port).copied().unwrap_or(0)
    }

    pub fn last_link(&self, port: &str) -> MockLink {
        self.links(port).pop().expect("port was never opened")
    }
}

impl TransportOpener for ScriptedOpener {
    fn open(&self, port: &str) -> ReaderResult<Box<dyn ReaderTransport>> {
        self.attempts.lock().unwrap().push(port.to_string());

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(port)
            .and_then(VecDeque::pop_front);

        let script = match script {
            Some(script) if !script.refuse_open => script,
            _ => {
                return Err(ReaderError::PortOpenFailed {
                    port: port.to_string(),
                    reason: "No such file or directory".to_string(),
                })
            }
        };

        let (transport, link) = ScriptedTransport::new(port, script);
        self.links.lock().unwrap().push((port.to_string(), link));

        let open_now = self.links(port).iter().filter(|l| l.is_open()).count();
        let mut peak = self.peak_open.lock().unwrap();
        let entry = peak.entry(port.to_string()).or_insert(0);
        *entry = (*entry).max(open_now);
        drop(peak);

        Ok(Box::new(transport))
    }
}

/// Timing with no settle or interval delays and a short listen window.
pub fn fast_timing() -> LinkTiming {
    LinkTiming {
        boot_settle: Duration::ZERO,
        healthcheck_attempts: 3,
        healthcheck_interval: Duration::ZERO,
        listen_window: Duration::from_millis(150),
        poll_slice: Duration::from_millis(5),
    }
}
