//! Byte channels the client talks through.
//!
//! [`SerialTransport`] drives a real RS485 adapter; [`LoopbackTransport`]
//! answers from a script and records what was written, for tests.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::{Error, Result};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Where and how to open the link. Framing is fixed at 8N1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

/// Half-duplex byte channel with open/write/timed-read/close semantics.
pub trait Transport {
    /// Fails with [`Error::DeviceNotFound`] if the port cannot be opened.
    fn open(&mut self, settings: &SerialSettings) -> Result<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Drops bytes left over from an earlier exchange.
    fn discard_input(&mut self) -> Result<()>;

    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Returns exactly `n` bytes or [`Error::Timeout`] once `timeout` passes.
    fn read_exact_or_timeout(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>>;
}

#[derive(Default)]
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(Error::NotConnected)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, settings: &SerialSettings) -> Result<()> {
        let port = serialport::new(settings.port.as_str(), settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.timeout)
            .open()
            .map_err(|e| Error::DeviceNotFound {
                port: settings.port.clone(),
                reason: e.to_string(),
            })?;

        log::info!("Opened {} at {} baud", settings.port, settings.baud_rate);
        self.port = Some(port);
        self.name = settings.port.clone();
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::info!("Closed {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn discard_input(&mut self) -> Result<()> {
        self.port_mut()?
            .clear(ClearBuffer::Input)
            .map_err(|e| Error::Io(io::Error::other(e)))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn read_exact_or_timeout(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        let port = self.port_mut()?;
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; n];
        let mut received = 0;

        while received < n {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            port.set_timeout(deadline - now)
                .map_err(|e| Error::Io(io::Error::other(e)))?;
            match port.read(&mut buf[received..]) {
                Ok(0) => break,
                Ok(len) => received += len,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if received < n {
            return Err(Error::Timeout { expected: n, received });
        }
        Ok(buf)
    }
}

/// What the loopback device does in response to one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Frame(Vec<u8>),
    /// No answer; the reader times out.
    Silence,
    /// The write fails with an I/O error, as when the adapter is pulled.
    Unplugged,
}

/// In-memory device answering from a script keyed by request bytes.
///
/// Each request maps to a queue of replies consumed one per write; the
/// last reply of a queue repeats. Unscripted requests get no answer.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    script: HashMap<Vec<u8>, VecDeque<Reply>>,
    written: Vec<Vec<u8>>,
    rx: VecDeque<u8>,
    open: bool,
    open_error: Option<String>,
    opened: usize,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `request` with `response` every time.
    pub fn respond(mut self, request: impl Into<Vec<u8>>, response: impl Into<Vec<u8>>) -> Self {
        self.push(request, Reply::Frame(response.into()));
        self
    }

    /// Appends a reply to the queue for `request`.
    pub fn then(mut self, request: impl Into<Vec<u8>>, reply: Reply) -> Self {
        self.push(request, reply);
        self
    }

    /// Makes every `open` fail as if the port did not exist.
    pub fn fail_open(mut self, reason: impl Into<String>) -> Self {
        self.open_error = Some(reason.into());
        self
    }

    pub fn push(&mut self, request: impl Into<Vec<u8>>, reply: Reply) {
        self.script.entry(request.into()).or_default().push_back(reply);
    }

    /// Every frame written so far, in order.
    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.opened
    }

    /// Queues bytes as if they arrived unsolicited on the line.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    pub fn pending_input(&self) -> usize {
        self.rx.len()
    }
}

impl Transport for LoopbackTransport {
    fn open(&mut self, settings: &SerialSettings) -> Result<()> {
        if let Some(reason) = &self.open_error {
            return Err(Error::DeviceNotFound {
                port: settings.port.clone(),
                reason: reason.clone(),
            });
        }
        self.open = true;
        self.opened += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.rx.clear();
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn discard_input(&mut self) -> Result<()> {
        if !self.open {
            return Err(Error::NotConnected);
        }
        self.rx.clear();
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.open {
            return Err(Error::NotConnected);
        }
        self.written.push(bytes.to_vec());

        let reply = match self.script.get_mut(bytes) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match reply {
            Some(Reply::Frame(frame)) => self.rx.extend(frame),
            Some(Reply::Unplugged) => return Err(io::Error::from(io::ErrorKind::BrokenPipe).into()),
            Some(Reply::Silence) | None => {}
        }
        Ok(())
    }

    fn read_exact_or_timeout(&mut self, n: usize, _timeout: Duration) -> Result<Vec<u8>> {
        if !self.open {
            return Err(Error::NotConnected);
        }
        if self.rx.len() < n {
            let received = self.rx.len();
            self.rx.clear();
            return Err(Error::Timeout { expected: n, received });
        }
        Ok(self.rx.drain(..n).collect())
    }
}
