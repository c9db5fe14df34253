//! Serial link to the core controller.
//!
//! [`SerialBus`] owns the byte transport that every module attached to the
//! link writes through.  Received lines are parsed into
//! [`Report`]s and cached so modules can read the latest state during their
//! status poll.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use fieldos_types::FieldError;
use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, trace};

use crate::BusError;
use crate::expander::PinPort;
use crate::protocol::{Bank, Command, Report, StepperStatus};
use crate::transport::Transport;

/// Upper bound on bytes consumed by a single [`SerialBus::poll`].
const MAX_POLL_BYTES: usize = 16 * 1024;

/// Unterminated input longer than this is noise and is discarded.
const MAX_LINE_BYTES: usize = 1024;

/// UART transport backed by the `serialport` crate.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `path` (e.g. `/dev/ttyTHS0`) at `baud_rate`, 8N1, no flow control.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, BusError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(1))
            .open()?;
        info!(path, baud_rate, "opened serial port");
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, BusError> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), BusError> {
        self.port.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BusError> {
        self.port.flush()?;
        Ok(())
    }
}

/// Latest stepper report for one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepperReport {
    pub steps: i64,
    pub status: StepperStatus,
    /// Monotonic receive counter; lets a reader tell fresh reports from old.
    pub seq: u64,
}

/// Latest battery report of one BMS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReport {
    pub percent: f32,
    pub voltage: f32,
    pub charging: bool,
}

#[derive(Default)]
struct ReportCache {
    inputs: HashMap<(Bank, u8), bool>,
    steppers: HashMap<String, StepperReport>,
    batteries: HashMap<Bank, BatteryReport>,
    seq: u64,
}

impl ReportCache {
    fn apply(&mut self, report: Report) {
        self.seq += 1;
        match report {
            Report::Input { bank, pin, level } => {
                self.inputs.insert((bank, pin), level);
            }
            Report::Stepper {
                name, steps, status, ..
            } => {
                self.steppers.insert(
                    name,
                    StepperReport {
                        steps,
                        status,
                        seq: self.seq,
                    },
                );
            }
            Report::Battery {
                bank,
                percent,
                voltage,
                charging,
            } => {
                self.batteries.insert(
                    bank,
                    BatteryReport {
                        percent,
                        voltage,
                        charging,
                    },
                );
            }
        }
    }
}

struct SerialInner {
    transport: Box<dyn Transport>,
    rx: Vec<u8>,
    cache: ReportCache,
}

/// Shared handle to one serial link.  Clone it cheaply – all clones write
/// through the same transport.
#[derive(Clone)]
pub struct SerialBus {
    name: Arc<str>,
    inner: Arc<Mutex<SerialInner>>,
}

impl SerialBus {
    pub fn new(name: &str, transport: Box<dyn Transport>) -> Self {
        Self {
            name: Arc::from(name),
            inner: Arc::new(Mutex::new(SerialInner {
                transport,
                rx: Vec::new(),
                cache: ReportCache::default(),
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pin port for the core controller's own GPIOs.
    pub fn core_port(&self) -> PinPort {
        PinPort::new(self.clone(), Bank::Core)
    }

    /// Write `command` as one line.
    ///
    /// Writes from every clone are serialised by the link lock, so lines
    /// never interleave.  A failed write is not retried.
    pub fn send(&self, command: &Command) -> Result<(), FieldError> {
        let line = command.to_line();
        trace!(bus = %self.name, %line, "tx");
        let mut framed = line.into_bytes();
        framed.push(b'\n');
        let mut inner = self.inner.lock();
        inner.transport.write(&framed).map_err(|e| self.error(e))?;
        inner.transport.flush().map_err(|e| self.error(e))
    }

    /// Read everything pending on the transport and update the report cache.
    ///
    /// Returns the number of complete lines received.  Unparseable lines are
    /// logged and skipped.
    pub fn poll(&self) -> Result<usize, FieldError> {
        let mut inner = self.inner.lock();
        let mut buf = [0u8; 512];
        let mut consumed = 0;
        while consumed < MAX_POLL_BYTES {
            let n = inner.transport.read(&mut buf).map_err(|e| self.error(e))?;
            if n == 0 {
                break;
            }
            inner.rx.extend_from_slice(&buf[..n]);
            consumed += n;
        }

        let mut lines = 0;
        while let Some(end) = inner.rx.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = inner.rx.drain(..=end).collect();
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }
            lines += 1;
            match Report::parse(line) {
                Ok(report) => {
                    trace!(bus = %self.name, %line, "rx");
                    inner.cache.apply(report);
                }
                Err(e) => debug!(bus = %self.name, error = %e, "ignoring line"),
            }
        }
        if inner.rx.len() > MAX_LINE_BYTES {
            debug!(bus = %self.name, bytes = inner.rx.len(), "discarding unterminated input");
            inner.rx.clear();
        }
        Ok(lines)
    }

    /// Last reported level of an input pin, `None` until the first report.
    pub fn input(&self, bank: Bank, pin: u8) -> Option<bool> {
        self.inner.lock().cache.inputs.get(&(bank, pin)).copied()
    }

    pub fn stepper(&self, name: &str) -> Option<StepperReport> {
        self.inner.lock().cache.steppers.get(name).copied()
    }

    pub fn battery(&self, bank: Bank) -> Option<BatteryReport> {
        self.inner.lock().cache.batteries.get(&bank).copied()
    }

    fn error(&self, e: BusError) -> FieldError {
        FieldError::Bus {
            bus: self.name.to_string(),
            details: e.to_string(),
        }
    }
}
