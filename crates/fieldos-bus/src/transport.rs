//! Byte-stream transports underneath the serial bus.
//!
//! [`SerialTransport`][crate::serial::SerialTransport] talks to a UART;
//! [`MockTransport`] is an in-memory loopback used by tests and by the
//! hardware backends when no physical link is attached.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::BusError;

/// Byte-oriented duplex link to a controller.
pub trait Transport: Send {
    /// Read available data into `buffer`, returns number of bytes read.
    /// Returns `Ok(0)` when nothing is pending.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, BusError>;

    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> Result<(), BusError>;

    /// Flush pending writes (blocking until complete).
    fn flush(&mut self) -> Result<(), BusError>;
}

/// In-memory transport; clones share the same buffers.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Default)]
struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    written: Vec<u8>,
    fail_writes: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw bytes to be returned by the next reads.
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Queue one newline-terminated protocol line.
    pub fn inject_line(&self, line: &str) {
        let mut inner = self.inner.lock();
        inner.read_buffer.extend(line.as_bytes());
        inner.read_buffer.push_back(b'\n');
    }

    /// Every line written so far.
    pub fn written_lines(&self) -> Vec<String> {
        let inner = self.inner.lock();
        String::from_utf8_lossy(&inner.written)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Return and clear the written lines.
    pub fn take_written_lines(&self) -> Vec<String> {
        let lines = self.written_lines();
        self.inner.lock().written.clear();
        lines
    }

    /// Make subsequent writes fail, simulating an unplugged cable.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, BusError> {
        let mut inner = self.inner.lock();
        let available = inner.read_buffer.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
            *slot = byte;
        }
        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), BusError> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(BusError::Closed);
        }
        inner.written.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BusError> {
        Ok(())
    }
}
