//! CAN bus to the wheel and tool motor controllers.
//!
//! Frames use 11-bit identifiers laid out the ODrive way: the upper bits hold
//! the node address, the low five bits the command id.
//!
//! | Command | Id | Payload |
//! |---|---|---|
//! | heartbeat | `0x01` | `u32` error, `u8` axis state |
//! | set axis state | `0x07` | `u32` requested state |
//! | encoder estimates | `0x09` | `f32` position (turns), `f32` velocity (turns/s) |
//! | set input position | `0x0C` | `f32` position (turns) |
//! | set input velocity | `0x0D` | `f32` velocity (turns/s), `f32` torque ff |
//! | set limits | `0x0F` | `f32` velocity limit, `f32` current limit |

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use fieldos_types::FieldError;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::BusError;

/// Highest valid 11-bit identifier.
pub const MAX_STANDARD_ID: u16 = 0x7FF;

/// Command ids reserved per node above its base address.
pub const NODE_ID_SPAN: u16 = 0x20;

/// One classic CAN 2.0 data frame with a standard identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u16,
    pub data: [u8; 8],
    pub len: u8,
}

impl CanFrame {
    pub fn new(id: u16, payload: &[u8]) -> Result<Self, BusError> {
        if id > MAX_STANDARD_ID {
            return Err(BusError::InvalidFrame(format!("id 0x{id:X} exceeds 11 bits")));
        }
        if payload.len() > 8 {
            return Err(BusError::InvalidFrame(format!(
                "payload of {} bytes exceeds 8",
                payload.len()
            )));
        }
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            data,
            len: payload.len() as u8,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }

    /// Little-endian `f32` at byte `offset`, `None` if the frame is too short.
    pub fn f32_at(&self, offset: usize) -> Option<f32> {
        let bytes = self.payload().get(offset..offset + 4)?;
        Some(f32::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        let bytes = self.payload().get(offset..offset + 4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }
}

/// Host-side CAN interface.
pub trait CanAdapter: Send {
    /// Queue one frame for transmission.
    fn send(&mut self, frame: CanFrame) -> Result<(), BusError>;

    /// Non-blocking receive; `Ok(None)` when nothing is pending.
    fn try_receive(&mut self) -> Result<Option<CanFrame>, BusError>;
}

/// In-memory adapter; clones share the same queues.
#[derive(Clone, Default)]
pub struct MockCanAdapter {
    inner: Arc<Mutex<MockCanInner>>,
}

#[derive(Default)]
struct MockCanInner {
    sent: Vec<CanFrame>,
    incoming: VecDeque<CanFrame>,
    fail: bool,
}

impl MockCanAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<CanFrame> {
        self.inner.lock().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<CanFrame> {
        std::mem::take(&mut self.inner.lock().sent)
    }

    /// Queue a frame to be returned by the next receive.
    pub fn inject(&self, frame: CanFrame) {
        self.inner.lock().incoming.push_back(frame);
    }

    pub fn set_fail(&self, fail: bool) {
        self.inner.lock().fail = fail;
    }
}

impl CanAdapter for MockCanAdapter {
    fn send(&mut self, frame: CanFrame) -> Result<(), BusError> {
        let mut inner = self.inner.lock();
        if inner.fail {
            return Err(BusError::Closed);
        }
        inner.sent.push(frame);
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Option<CanFrame>, BusError> {
        Ok(self.inner.lock().incoming.pop_front())
    }
}

/// A received frame together with its receive sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub frame: CanFrame,
    pub seq: u64,
}

struct CanInner {
    adapter: Box<dyn CanAdapter>,
    latest: HashMap<u16, Received>,
    seq: u64,
}

/// Shared handle to the CAN bus.  All clones transmit through one adapter.
#[derive(Clone)]
pub struct CanBus {
    name: Arc<str>,
    inner: Arc<Mutex<CanInner>>,
}

impl CanBus {
    pub fn new(name: &str, adapter: Box<dyn CanAdapter>) -> Self {
        Self {
            name: Arc::from(name),
            inner: Arc::new(Mutex::new(CanInner {
                adapter,
                latest: HashMap::new(),
                seq: 0,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&self, frame: CanFrame) -> Result<(), FieldError> {
        trace!(bus = %self.name, id = frame.id, len = frame.len, "tx");
        self.inner.lock().adapter.send(frame).map_err(|e| self.error(e))
    }

    /// Build and send a frame for `node` + `command`.
    pub fn send_command(&self, node: u16, command: u16, payload: &[u8]) -> Result<(), FieldError> {
        let frame = CanFrame::new(node + command, payload).map_err(|e| self.error(e))?;
        self.send(frame)
    }

    /// Drain the adapter, keeping the latest frame per identifier.
    pub fn poll(&self) -> Result<usize, FieldError> {
        let mut inner = self.inner.lock();
        let mut received = 0;
        while let Some(frame) = inner.adapter.try_receive().map_err(|e| self.error(e))? {
            inner.seq += 1;
            let seq = inner.seq;
            inner.latest.insert(frame.id, Received { frame, seq });
            received += 1;
        }
        if received > 0 {
            debug!(bus = %self.name, received, "frames received");
        }
        Ok(received)
    }

    pub fn latest(&self, id: u16) -> Option<Received> {
        self.inner.lock().latest.get(&id).copied()
    }

    fn error(&self, e: BusError) -> FieldError {
        FieldError::Bus {
            bus: self.name.to_string(),
            details: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_wide_id_and_long_payload() {
        assert!(CanFrame::new(0x800, &[]).is_err());
        assert!(CanFrame::new(0x10, &[0; 9]).is_err());
        let frame = CanFrame::new(0x7FF, &[1, 2, 3]).unwrap();
        assert_eq!(frame.payload(), &[1, 2, 3]);
    }

    #[test]
    fn little_endian_accessors() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1.5f32.to_le_bytes());
        payload.extend_from_slice(&7u32.to_le_bytes());
        let frame = CanFrame::new(0x109, &payload).unwrap();
        assert_eq!(frame.f32_at(0), Some(1.5));
        assert_eq!(frame.u32_at(4), Some(7));
        assert_eq!(frame.f32_at(6), None);
    }

    #[test]
    fn bus_addresses_node_commands() {
        let mock = MockCanAdapter::new();
        let bus = CanBus::new("can", Box::new(mock.clone()));
        bus.send_command(0x100, 0x0D, &0.5f32.to_le_bytes()).unwrap();
        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, 0x10D);
    }

    #[test]
    fn poll_keeps_latest_frame_per_id() {
        let mock = MockCanAdapter::new();
        let bus = CanBus::new("can", Box::new(mock.clone()));
        mock.inject(CanFrame::new(0x009, &1.0f32.to_le_bytes()).unwrap());
        mock.inject(CanFrame::new(0x009, &2.0f32.to_le_bytes()).unwrap());
        assert_eq!(bus.poll().unwrap(), 2);
        let latest = bus.latest(0x009).unwrap();
        assert_eq!(latest.frame.f32_at(0), Some(2.0));
        assert_eq!(latest.seq, 2);
        assert!(bus.latest(0x109).is_none());
    }

    #[test]
    fn adapter_failure_becomes_bus_error() {
        let mock = MockCanAdapter::new();
        let bus = CanBus::new("can", Box::new(mock.clone()));
        mock.set_fail(true);
        assert!(matches!(
            bus.send_command(0, 0x0D, &[]),
            Err(FieldError::Bus { .. })
        ));
    }
}
