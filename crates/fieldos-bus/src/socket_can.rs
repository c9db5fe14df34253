//! SocketCAN backend (Linux only).
//!
//! The interface bitrate is configured outside the process
//! (`ip link set can0 type can bitrate 1000000`).

use std::io;

use socketcan::{CanSocket, EmbeddedFrame, Frame, Socket, StandardId};
use tracing::{info, warn};

use crate::BusError;
use crate::can::{CanAdapter, CanFrame};

pub struct SocketCanAdapter {
    socket: CanSocket,
}

impl SocketCanAdapter {
    /// Open `interface` (e.g. `can0`) in non-blocking mode.
    pub fn open(interface: &str) -> Result<Self, BusError> {
        let socket = CanSocket::open(interface)?;
        socket.set_nonblocking(true)?;
        info!(interface, "opened CAN interface");
        Ok(Self { socket })
    }
}

impl CanAdapter for SocketCanAdapter {
    fn send(&mut self, frame: CanFrame) -> Result<(), BusError> {
        let id = StandardId::new(frame.id)
            .ok_or_else(|| BusError::InvalidFrame(format!("id 0x{:X}", frame.id)))?;
        let raw = socketcan::CanFrame::new(id, frame.payload())
            .ok_or_else(|| BusError::InvalidFrame(format!("frame 0x{:X}", frame.id)))?;
        self.socket.write_frame(&raw)?;
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Option<CanFrame>, BusError> {
        loop {
            match self.socket.read_frame() {
                Ok(socketcan::CanFrame::Data(data)) => {
                    if data.is_extended() {
                        continue;
                    }
                    let id = (data.raw_id() & 0x7FF) as u16;
                    return CanFrame::new(id, data.data()).map(Some);
                }
                Ok(socketcan::CanFrame::Error(error)) => {
                    warn!(error = ?error, "CAN error frame");
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
