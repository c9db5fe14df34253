//! Motor controller nodes on the CAN bus (ODrive command set).

use fieldos_bus::CanBus;
use fieldos_types::FieldError;
use tracing::debug;

pub const CMD_HEARTBEAT: u16 = 0x01;
pub const CMD_SET_AXIS_STATE: u16 = 0x07;
pub const CMD_ENCODER_ESTIMATES: u16 = 0x09;
pub const CMD_SET_INPUT_POS: u16 = 0x0C;
pub const CMD_SET_INPUT_VEL: u16 = 0x0D;
pub const CMD_SET_LIMITS: u16 = 0x0F;

/// Requested controller state (`Set_Axis_State`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AxisRequest {
    Idle = 1,
    ClosedLoop = 8,
    Homing = 11,
}

/// Decoded heartbeat frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub error: u32,
    pub axis_state: u8,
    pub seq: u64,
}

impl Heartbeat {
    pub fn is_idle(&self) -> bool {
        u32::from(self.axis_state) == AxisRequest::Idle as u32
    }

    pub fn is_homing(&self) -> bool {
        u32::from(self.axis_state) == AxisRequest::Homing as u32
    }
}

/// Decoded encoder estimate, in motor turns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderEstimate {
    pub position: f32,
    pub velocity: f32,
    pub seq: u64,
}

/// One motor controller addressed by its node base id.
#[derive(Clone)]
pub struct OdriveNode {
    bus: CanBus,
    node: u16,
}

impl OdriveNode {
    pub fn new(bus: CanBus, node: u16) -> Self {
        Self { bus, node }
    }

    pub fn node(&self) -> u16 {
        self.node
    }

    pub fn set_axis_state(&self, state: AxisRequest) -> Result<(), FieldError> {
        debug!(node = self.node, ?state, "set axis state");
        self.bus
            .send_command(self.node, CMD_SET_AXIS_STATE, &(state as u32).to_le_bytes())
    }

    /// Position setpoint in turns.
    pub fn set_input_pos(&self, turns: f32) -> Result<(), FieldError> {
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&turns.to_le_bytes());
        self.bus.send_command(self.node, CMD_SET_INPUT_POS, &payload)
    }

    /// Velocity setpoint in turns per second, no torque feed-forward.
    pub fn set_input_vel(&self, turns_per_s: f32) -> Result<(), FieldError> {
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&turns_per_s.to_le_bytes());
        self.bus.send_command(self.node, CMD_SET_INPUT_VEL, &payload)
    }

    pub fn set_limits(&self, velocity_limit: f32, current_limit: f32) -> Result<(), FieldError> {
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&velocity_limit.to_le_bytes());
        payload[4..].copy_from_slice(&current_limit.to_le_bytes());
        self.bus.send_command(self.node, CMD_SET_LIMITS, &payload)
    }

    pub fn heartbeat(&self) -> Option<Heartbeat> {
        let received = self.bus.latest(self.node + CMD_HEARTBEAT)?;
        Some(Heartbeat {
            error: received.frame.u32_at(0)?,
            axis_state: *received.frame.payload().get(4)?,
            seq: received.seq,
        })
    }

    pub fn encoder(&self) -> Option<EncoderEstimate> {
        let received = self.bus.latest(self.node + CMD_ENCODER_ESTIMATES)?;
        Some(EncoderEstimate {
            position: received.frame.f32_at(0)?,
            velocity: received.frame.f32_at(4)?,
            seq: received.seq,
        })
    }
}
