//! Shared small enums for motion state, direction, and the deferred-command
//! mailbox. Kept `#[repr(u8)]` since each crosses the wire or a non-volatile
//! slot at some point (status byte in reply frames, auto-cal flag).

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Motion state machine.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
pub enum MotorStatus {
    Stopped = 0,
    Moving = 1,
    Stopping = 2,
    CalibratingEndPoint = 3,
    Error = 4,
}

impl Default for MotorStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

/// Direction is independent of `MotorStatus`; `None` iff unpowered.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
pub enum MotorDirection {
    None = 0,
    Up = 1,
    Down = 2,
}

impl Default for MotorDirection {
    fn default() -> Self {
        Self::None
    }
}

/// One-slot deferred-command mailbox. Written from UART RX interrupt
/// context, drained by the main loop. A single slot, not an unbounded
/// queue: only the most recently issued command matters.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
pub enum DeferredCommand {
    NoCommand = 0,
    MotorUp = 1,
    MotorDown = 2,
    Stop = 3,
}

impl Default for DeferredCommand {
    fn default() -> Self {
        Self::NoCommand
    }
}
