//! A single struct owning every piece of
//! volatile motion/decoder/settings state, passed by `&mut` into the
//! per-concern modules (`quadrature`, `motion`, `regulator`, `stall`,
//! `dispatcher`) rather than each of those reaching into statics.
//!
//! Field-level single-writer discipline (who is allowed to touch what from
//! which execution context) is documented next to each field.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::settings::Settings;
use crate::types::{DeferredCommand, MotorDirection, MotorStatus};

/// Fields touched by the motion controller (main loop + GPIO edge ISR, the
/// latter only ever calling the IRQ-safe `motor_stop`) and the speed
/// regulator / stall supervisor ISRs.
#[derive(Default)]
pub struct MotionState {
    /// Signed location in Hall-1 edge ticks from the calibrated top stop.
    /// Written by: quadrature edge handling, dispatcher (`Set location`),
    /// stall supervisor (endpoint calibration zeroing).
    pub location: i32,
    /// `-1` is the "drive up until stall" sentinel. Written by: dispatcher.
    pub target_location: i32,
    /// Written by: motion primitives (`motor_stop`/`motor_start_common`),
    /// `process_location`'s slowdown branch, stall supervisor.
    pub status: MotorStatus,
    /// Written by: motion primitives only.
    pub direction: MotorDirection,
    /// Current RPM setpoint, mutated downward during slowdown. Written by:
    /// motion primitives, `process_location`, dispatcher (`Set speed`).
    pub target_speed: u8,
    /// Current PWM duty (0-254). Written by: motion primitives, speed
    /// regulator.
    pub curr_pwm: u8,
    /// Milliseconds between the last two Hall-1 edges, 0 if unknown.
    /// Written by: quadrature decoder.
    pub hall_sensor_1_interval: u32,
    /// Volatile, not persisted (confirmed against `original_source`).
    pub slowdown_factor: u8,
    pub min_slowdown_speed: u8,
    /// Set by `motor_start_common`, read by the stall supervisor's grace
    /// period check.
    pub movement_started_timestamp: u32,
    /// Suspends travel limits and forces position-percent to 50.
    pub calibrating: bool,
}

impl MotionState {
    pub fn new() -> Self {
        Self {
            slowdown_factor: crate::constants::DEFAULT_SLOWDOWN_FACTOR,
            min_slowdown_speed: crate::constants::DEFAULT_MINIMUM_SLOWDOWN_SPEED,
            status: MotorStatus::Stopped,
            direction: MotorDirection::None,
            ..Default::default()
        }
    }
}

/// Fields touched only by the quadrature decoder (GPIO edge ISR) and read
/// by the speed regulator / dispatcher debug opcodes.
#[derive(Default)]
pub struct DecoderState {
    /// `-1` until the first edge is seen.
    pub rotor_position: i8,
    pub hall_sensor_1_idle_time: u32,
    pub hall_sensor_1_ticks: u32,
    pub hall_sensor_2_ticks: u32,
    pub dir_error: u32,
    pub saved_hall_sensor_1_ticks: u32,
    pub saved_hall_sensor_2_ticks: u32,
    /// Set by the stall supervisor on an upward stall, read by itself on
    /// every 1 ms tick while `CalibratingEndPoint`.
    pub endpoint_calibration_started_timestamp: u32,
    /// Debug counters surfaced by the `0xCCD1` opcode, reset at the points
    /// named below.
    pub sensor_ticks_while_stopped: i32,
    pub sensor_ticks_while_calibrating_endpoint: i32,
}

impl DecoderState {
    pub fn new() -> Self {
        Self {
            rotor_position: -1,
            ..Default::default()
        }
    }
}

/// One-slot atomic mailbox: the UART RX ISR (and boot sequence) replace its
/// content, the main loop takes-and-clears it. No unbounded queue — only
/// the most recently issued command survives.
pub struct Mailbox(AtomicU8);

impl Mailbox {
    pub const fn new() -> Self {
        Self(AtomicU8::new(DeferredCommand::NoCommand as u8))
    }

    /// ISR-side write. Overwrites whatever was previously queued.
    pub fn post(&self, cmd: DeferredCommand) {
        self.0.store(cmd as u8, Ordering::Release);
    }

    /// Main-loop-side read-and-clear.
    pub fn take(&self) -> DeferredCommand {
        let raw = self.0.swap(DeferredCommand::NoCommand as u8, Ordering::AcquireRel);
        DeferredCommand::try_from(raw).unwrap_or(DeferredCommand::NoCommand)
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the firmware core needs, minus the hardware handles
/// (`Bridge`/`Analog`/`NvStore`), which are passed in at each call site so
/// this struct stays host-testable.
#[derive(Default)]
pub struct Controller {
    pub settings: Settings,
    pub motion: MotionState,
    pub decoder: DecoderState,
    pub mailbox: Mailbox,
}

impl Controller {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            motion: MotionState::new(),
            decoder: DecoderState::new(),
            mailbox: Mailbox::new(),
        }
    }

    /// Derived, non-persistent position percentage on `[0, 100]`. Forced to
    /// 50 while calibrating.
    pub fn position_percent(&self) -> u8 {
        if self.motion.calibrating {
            return 50;
        }
        if self.motion.location < 0 {
            return 0;
        }
        if self.settings.max_curtain_length == 0 {
            return 0;
        }
        let pct = 100 * self.motion.location as i64 / self.settings.max_curtain_length as i64;
        pct.clamp(0, 100) as u8
    }

    /// `location_to_position100() * 256`, used by the extended status
    /// opcode (`0xCCDE`) which reports sub-percent precision.
    pub fn position_percent_x256(&self) -> u16 {
        if self.motion.calibrating {
            return 50 * 256;
        }
        if self.motion.location < 0 {
            return 0;
        }
        if self.settings.max_curtain_length == 0 {
            return 0;
        }
        let pct256 =
            256 * 100 * self.motion.location as i64 / self.settings.max_curtain_length as i64;
        pct256.clamp(0, 100 * 256) as u16
    }

    /// Inverse of `position_percent`: convert a percentage to a location.
    pub fn position100_to_location(&self, position: u32) -> i32 {
        if position > 100 {
            return self.settings.max_curtain_length as i32;
        }
        (position * self.settings.max_curtain_length / 100) as i32
    }

    /// Current RPM derived from the Hall-1 edge interval. 0 if unknown.
    pub fn rpm(&self) -> u32 {
        if self.motion.hall_sensor_1_interval == 0 {
            return 0;
        }
        60_000 / (crate::constants::GEAR_RATIO * 2 * self.motion.hall_sensor_1_interval)
    }
}
