//! Board and protocol constants. Values mirror the original Fyrtur-derived
//! firmware this core reimplements; see `motor.c` for provenance where noted.

/// Motor-shaft revolutions per curtain-rod revolution. Board-specific.
#[cfg(feature = "g4")]
pub const GEAR_RATIO: u32 = 171;
#[cfg(feature = "h7")]
pub const GEAR_RATIO: u32 = 171;
#[cfg(not(any(feature = "g4", feature = "h7")))]
pub const GEAR_RATIO: u32 = 171;

/// Factory absolute maximum curtain length, in Hall-1 ticks, used as the
/// default for both `max_curtain_length` and `full_curtain_length`.
pub const DEFAULT_FULL_CURTAIN_LEN: u32 = 2_000;

/// Initial PWM duty cycle (of 254) applied the instant a motor direction is
/// energized, before the speed regulator takes over.
pub const INITIAL_PWM: u8 = 60;

/// Default target RPM used for `MotorUp`/`MotorDown` deferred commands.
pub const DEFAULT_TARGET_SPEED: u8 = 18;

pub const DEFAULT_MINIMUM_VOLTAGE: u16 = 0;
pub const DEFAULT_AUTO_CAL_SETTING: bool = true;

pub const DEFAULT_SLOWDOWN_FACTOR: u8 = 8;
pub const DEFAULT_MINIMUM_SLOWDOWN_SPEED: u8 = 5;

/// Milliseconds without a Hall-1 edge before we consider the motor stalled.
pub const HALL_SENSOR_TIMEOUT: u32 = 300;

/// A looser idle-time leash while decelerating into a target: premature
/// speed loss at the end of a slowdown should not immediately read as stall.
pub const HALL_SENSOR_TIMEOUT_WHILE_STOPPING: u32 = 600;

/// Milliseconds after `motor_up`/`motor_down` during which stall detection is
/// suspended, to let the motor get up to speed.
pub const HALL_SENSOR_GRACE_PERIOD: u32 = 2_000;

/// Settling time after an upward stall before declaring the top stop
/// calibrated and zeroing `location`.
pub const ENDPOINT_CALIBRATION_PERIOD: u32 = 1_000;

/// Firmware version reported by `CMD_GET_VERSION`.
pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 1;

/// `DEG_TO_LOCATION(deg)`: convert a curtain-rod angle in degrees to a
/// signed tick delta. `GEAR_RATIO * 4` ticks per rod revolution (4 Hall
/// edges per motor revolution).
pub const fn deg_to_location(deg: i32) -> i32 {
    (GEAR_RATIO as i32) * 4 * deg / 360
}

/// Virtual addresses of the five persisted settings slots, in
/// `Settings::SLOT_ORDER` order. Mirrors `VirtAddVarTab` in the original.
pub const SETTINGS_VIRT_ADDRS: [u16; 5] = [0x5555, 0x6666, 0x7777, 0x8888, 0x9999];
