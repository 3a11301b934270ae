//! Narrow hardware-abstraction traits the motion controller talks to.
//!
//! The bridge/PWM accessor surface is kept
//! deliberately small (four operations) so the motion controller, speed
//! regulator, and stall supervisor can run against a simulated bridge in
//! host tests instead of real `stm32-hal2` timer/GPIO types.

/// High-side gate driver, one per direction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GateSide {
    High1,
    High2,
}

/// Low-side PWM channel, one per direction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PwmChannel {
    Low1,
    Low2,
}

/// H-bridge + PWM timer surface. Implementations own the GPIO pins and
/// timer compare registers; the motion controller only ever calls these
/// four methods, never touches a register directly.
pub trait Bridge {
    fn set_high(&mut self, side: GateSide, asserted: bool);
    fn pwm_set(&mut self, channel: PwmChannel, duty: u8);
    fn pwm_start(&mut self, channel: PwmChannel);
    fn pwm_stop(&mut self, channel: PwmChannel);
}

/// Analog readings. `voltage()` returns raw ADC-scaled units such that
/// `voltage() / 30` is volts (matches the original `get_voltage()` helper).
/// `motor_current()` and `battery()` may be stubbed to a constant on a
/// `slim` build (no analog front-end compiled in).
pub trait Analog {
    fn voltage(&mut self) -> u16;
    fn motor_current(&mut self) -> u8;
    fn battery(&mut self) -> u8;
}

/// Failure mode for a non-volatile storage access. The original firmware
/// represents this as a non-zero status code from `EE_ReadVariable`; we
/// collapse it to a unit error since callers only ever ask "did this work".
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NvError;

/// Five opaque 16-bit slots addressed by virtual address.
pub trait NvStore {
    fn load(&mut self, virt_addr: u16) -> Result<u16, NvError>;
    fn store(&mut self, virt_addr: u16, value: u16) -> Result<(), NvError>;
}

/// Monotonic millisecond clock, supplied by the periodic tick sources.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use core::cell::Cell;

    /// In-memory bridge recording the last-commanded state of each gate and
    /// channel, for assertions in motion-controller tests.
    #[derive(Default)]
    pub struct MockBridge {
        pub high1: bool,
        pub high2: bool,
        pub low1_running: bool,
        pub low2_running: bool,
        pub low1_duty: u8,
        pub low2_duty: u8,
    }

    impl Bridge for MockBridge {
        fn set_high(&mut self, side: GateSide, asserted: bool) {
            match side {
                GateSide::High1 => self.high1 = asserted,
                GateSide::High2 => self.high2 = asserted,
            }
        }

        fn pwm_set(&mut self, channel: PwmChannel, duty: u8) {
            match channel {
                PwmChannel::Low1 => self.low1_duty = duty,
                PwmChannel::Low2 => self.low2_duty = duty,
            }
        }

        fn pwm_start(&mut self, channel: PwmChannel) {
            match channel {
                PwmChannel::Low1 => self.low1_running = true,
                PwmChannel::Low2 => self.low2_running = true,
            }
        }

        fn pwm_stop(&mut self, channel: PwmChannel) {
            match channel {
                PwmChannel::Low1 => {
                    self.low1_running = false;
                    self.low1_duty = 0;
                }
                PwmChannel::Low2 => {
                    self.low2_running = false;
                    self.low2_duty = 0;
                }
            }
        }
    }

    #[derive(Default)]
    pub struct MockAnalog {
        pub voltage: u16,
        pub current: u8,
        pub battery: u8,
    }

    impl Analog for MockAnalog {
        fn voltage(&mut self) -> u16 {
            self.voltage
        }
        fn motor_current(&mut self) -> u8 {
            self.current
        }
        fn battery(&mut self) -> u8 {
            self.battery
        }
    }

    /// In-memory settings backing store; `fail_slot` simulates a single
    /// virtual address reading as absent (non-zero status), exercising the
    /// default-and-rewrite recovery path.
    pub struct MockNvStore {
        pub slots: [(u16, u16); 5],
        pub fail_once: Option<u16>,
    }

    impl Default for MockNvStore {
        fn default() -> Self {
            Self {
                slots: [(0, 0); 5],
                fail_once: None,
            }
        }
    }

    impl NvStore for MockNvStore {
        fn load(&mut self, virt_addr: u16) -> Result<u16, NvError> {
            if self.fail_once == Some(virt_addr) {
                self.fail_once = None;
                return Err(NvError);
            }
            for (addr, val) in self.slots.iter() {
                if *addr == virt_addr {
                    return Ok(*val);
                }
            }
            Err(NvError)
        }

        fn store(&mut self, virt_addr: u16, value: u16) -> Result<(), NvError> {
            for slot in self.slots.iter_mut() {
                if slot.0 == virt_addr || slot.0 == 0 {
                    *slot = (virt_addr, value);
                    return Ok(());
                }
            }
            Err(NvError)
        }
    }

    /// Manually-advanced clock for deterministic timing tests.
    pub struct MockClock(pub Cell<u32>);

    impl MockClock {
        pub fn new(start: u32) -> Self {
            Self(Cell::new(start))
        }

        pub fn advance(&self, ms: u32) {
            self.0.set(self.0.get() + ms);
        }
    }

    impl Clock for MockClock {
        fn now_ms(&self) -> u32 {
            self.0.get()
        }
    }
}
