//! Motion primitives: starting, stopping, and per-edge location/target
//! bookkeeping.

use crate::bridge::{Bridge, GateSide, PwmChannel};
use crate::types::{DeferredCommand, MotorDirection, MotorStatus};

impl crate::controller::Controller {
    /// Adjusts `location` for one sensor tick in `sensor_direction`, then
    /// checks for arrival at `target_location` and for the slowdown band.
    /// Skipped entirely while calibrating: the rod is driven against the
    /// hard stop and passive movement is not meaningful until it settles.
    pub fn process_location(&mut self, sensor_direction: MotorDirection, bridge: &mut impl Bridge) {
        if self.motion.calibrating {
            return;
        }

        match sensor_direction {
            MotorDirection::Up => {
                self.motion.location -= 1;
                if self.motion.direction == MotorDirection::Up
                    && self.motion.target_location != -1
                    && self.motion.location - 1 <= self.motion.target_location
                {
                    self.motor_stop(bridge);
                    return;
                }
            }
            MotorDirection::Down => {
                self.motion.location += 1;
                if self.motion.direction == MotorDirection::Down
                    && self.motion.location + 1 >= self.motion.target_location
                {
                    self.motor_stop(bridge);
                    return;
                }
            }
            MotorDirection::None => {}
        }

        if self.motion.direction != MotorDirection::None {
            let distance_to_target = (self.motion.target_location - self.motion.location).abs();
            let slowdown_band =
                self.motion.target_speed as i32 * self.motion.slowdown_factor as i32 / 8;
            if distance_to_target < slowdown_band {
                self.motion.status = MotorStatus::Stopping;
                let mut new_speed = (distance_to_target * 8 / self.motion.slowdown_factor as i32)
                    as u8;
                if new_speed < self.motion.min_slowdown_speed {
                    new_speed = self.motion.min_slowdown_speed;
                }
                if new_speed < self.motion.target_speed {
                    self.motion.target_speed = new_speed;
                }
            }
        }
    }

    /// De-energizes both channels and resets the per-movement counters.
    /// Callable from any context, including the GPIO edge ISR via
    /// `process_location`.
    pub fn motor_stop(&mut self, bridge: &mut impl Bridge) {
        bridge.pwm_stop(PwmChannel::Low1);
        bridge.pwm_stop(PwmChannel::Low2);
        bridge.set_high(GateSide::High1, false);
        bridge.set_high(GateSide::High2, false);

        self.motion.status = MotorStatus::Stopped;
        self.motion.direction = MotorDirection::None;
        self.motion.curr_pwm = 0;

        self.decoder.sensor_ticks_while_stopped = 0;
        self.decoder.saved_hall_sensor_1_ticks = self.decoder.hall_sensor_1_ticks;
        self.decoder.saved_hall_sensor_2_ticks = self.decoder.hall_sensor_2_ticks;

        self.motion.hall_sensor_1_interval = 0;
        self.decoder.hall_sensor_1_ticks = 0;
        self.decoder.hall_sensor_2_ticks = 0;
        self.decoder.hall_sensor_1_idle_time = 0;
        self.motion.target_speed = 0;
    }

    /// Arms the initial PWM and marks the movement start time for the
    /// stall supervisor's grace period. Assumes the caller has already
    /// de-energized the bridge (via `motor_stop`) and, per the original's
    /// `motor_start_common()`, waited out the ~10 ms settling delay
    /// between stop and restart — that delay can't run here, since this
    /// is reachable from interrupt-free host tests as well as the RTIC
    /// glue layer, so the glue layer's `idle` task owns it (see `main.rs`).
    fn motor_start_common(&mut self, motor_speed: u8, now_ms: u32) {
        self.motion.movement_started_timestamp = now_ms;
        self.motion.target_speed = motor_speed;
        self.motion.curr_pwm = crate::constants::INITIAL_PWM;
        self.motion.status = MotorStatus::Moving;
    }

    /// Energizes the "up" direction, assuming the motor is already
    /// de-energized and any settling delay has already elapsed. Used by
    /// the glue layer after its own explicit `motor_stop` + delay
    /// sequence; `motor_up` (below) is the all-in-one entry point used
    /// everywhere else, including tests.
    pub fn energize_up(&mut self, motor_speed: u8, bridge: &mut impl Bridge, now_ms: u32) {
        self.motor_start_common(motor_speed, now_ms);
        bridge.pwm_start(PwmChannel::Low2);
        bridge.pwm_set(PwmChannel::Low2, crate::constants::INITIAL_PWM);
        bridge.set_high(GateSide::High1, true);
        self.motion.direction = MotorDirection::Up;
    }

    /// Energizes the "down" direction; see `energize_up`.
    pub fn energize_down(&mut self, motor_speed: u8, bridge: &mut impl Bridge, now_ms: u32) {
        self.motor_start_common(motor_speed, now_ms);
        bridge.pwm_start(PwmChannel::Low1);
        bridge.pwm_set(PwmChannel::Low1, crate::constants::INITIAL_PWM);
        bridge.set_high(GateSide::High2, true);
        self.motion.direction = MotorDirection::Down;
    }

    /// `motor_stop` followed immediately by `energize_up`, with no
    /// settling delay in between. Matches the original's plain
    /// `motor_up()` (itself blocking on `HAL_Delay(10)` inline); used by
    /// host tests and anywhere a real settling wait isn't applicable.
    pub fn motor_up(&mut self, motor_speed: u8, bridge: &mut impl Bridge, now_ms: u32) {
        self.motor_stop(bridge);
        self.energize_up(motor_speed, bridge, now_ms);
    }

    /// See `motor_up`.
    pub fn motor_down(&mut self, motor_speed: u8, bridge: &mut impl Bridge, now_ms: u32) {
        self.motor_stop(bridge);
        self.energize_down(motor_speed, bridge, now_ms);
    }

    /// Drains the deferred-command mailbox. Called from the idle/main loop,
    /// never from interrupt context (unlike `motor_stop`, which the GPIO
    /// edge ISR path calls directly via `process_location`). Does not
    /// insert the settling delay between stop and restart — callers that
    /// need it (the RTIC glue layer) drive `motor_stop`/`energize_up`/
    /// `energize_down` directly instead of going through this method.
    pub fn motor_process(&mut self, bridge: &mut impl Bridge, now_ms: u32) {
        match self.mailbox.take() {
            DeferredCommand::MotorUp => self.motor_up(self.settings.default_speed, bridge, now_ms),
            DeferredCommand::MotorDown => {
                self.motor_down(self.settings.default_speed, bridge, now_ms)
            }
            DeferredCommand::Stop => self.motor_stop(bridge),
            DeferredCommand::NoCommand => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::MockBridge;
    use crate::controller::Controller;

    #[test]
    fn motor_up_energizes_low2_and_high1() {
        let mut c = Controller::new();
        let mut bridge = MockBridge::default();
        c.motor_up(20, &mut bridge, 1_000);

        assert!(bridge.high1);
        assert!(!bridge.high2);
        assert!(bridge.low2_running);
        assert!(!bridge.low1_running);
        assert_eq!(c.motion.direction, MotorDirection::Up);
        assert_eq!(c.motion.status, MotorStatus::Moving);
        assert_eq!(c.motion.target_speed, 20);
        assert_eq!(c.motion.movement_started_timestamp, 1_000);
    }

    #[test]
    fn motor_down_energizes_low1_and_high2() {
        let mut c = Controller::new();
        let mut bridge = MockBridge::default();
        c.motor_down(20, &mut bridge, 500);

        assert!(bridge.high2);
        assert!(!bridge.high1);
        assert!(bridge.low1_running);
        assert_eq!(c.motion.direction, MotorDirection::Down);
    }

    #[test]
    fn motor_stop_deenergizes_and_resets_counters() {
        let mut c = Controller::new();
        let mut bridge = MockBridge::default();
        c.motor_up(20, &mut bridge, 0);
        c.decoder.hall_sensor_1_ticks = 9;
        c.decoder.hall_sensor_2_ticks = 4;

        c.motor_stop(&mut bridge);

        assert!(!bridge.high1);
        assert!(!bridge.low2_running);
        assert_eq!(c.motion.status, MotorStatus::Stopped);
        assert_eq!(c.motion.direction, MotorDirection::None);
        assert_eq!(c.motion.curr_pwm, 0);
        assert_eq!(c.decoder.saved_hall_sensor_1_ticks, 9);
        assert_eq!(c.decoder.saved_hall_sensor_2_ticks, 4);
        assert_eq!(c.decoder.hall_sensor_1_ticks, 0);
    }

    #[test]
    fn process_location_up_decrements_and_stops_at_target() {
        let mut c = Controller::new();
        let mut bridge = MockBridge::default();
        c.motion.direction = MotorDirection::Up;
        c.motion.status = MotorStatus::Moving;
        c.motion.location = 10;
        c.motion.target_location = 8;
        c.motion.target_speed = 1;

        c.process_location(MotorDirection::Up, &mut bridge);
        assert_eq!(c.motion.location, 9);
        assert_eq!(c.motion.status, MotorStatus::Moving);

        c.process_location(MotorDirection::Up, &mut bridge);
        // location - 1 <= target_location (8 - 1 = 7 <= 8) -> stop
        assert_eq!(c.motion.location, 8);
        assert_eq!(c.motion.status, MotorStatus::Stopped);
    }

    #[test]
    fn process_location_ignored_while_calibrating() {
        let mut c = Controller::new();
        let mut bridge = MockBridge::default();
        c.motion.calibrating = true;
        c.motion.location = 5;
        c.process_location(MotorDirection::Up, &mut bridge);
        assert_eq!(c.motion.location, 5);
    }

    #[test]
    fn process_location_enters_slowdown_band_and_clamps_to_minimum() {
        let mut c = Controller::new();
        let mut bridge = MockBridge::default();
        c.motion.direction = MotorDirection::Down;
        c.motion.status = MotorStatus::Moving;
        c.motion.location = 0;
        c.motion.target_location = 100;
        c.motion.target_speed = 20;
        c.motion.slowdown_factor = 8;
        c.motion.min_slowdown_speed = 5;

        // distance_to_target starts at 100, band = 20*8/8 = 20; push
        // location close enough to enter the band.
        c.motion.location = 82;
        c.process_location(MotorDirection::Down, &mut bridge);

        assert_eq!(c.motion.status, MotorStatus::Stopping);
        assert!(c.motion.target_speed <= 20);
        assert!(c.motion.target_speed >= 5);
    }

    #[test]
    fn motor_process_drains_mailbox_and_starts_motion() {
        let mut c = Controller::new();
        let mut bridge = MockBridge::default();
        c.settings.default_speed = 15;
        c.mailbox.post(DeferredCommand::MotorUp);

        c.motor_process(&mut bridge, 2_000);

        assert_eq!(c.motion.status, MotorStatus::Moving);
        assert_eq!(c.motion.direction, MotorDirection::Up);
        assert_eq!(c.motion.target_speed, 15);
    }

    #[test]
    fn motor_process_is_noop_with_empty_mailbox() {
        let mut c = Controller::new();
        let mut bridge = MockBridge::default();
        c.motor_process(&mut bridge, 0);
        assert_eq!(c.motion.status, MotorStatus::Stopped);
    }
}
