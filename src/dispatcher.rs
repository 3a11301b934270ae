//! Command dispatcher: turns received UART frames into state transitions
//! and reply frames.
//!
//! Encoded as a first-match two-tier table: an exact 16-bit
//! opcode match, then (if nothing matched) a high-nibble family match on
//! `cmd1`. Settling-delay commands (`motor_up`/`down`/`stop`) are deferred
//! to the mailbox rather than run inline, since dispatch runs from UART RX
//! interrupt context.

use crate::bridge::{Analog, NvStore};
use crate::constants::deg_to_location;
use crate::controller::Controller;
use crate::settings::Slot;
use crate::types::DeferredCommand;

/// A reply frame, built in place in a caller-provided buffer:
/// `[0x00, 0xFF, response_code, payload..., checksum]`.
struct ReplyBuilder<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> ReplyBuilder<'a> {
    fn new(buf: &'a mut [u8], response_code: u8) -> Self {
        buf[0] = 0x00;
        buf[1] = 0xFF;
        buf[2] = response_code;
        Self { buf, len: 3 }
    }

    fn push(&mut self, byte: u8) -> &mut Self {
        self.buf[self.len] = byte;
        self.len += 1;
        self
    }

    /// Appends the XOR checksum of bytes `3..len` and returns the total
    /// frame length.
    fn finish(self) -> usize {
        let mut checksum = 0u8;
        for b in &self.buf[3..self.len] {
            checksum ^= *b;
        }
        self.buf[self.len] = checksum;
        self.len + 1
    }
}

impl Controller {
    /// Handles one received frame. `rx` holds the received bytes (opcode in
    /// `rx[3..5]`); `tx` is scratch space for a reply, sized for the
    /// largest reply frame (9 bytes). Returns the number of bytes written
    /// to `tx`, or 0 if the command produces no reply.
    pub fn handle_command(
        &mut self,
        rx: &[u8],
        tx: &mut [u8],
        nv: &mut impl NvStore,
        analog: &mut impl Analog,
    ) -> usize {
        let cmd1 = rx[3];
        let cmd2 = rx[4];
        let cmd = ((cmd1 as u16) << 8) | cmd2 as u16;

        if let Some(len) = self.handle_exact_opcode(cmd, tx, nv, analog) {
            return len;
        }
        self.handle_prefixed_opcode(cmd1, cmd2, nv)
    }

    fn handle_exact_opcode(
        &mut self,
        cmd: u16,
        tx: &mut [u8],
        nv: &mut impl NvStore,
        analog: &mut impl Analog,
    ) -> Option<usize> {
        match cmd {
            0x0ADD => {
                self.motion.target_location = -1;
                self.mailbox.post(DeferredCommand::MotorUp);
            }
            0x0AEE => {
                self.motion.target_location = self.settings.max_curtain_length as i32;
                self.mailbox.post(DeferredCommand::MotorDown);
            }
            0x0A0D => {
                self.motion.target_location = (self.motion.location - deg_to_location(17)).max(0);
                self.mailbox.post(DeferredCommand::MotorUp);
            }
            0x0A0E => {
                self.motion.target_location = (self.motion.location + deg_to_location(17))
                    .min(self.settings.max_curtain_length as i32);
                self.mailbox.post(DeferredCommand::MotorDown);
            }
            0x0ACC => {
                self.mailbox.post(DeferredCommand::Stop);
            }
            0xFAD1 => {
                self.motion.target_location = self.motion.location - deg_to_location(90);
                self.mailbox.post(DeferredCommand::MotorUp);
            }
            0xFAD2 => {
                self.motion.target_location = self.motion.location + deg_to_location(90);
                self.mailbox.post(DeferredCommand::MotorDown);
            }
            0xFAD3 => {
                self.motion.target_location = self.motion.location - deg_to_location(6);
                self.mailbox.post(DeferredCommand::MotorUp);
            }
            0xFAD4 => {
                self.motion.target_location = self.motion.location + deg_to_location(6);
                self.mailbox.post(DeferredCommand::MotorDown);
            }
            0xFACC => {
                // Fall through to also reset max length.
                self.settings.write_slot(
                    nv,
                    self.motion.status,
                    Slot::FullCurtainLen,
                    self.motion.location as u16,
                );
                self.settings.write_slot(
                    nv,
                    self.motion.status,
                    Slot::MaxCurtainLen,
                    self.motion.location as u16,
                );
            }
            0xFAEE => {
                self.settings.write_slot(
                    nv,
                    self.motion.status,
                    Slot::MaxCurtainLen,
                    self.motion.location as u16,
                );
            }
            0xFA00 => {
                let full = self.settings.full_curtain_length as u16;
                self.settings
                    .write_slot(nv, self.motion.status, Slot::MaxCurtainLen, full);
                self.motion.calibrating = true;
            }
            0xFADA => {
                self.motion.target_location = self.motion.location + deg_to_location(360 * 5);
                self.mailbox.post(DeferredCommand::MotorDown);
            }
            0xCCCC => {
                let mut r = ReplyBuilder::new(tx, 0xD8);
                r.push(analog.battery()).push((analog.voltage() / 16) as u8);
                r.push(self.rpm() as u8).push(self.position_percent());
                return Some(r.finish());
            }
            0xCCDC => {
                let mut r = ReplyBuilder::new(tx, 0xD0);
                r.push(crate::constants::VERSION_MAJOR)
                    .push(crate::constants::VERSION_MINOR)
                    .push(self.settings.minimum_voltage as u8)
                    .push(self.settings.default_speed);
                return Some(r.finish());
            }
            0xCCD0 => {
                let mut r = ReplyBuilder::new(tx, 0xD1);
                r.push((self.motion.location >> 8) as u8)
                    .push((self.motion.location & 0xff) as u8)
                    .push((self.motion.target_location >> 8) as u8)
                    .push((self.motion.target_location & 0xff) as u8);
                return Some(r.finish());
            }
            0xCCDE => {
                let pct256 = self.position_percent_x256();
                let mut r = ReplyBuilder::new(tx, 0xDA);
                r.push(self.motion.status.into())
                    .push(analog.motor_current())
                    .push(self.rpm() as u8)
                    .push((pct256 >> 8) as u8)
                    .push((pct256 & 0xff) as u8);
                return Some(r.finish());
            }
            0xCCDF => {
                let mut r = ReplyBuilder::new(tx, 0xDB);
                r.push(self.motion.calibrating as u8)
                    .push((self.settings.max_curtain_length >> 8) as u8)
                    .push((self.settings.max_curtain_length & 0xff) as u8)
                    .push((self.settings.full_curtain_length >> 8) as u8)
                    .push((self.settings.full_curtain_length & 0xff) as u8);
                return Some(r.finish());
            }
            0xCCD1 => {
                let mut r = ReplyBuilder::new(tx, 0xD2);
                r.push(0)
                    .push(self.decoder.dir_error as u8)
                    .push(self.decoder.sensor_ticks_while_calibrating_endpoint as u8)
                    .push(self.decoder.sensor_ticks_while_stopped as u8)
                    .push(0);
                return Some(r.finish());
            }
            0xCCD2 => {
                let mut r = ReplyBuilder::new(tx, 0xD3);
                r.push((self.decoder.saved_hall_sensor_1_ticks >> 8) as u8)
                    .push((self.decoder.saved_hall_sensor_1_ticks & 0xff) as u8)
                    .push((self.decoder.saved_hall_sensor_2_ticks >> 8) as u8)
                    .push((self.decoder.saved_hall_sensor_2_ticks & 0xff) as u8)
                    .push(0);
                return Some(r.finish());
            }
            _ => return None,
        }
        Some(0)
    }

    fn handle_prefixed_opcode(&mut self, cmd1: u8, cmd2: u8, nv: &mut impl NvStore) -> usize {
        if cmd1 == 0xDD {
            if !self.motion.calibrating {
                self.go_to_location(self.position100_to_location(cmd2 as u32));
            }
            return 0;
        }

        match cmd1 & 0xf0 {
            0x10 => {
                if !self.motion.calibrating {
                    let payload = (((cmd1 & 0x0f) as u32) << 8) | cmd2 as u32;
                    // 12-bit fixed point, /16 -> percent, kept in
                    // sixteenths throughout so the fractional part isn't
                    // truncated away before scaling by max_curtain_length
                    // (the original keeps this whole computation in
                    // floating point for the same reason).
                    let max = self.settings.max_curtain_length;
                    let target = if payload > 100 * 16 {
                        max as i32
                    } else {
                        (payload * max / (100 * 16)) as i32
                    };
                    self.go_to_location(target);
                }
            }
            0x20 => {
                if cmd2 > 1 {
                    self.settings.default_speed = cmd2;
                    if self.motion.target_speed != 0 {
                        self.motion.target_speed = cmd2;
                    }
                }
            }
            0x30 => {
                if cmd2 > 0 {
                    self.settings
                        .write_slot(nv, self.motion.status, Slot::DefaultSpeed, cmd2 as u16);
                }
            }
            0x40 => {
                self.settings
                    .write_slot(nv, self.motion.status, Slot::MinimumVoltage, cmd2 as u16);
            }
            0x50 => {
                // Only 12 bits of data; the LSB was dropped on encode.
                let payload = (((cmd1 & 0x0f) as i32) << 8) | cmd2 as i32;
                self.motion.location = payload << 1;
                self.motion.calibrating = false;
            }
            0x60 => {
                self.settings
                    .write_slot(nv, self.motion.status, Slot::AutoCal, cmd2 as u16);
            }
            0x70 => {
                let payload = (((cmd1 & 0x0f) as i32) << 8) | cmd2 as i32;
                self.go_to_location(payload << 1);
            }
            0x80 => {
                self.motion.slowdown_factor = cmd2;
            }
            0x90 => {
                self.motion.min_slowdown_speed = cmd2;
            }
            _ => {
                #[cfg(not(test))]
                defmt::debug!("unknown opcode cmd1={} cmd2={}", cmd1, cmd2);
            }
        }
        0
    }

    /// Shared "go to" logic for the percent and location variants: set the
    /// target and choose a direction based on current position.
    fn go_to_location(&mut self, target: i32) {
        self.motion.target_location = target;
        if target < self.motion.location {
            self.mailbox.post(DeferredCommand::MotorUp);
        } else {
            self.mailbox.post(DeferredCommand::MotorDown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::{MockAnalog, MockNvStore};
    use crate::types::{DeferredCommand, MotorStatus};

    fn rx_frame(cmd1: u8, cmd2: u8) -> [u8; 5] {
        [0, 0, 0, cmd1, cmd2]
    }

    #[test]
    fn up_command_sets_sentinel_target_and_posts_mailbox() {
        let mut c = Controller::new();
        let mut nv = MockNvStore::default();
        let mut analog = MockAnalog::default();
        let mut tx = [0u8; 9];
        let n = c.handle_command(&rx_frame(0x0A, 0xDD), &mut tx, &mut nv, &mut analog);
        assert_eq!(n, 0);
        assert_eq!(c.motion.target_location, -1);
        assert_eq!(c.mailbox.take(), DeferredCommand::MotorUp);
    }

    #[test]
    fn status_reply_has_xor_checksum() {
        let mut c = Controller::new();
        let mut nv = MockNvStore::default();
        let mut analog = MockAnalog::default();
        let mut tx = [0u8; 9];
        analog.battery = 0x12;
        analog.voltage = 480;
        let n = c.handle_command(&rx_frame(0xCC, 0xCC), &mut tx, &mut nv, &mut analog);
        assert_eq!(n, 8);
        assert_eq!(tx[0], 0x00);
        assert_eq!(tx[1], 0xFF);
        assert_eq!(tx[2], 0xD8);
        let checksum = tx[3] ^ tx[4] ^ tx[5] ^ tx[6];
        assert_eq!(tx[7], checksum);
    }

    #[test]
    fn set_location_opcode_applies_payload_and_clears_calibrating() {
        let mut c = Controller::new();
        let mut nv = MockNvStore::default();
        let mut analog = MockAnalog::default();
        let mut tx = [0u8; 9];
        c.motion.calibrating = true;
        // prefix 0x50, payload = (0x00<<8)+0x20, <<1 = 0x40 = 64.
        let n = c.handle_command(&rx_frame(0x50, 0x20), &mut tx, &mut nv, &mut analog);
        assert_eq!(n, 0);
        assert_eq!(c.motion.location, 64);
        assert!(!c.motion.calibrating);
    }

    #[test]
    fn set_full_curtain_length_falls_through_to_max() {
        let mut c = Controller::new();
        let mut nv = MockNvStore::default();
        let mut analog = MockAnalog::default();
        let mut tx = [0u8; 9];
        c.motion.location = 1234;
        c.motion.status = MotorStatus::Stopped;
        c.handle_command(&rx_frame(0xFA, 0xCC), &mut tx, &mut nv, &mut analog);
        assert_eq!(c.settings.full_curtain_length, 1234);
        assert_eq!(c.settings.max_curtain_length, 1234);
    }

    #[test]
    fn go_to_percent_rejected_while_calibrating() {
        let mut c = Controller::new();
        let mut nv = MockNvStore::default();
        let mut analog = MockAnalog::default();
        let mut tx = [0u8; 9];
        c.motion.calibrating = true;
        c.motion.location = 10;
        c.handle_command(&rx_frame(0xDD, 50), &mut tx, &mut nv, &mut analog);
        assert_eq!(c.mailbox.take(), DeferredCommand::NoCommand);
    }

    #[test]
    fn set_speed_ignores_values_of_zero_or_one() {
        let mut c = Controller::new();
        let mut nv = MockNvStore::default();
        let mut analog = MockAnalog::default();
        let mut tx = [0u8; 9];
        let before = c.settings.default_speed;
        c.handle_command(&rx_frame(0x20, 1), &mut tx, &mut nv, &mut analog);
        assert_eq!(c.settings.default_speed, before);
    }

    #[test]
    fn ext_go_to_keeps_fractional_percent_precision() {
        let mut c = Controller::new();
        let mut nv = MockNvStore::default();
        let mut analog = MockAnalog::default();
        let mut tx = [0u8; 9];
        c.settings.max_curtain_length = 1000;
        c.motion.location = 0;
        // payload = 808 -> 808/16 = 50.5%, target = 505, not truncated
        // down to the 50% a pre-division-by-16 would have produced.
        let cmd1 = 0x10 | ((808u32 >> 8) as u8);
        let cmd2 = (808u32 & 0xff) as u8;
        c.handle_command(&rx_frame(cmd1, cmd2), &mut tx, &mut nv, &mut analog);
        assert_eq!(c.motion.target_location, 505);
    }

    #[test]
    fn unknown_opcode_is_silently_ignored() {
        let mut c = Controller::new();
        let mut nv = MockNvStore::default();
        let mut analog = MockAnalog::default();
        let mut tx = [0u8; 9];
        let n = c.handle_command(&rx_frame(0x00, 0x00), &mut tx, &mut nv, &mut analog);
        assert_eq!(n, 0);
        assert_eq!(c.mailbox.take(), DeferredCommand::NoCommand);
    }
}
