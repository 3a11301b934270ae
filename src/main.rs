#![no_main]
#![no_std]

use cfg_if::cfg_if;
use cortex_m::{asm, delay::Delay};
use defmt::println;
use defmt_rtt as _;
use panic_probe as _;

use cortina::bridge::{Analog, Bridge, Clock, GateSide, NvError, NvStore, PwmChannel};
use cortina::controller::Controller;
use cortina::quadrature::HallSensor;
use cortina::settings::Settings;

use stm32_hal2::{
    self,
    adc::{Adc, AdcConfig, AdcDevice},
    clocks::{Clocks, InputSrc},
    flash::{Bank, Flash},
    gpio::{Edge, Pin, PinMode, Port},
    pac,
    timer::{OutputCompare, Timer, TimerConfig, TimerInterrupt},
    usart::{Usart, UsartConfig, UsartInterrupt},
};

cfg_if! {
    if #[cfg(feature = "h7")] {
        const SETTINGS_FLASH_SECTOR: u8 = 7;
    } else if #[cfg(feature = "g4")] {
        const SETTINGS_FLASH_PAGE: u8 = 127;
    }
}
const SETTINGS_FLASH_ADDR: u32 = 0x0800_0000 + 127 * 2048;

cfg_if! {
    if #[cfg(feature = "h7")] {
        pub use stm32_hal2::pac::{USART1 as CMD_UART, TIM1 as BRIDGE_TIM, ADC1 as ADC};
    } else if #[cfg(feature = "g4")] {
        pub use stm32_hal2::pac::{USART1 as CMD_UART, TIM1 as BRIDGE_TIM, ADC2 as ADC};
    }
}

mod setup {
    use stm32_hal2::gpio::Port;
    use stm32_hal2::timer::TimChannel;

    pub const LOW1_CHANNEL: TimChannel = TimChannel::C1;
    pub const LOW2_CHANNEL: TimChannel = TimChannel::C4;
    pub const VOLTAGE_ADC_CH: u8 = 1;
    pub const CURRENT_ADC_CH: u8 = 2;
    pub const HALL_1_PORT: Port = Port::A;
    pub const HALL_1_PIN: u8 = 0;
    pub const HALL_2_PORT: Port = Port::A;
    pub const HALL_2_PIN: u8 = 1;
}

/// Wraps the H-bridge gate pins and PWM timer. The motion controller only
/// ever calls the four `Bridge` methods; it never touches registers
/// directly.
struct HalBridge {
    high1: Pin,
    high2: Pin,
    tim: Timer<BRIDGE_TIM>,
}

impl Bridge for HalBridge {
    fn set_high(&mut self, side: GateSide, asserted: bool) {
        let pin = match side {
            GateSide::High1 => &mut self.high1,
            GateSide::High2 => &mut self.high2,
        };
        if asserted {
            pin.set_high();
        } else {
            pin.set_low();
        }
    }

    fn pwm_set(&mut self, channel: PwmChannel, duty: u8) {
        self.tim.set_duty(channel_of(channel), duty as u16);
    }

    fn pwm_start(&mut self, channel: PwmChannel) {
        self.tim
            .enable_pwm_output(channel_of(channel), OutputCompare::Pwm1, 0.);
    }

    fn pwm_stop(&mut self, channel: PwmChannel) {
        let ch = channel_of(channel);
        self.tim.set_duty(ch, 0);
        self.tim.disable_pwm_output(ch);
    }
}

fn channel_of(channel: PwmChannel) -> stm32_hal2::timer::TimChannel {
    match channel {
        PwmChannel::Low1 => setup::LOW1_CHANNEL,
        PwmChannel::Low2 => setup::LOW2_CHANNEL,
    }
}

/// Battery/supply-voltage and motor-current ADC readings.
struct HalAnalog {
    adc: Adc<ADC>,
}

impl Analog for HalAnalog {
    fn voltage(&mut self) -> u16 {
        self.adc.read(setup::VOLTAGE_ADC_CH).unwrap_or(0.) as u16
    }

    fn motor_current(&mut self) -> u8 {
        cfg_if! {
            if #[cfg(feature = "slim")] {
                0
            } else {
                self.adc.read(setup::CURRENT_ADC_CH).unwrap_or(0.) as u8
            }
        }
    }

    fn battery(&mut self) -> u8 {
        // No battery fuel-gauge wired up; mirrors the original's
        // `calculate_battery()` stub.
        0x12
    }
}

/// Flash-backed settings store: the five virtual-address/value pairs are
/// packed into one page and the whole page is erased and rewritten on any
/// change, mirroring `UserCfg::save`'s `erase_write_page`/`erase_write_sector`
/// pattern. Reads go straight to the memory-mapped flash address, since
/// `stm32-hal2` exposes no separate EEPROM-emulation read path.
struct FlashNvStore<'a> {
    flash: &'a mut Flash,
}

const SETTINGS_SLOT_COUNT: usize = 5;

impl<'a> FlashNvStore<'a> {
    fn read_table(&self) -> [(u16, u16); SETTINGS_SLOT_COUNT] {
        let mut table = [(0xFFFFu16, 0u16); SETTINGS_SLOT_COUNT];
        for (i, slot) in table.iter_mut().enumerate() {
            let base = (SETTINGS_FLASH_ADDR as usize) + i * 4;
            unsafe {
                slot.0 = core::ptr::read_volatile(base as *const u16);
                slot.1 = core::ptr::read_volatile((base + 2) as *const u16);
            }
        }
        table
    }
}

impl<'a> NvStore for FlashNvStore<'a> {
    fn load(&mut self, virt_addr: u16) -> Result<u16, NvError> {
        self.read_table()
            .iter()
            .find(|(addr, _)| *addr == virt_addr)
            .map(|(_, value)| *value)
            .ok_or(NvError)
    }

    fn store(&mut self, virt_addr: u16, value: u16) -> Result<(), NvError> {
        let mut table = self.read_table();
        let slot = table
            .iter_mut()
            .find(|(addr, _)| *addr == virt_addr || *addr == 0xFFFF)
            .ok_or(NvError)?;
        *slot = (virt_addr, value);

        let mut data = [0u8; SETTINGS_SLOT_COUNT * 4];
        for (i, (addr, value)) in table.iter().enumerate() {
            data[i * 4..i * 4 + 2].copy_from_slice(&addr.to_le_bytes());
            data[i * 4 + 2..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }

        #[cfg(feature = "h7")]
        let result = self
            .flash
            .erase_write_sector(Bank::B1, SETTINGS_FLASH_SECTOR, &data);
        #[cfg(feature = "g4")]
        let result = self
            .flash
            .erase_write_page(Bank::B1, SETTINGS_FLASH_PAGE, &data);

        result.map_err(|_| NvError)
    }
}

/// Settings writes reaching the command dispatcher from UART-interrupt
/// context can't touch flash directly (an erase would stall the CPU for
/// too long to run from an ISR), so this stub reports every slot as
/// unwritable; the idle loop's periodic flush is the real persistence
/// path (see `idle`).
struct NoopNvStore;

impl NvStore for NoopNvStore {
    fn load(&mut self, _virt_addr: u16) -> Result<u16, NvError> {
        Err(NvError)
    }

    fn store(&mut self, _virt_addr: u16, _value: u16) -> Result<(), NvError> {
        Err(NvError)
    }
}

/// Millisecond counter advanced by the 1 ms tick ISR; read-only everywhere
/// else.
static mut MS_TICKS: u32 = 0;

struct HalClock;

impl Clock for HalClock {
    fn now_ms(&self) -> u32 {
        unsafe { MS_TICKS }
    }
}

#[rtic::app(device = pac, peripherals = false, dispatchers = [EXTI9_5])]
mod app {
    use super::*;

    #[shared]
    struct Shared {
        controller: Controller,
        bridge: HalBridge,
        analog: HalAnalog,
    }

    #[local]
    struct Local {
        hall_1_pin: Pin,
        hall_2_pin: Pin,
        cmd_uart: Usart<CMD_UART>,
        flash: Flash,
        tick_1ms: Timer<pac::TIM6>,
        tick_10ms: Timer<pac::TIM7>,
        settle_delay: Delay,
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local, init::Monotonics) {
        let cp = cx.core;
        let dp = pac::Peripherals::take().unwrap();

        let clock_cfg = Clocks {
            input_src: InputSrc::Pll(stm32_hal2::clocks::PllSrc::Hse(8_000_000)),
            ..Default::default()
        };
        clock_cfg.setup().unwrap();

        // Drives the ~10 ms settling wait `idle` inserts between
        // de-energizing and re-energizing the bridge, same `Delay` type
        // the teacher's own `init` uses for its IMU warm-up wait.
        let settle_delay = Delay::new(cp.SYST, clock_cfg.systick());

        let mut flash = Flash::new(dp.FLASH);

        let mut hall_1_pin = Pin::new(setup::HALL_1_PORT, setup::HALL_1_PIN, PinMode::Input);
        hall_1_pin.enable_interrupt(Edge::Both);
        let mut hall_2_pin = Pin::new(setup::HALL_2_PORT, setup::HALL_2_PIN, PinMode::Input);
        hall_2_pin.enable_interrupt(Edge::Both);

        let high1 = Pin::new(Port::B, 0, PinMode::Output);
        let high2 = Pin::new(Port::B, 1, PinMode::Output);

        let bridge_tim_cfg = TimerConfig {
            auto_reload_preload: true,
            ..Default::default()
        };
        let bridge_tim = Timer::new_tim1(dp.TIM1, 20_000., bridge_tim_cfg, &clock_cfg);

        let adc = Adc::new_adc2(dp.ADC2, AdcDevice::Two, AdcConfig::default(), &clock_cfg);

        let cmd_uart = Usart::new(dp.USART1, 9_600, UsartConfig::default(), &clock_cfg);

        let mut tick_1ms = Timer::new_tim6(dp.TIM6, 1_000., Default::default(), &clock_cfg);
        tick_1ms.enable_interrupt(TimerInterrupt::Update);

        let mut tick_10ms = Timer::new_tim7(dp.TIM7, 100., Default::default(), &clock_cfg);
        tick_10ms.enable_interrupt(TimerInterrupt::Update);

        let mut nv = FlashNvStore { flash: &mut flash };
        let settings = Settings::load(&mut nv);

        let mut controller = Controller::new();
        controller.settings = settings;
        // Boot assumes the curtain is at the bottom position, per
        // `motor_init()` in the original.
        controller.motion.location = controller.settings.max_curtain_length as i32;

        if controller.settings.auto_calibration {
            controller.motion.calibrating = true;
            controller
                .mailbox
                .post(cortina::types::DeferredCommand::MotorUp);
        }

        println!("motor controller init complete");

        (
            Shared {
                controller,
                bridge: HalBridge {
                    high1,
                    high2,
                    tim: bridge_tim,
                },
                analog: HalAnalog { adc },
            },
            Local {
                hall_1_pin,
                hall_2_pin,
                cmd_uart,
                flash,
                tick_1ms,
                tick_10ms,
                settle_delay,
            },
            init::Monotonics(),
        )
    }

    /// Drains the deferred-command mailbox, applying the ~10 ms settling
    /// wait `motor_start_common()` gives the bridge between de-energizing
    /// and re-energizing in the original, and flushes every settings slot
    /// to flash. The dispatcher ISR can only update settings in memory (a
    /// flash-page erase can't run from interrupt context), so this is the
    /// only context that actually persists them; `write_slot` is a no-op
    /// when the stored value already matches, so re-flushing
    /// unconditionally each pass costs nothing once caught up.
    #[idle(shared = [controller, bridge], local = [flash, settle_delay])]
    fn idle(mut cx: idle::Context) -> ! {
        use cortina::settings::Slot;
        use cortina::types::DeferredCommand;

        const MOTOR_SETTLE_MS: u32 = 10;

        loop {
            let cmd = (cx.shared.controller, cx.shared.bridge).lock(|controller, bridge| {
                let cmd = controller.mailbox.take();
                // A fresh Up/Down/Stop command always de-energizes first,
                // same as `motor_stop()` at the top of the original's
                // `motor_start_common()`.
                if !matches!(cmd, DeferredCommand::NoCommand) {
                    controller.motor_stop(bridge);
                }
                cmd
            });

            // The settling wait has to happen outside the lock above: it
            // runs for ~10 ms, and holding `controller`/`bridge` locked for
            // that long would raise the priority ceiling and starve the
            // priority-8 Hall edge ISRs for the whole wait. Released here,
            // other interrupts keep running normally during the delay,
            // same as they do around the original's busy-waiting
            // `HAL_Delay(10)`.
            if matches!(cmd, DeferredCommand::MotorUp | DeferredCommand::MotorDown) {
                cx.local.settle_delay.delay_ms(MOTOR_SETTLE_MS);
            }

            let now = HalClock.now_ms();
            (cx.shared.controller, cx.shared.bridge).lock(|controller, bridge| {
                match cmd {
                    DeferredCommand::MotorUp => {
                        controller.energize_up(controller.settings.default_speed, bridge, now)
                    }
                    DeferredCommand::MotorDown => {
                        controller.energize_down(controller.settings.default_speed, bridge, now)
                    }
                    DeferredCommand::Stop | DeferredCommand::NoCommand => {}
                }

                let mut nv = FlashNvStore {
                    flash: cx.local.flash,
                };
                let status = controller.motion.status;
                let s = controller.settings;
                controller
                    .settings
                    .write_slot(&mut nv, status, Slot::MaxCurtainLen, s.max_curtain_length as u16);
                controller.settings.write_slot(
                    &mut nv,
                    status,
                    Slot::FullCurtainLen,
                    s.full_curtain_length as u16,
                );
                controller
                    .settings
                    .write_slot(&mut nv, status, Slot::MinimumVoltage, s.minimum_voltage);
                controller.settings.write_slot(
                    &mut nv,
                    status,
                    Slot::DefaultSpeed,
                    s.default_speed as u16,
                );
                controller.settings.write_slot(
                    &mut nv,
                    status,
                    Slot::AutoCal,
                    s.auto_calibration as u16,
                );
            });
            asm::nop();
        }
    }

    #[task(binds = EXTI0, shared = [controller, bridge], local = [hall_1_pin], priority = 8)]
    fn hall_1_isr(mut cx: hall_1_isr::Context) {
        cx.local.hall_1_pin.clear_interrupt();
        let level = cx.local.hall_1_pin.is_high() as u8;
        (cx.shared.controller, cx.shared.bridge).lock(|controller, bridge| {
            controller.on_hall_edge(HallSensor::Hall1, level, bridge);
        });
    }

    #[task(binds = EXTI1, shared = [controller, bridge], local = [hall_2_pin], priority = 8)]
    fn hall_2_isr(mut cx: hall_2_isr::Context) {
        cx.local.hall_2_pin.clear_interrupt();
        let level = cx.local.hall_2_pin.is_high() as u8;
        (cx.shared.controller, cx.shared.bridge).lock(|controller, bridge| {
            controller.on_hall_edge(HallSensor::Hall2, level, bridge);
        });
    }

    /// 1 ms stall-supervisor tick.
    #[task(binds = TIM6_DAC, shared = [controller, bridge], local = [tick_1ms], priority = 6)]
    fn tick_1ms_isr(mut cx: tick_1ms_isr::Context) {
        cx.local.tick_1ms.clear_interrupt(TimerInterrupt::Update);
        unsafe { MS_TICKS += 1 };
        (cx.shared.controller, cx.shared.bridge).lock(|controller, bridge| {
            controller.stall_tick(bridge, &HalClock);
        });
    }

    /// 10 ms speed-regulator tick.
    #[task(binds = TIM7, shared = [controller, bridge], local = [tick_10ms], priority = 4)]
    fn tick_10ms_isr(mut cx: tick_10ms_isr::Context) {
        cx.local.tick_10ms.clear_interrupt(TimerInterrupt::Update);
        (cx.shared.controller, cx.shared.bridge).lock(|controller, bridge| {
            controller.adjust_rpm(bridge);
        });
    }

    /// Command dispatcher: one received 5-byte frame per interrupt. Only
    /// enqueues into the mailbox and writes the TX buffer.
    #[task(binds = USART1, shared = [controller, analog], local = [cmd_uart], priority = 5)]
    fn cmd_uart_isr(mut cx: cmd_uart_isr::Context) {
        let uart = &mut cx.local.cmd_uart;
        uart.clear_interrupt(UsartInterrupt::ReadNotEmpty);

        let mut rx = [0u8; 5];
        let mut tx = [0u8; 9];
        if uart.read(&mut rx).is_err() {
            return;
        }

        let mut nv = NoopNvStore;
        let len = (cx.shared.controller, cx.shared.analog)
            .lock(|controller, analog| controller.handle_command(&rx, &mut tx, &mut nv, analog));

        if len > 0 {
            let _ = uart.write(&tx[..len]);
        }
    }
}
