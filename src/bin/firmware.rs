//! Firmware entry point.
//!
//! Byte framing, state dispatch, and reporting live entirely in
//! [`iv_sweep_fw`] and are shared across every target; the one piece this
//! binary cannot supply generically is the concrete SPI/GPIO/storage/UART
//! peripherals, which a target-specific board crate plugs in through
//! `board::init_hardware`/`init_serial_rx`/`init_serial_tx` below.

#![no_std]
#![no_main]

use ufmt::uWrite;

use iv_sweep_fw::messenger::LineReader;
use iv_sweep_fw::{Hardware, Supervisor};

/// Maximum number of retained I-V points a single sweep keeps; sized well
/// above any reasonable `MAX_IV_POINTS` config value.
const N_MAX: usize = 275;

/// Non-blocking UART receive, `nb`-style: `Err(WouldBlock)` means "no byte
/// yet", not a fault.
pub trait SerialRx {
    type Error;
    fn read_byte(&mut self) -> nb::Result<u8, Self::Error>;
}

/// One idle poll tick is paced to ~1 ms of wall-clock time, matching
/// [`iv_sweep_fw::messenger::MSG_TIMER_TIMEOUT`]'s own unit.
const IDLE_TICK_USECS: u32 = 1000;

fn run<H: Hardware, S: SerialRx, W: uWrite>(hw: H, mut rx: S, mut tx: W) -> ! {
    let mut supervisor: Supervisor<H, N_MAX> =
        Supervisor::new(hw).unwrap_or_else(|_| panic!("hardware init failed"));
    let mut reader = LineReader::new();

    supervisor.emit_prompt(&mut tx).ok();

    let mut last_tick_us = supervisor.now_us();
    loop {
        match rx.read_byte() {
            Ok(byte) => match reader.feed(byte) {
                Ok(Some(line)) => {
                    let ran_sweep = supervisor
                        .handle_line(line.as_str(), &mut tx)
                        .unwrap_or(false);
                    if ran_sweep {
                        supervisor.emit_prompt(&mut tx).ok();
                    }
                }
                Ok(None) => {}
                Err(_) => reader.reset(),
            },
            Err(nb::Error::WouldBlock) => {
                let now = supervisor.now_us();
                if now.wrapping_sub(last_tick_us) >= IDLE_TICK_USECS {
                    last_tick_us = now;
                    reader.on_idle_tick();
                }
            }
            Err(nb::Error::Other(_)) => {}
        }
    }
}

/// Target integration seam. A board-specific crate normally wraps this
/// binary and supplies these three; none of the core logic above depends
/// on which target is chosen.
mod board {
    use super::SerialRx;
    use iv_sweep_fw::Hardware;

    pub fn init_hardware() -> impl Hardware {
        struct Unwired;
        impl Hardware for Unwired {
            fn read_adc(&mut self, _channel: iv_sweep_fw::adc::Channel) -> Result<u16, iv_sweep_fw::FirmwareError> {
                unimplemented!("board integration must supply a concrete ADC")
            }
            fn arm_short(&mut self) -> Result<(), iv_sweep_fw::FirmwareError> {
                unimplemented!()
            }
            fn release_to_capacitor(&mut self) -> Result<(), iv_sweep_fw::FirmwareError> {
                unimplemented!()
            }
            fn return_to_bleed(&mut self) -> Result<(), iv_sweep_fw::FirmwareError> {
                unimplemented!()
            }
            fn set_primary(&mut self, _active: bool) -> Result<(), iv_sweep_fw::FirmwareError> {
                unimplemented!()
            }
            fn set_secondary(&mut self, _active: bool) -> Result<(), iv_sweep_fw::FirmwareError> {
                unimplemented!()
            }
            fn relay_state(&self) -> iv_sweep_fw::relay::RelayState {
                unimplemented!()
            }
            fn has_ssr_bypass(&self) -> bool {
                false
            }
            fn now_us(&mut self) -> u32 {
                unimplemented!("board integration must supply a free-running timer")
            }
            fn read_polarity_flag(&mut self) -> Result<f32, iv_sweep_fw::FirmwareError> {
                unimplemented!()
            }
            fn set_polarity(&mut self, _polarity: iv_sweep_fw::relay::Polarity) {}
            fn write_entry(&mut self, _addr: u32, _value: f32) -> Result<(), iv_sweep_fw::FirmwareError> {
                unimplemented!()
            }
            fn for_each_entry(
                &mut self,
                _visit: &mut dyn FnMut(u32, f32),
            ) -> Result<(), iv_sweep_fw::FirmwareError> {
                unimplemented!()
            }
        }
        Unwired
    }

    pub fn init_serial_rx() -> impl SerialRx<Error = ()> {
        struct Unwired;
        impl SerialRx for Unwired {
            type Error = ();
            fn read_byte(&mut self) -> nb::Result<u8, ()> {
                unimplemented!("board integration must supply a UART receiver")
            }
        }
        Unwired
    }

    pub fn init_serial_tx() -> impl ufmt::uWrite<Error = core::convert::Infallible> {
        struct Unwired;
        impl ufmt::uWrite for Unwired {
            type Error = core::convert::Infallible;
            fn write_str(&mut self, _s: &str) -> Result<(), Self::Error> {
                unimplemented!("board integration must supply a UART transmitter")
            }
        }
        Unwired
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[cfg(not(test))]
#[no_mangle]
pub extern "C" fn main() -> ! {
    run(board::init_hardware(), board::init_serial_rx(), board::init_serial_tx())
}
