//! Hardware facade consumed by the supervisor.
//!
//! `Supervisor` is generic over a single [`Hardware`] trait rather than
//! over the ADC's SPI/CS types, the relay sequencer's six pin types, and
//! the storage type individually — composing all of that into one
//! concrete [`Board`] keeps the state machine's own generic surface to
//! one type parameter, and keeps host-side tests working against a small
//! hand-written fake instead of an `embedded-hal-mock` expectation list
//! per sweep.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use embedded_storage::{ReadStorage, Storage as EStorage};

use crate::adc::{Channel, Mcp3202Adc};
use crate::error::FirmwareError;
use crate::persistence::PersistentStore;
use crate::relay::{Polarity, RelaySequencer, RelayState};
use crate::time::MicrosClock;

pub trait Hardware {
    fn read_adc(&mut self, channel: Channel) -> Result<u16, FirmwareError>;

    fn arm_short(&mut self) -> Result<(), FirmwareError>;
    fn release_to_capacitor(&mut self) -> Result<(), FirmwareError>;
    fn return_to_bleed(&mut self) -> Result<(), FirmwareError>;
    fn set_primary(&mut self, active: bool) -> Result<(), FirmwareError>;
    fn set_secondary(&mut self, active: bool) -> Result<(), FirmwareError>;
    fn relay_state(&self) -> RelayState;

    /// Whether this board variant's short-across-capacitor switch is slow
    /// enough to need the settle wait before release.
    fn has_ssr_bypass(&self) -> bool;

    fn now_us(&mut self) -> u32;

    fn read_polarity_flag(&mut self) -> Result<f32, FirmwareError>;
    fn set_polarity(&mut self, polarity: Polarity);
    fn write_entry(&mut self, addr: u32, value: f32) -> Result<(), FirmwareError>;
    /// Visits every valid persisted `(offset, value)` pair in order.
    fn for_each_entry(
        &mut self,
        visit: &mut dyn FnMut(u32, f32),
    ) -> Result<(), FirmwareError>;
}

/// The concrete board: a real ADC, a real relay sequencer, a real
/// persistent store, and a real microsecond clock.
pub struct Board<SPI, CS, P1, P5, S2, S3, S4, S6, STORE, CLOCK> {
    pub adc: Mcp3202Adc<SPI, CS>,
    pub relay: RelaySequencer<P1, P5, S2, S3, S4, S6>,
    pub store: PersistentStore<STORE>,
    pub clock: CLOCK,
    pub has_ssr_bypass: bool,
}

impl<SPI, CS, P1, P5, S2, S3, S4, S6, STORE, CLOCK> Hardware
    for Board<SPI, CS, P1, P5, S2, S3, S4, S6, STORE, CLOCK>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    P1: OutputPin,
    P5: OutputPin,
    S2: OutputPin,
    S3: OutputPin,
    S4: OutputPin,
    S6: OutputPin,
    STORE: ReadStorage + EStorage,
    CLOCK: MicrosClock,
{
    fn read_adc(&mut self, channel: Channel) -> Result<u16, FirmwareError> {
        self.adc.read(channel)
    }

    fn arm_short(&mut self) -> Result<(), FirmwareError> {
        self.relay.arm_short()
    }

    fn release_to_capacitor(&mut self) -> Result<(), FirmwareError> {
        self.relay.release_to_capacitor()
    }

    fn return_to_bleed(&mut self) -> Result<(), FirmwareError> {
        self.relay.return_to_bleed()
    }

    fn set_primary(&mut self, active: bool) -> Result<(), FirmwareError> {
        self.relay.set_primary(active)
    }

    fn set_secondary(&mut self, active: bool) -> Result<(), FirmwareError> {
        self.relay.set_secondary(active)
    }

    fn relay_state(&self) -> RelayState {
        self.relay.state()
    }

    fn has_ssr_bypass(&self) -> bool {
        self.has_ssr_bypass
    }

    fn now_us(&mut self) -> u32 {
        self.clock.now_us()
    }

    fn read_polarity_flag(&mut self) -> Result<f32, FirmwareError> {
        self.store.read_polarity_flag()
    }

    fn set_polarity(&mut self, polarity: Polarity) {
        self.relay.set_polarity(polarity);
    }

    fn write_entry(&mut self, addr: u32, value: f32) -> Result<(), FirmwareError> {
        self.store.write_entry(addr, value)
    }

    fn for_each_entry(&mut self, visit: &mut dyn FnMut(u32, f32)) -> Result<(), FirmwareError> {
        for (offset, value) in self.store.dump()? {
            visit(offset, value);
        }
        Ok(())
    }
}
