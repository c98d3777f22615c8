//! ADC driver.
//!
//! Single-conversion read of one channel of an external 12-bit, 2-channel,
//! single-ended SPI ADC (the 3-byte command/response framing matches the
//! MCP3202 family). No retries, no error surface beyond the bus itself —
//! a wire fault on this part manifests as a constant count, not a bus
//! error, and that degenerate case is handled one layer up (the Voc
//! sampler's "not connected" check), not here.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::error::FirmwareError;

/// Channel selector. Numeric values match the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    Voltage = 0,
    Current = 1,
}

const CMD_START: u8 = 0b0000_0001;
const CMD_SGL_MSBF: u8 = 0b1010_0000; // SGL/DIFF=1 (single-ended), MSBF=1

/// Driver for the sweep ADC, generic over any blocking SPI bus and a
/// manually-driven chip-select pin (the bus itself carries no framing of
/// its own, so CS is sequenced by hand around each 3-byte transaction).
pub struct Mcp3202Adc<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI, CS> Mcp3202Adc<SPI, CS>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self { spi, cs }
    }

    /// Single-conversion read of `channel`. Returns a 12-bit count in
    /// `[0, 4095]`.
    pub fn read(&mut self, channel: Channel) -> Result<u16, FirmwareError> {
        let ch_bit = (channel as u8) << 6;
        let mut buf = [CMD_START, CMD_SGL_MSBF | ch_bit, 0x00];

        self.cs.set_low().map_err(|_| FirmwareError::Spi)?;
        let result = self.spi.transfer_in_place(&mut buf);
        self.cs.set_high().map_err(|_| FirmwareError::Spi)?;
        result.map_err(|_| FirmwareError::Spi)?;

        let count = (((buf[1] & 0x0F) as u16) << 8) | (buf[2] as u16);
        Ok(count)
    }

    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}
