//! Relay sequencer.
//!
//! Abstracts the 1..4 digital control lines a given hardware variant (EMR
//! or SSR, module or cell) actually implements behind three semantic
//! operations — *present short*, *release to capacitor*, *return to
//! bleed* — plus raw manual drive for host-side testing. Every logical
//! line is driven unconditionally on every transition: a variant
//! that doesn't wire a given line gets a [`NoopPin`], so unconnected
//! instances cost nothing and need no runtime branch.

use core::convert::Infallible;
use embedded_hal::digital::{ErrorType, OutputPin};

use crate::error::FirmwareError;

/// Stand-in for a logical line a given PCB variant leaves unconnected.
/// Accepts every write and never fails.
#[derive(Default)]
pub struct NoopPin;

impl ErrorType for NoopPin {
    type Error = Infallible;
}

impl OutputPin for NoopPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

/// Active-high vs. active-low logic sense for the primary/secondary pair.
/// Loaded from the persisted polarity bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

impl Polarity {
    pub fn from_persisted(active_high_flag: f32) -> Self {
        // 0.0 => active-low, any other => active-high.
        if active_high_flag == 0.0 {
            Polarity::ActiveLow
        } else {
            Polarity::ActiveHigh
        }
    }
}

fn drive<P: OutputPin>(pin: &mut P, active: bool, polarity: Polarity) -> Result<(), FirmwareError> {
    let set_high = match polarity {
        Polarity::ActiveHigh => active,
        Polarity::ActiveLow => !active,
    };
    let r = if set_high { pin.set_high() } else { pin.set_low() };
    r.map_err(|_| FirmwareError::Gpio)
}

/// Sequencer state, tracked for diagnostics only — every transition drives
/// every line regardless of the previously observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RelayState {
    Bleed,
    ShortPresent,
    Charging,
}

/// The six logical lines, each generic over its own pin type so a
/// variant that doesn't wire a line can plug in [`NoopPin`] at zero cost.
pub struct RelaySequencer<P1, P5, S2, S3, S4, S6> {
    primary: P1,
    secondary: P5,
    ssr2: S2,
    ssr3: S3,
    ssr4: S4,
    ssr6: S6,
    polarity: Polarity,
    state: RelayState,
}

impl<P1, P5, S2, S3, S4, S6> RelaySequencer<P1, P5, S2, S3, S4, S6>
where
    P1: OutputPin,
    P5: OutputPin,
    S2: OutputPin,
    S3: OutputPin,
    S4: OutputPin,
    S6: OutputPin,
{
    pub fn new(primary: P1, secondary: P5, ssr2: S2, ssr3: S3, ssr4: S4, ssr6: S6, polarity: Polarity) -> Self {
        Self {
            primary,
            secondary,
            ssr2,
            ssr3,
            ssr4,
            ssr6,
            polarity,
            state: RelayState::Bleed,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn set_polarity(&mut self, polarity: Polarity) {
        self.polarity = polarity;
    }

    /// Unconditional manual drive of the primary line, for host testing
    /// (`RELAY_STATE <0|1>`).
    pub fn set_primary(&mut self, active: bool) -> Result<(), FirmwareError> {
        drive(&mut self.primary, active, self.polarity)
    }

    /// Unconditional manual drive of the secondary line, for host testing
    /// (`SECOND_RELAY_STATE <0|1>`).
    pub fn set_secondary(&mut self, active: bool) -> Result<(), FirmwareError> {
        drive(&mut self.secondary, active, self.polarity)
    }

    /// Present a controlled short across the PV circuit: short-path and
    /// short-across-capacitor switches on, bleed off, primary on. Caller
    /// supplies the SSR settling delay (>= 20 ms); it is a no-op for EMR
    /// variants but harmless.
    pub fn arm_short(&mut self) -> Result<(), FirmwareError> {
        drive(&mut self.ssr2, true, Polarity::ActiveHigh)?;
        drive(&mut self.ssr3, true, Polarity::ActiveLow)?;
        drive(&mut self.ssr4, true, Polarity::ActiveLow)?;
        drive(&mut self.primary, true, self.polarity)?;
        self.state = RelayState::ShortPresent;
        Ok(())
    }

    /// Release the short-across-capacitor switch: the capacitor now
    /// charges through the PV circuit.
    pub fn release_to_capacitor(&mut self) -> Result<(), FirmwareError> {
        drive(&mut self.ssr3, false, Polarity::ActiveLow)?;
        drive(&mut self.ssr4, false, Polarity::ActiveLow)?;
        self.state = RelayState::Charging;
        Ok(())
    }

    /// Return to the bleed path between sweeps: primary off, bleed
    /// (short-across-capacitor) on so the capacitor drains.
    pub fn return_to_bleed(&mut self) -> Result<(), FirmwareError> {
        drive(&mut self.primary, false, self.polarity)?;
        drive(&mut self.ssr2, false, Polarity::ActiveHigh)?;
        drive(&mut self.ssr3, true, Polarity::ActiveLow)?;
        drive(&mut self.ssr4, true, Polarity::ActiveLow)?;
        drive(&mut self.secondary, false, self.polarity)?;
        drive(&mut self.ssr6, false, Polarity::ActiveLow)?;
        self.state = RelayState::Bleed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State as PinState, Transaction as PinTx};

    fn seq(
        polarity: Polarity,
    ) -> RelaySequencer<PinMock, PinMock, PinMock, PinMock, PinMock, PinMock> {
        RelaySequencer::new(
            PinMock::new(&[]),
            PinMock::new(&[]),
            PinMock::new(&[]),
            PinMock::new(&[]),
            PinMock::new(&[]),
            PinMock::new(&[]),
            polarity,
        )
    }

    #[test]
    fn noop_pin_accepts_every_write() {
        let mut p = NoopPin;
        p.set_low().unwrap();
        p.set_high().unwrap();
    }

    #[test]
    fn active_high_polarity_drives_primary_high_when_active() {
        let mut s = seq(Polarity::ActiveHigh);
        s.primary = PinMock::new(&[PinTx::set(PinState::High)]);
        s.set_primary(true).unwrap();
        s.primary.done();
    }

    #[test]
    fn active_low_polarity_drives_primary_low_when_active() {
        let mut s = seq(Polarity::ActiveLow);
        s.primary = PinMock::new(&[PinTx::set(PinState::Low)]);
        s.set_primary(true).unwrap();
        s.primary.done();
    }

    #[test]
    fn arm_short_transitions_to_short_present() {
        let mut s = seq(Polarity::ActiveHigh);
        s.ssr2 = PinMock::new(&[PinTx::set(PinState::High)]);
        s.ssr3 = PinMock::new(&[PinTx::set(PinState::Low)]);
        s.ssr4 = PinMock::new(&[PinTx::set(PinState::Low)]);
        s.primary = PinMock::new(&[PinTx::set(PinState::High)]);
        s.arm_short().unwrap();
        assert_eq!(s.state(), RelayState::ShortPresent);
        s.ssr2.done();
        s.ssr3.done();
        s.ssr4.done();
        s.primary.done();
    }

    #[test]
    fn return_to_bleed_transitions_to_bleed() {
        let mut s = seq(Polarity::ActiveHigh);
        s.primary = PinMock::new(&[PinTx::set(PinState::Low)]);
        s.ssr2 = PinMock::new(&[PinTx::set(PinState::Low)]);
        s.ssr3 = PinMock::new(&[PinTx::set(PinState::Low)]);
        s.ssr4 = PinMock::new(&[PinTx::set(PinState::Low)]);
        s.secondary = PinMock::new(&[PinTx::set(PinState::Low)]);
        s.ssr6 = PinMock::new(&[PinTx::set(PinState::Low)]);
        s.return_to_bleed().unwrap();
        assert_eq!(s.state(), RelayState::Bleed);
        s.primary.done();
        s.ssr2.done();
        s.ssr3.done();
        s.ssr4.done();
        s.secondary.done();
        s.ssr6.done();
    }
}
