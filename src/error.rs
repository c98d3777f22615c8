//! Unified error type for the sweep firmware.
//!
//! Every fallible operation (SPI transfer, persistent-store access, line
//! parsing) returns `Result<_, FirmwareError>`. None of the supervisor's
//! call sites treat a `FirmwareError` as fatal: there are no fatal paths, so
//! every variant is caught where it is produced and turned into a wire
//! line (and, with the `defmt` feature, a log record) before the state
//! machine continues.

/// Number of arguments a `Config` message actually carried vs. expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArgCount {
    pub expected: u8,
    pub got: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FirmwareError {
    /// SPI transaction with the ADC failed at the bus level.
    Spi,
    /// A digital control line (relay driver, chip-select) failed to switch.
    Gpio,
    /// Persistent-store read/write failed at the bus level.
    Storage,
    /// Inbound line exceeded the 35-byte cap before a newline arrived.
    LineTooLong,
    /// `Config <KEY>` named a key not in the recognized set.
    UnknownKey,
    /// `Config <KEY>` carried the wrong number of values.
    BadArgCount(ArgCount),
    /// A value could not be parsed as the integer/float the key expects.
    BadValue,
}

impl FirmwareError {
    /// Render the `ERROR: …` line text the host protocol expects.
    ///
    /// Returns a `'static` template; callers needing to splice in the key
    /// name or counts write those fields themselves via `ufmt`, since
    /// `FirmwareError` has no access to the offending key string (kept by
    /// the parser, not the error).
    pub fn tag(&self) -> &'static str {
        match self {
            FirmwareError::Spi => "ADC transfer failed",
            FirmwareError::Gpio => "relay line failed to switch",
            FirmwareError::Storage => "persistent store access failed",
            FirmwareError::LineTooLong => "input line too long",
            FirmwareError::UnknownKey => "unknown config key",
            FirmwareError::BadArgCount(_) => "wrong argument count",
            FirmwareError::BadValue => "malformed argument",
        }
    }
}
