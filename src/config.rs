//! Config store.
//!
//! Holds the sweep-loop tunables and parses `Config <KEY> [v1 [v2]]`
//! messages against them. Keys that touch persistence, the relay lines,
//! or SSR calibration (`WRITE_EEPROM`, `DUMP_EEPROM`, `RELAY_STATE`,
//! `SECOND_RELAY_STATE`, `DO_SSR_CURR_CAL`) are recognized here (so
//! argument-count errors are uniform) but dispatched by the supervisor,
//! which is the only place with a persistent store and a relay sequencer
//! to act on them.

use crate::error::{ArgCount, FirmwareError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigKey {
    ClkDiv,
    MaxIvPoints,
    MinIscAdc,
    MaxIscPoll,
    IscStableAdc,
    MaxDiscards,
    AspectHeight,
    AspectWidth,
    WriteEeprom,
    DumpEeprom,
    RelayState,
    SecondRelayState,
    DoSsrCurrCal,
}

impl ConfigKey {
    /// Name as it appears on the wire, for `ERROR:` line rendering.
    pub fn name(&self) -> &'static str {
        match self {
            ConfigKey::ClkDiv => "CLK_DIV",
            ConfigKey::MaxIvPoints => "MAX_IV_POINTS",
            ConfigKey::MinIscAdc => "MIN_ISC_ADC",
            ConfigKey::MaxIscPoll => "MAX_ISC_POLL",
            ConfigKey::IscStableAdc => "ISC_STABLE_ADC",
            ConfigKey::MaxDiscards => "MAX_DISCARDS",
            ConfigKey::AspectHeight => "ASPECT_HEIGHT",
            ConfigKey::AspectWidth => "ASPECT_WIDTH",
            ConfigKey::WriteEeprom => "WRITE_EEPROM",
            ConfigKey::DumpEeprom => "DUMP_EEPROM",
            ConfigKey::RelayState => "RELAY_STATE",
            ConfigKey::SecondRelayState => "SECOND_RELAY_STATE",
            ConfigKey::DoSsrCurrCal => "DO_SSR_CURR_CAL",
        }
    }

    /// Number of space-separated values the key expects after it.
    pub fn expected_args(&self) -> u8 {
        match self {
            ConfigKey::ClkDiv
            | ConfigKey::MaxIvPoints
            | ConfigKey::MinIscAdc
            | ConfigKey::MaxIscPoll
            | ConfigKey::IscStableAdc
            | ConfigKey::MaxDiscards
            | ConfigKey::AspectHeight
            | ConfigKey::AspectWidth
            | ConfigKey::RelayState
            | ConfigKey::SecondRelayState => 1,
            ConfigKey::WriteEeprom => 2,
            ConfigKey::DumpEeprom | ConfigKey::DoSsrCurrCal => 0,
        }
    }

    pub fn parse(key: &str) -> Option<ConfigKey> {
        Some(match key {
            "CLK_DIV" => ConfigKey::ClkDiv,
            "MAX_IV_POINTS" => ConfigKey::MaxIvPoints,
            "MIN_ISC_ADC" => ConfigKey::MinIscAdc,
            "MAX_ISC_POLL" => ConfigKey::MaxIscPoll,
            "ISC_STABLE_ADC" => ConfigKey::IscStableAdc,
            "MAX_DISCARDS" => ConfigKey::MaxDiscards,
            "ASPECT_HEIGHT" => ConfigKey::AspectHeight,
            "ASPECT_WIDTH" => ConfigKey::AspectWidth,
            "WRITE_EEPROM" => ConfigKey::WriteEeprom,
            "DUMP_EEPROM" => ConfigKey::DumpEeprom,
            "RELAY_STATE" => ConfigKey::RelayState,
            "SECOND_RELAY_STATE" => ConfigKey::SecondRelayState,
            "DO_SSR_CURR_CAL" => ConfigKey::DoSsrCurrCal,
            _ => return None,
        })
    }

    /// Verify the argument count the host actually sent against what this
    /// key expects, building the `ERROR:` text's detail on mismatch.
    pub fn check_arg_count(&self, got: usize) -> Result<(), FirmwareError> {
        let expected = self.expected_args();
        if got as u8 != expected {
            return Err(FirmwareError::BadArgCount(ArgCount {
                expected,
                got: got as u8,
            }));
        }
        Ok(())
    }
}

/// Sweep-loop tunables. `MAX_IV_POINTS` is clamped against the compile-time
/// retained-array capacity wherever it's consumed, not here — this struct
/// holds the host's requested value verbatim so `DUMP_EEPROM`-adjacent
/// introspection reports exactly what was configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub clk_div: u16,
    pub max_iv_points: u16,
    pub min_isc_adc: u16,
    pub max_isc_poll: i32,
    pub isc_stable_adc: u16,
    pub max_discards: u16,
    pub aspect_height: u8,
    pub aspect_width: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clk_div: 2,
            max_iv_points: 200,
            min_isc_adc: 100,
            max_isc_poll: 100,
            isc_stable_adc: 5,
            max_discards: 4,
            aspect_height: 3,
            aspect_width: 4,
        }
    }
}

impl Config {
    /// Apply one of the seven sweep-loop tunables. Callers must have
    /// already checked `key.check_arg_count()` and parsed `value` from the
    /// host's single argument string; a value this key can't represent
    /// (out of range for its field width, or not a valid integer) is
    /// `FirmwareError::BadValue`, not a panic.
    pub fn apply(&mut self, key: ConfigKey, value: i32) -> Result<(), FirmwareError> {
        match key {
            ConfigKey::ClkDiv => self.clk_div = to_u16(value)?,
            ConfigKey::MaxIvPoints => self.max_iv_points = to_u16(value)?,
            ConfigKey::MinIscAdc => self.min_isc_adc = to_u16(value)?,
            ConfigKey::MaxIscPoll => self.max_isc_poll = value,
            ConfigKey::IscStableAdc => self.isc_stable_adc = to_u16(value)?,
            ConfigKey::MaxDiscards => self.max_discards = to_u16(value)?,
            ConfigKey::AspectHeight => self.aspect_height = to_aspect(value)?,
            ConfigKey::AspectWidth => self.aspect_width = to_aspect(value)?,
            _ => return Err(FirmwareError::UnknownKey),
        }
        Ok(())
    }
}

fn to_u16(value: i32) -> Result<u16, FirmwareError> {
    u16::try_from(value).map_err(|_| FirmwareError::BadValue)
}

fn to_aspect(value: i32) -> Result<u8, FirmwareError> {
    let v = u8::try_from(value).map_err(|_| FirmwareError::BadValue)?;
    if v == 0 || v > 8 {
        return Err(FirmwareError::BadValue);
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recognizes_every_key() {
        for (text, key) in [
            ("CLK_DIV", ConfigKey::ClkDiv),
            ("MAX_IV_POINTS", ConfigKey::MaxIvPoints),
            ("MIN_ISC_ADC", ConfigKey::MinIscAdc),
            ("MAX_ISC_POLL", ConfigKey::MaxIscPoll),
            ("ISC_STABLE_ADC", ConfigKey::IscStableAdc),
            ("MAX_DISCARDS", ConfigKey::MaxDiscards),
            ("ASPECT_HEIGHT", ConfigKey::AspectHeight),
            ("ASPECT_WIDTH", ConfigKey::AspectWidth),
            ("WRITE_EEPROM", ConfigKey::WriteEeprom),
            ("DUMP_EEPROM", ConfigKey::DumpEeprom),
            ("RELAY_STATE", ConfigKey::RelayState),
            ("SECOND_RELAY_STATE", ConfigKey::SecondRelayState),
            ("DO_SSR_CURR_CAL", ConfigKey::DoSsrCurrCal),
        ] {
            assert_eq!(ConfigKey::parse(text), Some(key));
        }
        assert_eq!(ConfigKey::parse("NOT_A_KEY"), None);
    }

    #[test]
    fn wrong_arg_count_is_reported_with_expected_and_got() {
        let key = ConfigKey::ClkDiv;
        let err = key.check_arg_count(0).unwrap_err();
        assert_eq!(
            err,
            FirmwareError::BadArgCount(ArgCount { expected: 1, got: 0 })
        );
    }

    #[test]
    fn applying_the_same_value_twice_is_idempotent() {
        let mut cfg = Config::default();
        cfg.apply(ConfigKey::ClkDiv, 4).unwrap();
        let after_first = cfg;
        cfg.apply(ConfigKey::ClkDiv, 4).unwrap();
        assert_eq!(cfg, after_first);
    }

    #[test]
    fn aspect_out_of_range_is_a_bad_value() {
        let mut cfg = Config::default();
        assert_eq!(cfg.apply(ConfigKey::AspectWidth, 9), Err(FirmwareError::BadValue));
        assert_eq!(cfg.apply(ConfigKey::AspectWidth, 0), Err(FirmwareError::BadValue));
    }
}
