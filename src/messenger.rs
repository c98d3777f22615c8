//! Host messenger.
//!
//! Single-threaded, blocking, line-oriented ASCII protocol. [`LineReader`]
//! accumulates inbound bytes into a 35-byte buffer and yields complete
//! lines (or a length error); [`parse_line`] turns a line into one of the
//! three recognized verbs; the `write_*` helpers render outbound lines
//! through `ufmt`, matching the allocation-free style the rest of the
//! crate uses for anything that touches the serial link.

use heapless::String;
use heapless::Vec;
use ufmt::uWrite;

use crate::config::ConfigKey;
use crate::error::FirmwareError;

pub const MAX_LINE_LEN: usize = 35;

/// Idle poll ticks (driven by the caller, one per millisecond) before a
/// partially received line is abandoned.
pub const MSG_TIMER_TIMEOUT: u32 = 2000;

/// Accumulates bytes into one inbound line at a time.
#[derive(Default)]
pub struct LineReader {
    buf: String<MAX_LINE_LEN>,
    idle_ticks: u32,
}

impl LineReader {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            idle_ticks: 0,
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.idle_ticks = 0;
    }

    /// Feed one byte. A `\n` completes and returns the line (with any
    /// trailing `\r` stripped); any other byte that doesn't fit emits
    /// `LineTooLong` and discards what had accumulated so far.
    pub fn feed(&mut self, byte: u8) -> Result<Option<String<MAX_LINE_LEN>>, FirmwareError> {
        self.idle_ticks = 0;
        if byte == b'\n' {
            let mut line = core::mem::replace(&mut self.buf, String::new());
            while line.ends_with('\r') {
                line.pop();
            }
            return Ok(Some(line));
        }
        if self.buf.push(byte as char).is_err() {
            self.buf.clear();
            return Err(FirmwareError::LineTooLong);
        }
        Ok(None)
    }

    /// Advance the idle clock by one poll tick. Only a partially received
    /// line ages out: an empty buffer has nothing to abandon, so it never
    /// trips the timeout. Returns `true` (and clears the buffer) the tick
    /// a partial line reaches `MSG_TIMER_TIMEOUT` idle ticks.
    pub fn on_idle_tick(&mut self) -> bool {
        if self.buf.is_empty() {
            return false;
        }
        self.idle_ticks += 1;
        if self.idle_ticks >= MSG_TIMER_TIMEOUT {
            self.buf.clear();
            self.idle_ticks = 0;
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Inbound<'a> {
    Ready,
    Config {
        key: ConfigKey,
        args: Vec<&'a str, 2>,
    },
    Go,
}

/// Parse one already-terminator-stripped line into a recognized verb.
///
/// `Config` arguments are left as raw tokens rather than pre-parsed: a
/// `WRITE_EEPROM` value is a float, every other key's value is an
/// integer, and only [`crate::config::Config::apply`] (or the
/// supervisor, for the keys it owns) knows which.
pub fn parse_line(line: &str) -> Result<Inbound<'_>, FirmwareError> {
    let mut tokens = line.split_whitespace();
    let verb = tokens.next().unwrap_or("");

    match verb {
        "Ready" => Ok(Inbound::Ready),
        "Go" => Ok(Inbound::Go),
        "Config" => {
            let key_text = tokens.next().ok_or(FirmwareError::UnknownKey)?;
            let key = ConfigKey::parse(key_text).ok_or(FirmwareError::UnknownKey)?;

            let mut args: Vec<&str, 2> = Vec::new();
            let mut got: u8 = 0;
            for tok in tokens {
                got += 1;
                let _ = args.push(tok);
            }
            if got as usize != args.len() {
                // more tokens arrived than the 2-slot buffer can hold.
                return Err(FirmwareError::BadArgCount(crate::error::ArgCount {
                    expected: key.expected_args(),
                    got,
                }));
            }
            key.check_arg_count(args.len())?;
            Ok(Inbound::Config { key, args })
        }
        _ => Err(FirmwareError::UnknownKey),
    }
}

pub fn write_ready<W: uWrite>(w: &mut W) -> Result<(), W::Error> {
    ufmt::uwriteln!(w, "Ready")
}

pub fn write_waiting<W: uWrite>(w: &mut W) -> Result<(), W::Error> {
    ufmt::uwriteln!(w, "Waiting for go message or config message")
}

pub fn write_config_processed<W: uWrite>(w: &mut W) -> Result<(), W::Error> {
    ufmt::uwriteln!(w, "Config processed")
}

pub fn write_config_not_processed<W: uWrite>(w: &mut W) -> Result<(), W::Error> {
    ufmt::uwriteln!(w, "Config not processed")
}

pub fn write_error<W: uWrite>(w: &mut W, key: &str, err: &FirmwareError) -> Result<(), W::Error> {
    match err {
        FirmwareError::BadArgCount(counts) => ufmt::uwriteln!(
            w,
            "ERROR: Expected {} args for config type {}, got {}",
            counts.expected,
            key,
            counts.got
        ),
        other => ufmt::uwriteln!(w, "ERROR: {} for config type {}", other.tag(), key),
    }
}

pub fn write_isc_line<W: uWrite>(w: &mut W, isc: u16) -> Result<(), W::Error> {
    ufmt::uwriteln!(w, "Isc CH0:0 CH1:{}", isc)
}

pub fn write_point_line<W: uWrite>(w: &mut W, index: usize, voltage: u16, current: u16) -> Result<(), W::Error> {
    ufmt::uwriteln!(w, "{} CH0:{} CH1:{}", index, voltage, current)
}

pub fn write_voc_line<W: uWrite>(w: &mut W, voc: u16, noise_floor: u16) -> Result<(), W::Error> {
    ufmt::uwriteln!(w, "Voc CH0:{} CH1:{}", voc, noise_floor)
}

pub fn write_output_complete<W: uWrite>(w: &mut W) -> Result<(), W::Error> {
    ufmt::uwriteln!(w, "Output complete")
}

pub fn write_isc_poll_timeout_warning<W: uWrite>(w: &mut W) -> Result<(), W::Error> {
    ufmt::uwriteln!(w, "WARNING: Polling for stable Isc timed out")
}
