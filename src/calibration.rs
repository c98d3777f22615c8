//! `DO_SSR_CURR_CAL`: optional SSR current-sense calibration.
//!
//! Drives the primary relay active with the short-across-capacitor switch
//! engaged for `SSR_CAL_USECS`, averaging CH1 over only the trailing
//! `SSR_CAL_RD_USECS` of that window so the SSR has time to settle before
//! any sample counts. The caller owns the relay sequencing (this module
//! only measures); it must have already called [`crate::relay::RelaySequencer::arm_short`].

use crate::error::FirmwareError;
use crate::time::elapsed_us;

pub const SSR_CAL_USECS: u32 = 3_000_000;
pub const SSR_CAL_RD_USECS: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationResult {
    pub average: u16,
    pub valid: bool,
}

/// Run one calibration pass. `read_current` samples CH1; `now_us` reads
/// the microsecond counter. `drive_usecs`/`read_window_usecs` are the
/// production constants in normal use; tests pass smaller windows against
/// a [`crate::time::FakeClock`] to keep the loop short.
pub fn run(
    mut read_current: impl FnMut() -> Result<u16, FirmwareError>,
    mut now_us: impl FnMut() -> u32,
    drive_usecs: u32,
    read_window_usecs: u32,
) -> Result<CalibrationResult, FirmwareError> {
    let start = now_us();
    let window_start = drive_usecs.saturating_sub(read_window_usecs);

    let mut min = u16::MAX;
    let mut max = 0u16;
    let mut sum: u32 = 0;
    let mut count: u32 = 0;
    let mut saturated = false;

    loop {
        let elapsed = elapsed_us(start, now_us());
        if elapsed >= drive_usecs {
            break;
        }
        let reading = read_current()?;
        if elapsed >= window_start {
            if reading >= 4095 {
                saturated = true;
            }
            min = min.min(reading);
            max = max.max(reading);
            sum += reading as u32;
            count += 1;
        }
    }

    if count == 0 {
        return Ok(CalibrationResult {
            average: 0,
            valid: false,
        });
    }

    let average = (sum / count) as u16;
    let spread_ok = (max - min) as u32 <= average as u32 / 100;
    Ok(CalibrationResult {
        average,
        valid: !saturated && spread_ok,
    })
}
