//! Isc stabilizer.
//!
//! Runs after the relay sequencer has presented a short and the SSR
//! bypass switch (on variants that have one) has settled. Polls CH1 then
//! CH0 until a three-sample window satisfies the stability predicate, at
//! which point the earliest sample in the window is Isc and the latest
//! becomes retained point 0.

use crate::error::FirmwareError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sample {
    voltage: u16,
    current: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IscResult {
    pub isc: u16,
    pub point0_voltage: u16,
    pub point0_current: u16,
    pub poll_loops: u32,
    pub poll_timeout: bool,
}

fn stable(pp: Sample, p: Sample, c: Sample, min_isc_adc_effective: u16, isc_stable_adc: u16) -> bool {
    c.current > min_isc_adc_effective
        && pp.voltage <= p.voltage
        && p.voltage <= c.voltage
        && p.current <= pp.current
        && c.current <= p.current
        && p.current.abs_diff(c.current) <= isc_stable_adc
        && pp.current.abs_diff(p.current) <= isc_stable_adc
}

/// Waits for the short-across-capacitor bypass switch to be safe to
/// release: on SSR variants the switch itself is slow to actuate, so the
/// firmware waits until the voltage reads unchanged across three
/// consecutive samples before releasing it. EMR variants have no such
/// delay and return immediately. Bounded defensively since every
/// wait to degrade rather than hang, and there is no named timeout for
/// this one in particular.
const SSR_SETTLE_MAX_POLLS: u32 = 1000;

pub fn wait_for_ssr_settle(
    mut read_voltage: impl FnMut() -> Result<u16, FirmwareError>,
    has_ssr_bypass: bool,
) -> Result<(), FirmwareError> {
    if !has_ssr_bypass {
        return Ok(());
    }
    let mut last: Option<(u16, u8)> = None;
    for _ in 0..SSR_SETTLE_MAX_POLLS {
        let v = read_voltage()?;
        last = Some(match last {
            Some((prev_v, streak)) if prev_v == v => (v, streak + 1),
            _ => (v, 1),
        });
        if let Some((_, streak)) = last {
            if streak >= 3 {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Poll for a stable Isc. `read` returns one `(voltage, current)` sample
/// (CH1 then CH0 internally). A negative `max_isc_poll` is the debug
/// escape hatch: poll until the first non-zero current reading, then
/// report a timeout-like single-point result built from that sample.
pub fn stabilize(
    mut read: impl FnMut() -> Result<(u16, u16), FirmwareError>,
    max_isc_poll: i32,
    min_isc_adc_effective: u16,
    isc_stable_adc: u16,
) -> Result<IscResult, FirmwareError> {
    if max_isc_poll < 0 {
        for loops in 0..SSR_SETTLE_MAX_POLLS {
            let (v, i) = read()?;
            if i != 0 {
                return Ok(IscResult {
                    isc: 0,
                    point0_voltage: v,
                    point0_current: i,
                    poll_loops: loops as u32 + 1,
                    poll_timeout: true,
                });
            }
        }
        return Ok(IscResult {
            isc: 0,
            point0_voltage: 0,
            point0_current: 0,
            poll_loops: SSR_SETTLE_MAX_POLLS,
            poll_timeout: true,
        });
    }

    let max_polls = max_isc_poll as u32;
    let mut prev_prev: Option<Sample> = None;
    let mut prev: Option<Sample> = None;
    let mut cur: Option<Sample> = None;

    for loops in 0..max_polls {
        let (v, i) = read()?;
        let s = Sample { voltage: v, current: i };

        match cur {
            Some(c) if s.voltage < c.voltage => {
                // Previous sample looked like a transient dip; replace
                // only `prev`, keep the older anchor and the current
                // sample as they were.
                prev = Some(s);
            }
            _ => {
                prev_prev = prev;
                prev = cur;
                cur = Some(s);
            }
        }

        if let (Some(pp), Some(p), Some(c)) = (prev_prev, prev, cur) {
            if stable(pp, p, c, min_isc_adc_effective, isc_stable_adc) {
                return Ok(IscResult {
                    isc: pp.current,
                    point0_voltage: c.voltage,
                    point0_current: c.current,
                    poll_loops: loops + 1,
                    poll_timeout: false,
                });
            }
        }
    }

    Ok(IscResult {
        isc: 0,
        point0_voltage: 0,
        point0_current: 0,
        poll_loops: max_polls,
        poll_timeout: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stabilizes_once_window_meets_predicate() {
        let samples = [
            (10u16, 3000u16),
            (20, 2995),
            (30, 2993),
            (30, 2992),
            (30, 2992),
        ];
        let mut idx = 0;
        let result = stabilize(
            || {
                let s = samples[idx.min(samples.len() - 1)];
                idx += 1;
                Ok(s)
            },
            20,
            10,
            5,
        )
        .unwrap();

        assert!(!result.poll_timeout);
        assert!(result.isc > 0);
    }

    #[test]
    fn exhausting_max_isc_poll_times_out() {
        let result = stabilize(|| Ok((10, 10)), 5, 10, 1).unwrap();
        assert!(result.poll_timeout);
        assert_eq!(result.poll_loops, 5);
    }

    #[test]
    fn negative_max_isc_poll_stops_on_first_nonzero_current() {
        let samples = [(5u16, 0u16), (5, 0), (5, 7)];
        let mut idx = 0;
        let result = stabilize(
            || {
                let s = samples[idx.min(samples.len() - 1)];
                idx += 1;
                Ok(s)
            },
            -1,
            0,
            0,
        )
        .unwrap();

        assert!(result.poll_timeout);
        assert_eq!(result.point0_current, 7);
    }

    #[test]
    fn ssr_settle_returns_immediately_without_bypass() {
        let mut calls = 0;
        wait_for_ssr_settle(
            || {
                calls += 1;
                Ok(0)
            },
            false,
        )
        .unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn ssr_settle_waits_for_three_equal_reads() {
        let readings = [1u16, 2, 2, 2, 3];
        let mut idx = 0;
        wait_for_ssr_settle(
            || {
                let v = readings[idx.min(readings.len() - 1)];
                idx += 1;
                Ok(v)
            },
            true,
        )
        .unwrap();
        assert_eq!(idx, 4);
    }
}
