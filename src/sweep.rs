//! Sweep loop — the hard part.
//!
//! Reads CH1 then CH0 every iteration (matching the order the Isc
//! stabilizer used while polling, so interpolation stays consistent across
//! the Isc-stabilization/sweep-loop boundary), interpolates the previous
//! point's current toward the voltage-read instant, applies the
//! voltage-decrease (relay-bounce) correction, and decides whether to
//! keep or discard each tentative point via a Manhattan-distance budget.
//!
//! Performance contract: every quantity that participates in
//! per-iteration arithmetic is `i16`/`u16`, combined with `wrapping_*`
//! operators rather than checked ones — the production target is an
//! 8-bit MCU whose ALU wraps silently on overflow of a 16-bit word, and a
//! host build must reproduce that behavior bit-for-bit rather than panic
//! on a debug build or promote to a wider type. In any sweep the physics
//! can actually produce, the deltas stay small enough that wrapping never
//! triggers; it exists purely so adversarial test fixtures can't panic the
//! loop instead of producing a (possibly wrong, but defined) result.

use crate::error::FirmwareError;
use crate::points::RetainedPoints;

/// Interpolation weights: the previous point's native
/// current is pulled `W1:W2` toward this iteration's reading.
pub const W1: i16 = 5;
pub const W2: i16 = 3;
const HALF: i16 = (W1 + W2) / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SweepOutcome {
    pub pt_num: usize,
    pub num_meas: u32,
    pub min_manhattan: i16,
}

/// Run one full sweep, writing retained points into `points` (slot 0 must
/// already hold the Isc-stabilization sample) and returning diagnostics
/// for the report emitter.
///
/// `sampler` returns one `(voltage, current)` ADC reading per call —
/// callers wrap the real ADC (CH1 then CH0) or, in tests, a canned
/// sequence.
#[allow(clippy::too_many_arguments)]
pub fn run_sweep<const N_MAX: usize>(
    points: &mut RetainedPoints<N_MAX>,
    mut sampler: impl FnMut() -> Result<(u16, u16), FirmwareError>,
    isc: u16,
    voc: u16,
    v_scale: u8,
    i_scale: u8,
    max_iv_points: u16,
    max_discards: u16,
    max_iv_meas: u32,
    done_ch1: u16,
    isc_poll_timed_out: bool,
) -> Result<SweepOutcome, FirmwareError> {
    let max_iv_points = (max_iv_points as usize).min(N_MAX).max(1);
    let v_scale_i16 = v_scale as i16;
    let i_scale_i16 = i_scale as i16;

    let min_manhattan: i16 = {
        let numerator = (isc as i32) * (i_scale as i32) + (voc as i32) * (v_scale as i32);
        (numerator / max_iv_points as i32) as i16
    };

    let mut pt_num: usize = 1;
    let mut prev_i: i16 = points.current(0) as i16;
    let mut last_cur_i: i16 = prev_i;
    let mut update_prev_ch1 = false;
    let mut num_discarded: u16 = 0;
    let mut num_meas: u32 = 1;

    loop {
        if num_meas >= max_iv_meas {
            break;
        }

        let (cur_v_raw, cur_i_raw) = sampler()?;
        let cur_v = cur_v_raw as i16;
        let cur_i = cur_i_raw as i16;
        last_cur_i = cur_i;

        // Step 2: interpolate the previous point's native current toward
        // this instant.
        if update_prev_ch1 {
            let prev = points.current(pt_num - 1) as i16;
            let weighted = prev
                .wrapping_mul(W1)
                .wrapping_add(cur_i.wrapping_mul(W2))
                .wrapping_add(HALF)
                / (W1 + W2);
            points.set_current(pt_num - 1, weighted as u16);
        }

        // Step 3: tentative full point write.
        points.set(pt_num, cur_v as u16, cur_i as u16);

        // Step 4.
        let delta_v = cur_v.wrapping_sub(points.voltage(pt_num - 1) as i16);
        let delta_i = (points.current(pt_num - 1) as i16).wrapping_sub(cur_i);
        let delta_i_recent = prev_i.wrapping_sub(cur_i);
        prev_i = cur_i;
        num_meas += 1;

        // Step 5: tail check.
        if cur_i < done_ch1 as i16 && delta_i_recent < 3 {
            break;
        }
        if isc_poll_timed_out {
            break;
        }

        // Step 6: voltage-decrease (relay bounce) correction. Never
        // rewinds past point 0.
        if cur_v < points.voltage(pt_num - 1) as i16 {
            while pt_num > 1 && points.voltage(pt_num - 1) as i16 > cur_v {
                pt_num -= 1;
            }
            points.set(pt_num - 1, cur_v as u16, cur_i as u16);
            update_prev_ch1 = true;
            continue;
        }

        // Step 7: Manhattan-distance discard decision.
        let d = delta_v
            .wrapping_mul(v_scale_i16)
            .wrapping_add(delta_i.wrapping_mul(i_scale_i16));
        if d >= min_manhattan || num_discarded >= max_discards {
            if num_discarded >= max_discards && d < min_manhattan {
                #[cfg(feature = "defmt")]
                defmt::warn!("discard budget exceeded, forcing a keep");
            }
            pt_num += 1;
            update_prev_ch1 = true;
            num_discarded = 0;
            if pt_num >= max_iv_points {
                break;
            }
        } else {
            update_prev_ch1 = false;
            num_discarded += 1;
        }
    }

    // Exit flush: the pending interpolation never landed.
    if update_prev_ch1 {
        points.set_current(pt_num - 1, last_cur_i as u16);
    }

    points.set_pt_num(pt_num);

    Ok(SweepOutcome {
        pt_num,
        num_meas,
        min_manhattan,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_sequence<'a>(
        samples: &'a [(u16, u16)],
    ) -> impl FnMut() -> Result<(u16, u16), FirmwareError> + 'a {
        let mut idx = 0;
        move || {
            let s = samples.get(idx).copied().unwrap_or(*samples.last().unwrap());
            idx += 1;
            Ok(s)
        }
    }

    #[test]
    fn nominal_sweep_terminates_within_buffer_and_is_monotonic() {
        let mut points: RetainedPoints<275> = RetainedPoints::new();
        points.push(0, 3000); // point 0: Isc-stabilization sample

        let mut samples = Vec::new();
        for k in 0..200u32 {
            let v = (k as u32 * 600 / 199) as u16;
            let i = 3000u32.saturating_sub(k as u32 * 2995 / 199) as u16;
            samples.push((v, i));
        }

        let outcome = run_sweep(
            &mut points,
            from_sequence(&samples),
            3000,
            620,
            8,
            8,
            200,
            4,
            10_000,
            20,
            false,
        )
        .unwrap();

        assert!(outcome.pt_num <= 200);
        assert!(outcome.pt_num >= 2);
        assert!(points.is_voltage_monotonic());
        assert!(outcome.num_meas <= 10_000);
    }

    #[test]
    fn isc_poll_timeout_yields_single_point_sweep() {
        let mut points: RetainedPoints<275> = RetainedPoints::new();
        points.push(0, 0);

        let samples = [(0u16, 0u16)];
        let outcome = run_sweep(
            &mut points,
            from_sequence(&samples),
            0,
            0,
            8,
            8,
            200,
            4,
            10_000,
            20,
            true,
        )
        .unwrap();

        assert_eq!(outcome.pt_num, 1);
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn voltage_decrease_correction_rewinds_past_bounced_point() {
        let mut points: RetainedPoints<275> = RetainedPoints::new();
        points.push(90, 1000); // point 0

        // Voltages 100, 110, 130, 105 (bounce), 140, ... with a plausible
        // matching current decay, then a tail so the loop terminates.
        let samples = [
            (100u16, 900u16),
            (110, 850),
            (130, 800),
            (105, 790), // bounce: rewinds past the retained 130
            (140, 700),
            (300, 100),
            (400, 10),
            (420, 2),
            (420, 1),
        ];

        let outcome = run_sweep(
            &mut points,
            from_sequence(&samples),
            1000,
            500,
            8,
            8,
            50,
            1,
            10_000,
            20,
            false,
        )
        .unwrap();

        assert!(points.is_voltage_monotonic());
        assert!(outcome.pt_num >= 2);
    }

    #[test]
    fn discard_cap_forces_a_keep_after_max_discards() {
        let mut points: RetainedPoints<275> = RetainedPoints::new();
        points.push(0, 1000);

        // Tiny, near-constant deltas that would never clear the Manhattan
        // threshold on their own -- MAX_DISCARDS must force periodic keeps.
        let mut samples = Vec::new();
        for k in 0..30u16 {
            samples.push((k, 1000u16.saturating_sub(k)));
        }
        samples.push((200, 5)); // tail

        let outcome = run_sweep(
            &mut points,
            from_sequence(&samples),
            1000,
            4000,
            1,
            1,
            200,
            3,
            10_000,
            20,
            false,
        )
        .unwrap();

        // With MAX_DISCARDS=3, at most 3 consecutive measurements between
        // any two retained points may be discarded.
        assert!(outcome.pt_num >= 2);
    }

    #[test]
    fn never_exceeds_max_iv_points() {
        let mut points: RetainedPoints<20> = RetainedPoints::new();
        points.push(0, 4000);

        let mut samples = Vec::new();
        for k in 1..500u32 {
            samples.push(((k % 600) as u16, 4000u16.saturating_sub((k * 10) as u16)));
        }

        let outcome = run_sweep(
            &mut points,
            from_sequence(&samples),
            4000,
            600,
            8,
            8,
            20,
            0,
            10_000,
            20,
            false,
        )
        .unwrap();

        assert!(outcome.pt_num <= 20);
    }
}
