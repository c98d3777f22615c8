//! Scale computer.
//!
//! Derives the two small integer weights `(v_scale, i_scale)` used by the
//! sweep loop to turn a voltage/current delta pair into a single Manhattan
//! distance, proportional to the rendered aspect ratio so equal distances
//! correspond to equal pixel spacings.
//!
//! Precondition: `voc >= MIN_VOC_ADC` (the caller only reaches this after
//! the Voc sampler has ruled out "not connected"), so `aspect_height * voc` is never
//! zero and always dominates as `lg` when `isc` is small — the floor step
//! (step 6) exists precisely to keep the *other* axis's scale at 1 rather
//! than letting a near-zero `isc` collapse it to 0.

/// 32-bit-only outside the hot loop: this runs once per sweep, not once
/// per sample, so it is not bound by the sweep loop's 16-bit performance contract.
fn highest_set_bit_clamped(v: u32) -> u32 {
    if v == 0 {
        return 4;
    }
    (31 - v.leading_zeros()).clamp(4, 15)
}

/// Scale a value against the shift/round-up derived
/// from the larger of the pair.
fn raw_scale(value: u32, shift: u32, round_up_mask: u32) -> u32 {
    (value >> shift) + u32::from(value & round_up_mask != 0)
}

/// Compute `(v_scale, i_scale)` via a seven-step algorithm. Both
/// outputs are `>= 1` and their sum is `<= 16` for any `voc > 0`.
pub fn compute_scales(isc: u16, voc: u16, aspect_width: u8, aspect_height: u8) -> (u8, u8) {
    debug_assert!(aspect_width as u32 <= 8 && aspect_height as u32 <= 8);

    // Step 1: note the deliberate cross of Isc with ASPECT_WIDTH and Voc
    // with ASPECT_HEIGHT — undone in the "restore axis assignment" step.
    let initial_v = aspect_width as u32 * isc as u32;
    let initial_i = aspect_height as u32 * voc as u32;

    let (lg, sm, i_is_lg) = if initial_i >= initial_v {
        (initial_i, initial_v, true)
    } else {
        (initial_v, initial_i, false)
    };

    // Step 3: a single shift/mask pair, derived from the larger value,
    // applied to both.
    let b = highest_set_bit_clamped(lg);
    let shift = b - 3;
    let round_up_mask = 1u32 << (b - 4);

    // Step 4.
    let mut lg_scale = raw_scale(lg, shift, round_up_mask);
    let mut sm_scale = raw_scale(sm, shift, round_up_mask);

    // Step 5.
    if lg_scale + sm_scale > 16 {
        lg_scale >>= 1;
        sm_scale >>= 1;
    }

    // Step 6: floor the smaller at 1, keep the sum in range.
    if sm_scale == 0 {
        sm_scale = 1;
        if lg_scale == 16 {
            lg_scale = 15;
        }
    }

    // Step 7: restore axis assignment. `lg`/`sm` were computed from the
    // swapped quantities of step 1, so the scale that tracks `initial_i`
    // (Voc's contribution) becomes `v_scale`, and the one that tracks
    // `initial_v` (Isc's contribution) becomes `i_scale`.
    let (scale_of_initial_i, scale_of_initial_v) = if i_is_lg {
        (lg_scale, sm_scale)
    } else {
        (sm_scale, lg_scale)
    };

    (scale_of_initial_i as u8, scale_of_initial_v as u8)
}
