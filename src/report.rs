//! Report emitter.
//!
//! Streams one sweep's results in the fixed line order the host parser
//! depends on: optional sensor readings, noise floor, Isc, every retained
//! point, Voc, an optional unfiltered-capture dump, diagnostic tallies,
//! then the terminator.

use ufmt::uWrite;

use crate::messenger::{write_isc_line, write_output_complete, write_point_line, write_voc_line};
use crate::points::RetainedPoints;

/// Hook for post-sweep environmental readings (temperature, irradiance).
/// A variant with no sensors wires [`NoSensors`]; each recognized line is
/// written (and newline-terminated) by the implementor directly, since
/// the set and format of sensor lines varies by what's actually wired.
pub trait SensorReadout<W: uWrite> {
    fn write_readings(&mut self, w: &mut W) -> Result<(), W::Error>;
}

pub struct NoSensors;

impl<W: uWrite> SensorReadout<W> for NoSensors {
    fn write_readings(&mut self, _w: &mut W) -> Result<(), W::Error> {
        Ok(())
    }
}

/// Diagnostic tallies appended after the point stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Diagnostics {
    pub isc_poll_loops: u32,
    pub num_meas: u32,
    pub num_recorded_points: usize,
    pub i_scale: u8,
    pub v_scale: u8,
    pub min_manhattan_distance: i16,
    pub elapsed_usecs: u32,
}

fn write_noise_floor<W: uWrite>(w: &mut W, min: u16, max: u16) -> Result<(), W::Error> {
    ufmt::uwriteln!(w, "CH1 ADC noise floor (min/max): {}/{}", min, max)
}

fn write_diagnostics<W: uWrite>(w: &mut W, d: &Diagnostics) -> Result<(), W::Error> {
    ufmt::uwriteln!(w, "Isc poll loops: {}", d.isc_poll_loops)?;
    ufmt::uwriteln!(w, "Number of measurements: {}", d.num_meas)?;
    ufmt::uwriteln!(w, "Number of recorded points: {}", d.num_recorded_points)?;
    ufmt::uwriteln!(w, "i_scale: {}", d.i_scale)?;
    ufmt::uwriteln!(w, "v_scale: {}", d.v_scale)?;
    ufmt::uwriteln!(w, "min_manhattan_distance: {}", d.min_manhattan_distance)?;
    ufmt::uwriteln!(w, "Elapsed usecs: {}", d.elapsed_usecs)?;
    if d.num_meas > 0 {
        ufmt::uwriteln!(
            w,
            "Time (usecs) per i/v reading: {}",
            d.elapsed_usecs / d.num_meas
        )?;
    }
    Ok(())
}

/// Emit one full report. `unfiltered` is an optional second pass over
/// every raw (not just retained) sample, supplied as an iterator of
/// `(voltage, current)` pairs when the caller chose to keep one.
#[allow(clippy::too_many_arguments)]
pub fn emit<const N_MAX: usize, W: uWrite>(
    w: &mut W,
    sensors: &mut impl SensorReadout<W>,
    noise_floor_min: u16,
    noise_floor_max: u16,
    isc: u16,
    points: &RetainedPoints<N_MAX>,
    voc: u16,
    unfiltered: Option<impl Iterator<Item = (u16, u16)>>,
    diagnostics: &Diagnostics,
) -> Result<(), W::Error> {
    sensors.write_readings(w)?;
    write_noise_floor(w, noise_floor_min, noise_floor_max)?;
    write_isc_line(w, isc)?;

    for i in 0..points.len() {
        write_point_line(w, i, points.voltage(i), points.current(i))?;
    }

    write_voc_line(w, voc, noise_floor_min)?;

    if let Some(samples) = unfiltered {
        for (i, (v, c)) in samples.enumerate() {
            ufmt::uwriteln!(w, "raw {} CH0:{} CH1:{}", i, v, c)?;
        }
    }

    write_diagnostics(w, diagnostics)?;
    write_output_complete(w)
}
