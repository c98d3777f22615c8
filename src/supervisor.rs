//! Supervisor / state machine.
//!
//! Top-level sequencing: boot, handshake, idle, sweep, report, back to
//! idle. Owns the one [`Hardware`] instance and dispatches every inbound
//! line to either `Config` handling (valid in Handshake and Idle) or the
//! state-specific verb (`Ready` in Handshake, `Go` in Idle).

use ufmt::uWrite;

use crate::adc::Channel;
use crate::calibration::{self, CalibrationResult};
use crate::config::{Config, ConfigKey};
use crate::error::FirmwareError;
use crate::hardware::Hardware;
use crate::isc;
use crate::messenger::{
    parse_line, write_config_not_processed, write_config_processed, write_error,
    write_isc_poll_timeout_warning, write_ready, write_waiting,
};
use crate::points::RetainedPoints;
use crate::relay::Polarity;
use crate::report::{self, Diagnostics, NoSensors};
use crate::sampler::{self, MIN_VOC_ADC, VOC_POLLING_LOOPS};
use crate::scale;
use crate::sweep;
use crate::time::elapsed_us;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Handshake,
    Idle,
}

pub struct Supervisor<H, const N_MAX: usize> {
    hw: H,
    config: Config,
    points: RetainedPoints<N_MAX>,
    state: State,
}

impl<H: Hardware, const N_MAX: usize> Supervisor<H, N_MAX> {
    /// Boot: load the persisted relay polarity (falling back to
    /// active-low silently if the store is unprogrammed) and enter
    /// Handshake.
    pub fn new(mut hw: H) -> Result<Self, FirmwareError> {
        let flag = hw.read_polarity_flag()?;
        hw.set_polarity(Polarity::from_persisted(flag));
        Ok(Self {
            hw,
            config: Config::default(),
            points: RetainedPoints::new(),
            state: State::Handshake,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Free-running microsecond clock, exposed so the run loop can pace
    /// [`crate::messenger::LineReader::on_idle_tick`] without owning a
    /// second handle to the hardware.
    pub fn now_us(&mut self) -> u32 {
        self.hw.now_us()
    }

    /// Emit the state-appropriate prompt (`Ready` during Handshake,
    /// `Waiting for go message or config message` during Idle).
    pub fn emit_prompt<W: uWrite>(&self, out: &mut W) -> Result<(), W::Error> {
        match self.state {
            State::Handshake => write_ready(out),
            State::Idle => write_waiting(out),
        }
    }

    /// Process one inbound line, writing any response to `out`. Returns
    /// `Ok(true)` if a sweep was just run (the caller may want to loop
    /// back to emitting the Idle prompt).
    pub fn handle_line<W: uWrite>(&mut self, line: &str, out: &mut W) -> Result<bool, W::Error> {
        let parsed = match parse_line(line) {
            Ok(p) => p,
            Err(e) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("line parse failed: {}", e);
                // parse_line only carries the failure reason, not the key
                // text, so recover it the same way parse_line itself split
                // the line: second token, present only for a `Config` verb.
                let mut tokens = line.split_whitespace();
                let verb = tokens.next().unwrap_or("");
                let key_text = if verb == "Config" {
                    tokens.next().unwrap_or("")
                } else {
                    ""
                };
                write_error(out, key_text, &e)?;
                if verb == "Config" {
                    write_config_not_processed(out)?;
                }
                return Ok(false);
            }
        };

        match parsed {
            crate::messenger::Inbound::Ready => {
                if self.state == State::Handshake {
                    self.state = State::Idle;
                    #[cfg(feature = "defmt")]
                    defmt::info!("handshake complete, entering idle");
                }
                Ok(false)
            }
            crate::messenger::Inbound::Go => {
                if self.state == State::Idle {
                    self.run_sweep(out)?;
                    return Ok(true);
                }
                Ok(false)
            }
            crate::messenger::Inbound::Config { key, args } => {
                match self.apply_config(key, &args) {
                    Ok(()) => {
                        write_config_processed(out)?;
                        match key {
                            ConfigKey::DumpEeprom => self.dump_eeprom(out)?,
                            ConfigKey::DoSsrCurrCal => {
                                if let Ok(result) = self.run_calibration() {
                                    ufmt::uwriteln!(
                                        out,
                                        "SSR cal average: {} valid: {}",
                                        result.average,
                                        result.valid
                                    )?;
                                }
                            }
                            _ => {}
                        }
                    }
                    Err(e) => {
                        #[cfg(feature = "defmt")]
                        defmt::warn!("config {} rejected: {}", key.name(), e);
                        write_error(out, key.name(), &e)?;
                        write_config_not_processed(out)?;
                    }
                }
                Ok(false)
            }
        }
    }

    fn apply_config(&mut self, key: ConfigKey, args: &[&str]) -> Result<(), FirmwareError> {
        match key {
            ConfigKey::ClkDiv
            | ConfigKey::MaxIvPoints
            | ConfigKey::MinIscAdc
            | ConfigKey::MaxIscPoll
            | ConfigKey::IscStableAdc
            | ConfigKey::MaxDiscards
            | ConfigKey::AspectHeight
            | ConfigKey::AspectWidth => {
                let value: i32 = args[0].parse().map_err(|_| FirmwareError::BadValue)?;
                self.config.apply(key, value)
            }
            ConfigKey::RelayState => {
                let active = args[0].parse::<i32>().map_err(|_| FirmwareError::BadValue)? != 0;
                self.hw.set_primary(active)
            }
            ConfigKey::SecondRelayState => {
                let active = args[0].parse::<i32>().map_err(|_| FirmwareError::BadValue)? != 0;
                self.hw.set_secondary(active)
            }
            ConfigKey::WriteEeprom => {
                let addr: u32 = args[0].parse().map_err(|_| FirmwareError::BadValue)?;
                let value: f32 = args[1].parse().map_err(|_| FirmwareError::BadValue)?;
                self.hw.write_entry(addr, value)?;
                if addr == crate::persistence::OFFSET_POLARITY {
                    self.hw.set_polarity(Polarity::from_persisted(value));
                }
                Ok(())
            }
            ConfigKey::DumpEeprom => Ok(()),
            ConfigKey::DoSsrCurrCal => Ok(()),
        }
    }

    /// `DUMP_EEPROM`: write every valid persisted entry. Storage or format
    /// failures mid-dump are swallowed rather than propagated: `W::Error`
    /// has no variant to carry a `FirmwareError` back through the
    /// `for_each_entry` visitor closure.
    pub fn dump_eeprom<W: uWrite>(&mut self, out: &mut W) -> Result<(), W::Error> {
        let _ = self.hw.for_each_entry(&mut |offset, value| {
            let _ = ufmt::uwriteln!(out, "EEPROM[{}]: {}", offset, value);
        });
        Ok(())
    }

    /// `DO_SSR_CURR_CAL`: arm a short and measure the SSR's current-sense
    /// stability.
    pub fn run_calibration(&mut self) -> Result<CalibrationResult, FirmwareError> {
        self.hw.arm_short()?;
        let result = calibration::run(
            || self.hw.read_adc(Channel::Current),
            || self.hw.now_us(),
            calibration::SSR_CAL_USECS,
            calibration::SSR_CAL_RD_USECS,
        );
        self.hw.return_to_bleed()?;
        result
    }

    /// Run one full sweep: Voc/noise sampling, Isc stabilization, scale
    /// computation, the point sweep, relay bleed-down, and the report,
    /// leaving the supervisor in Idle afterward.
    fn run_sweep<W: uWrite>(&mut self, out: &mut W) -> Result<(), W::Error> {
        #[cfg(feature = "defmt")]
        defmt::info!("sweep starting");
        self.points.reset();
        let start_us = self.hw.now_us();

        let voc_sample = self.run_voc_sampling();
        let voc_sample = match voc_sample {
            Ok(s) => s,
            Err(_) => {
                // ADC bus fault during Voc polling: report a degenerate
                // sweep rather than propagate.
                self.emit_degenerate_report(out, 0, 0, &Diagnostics {
                    isc_poll_loops: 0,
                    num_meas: 0,
                    num_recorded_points: 0,
                    i_scale: 1,
                    v_scale: 1,
                    min_manhattan_distance: 0,
                    elapsed_usecs: 0,
                })?;
                self.state = State::Idle;
                return Ok(());
            }
        };

        if voc_sample.not_connected {
            // No short-circuit path worth probing: Isc, the scale
            // computer, and the point sweep all need a real Voc to mean
            // anything, so this reports a single zeroed point directly.
            self.points.push(0, 0);
            let elapsed_usecs = elapsed_us(start_us, self.hw.now_us());
            report::emit::<N_MAX, W>(
                out,
                &mut NoSensors,
                voc_sample.noise_floor,
                voc_sample.noise_floor_max,
                0,
                &self.points,
                0,
                None::<core::iter::Empty<(u16, u16)>>,
                &Diagnostics {
                    isc_poll_loops: 0,
                    num_meas: 0,
                    num_recorded_points: self.points.len(),
                    i_scale: 1,
                    v_scale: 1,
                    min_manhattan_distance: 0,
                    elapsed_usecs,
                },
            )?;
            self.state = State::Idle;
            return Ok(());
        }

        let has_ssr_bypass = self.hw.has_ssr_bypass();
        self.hw.arm_short().ok();
        isc::wait_for_ssr_settle(|| self.hw.read_adc(Channel::Voltage), has_ssr_bypass).ok();
        self.hw.release_to_capacitor().ok();

        let min_isc_adc_effective = self
            .config
            .min_isc_adc
            .saturating_add(voc_sample.noise_floor);
        let isc_stable_adc = self.config.isc_stable_adc;
        let max_isc_poll = self.config.max_isc_poll;

        let isc_outcome = isc::stabilize(
            || {
                let i = self.hw.read_adc(Channel::Current)?;
                let v = self.hw.read_adc(Channel::Voltage)?;
                Ok((v, i))
            },
            max_isc_poll,
            min_isc_adc_effective,
            isc_stable_adc,
        );

        let (isc, point0, poll_loops, poll_timeout) = match isc_outcome {
            Ok(r) => (
                r.isc,
                (r.point0_voltage, r.point0_current),
                r.poll_loops,
                r.poll_timeout,
            ),
            Err(_) => (0u16, (0u16, 0u16), 0u32, true),
        };

        self.points.push(point0.0, point0.1);

        if poll_timeout {
            #[cfg(feature = "defmt")]
            defmt::warn!("isc poll timed out after {} loops", poll_loops);
            write_isc_poll_timeout_warning(out)?;
        }

        let (v_scale, i_scale) = scale::compute_scales(
            isc,
            voc_sample.voc,
            self.config.aspect_width,
            self.config.aspect_height,
        );

        let max_iv_points = self.config.max_iv_points;
        let max_discards = self.config.max_discards;
        let outcome = sweep::run_sweep(
            &mut self.points,
            || {
                let i = self.hw.read_adc(Channel::Current)?;
                let v = self.hw.read_adc(Channel::Voltage)?;
                Ok((v, i))
            },
            isc,
            voc_sample.voc,
            v_scale,
            i_scale,
            max_iv_points,
            max_discards,
            u32::MAX,
            voc_sample.done_ch1,
            poll_timeout,
        );

        let _ = self.hw.return_to_bleed();

        let outcome = match outcome {
            Ok(o) => o,
            Err(_) => sweep::SweepOutcome {
                pt_num: self.points.len(),
                num_meas: poll_loops,
                min_manhattan: 0,
            },
        };

        let elapsed_usecs = elapsed_us(start_us, self.hw.now_us());
        let diagnostics = Diagnostics {
            isc_poll_loops: poll_loops,
            num_meas: outcome.num_meas,
            num_recorded_points: outcome.pt_num,
            i_scale,
            v_scale,
            min_manhattan_distance: outcome.min_manhattan,
            elapsed_usecs,
        };

        report::emit::<N_MAX, W>(
            out,
            &mut NoSensors,
            voc_sample.noise_floor,
            voc_sample.noise_floor_max,
            isc,
            &self.points,
            voc_sample.voc,
            None::<core::iter::Empty<(u16, u16)>>,
            &diagnostics,
        )?;

        self.state = State::Idle;
        #[cfg(feature = "defmt")]
        defmt::info!("sweep complete, {} points retained", outcome.pt_num as u16);
        Ok(())
    }

    fn run_voc_sampling(&mut self) -> Result<sampler::VocSample, FirmwareError> {
        sampler::sample_voc_and_noise::<N_MAX>(
            || {
                let v = self.hw.read_adc(Channel::Voltage)?;
                let i = self.hw.read_adc(Channel::Current)?;
                Ok((v, i))
            },
            VOC_POLLING_LOOPS,
            MIN_VOC_ADC,
        )
    }

    fn emit_degenerate_report<W: uWrite>(
        &mut self,
        out: &mut W,
        noise_floor: u16,
        noise_floor_max: u16,
        diagnostics: &Diagnostics,
    ) -> Result<(), W::Error> {
        self.points.reset();
        report::emit::<N_MAX, W>(
            out,
            &mut NoSensors,
            noise_floor,
            noise_floor_max,
            0,
            &self.points,
            0,
            None::<core::iter::Empty<(u16, u16)>>,
            diagnostics,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayState;
    use heapless::String;

    struct FakeHardware {
        voltage_seq: std::vec::Vec<u16>,
        current_seq: std::vec::Vec<u16>,
        idx: usize,
        polarity_flag: f32,
        now: u32,
        relay_state: RelayState,
        entries: std::vec::Vec<(u32, f32)>,
    }

    impl FakeHardware {
        fn new(voltage_seq: std::vec::Vec<u16>, current_seq: std::vec::Vec<u16>) -> Self {
            Self {
                voltage_seq,
                current_seq,
                idx: 0,
                polarity_flag: 1.0,
                now: 0,
                relay_state: RelayState::Bleed,
                entries: std::vec::Vec::new(),
            }
        }
    }

    impl Hardware for FakeHardware {
        fn read_adc(&mut self, channel: Channel) -> Result<u16, FirmwareError> {
            let i = self.idx.min(self.voltage_seq.len() - 1);
            self.idx += 1;
            Ok(match channel {
                Channel::Voltage => self.voltage_seq[i],
                Channel::Current => self.current_seq[i],
            })
        }

        fn arm_short(&mut self) -> Result<(), FirmwareError> {
            self.relay_state = RelayState::ShortPresent;
            Ok(())
        }

        fn release_to_capacitor(&mut self) -> Result<(), FirmwareError> {
            self.relay_state = RelayState::Charging;
            Ok(())
        }

        fn return_to_bleed(&mut self) -> Result<(), FirmwareError> {
            self.relay_state = RelayState::Bleed;
            Ok(())
        }

        fn set_primary(&mut self, _active: bool) -> Result<(), FirmwareError> {
            Ok(())
        }

        fn set_secondary(&mut self, _active: bool) -> Result<(), FirmwareError> {
            Ok(())
        }

        fn relay_state(&self) -> RelayState {
            self.relay_state
        }

        fn has_ssr_bypass(&self) -> bool {
            false
        }

        fn now_us(&mut self) -> u32 {
            self.now += 10;
            self.now
        }

        fn read_polarity_flag(&mut self) -> Result<f32, FirmwareError> {
            Ok(self.polarity_flag)
        }

        fn set_polarity(&mut self, _polarity: Polarity) {}

        fn write_entry(&mut self, addr: u32, value: f32) -> Result<(), FirmwareError> {
            self.entries.push((addr, value));
            Ok(())
        }

        fn for_each_entry(&mut self, visit: &mut dyn FnMut(u32, f32)) -> Result<(), FirmwareError> {
            for (offset, value) in &self.entries {
                visit(*offset, *value);
            }
            Ok(())
        }
    }

    struct Recorder(String<4096>);

    impl uWrite for Recorder {
        type Error = core::convert::Infallible;
        fn write_str(&mut self, s: &str) -> Result<(), Self::Error> {
            let _ = self.0.push_str(s);
            Ok(())
        }
    }

    #[test]
    fn handshake_advances_to_idle_on_ready() {
        let hw = FakeHardware::new(vec![0], vec![0]);
        let mut sup: Supervisor<_, 16> = Supervisor::new(hw).unwrap();
        let mut rec = Recorder(String::new());
        sup.handle_line("Ready", &mut rec).unwrap();
        assert_eq!(sup.state(), State::Idle);
    }

    #[test]
    fn config_error_path_reports_expected_and_got() {
        let hw = FakeHardware::new(vec![0], vec![0]);
        let mut sup: Supervisor<_, 16> = Supervisor::new(hw).unwrap();
        let mut rec = Recorder(String::new());
        sup.handle_line("Config CLK_DIV", &mut rec).unwrap();
        assert!(rec.0.as_str().contains("ERROR: Expected 1 args for config type CLK_DIV, got 0"));
        assert!(rec.0.as_str().contains("Config not processed"));
    }

    #[test]
    fn open_circuit_sweep_reports_zero_isc_and_voc() {
        let hw = FakeHardware::new(vec![5; 500], vec![0; 500]);
        let mut sup: Supervisor<_, 275> = Supervisor::new(hw).unwrap();
        let mut rec = Recorder(String::new());
        sup.handle_line("Ready", &mut rec).unwrap();
        sup.handle_line("Go", &mut rec).unwrap();

        let text = rec.0.as_str();
        assert!(text.contains("Isc CH0:0 CH1:0"));
        assert!(text.contains("Voc CH0:0 CH1:0"));
        assert!(text.ends_with("Output complete\n"));
    }
}
