//! Demo Mode - Simulated spectrophotometer for testing
//!
//! Answers the S250 protocol without hardware. The sample in the cell has a
//! single absorption band around 520 nm, and readings carry a little noise.

use byteorder::{BigEndian, ByteOrder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::protocol::commands::{
    ANS_ABS_OK, ANS_AUTOTEST_OK, ANS_BASELINE_OK, ANS_INIT_OK, ANS_SET_WAVELENGTH_OK, CMD_PREFIX,
};
use crate::protocol::{
    Opcode, PortLister, PortOpener, ProtocolError, SerialSettings, Transport, ABSORBANCE_SCALE,
};

/// Peak of the simulated absorption band
const BAND_CENTER_NM: f64 = 520.0;
const BAND_WIDTH_NM: f64 = 40.0;
const BAND_HEIGHT: f64 = 0.8;
/// Absorbance of the empty cell
const CELL_OFFSET: f64 = 0.05;

/// Knobs shared between a test and the simulator it handed to the driver
#[derive(Debug, Default)]
pub struct SimulatorControl {
    silent: AtomicBool,
    unplugged: AtomicBool,
    frames: Mutex<Vec<Vec<u8>>>,
}

impl SimulatorControl {
    /// Shared control for a simulator and its test
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stop answering (reads time out)
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Make every further I/O fail as if the cable was pulled
    pub fn unplug(&self) {
        self.unplugged.store(true, Ordering::SeqCst);
    }

    /// Restore the link after [`Self::unplug`]
    pub fn replug(&self) {
        self.unplugged.store(false, Ordering::SeqCst);
    }

    /// Every frame written so far, in order
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, frame: &[u8]) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.to_vec());
    }
}

/// Which measurement an OK ack announced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingFetch {
    Zero,
    Absorbance,
}

/// Simulated S250 implementing [`Transport`]
pub struct SimulatedSpectrometer {
    control: Arc<SimulatorControl>,
    output: VecDeque<u8>,
    firmware_version: u8,
    model_code: [u8; 2],
    wavelength_nm: u16,
    baseline: (u16, u16),
    zero: f64,
    pending: Option<PendingFetch>,
    /// Noise amplitude in device units
    noise: i16,
    rng: StdRng,
}

impl SimulatedSpectrometer {
    /// An S250 I+/E+ with firmware 12
    pub fn new(control: Arc<SimulatorControl>) -> Self {
        Self {
            control,
            output: VecDeque::new(),
            firmware_version: 12,
            model_code: *b"T\x00",
            wavelength_nm: 540,
            baseline: (330, 900),
            zero: 0.0,
            pending: None,
            noise: 5,
            rng: StdRng::from_entropy(),
        }
    }

    /// Report another PROM version
    pub fn with_firmware_version(mut self, version: u8) -> Self {
        self.firmware_version = version;
        self
    }

    /// Report another model code
    pub fn with_model_code(mut self, code: [u8; 2]) -> Self {
        self.model_code = code;
        self
    }

    /// Noise-free readings
    pub fn without_noise(mut self) -> Self {
        self.noise = 0;
        self
    }

    /// Absorbance of the sample at `wavelength_nm`, before zeroing
    pub fn sample_absorbance(wavelength_nm: u16) -> f64 {
        let x = (f64::from(wavelength_nm) - BAND_CENTER_NM) / BAND_WIDTH_NM;
        CELL_OFFSET + BAND_HEIGHT * (-x * x).exp()
    }

    fn to_device_units(&mut self, absorbance: f64) -> i16 {
        let noise = if self.noise > 0 {
            self.rng.gen_range(-self.noise..=self.noise)
        } else {
            0
        };
        let raw = (absorbance * ABSORBANCE_SCALE).round() + f64::from(noise);
        raw.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
    }

    fn push_i16(&mut self, value: i16) {
        let mut buf = [0u8; 2];
        BigEndian::write_i16(&mut buf, value);
        self.output.extend(buf);
    }

    fn respond(&mut self, frame: &[u8]) {
        let body = match frame.split_first() {
            Some((&CMD_PREFIX, rest)) => rest,
            _ => frame,
        };
        let Some((&opcode, payload)) = body.split_first() else {
            return;
        };
        let Some(opcode) = Opcode::from_byte(opcode) else {
            return;
        };

        match opcode {
            Opcode::Init => self.output.push_back(ANS_INIT_OK),
            Opcode::Firmware => self.output.extend([0x00, self.firmware_version]),
            Opcode::Autotest => self.output.push_back(ANS_AUTOTEST_OK),
            Opcode::SetAbsWavelength if payload.len() == 5 => {
                self.wavelength_nm = BigEndian::read_u16(&payload[0..2]);
                self.output.push_back(ANS_SET_WAVELENGTH_OK);
            }
            Opcode::GetZeroAbs => {
                self.pending = Some(PendingFetch::Zero);
                self.output.push_back(ANS_ABS_OK);
            }
            Opcode::GetAbs => {
                self.pending = Some(PendingFetch::Absorbance);
                self.output.push_back(ANS_ABS_OK);
            }
            Opcode::GetAbsData => {
                let raw = Self::sample_absorbance(self.wavelength_nm);
                let value = match self.pending.take() {
                    Some(PendingFetch::Zero) => {
                        self.zero = raw;
                        0.0
                    }
                    Some(PendingFetch::Absorbance) => raw - self.zero,
                    None => return,
                };
                let units = self.to_device_units(value);
                self.output.push_back(0x00);
                self.push_i16(units);
            }
            Opcode::BaseLine if payload.len() == 8 => {
                self.baseline = (
                    BigEndian::read_u16(&payload[0..2]),
                    BigEndian::read_u16(&payload[2..4]),
                );
                self.output.push_back(ANS_BASELINE_OK);
            }
            Opcode::GetSpectrum => {
                let (start, end) = self.baseline;
                let count = end.saturating_sub(start).saturating_add(1);
                let mut header = [0u8; 7];
                BigEndian::write_u16(&mut header[2..4], start);
                BigEndian::write_u16(&mut header[4..6], count);
                self.output.extend(header);
                for index in 0..count {
                    let value = Self::sample_absorbance(start + index);
                    let units = self.to_device_units(value);
                    self.push_i16(units);
                }
            }
            Opcode::GetType => {
                let code = self.model_code;
                self.output.extend(code);
            }
            // Stop has no answer; malformed payloads are ignored like the firmware does
            _ => {}
        }
    }

    fn check_plugged(&self) -> Result<(), ProtocolError> {
        if self.control.unplugged.load(Ordering::SeqCst) {
            return Err(ProtocolError::Transport("simulated device unplugged".into()));
        }
        Ok(())
    }
}

impl Transport for SimulatedSpectrometer {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        self.check_plugged()?;
        self.control.record(bytes);
        if !self.control.silent.load(Ordering::SeqCst) {
            self.respond(bytes);
        }
        Ok(bytes.len())
    }

    fn read(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        self.check_plugged()?;
        if self.output.len() < n {
            // Nothing more is coming; behave like a port waiting out its timeout
            std::thread::sleep(timeout);
        }
        let take = n.min(self.output.len());
        Ok(self.output.drain(..take).collect())
    }

    fn discard_input(&mut self) -> Result<(), ProtocolError> {
        self.check_plugged()?;
        self.output.clear();
        Ok(())
    }
}

/// Opener handing out simulated instruments on a fixed set of port names
pub struct SimulatedOpener {
    ports: Vec<String>,
    control: Arc<SimulatorControl>,
    opens: AtomicUsize,
    noise: bool,
}

impl SimulatedOpener {
    /// Opener exposing the single port `sim0`
    pub fn new(control: Arc<SimulatorControl>) -> Self {
        Self {
            ports: vec!["sim0".to_string()],
            control,
            opens: AtomicUsize::new(0),
            noise: true,
        }
    }

    /// Simulated instruments answer without noise
    pub fn without_noise(mut self) -> Self {
        self.noise = false;
        self
    }

    /// Number of successful opens so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl PortLister for SimulatedOpener {
    fn list_ports(&self) -> Vec<String> {
        self.ports.clone()
    }
}

impl PortOpener for SimulatedOpener {
    fn open(
        &self,
        port_name: &str,
        settings: &SerialSettings,
    ) -> Result<Box<dyn Transport>, ProtocolError> {
        settings.validate()?;
        if !self.ports.iter().any(|p| p == port_name) {
            return Err(ProtocolError::PortNotFound(port_name.to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let device = SimulatedSpectrometer::new(Arc::clone(&self.control));
        Ok(Box::new(if self.noise {
            device
        } else {
            device.without_noise()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{self, Decoded, Response};
    use crate::protocol::Command;

    fn exchange(sim: &mut SimulatedSpectrometer, command: Command) -> Vec<u8> {
        sim.write(&command.encode()).unwrap();
        sim.read(command.expected_response_len(), Duration::ZERO)
            .unwrap()
    }

    #[test]
    fn test_answers_identity() {
        let mut sim = SimulatedSpectrometer::new(SimulatorControl::new())
            .with_firmware_version(7)
            .without_noise();
        let bytes = exchange(&mut sim, Command::Init);
        assert_eq!(
            codec::decode(&Command::Init, &bytes).unwrap(),
            Decoded::Complete(Response::Initialized(true))
        );
        let bytes = exchange(&mut sim, Command::Firmware);
        assert_eq!(bytes, vec![0x00, 7]);
        assert_eq!(exchange(&mut sim, Command::GetModel), b"T\x00".to_vec());
    }

    #[test]
    fn test_absorbance_relative_to_zero() {
        let mut sim = SimulatedSpectrometer::new(SimulatorControl::new()).without_noise();
        exchange(
            &mut sim,
            Command::SetWavelength {
                wavelength_nm: 520,
                gain: 255,
            },
        );
        assert_eq!(exchange(&mut sim, Command::GetZero), vec![ANS_ABS_OK]);
        sim.write(&[Opcode::GetAbsData.byte()]).unwrap();
        let zero = sim.read(3, Duration::ZERO).unwrap();
        assert_eq!(codec::decode_absorbance_data(&zero).unwrap(), 0.0);
    }

    #[test]
    fn test_spectrum_follows_baseline() {
        let mut sim = SimulatedSpectrometer::new(SimulatorControl::new()).without_noise();
        exchange(
            &mut sim,
            Command::Baseline {
                start_nm: 500,
                end_nm: 504,
                resolution_nm: 3,
                speed: 8,
            },
        );
        let header = exchange(&mut sim, Command::GetSpectrum);
        let header = codec::decode_spectrum_header(&header).unwrap();
        assert_eq!((header.start_nm, header.count), (500, 5));
        let samples = sim.read(10, Duration::ZERO).unwrap();
        assert_eq!(samples.len(), 10);
    }

    #[test]
    fn test_silent_and_unplugged() {
        let control = SimulatorControl::new();
        let mut sim = SimulatedSpectrometer::new(Arc::clone(&control));
        control.set_silent(true);
        assert!(exchange(&mut sim, Command::Init).is_empty());

        control.unplug();
        assert!(matches!(
            sim.write(&Command::Init.encode()),
            Err(ProtocolError::Transport(_))
        ));
        assert_eq!(control.frames().len(), 1);
    }

    #[test]
    fn test_opener_knows_its_ports() {
        let opener = SimulatedOpener::new(SimulatorControl::new());
        assert_eq!(opener.list_ports(), vec!["sim0".to_string()]);
        assert!(matches!(
            opener.open("COM9", &SerialSettings::default()),
            Err(ProtocolError::PortNotFound(_))
        ));
        assert!(opener.open("sim0", &SerialSettings::default()).is_ok());
        assert_eq!(opener.open_count(), 1);
    }
}
