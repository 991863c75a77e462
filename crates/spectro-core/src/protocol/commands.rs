//! Protocol commands
//!
//! Defines the commands supported by the S250/Prim protocol and how each one
//! is framed on the wire: `[prefix] opcode [payload]`.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

/// Escape byte sent before most opcodes
pub const CMD_PREFIX: u8 = 0x1B;

/// Init accepted
pub const ANS_INIT_OK: u8 = 0x4F;
/// Init refused
pub const ANS_INIT_NOK: u8 = 0x4E;
/// Autotest passed
pub const ANS_AUTOTEST_OK: u8 = 0x00;
/// Wavelength accepted
pub const ANS_SET_WAVELENGTH_OK: u8 = 0x1B;
/// Absorbance (or zero) measured, data ready to fetch
pub const ANS_ABS_OK: u8 = 0x54;
/// Baseline sweep done
pub const ANS_BASELINE_OK: u8 = 0x1B;

/// Length of the absorbance data fetched after an OK ack
pub const ABS_DATA_LEN: usize = 3;
/// Length of the spectrum header
pub const SPECTRUM_HEADER_LEN: usize = 7;
/// Length of one spectrum sample
pub const SPECTRUM_SAMPLE_LEN: usize = 2;

/// Default gain for absorbance wavelength selection
pub const DEFAULT_GAIN: u8 = 255;
/// Default baseline resolution in nm
pub const DEFAULT_RESOLUTION_NM: u8 = 3;
/// Fastest baseline sweep speed
pub const DEFAULT_SPEED: u8 = 8;

/// Single-byte opcodes shared with the device firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Initialize (sent without prefix)
    Init,
    /// PROM version
    Firmware,
    /// Built-in autotest
    Autotest,
    /// Select wavelength
    SetAbsWavelength,
    /// Blank measurement
    GetZeroAbs,
    /// Sample measurement
    GetAbs,
    /// Fetch the measured value (sent without prefix)
    GetAbsData,
    /// Baseline sweep
    BaseLine,
    /// Spectrum acquisition
    GetSpectrum,
    /// Model code
    GetType,
    /// Stop the instrument
    Stop,
}

impl Opcode {
    /// Wire value of the opcode
    pub fn byte(&self) -> u8 {
        match self {
            Opcode::Init => 0x5A,
            Opcode::Firmware => 0x22,
            Opcode::Autotest => 0x33,
            Opcode::SetAbsWavelength => 0x31,
            Opcode::GetZeroAbs => 0x30,
            Opcode::GetAbs => 0x32,
            Opcode::GetAbsData => 0x45,
            Opcode::BaseLine => 0x34,
            Opcode::GetSpectrum => 0x35,
            Opcode::GetType => 0x51,
            Opcode::Stop => 0xE7,
        }
    }

    /// Look up an opcode from its wire value
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x5A => Opcode::Init,
            0x22 => Opcode::Firmware,
            0x33 => Opcode::Autotest,
            0x31 => Opcode::SetAbsWavelength,
            0x30 => Opcode::GetZeroAbs,
            0x32 => Opcode::GetAbs,
            0x45 => Opcode::GetAbsData,
            0x34 => Opcode::BaseLine,
            0x35 => Opcode::GetSpectrum,
            0x51 => Opcode::GetType,
            0xE7 => Opcode::Stop,
            _ => return None,
        })
    }
}

/// A device command, one variant per verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Start the device and check its initialization
    Init,

    /// Read the PROM version
    Firmware,

    /// Run the built-in autotest
    Autotest,

    /// Select the wavelength used for absorbance and kinetics
    SetWavelength {
        /// Target wavelength
        wavelength_nm: u16,
        /// Detector gain byte
        gain: u8,
    },

    /// Measure the absorbance zero (blank)
    GetZero,

    /// Measure absorbance at the selected wavelength
    GetAbsorbance,

    /// Sweep a baseline over a wavelength range
    Baseline {
        /// First wavelength of the sweep
        start_nm: u16,
        /// Last wavelength of the sweep
        end_nm: u16,
        /// Step between samples
        resolution_nm: u8,
        /// Sweep speed, 1 (slow) to 8 (fast)
        speed: u8,
    },

    /// Acquire a spectrum over the last baseline range
    GetSpectrum,

    /// Read the model code
    GetModel,

    /// Stop the device
    Stop,
}

impl Command {
    /// Opcode sent for this command
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Init => Opcode::Init,
            Command::Firmware => Opcode::Firmware,
            Command::Autotest => Opcode::Autotest,
            Command::SetWavelength { .. } => Opcode::SetAbsWavelength,
            Command::GetZero => Opcode::GetZeroAbs,
            Command::GetAbsorbance => Opcode::GetAbs,
            Command::Baseline { .. } => Opcode::BaseLine,
            Command::GetSpectrum => Opcode::GetSpectrum,
            Command::GetModel => Opcode::GetType,
            Command::Stop => Opcode::Stop,
        }
    }

    /// Prefix byte, if the opcode takes one
    pub fn prefix(&self) -> Option<u8> {
        match self {
            Command::Init => None,
            _ => Some(CMD_PREFIX),
        }
    }

    /// Payload bytes following the opcode
    pub fn payload(&self) -> Vec<u8> {
        match *self {
            Command::SetWavelength {
                wavelength_nm,
                gain,
            } => {
                // wl (BE u16), two reserved bytes, gain
                let mut buf = vec![0u8; 5];
                BigEndian::write_u16(&mut buf[0..2], wavelength_nm);
                buf[4] = gain;
                buf
            }
            Command::Baseline {
                start_nm,
                end_nm,
                resolution_nm,
                speed,
            } => {
                // start, end (BE u16), resolution, speed, two reserved bytes
                let mut buf = vec![0u8; 8];
                BigEndian::write_u16(&mut buf[0..2], start_nm);
                BigEndian::write_u16(&mut buf[2..4], end_nm);
                buf[4] = resolution_nm;
                buf[5] = speed;
                buf
            }
            _ => Vec::new(),
        }
    }

    /// Encode the full frame written to the transport
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut frame = Vec::with_capacity(2 + payload.len());
        if let Some(prefix) = self.prefix() {
            frame.push(prefix);
        }
        frame.push(self.opcode().byte());
        frame.extend_from_slice(&payload);
        frame
    }

    /// Number of bytes of the first response
    pub fn expected_response_len(&self) -> usize {
        match self {
            Command::Firmware | Command::GetModel => 2,
            Command::GetSpectrum => SPECTRUM_HEADER_LEN,
            Command::Stop => 0,
            _ => 1,
        }
    }

    /// Whether an OK ack is followed by a bare `GetAbsData` fetch
    pub fn fetches_absorbance_data(&self) -> bool {
        matches!(self, Command::GetZero | Command::GetAbsorbance)
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init => "init",
            Command::Firmware => "firmware",
            Command::Autotest => "autotest",
            Command::SetWavelength { .. } => "set_wavelength",
            Command::GetZero => "get_zero",
            Command::GetAbsorbance => "get_absorbance",
            Command::Baseline { .. } => "baseline",
            Command::GetSpectrum => "get_spectrum",
            Command::GetModel => "get_model",
            Command::Stop => "stop",
        }
    }
}

/// Frame of the second-stage absorbance fetch (sent without prefix)
pub fn absorbance_data_frame() -> Vec<u8> {
    vec![Opcode::GetAbsData.byte()]
}
