//! Response decoding
//!
//! Responses carry no opcode, so each frame is decoded with the rule of the
//! command that was sent. Decoding never runs on a frame whose length differs
//! from the expected one.
//!
//! Multi-byte fields are big-endian. Absorbance values are signed 16-bit
//! device units scaled by 1/10000.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use super::commands::{
    ABS_DATA_LEN, ANS_ABS_OK, ANS_AUTOTEST_OK, ANS_BASELINE_OK, ANS_INIT_NOK, ANS_INIT_OK,
    ANS_SET_WAVELENGTH_OK, SPECTRUM_SAMPLE_LEN,
};
use super::{Command, DeviceModel, ProtocolError, ABSORBANCE_SCALE};

/// A single absorbance measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    /// Wavelength the measurement was taken at, when known
    pub wavelength_nm: Option<u16>,
    /// Absorbance units
    pub value: f64,
}

/// One point of an acquired spectrum
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumPoint {
    /// Wavelength of the sample
    pub wavelength_nm: u16,
    /// Absorbance units
    pub absorbance: f64,
}

/// Spectrum header returned by `GetSpectrum`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectrumHeader {
    /// Wavelength of the first sample
    pub start_nm: u16,
    /// Samples that follow the header
    pub count: u16,
}

/// Progress of a spectrum acquisition, reported after each sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumProgress {
    /// Percentage of samples received so far
    pub percent: u8,
    /// Wavelength of the sample just received
    pub wavelength_nm: u16,
    /// Its absorbance
    pub absorbance: f64,
}

/// Decoded result of a completed command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Init answered OK (`true`) or NOK (`false`)
    Initialized(bool),
    /// PROM version
    FirmwareVersion(u8),
    /// Autotest outcome with the raw result code
    Autotest {
        /// Code was OK
        passed: bool,
        /// Raw result code
        code: u8,
    },
    /// Wavelength acknowledged
    WavelengthSet(bool),
    /// Blank reading
    Zero(DeviceReading),
    /// Sample reading
    Absorbance(DeviceReading),
    /// Baseline sweep acknowledged
    Baseline(bool),
    /// Every sample of the spectrum, in wavelength order
    Spectrum(Vec<SpectrumPoint>),
    /// Model reported by the device
    Model(DeviceModel),
    /// Stop sent; the device does not answer
    Stopped,
}

/// Outcome of decoding the first response of a command
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Nothing else to read
    Complete(Response),
    /// Ack OK, absorbance data must be fetched next
    FetchAbsorbance,
    /// Header received, `count` samples follow
    FetchSpectrum(SpectrumHeader),
}

/// Reject any frame whose length differs from the expected one
pub fn check_length(expected: usize, bytes: &[u8]) -> Result<(), ProtocolError> {
    if bytes.len() != expected {
        return Err(ProtocolError::LengthMismatch {
            expected,
            received: bytes.len(),
        });
    }
    Ok(())
}

fn decode_failure(command: &Command, bytes: &[u8]) -> ProtocolError {
    ProtocolError::DecodeFailure {
        opcode: command.opcode().byte(),
        bytes: bytes.to_vec(),
    }
}

/// Decode the first response frame of `command`
pub fn decode(command: &Command, bytes: &[u8]) -> Result<Decoded, ProtocolError> {
    check_length(command.expected_response_len(), bytes)?;

    let response = match command {
        Command::Init => match bytes[0] {
            ANS_INIT_OK => Response::Initialized(true),
            ANS_INIT_NOK => Response::Initialized(false),
            _ => return Err(decode_failure(command, bytes)),
        },
        Command::Firmware => Response::FirmwareVersion(bytes[1]),
        Command::Autotest => Response::Autotest {
            passed: bytes[0] == ANS_AUTOTEST_OK,
            code: bytes[0],
        },
        Command::SetWavelength { .. } => Response::WavelengthSet(bytes[0] == ANS_SET_WAVELENGTH_OK),
        Command::GetZero | Command::GetAbsorbance => {
            if bytes[0] != ANS_ABS_OK {
                return Err(ProtocolError::Rejected {
                    opcode: command.opcode().byte(),
                    ack: bytes[0],
                });
            }
            return Ok(Decoded::FetchAbsorbance);
        }
        Command::Baseline { .. } => Response::Baseline(bytes[0] == ANS_BASELINE_OK),
        Command::GetSpectrum => {
            return Ok(Decoded::FetchSpectrum(decode_spectrum_header(bytes)?));
        }
        Command::GetModel => Response::Model(DeviceModel::from_code([bytes[0], bytes[1]])),
        Command::Stop => Response::Stopped,
    };

    Ok(Decoded::Complete(response))
}

/// Decode the 7-byte spectrum header: `xx xx start(u16) count(u16) xx`
pub fn decode_spectrum_header(bytes: &[u8]) -> Result<SpectrumHeader, ProtocolError> {
    check_length(super::commands::SPECTRUM_HEADER_LEN, bytes)?;
    Ok(SpectrumHeader {
        start_nm: BigEndian::read_u16(&bytes[2..4]),
        count: BigEndian::read_u16(&bytes[4..6]),
    })
}

/// Decode the 3-byte absorbance data: one ignored byte then a signed 16-bit value
pub fn decode_absorbance_data(bytes: &[u8]) -> Result<f64, ProtocolError> {
    check_length(ABS_DATA_LEN, bytes)?;
    Ok(scale_absorbance(BigEndian::read_i16(&bytes[1..3])))
}

/// Decode one 2-byte spectrum sample
pub fn decode_spectrum_sample(bytes: &[u8]) -> Result<f64, ProtocolError> {
    check_length(SPECTRUM_SAMPLE_LEN, bytes)?;
    Ok(scale_absorbance(BigEndian::read_i16(bytes)))
}

/// Convert device units to absorbance
pub fn scale_absorbance(raw: i16) -> f64 {
    f64::from(raw) / ABSORBANCE_SCALE
}

/// Percentage reported after sample `index` (0-based) of `count`
pub fn progress_percent(index: usize, count: usize) -> u8 {
    if count == 0 {
        return 100;
    }
    (((index + 1) * 100 + count / 2) / count).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_init_decoding() {
        assert_eq!(
            decode(&Command::Init, &[0x4F]).unwrap(),
            Decoded::Complete(Response::Initialized(true))
        );
        assert_eq!(
            decode(&Command::Init, &[0x4E]).unwrap(),
            Decoded::Complete(Response::Initialized(false))
        );
        assert!(matches!(
            decode(&Command::Init, &[0x00]),
            Err(ProtocolError::DecodeFailure { opcode: 0x5A, .. })
        ));
    }

    #[test]
    fn test_firmware_uses_second_byte() {
        assert_eq!(
            decode(&Command::Firmware, &[0x01, 0x2A]).unwrap(),
            Decoded::Complete(Response::FirmwareVersion(42))
        );
    }

    #[test]
    fn test_autotest_reports_code() {
        assert_eq!(
            decode(&Command::Autotest, &[0x00]).unwrap(),
            Decoded::Complete(Response::Autotest {
                passed: true,
                code: 0
            })
        );
        assert_eq!(
            decode(&Command::Autotest, &[0x85]).unwrap(),
            Decoded::Complete(Response::Autotest {
                passed: false,
                code: 0x85
            })
        );
    }

    #[test]
    fn test_absorbance_ack() {
        assert_eq!(
            decode(&Command::GetAbsorbance, &[0x54]).unwrap(),
            Decoded::FetchAbsorbance
        );
        assert!(matches!(
            decode(&Command::GetZero, &[0x4E]),
            Err(ProtocolError::Rejected {
                opcode: 0x30,
                ack: 0x4E
            })
        ));
    }

    #[test]
    fn test_length_mismatch_wins_over_content() {
        for bytes in [&[][..], &[0x4F, 0x4F][..], &[0x4F, 0x00, 0x00][..]] {
            assert!(matches!(
                decode(&Command::Init, bytes),
                Err(ProtocolError::LengthMismatch { expected: 1, .. })
            ));
        }
        assert!(matches!(
            decode(&Command::GetSpectrum, &[0; 6]),
            Err(ProtocolError::LengthMismatch {
                expected: 7,
                received: 6
            })
        ));
    }

    #[test]
    fn test_absorbance_scaling() {
        assert_eq!(decode_absorbance_data(&[0x00, 0x30, 0x39]).unwrap(), 1.2345);
        assert_eq!(decode_absorbance_data(&[0xFF, 0xFE, 0x0C]).unwrap(), -0.05);
        assert_eq!(decode_spectrum_sample(&[0x03, 0xE8]).unwrap(), 0.1);
    }

    #[test]
    fn test_spectrum_header() {
        let header = [0x00, 0x00, 0x01, 0x4A, 0x00, 0x03, 0x00];
        assert_eq!(
            decode(&Command::GetSpectrum, &header).unwrap(),
            Decoded::FetchSpectrum(SpectrumHeader {
                start_nm: 330,
                count: 3
            })
        );
    }

    #[test]
    fn test_model_lookup() {
        assert_eq!(
            decode(&Command::GetModel, b"T\x00").unwrap(),
            Decoded::Complete(Response::Model(DeviceModel::from_code(*b"T\x00")))
        );
        assert_eq!(
            decode(&Command::GetModel, &[0xAA, 0xBB]).unwrap(),
            Decoded::Complete(Response::Model(DeviceModel::Unknown {
                raw_code: [0xAA, 0xBB]
            }))
        );
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 3), 33);
        assert_eq!(progress_percent(1, 3), 67);
        assert_eq!(progress_percent(2, 3), 100);
        assert_eq!(progress_percent(0, 1), 100);
    }
}
