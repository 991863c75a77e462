//! Spectrophotometer model identification

use serde::{Deserialize, Serialize};

/// Raw model codes reported by `GetType` and their display names
const MODELS: &[([u8; 2], &str)] = &[
    (*b"T\x00", "Secomam S250 I+/E+"),
    (*b"T\x01", "Secomam S250 T+"),
    (*b"P\x02", "Secomam Prim Advanced"),
    (*b"P\x01", "Secomam Prim Light"),
];

/// Model identity resolved from the 2-byte code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceModel {
    /// Code found in the model table
    Known {
        /// Marketing name of the model
        display_name: String,
        /// Code as reported
        raw_code: [u8; 2],
    },
    /// Code absent from the table
    Unknown {
        /// Code as reported
        raw_code: [u8; 2],
    },
}

impl DeviceModel {
    /// Resolve a raw code against the model table
    pub fn from_code(raw_code: [u8; 2]) -> Self {
        match MODELS.iter().find(|(code, _)| *code == raw_code) {
            Some((_, name)) => DeviceModel::Known {
                display_name: (*name).to_string(),
                raw_code,
            },
            None => DeviceModel::Unknown { raw_code },
        }
    }

    /// Name to show to the user
    pub fn display_name(&self) -> &str {
        match self {
            DeviceModel::Known { display_name, .. } => display_name,
            DeviceModel::Unknown { .. } => "Unknown model",
        }
    }

    /// Code as reported by the device
    pub fn raw_code(&self) -> [u8; 2] {
        match self {
            DeviceModel::Known { raw_code, .. } | DeviceModel::Unknown { raw_code } => *raw_code,
        }
    }

    /// Whether the code was found in the model table
    pub fn is_known(&self) -> bool {
        matches!(self, DeviceModel::Known { .. })
    }
}

impl std::fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceModel::Known { display_name, .. } => f.write_str(display_name),
            DeviceModel::Unknown { raw_code } => {
                write!(f, "Unknown model ({:02x} {:02x})", raw_code[0], raw_code[1])
            }
        }
    }
}
