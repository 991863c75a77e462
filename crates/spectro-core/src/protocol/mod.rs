//! Serial Protocol Communication
//!
//! Implements the Secomam S250/Prim binary protocol for spectrophotometer
//! communication.
//!
//! Every command is a single opcode byte, usually preceded by the `ESC`
//! prefix and followed by a fixed payload. Responses are fixed-length and
//! carry no opcode of their own, so they are decoded against the command
//! that was sent.

pub mod codec;
pub mod commands;
mod connection;
pub mod dispatcher;
mod error;
pub mod model;
pub mod serial;
pub mod transport;

pub use codec::{DeviceReading, Response, SpectrumPoint, SpectrumProgress};
pub use commands::{Command, Opcode};
pub use connection::{ConnectionState, LinkState};
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherState, QueuedCommand};
pub use error::ProtocolError;
pub use model::DeviceModel;
pub use serial::{
    list_ports, Parity, PermissionGate, PermissionGatedOpener, PortInfo, PortLister, PortOpener,
    SerialPortOpener, SerialSettings, SystemPorts,
};
pub use transport::{LinkObserver, SerialTransport, Transport};

/// Baud rate fixed by the device firmware
pub const DEFAULT_BAUD_RATE: u32 = 4800;

/// Default timeout for a command response in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Timeout of the second-stage absorbance data fetch in milliseconds
pub const ABS_DATA_TIMEOUT_MS: u64 = 2000;

/// Interval at which an idle worker re-checks its stop flag
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Device absorbance units per absorbance unit
pub const ABSORBANCE_SCALE: f64 = 10_000.0;
