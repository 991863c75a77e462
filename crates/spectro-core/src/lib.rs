//! # Spectro Core Library
//!
//! Driver for Secomam S250 and Prim spectrophotometers on a serial line.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The S250 binary protocol (command framing and response decoding)
//! - A serial transport with bounded reads
//! - A single-threaded command dispatcher with strict FIFO ordering
//! - Connection lifecycle management
//! - A callback-based client facade
//! - A simulated instrument for running without hardware
//!
//! ## Supported instruments
//!
//! - Secomam S250 I+/E+ and S250 T+
//! - Secomam Prim Advanced and Prim Light
//!
//! ## Example
//!
//! ```rust,ignore
//! use spectro_core::prelude::*;
//!
//! let (delivery, mut inbox) = ChannelDelivery::new();
//! let spectro = Spectrometer::new(DriverConfig::default()).with_delivery(delivery);
//! spectro.connect("/dev/ttyUSB0")?;
//!
//! spectro.set_wavelength(540, |r| println!("wavelength set: {:?}", r))?;
//! spectro.get_absorbance(|r| println!("absorbance: {:?}", r))?;
//! inbox.pump_timeout(std::time::Duration::from_secs(10));
//! ```

pub mod client;
pub mod config;
pub mod demo;
pub mod driver;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{
        AutotestReport, ChannelDelivery, Delivery, Immediate, Inbox, Spectrometer,
    };
    pub use crate::config::{DeviceCapabilities, DriverConfig};
    pub use crate::demo::{SimulatedOpener, SimulatedSpectrometer, SimulatorControl};
    pub use crate::driver::{S250Driver, SpectroDevice};
    pub use crate::protocol::{
        Command, ConnectionState, DeviceModel, DeviceReading, ProtocolError, Response,
        SpectrumPoint, SpectrumProgress,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
