//! Spectrometer client
//!
//! The thread-safe entry point used by the application. Each high-level verb
//! builds one [`Command`], wraps the caller's handlers so they run through
//! the configured [`Delivery`], and queues it on the driver.
//!
//! ```rust,ignore
//! use spectro_core::client::{ChannelDelivery, Spectrometer};
//! use spectro_core::config::DriverConfig;
//!
//! let (delivery, mut inbox) = ChannelDelivery::new();
//! let spectro = Spectrometer::new(DriverConfig::default()).with_delivery(delivery);
//! spectro.connect("/dev/ttyUSB0")?;
//! spectro.start_device(|ready| println!("ready: {:?}", ready))?;
//!
//! // UI loop
//! loop {
//!     inbox.pump();
//! }
//! ```

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::DriverConfig;
use crate::driver::{S250Driver, SpectroDevice};
use crate::protocol::codec::{DeviceReading, SpectrumProgress};
use crate::protocol::commands::{DEFAULT_GAIN, DEFAULT_RESOLUTION_NM, DEFAULT_SPEED};
use crate::protocol::serial::SystemPorts;
use crate::protocol::{
    Command, ConnectionState, DeviceModel, PortLister, PortOpener, ProtocolError, QueuedCommand,
    Response, SpectrumPoint,
};

/// Work handed back to the caller's context
pub type Task = Box<dyn FnOnce() + Send>;

/// Hands completions and progress back to the caller
pub trait Delivery: Send + Sync {
    /// Run `task` in the destination context
    fn deliver(&self, task: Task);
}

/// Runs handlers directly on the command worker.
///
/// Only suitable when the handlers are thread-safe and quick: the next
/// command waits until they return.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Delivery for Immediate {
    fn deliver(&self, task: Task) {
        task();
    }
}

/// Posts handlers to a channel drained by the caller's own loop
#[derive(Debug, Clone)]
pub struct ChannelDelivery {
    tx: Sender<Task>,
}

/// Receiving side of a [`ChannelDelivery`]
pub struct Inbox {
    rx: Receiver<Task>,
}

impl ChannelDelivery {
    /// A delivery and the inbox the caller drains
    pub fn new() -> (Self, Inbox) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, Inbox { rx })
    }
}

impl Delivery for ChannelDelivery {
    fn deliver(&self, task: Task) {
        if self.tx.send(task).is_err() {
            debug!("client: inbox dropped, discarding delivery");
        }
    }
}

impl Inbox {
    /// Run every task already delivered, returning how many ran
    pub fn pump(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for at least one task, then drain the rest
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                1 + self.pump()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Run tasks as they arrive until `done` holds or `timeout` expires.
    /// Returns whether `done` was reached.
    pub fn pump_until(&mut self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump_timeout(deadline - now);
        }
    }
}

/// Autotest outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutotestReport {
    /// Device reported OK
    pub passed: bool,
    /// Raw status byte, zero when passed
    pub code: u8,
}

/// Thread-safe spectrometer front end
pub struct Spectrometer<D: SpectroDevice = S250Driver> {
    device: D,
    delivery: Arc<dyn Delivery>,
}

impl Spectrometer<S250Driver> {
    /// Client for real serial ports
    pub fn new(config: DriverConfig) -> Self {
        Self::from_device(S250Driver::new(config))
    }

    /// Client opening ports through `opener`
    pub fn with_opener(opener: impl PortOpener + 'static, config: DriverConfig) -> Self {
        Self::from_device(S250Driver::with_opener(opener, config))
    }

    /// Ports the desktop platform reports
    pub fn available_ports() -> Vec<String> {
        SystemPorts.list_ports()
    }
}

impl<D: SpectroDevice> Spectrometer<D> {
    /// Client over any device backend
    pub fn from_device(device: D) -> Self {
        Self {
            device,
            delivery: Arc::new(Immediate),
        }
    }

    /// Route completions and progress through `delivery`
    pub fn with_delivery(mut self, delivery: impl Delivery + 'static) -> Self {
        self.delivery = Arc::new(delivery);
        self
    }

    /// Backend driving the link
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Open `port_name` and start the worker
    pub fn connect(&self, port_name: &str) -> Result<(), ProtocolError> {
        self.device.connect(port_name)
    }

    /// Stop the worker and close the port
    pub fn disconnect(&self) {
        self.device.disconnect();
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.device.state()
    }

    /// Whether verbs are accepted
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Queue a raw command; `on_done` runs through the delivery
    pub fn enqueue(
        &self,
        command: Command,
        on_done: impl FnOnce(Result<Response, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        self.submit(command, Some, on_done)
    }

    fn submit<T: Send + 'static>(
        &self,
        command: Command,
        extract: fn(Response) -> Option<T>,
        on_done: impl FnOnce(Result<T, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        let job = QueuedCommand::new(
            command,
            self.device.config().command_timeout(),
            self.completion(command, extract, on_done),
        );
        self.device.enqueue(job)
    }

    fn completion<T: Send + 'static>(
        &self,
        command: Command,
        extract: fn(Response) -> Option<T>,
        on_done: impl FnOnce(Result<T, ProtocolError>) + Send + 'static,
    ) -> impl FnOnce(Result<Response, ProtocolError>) + Send + 'static {
        let delivery = Arc::clone(&self.delivery);
        move |result: Result<Response, ProtocolError>| {
            let typed = result.and_then(|response| {
                extract(response).ok_or(ProtocolError::DecodeFailure {
                    opcode: command.opcode().byte(),
                    bytes: Vec::new(),
                })
            });
            delivery.deliver(Box::new(move || on_done(typed)));
        }
    }

    /// Start the device; `true` when it reports a successful initialization
    pub fn start_device(
        &self,
        on_done: impl FnOnce(Result<bool, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        self.submit(
            Command::Init,
            |r| match r {
                Response::Initialized(ok) => Some(ok),
                _ => None,
            },
            on_done,
        )
    }

    /// Check the device is up; same exchange as [`Self::start_device`]
    pub fn is_device_ready(
        &self,
        on_done: impl FnOnce(Result<bool, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        self.start_device(on_done)
    }

    /// Read the PROM version
    pub fn get_firmware_version(
        &self,
        on_done: impl FnOnce(Result<u8, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        self.submit(
            Command::Firmware,
            |r| match r {
                Response::FirmwareVersion(v) => Some(v),
                _ => None,
            },
            on_done,
        )
    }

    /// Identify the instrument model
    pub fn get_model_name(
        &self,
        on_done: impl FnOnce(Result<DeviceModel, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        self.submit(
            Command::GetModel,
            |r| match r {
                Response::Model(model) => Some(model),
                _ => None,
            },
            on_done,
        )
    }

    /// Run the built-in autotest
    pub fn perform_autotest(
        &self,
        on_done: impl FnOnce(Result<AutotestReport, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        self.submit(
            Command::Autotest,
            |r| match r {
                Response::Autotest { passed, code } => Some(AutotestReport { passed, code }),
                _ => None,
            },
            on_done,
        )
    }

    /// Select the absorbance wavelength with the default gain
    pub fn set_wavelength(
        &self,
        wavelength_nm: u16,
        on_done: impl FnOnce(Result<bool, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        self.set_wavelength_with_gain(wavelength_nm, DEFAULT_GAIN, on_done)
    }

    /// Select the absorbance wavelength with an explicit gain
    pub fn set_wavelength_with_gain(
        &self,
        wavelength_nm: u16,
        gain: u8,
        on_done: impl FnOnce(Result<bool, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        self.device
            .config()
            .capabilities
            .check_wavelength(wavelength_nm)?;
        self.submit(
            Command::SetWavelength {
                wavelength_nm,
                gain,
            },
            |r| match r {
                Response::WavelengthSet(ok) => Some(ok),
                _ => None,
            },
            on_done,
        )
    }

    /// Measure absorbance at the selected wavelength
    pub fn get_absorbance(
        &self,
        on_done: impl FnOnce(Result<DeviceReading, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        self.submit(
            Command::GetAbsorbance,
            |r| match r {
                Response::Absorbance(reading) => Some(reading),
                _ => None,
            },
            on_done,
        )
    }

    /// Measure the blank
    pub fn get_absorbance_zero(
        &self,
        on_done: impl FnOnce(Result<DeviceReading, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        self.submit(
            Command::GetZero,
            |r| match r {
                Response::Zero(reading) => Some(reading),
                _ => None,
            },
            on_done,
        )
    }

    /// Baseline over `start_nm..=end_nm` at default resolution and speed
    pub fn make_baseline(
        &self,
        start_nm: u16,
        end_nm: u16,
        on_done: impl FnOnce(Result<bool, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        self.make_baseline_with(start_nm, end_nm, DEFAULT_RESOLUTION_NM, DEFAULT_SPEED, on_done)
    }

    /// Baseline with explicit resolution and sweep speed
    pub fn make_baseline_with(
        &self,
        start_nm: u16,
        end_nm: u16,
        resolution_nm: u8,
        speed: u8,
        on_done: impl FnOnce(Result<bool, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        self.device
            .config()
            .capabilities
            .check_baseline(start_nm, end_nm, resolution_nm, speed)?;
        self.submit(
            Command::Baseline {
                start_nm,
                end_nm,
                resolution_nm,
                speed,
            },
            |r| match r {
                Response::Baseline(ok) => Some(ok),
                _ => None,
            },
            on_done,
        )
    }

    /// Acquire a spectrum, reporting each sample to `on_progress` before
    /// `on_done` receives the whole spectrum
    pub fn get_spectrum(
        &self,
        on_progress: impl FnMut(SpectrumProgress) + Send + 'static,
        on_done: impl FnOnce(Result<Vec<SpectrumPoint>, ProtocolError>) + Send + 'static,
    ) -> Result<(), ProtocolError> {
        let command = Command::GetSpectrum;
        let completion = self.completion(
            command,
            |r| match r {
                Response::Spectrum(points) => Some(points),
                _ => None,
            },
            on_done,
        );

        let delivery = Arc::clone(&self.delivery);
        let on_progress = Arc::new(Mutex::new(on_progress));
        let job = QueuedCommand::new(command, self.device.config().command_timeout(), completion)
            .with_progress(move |progress| {
                let on_progress = Arc::clone(&on_progress);
                delivery.deliver(Box::new(move || {
                    let mut report = on_progress.lock().unwrap_or_else(PoisonError::into_inner);
                    (*report)(progress);
                }));
            });
        self.device.enqueue(job)
    }

    /// Stop the device; the outcome is only logged
    pub fn stop_device(&self) -> Result<(), ProtocolError> {
        self.submit(
            Command::Stop,
            |r| match r {
                Response::Stopped => Some(()),
                _ => None,
            },
            |result| debug!("client: stop -> {:?}", result),
        )
    }
}
