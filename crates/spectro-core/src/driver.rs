//! Spectrophotometer driver
//!
//! [`S250Driver`] owns the connection: it opens the port, hands the
//! transport to a fresh [`Dispatcher`] and tears both down on disconnect.
//! It is internally synchronized so the facade can share it across threads.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::config::DriverConfig;
use crate::protocol::{
    ConnectionState, Dispatcher, LinkObserver, LinkState, PortOpener, ProtocolError,
    QueuedCommand, SerialPortOpener,
};

/// Operations every spectrophotometer backend provides
pub trait SpectroDevice: Send + Sync {
    /// Open `port_name` and start the command worker.
    ///
    /// Does not talk to the device; issue `Init` afterwards to check it answers.
    fn connect(&self, port_name: &str) -> Result<(), ProtocolError>;

    /// Stop the worker and close the port. Safe to call in any state.
    fn disconnect(&self);

    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// Queue a command; fails with `NotConnected` unless connected
    fn enqueue(&self, job: QueuedCommand) -> Result<(), ProtocolError>;

    /// Settings the driver was built with
    fn config(&self) -> &DriverConfig;
}

/// Driver for Secomam S250 and Prim instruments
pub struct S250Driver {
    opener: Arc<dyn PortOpener>,
    config: DriverConfig,
    link: LinkState,
    dispatcher: Mutex<Option<Dispatcher>>,
    observer: Option<Arc<dyn LinkObserver>>,
}

impl S250Driver {
    /// Driver opening real serial ports
    pub fn new(config: DriverConfig) -> Self {
        Self::with_opener(SerialPortOpener, config)
    }

    /// Driver opening ports through `opener`
    pub fn with_opener(opener: impl PortOpener + 'static, config: DriverConfig) -> Self {
        Self {
            opener: Arc::new(opener),
            config,
            link: LinkState::new(),
            dispatcher: Mutex::new(None),
            observer: None,
        }
    }

    /// Report link traffic to `observer` (applies from the next connect)
    pub fn with_observer(mut self, observer: impl LinkObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Port of the current connection
    pub fn port_name(&self) -> Option<String> {
        self.link.port_name()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Dispatcher>> {
        self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SpectroDevice for S250Driver {
    fn connect(&self, port_name: &str) -> Result<(), ProtocolError> {
        // A worker left behind by a lost transport is reaped outside the lock,
        // its last completion may still be queueing commands.
        let previous = {
            let mut slot = self.slot();
            if self.link.state() != ConnectionState::Disconnected {
                return Err(ProtocolError::AlreadyConnected);
            }
            slot.take()
        };
        if let Some(mut previous) = previous {
            previous.stop();
        }

        let mut slot = self.slot();
        if slot.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }

        self.link.begin_connect(port_name);
        let transport = match self.opener.open(port_name, &self.config.serial) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("driver: opening {} failed: {}", port_name, e);
                self.link.set_disconnected();
                return Err(e);
            }
        };

        let mut dispatcher = Dispatcher::new(
            transport,
            self.link.clone(),
            self.config.dispatcher_config(),
            self.observer.clone(),
        );
        self.link.set_connected();
        if let Err(e) = dispatcher.start() {
            self.link.set_disconnected();
            return Err(e);
        }

        *slot = Some(dispatcher);
        Ok(())
    }

    fn disconnect(&self) {
        let dispatcher = self.slot().take();
        if let Some(mut dispatcher) = dispatcher {
            info!("driver: stopping command worker");
            dispatcher.stop();
        }
        self.link.set_disconnected();
    }

    fn state(&self) -> ConnectionState {
        self.link.state()
    }

    fn enqueue(&self, job: QueuedCommand) -> Result<(), ProtocolError> {
        if !self.link.is_connected() {
            return Err(ProtocolError::NotConnected);
        }
        self.slot()
            .as_ref()
            .ok_or(ProtocolError::NotConnected)?
            .enqueue(job)
    }

    fn config(&self) -> &DriverConfig {
        &self.config
    }
}

impl Drop for S250Driver {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, SerialSettings, Transport};
    use std::time::Duration;

    struct Refusing;

    impl PortOpener for Refusing {
        fn open(
            &self,
            port_name: &str,
            _settings: &SerialSettings,
        ) -> Result<Box<dyn Transport>, ProtocolError> {
            Err(ProtocolError::OpenFailed(port_name.to_string()))
        }
    }

    #[test]
    fn test_failed_open_returns_to_disconnected() {
        let driver = S250Driver::with_opener(Refusing, DriverConfig::default());
        assert!(matches!(
            driver.connect("/dev/ttyUSB0"),
            Err(ProtocolError::OpenFailed(_))
        ));
        assert_eq!(driver.state(), ConnectionState::Disconnected);
        assert!(driver.port_name().is_none());
    }

    #[test]
    fn test_enqueue_requires_connection() {
        let driver = S250Driver::with_opener(Refusing, DriverConfig::default());
        let job = QueuedCommand::new(Command::Init, Duration::from_secs(1), |_| {
            panic!("completion must not run")
        });
        assert!(matches!(driver.enqueue(job), Err(ProtocolError::NotConnected)));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let driver = S250Driver::with_opener(Refusing, DriverConfig::default());
        driver.disconnect();
        driver.disconnect();
        assert_eq!(driver.state(), ConnectionState::Disconnected);
    }
}
