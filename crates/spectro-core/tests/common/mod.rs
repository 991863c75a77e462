//! Shared mocks for the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spectro_core::config::DriverConfig;
use spectro_core::protocol::{LinkObserver, PortOpener, ProtocolError, SerialSettings, Transport};

/// What the scripted port does when it receives a frame
#[derive(Debug, Clone)]
pub enum Reply {
    /// Queue these bytes for reading
    Bytes(Vec<u8>),
    /// Answer nothing; reads wait out their timeout
    Silent,
    /// Fail the write as if the cable was pulled
    Unplug,
}

/// Frames written to a [`ScriptedPort`], readable after it moved into the worker
#[derive(Debug, Clone, Default)]
pub struct Wire(Arc<Mutex<Vec<Vec<u8>>>>);

impl Wire {
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().clone()
    }
}

/// Transport answering each written frame with the next scripted reply
pub struct ScriptedPort {
    replies: VecDeque<Reply>,
    pending: VecDeque<u8>,
    wire: Wire,
    unplugged: bool,
    close_delay: Duration,
}

impl ScriptedPort {
    pub fn new(replies: Vec<Reply>) -> (Self, Wire) {
        let wire = Wire::default();
        let port = Self {
            replies: replies.into(),
            pending: VecDeque::new(),
            wire: wire.clone(),
            unplugged: false,
            close_delay: Duration::ZERO,
        };
        (port, wire)
    }

    /// Shorthand for a script of plain byte replies
    pub fn answering(replies: &[&[u8]]) -> (Self, Wire) {
        Self::new(replies.iter().map(|r| Reply::Bytes(r.to_vec())).collect())
    }

    /// Take `delay` to close, like a USB adapter going away
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }
}

impl Drop for ScriptedPort {
    fn drop(&mut self) {
        if !self.close_delay.is_zero() {
            std::thread::sleep(self.close_delay);
        }
    }
}

impl Transport for ScriptedPort {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        if self.unplugged {
            return Err(ProtocolError::Transport("port vanished".into()));
        }
        match self.replies.pop_front() {
            Some(Reply::Unplug) => {
                self.unplugged = true;
                return Err(ProtocolError::Transport("port vanished".into()));
            }
            Some(Reply::Bytes(reply)) => self.pending.extend(reply),
            Some(Reply::Silent) | None => {}
        }
        self.wire.0.lock().unwrap().push(bytes.to_vec());
        Ok(bytes.len())
    }

    fn read(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        if self.pending.len() < n {
            std::thread::sleep(timeout);
        }
        let take = n.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }

    fn discard_input(&mut self) -> Result<(), ProtocolError> {
        self.pending.clear();
        Ok(())
    }
}

/// Opener handing out prepared ports, one per successful open
#[derive(Default)]
pub struct ScriptedOpener {
    ports: Mutex<VecDeque<ScriptedPort>>,
    opens: Arc<AtomicUsize>,
}

impl ScriptedOpener {
    pub fn new(ports: Vec<ScriptedPort>) -> Self {
        Self {
            ports: Mutex::new(ports.into()),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of successful opens, usable after the opener moved into a driver
    pub fn opens(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }
}

impl PortOpener for ScriptedOpener {
    fn open(
        &self,
        port_name: &str,
        _settings: &SerialSettings,
    ) -> Result<Box<dyn Transport>, ProtocolError> {
        let port = self
            .ports
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProtocolError::PortNotFound(port_name.to_string()))?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(port))
    }
}

/// Byte counters fed by the dispatcher
#[derive(Debug, Clone, Default)]
pub struct CountingObserver {
    pub sent: Arc<AtomicUsize>,
    pub received: Arc<AtomicUsize>,
}

impl LinkObserver for CountingObserver {
    fn outgoing(&self, count: usize) {
        self.sent.fetch_add(count, Ordering::SeqCst);
    }

    fn incoming(&self, count: usize) {
        self.received.fetch_add(count, Ordering::SeqCst);
    }
}

/// Route driver logs to the test output; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Short timeouts so failing reads do not slow the suite down
pub fn fast_config() -> DriverConfig {
    init_tracing();
    DriverConfig {
        command_timeout_ms: 200,
        absorbance_data_timeout_ms: 200,
        sample_timeout_ms: 200,
        poll_interval_ms: 10,
        ..DriverConfig::default()
    }
}

/// Big-endian helper for building device replies
pub fn be16(value: i16) -> [u8; 2] {
    value.to_be_bytes()
}
