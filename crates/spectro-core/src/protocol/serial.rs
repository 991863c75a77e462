//! Serial port handling
//!
//! Port enumeration and opening. The spectrophotometer only speaks 4800 baud,
//! 8-N-1.

use serde::{Deserialize, Serialize};
use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;
use tracing::{debug, info};

use super::{ProtocolError, SerialTransport, Transport, DEFAULT_BAUD_RATE};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key placing ttyUSB* (the usual RS-232 adapters) first, then ttyACM*,
/// then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux-only: add /dev/ttyACM* and /dev/ttyUSB* entries the API missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo {
                        name: full,
                        vid: None,
                        pid: None,
                        product: None,
                    });
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Platform capability producing the identifiers `connect` accepts
pub trait PortLister {
    /// Port identifiers currently present
    fn list_ports(&self) -> Vec<String>;
}

/// Desktop port enumeration through the `serialport` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortLister for SystemPorts {
    fn list_ports(&self) -> Vec<String> {
        list_ports().into_iter().map(|p| p.name).collect()
    }
}

/// Parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Serial line parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Line speed, fixed at 4800 by the firmware
    pub baud_rate: u32,
    /// Bits per character
    pub data_bits: u8,
    /// Parity bit
    pub parity: Parity,
    /// Stop bits per character
    pub stop_bits: u8,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

impl SerialSettings {
    /// The device firmware only talks 4800 baud, 8-N-1
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.baud_rate != DEFAULT_BAUD_RATE {
            return Err(ProtocolError::Config(format!(
                "unsupported baud rate {}, the device requires {}",
                self.baud_rate, DEFAULT_BAUD_RATE
            )));
        }
        if self.data_bits != 8 || self.parity != Parity::None || self.stop_bits != 1 {
            return Err(ProtocolError::Config(format!(
                "unsupported framing {}-{:?}-{}, the device requires 8-N-1",
                self.data_bits, self.parity, self.stop_bits
            )));
        }
        Ok(())
    }
}

/// Opens a transport for a port identifier
pub trait PortOpener: Send + Sync {
    /// Open `port_name` with `settings`
    fn open(
        &self,
        port_name: &str,
        settings: &SerialSettings,
    ) -> Result<Box<dyn Transport>, ProtocolError>;
}

/// Opens real serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortOpener;

impl PortOpener for SerialPortOpener {
    fn open(
        &self,
        port_name: &str,
        settings: &SerialSettings,
    ) -> Result<Box<dyn Transport>, ProtocolError> {
        settings.validate()?;

        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => {
                    ProtocolError::PortNotFound(port_name.to_string())
                }
                _ => ProtocolError::OpenFailed(format!("{}: {}", port_name, e)),
            })?;

        let mut transport = SerialTransport::new(port);
        transport.discard_input()?;
        info!(
            "serial: opened {} at {} baud, 8-N-1",
            transport.name().as_deref().unwrap_or(port_name),
            settings.baud_rate
        );
        Ok(Box::new(transport))
    }
}

/// Host permission needed before a USB serial device can be opened
/// (mobile platforms)
pub trait PermissionGate: Send + Sync {
    /// Whether access to `port_name` was already granted
    fn has_permission(&self, port_name: &str) -> bool;

    /// Ask the host for access; the grant arrives asynchronously
    fn request_permission(&self, port_name: &str);
}

/// Opener that refuses to open until the host granted access to the port
pub struct PermissionGatedOpener<G, O> {
    gate: G,
    inner: O,
}

impl<G: PermissionGate, O: PortOpener> PermissionGatedOpener<G, O> {
    /// Gate `inner` behind `gate`
    pub fn new(gate: G, inner: O) -> Self {
        Self { gate, inner }
    }
}

impl<G: PermissionGate, O: PortOpener> PortOpener for PermissionGatedOpener<G, O> {
    fn open(
        &self,
        port_name: &str,
        settings: &SerialSettings,
    ) -> Result<Box<dyn Transport>, ProtocolError> {
        if !self.gate.has_permission(port_name) {
            debug!("serial: requesting permission for {}", port_name);
            self.gate.request_permission(port_name);
            return Err(ProtocolError::PermissionPending(port_name.to_string()));
        }
        self.inner.open(port_name, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = SystemPorts.list_ports();
        for port in &ports {
            println!("Found port: {}", port);
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyUSB1",
            "/dev/ttyACM1",
            "/dev/ttyUSB0",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyUSB10",
        ];
        let mut sorted: Vec<&str> = names.clone();
        sorted.sort_by_key(|n| port_sort_key(n));

        assert_eq!(
            sorted,
            vec![
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB10",
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_default_settings_are_device_framing() {
        let settings = SerialSettings::default();
        assert_eq!(settings.baud_rate, 4800);
        assert!(settings.validate().is_ok());

        let bad = SerialSettings {
            parity: Parity::Even,
            ..SerialSettings::default()
        };
        assert!(matches!(bad.validate(), Err(ProtocolError::Config(_))));

        let fast = SerialSettings {
            baud_rate: 9600,
            ..SerialSettings::default()
        };
        assert!(matches!(fast.validate(), Err(ProtocolError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_open_pseudo_terminal() {
        use serialport::SerialPort;

        let (master, slave) = serialport::TTYPort::pair().unwrap();
        let path = slave.name().or_else(|| master.name()).unwrap();
        let mut transport = SerialPortOpener
            .open(&path, &SerialSettings::default())
            .unwrap();
        assert_eq!(transport.write(&[0x5A]).unwrap(), 1);

        let fast = SerialSettings {
            baud_rate: 9600,
            ..SerialSettings::default()
        };
        assert!(matches!(
            SerialPortOpener.open(&path, &fast),
            Err(ProtocolError::Config(_))
        ));
    }

    struct Gate {
        granted: AtomicBool,
        requests: AtomicUsize,
    }

    impl PermissionGate for &Gate {
        fn has_permission(&self, _port_name: &str) -> bool {
            self.granted.load(Ordering::SeqCst)
        }

        fn request_permission(&self, _port_name: &str) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NoPorts;

    impl PortOpener for NoPorts {
        fn open(
            &self,
            port_name: &str,
            _settings: &SerialSettings,
        ) -> Result<Box<dyn Transport>, ProtocolError> {
            Err(ProtocolError::PortNotFound(port_name.to_string()))
        }
    }

    #[test]
    fn test_permission_pending_until_granted() {
        let gate = Gate {
            granted: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        };
        let opener = PermissionGatedOpener::new(&gate, NoPorts);
        let settings = SerialSettings::default();

        let first = opener.open("usb-1", &settings);
        assert!(matches!(first, Err(ProtocolError::PermissionPending(ref p)) if p == "usb-1"));
        assert_eq!(gate.requests.load(Ordering::SeqCst), 1);

        gate.granted.store(true, Ordering::SeqCst);
        let second = opener.open("usb-1", &settings);
        assert!(matches!(second, Err(ProtocolError::PortNotFound(_))));
        assert_eq!(gate.requests.load(Ordering::SeqCst), 1);
    }
}
