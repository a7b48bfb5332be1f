//! USB device enumeration and the platform backend abstraction.
//!
//! The lifecycle manager never touches `serialport` directly; it talks to a
//! [`UsbBackend`]. The native [`SerialportBackend`] enumerates CDC-ACM
//! devices and opens them at 115200-8-N-1 with DTR asserted. Embedders on
//! platforms with their own USB stack (where permission is an asynchronous
//! user decision) implement the trait themselves; tests use the in-memory
//! backend from [`crate::testing`].

use crate::error::{ConnectionErrorKind, Error, Result};
use serde::Serialize;
use std::io;
use std::time::Duration;
use tokio::sync::oneshot;

/// Line parameters for the one supported transport: USB CDC-ACM.
pub const BAUD_RATE: u32 = 115_200;

/// Poll interval for the blocking read loop.
const READ_POLL: Duration = Duration::from_millis(100);

/// Identity of an attached USB peripheral. Immutable once enumerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// OS-level device name (the port path, e.g. `/dev/ttyACM0`).
    pub device_name: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl UsbDeviceInfo {
    /// Human-readable board label, `"manufacturer - product"`.
    pub fn label(&self) -> String {
        format!(
            "{} - {}",
            self.manufacturer.as_deref().unwrap_or("unknown"),
            self.product.as_deref().unwrap_or("unknown"),
        )
    }

    /// Same physical peripheral, by (vendor, product) pair or device name.
    pub fn matches(&self, other: &UsbDeviceInfo) -> bool {
        (self.vendor_id == other.vendor_id && self.product_id == other.product_id)
            || self.device_name == other.device_name
    }
}

/// Write half of an open serial link. Owned exclusively by the session.
pub trait LinkWriter: Send {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Read half of an open serial link, driven from a blocking task.
pub trait LinkReader: Send {
    /// Pulls the next chunk into `buf`. Returns `Ok(0)` when the poll
    /// interval elapsed with nothing to read; `Err` on a link fault.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// The two halves of a freshly opened link.
pub struct LinkParts {
    pub writer: Box<dyn LinkWriter>,
    pub reader: Box<dyn LinkReader>,
}

/// Platform access to USB serial devices: enumeration, permission, open.
pub trait UsbBackend: Send {
    /// Enumerates currently attached USB serial devices.
    fn list_devices(&self) -> Vec<UsbDeviceInfo>;

    /// Whether the device can be opened without asking the user first.
    fn has_permission(&self, device: &UsbDeviceInfo) -> bool;

    /// Fires an asynchronous permission request. The returned receiver
    /// resolves with the user's decision; dropping the sender counts as a
    /// denial.
    fn request_permission(&self, device: &UsbDeviceInfo) -> oneshot::Receiver<bool>;

    /// Opens the device, configures 115200-8-N-1, asserts DTR, and splits
    /// the link into its two halves.
    ///
    /// # Errors
    ///
    /// Maps each stage of the open sequence onto the connection taxonomy:
    /// [`NoDriverFound`](ConnectionErrorKind::NoDriverFound) when the device
    /// no longer resolves to a driver, [`NoPortFound`](ConnectionErrorKind::NoPortFound)
    /// when the driver exposes no serial port, [`CantOpenConnection`](ConnectionErrorKind::CantOpenConnection)
    /// when the device-level open fails, and [`CantOpenPort`](ConnectionErrorKind::CantOpenPort)
    /// when port configuration fails.
    fn open(&self, device: &UsbDeviceInfo) -> Result<LinkParts>;
}

/// Native backend over the `serialport` crate.
///
/// Desktop operating systems resolve permission at open time, so
/// `has_permission` is always true and `request_permission` resolves
/// immediately.
#[derive(Debug, Default)]
pub struct SerialportBackend;

impl SerialportBackend {
    pub fn new() -> Self {
        SerialportBackend
    }
}

impl UsbBackend for SerialportBackend {
    fn list_devices(&self) -> Vec<UsbDeviceInfo> {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(err) => {
                tracing::warn!(error = %err, "USB enumeration failed");
                return Vec::new();
            }
        };
        ports
            .into_iter()
            .filter_map(|port| match port.port_type {
                serialport::SerialPortType::UsbPort(usb) => Some(UsbDeviceInfo {
                    vendor_id: usb.vid,
                    product_id: usb.pid,
                    device_name: port.port_name,
                    manufacturer: usb.manufacturer,
                    product: usb.product,
                }),
                _ => None,
            })
            .collect()
    }

    fn has_permission(&self, _device: &UsbDeviceInfo) -> bool {
        true
    }

    fn request_permission(&self, _device: &UsbDeviceInfo) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(true);
        rx
    }

    fn open(&self, device: &UsbDeviceInfo) -> Result<LinkParts> {
        // Driver lookup: the device must still enumerate as a USB serial port.
        let current = self
            .list_devices()
            .into_iter()
            .find(|d| d.matches(device))
            .ok_or_else(|| {
                Error::connection(
                    ConnectionErrorKind::NoDriverFound,
                    format!("no driver for {}", device.device_name),
                )
            })?;

        if current.device_name.is_empty() {
            return Err(Error::connection(
                ConnectionErrorKind::NoPortFound,
                "driver exposes no serial port",
            ));
        }

        let port = serialport::new(&current.device_name, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(READ_POLL)
            .open()
            .map_err(|err| {
                Error::connection(ConnectionErrorKind::CantOpenConnection, err.to_string())
            })?;

        let mut writer = port;
        writer
            .write_data_terminal_ready(true)
            .map_err(|err| Error::connection(ConnectionErrorKind::CantOpenPort, err.to_string()))?;
        let reader = writer
            .try_clone()
            .map_err(|err| Error::connection(ConnectionErrorKind::CantOpenPort, err.to_string()))?;

        Ok(LinkParts {
            writer: Box::new(SerialportWriter { port: writer }),
            reader: Box::new(SerialportReader { port: reader }),
        })
    }
}

struct SerialportWriter {
    port: Box<dyn serialport::SerialPort>,
}

impl LinkWriter for SerialportWriter {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        use std::io::Write;
        self.port.write_all(bytes)?;
        self.port.flush()
    }
}

struct SerialportReader {
    port: Box<dyn serialport::SerialPort>,
}

impl LinkReader for SerialportReader {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(vid: u16, pid: u16, name: &str) -> UsbDeviceInfo {
        UsbDeviceInfo {
            vendor_id: vid,
            product_id: pid,
            device_name: name.to_string(),
            manufacturer: Some("MicroPython".to_string()),
            product: Some("Pyboard".to_string()),
        }
    }

    #[test]
    fn device_matching_by_ids_or_name() {
        let a = device(0x2e8a, 0x0005, "/dev/ttyACM0");
        let same_ids = device(0x2e8a, 0x0005, "/dev/ttyACM1");
        let same_name = device(0xf055, 0x9800, "/dev/ttyACM0");
        let other = device(0xf055, 0x9800, "/dev/ttyACM2");

        assert!(a.matches(&same_ids));
        assert!(a.matches(&same_name));
        assert!(!a.matches(&other));
    }

    #[test]
    fn label_combines_manufacturer_and_product() {
        assert_eq!(
            device(1, 2, "/dev/ttyACM0").label(),
            "MicroPython - Pyboard"
        );
    }
}
