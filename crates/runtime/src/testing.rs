//! In-memory backend and link for tests.
//!
//! Exported publicly, like the real backend, so downstream crates can drive
//! the full manager without hardware: script the attached devices, decide
//! permission outcomes, inspect what was written to the wire, and inject
//! board responses.

use crate::error::{ConnectionErrorKind, Error, Result};
use crate::usb::{LinkParts, LinkReader, LinkWriter, UsbBackend, UsbDeviceInfo};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::oneshot;

/// A device as a MicroPython board would enumerate.
pub fn micropython_device(product_id: u16) -> UsbDeviceInfo {
    UsbDeviceInfo {
        vendor_id: 0xf055,
        product_id,
        device_name: format!("/dev/ttyACM{product_id}"),
        manufacturer: Some("MicroPython".to_string()),
        product: Some("Board in FS mode".to_string()),
    }
}

/// A device with no recognized manufacturer string.
pub fn unsupported_device(product_id: u16) -> UsbDeviceInfo {
    UsbDeviceInfo {
        vendor_id: 0x1a86,
        product_id,
        device_name: format!("/dev/ttyUSB{product_id}"),
        manufacturer: None,
        product: None,
    }
}

struct LinkHub {
    written: Mutex<Vec<u8>>,
    chunk_tx: mpsc::Sender<Vec<u8>>,
    auto_response: Mutex<Option<Vec<u8>>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

/// Test-side handle to one opened [`mock_link`].
#[derive(Clone)]
pub struct MockLinkRemote {
    hub: Arc<LinkHub>,
}

impl MockLinkRemote {
    /// Everything written to the wire so far.
    pub fn written(&self) -> Vec<u8> {
        self.hub.written.lock().clone()
    }

    /// Queues bytes for the reader, as if the board sent them.
    pub fn push_chunk(&self, bytes: &[u8]) {
        let _ = self.hub.chunk_tx.send(bytes.to_vec());
    }

    /// Replies with `bytes` whenever a CR-framed command is written.
    pub fn set_auto_response(&self, bytes: &[u8]) {
        *self.hub.auto_response.lock() = Some(bytes.to_vec());
    }

    /// Makes every subsequent write fail.
    pub fn fail_writes(&self) {
        self.hub.fail_writes.store(true, Ordering::Relaxed);
    }

    /// Makes the reader report a port fault.
    pub fn fail_reader(&self) {
        self.hub.fail_reads.store(true, Ordering::Relaxed);
    }
}

struct MockWriter {
    hub: Arc<LinkHub>,
}

impl LinkWriter for MockWriter {
    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if self.hub.fail_writes.load(Ordering::Relaxed) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "injected write fault",
            ));
        }
        self.hub.written.lock().extend_from_slice(bytes);
        if bytes.ends_with(b"\r") {
            if let Some(response) = self.hub.auto_response.lock().clone() {
                let _ = self.hub.chunk_tx.send(response);
            }
        }
        Ok(())
    }
}

struct MockReader {
    hub: Arc<LinkHub>,
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl LinkReader for MockReader {
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.hub.fail_reads.load(Ordering::Relaxed) {
            return Err(std::io::Error::other("injected read fault"));
        }
        if self.pending.is_empty() {
            match self.rx.recv_timeout(Duration::from_millis(20)) {
                Ok(chunk) => self.pending = chunk,
                Err(mpsc::RecvTimeoutError::Timeout) => return Ok(0),
                Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Builds an in-memory link and the test-side handle to it.
pub fn mock_link() -> (LinkParts, MockLinkRemote) {
    let (chunk_tx, chunk_rx) = mpsc::channel();
    let hub = Arc::new(LinkHub {
        written: Mutex::new(Vec::new()),
        chunk_tx,
        auto_response: Mutex::new(None),
        fail_writes: AtomicBool::new(false),
        fail_reads: AtomicBool::new(false),
    });
    let parts = LinkParts {
        writer: Box::new(MockWriter {
            hub: Arc::clone(&hub),
        }),
        reader: Box::new(MockReader {
            hub: Arc::clone(&hub),
            rx: chunk_rx,
            pending: Vec::new(),
        }),
    };
    (parts, MockLinkRemote { hub })
}

struct BackendState {
    devices: Vec<UsbDeviceInfo>,
    auto_grant: bool,
    pending_permissions: Vec<oneshot::Sender<bool>>,
    permission_requests: usize,
    open_count: usize,
    fail_open: Option<ConnectionErrorKind>,
    auto_response: Option<Vec<u8>>,
    links: Vec<MockLinkRemote>,
}

/// Scriptable [`UsbBackend`]. Clones share state, so tests keep one clone
/// and hand the other to the manager.
#[derive(Clone)]
pub struct MockUsbBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockUsbBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                devices: Vec::new(),
                auto_grant: true,
                pending_permissions: Vec::new(),
                permission_requests: 0,
                open_count: 0,
                fail_open: None,
                auto_response: None,
                links: Vec::new(),
            })),
        }
    }

    pub fn with_device(self, device: UsbDeviceInfo) -> Self {
        self.state.lock().devices.push(device);
        self
    }

    pub fn add_device(&self, device: UsbDeviceInfo) {
        self.state.lock().devices.push(device);
    }

    pub fn clear_devices(&self) {
        self.state.lock().devices.clear();
    }

    /// Permission becomes an asynchronous user decision; resolve it with
    /// [`resolve_permission`](Self::resolve_permission).
    pub fn require_permission(&self) {
        self.state.lock().auto_grant = false;
    }

    /// Resolves all outstanding permission requests.
    pub fn resolve_permission(&self, granted: bool) {
        let pending = std::mem::take(&mut self.state.lock().pending_permissions);
        for tx in pending {
            let _ = tx.send(granted);
        }
    }

    pub fn permission_requests(&self) -> usize {
        self.state.lock().permission_requests
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Makes the next `open` fail with the given connection kind.
    pub fn fail_open_with(&self, kind: ConnectionErrorKind) {
        self.state.lock().fail_open = Some(kind);
    }

    /// Auto-response installed on every subsequently opened link.
    pub fn set_auto_response(&self, bytes: &[u8]) {
        self.state.lock().auto_response = Some(bytes.to_vec());
    }

    /// Handle to the most recently opened link.
    pub fn last_link(&self) -> Option<MockLinkRemote> {
        self.state.lock().links.last().cloned()
    }
}

impl Default for MockUsbBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbBackend for MockUsbBackend {
    fn list_devices(&self) -> Vec<UsbDeviceInfo> {
        self.state.lock().devices.clone()
    }

    fn has_permission(&self, _device: &UsbDeviceInfo) -> bool {
        self.state.lock().auto_grant
    }

    fn request_permission(&self, _device: &UsbDeviceInfo) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        state.permission_requests += 1;
        if state.auto_grant {
            let _ = tx.send(true);
        } else {
            state.pending_permissions.push(tx);
        }
        rx
    }

    fn open(&self, _device: &UsbDeviceInfo) -> Result<LinkParts> {
        let mut state = self.state.lock();
        if let Some(kind) = state.fail_open.take() {
            return Err(Error::connection(kind, "injected open failure"));
        }
        let (parts, remote) = mock_link();
        if let Some(response) = &state.auto_response {
            remote.set_auto_response(response);
        }
        state.open_count += 1;
        state.links.push(remote);
        Ok(parts)
    }
}
