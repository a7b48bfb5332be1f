//! Connection lifecycle manager.
//!
//! The manager is an explicitly constructed actor: one task owns every piece
//! of mutable connection state (current device, session, capture mode,
//! remembered products) and processes messages from a single channel. Public
//! operations go through a cloneable [`BoardHandle`]; reader chunks,
//! permission grants, and settle timers come back through the same channel,
//! so nothing ever touches shared state off the manager's own context.
//!
//! # State machine
//!
//! ```text
//! Connecting ──detect──► AwaitingApproval ──approve──┐
//!     │                                              │
//!     ├──detect (supported/remembered device)────────┤
//!     │                                              ▼
//!     │                                     AwaitingPermission
//!     │                                              │ granted
//!     │                                              ▼
//!     │                                       open sequence ──► Connected
//!     │                                              │ fails
//!     ▼                                              ▼
//!  Error(NoDevices)                      Error(NoDriverFound | NoPortFound |
//!                                              CantOpenConnection | CantOpenPort)
//! ```
//!
//! Every error is terminal for its attempt and recoverable by calling
//! [`BoardHandle::detect_devices`] again.

use crate::error::{ConnectionErrorKind, Error, Result};
use crate::events::{BoardEvent, EventBus, EventStream, EventWaiter};
use crate::session::{ReaderEvent, TransportSession};
use crate::store::ProductStore;
use crate::usb::{UsbBackend, UsbDeviceInfo};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Manufacturer strings that auto-connect without prior approval.
pub const SUPPORTED_MANUFACTURERS: [&str; 2] = ["MicroPython", "CircuitPython"];

/// How long a reader fault is allowed to settle before it is classified as
/// a lost connection or a port failure.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Connection state. Exactly one holds at any time; transitions are pushed
/// as [`BoardEvent::StatusChanged`], never polled.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Looking for (or re-establishing contact with) a board.
    Connecting,
    /// A permission request is pending with the user.
    AwaitingPermission,
    /// A board is connected and usable.
    Connected(UsbDeviceInfo),
    /// Devices are attached but none is approved; the caller must pick.
    AwaitingApproval(Vec<UsbDeviceInfo>),
    /// The last attempt failed.
    Error {
        kind: ConnectionErrorKind,
        message: String,
    },
}

pub(crate) enum ManagerMsg {
    Detect {
        reply: oneshot::Sender<Result<bool>>,
    },
    Approve {
        device_id: String,
        reply: oneshot::Sender<Result<bool>>,
    },
    Deny {
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    Forget {
        reply: oneshot::Sender<Result<()>>,
    },
    CurrentDevice {
        reply: oneshot::Sender<Option<UsbDeviceInfo>>,
    },
    State {
        reply: oneshot::Sender<ConnectionState>,
    },
    WriteInteractive {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    WriteCommand {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    WriteSilent {
        code: String,
        reply: oneshot::Sender<Result<String>>,
    },
    PermissionResolved {
        device: UsbDeviceInfo,
        granted: bool,
    },
    SettleExpired {
        message: String,
    },
    Reader(ReaderEvent),
    Shutdown,
}

impl From<ReaderEvent> for ManagerMsg {
    fn from(event: ReaderEvent) -> Self {
        ManagerMsg::Reader(event)
    }
}

/// Cloneable handle to a running [`BoardManager`] task.
#[derive(Clone)]
pub struct BoardHandle {
    tx: mpsc::UnboundedSender<ManagerMsg>,
    events: Arc<EventBus>,
}

impl BoardHandle {
    /// Enumerates attached devices and starts a connection attempt.
    ///
    /// Returns `true` when an attempt proceeded (a supported or remembered
    /// device was found, or a board is already connected); `false` when the
    /// caller must approve a candidate, when no devices exist, or when an
    /// attempt was already in flight (the call is then a no-op).
    pub async fn detect_devices(&self) -> Result<bool> {
        self.request(|reply| ManagerMsg::Detect { reply }).await?
    }

    /// Approves the device with the given id (its OS device name) and
    /// connects to it.
    pub async fn approve_device(&self, device_id: impl Into<String>) -> Result<bool> {
        let device_id = device_id.into();
        self.request(|reply| ManagerMsg::Approve { device_id, reply })
            .await?
    }

    /// Rejects the candidate devices offered in `AwaitingApproval`.
    pub async fn deny_device(&self) -> Result<()> {
        self.request(|reply| ManagerMsg::Deny { reply }).await?
    }

    /// Closes the connection if open. Re-detection is the caller's call.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| ManagerMsg::Disconnect { reply }).await?
    }

    /// Disconnects, removes the current device from the remembered set, and
    /// re-runs detection.
    pub async fn forget_device(&self) -> Result<()> {
        self.request(|reply| ManagerMsg::Forget { reply }).await?
    }

    pub async fn current_device(&self) -> Result<Option<UsbDeviceInfo>> {
        self.request(|reply| ManagerMsg::CurrentDevice { reply })
            .await
    }

    pub async fn state(&self) -> Result<ConnectionState> {
        self.request(|reply| ManagerMsg::State { reply }).await
    }

    /// CR-framed interactive write; output surfaces as
    /// [`BoardEvent::ReceiveData`].
    pub async fn write_interactive(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.request(|reply| ManagerMsg::WriteInteractive { text, reply })
            .await?
    }

    /// Unframed control write (interrupt, soft reset, mode toggles).
    pub async fn write_command(&self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        let bytes = bytes.into();
        self.request(|reply| ManagerMsg::WriteCommand { bytes, reply })
            .await?
    }

    /// Runs `code` as a silent exchange and resolves with its output once
    /// the execution sentinel arrives. No timeout is imposed here; wrap the
    /// future in [`tokio::time::timeout`] for bounded latency.
    pub async fn write_silent(&self, code: impl Into<String>) -> Result<String> {
        let code = code.into();
        self.request(|reply| ManagerMsg::WriteSilent { code, reply })
            .await?
    }

    /// Subscribes to all future board events.
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Waits for the first event matching `predicate`.
    pub fn wait_for<F>(&self, predicate: F, timeout: Duration) -> EventWaiter
    where
        F: Fn(&BoardEvent) -> bool + Send + Sync + 'static,
    {
        self.events.wait_for(predicate, timeout)
    }

    /// Publishes a derived event (e.g. a fresh file listing) to all
    /// subscribers on behalf of a higher layer.
    pub fn publish(&self, event: BoardEvent) {
        self.events.emit(event);
    }

    /// Stops the manager task. Pending operations resolve with
    /// [`Error::ChannelClosed`].
    pub fn shutdown(&self) {
        let _ = self.tx.send(ManagerMsg::Shutdown);
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ManagerMsg,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }
}

/// The manager task. Construct with [`BoardManager::spawn`].
pub struct BoardManager {
    backend: Box<dyn UsbBackend>,
    store: Box<dyn ProductStore>,
    events: Arc<EventBus>,
    tx: mpsc::UnboundedSender<ManagerMsg>,
    rx: mpsc::UnboundedReceiver<ManagerMsg>,
    state: ConnectionState,
    current: Option<UsbDeviceInfo>,
    session: Option<TransportSession>,
    candidates: Vec<UsbDeviceInfo>,
    remembered: HashSet<u16>,
    connecting: bool,
    permission_pending: bool,
    settle_delay: Duration,
}

impl BoardManager {
    /// Spawns the manager task and returns its handle.
    ///
    /// The remembered-product set is loaded from `store` now; it is saved
    /// back after every successful open and every forget.
    pub fn spawn(backend: Box<dyn UsbBackend>, store: Box<dyn ProductStore>) -> BoardHandle {
        Self::spawn_with_settle_delay(backend, store, SETTLE_DELAY)
    }

    /// Same as [`spawn`](Self::spawn) with a custom reader-fault settle
    /// delay.
    pub fn spawn_with_settle_delay(
        backend: Box<dyn UsbBackend>,
        store: Box<dyn ProductStore>,
        settle_delay: Duration,
    ) -> BoardHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = Arc::new(EventBus::default());
        let remembered = store.load().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load remembered products");
            HashSet::new()
        });
        tracing::debug!(remembered = remembered.len(), "board manager starting");

        let handle = BoardHandle {
            tx: tx.clone(),
            events: Arc::clone(&events),
        };
        let mut manager = BoardManager {
            backend,
            store,
            events,
            tx,
            rx,
            state: ConnectionState::Connecting,
            current: None,
            session: None,
            candidates: Vec::new(),
            remembered,
            connecting: false,
            permission_pending: false,
            settle_delay,
        };
        manager.set_state(ConnectionState::Connecting);
        tokio::spawn(async move { manager.run().await });
        handle
    }

    async fn run(&mut self) {
        while let Some(msg) = self.rx.recv().await {
            if !self.handle_msg(msg) {
                break;
            }
        }
        if let Some(session) = self.session.take() {
            session.close();
            self.events
                .emit(BoardEvent::BoardDisconnect(self.current.take()));
        }
        tracing::debug!("board manager stopped");
    }

    /// Returns `false` once the manager should stop.
    fn handle_msg(&mut self, msg: ManagerMsg) -> bool {
        match msg {
            ManagerMsg::Detect { reply } => {
                let result = self.handle_detect();
                let _ = reply.send(result);
            }
            ManagerMsg::Approve { device_id, reply } => {
                let result = self.handle_approve(&device_id);
                let _ = reply.send(result);
            }
            ManagerMsg::Deny { reply } => {
                self.fail(ConnectionErrorKind::NotSupported, String::new());
                let _ = reply.send(Ok(()));
            }
            ManagerMsg::Disconnect { reply } => {
                self.fail(ConnectionErrorKind::ConnectionLost, String::new());
                let _ = reply.send(Ok(()));
            }
            ManagerMsg::Forget { reply } => {
                let result = self.handle_forget();
                let _ = reply.send(result);
            }
            ManagerMsg::CurrentDevice { reply } => {
                let _ = reply.send(self.current.clone());
            }
            ManagerMsg::State { reply } => {
                let _ = reply.send(self.state.clone());
            }
            ManagerMsg::WriteInteractive { text, reply } => {
                let result = match self.session.as_mut() {
                    Some(session) => {
                        session.write_interactive(&text);
                        Ok(())
                    }
                    None => Err(Error::NotConnected),
                };
                let _ = reply.send(result);
            }
            ManagerMsg::WriteCommand { bytes, reply } => {
                let result = match self.session.as_mut() {
                    Some(session) => {
                        session.write_command(&bytes);
                        Ok(())
                    }
                    None => Err(Error::NotConnected),
                };
                let _ = reply.send(result);
            }
            ManagerMsg::WriteSilent { code, reply } => {
                match self
                    .session
                    .as_mut()
                    .ok_or(Error::NotConnected)
                    .and_then(|session| session.write_silent(&code))
                {
                    Ok(rx) => {
                        tokio::spawn(async move {
                            let result = rx.await.map_err(|_| Error::ChannelClosed);
                            let _ = reply.send(result);
                        });
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
            ManagerMsg::PermissionResolved { device, granted } => {
                self.handle_permission_resolved(device, granted);
            }
            ManagerMsg::SettleExpired { message } => {
                self.handle_settle_expired(message);
            }
            ManagerMsg::Reader(ReaderEvent::Data(bytes)) => {
                if let Some(session) = self.session.as_mut() {
                    if let Some(text) = session.on_reader_data(&bytes) {
                        self.events.emit(BoardEvent::ReceiveData(text));
                    }
                }
            }
            ManagerMsg::Reader(ReaderEvent::Failed(message)) => {
                self.handle_reader_fault(message);
            }
            ManagerMsg::Shutdown => return false,
        }
        true
    }

    fn handle_detect(&mut self) -> Result<bool> {
        if self.connecting {
            tracing::info!("detect ignored, a connection attempt is already in flight");
            return Ok(false);
        }
        if self.session.is_some() {
            // Already connected; re-announce for late subscribers instead of
            // reopening a live port.
            if let Some(device) = self.current.clone() {
                self.set_state(ConnectionState::Connected(device));
            }
            return Ok(true);
        }

        self.connecting = true;
        let devices = self.backend.list_devices();
        tracing::info!(count = devices.len(), "enumerated USB devices");

        if let Some(device) = self.current.clone() {
            self.approve(device);
            return Ok(true);
        }

        let supported = devices.iter().find(|d| self.is_supported(d)).cloned();
        match supported {
            Some(device) => {
                self.approve(device);
                Ok(true)
            }
            None if !devices.is_empty() => {
                self.connecting = false;
                self.candidates = devices.clone();
                self.set_state(ConnectionState::AwaitingApproval(devices));
                Ok(false)
            }
            None => {
                self.fail(ConnectionErrorKind::NoDevices, String::new());
                Ok(false)
            }
        }
    }

    fn handle_approve(&mut self, device_id: &str) -> Result<bool> {
        if self.session.is_some() {
            return Ok(true);
        }
        if self.permission_pending {
            tracing::info!("approve ignored, a permission request is already pending");
            return Ok(false);
        }
        let device = self
            .backend
            .list_devices()
            .into_iter()
            .find(|d| d.device_name == device_id)
            .or_else(|| {
                self.candidates
                    .iter()
                    .find(|d| d.device_name == device_id)
                    .cloned()
            })
            .ok_or_else(|| Error::UnknownDevice(device_id.to_string()))?;
        self.approve(device);
        Ok(true)
    }

    fn handle_forget(&mut self) -> Result<()> {
        let device = self.current.clone();
        self.fail(ConnectionErrorKind::ConnectionLost, String::new());
        if let Some(device) = device {
            if self.remembered.remove(&device.product_id) {
                tracing::info!(product_id = device.product_id, "forgot product id");
                self.save_remembered();
            }
        }
        self.handle_detect().map(|_| ())
    }

    fn approve(&mut self, device: UsbDeviceInfo) {
        tracing::info!(device = %device.device_name, "approving device");
        self.connecting = true;
        self.current = Some(device.clone());
        if self.backend.has_permission(&device) {
            self.open_serial(device);
        } else {
            self.request_permission(device);
        }
    }

    fn request_permission(&mut self, device: UsbDeviceInfo) {
        if self.permission_pending {
            tracing::info!("permission request already pending");
            return;
        }
        self.permission_pending = true;
        self.set_state(ConnectionState::AwaitingPermission);
        let rx = self.backend.request_permission(&device);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            // A dropped sender counts as a denial.
            let granted = rx.await.unwrap_or(false);
            let _ = tx.send(ManagerMsg::PermissionResolved { device, granted });
        });
    }

    fn handle_permission_resolved(&mut self, device: UsbDeviceInfo, granted: bool) {
        if !self.permission_pending {
            tracing::debug!("stale permission result ignored");
            return;
        }
        self.permission_pending = false;
        if granted {
            self.open_serial(device);
        } else {
            self.fail(ConnectionErrorKind::PermissionDenied, String::new());
        }
    }

    fn open_serial(&mut self, device: UsbDeviceInfo) {
        match self.backend.open(&device) {
            Ok(parts) => {
                self.session = Some(TransportSession::start(parts, self.tx.clone()));
                self.remembered.insert(device.product_id);
                self.save_remembered();
                self.connecting = false;
                tracing::info!(device = %device.device_name, "board connected");
                self.set_state(ConnectionState::Connected(device.clone()));
                self.events.emit(BoardEvent::BoardConnect(device));
            }
            Err(err) => {
                let (kind, message) = match err {
                    Error::Connection { kind, message } => (kind, message),
                    other => (ConnectionErrorKind::UnexpectedError, other.to_string()),
                };
                self.fail(kind, message);
            }
        }
    }

    fn handle_reader_fault(&mut self, message: String) {
        if self.session.is_none() {
            tracing::debug!("reader fault after close, ignored");
            return;
        }
        tracing::error!(error = %message, "serial reader fault, settling");
        self.set_state(ConnectionState::Connecting);
        let tx = self.tx.clone();
        let delay = self.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ManagerMsg::SettleExpired { message });
        });
    }

    fn handle_settle_expired(&mut self, message: String) {
        if self.session.is_none() {
            tracing::debug!("settle expired after close, ignored");
            return;
        }
        if self.backend.list_devices().is_empty() {
            self.fail(ConnectionErrorKind::ConnectionLost, message);
        } else {
            self.fail(ConnectionErrorKind::CantOpenPort, message);
        }
    }

    /// Error path side effects, in order: close the port, stop the reader,
    /// publish the error, publish device-disconnected, clear the device.
    fn fail(&mut self, kind: ConnectionErrorKind, message: String) {
        tracing::error!(kind = %kind, message = %message, "connection error");
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.connecting = false;
        self.permission_pending = false;
        self.set_state(ConnectionState::Error {
            kind,
            message: message.clone(),
        });
        self.events.emit(BoardEvent::ConnectionError { kind, message });
        if let Some(device) = self.current.take() {
            self.events.emit(BoardEvent::BoardDisconnect(Some(device)));
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state.clone();
        self.events.emit(BoardEvent::StatusChanged(state));
    }

    fn is_supported(&self, device: &UsbDeviceInfo) -> bool {
        device
            .manufacturer
            .as_deref()
            .is_some_and(|m| SUPPORTED_MANUFACTURERS.contains(&m))
            || self.remembered.contains(&device.product_id)
    }

    fn save_remembered(&mut self) {
        if let Err(err) = self.store.save(&self.remembered) {
            tracing::warn!(error = %err, "failed to persist remembered products");
        }
    }
}

#[cfg(test)]
mod tests;
