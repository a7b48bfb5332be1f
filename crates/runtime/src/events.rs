//! Event fan-out for board state and data.
//!
//! Replaces callback-typed constructor parameters with an explicit bus the
//! manager publishes into. Two consumption patterns:
//!
//! 1. **Streams**: [`EventBus::subscribe`] returns an [`EventStream`] that
//!    yields every future event, with broadcast lag handled internally
//! 2. **Waiters**: [`EventBus::wait_for`] returns an [`EventWaiter`] that
//!    resolves on the first event matching a predicate, with a timeout
//!
//! Waiters are satisfied before the broadcast send, so a `wait_for` cannot
//! lose its event to a lagging stream.

use crate::error::{ConnectionErrorKind, Error, Result};
use crate::manager::ConnectionState;
use crate::usb::UsbDeviceInfo;
use boardlink_protocol::RemoteFile;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

/// Events pushed to subscribers. At-most-once per subscriber, no replay.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    /// The connection state machine moved.
    StatusChanged(ConnectionState),
    /// Interactive REPL output (prompt-stripped, never empty).
    ReceiveData(String),
    /// A board finished connecting.
    BoardConnect(UsbDeviceInfo),
    /// The current board went away (or was explicitly disconnected).
    BoardDisconnect(Option<UsbDeviceInfo>),
    /// A connection-phase failure.
    ConnectionError {
        kind: ConnectionErrorKind,
        message: String,
    },
    /// A fresh remote directory listing.
    FilesUpdate(Vec<RemoteFile>),
}

struct WaiterEntry {
    predicate: Box<dyn Fn(&BoardEvent) -> bool + Send + Sync>,
    complete_tx: oneshot::Sender<BoardEvent>,
}

/// Broadcast bus with predicate-based waiters.
pub struct EventBus {
    tx: broadcast::Sender<BoardEvent>,
    waiters: Mutex<Vec<WaiterEntry>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Publishes an event to matching waiters, then to all subscribers.
    pub fn emit(&self, event: BoardEvent) {
        {
            let mut waiters = self.waiters.lock();
            let mut i = 0;
            while i < waiters.len() {
                if (waiters[i].predicate)(&event) {
                    let entry = waiters.swap_remove(i);
                    let _ = entry.complete_tx.send(event.clone());
                } else {
                    i += 1;
                }
            }
        }
        let _ = self.tx.send(event);
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
        }
    }

    /// Registers a one-shot waiter for the first event matching `predicate`.
    pub fn wait_for<F>(&self, predicate: F, timeout: Duration) -> EventWaiter
    where
        F: Fn(&BoardEvent) -> bool + Send + Sync + 'static,
    {
        let (complete_tx, complete_rx) = oneshot::channel();
        self.waiters.lock().push(WaiterEntry {
            predicate: Box::new(predicate),
            complete_tx,
        });
        EventWaiter {
            rx: complete_rx,
            timeout,
        }
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Receiver of [`BoardEvent`]s with automatic lag handling.
pub struct EventStream {
    rx: broadcast::Receiver<BoardEvent>,
}

impl EventStream {
    /// Receives the next event; `None` once the manager is gone.
    pub async fn recv(&mut self) -> Option<BoardEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(dropped = n, "event stream lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receives an event if one is immediately available.
    pub fn try_recv(&mut self) -> Option<BoardEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(dropped = n, "event stream lagged, dropped events");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}

/// One-shot waiter created by [`EventBus::wait_for`].
pub struct EventWaiter {
    rx: oneshot::Receiver<BoardEvent>,
    timeout: Duration,
}

impl EventWaiter {
    /// Waits for the matching event.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] when no matching event arrives in time;
    /// [`Error::ChannelClosed`] when the bus is dropped first.
    pub async fn wait(self) -> Result<BoardEvent> {
        tokio::time::timeout(self.timeout, self.rx)
            .await
            .map_err(|_| Error::Timeout("waiting for board event".to_string()))?
            .map_err(|_| Error::ChannelClosed)
    }
}
