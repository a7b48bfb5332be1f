//! Transport session: the single point of read/write access to an open port.
//!
//! The session owns the write half of the link and the mode/capture state.
//! A blocking reader task drains the read half and reports chunks (and
//! faults) as messages; the manager feeds those back into
//! [`TransportSession::on_reader_data`], so every byte of demultiplexing
//! happens on the manager's execution context.

use crate::error::{Error, Result};
use crate::usb::{LinkParts, LinkWriter};
use boardlink_protocol as protocol;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};

/// How incoming bytes are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Pass-through: echoed output goes to the interactive data stream.
    Interactive,
    /// Capture: output accumulates until the execution sentinel appears.
    Synchronous,
}

/// What the background reader reports.
#[derive(Debug)]
pub enum ReaderEvent {
    /// A chunk of bytes pulled off the port.
    Data(Vec<u8>),
    /// The port faulted; the reader has stopped.
    Failed(String),
}

pub struct TransportSession {
    writer: Box<dyn LinkWriter>,
    mode: ExecutionMode,
    capture: String,
    pending: Option<oneshot::Sender<String>>,
    stop: Arc<AtomicBool>,
}

impl TransportSession {
    /// Takes ownership of the link and starts the background reader, which
    /// sends [`ReaderEvent`]s (converted into `M`) over `tx` until the port
    /// faults or the session is closed.
    pub fn start<M>(parts: LinkParts, tx: mpsc::UnboundedSender<M>) -> Self
    where
        M: From<ReaderEvent> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = Arc::clone(&stop);
        let mut reader = parts.reader;

        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 1024];
            loop {
                if reader_stop.load(Ordering::Relaxed) {
                    break;
                }
                match reader.read_chunk(&mut buf) {
                    Ok(0) => continue,
                    Ok(n) => {
                        if tx.send(ReaderEvent::Data(buf[..n].to_vec()).into()).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        if !reader_stop.load(Ordering::Relaxed) {
                            let _ = tx.send(ReaderEvent::Failed(err.to_string()).into());
                        }
                        break;
                    }
                }
            }
        });

        Self {
            writer: parts.writer,
            mode: ExecutionMode::Interactive,
            capture: String::new(),
            pending: None,
            stop,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Whether a synchronous exchange is in flight.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// CR-framed fire-and-forget write; any response surfaces later on the
    /// interactive stream.
    pub fn write_interactive(&mut self, text: &str) {
        tracing::debug!(text, "interactive write");
        self.write_raw(&protocol::frame_interactive(text));
    }

    /// Unframed write for control sequences that must not echo a prompt.
    pub fn write_command(&mut self, bytes: &[u8]) {
        self.write_raw(bytes);
    }

    /// Switches to synchronous capture and performs a CR-framed write.
    ///
    /// The returned receiver resolves with the sentinel-stripped response.
    /// Closing the port abandons the exchange; the receiver then yields a
    /// channel-closed error. There is no timeout at this layer.
    ///
    /// # Errors
    ///
    /// [`Error::SynchronousBusy`] when an exchange is already in flight.
    pub fn write_synchronous(&mut self, text: &str) -> Result<oneshot::Receiver<String>> {
        if self.pending.is_some() {
            return Err(Error::SynchronousBusy);
        }
        let (tx, rx) = oneshot::channel();
        self.mode = ExecutionMode::Synchronous;
        self.capture.clear();
        self.pending = Some(tx);
        tracing::debug!(text, "synchronous write");
        self.write_raw(&protocol::frame_interactive(text));
        Ok(rx)
    }

    /// Silent exchange: suppress echo, run the command synchronously, then
    /// soft-reset so REPL noise never reaches the interactive stream.
    pub fn write_silent(&mut self, text: &str) -> Result<oneshot::Receiver<String>> {
        if self.pending.is_some() {
            return Err(Error::SynchronousBusy);
        }
        self.write_command(protocol::ENTER_RAW_REPL);
        let rx = self.write_synchronous(text)?;
        self.write_command(protocol::SOFT_RESET);
        Ok(rx)
    }

    /// Demultiplexes a reader chunk. Returns interactive text to surface,
    /// if any.
    pub fn on_reader_data(&mut self, bytes: &[u8]) -> Option<String> {
        let data = String::from_utf8_lossy(bytes);
        match self.mode {
            ExecutionMode::Synchronous => {
                self.capture.push_str(&data);
                if protocol::is_silent_execution_done(&self.capture) {
                    let result = protocol::trim_silent_result(&self.capture);
                    self.capture.clear();
                    self.mode = ExecutionMode::Interactive;
                    if let Some(tx) = self.pending.take() {
                        let _ = tx.send(result);
                    }
                }
                None
            }
            ExecutionMode::Interactive => {
                let response = protocol::strip_trailing_prompt(&data);
                if response.is_empty() || protocol::is_bare_prompt(&response) {
                    None
                } else {
                    Some(response)
                }
            }
        }
    }

    /// Stops the reader and releases the port. Any in-flight synchronous
    /// exchange is abandoned without resolving its receiver.
    pub fn close(self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Write faults are logged and swallowed here; the reader reports the
    /// broken port soon after and the manager reacts to that.
    fn write_raw(&mut self, bytes: &[u8]) {
        if let Err(err) = self.writer.write_all(bytes) {
            tracing::error!(error = %err, "serial write failed");
        }
    }
}

impl Drop for TransportSession {
    /// Signals the background reader to stop when the session is dropped
    /// without an explicit [`close`](Self::close) (e.g. the owning manager
    /// task is torn down), mirroring what `close` does with `self`.
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
