//! Board runtime - connection lifecycle, transport session, and events
//!
//! This crate provides the low-level runtime for talking to a
//! MicroPython/CircuitPython board over USB serial:
//!
//! - **Manager**: the connection lifecycle state machine, run as a single
//!   task that owns all mutable connection state
//! - **Session**: exclusive read/write access to the open port, with
//!   interactive/synchronous demultiplexing of the incoming byte stream
//! - **Usb**: device enumeration, permission, and port opening behind a
//!   backend trait (native implementation over `serialport`)
//! - **Events**: broadcast bus carrying status transitions, REPL output,
//!   and connect/disconnect notifications
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  boardlink   │  Board facade + remote filesystem
//! └──────┬───────┘
//!        │ BoardHandle
//! ┌──────▼───────┐
//! │   runtime    │  This crate
//! │  ┌─────────┐ │
//! │  │ Manager │ │  lifecycle state machine (one task)
//! │  └─────────┘ │
//! │  ┌─────────┐ │
//! │  │ Session │ │  REPL demux over the open port
//! │  └─────────┘ │
//! │  ┌─────────┐ │
//! │  │   Usb   │ │  enumeration / permission / open
//! │  └─────────┘ │
//! └──────────────┘
//! ```
//!
//! # Single-writer discipline
//!
//! The port handle, execution mode, and capture buffer are owned by the
//! manager task. Callers interact through [`BoardHandle`], whose operations
//! are messages into that task; the background reader communicates the same
//! way. Nothing else can write to the port.

pub mod error;
pub mod events;
pub mod manager;
pub mod session;
pub mod store;
pub mod testing;
pub mod usb;

pub use error::{ConnectionErrorKind, Error, Result};
pub use events::{BoardEvent, EventBus, EventStream, EventWaiter};
pub use manager::{BoardHandle, BoardManager, ConnectionState, SUPPORTED_MANUFACTURERS};
pub use session::{ExecutionMode, TransportSession};
pub use store::{JsonProductStore, MemoryProductStore, ProductStore};
pub use usb::{LinkParts, LinkReader, LinkWriter, SerialportBackend, UsbBackend, UsbDeviceInfo};
