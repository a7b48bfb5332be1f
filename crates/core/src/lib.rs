//! USB-serial connectivity for MicroPython and CircuitPython boards.
//!
//! `boardlink` connects a host application to a microcontroller's REPL over
//! USB CDC-ACM: device discovery and approval, the connection lifecycle,
//! interactive terminal passthrough, silent command execution, and remote
//! file management.
//!
//! # Quick start
//!
//! ```ignore
//! use boardlink::Board;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> boardlink::Result<()> {
//!     let board = Board::open_native("products.json");
//!     let device_id = board.initialize(Duration::from_secs(10)).await?;
//!     println!("connected to {device_id}");
//!
//!     for file in board.list_files().await? {
//!         println!("{} ({} bytes)", file.name, file.size);
//!     }
//!
//!     let output = board.execute_script("print(1 + 1)").await?;
//!     println!("{output}");
//!     Ok(())
//! }
//! ```
//!
//! # Events
//!
//! Everything the board pushes — state transitions, REPL output, connect and
//! disconnect notifications, file listings — arrives on the stream returned
//! by [`Board::events`]. Subscribers only see events emitted after they
//! subscribe; there is no replay.

mod board;
mod files;

pub use board::Board;
pub use files::RemoteFs;

// Wire and runtime types embedders need at the API boundary.
pub use boardlink_protocol::{FileKind, RemoteFile};
pub use boardlink_runtime::{
    BoardEvent, BoardHandle, ConnectionErrorKind, ConnectionState, Error, EventStream,
    JsonProductStore, MemoryProductStore, ProductStore, Result, SerialportBackend, UsbBackend,
    UsbDeviceInfo,
};
