//! Wire protocol for MicroPython-style REPLs.
//!
//! This crate is the pure translation layer between the board session and the
//! text that actually crosses the serial line:
//!
//! - **Commands**: one-line MicroPython snippets for directory listing and
//!   file management, each terminated by the execution sentinel
//! - **Listing**: decoding the board's parenthesized-tuple directory output
//!   into [`RemoteFile`] records
//! - **Repl**: carriage-return framing for interactive writes and stripping
//!   of trailing `>>>` prompts from echoed output
//!
//! Everything here is stateless and synchronous; the session layer in
//! `boardlink-runtime` owns all I/O and mode bookkeeping.

pub mod commands;
pub mod listing;
pub mod repl;

pub use commands::{
    ENTER_RAW_REPL, EXECUTION_DONE, EXIT_RAW_REPL, INTERRUPT, SOFT_RESET, is_silent_execution_done,
    trim_silent_result,
};
pub use listing::{FileKind, RemoteFile, decode_listing};
pub use repl::{frame_interactive, is_bare_prompt, strip_trailing_prompt};
