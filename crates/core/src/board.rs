//! The high-level board facade.

use crate::files::RemoteFs;
use boardlink_protocol::{RemoteFile, commands};
use boardlink_runtime::{
    BoardEvent, BoardHandle, BoardManager, ConnectionState, Error, EventStream, JsonProductStore,
    ProductStore, Result, SerialportBackend, UsbBackend, UsbDeviceInfo,
};
use std::path::PathBuf;
use std::time::Duration;

/// A MicroPython/CircuitPython board reachable over USB serial.
///
/// Owns a running connection manager; dropping the `Board` (or calling
/// [`shutdown`](Self::shutdown)) stops it. All state and data changes are
/// also pushed to [`events`](Self::events) subscribers, so an embedder can
/// forward them to its own notification channels.
pub struct Board {
    handle: BoardHandle,
}

impl Board {
    /// Creates a board manager over the given platform backend and
    /// remembered-product store.
    pub fn new(backend: Box<dyn UsbBackend>, store: Box<dyn ProductStore>) -> Self {
        Self {
            handle: BoardManager::spawn(backend, store),
        }
    }

    /// Native construction: `serialport` backend, remembered products in a
    /// JSON file at `store_path`.
    pub fn open_native(store_path: impl Into<PathBuf>) -> Self {
        Self::new(
            Box::new(SerialportBackend::new()),
            Box::new(JsonProductStore::new(store_path)),
        )
    }

    /// The underlying manager handle, for embedders that bridge operations
    /// individually.
    pub fn handle(&self) -> &BoardHandle {
        &self.handle
    }

    /// Detects devices and waits until a board is connected, returning its
    /// device id (the OS device name).
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] when the attempt fails
    /// - [`Error::ApprovalRequired`] when attached devices need explicit
    ///   approval via [`approve_device`](Self::approve_device)
    /// - [`Error::Timeout`] when nothing resolves within `timeout`
    pub async fn initialize(&self, timeout: Duration) -> Result<String> {
        let waiter = self.handle.wait_for(
            |event| {
                matches!(
                    event,
                    BoardEvent::StatusChanged(
                        ConnectionState::Connected(_) | ConnectionState::AwaitingApproval(_)
                    ) | BoardEvent::ConnectionError { .. }
                )
            },
            timeout,
        );
        self.handle.detect_devices().await?;
        match waiter.wait().await? {
            BoardEvent::StatusChanged(ConnectionState::Connected(device)) => {
                Ok(device.device_name)
            }
            BoardEvent::StatusChanged(ConnectionState::AwaitingApproval(candidates)) => {
                Err(Error::ApprovalRequired { candidates })
            }
            BoardEvent::ConnectionError { kind, message } => Err(Error::connection(kind, message)),
            other => unreachable!("waiter predicate admits only connect/approval/error, got {other:?}"),
        }
    }

    /// Enumerates attached USB devices and starts a connection attempt.
    pub async fn detect_usb_devices(&self) -> Result<bool> {
        self.handle.detect_devices().await
    }

    /// Approves and connects to the device with the given id.
    pub async fn approve_device(&self, device_id: &str) -> Result<bool> {
        self.handle.approve_device(device_id).await
    }

    /// Rejects the offered candidate devices.
    pub async fn deny_device(&self) -> Result<()> {
        self.handle.deny_device().await
    }

    /// Closes the current connection.
    pub async fn disconnect_device(&self) -> Result<()> {
        self.handle.disconnect().await
    }

    /// Disconnects, forgets the device's product id, and re-detects.
    pub async fn forget_device(&self) -> Result<()> {
        self.handle.forget_device().await
    }

    pub async fn current_device(&self) -> Result<Option<UsbDeviceInfo>> {
        self.handle.current_device().await
    }

    pub async fn connection_state(&self) -> Result<ConnectionState> {
        self.handle.state().await
    }

    /// Sends an interactive REPL command; its output arrives as
    /// [`BoardEvent::ReceiveData`].
    pub async fn send_command(&self, text: &str) -> Result<()> {
        self.handle.write_interactive(text).await
    }

    /// Runs a command silently and returns its output.
    pub async fn send_command_in_silent_mode(&self, text: &str) -> Result<String> {
        self.handle.write_silent(text).await
    }

    /// Interrupts the running program (CTRL-C).
    pub async fn send_ctrl_c(&self) -> Result<()> {
        self.handle.write_command(commands::INTERRUPT).await
    }

    /// Soft-resets the REPL (CTRL-D).
    pub async fn send_ctrl_d(&self) -> Result<()> {
        self.handle.write_command(commands::SOFT_RESET).await
    }

    /// Hard-resets the board via its `machine` module.
    pub async fn reset_board(&self) -> Result<()> {
        self.handle.write_interactive(commands::machine_reset()).await
    }

    /// Switches the REPL into echo-suppressed mode (CTRL-A).
    pub async fn enter_silent_mode(&self) -> Result<()> {
        self.handle.write_command(commands::ENTER_RAW_REPL).await
    }

    /// Runs `code` on the board and returns everything it printed.
    pub async fn execute_script(&self, code: &str) -> Result<String> {
        self.handle.write_silent(code).await
    }

    /// Runs the board's `main.py`.
    pub async fn execute_main(&self) -> Result<String> {
        self.handle
            .write_silent(commands::execute_file("main.py"))
            .await
    }

    /// Pauses the running script (CTRL-C).
    pub async fn pause_script(&self) -> Result<()> {
        self.send_ctrl_c().await
    }

    /// Stops the running script and soft-resets (CTRL-D).
    pub async fn reset_script(&self) -> Result<()> {
        self.send_ctrl_d().await
    }

    /// Remote filesystem rooted at `/`.
    pub fn files(&self) -> RemoteFs {
        RemoteFs::new(self.handle.clone(), "/")
    }

    /// Remote filesystem rooted at `path`.
    pub fn files_at(&self, path: impl Into<String>) -> RemoteFs {
        RemoteFs::new(self.handle.clone(), path)
    }

    /// Lists the files under `/`.
    pub async fn list_files(&self) -> Result<Vec<RemoteFile>> {
        self.files().list_dir().await
    }

    /// Creates an empty file under `/`.
    pub async fn create_file(&self, name: &str) -> Result<String> {
        self.files().create_file(name).await
    }

    /// Deletes a file under `/`.
    pub async fn delete_file(&self, name: &str) -> Result<String> {
        self.files().remove_file(name).await
    }

    /// Renames a file or directory under `/`.
    pub async fn rename_file(&self, old_name: &str, new_name: &str) -> Result<String> {
        self.files().rename(old_name, new_name).await
    }

    /// Reads a remote file's content.
    pub async fn read_file(&self, path: &str) -> Result<String> {
        self.files().read(path).await
    }

    /// Replaces a remote file's content.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<String> {
        self.files().write(path, content).await
    }

    /// Subscribes to all future board events.
    pub fn events(&self) -> EventStream {
        self.handle.subscribe()
    }

    /// Stops the connection manager.
    pub fn shutdown(&self) {
        self.handle.shutdown();
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardlink_runtime::testing::{MockUsbBackend, micropython_device};
    use boardlink_runtime::{ConnectionErrorKind, MemoryProductStore};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn board(backend: &MockUsbBackend) -> Board {
        Board::new(
            Box::new(backend.clone()),
            Box::new(MemoryProductStore::new()),
        )
    }

    #[tokio::test]
    async fn initialize_returns_the_device_id() {
        let device = micropython_device(5);
        let backend = MockUsbBackend::new().with_device(device.clone());
        let board = board(&backend);

        let device_id = board.initialize(TIMEOUT).await.unwrap();
        assert_eq!(device_id, device.device_name);
        assert_eq!(board.current_device().await.unwrap(), Some(device));
    }

    #[tokio::test]
    async fn initialize_surfaces_connection_errors() {
        let backend = MockUsbBackend::new();
        let board = board(&backend);

        match board.initialize(TIMEOUT).await {
            Err(Error::Connection { kind, .. }) => {
                assert_eq!(kind, ConnectionErrorKind::NoDevices);
            }
            other => panic!("expected connection error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn initialize_reports_candidates_needing_approval() {
        let backend = MockUsbBackend::new()
            .with_device(boardlink_runtime::testing::unsupported_device(9));
        let board = board(&backend);

        match board.initialize(TIMEOUT).await {
            Err(Error::ApprovalRequired { candidates }) => assert_eq!(candidates.len(), 1),
            other => panic!("expected approval required, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn execute_script_returns_silent_output() {
        let backend = MockUsbBackend::new().with_device(micropython_device(5));
        backend.set_auto_response(b"42\r\n\x04\x04");
        let board = board(&backend);
        board.initialize(TIMEOUT).await.unwrap();

        assert_eq!(board.execute_script("print(42)").await.unwrap(), "42");
    }

    #[tokio::test]
    async fn control_sequences_hit_the_wire_unframed() {
        let backend = MockUsbBackend::new().with_device(micropython_device(5));
        let board = board(&backend);
        board.initialize(TIMEOUT).await.unwrap();

        board.send_ctrl_c().await.unwrap();
        board.send_ctrl_d().await.unwrap();
        board.enter_silent_mode().await.unwrap();

        assert_eq!(
            backend.last_link().unwrap().written(),
            vec![0x03, 0x04, 0x01]
        );
    }

    #[tokio::test]
    async fn terminal_commands_require_a_connection() {
        let backend = MockUsbBackend::new();
        let board = board(&backend);
        assert!(matches!(
            board.send_command("print(1)").await,
            Err(Error::NotConnected)
        ));
    }
}
