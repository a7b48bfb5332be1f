//! Remote filesystem operations over the silent command channel.

use boardlink_protocol::{RemoteFile, commands, decode_listing};
use boardlink_runtime::{BoardEvent, BoardHandle, Result};

/// File operations on the connected board, bound to one directory.
///
/// Every operation encodes a snippet, runs it silently, and decodes the
/// textual result. Listings are additionally pushed to event subscribers as
/// [`BoardEvent::FilesUpdate`].
pub struct RemoteFs {
    handle: BoardHandle,
    path: String,
}

impl RemoteFs {
    pub(crate) fn new(handle: BoardHandle, path: impl Into<String>) -> Self {
        Self {
            handle,
            path: path.into(),
        }
    }

    /// The directory this instance operates under.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// Lists the directory, publishes the listing, and resets the board
    /// back to a clean REPL.
    ///
    /// Listing is treated as a heavy operation: the trailing reset keeps
    /// subsequent interactive use predictable, at the cost of restarting
    /// whatever was running.
    pub async fn list_dir(&self) -> Result<Vec<RemoteFile>> {
        let raw = self.handle.write_silent(commands::list_dir(&self.path)).await?;
        let files = decode_listing(&raw, &self.path);
        tracing::debug!(path = %self.path, count = files.len(), "listed remote directory");
        self.handle.publish(BoardEvent::FilesUpdate(files.clone()));
        self.handle
            .write_interactive(commands::machine_reset())
            .await?;
        Ok(files)
    }

    /// Creates an empty file named `name` under this directory.
    pub async fn create_file(&self, name: &str) -> Result<String> {
        self.run(commands::make_file(&self.join(name))).await
    }

    /// Creates a directory named `name` under this directory.
    pub async fn create_directory(&self, name: &str) -> Result<String> {
        self.run(commands::make_directory(&self.join(name))).await
    }

    /// Removes the file named `name`.
    pub async fn remove_file(&self, name: &str) -> Result<String> {
        self.run(commands::remove_file(&self.join(name))).await
    }

    /// Removes the (empty) directory named `name`.
    pub async fn remove_directory(&self, name: &str) -> Result<String> {
        self.run(commands::remove_directory(&self.join(name))).await
    }

    /// Renames `old_name` to `new_name` within this directory.
    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<String> {
        self.run(commands::rename(&self.join(old_name), &self.join(new_name)))
            .await
    }

    /// Reads the content of the file named `name`.
    pub async fn read(&self, name: &str) -> Result<String> {
        self.run(commands::read_file(&self.join(name))).await
    }

    /// Replaces the content of the file named `name`.
    pub async fn write(&self, name: &str, content: &str) -> Result<String> {
        self.run(commands::write_file(&self.join(name), content))
            .await
    }

    async fn run(&self, code: String) -> Result<String> {
        self.handle.write_silent(code).await
    }

    fn join(&self, name: &str) -> String {
        if self.path.trim_matches('/').is_empty() {
            format!("/{}", name.trim_start_matches('/'))
        } else {
            format!("{}/{}", self.path, name).replace("//", "/")
        }
    }
}
