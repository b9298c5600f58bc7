//! File system collaborators for the tandem sandbox.
//!
//! The sandbox never touches storage directly. Everything goes through the
//! [`FileSystem`] trait, which has two backends here:
//!
//! - [`MemoryFileSystem`]: an in-memory map with optional simulated latency,
//!   read counters and synchronous change events. Used by tests and by hosts
//!   that keep unsaved buffers in memory.
//! - [`LocalFileSystem`]: the host disk via `tokio::fs`, with change events
//!   from `notify` when the `watch` feature is enabled.
//!
//! Files are addressed by [`CanonicalUri`], the identity key used by every
//! cache and graph map downstream.

mod error;
mod event;
mod local;
mod memory;
mod uri;

use async_trait::async_trait;

pub use error::{FsError, Result};
pub use event::{FileEvent, FileEventKind, FileEventSender, WatchSubscription};
pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;
pub use uri::CanonicalUri;

/// What a URI points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
	File,
	Directory,
}

/// Raw storage backend.
#[async_trait]
pub trait FileSystem: Send + Sync + 'static {
	/// Reads the full text content at `uri`.
	///
	/// # Errors
	///
	/// [`FsError::NotFound`] when nothing exists at `uri`.
	async fn read_file(&self, uri: &CanonicalUri) -> Result<String>;

	/// Replaces the content at `uri`, creating the file if needed.
	async fn write_file(&self, uri: &CanonicalUri, content: &str) -> Result<()>;

	/// Returns what exists at `uri`, or `None`.
	async fn stat(&self, uri: &CanonicalUri) -> Result<Option<FileKind>>;

	/// Subscribes to change events under `uris`.
	///
	/// An empty slice watches everything the backend can report.
	fn watch(&self, uris: &[CanonicalUri]) -> Result<WatchSubscription>;
}
