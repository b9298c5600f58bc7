//! File change events and watch subscriptions.

use std::any::Any;
use std::fmt;

use tokio::sync::mpsc;

use crate::CanonicalUri;

/// Kind of change reported by a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileEventKind {
	/// A file appeared.
	Add,
	/// A file's content changed.
	Change,
	/// A file was deleted or renamed away.
	Unlink,
	/// A directory appeared.
	AddDir,
	/// A directory was deleted.
	UnlinkDir,
}

impl FileEventKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Add => "add",
			Self::Change => "change",
			Self::Unlink => "unlink",
			Self::AddDir => "add_dir",
			Self::UnlinkDir => "unlink_dir",
		}
	}

	/// Returns true for events that remove something.
	pub const fn is_removal(self) -> bool {
		matches!(self, Self::Unlink | Self::UnlinkDir)
	}
}

impl fmt::Display for FileEventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
	pub kind: FileEventKind,
	pub uri: CanonicalUri,
}

impl FileEvent {
	pub fn new(kind: FileEventKind, uri: CanonicalUri) -> Self {
		Self { kind, uri }
	}
}

/// Sender half used by backends to publish events.
pub type FileEventSender = mpsc::UnboundedSender<FileEvent>;

/// Stream of [`FileEvent`]s for a set of watched URIs.
///
/// Dropping the subscription stops watching: the backend-specific guard is
/// dropped with it.
pub struct WatchSubscription {
	rx: mpsc::UnboundedReceiver<FileEvent>,
	_guard: Box<dyn Any + Send>,
}

impl WatchSubscription {
	/// Wraps a receiver together with the guard that keeps the watch alive.
	pub fn new(rx: mpsc::UnboundedReceiver<FileEvent>, guard: impl Any + Send) -> Self {
		Self { rx, _guard: Box::new(guard) }
	}

	/// Waits for the next event. Returns `None` once the backend is gone.
	pub async fn recv(&mut self) -> Option<FileEvent> {
		self.rx.recv().await
	}

	/// Returns one queued event without waiting.
	pub fn try_recv(&mut self) -> Option<FileEvent> {
		self.rx.try_recv().ok()
	}
}

impl fmt::Debug for WatchSubscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WatchSubscription").finish_non_exhaustive()
	}
}
