use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use crate::{CanonicalUri, FileEvent, FileEventKind, FileEventSender, FileKind, FileSystem, FsError, Result, WatchSubscription};

struct MemoryWatcher {
	scopes: Vec<CanonicalUri>,
	tx: FileEventSender,
}

impl MemoryWatcher {
	fn wants(&self, uri: &CanonicalUri) -> bool {
		self.scopes.is_empty() || self.scopes.iter().any(|scope| uri.is_under(scope))
	}
}

#[derive(Default)]
struct MemoryInner {
	files: RwLock<BTreeMap<CanonicalUri, Arc<str>>>,
	latency: Mutex<Duration>,
	reads: Mutex<FxHashMap<CanonicalUri, usize>>,
	watchers: Mutex<FxHashMap<u64, MemoryWatcher>>,
	next_watcher: AtomicU64,
}

/// In-memory [`FileSystem`].
///
/// Writes through either the trait or the direct helpers publish change
/// events to watchers synchronously, before the call returns. Every
/// `read_file` is counted so callers can assert on I/O deduplication.
#[derive(Clone, Default)]
pub struct MemoryFileSystem {
	inner: Arc<MemoryInner>,
}

impl std::fmt::Debug for MemoryFileSystem {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemoryFileSystem")
			.field("files", &self.inner.files.read().len())
			.field("latency", &*self.inner.latency.lock())
			.finish_non_exhaustive()
	}
}

impl MemoryFileSystem {
	/// Creates an empty file system.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a file system seeded with `(path or uri, content)` pairs.
	pub fn from_files<I, K, V>(files: I) -> Result<Self>
	where
		I: IntoIterator<Item = (K, V)>,
		K: AsRef<str>,
		V: Into<Arc<str>>,
	{
		let fs = Self::new();
		{
			let mut map = fs.inner.files.write();
			for (key, content) in files {
				map.insert(CanonicalUri::parse(key.as_ref())?, content.into());
			}
		}
		Ok(fs)
	}

	/// Delays every read by `latency`, simulating slow storage.
	pub fn with_latency(self, latency: Duration) -> Self {
		self.set_latency(latency);
		self
	}

	pub fn set_latency(&self, latency: Duration) {
		*self.inner.latency.lock() = latency;
	}

	/// Inserts or replaces a file and publishes `Add` or `Change`.
	pub fn insert(&self, uri: &CanonicalUri, content: impl Into<Arc<str>>) {
		let previous = self.inner.files.write().insert(uri.clone(), content.into());
		let kind = if previous.is_some() {
			FileEventKind::Change
		} else {
			FileEventKind::Add
		};
		self.emit(FileEvent::new(kind, uri.clone()));
	}

	/// Removes a file and publishes `Unlink`. Returns false if absent.
	pub fn remove(&self, uri: &CanonicalUri) -> bool {
		let removed = self.inner.files.write().remove(uri).is_some();
		if removed {
			self.emit(FileEvent::new(FileEventKind::Unlink, uri.clone()));
		}
		removed
	}

	/// Removes every file under `dir` and publishes one `UnlinkDir`.
	pub fn remove_dir(&self, dir: &CanonicalUri) -> usize {
		let removed = {
			let mut files = self.inner.files.write();
			let doomed: Vec<_> = files.keys().filter(|uri| uri.is_under(dir)).cloned().collect();
			for uri in &doomed {
				files.remove(uri);
			}
			doomed.len()
		};
		if removed > 0 {
			self.emit(FileEvent::new(FileEventKind::UnlinkDir, dir.clone()));
		}
		removed
	}

	/// Current content, without counting a read.
	pub fn contents(&self, uri: &CanonicalUri) -> Option<Arc<str>> {
		self.inner.files.read().get(uri).cloned()
	}

	/// Number of `read_file` calls that reached `uri`.
	pub fn read_count(&self, uri: &CanonicalUri) -> usize {
		self.inner.reads.lock().get(uri).copied().unwrap_or(0)
	}

	/// Number of `read_file` calls across all URIs.
	pub fn total_reads(&self) -> usize {
		self.inner.reads.lock().values().sum()
	}

	/// Publishes an event to matching watchers without touching content.
	pub fn emit(&self, event: FileEvent) {
		let mut watchers = self.inner.watchers.lock();
		watchers.retain(|_, watcher| {
			if !watcher.wants(&event.uri) {
				return !watcher.tx.is_closed();
			}
			watcher.tx.send(event.clone()).is_ok()
		});
	}
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
	async fn read_file(&self, uri: &CanonicalUri) -> Result<String> {
		let latency = *self.inner.latency.lock();
		if !latency.is_zero() {
			tokio::time::sleep(latency).await;
		}
		*self.inner.reads.lock().entry(uri.clone()).or_default() += 1;
		self.inner
			.files
			.read()
			.get(uri)
			.map(|content| content.to_string())
			.ok_or_else(|| FsError::NotFound(uri.clone()))
	}

	async fn write_file(&self, uri: &CanonicalUri, content: &str) -> Result<()> {
		self.insert(uri, content);
		Ok(())
	}

	async fn stat(&self, uri: &CanonicalUri) -> Result<Option<FileKind>> {
		let files = self.inner.files.read();
		if !uri.is_dir_form() && files.contains_key(uri) {
			return Ok(Some(FileKind::File));
		}
		let is_dir = files.keys().any(|file| file != uri && file.is_under(uri));
		Ok(is_dir.then_some(FileKind::Directory))
	}

	fn watch(&self, uris: &[CanonicalUri]) -> Result<WatchSubscription> {
		let (tx, rx) = mpsc::unbounded_channel();
		let id = self.inner.next_watcher.fetch_add(1, Ordering::Relaxed);
		self.inner.watchers.lock().insert(
			id,
			MemoryWatcher {
				scopes: uris.to_vec(),
				tx,
			},
		);
		tracing::trace!(id, scopes = uris.len(), "memory_fs.watch");
		let guard = WatchGuard {
			inner: Arc::downgrade(&self.inner),
			id,
		};
		Ok(WatchSubscription::new(rx, guard))
	}
}

struct WatchGuard {
	inner: Weak<MemoryInner>,
	id: u64,
}

impl Drop for WatchGuard {
	fn drop(&mut self) {
		if let Some(inner) = self.inner.upgrade() {
			inner.watchers.lock().remove(&self.id);
		}
	}
}
