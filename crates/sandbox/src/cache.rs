//! Content cache keyed by canonical URI.
//!
//! One [`ContentRecord`] per URI. Versions come from a cache-wide counter, so
//! a version is never reused even after a record is evicted and fetched
//! again. Concurrent reads of one URI share a single file system read.
//!
//! Subscribers are notified synchronously whenever a record's content
//! changes: through [`FileCache::set`], or when a fetch brings back content
//! that differs from what was cached. Handlers run outside every cache lock.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tandem_fs::{CanonicalUri, FileSystem};

use crate::config::CacheOptions;
use crate::error::CacheError;
use crate::singleflight::SingleFlight;

/// Snapshot of one cached file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
	pub uri: CanonicalUri,
	pub content: Arc<str>,
	/// Bumped on every content change.
	pub version: u64,
	/// Set by [`FileCache::invalidate`]; the next `get` re-fetches.
	pub stale: bool,
}

/// Payload handed to change subscribers.
#[derive(Debug, Clone)]
pub struct CacheChange {
	pub uri: CanonicalUri,
	pub version: u64,
	pub content: Arc<str>,
	/// Version replaced by this change, if a record existed.
	pub previous: Option<u64>,
}

type Handler = Arc<dyn Fn(&CacheChange) + Send + Sync>;

struct CacheInner {
	fs: Arc<dyn FileSystem>,
	options: CacheOptions,
	records: RwLock<FxHashMap<CanonicalUri, ContentRecord>>,
	fetches: SingleFlight<CanonicalUri, Result<ContentRecord, CacheError>>,
	subscribers: Mutex<FxHashMap<CanonicalUri, Vec<(u64, Handler)>>>,
	next_subscriber: AtomicU64,
	next_version: AtomicU64,
	fetch_count: AtomicUsize,
}

/// Shared content cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FileCache {
	inner: Arc<CacheInner>,
}

impl std::fmt::Debug for FileCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FileCache")
			.field("records", &self.inner.records.read().len())
			.field("fetches", &self.fetch_count())
			.finish_non_exhaustive()
	}
}

impl FileCache {
	pub fn new(fs: Arc<dyn FileSystem>, options: CacheOptions) -> Self {
		Self {
			inner: Arc::new(CacheInner {
				fs,
				options,
				records: RwLock::new(FxHashMap::default()),
				fetches: SingleFlight::new(),
				subscribers: Mutex::new(FxHashMap::default()),
				next_subscriber: AtomicU64::new(0),
				next_version: AtomicU64::new(0),
				fetch_count: AtomicUsize::new(0),
			}),
		}
	}

	pub fn file_system(&self) -> &Arc<dyn FileSystem> {
		&self.inner.fs
	}

	/// Returns the record for `uri`, fetching when missing or stale.
	pub async fn get(&self, uri: &CanonicalUri) -> Result<ContentRecord, CacheError> {
		if let Some(record) = self.inner.records.read().get(uri).filter(|r| !r.stale) {
			return Ok(record.clone());
		}
		self.fetch(uri).await
	}

	/// Fetches `uri` even if the cached record is fresh.
	pub async fn refresh(&self, uri: &CanonicalUri) -> Result<ContentRecord, CacheError> {
		self.fetch(uri).await
	}

	/// Replaces the content of `uri` and notifies subscribers before returning.
	///
	/// Returns the new version.
	pub fn set(&self, uri: &CanonicalUri, content: impl Into<Arc<str>>) -> u64 {
		let content = content.into();
		let version = self.next_version();
		let previous = {
			let mut records = self.inner.records.write();
			let previous = records.get(uri).map(|r| r.version);
			records.insert(
				uri.clone(),
				ContentRecord {
					uri: uri.clone(),
					content: Arc::clone(&content),
					version,
					stale: false,
				},
			);
			previous
		};
		tracing::trace!(uri = %uri, version, "cache.set");
		self.notify(&CacheChange {
			uri: uri.clone(),
			version,
			content,
			previous,
		});
		version
	}

	/// Persists `content` through the file system, then [`Self::set`]s it.
	pub async fn write(&self, uri: &CanonicalUri, content: &str) -> Result<u64, CacheError> {
		self.inner.fs.write_file(uri, content).await?;
		Ok(self.set(uri, content))
	}

	/// Marks the record stale. The last content stays readable via [`Self::peek`].
	///
	/// Returns false if nothing was cached.
	pub fn invalidate(&self, uri: &CanonicalUri) -> bool {
		match self.inner.records.write().get_mut(uri) {
			Some(record) => {
				record.stale = true;
				tracing::trace!(uri = %uri, version = record.version, "cache.invalidate");
				true
			}
			None => false,
		}
	}

	/// Drops the record for `uri`.
	pub fn evict(&self, uri: &CanonicalUri) -> Option<ContentRecord> {
		let evicted = self.inner.records.write().remove(uri);
		if evicted.is_some() {
			tracing::trace!(uri = %uri, "cache.evict");
		}
		evicted
	}

	/// Drops every record under the directory `dir`.
	pub fn evict_under(&self, dir: &CanonicalUri) -> Vec<CanonicalUri> {
		let mut records = self.inner.records.write();
		let doomed: Vec<_> = records.keys().filter(|uri| uri.is_under(dir)).cloned().collect();
		for uri in &doomed {
			records.remove(uri);
		}
		doomed
	}

	/// Cached record without I/O, stale or not.
	pub fn peek(&self, uri: &CanonicalUri) -> Option<ContentRecord> {
		self.inner.records.read().get(uri).cloned()
	}

	/// Calls `handler` on every content change of `uri` until the returned
	/// subscription is dropped.
	pub fn on_change<F>(&self, uri: &CanonicalUri, handler: F) -> CacheSubscription
	where
		F: Fn(&CacheChange) + Send + Sync + 'static,
	{
		let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
		self.inner
			.subscribers
			.lock()
			.entry(uri.clone())
			.or_default()
			.push((id, Arc::new(handler)));
		CacheSubscription {
			inner: Arc::downgrade(&self.inner),
			uri: uri.clone(),
			id,
		}
	}

	/// Number of live subscriptions for `uri`.
	pub fn subscriber_count(&self, uri: &CanonicalUri) -> usize {
		self.inner.subscribers.lock().get(uri).map_or(0, Vec::len)
	}

	/// Number of reads that reached the file system.
	pub fn fetch_count(&self) -> usize {
		self.inner.fetch_count.load(Ordering::Relaxed)
	}

	async fn fetch(&self, uri: &CanonicalUri) -> Result<ContentRecord, CacheError> {
		let this = self.clone();
		let key = uri.clone();
		self.inner.fetches.run(uri.clone(), move || async move { this.fetch_uncached(&key).await }).await
	}

	async fn fetch_uncached(&self, uri: &CanonicalUri) -> Result<ContentRecord, CacheError> {
		let started_at = self.peek(uri).map(|r| r.version);
		self.inner.fetch_count.fetch_add(1, Ordering::Relaxed);
		let content = self.inner.fs.read_file(uri).await?;
		let limit = self.inner.options.max_content_bytes;
		if content.len() > limit {
			return Err(CacheError::TooLarge {
				uri: uri.clone(),
				size: content.len(),
				limit,
			});
		}
		tracing::trace!(uri = %uri, bytes = content.len(), "cache.fetch");

		let (record, previous) = {
			let mut records = self.inner.records.write();
			let previous = match records.get_mut(uri) {
				// A `set` landed while the read was in flight; it wins.
				Some(current) if Some(current.version) != started_at => return Ok(current.clone()),
				Some(current) if *current.content == *content => {
					current.stale = false;
					return Ok(current.clone());
				}
				current => current.map(|r| r.version),
			};
			let record = ContentRecord {
				uri: uri.clone(),
				content: Arc::from(content),
				version: self.next_version(),
				stale: false,
			};
			records.insert(uri.clone(), record.clone());
			(record, previous)
		};
		let change = CacheChange {
			uri: uri.clone(),
			version: record.version,
			content: Arc::clone(&record.content),
			previous,
		};
		if change.previous.is_some() {
			tracing::debug!(uri = %uri, version = record.version, "cache.changed");
		}
		self.notify(&change);
		Ok(record)
	}

	fn next_version(&self) -> u64 {
		self.inner.next_version.fetch_add(1, Ordering::AcqRel) + 1
	}

	fn notify(&self, change: &CacheChange) {
		let handlers: Vec<Handler> = self
			.inner
			.subscribers
			.lock()
			.get(&change.uri)
			.map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
			.unwrap_or_default();
		for handler in handlers {
			handler(change);
		}
	}
}

/// Keeps a change handler registered. Dropping it unsubscribes.
pub struct CacheSubscription {
	inner: Weak<CacheInner>,
	uri: CanonicalUri,
	id: u64,
}

impl std::fmt::Debug for CacheSubscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CacheSubscription").field("uri", &self.uri).field("id", &self.id).finish()
	}
}

impl Drop for CacheSubscription {
	fn drop(&mut self) {
		let Some(inner) = self.inner.upgrade() else {
			return;
		};
		let mut subscribers = inner.subscribers.lock();
		if let Some(subs) = subscribers.get_mut(&self.uri) {
			subs.retain(|(id, _)| *id != self.id);
			if subs.is_empty() {
				subscribers.remove(&self.uri);
			}
		}
	}
}

#[cfg(test)]
mod tests;
