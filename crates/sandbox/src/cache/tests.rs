use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tandem_fs::MemoryFileSystem;

use super::*;

fn uri(input: &str) -> CanonicalUri {
	CanonicalUri::parse(input).unwrap()
}

fn cache_over(fs: &MemoryFileSystem) -> FileCache {
	FileCache::new(Arc::new(fs.clone()), CacheOptions::default())
}

#[tokio::test(start_paused = true)]
async fn concurrent_gets_share_one_read() {
	let fs = MemoryFileSystem::from_files([("/a.x", "a")]).unwrap().with_latency(Duration::from_millis(5));
	let cache = cache_over(&fs);
	let a = uri("/a.x");

	let (r1, r2, r3) = tokio::join!(cache.get(&a), cache.get(&a), cache.get(&a));
	assert_eq!(r1.unwrap().version, r2.unwrap().version);
	assert_eq!(*r3.unwrap().content, *"a");
	assert_eq!(fs.read_count(&a), 1);
	assert_eq!(cache.fetch_count(), 1);
}

#[tokio::test]
async fn fresh_record_is_served_without_io() {
	let fs = MemoryFileSystem::from_files([("/a.x", "a")]).unwrap();
	let cache = cache_over(&fs);
	let a = uri("/a.x");
	cache.get(&a).await.unwrap();
	cache.get(&a).await.unwrap();
	assert_eq!(fs.read_count(&a), 1);
}

#[tokio::test]
async fn set_bumps_version_and_notifies_before_returning() {
	let fs = MemoryFileSystem::new();
	let cache = cache_over(&fs);
	let a = uri("/a.x");
	let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
	let _sub = {
		let seen = Arc::clone(&seen);
		cache.on_change(&a, move |change| seen.lock().push((change.version, change.content.to_string())))
	};

	let v1 = cache.set(&a, "one");
	let v2 = cache.set(&a, "two");
	assert!(v2 > v1);
	assert_eq!(*seen.lock(), vec![(v1, "one".to_string()), (v2, "two".to_string())]);
	assert_eq!(*cache.get(&a).await.unwrap().content, *"two");
	assert_eq!(fs.read_count(&a), 0);
}

#[tokio::test]
async fn invalidate_keeps_content_until_refetched() {
	let fs = MemoryFileSystem::from_files([("/a.x", "one")]).unwrap();
	let cache = cache_over(&fs);
	let a = uri("/a.x");
	let v1 = cache.get(&a).await.unwrap().version;

	fs.insert(&a, "two");
	assert!(cache.invalidate(&a));
	let peeked = cache.peek(&a).unwrap();
	assert!(peeked.stale);
	assert_eq!(*peeked.content, *"one");

	let fetched = cache.get(&a).await.unwrap();
	assert_eq!(*fetched.content, *"two");
	assert!(fetched.version > v1);
	assert!(!fetched.stale);
}

#[tokio::test]
async fn identical_refetch_keeps_version_and_stays_silent() {
	let fs = MemoryFileSystem::from_files([("/a.x", "same")]).unwrap();
	let cache = cache_over(&fs);
	let a = uri("/a.x");
	let v1 = cache.get(&a).await.unwrap().version;

	let calls = Arc::new(AtomicUsize::new(0));
	let _sub = {
		let calls = Arc::clone(&calls);
		cache.on_change(&a, move |_| {
			calls.fetch_add(1, Ordering::SeqCst);
		})
	};
	cache.invalidate(&a);
	assert_eq!(cache.get(&a).await.unwrap().version, v1);
	assert_eq!(cache.refresh(&a).await.unwrap().version, v1);
	assert_eq!(calls.load(Ordering::SeqCst), 0);
	assert_eq!(fs.read_count(&a), 3);
}

#[tokio::test]
async fn external_change_notifies_on_fetch() {
	let fs = MemoryFileSystem::from_files([("/a.x", "one")]).unwrap();
	let cache = cache_over(&fs);
	let a = uri("/a.x");
	let v1 = cache.get(&a).await.unwrap().version;

	let previous = Arc::new(parking_lot::Mutex::new(None));
	let _sub = {
		let previous = Arc::clone(&previous);
		cache.on_change(&a, move |change| *previous.lock() = change.previous)
	};
	fs.insert(&a, "two");
	cache.refresh(&a).await.unwrap();
	assert_eq!(*previous.lock(), Some(v1));
}

#[tokio::test]
async fn dropping_subscription_unsubscribes() {
	let cache = cache_over(&MemoryFileSystem::new());
	let a = uri("/a.x");
	let calls = Arc::new(AtomicUsize::new(0));
	let sub = {
		let calls = Arc::clone(&calls);
		cache.on_change(&a, move |_| {
			calls.fetch_add(1, Ordering::SeqCst);
		})
	};
	assert_eq!(cache.subscriber_count(&a), 1);
	cache.set(&a, "1");
	drop(sub);
	assert_eq!(cache.subscriber_count(&a), 0);
	cache.set(&a, "2");
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_file_is_not_cached() {
	let fs = MemoryFileSystem::new();
	let cache = cache_over(&fs);
	let a = uri("/a.x");
	assert!(cache.get(&a).await.unwrap_err().is_not_found());
	assert!(cache.peek(&a).is_none());
	fs.insert(&a, "late");
	assert_eq!(*cache.get(&a).await.unwrap().content, *"late");
}

#[tokio::test]
async fn oversized_content_is_rejected() {
	let fs = MemoryFileSystem::from_files([("/big.txt", "0123456789")]).unwrap();
	let cache = FileCache::new(Arc::new(fs), CacheOptions { max_content_bytes: 4 });
	let err = cache.get(&uri("/big.txt")).await.unwrap_err();
	assert!(matches!(err, CacheError::TooLarge { size: 10, limit: 4, .. }));
}

#[tokio::test]
async fn versions_are_never_reused_after_eviction() {
	let fs = MemoryFileSystem::from_files([("/a.x", "one")]).unwrap();
	let cache = cache_over(&fs);
	let a = uri("/a.x");
	let v1 = cache.get(&a).await.unwrap().version;
	assert!(cache.evict(&a).is_some());
	let v2 = cache.get(&a).await.unwrap().version;
	assert!(v2 > v1);
}

#[tokio::test]
async fn write_persists_and_sets() {
	let fs = MemoryFileSystem::new();
	let cache = cache_over(&fs);
	let a = uri("/a.x");
	let version = cache.write(&a, "saved").await.unwrap();
	assert_eq!(fs.contents(&a).as_deref(), Some("saved"));
	assert_eq!(cache.peek(&a).map(|r| r.version), Some(version));
}

#[tokio::test]
async fn evict_under_drops_directory_contents() {
	let fs = MemoryFileSystem::new();
	let cache = cache_over(&fs);
	cache.set(&uri("/d/a.x"), "a");
	cache.set(&uri("/d/e/b.x"), "b");
	cache.set(&uri("/c.x"), "c");
	let mut evicted = cache.evict_under(&uri("/d"));
	evicted.sort();
	assert_eq!(evicted, vec![uri("/d/a.x"), uri("/d/e/b.x")]);
	assert!(cache.peek(&uri("/c.x")).is_some());
}
