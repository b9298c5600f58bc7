use std::path::PathBuf;

use async_trait::async_trait;

use crate::{CanonicalUri, FileKind, FileSystem, FsError, Result, WatchSubscription};

/// [`FileSystem`] over the host disk.
///
/// Only `file:` URIs are accepted. Change events come from `notify` when the
/// `watch` feature is enabled; watching an empty URI set watches `root`.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem {
	root: Option<PathBuf>,
}

impl LocalFileSystem {
	pub fn new() -> Self {
		Self::default()
	}

	/// Uses `root` as the default watch scope.
	pub fn with_root(root: impl Into<PathBuf>) -> Self {
		Self { root: Some(root.into()) }
	}

	pub fn root(&self) -> Option<&PathBuf> {
		self.root.as_ref()
	}
}

#[async_trait]
impl FileSystem for LocalFileSystem {
	async fn read_file(&self, uri: &CanonicalUri) -> Result<String> {
		let path = uri.to_file_path()?;
		tracing::trace!(path = %path.display(), "local_fs.read");
		tokio::fs::read_to_string(&path).await.map_err(|e| FsError::io(uri, e))
	}

	async fn write_file(&self, uri: &CanonicalUri, content: &str) -> Result<()> {
		let path = uri.to_file_path()?;
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await.map_err(|e| FsError::io(uri, e))?;
		}
		tokio::fs::write(&path, content).await.map_err(|e| FsError::io(uri, e))
	}

	async fn stat(&self, uri: &CanonicalUri) -> Result<Option<FileKind>> {
		let path = uri.to_file_path()?;
		match tokio::fs::metadata(&path).await {
			Ok(meta) if meta.is_dir() => Ok(Some(FileKind::Directory)),
			Ok(_) => Ok(Some(FileKind::File)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(FsError::io(uri, e)),
		}
	}

	#[cfg(feature = "watch")]
	fn watch(&self, uris: &[CanonicalUri]) -> Result<WatchSubscription> {
		use notify::{RecursiveMode, Watcher};

		let mut paths = uris.iter().map(CanonicalUri::to_file_path).collect::<Result<Vec<_>>>()?;
		if paths.is_empty() {
			let root = self.root.clone().ok_or_else(|| FsError::Watch("no paths given and no root configured".into()))?;
			paths.push(root);
		}

		let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
		let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
			Ok(event) => {
				for file_event in watch::translate(&event) {
					let _ = tx.send(file_event);
				}
			}
			Err(error) => tracing::warn!(%error, "local_fs.watch.error"),
		})
		.map_err(|e| FsError::Watch(e.to_string()))?;

		for path in &paths {
			watcher
				.watch(path, RecursiveMode::Recursive)
				.map_err(|e| FsError::Watch(format!("{}: {e}", path.display())))?;
		}
		tracing::debug!(paths = paths.len(), "local_fs.watch");
		Ok(WatchSubscription::new(rx, watcher))
	}

	#[cfg(not(feature = "watch"))]
	fn watch(&self, _uris: &[CanonicalUri]) -> Result<WatchSubscription> {
		Err(FsError::Watch("built without the `watch` feature".into()))
	}
}

#[cfg(feature = "watch")]
mod watch {
	use notify::EventKind;
	use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};

	use crate::{CanonicalUri, FileEvent, FileEventKind};

	pub(super) fn translate(event: &notify::Event) -> Vec<FileEvent> {
		let kind = match event.kind {
			EventKind::Create(CreateKind::Folder) => FileEventKind::AddDir,
			EventKind::Create(_) => FileEventKind::Add,
			EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FileEventKind::Unlink,
			EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FileEventKind::Add,
			EventKind::Modify(_) => FileEventKind::Change,
			EventKind::Remove(RemoveKind::Folder) => FileEventKind::UnlinkDir,
			EventKind::Remove(_) => FileEventKind::Unlink,
			EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
		};
		event
			.paths
			.iter()
			.filter_map(|path| CanonicalUri::from_path(path).ok())
			.map(|uri| FileEvent::new(kind, uri))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[tokio::test]
	async fn round_trips_through_disk() {
		let dir = tempfile::tempdir().unwrap();
		let fs = LocalFileSystem::with_root(dir.path());
		let uri = CanonicalUri::from_path(&dir.path().join("nested/a.x")).unwrap();

		assert_eq!(fs.stat(&uri).await.unwrap(), None);
		fs.write_file(&uri, "export default 1").await.unwrap();
		assert_eq!(fs.read_file(&uri).await.unwrap(), "export default 1");
		assert_eq!(fs.stat(&uri).await.unwrap(), Some(FileKind::File));
		assert_eq!(fs.stat(&uri.parent().unwrap()).await.unwrap(), Some(FileKind::Directory));
	}

	#[tokio::test]
	async fn missing_file_maps_to_not_found() {
		let dir = tempfile::tempdir().unwrap();
		let uri = CanonicalUri::from_path(&dir.path().join("missing.x")).unwrap();
		let err = LocalFileSystem::new().read_file(&uri).await.unwrap_err();
		assert!(err.is_not_found());
	}

	#[tokio::test]
	async fn rejects_non_file_uris() {
		let uri = CanonicalUri::parse("memory:///a.x").unwrap();
		let err = LocalFileSystem::new().read_file(&uri).await.unwrap_err();
		assert!(matches!(err, FsError::NotLocal(_)));
	}
}
