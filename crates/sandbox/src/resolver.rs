//! Specifier resolution.
//!
//! A specifier is resolved against the directory of the importing file:
//!
//! 1. protocol-qualified (`memory:///a.x`): normalized, must exist as written;
//! 2. absolute (`/a.x`): re-rooted on the base's scheme, then probed;
//! 3. relative (`./a`, `../a`): joined with the base, then probed;
//! 4. bare (`pkg/a`): probed under each module directory of the base and of
//!    every ancestor.
//!
//! Probing tries the path as written, then each extension, then each index
//! file (itself tried with every extension). Successful answers are memoized
//! per `(specifier, base)` until [`FileResolver::clear`].

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tandem_fs::{CanonicalUri, FileKind, FileSystem};

use crate::config::ResolverOptions;
use crate::error::ResolutionError;

type MemoKey = (String, CanonicalUri);

/// Resolves specifiers to canonical URIs of existing files.
///
/// Cheap to clone; clones share the memo.
#[derive(Clone)]
pub struct FileResolver {
	fs: Arc<dyn FileSystem>,
	options: Arc<ResolverOptions>,
	memo: Arc<Mutex<FxHashMap<MemoKey, CanonicalUri>>>,
}

impl std::fmt::Debug for FileResolver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FileResolver")
			.field("options", &self.options)
			.field("memoized", &self.memo.lock().len())
			.finish_non_exhaustive()
	}
}

impl FileResolver {
	pub fn new(fs: Arc<dyn FileSystem>, options: ResolverOptions) -> Self {
		Self {
			fs,
			options: Arc::new(options),
			memo: Arc::new(Mutex::new(FxHashMap::default())),
		}
	}

	pub fn options(&self) -> &ResolverOptions {
		&self.options
	}

	/// Resolves `specifier` relative to `base_dir` with the configured options.
	///
	/// `base_dir` may be a file URI; its directory is used.
	pub async fn resolve(&self, specifier: &str, base_dir: &CanonicalUri) -> Result<CanonicalUri, ResolutionError> {
		let key = (specifier.to_string(), base_dir.clone());
		if let Some(hit) = self.memo.lock().get(&key) {
			return Ok(hit.clone());
		}
		let resolved = self.resolve_with(specifier, base_dir, &self.options).await?;
		self.memo.lock().insert(key, resolved.clone());
		Ok(resolved)
	}

	/// Resolves with explicit options, bypassing the memo.
	pub async fn resolve_with(
		&self,
		specifier: &str,
		base_dir: &CanonicalUri,
		options: &ResolverOptions,
	) -> Result<CanonicalUri, ResolutionError> {
		let base = if base_dir.is_dir_form() { base_dir.clone() } else { base_dir.parent().unwrap_or_else(|| base_dir.as_dir()) };
		let invalid = |source| ResolutionError::InvalidSpecifier {
			specifier: specifier.to_string(),
			source,
		};

		if specifier.trim().is_empty() {
			return Err(invalid(tandem_fs::FsError::InvalidUri {
				input: specifier.to_string(),
				reason: "empty specifier".into(),
			}));
		}

		let mut tried = Vec::new();
		let found = if CanonicalUri::is_protocol_qualified(specifier) {
			let uri = CanonicalUri::parse(specifier).map_err(invalid)?;
			self.probe_exact(specifier, &uri, &mut tried).await?
		} else if specifier.starts_with('/') || is_relative(specifier) {
			// Absolute paths keep the base's scheme and authority.
			let uri = base.join(specifier).map_err(invalid)?;
			self.probe(specifier, &uri, options, &mut tried).await?
		} else {
			self.probe_modules(specifier, &base, options, &mut tried).await?
		};

		match found {
			Some(uri) => {
				tracing::trace!(specifier, base = %base, resolved = %uri, "resolver.resolve");
				Ok(uri)
			}
			None => {
				tracing::debug!(specifier, base = %base, candidates = tried.len(), "resolver.not_found");
				Err(ResolutionError::NotFound {
					specifier: specifier.to_string(),
					base,
					tried,
				})
			}
		}
	}

	/// Forgets every memoized answer.
	pub fn clear(&self) {
		let mut memo = self.memo.lock();
		if !memo.is_empty() {
			tracing::trace!(entries = memo.len(), "resolver.clear");
			memo.clear();
		}
	}

	async fn probe_exact(
		&self,
		specifier: &str,
		uri: &CanonicalUri,
		tried: &mut Vec<CanonicalUri>,
	) -> Result<Option<CanonicalUri>, ResolutionError> {
		tried.push(uri.clone());
		Ok(self.is_file(specifier, uri).await?.then(|| uri.clone()))
	}

	async fn probe(
		&self,
		specifier: &str,
		target: &CanonicalUri,
		options: &ResolverOptions,
		tried: &mut Vec<CanonicalUri>,
	) -> Result<Option<CanonicalUri>, ResolutionError> {
		for candidate in candidates(target, options) {
			tried.push(candidate.clone());
			if self.is_file(specifier, &candidate).await? {
				return Ok(Some(candidate));
			}
		}
		Ok(None)
	}

	async fn probe_modules(
		&self,
		specifier: &str,
		base: &CanonicalUri,
		options: &ResolverOptions,
		tried: &mut Vec<CanonicalUri>,
	) -> Result<Option<CanonicalUri>, ResolutionError> {
		let mut dir = Some(base.clone());
		while let Some(current) = dir {
			for module_dir in &options.module_directories {
				let target = current
					.join(&format!("{module_dir}/{specifier}"))
					.map_err(|source| ResolutionError::InvalidSpecifier {
						specifier: specifier.to_string(),
						source,
					})?;
				if let Some(found) = self.probe(specifier, &target, options, tried).await? {
					return Ok(Some(found));
				}
			}
			dir = current.parent();
		}
		Ok(None)
	}

	async fn is_file(&self, specifier: &str, uri: &CanonicalUri) -> Result<bool, ResolutionError> {
		match self.fs.stat(uri).await {
			Ok(kind) => Ok(kind == Some(FileKind::File)),
			Err(e) if e.is_not_found() => Ok(false),
			Err(source) => Err(ResolutionError::Io {
				specifier: specifier.to_string(),
				source,
			}),
		}
	}
}

fn is_relative(specifier: &str) -> bool {
	specifier == "." || specifier == ".." || specifier.starts_with("./") || specifier.starts_with("../")
}

/// Probe order for one target: as written, with each extension, then index
/// files with and without extensions.
fn candidates(target: &CanonicalUri, options: &ResolverOptions) -> Vec<CanonicalUri> {
	let mut out = Vec::new();
	if !target.is_dir_form() {
		out.push(target.clone());
		out.extend(options.extensions.iter().map(|ext| target.with_suffix(ext)));
	}
	let dir = target.as_dir();
	for index in &options.index_files {
		let Ok(index_uri) = dir.join(index) else {
			continue;
		};
		out.push(index_uri.clone());
		out.extend(options.extensions.iter().map(|ext| index_uri.with_suffix(ext)));
	}
	out
}

#[cfg(test)]
mod tests;
