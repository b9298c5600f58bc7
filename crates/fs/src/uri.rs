//! Canonical file identities.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use url::Url;

use crate::error::{FsError, Result};

/// Normalized, protocol-qualified identity of a resolvable file.
///
/// Two URIs naming the same file compare equal: dot segments are collapsed,
/// empty segments dropped, the scheme lowercased and query/fragment removed.
/// A trailing slash marks the directory form produced by [`Self::parent`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalUri {
	url: Arc<Url>,
}

impl CanonicalUri {
	/// Parses a protocol-qualified URI or an absolute path.
	///
	/// Paths starting with `/` become `file:` URIs. Relative inputs are
	/// rejected because they have no identity without a base.
	pub fn parse(input: &str) -> Result<Self> {
		let trimmed = input.trim();
		if trimmed.is_empty() {
			return Err(FsError::invalid(input, "empty input"));
		}
		if trimmed.starts_with('/') {
			let url = Url::parse(&format!("file://{trimmed}")).map_err(|e| FsError::invalid(input, e.to_string()))?;
			return Self::from_url(url);
		}
		if has_scheme(trimmed) {
			let url = Url::parse(trimmed).map_err(|e| FsError::invalid(input, e.to_string()))?;
			return Self::from_url(url);
		}
		let path = Path::new(trimmed);
		if path.is_absolute() {
			return Self::from_path(path);
		}
		Err(FsError::invalid(input, "relative input has no base"))
	}

	/// Builds a `file:` URI from an absolute host path.
	pub fn from_path(path: &Path) -> Result<Self> {
		let url = Url::from_file_path(path).map_err(|()| FsError::invalid(path.display().to_string(), "not an absolute path"))?;
		Self::from_url(url)
	}

	/// Normalizes an already parsed URL.
	pub fn from_url(url: Url) -> Result<Self> {
		if url.cannot_be_a_base() {
			return Err(FsError::invalid(url.as_str(), "opaque uri has no path"));
		}
		Ok(Self { url: Arc::new(normalize(url)) })
	}

	/// Returns true if `input` carries its own scheme (`memory:`, `file:`...).
	pub fn is_protocol_qualified(input: &str) -> bool {
		has_scheme(input)
	}

	pub fn as_str(&self) -> &str {
		self.url.as_str()
	}

	pub fn as_url(&self) -> &Url {
		&self.url
	}

	pub fn scheme(&self) -> &str {
		self.url.scheme()
	}

	/// Percent-encoded path component.
	pub fn path(&self) -> &str {
		self.url.path()
	}

	/// Returns true for the directory form (trailing slash).
	pub fn is_dir_form(&self) -> bool {
		self.url.path().ends_with('/')
	}

	/// Last non-empty path segment.
	pub fn file_name(&self) -> Option<&str> {
		self.url.path_segments()?.rev().find(|segment| !segment.is_empty())
	}

	/// Extension of [`Self::file_name`], without the dot.
	pub fn extension(&self) -> Option<&str> {
		let name = self.file_name()?;
		let (stem, ext) = name.rsplit_once('.')?;
		(!stem.is_empty() && !ext.is_empty()).then_some(ext)
	}

	/// Directory containing this URI, in directory form.
	///
	/// Returns `None` at the root.
	pub fn parent(&self) -> Option<Self> {
		let path = self.url.path().trim_end_matches('/');
		if path.is_empty() {
			return None;
		}
		let cut = path.rfind('/')?;
		let mut url = (*self.url).clone();
		url.set_path(&path[..=cut]);
		Some(Self { url: Arc::new(url) })
	}

	/// Directory form of this URI.
	pub fn as_dir(&self) -> Self {
		if self.is_dir_form() {
			return self.clone();
		}
		let mut url = (*self.url).clone();
		url.set_path(&format!("{}/", self.url.path()));
		Self { url: Arc::new(url) }
	}

	/// Resolves `reference` against this URI (RFC 3986 reference resolution).
	///
	/// A file URI resolves against its directory; a directory form resolves
	/// against itself.
	pub fn join(&self, reference: &str) -> Result<Self> {
		let url = self.url.join(reference).map_err(|e| FsError::invalid(reference, e.to_string()))?;
		Self::from_url(url)
	}

	/// Appends `suffix` to the last path segment (`/a/b` + `.x` = `/a/b.x`).
	pub fn with_suffix(&self, suffix: &str) -> Self {
		let path = self.url.path().trim_end_matches('/');
		let mut url = (*self.url).clone();
		url.set_path(&format!("{path}{suffix}"));
		Self { url: Arc::new(url) }
	}

	/// Returns true if `self` equals `dir` or lies beneath it.
	pub fn is_under(&self, dir: &Self) -> bool {
		if self.url.scheme() != dir.url.scheme() || self.url.host_str() != dir.url.host_str() {
			return false;
		}
		let prefix = dir.url.path().trim_end_matches('/');
		let path = self.url.path();
		path == prefix || path.trim_end_matches('/') == prefix || path.starts_with(&format!("{prefix}/"))
	}

	/// Host path for `file:` URIs.
	pub fn to_file_path(&self) -> Result<PathBuf> {
		if self.url.scheme() != "file" {
			return Err(FsError::NotLocal(self.clone()));
		}
		self.url.to_file_path().map_err(|()| FsError::NotLocal(self.clone()))
	}
}

impl fmt::Display for CanonicalUri {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl fmt::Debug for CanonicalUri {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "CanonicalUri({})", self.as_str())
	}
}

impl serde::Serialize for CanonicalUri {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		serializer.serialize_str(self.as_str())
	}
}

impl std::str::FromStr for CanonicalUri {
	type Err = FsError;

	fn from_str(s: &str) -> Result<Self> {
		Self::parse(s)
	}
}

fn has_scheme(input: &str) -> bool {
	let Some((scheme, _)) = input.split_once(':') else {
		return false;
	};
	// Single letters are drive prefixes (`C:\`), not schemes.
	scheme.len() > 1
		&& scheme.starts_with(|c: char| c.is_ascii_alphabetic())
		&& scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn normalize(mut url: Url) -> Url {
	let trailing = url.path().ends_with('/');
	let segments: Vec<String> = url
		.path_segments()
		.map(|segments| segments.filter(|s| !s.is_empty()).map(str::to_owned).collect())
		.unwrap_or_default();
	let mut path = format!("/{}", segments.join("/"));
	if trailing && !segments.is_empty() {
		path.push('/');
	}
	url.set_path(&path);
	url.set_query(None);
	url.set_fragment(None);
	url
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn absolute_path_becomes_file_uri() {
		let uri = CanonicalUri::parse("/a/b.x").unwrap();
		assert_eq!(uri.as_str(), "file:///a/b.x");
		assert_eq!(uri.extension(), Some("x"));
		assert_eq!(uri.file_name(), Some("b.x"));
	}

	#[test]
	fn dot_segments_and_empty_segments_collapse() {
		let a = CanonicalUri::parse("memory:///src//lib/../a.x").unwrap();
		let b = CanonicalUri::parse("MEMORY:///src/a.x").unwrap();
		assert_eq!(a, b);
		assert_eq!(a.as_str(), "memory:///src/a.x");
	}

	#[test]
	fn relative_input_is_rejected() {
		assert!(CanonicalUri::parse("./a.x").is_err());
		assert!(CanonicalUri::parse("").is_err());
	}

	#[test]
	fn parent_is_directory_form() {
		let uri = CanonicalUri::parse("/a/b/c.x").unwrap();
		let parent = uri.parent().unwrap();
		assert_eq!(parent.as_str(), "file:///a/b/");
		assert!(parent.is_dir_form());
		assert_eq!(parent.parent().unwrap().as_str(), "file:///a/");
		assert!(CanonicalUri::parse("/").unwrap().parent().is_none());
	}

	#[test]
	fn join_resolves_against_directory() {
		let base = CanonicalUri::parse("/a/b/c.x").unwrap();
		assert_eq!(base.join("./d.x").unwrap().as_str(), "file:///a/b/d.x");
		assert_eq!(base.join("../e.x").unwrap().as_str(), "file:///a/e.x");
		assert_eq!(base.join("/f.x").unwrap().as_str(), "file:///f.x");
		assert_eq!(base.parent().unwrap().join("g").unwrap().as_str(), "file:///a/b/g");
	}

	#[test]
	fn suffix_and_dir_prefix() {
		let base = CanonicalUri::parse("/lib/util").unwrap();
		assert_eq!(base.with_suffix(".x").as_str(), "file:///lib/util.x");
		assert_eq!(base.as_dir().join("index.x").unwrap().as_str(), "file:///lib/util/index.x");

		let dir = CanonicalUri::parse("/lib").unwrap();
		assert!(base.is_under(&dir));
		assert!(!CanonicalUri::parse("/library/x").unwrap().is_under(&dir));
	}

	#[test]
	fn drive_letter_is_not_a_scheme() {
		assert!(!CanonicalUri::is_protocol_qualified("C:/x"));
		assert!(CanonicalUri::is_protocol_qualified("memory:///x"));
		assert!(!CanonicalUri::is_protocol_qualified("./x"));
	}

	proptest! {
		#[test]
		fn normalization_is_idempotent(segments in prop::collection::vec("[a-z]{1,4}|\\.|\\.\\.", 1..8)) {
			let input = format!("/{}", segments.join("/"));
			let once = CanonicalUri::parse(&input).unwrap();
			let twice = CanonicalUri::parse(once.as_str()).unwrap();
			prop_assert_eq!(once, twice);
		}
	}
}
