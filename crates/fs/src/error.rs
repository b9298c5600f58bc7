//! Error types for file system operations.

use std::sync::Arc;

use thiserror::Error;

use crate::CanonicalUri;

/// Errors produced by [`crate::FileSystem`] backends and URI parsing.
///
/// Errors are `Clone` so one failed read can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum FsError {
	/// No file exists at the URI.
	#[error("file not found: {0}")]
	NotFound(CanonicalUri),

	/// The input could not be turned into a canonical URI.
	#[error("invalid uri `{input}`: {reason}")]
	InvalidUri {
		/// Raw input that failed to parse.
		input: String,
		/// Why it was rejected.
		reason: String,
	},

	/// The URI has no local file path (e.g. a `memory:` URI on disk).
	#[error("uri has no local file path: {0}")]
	NotLocal(CanonicalUri),

	/// Underlying storage failure.
	#[error("I/O error on {uri}: {error}")]
	Io {
		/// URI the operation targeted.
		uri: CanonicalUri,
		/// The underlying I/O error.
		error: Arc<std::io::Error>,
	},

	/// Failed to set up change watching.
	#[error("failed to watch: {0}")]
	Watch(String),
}

impl FsError {
	pub(crate) fn invalid(input: impl Into<String>, reason: impl Into<String>) -> Self {
		Self::InvalidUri {
			input: input.into(),
			reason: reason.into(),
		}
	}

	pub(crate) fn io(uri: &CanonicalUri, error: std::io::Error) -> Self {
		if error.kind() == std::io::ErrorKind::NotFound {
			return Self::NotFound(uri.clone());
		}
		Self::Io {
			uri: uri.clone(),
			error: Arc::new(error),
		}
	}

	/// Returns true for [`FsError::NotFound`].
	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::NotFound(_))
	}
}

/// Result type for file system operations.
pub type Result<T> = std::result::Result<T, FsError>;
