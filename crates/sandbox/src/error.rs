//! Error types for resolution, caching, graph operations and evaluation.

use std::sync::Arc;

use tandem_fs::{CanonicalUri, FsError};
use thiserror::Error;

/// Failure to turn a specifier into an existing canonical URI.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
	/// No candidate exists for the specifier.
	#[error("cannot resolve `{specifier}` from {base}: tried {}", format_tried(tried))]
	NotFound {
		/// Raw specifier as written in the importing file.
		specifier: String,
		/// Directory the specifier was resolved against.
		base: CanonicalUri,
		/// Every candidate probed, in order.
		tried: Vec<CanonicalUri>,
	},

	/// The specifier could not be normalized into a URI.
	#[error("invalid specifier `{specifier}`: {source}")]
	InvalidSpecifier {
		specifier: String,
		#[source]
		source: FsError,
	},

	/// A probe failed for a reason other than absence.
	#[error("probing `{specifier}` failed: {source}")]
	Io {
		specifier: String,
		#[source]
		source: FsError,
	},
}

fn format_tried(tried: &[CanonicalUri]) -> String {
	if tried.is_empty() {
		return "nothing".to_string();
	}
	tried.iter().map(CanonicalUri::as_str).collect::<Vec<_>>().join(", ")
}

/// Errors from [`crate::FileCache`] reads.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
	/// The backing file system failed.
	#[error(transparent)]
	Fs(#[from] FsError),

	/// The file exceeds `cache.max_content_bytes`.
	#[error("{uri} is {size} bytes, over the {limit} byte limit")]
	TooLarge { uri: CanonicalUri, size: usize, limit: usize },
}

impl CacheError {
	/// Returns true if the file does not exist.
	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::Fs(e) if e.is_not_found())
	}
}

/// Error surfaced by graph, dependency and host operations.
///
/// `Clone` because one failed load is fanned out to every caller that was
/// waiting on it.
#[derive(Debug, Clone, Error)]
pub enum SandboxError {
	/// A specifier did not resolve.
	#[error(transparent)]
	Resolution(#[from] ResolutionError),

	/// The content of a dependency could not be read.
	#[error("failed to read content: {0}")]
	CacheRead(#[from] CacheError),

	/// The strategy rejected the content.
	#[error("failed to parse {uri}: {message}")]
	Parse { uri: CanonicalUri, message: String },

	/// Strict removal of a URI that other dependencies still import.
	#[error("{uri} is still imported by {}", dependents.len())]
	DependencyInUse {
		uri: CanonicalUri,
		/// Live dependencies listing `uri` as a child.
		dependents: Vec<CanonicalUri>,
	},

	/// The URI has no dependency in this graph.
	#[error("{0} is not part of the graph")]
	NotInGraph(CanonicalUri),

	/// Evaluation was requested before a child finished evaluating.
	#[error("cannot evaluate {uri}: child {child} is not evaluated")]
	NotReady { uri: CanonicalUri, child: CanonicalUri },

	/// The graph was disposed, or the call was cancelled by disposal.
	#[error("dependency graph is disposed")]
	Disposed,

	/// Invalidations kept arriving faster than the subgraph could settle.
	#[error("{uri} did not settle after {passes} passes")]
	Unsettled { uri: CanonicalUri, passes: usize },

	/// A host-supplied URI could not be normalized.
	#[error(transparent)]
	InvalidUri(FsError),

	/// The file system refused a watch subscription.
	#[error("cannot watch: {0}")]
	Watch(FsError),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Failure raised by a compiled module while it runs.
///
/// Never escapes a graph call: the sandbox turns it into a [`Diagnostic`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
	/// The module threw explicitly.
	#[error("uncaught: {0}")]
	Thrown(String),

	/// A name was read that is not bound.
	#[error("{0} is not defined")]
	Undefined(String),

	/// An operator was applied to values it does not accept.
	#[error("type error: {0}")]
	Type(String),

	/// The module imported a specifier that has no evaluated target.
	#[error("unresolved import `{0}`")]
	UnresolvedImport(String),

	/// The module ran past `sandbox.max_steps`.
	#[error("step budget of {0} exhausted")]
	BudgetExhausted(usize),

	/// The dependency has no compiled form to run.
	#[error("module was not compiled")]
	NotCompiled,

	/// The compiled form panicked.
	#[error("module panicked during evaluation")]
	Panicked,
}

/// A strategy's rejection of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
	pub message: String,
	pub line: usize,
}

impl ParseError {
	pub fn new(line: usize, message: impl Into<String>) -> Self {
		Self { message: message.into(), line }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
	Error,
	Warning,
	Info,
}

/// A problem reported against a dependency.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Diagnostic {
	pub uri: CanonicalUri,
	pub severity: Severity,
	pub message: Arc<str>,
}

impl Diagnostic {
	pub fn error(uri: CanonicalUri, message: impl Into<Arc<str>>) -> Self {
		Self {
			uri,
			severity: Severity::Error,
			message: message.into(),
		}
	}

	pub fn warning(uri: CanonicalUri, message: impl Into<Arc<str>>) -> Self {
		Self {
			uri,
			severity: Severity::Warning,
			message: message.into(),
		}
	}
}
