//! Pluggable parsing and compilation.
//!
//! A [`DependencyGraphStrategy`] turns file content into the specifiers the
//! file imports and a [`CompiledModule`] the sandbox can run. Strategies are
//! picked per file extension through a [`StrategySet`].

mod raw;
mod script;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tandem_fs::CanonicalUri;

pub use raw::RawStrategy;
pub use script::ScriptStrategy;

use crate::config::StrategyOptions;
use crate::error::{EvaluationError, ParseError};
use crate::sandbox::ModuleScope;

/// Strategy-produced form of a file, ready to run in a sandbox.
pub trait CompiledModule: Send + Sync + fmt::Debug {
	/// Runs the module. Imports and exports go through `scope` only.
	fn evaluate(&self, scope: &mut ModuleScope<'_>) -> Result<(), EvaluationError>;
}

/// Output of a successful parse.
#[derive(Debug, Clone)]
pub struct ParsedModule {
	/// Child specifiers in source order. Duplicates are allowed.
	pub specifiers: Vec<String>,
	pub compiled: Arc<dyn CompiledModule>,
}

#[async_trait]
pub trait DependencyGraphStrategy: Send + Sync + 'static {
	/// Short name used in logs.
	fn name(&self) -> &'static str;

	/// Extracts child specifiers and a compiled form from `content`.
	async fn parse(&self, uri: &CanonicalUri, content: &str) -> Result<ParsedModule, ParseError>;
}

/// Default strategy plus per-extension overrides.
#[derive(Clone)]
pub struct StrategySet {
	default: Arc<dyn DependencyGraphStrategy>,
	by_extension: FxHashMap<String, Arc<dyn DependencyGraphStrategy>>,
}

impl fmt::Debug for StrategySet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut overrides: Vec<_> = self.by_extension.iter().map(|(ext, s)| (ext.as_str(), s.name())).collect();
		overrides.sort_unstable();
		f.debug_struct("StrategySet")
			.field("default", &self.default.name())
			.field("by_extension", &overrides)
			.finish()
	}
}

impl StrategySet {
	pub fn new(default: Arc<dyn DependencyGraphStrategy>) -> Self {
		Self {
			default,
			by_extension: FxHashMap::default(),
		}
	}

	/// Routes files ending in `extension` (with or without the dot) to `strategy`.
	pub fn with_extension(mut self, extension: &str, strategy: Arc<dyn DependencyGraphStrategy>) -> Self {
		let key = extension.trim_start_matches('.').to_ascii_lowercase();
		self.by_extension.insert(key, strategy);
		self
	}

	/// Script strategy by default, raw strategy for the configured extensions.
	pub fn from_options(options: &StrategyOptions) -> Self {
		let raw: Arc<dyn DependencyGraphStrategy> = Arc::new(RawStrategy);
		options
			.raw_extensions
			.iter()
			.fold(Self::new(Arc::new(ScriptStrategy)), |set, ext| set.with_extension(ext, Arc::clone(&raw)))
	}

	pub fn for_uri(&self, uri: &CanonicalUri) -> &Arc<dyn DependencyGraphStrategy> {
		uri.extension()
			.and_then(|ext| self.by_extension.get(&ext.to_ascii_lowercase()))
			.unwrap_or(&self.default)
	}
}

impl Default for StrategySet {
	fn default() -> Self {
		Self::from_options(&StrategyOptions::default())
	}
}
