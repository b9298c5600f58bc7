//! Engine configuration.
//!
//! Written in TOML, one table per component:
//!
//! ```toml
//! [resolver]
//! extensions = [".x", ".js"]
//! index_files = ["index"]
//! module_directories = ["modules"]
//!
//! [cache]
//! max_content_bytes = 4194304
//!
//! [graph]
//! max_settle_passes = 4
//!
//! [sandbox]
//! max_steps = 100000
//!
//! [watch]
//! flush_interval_ms = 50
//!
//! [strategies]
//! raw_extensions = [".txt", ".css", ".svg"]
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or shape.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// A value parsed but is out of range.
	#[error("invalid value for {field}: {reason}")]
	Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
	pub resolver: ResolverOptions,
	pub cache: CacheOptions,
	pub graph: GraphOptions,
	pub sandbox: EvalOptions,
	pub watch: WatchOptions,
	pub strategies: StrategyOptions,
}

impl SandboxConfig {
	/// Parses and validates a TOML document.
	pub fn parse(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and parses `path`.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		let config = Self::parse(&input)?;
		tracing::debug!(path = %path.display(), "config.load");
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		check_extensions("resolver.extensions", &self.resolver.extensions)?;
		check_extensions("strategies.raw_extensions", &self.strategies.raw_extensions)?;
		if self.resolver.index_files.iter().any(|name| name.is_empty() || name.contains('/')) {
			return Err(ConfigError::Invalid {
				field: "resolver.index_files",
				reason: "index names must be non-empty file names".into(),
			});
		}
		if self.resolver.module_directories.iter().any(|dir| dir.is_empty() || dir.contains('/')) {
			return Err(ConfigError::Invalid {
				field: "resolver.module_directories",
				reason: "module directories must be single path segments".into(),
			});
		}
		if self.cache.max_content_bytes == 0 {
			return Err(ConfigError::Invalid {
				field: "cache.max_content_bytes",
				reason: "must be greater than zero".into(),
			});
		}
		if self.graph.max_settle_passes == 0 {
			return Err(ConfigError::Invalid {
				field: "graph.max_settle_passes",
				reason: "must be at least 1".into(),
			});
		}
		if self.sandbox.max_steps == 0 {
			return Err(ConfigError::Invalid {
				field: "sandbox.max_steps",
				reason: "must be greater than zero".into(),
			});
		}
		if self.watch.flush_interval_ms == 0 {
			return Err(ConfigError::Invalid {
				field: "watch.flush_interval_ms",
				reason: "must be greater than zero".into(),
			});
		}
		Ok(())
	}
}

fn check_extensions(field: &'static str, extensions: &[String]) -> Result<(), ConfigError> {
	match extensions.iter().find(|ext| !ext.starts_with('.') || ext.len() < 2) {
		Some(bad) => Err(ConfigError::Invalid {
			field,
			reason: format!("`{bad}` must start with a dot"),
		}),
		None => Ok(()),
	}
}

/// How specifiers are probed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverOptions {
	/// Suffixes tried after the exact path, in order.
	pub extensions: Vec<String>,
	/// File names tried when a specifier names a directory.
	pub index_files: Vec<String>,
	/// Directories searched for bare specifiers, walking up from the importer.
	pub module_directories: Vec<String>,
}

impl Default for ResolverOptions {
	fn default() -> Self {
		Self {
			extensions: vec![".x".into(), ".js".into()],
			index_files: vec!["index".into()],
			module_directories: vec!["modules".into()],
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheOptions {
	/// Reads larger than this fail with [`crate::CacheError::TooLarge`].
	pub max_content_bytes: usize,
}

impl Default for CacheOptions {
	fn default() -> Self {
		Self {
			max_content_bytes: 4 * 1024 * 1024,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphOptions {
	/// Load passes an `evaluate` may take before giving up with `Unsettled`.
	pub max_settle_passes: usize,
}

impl Default for GraphOptions {
	fn default() -> Self {
		Self { max_settle_passes: 4 }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvalOptions {
	/// Steps a single module evaluation may take.
	pub max_steps: usize,
}

impl Default for EvalOptions {
	fn default() -> Self {
		Self { max_steps: 100_000 }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchOptions {
	/// How long change events are coalesced before dispatch.
	pub flush_interval_ms: u64,
}

impl WatchOptions {
	pub fn flush_interval(&self) -> Duration {
		Duration::from_millis(self.flush_interval_ms)
	}
}

impl Default for WatchOptions {
	fn default() -> Self {
		Self { flush_interval_ms: 50 }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyOptions {
	/// Extensions handled by the raw strategy instead of the script one.
	pub raw_extensions: Vec<String>,
}

impl Default for StrategyOptions {
	fn default() -> Self {
		Self {
			raw_extensions: vec![".txt".into(), ".css".into(), ".svg".into()],
		}
	}
}
