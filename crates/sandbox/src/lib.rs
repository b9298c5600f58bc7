//! Dependency resolution and sandboxed evaluation over an abstract file
//! system.
//!
//! The pieces, bottom-up:
//!
//! - [`FileResolver`] maps an import specifier plus a base directory to a
//!   canonical URI, probing extensions, index files and module directories.
//! - [`FileCache`] holds one versioned [`ContentRecord`] per URI, deduplicates
//!   concurrent reads and notifies subscribers on change.
//! - A [`DependencyGraphStrategy`] turns content into child specifiers and a
//!   [`CompiledModule`]; [`StrategySet`] picks one by extension.
//! - [`Dependency`] is one file in a [`DependencyGraph`]: its parse, resolved
//!   children and, once evaluated, its [`ExportTable`] from a [`Sandbox`].
//! - [`ChangePipeline`] debounces file system events into cache and graph
//!   updates.
//! - [`Workspace`] is the host facade: open, reload, remove, watch.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use tandem_fs::{CanonicalUri, MemoryFileSystem};
//! use tandem_sandbox::{SandboxConfig, Workspace};
//!
//! let fs = MemoryFileSystem::from_files([("/a.x", "import './b.x'"), ("/b.x", "export default 1")])?;
//! let workspace = Workspace::new(Arc::new(fs), SandboxConfig::default(), CanonicalUri::parse("/")?);
//! let module = workspace.open("a.x").await?;
//! assert!(module.diagnostics.is_empty());
//! # Ok(())
//! # }
//! ```

mod cache;
mod clock;
pub mod config;
mod dependency;
mod error;
mod graph;
mod host;
mod resolver;
mod sandbox;
mod singleflight;
mod strategy;
mod value;
mod watcher;

pub use cache::{CacheChange, CacheSubscription, ContentRecord, FileCache};
pub use config::{
	CacheOptions, ConfigError, EvalOptions, GraphOptions, ResolverOptions, SandboxConfig, StrategyOptions, WatchOptions,
};
pub use dependency::{Dependency, DependencyState};
pub use error::{
	CacheError, Diagnostic, EvaluationError, ParseError, ResolutionError, Result, SandboxError, Severity,
};
pub use graph::{CycleEdge, DependencyGraph, GraphConfig, GraphEvent, RemoveMode};
pub use host::{ModuleExports, Workspace};
pub use resolver::FileResolver;
pub use sandbox::{ImportResolver, ModuleScope, Sandbox};
pub use strategy::{CompiledModule, DependencyGraphStrategy, ParsedModule, RawStrategy, ScriptStrategy, StrategySet};
pub use value::{ExportTable, Value};
pub use watcher::{ChangePipeline, DispatchReport};
