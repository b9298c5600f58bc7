//! Host-facing facade over one graph.
//!
//! A [`Workspace`] takes specifiers the way a user types them (absolute
//! paths, URIs, or paths relative to the workspace base), evaluates them and
//! hands back plain [`ModuleExports`] snapshots. Evaluation failures never
//! reject: they arrive as diagnostics next to whatever was exported.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tandem_fs::{CanonicalUri, FileSystem};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SandboxConfig;
use crate::dependency::{Dependency, DependencyState};
use crate::error::{Diagnostic, Result, SandboxError};
use crate::graph::{DependencyGraph, GraphConfig, RemoveMode};
use crate::value::ExportTable;
use crate::watcher::ChangePipeline;

/// Evaluated exports of one module plus the diagnostics of its subgraph.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleExports {
	pub uri: CanonicalUri,
	pub exports: Arc<ExportTable>,
	pub diagnostics: Vec<Diagnostic>,
}

/// One graph wired to one file system and configuration.
pub struct Workspace {
	fs: Arc<dyn FileSystem>,
	graph: DependencyGraph,
	config: SandboxConfig,
	base: CanonicalUri,
	cancel: CancellationToken,
	watcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Workspace {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Workspace")
			.field("base", &self.base)
			.field("graph", &self.graph)
			.field("watching", &self.is_watching())
			.finish_non_exhaustive()
	}
}

impl Workspace {
	/// Creates a workspace rooted at `base`, which is kept in directory form.
	pub fn new(fs: Arc<dyn FileSystem>, config: SandboxConfig, base: CanonicalUri) -> Self {
		let graph = DependencyGraph::new(GraphConfig::from_config(Arc::clone(&fs), &config));
		Self {
			fs,
			graph,
			config,
			base: base.as_dir(),
			cancel: CancellationToken::new(),
			watcher: Mutex::new(None),
		}
	}

	pub fn graph(&self) -> &DependencyGraph {
		&self.graph
	}

	pub fn config(&self) -> &SandboxConfig {
		&self.config
	}

	pub fn base(&self) -> &CanonicalUri {
		&self.base
	}

	pub fn file_system(&self) -> &Arc<dyn FileSystem> {
		&self.fs
	}

	/// Turns a user-supplied specifier into a canonical URI.
	///
	/// URIs and absolute paths are taken as is; anything else is joined onto
	/// the workspace base. No file system access.
	pub fn locate(&self, specifier: &str) -> Result<CanonicalUri> {
		let located = if CanonicalUri::is_protocol_qualified(specifier) || specifier.starts_with('/') {
			CanonicalUri::parse(specifier)
		} else {
			self.base.join(specifier)
		};
		located.map_err(SandboxError::InvalidUri)
	}

	/// Evaluates `specifier` and everything it imports.
	pub async fn open(&self, specifier: &str) -> Result<ModuleExports> {
		let uri = self.locate(specifier)?;
		let dependency = self.graph.evaluate(&uri).await?;
		Ok(self.snapshot(&dependency))
	}

	/// Re-reads `specifier` and every file it imports, then re-evaluates.
	///
	/// Only files whose content actually changed are re-parsed. Roots that
	/// import `specifier` are evaluated again too, so a reload of a shared
	/// child is visible from every open module.
	pub async fn reload(&self, specifier: &str) -> Result<ModuleExports> {
		let uri = self.locate(specifier)?;
		let descendants: Vec<CanonicalUri> = self
			.graph
			.subgraph(&uri)
			.iter()
			.map(|node| node.uri().clone())
			.filter(|node| node != &uri)
			.collect();
		let refreshes = descendants.iter().map(|node| self.graph.cache().refresh(node));
		for (node, refreshed) in descendants.iter().zip(futures::future::join_all(refreshes).await) {
			if let Err(error) = refreshed {
				tracing::debug!(uri = %node, %error, "workspace.reload.refresh_failed");
			}
		}
		let dependency = self.graph.reload(&uri).await?;
		for root in self.graph.roots() {
			if root != uri && self.graph.get(&root).is_some_and(|root| root.state() == DependencyState::Stale) {
				if let Err(error) = self.graph.evaluate(&root).await {
					tracing::debug!(uri = %root, %error, "workspace.reload.root_failed");
				}
			}
		}
		Ok(self.snapshot(&dependency))
	}

	/// Current exports of an already opened module, without evaluating.
	pub fn exports(&self, specifier: &str) -> Result<ModuleExports> {
		let uri = self.locate(specifier)?;
		let dependency = self.graph.get(&uri).ok_or(SandboxError::NotInGraph(uri))?;
		Ok(self.snapshot(&dependency))
	}

	/// Drops `specifier` from the graph. Refuses while another module imports
	/// it.
	pub fn remove(&self, specifier: &str) -> Result<Vec<CanonicalUri>> {
		let uri = self.locate(specifier)?;
		self.graph.remove(&uri, RemoveMode::Strict)
	}

	/// Starts forwarding file system changes under the base into the graph.
	///
	/// Requires a Tokio runtime. A second call is a no-op while the first
	/// pipeline is running.
	pub fn watch(&self) -> Result<()> {
		if self.graph.is_disposed() {
			return Err(SandboxError::Disposed);
		}
		let mut watcher = self.watcher.lock();
		if watcher.as_ref().is_some_and(|task| !task.is_finished()) {
			return Ok(());
		}
		let subscription = self
			.fs
			.watch(std::slice::from_ref(&self.base))
			.map_err(SandboxError::Watch)?;
		let pipeline = ChangePipeline::new(self.graph.clone(), &self.config.watch);
		tracing::debug!(base = %self.base, "workspace.watch");
		*watcher = Some(tokio::spawn(pipeline.run(subscription, self.cancel.child_token())));
		Ok(())
	}

	pub fn is_watching(&self) -> bool {
		self.watcher.lock().as_ref().is_some_and(|task| !task.is_finished())
	}

	/// Stops watching and disposes the graph.
	pub fn dispose(&self) {
		self.cancel.cancel();
		self.watcher.lock().take();
		self.graph.dispose();
	}

	fn snapshot(&self, dependency: &Arc<Dependency>) -> ModuleExports {
		let diagnostics = self
			.graph
			.subgraph(dependency.uri())
			.iter()
			.flat_map(|node| node.diagnostics())
			.collect();
		ModuleExports {
			uri: dependency.uri().clone(),
			exports: dependency.exports().unwrap_or_default(),
			diagnostics,
		}
	}
}

impl Drop for Workspace {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

#[cfg(test)]
mod tests;
