//! One node of a dependency graph.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tandem_fs::CanonicalUri;

use crate::cache::CacheSubscription;
use crate::error::{Diagnostic, EvaluationError, Result, SandboxError};
use crate::graph::GraphInner;
use crate::sandbox::{ImportResolver, Sandbox};
use crate::strategy::CompiledModule;
use crate::value::ExportTable;

/// Lifecycle of a [`Dependency`].
///
/// `Unresolved -> Resolving -> Resolved -> Evaluating -> Evaluated`. A
/// resolved or evaluated node goes `Stale` when its content or a descendant
/// changes, and a stale node re-enters `Resolving` on the next load. `Error`
/// is sticky until the node is re-armed by a reload or an ADD event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyState {
	#[default]
	Unresolved,
	Resolving,
	Resolved,
	Evaluating,
	Evaluated,
	Stale,
	Error,
}

impl DependencyState {
	/// True for states backed by a parse that matches cached content.
	pub const fn is_resolved(self) -> bool {
		matches!(self, Self::Resolved | Self::Evaluating | Self::Evaluated)
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Unresolved => "unresolved",
			Self::Resolving => "resolving",
			Self::Resolved => "resolved",
			Self::Evaluating => "evaluating",
			Self::Evaluated => "evaluated",
			Self::Stale => "stale",
			Self::Error => "error",
		}
	}
}

#[derive(Default)]
struct DependencyData {
	state: DependencyState,
	content_version: Option<u64>,
	specifiers: Vec<String>,
	child_uris: Arc<[CanonicalUri]>,
	/// Specifier to resolved child, from the last successful load.
	imports: Arc<FxHashMap<String, CanonicalUri>>,
	compiled: Option<Arc<dyn CompiledModule>>,
	sandbox: Option<Sandbox>,
	error: Option<SandboxError>,
	evaluation_seq: Option<u64>,
	subscription: Option<CacheSubscription>,
	disposed: bool,
}

/// A file participating in a graph: its parse, resolved children and, once
/// evaluated, its exports.
///
/// Shared as `Arc<Dependency>`; there is exactly one per URI per graph.
pub struct Dependency {
	uri: CanonicalUri,
	graph: Weak<GraphInner>,
	data: RwLock<DependencyData>,
}

impl std::fmt::Debug for Dependency {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let data = self.data.read();
		f.debug_struct("Dependency")
			.field("uri", &self.uri)
			.field("state", &data.state)
			.field("content_version", &data.content_version)
			.field("children", &data.child_uris.len())
			.finish_non_exhaustive()
	}
}

impl Dependency {
	pub(crate) fn new(uri: CanonicalUri, graph: Weak<GraphInner>) -> Arc<Self> {
		Arc::new(Self {
			uri,
			graph,
			data: RwLock::new(DependencyData::default()),
		})
	}

	#[cfg(test)]
	pub(crate) fn detached(uri: CanonicalUri) -> Arc<Self> {
		Self::new(uri, Weak::new())
	}

	pub fn uri(&self) -> &CanonicalUri {
		&self.uri
	}

	pub fn state(&self) -> DependencyState {
		self.data.read().state
	}

	/// Cache version of the content behind the last successful parse.
	pub fn content_version(&self) -> Option<u64> {
		self.data.read().content_version
	}

	/// Resolved children, deduplicated, in first-import order.
	pub fn child_uris(&self) -> Arc<[CanonicalUri]> {
		Arc::clone(&self.data.read().child_uris)
	}

	/// Raw specifiers from the last successful parse.
	pub fn specifiers(&self) -> Vec<String> {
		self.data.read().specifiers.clone()
	}

	/// Export table, present only while [`DependencyState::Evaluated`].
	pub fn exports(&self) -> Option<Arc<ExportTable>> {
		let data = self.data.read();
		if data.state != DependencyState::Evaluated {
			return None;
		}
		data.sandbox.as_ref().map(|sandbox| Arc::clone(sandbox.exports()))
	}

	/// Load failure, if any, followed by the last evaluation's diagnostics.
	pub fn diagnostics(&self) -> Vec<Diagnostic> {
		let data = self.data.read();
		let mut out = Vec::new();
		if let Some(error) = &data.error {
			out.push(Diagnostic::error(self.uri.clone(), error.to_string()));
		}
		if let Some(sandbox) = &data.sandbox {
			out.extend(sandbox.diagnostics().iter().cloned());
		}
		out
	}

	/// Error that put this dependency in [`DependencyState::Error`].
	pub fn error(&self) -> Option<SandboxError> {
		self.data.read().error.clone()
	}

	/// Stamp from the graph's evaluation clock, set on each evaluation.
	pub fn evaluation_seq(&self) -> Option<u64> {
		self.data.read().evaluation_seq
	}

	pub fn is_disposed(&self) -> bool {
		self.data.read().disposed
	}

	/// Loads content, parses it and resolves every child specifier.
	///
	/// Concurrent loads of one dependency share a single run.
	pub async fn load(self: &Arc<Self>) -> Result<()> {
		let graph = self.graph()?;
		graph.load_node(self).await
	}

	/// Evaluates this dependency. Every child must already be evaluated, or
	/// be evaluating further up a cycle.
	pub async fn evaluate(self: &Arc<Self>) -> Result<Arc<ExportTable>> {
		let graph = self.graph()?;
		let _gate = graph.eval_gate.lock().await;
		self.evaluate_with(&graph)
	}

	/// Releases the compiled form, sandbox and cache subscription.
	pub fn dispose(&self) {
		let subscription = {
			let mut data = self.data.write();
			if data.disposed {
				return;
			}
			data.disposed = true;
			data.state = DependencyState::Unresolved;
			data.compiled = None;
			data.sandbox = None;
			data.child_uris = Arc::from([]);
			data.imports = Arc::default();
			data.subscription.take()
		};
		drop(subscription);
		tracing::trace!(uri = %self.uri, "dependency.dispose");
	}

	fn graph(&self) -> Result<Arc<GraphInner>> {
		if self.is_disposed() {
			return Err(SandboxError::Disposed);
		}
		self.graph.upgrade().ok_or(SandboxError::Disposed)
	}

	pub(crate) async fn load_with(self: &Arc<Self>, graph: &GraphInner) -> Result<()> {
		{
			let data = self.data.read();
			if data.disposed {
				return Err(SandboxError::Disposed);
			}
			if let (DependencyState::Error, Some(error)) = (data.state, &data.error) {
				return Err(error.clone());
			}
		}

		let record = match graph.cache.get(&self.uri).await {
			Ok(record) => record,
			Err(error) => return Err(self.fail(error.into())),
		};

		let reusable = {
			let mut data = self.data.write();
			if data.disposed {
				return Err(SandboxError::Disposed);
			}
			let current = data.content_version == Some(record.version);
			if current && data.state.is_resolved() {
				return Ok(());
			}
			data.state = DependencyState::Resolving;
			if current {
				data.compiled.clone().map(|compiled| (data.specifiers.clone(), compiled))
			} else {
				None
			}
		};

		let (specifiers, compiled) = match reusable {
			Some(reused) => reused,
			None => {
				let strategy = graph.strategies.for_uri(&self.uri);
				match strategy.parse(&self.uri, &record.content).await {
					Ok(parsed) => (parsed.specifiers, parsed.compiled),
					Err(error) => {
						return Err(self.fail(SandboxError::Parse {
							uri: self.uri.clone(),
							message: error.to_string(),
						}));
					}
				}
			}
		};

		let base = self.uri.parent().unwrap_or_else(|| self.uri.as_dir());
		let resolved =
			futures::future::join_all(specifiers.iter().map(|specifier| graph.resolver.resolve(specifier, &base))).await;

		let mut imports = FxHashMap::default();
		let mut children: Vec<CanonicalUri> = Vec::new();
		for (specifier, result) in specifiers.iter().zip(resolved) {
			match result {
				Ok(child) => {
					if !children.contains(&child) {
						children.push(child.clone());
					}
					imports.insert(specifier.clone(), child);
				}
				Err(error) => return Err(self.fail(error.into())),
			}
		}

		let mut data = self.data.write();
		if data.disposed {
			return Err(SandboxError::Disposed);
		}
		// Content changed again while parsing; the next settle pass reloads.
		let latest = graph.cache.peek(&self.uri).map(|r| r.version);
		data.state = if latest == Some(record.version) {
			DependencyState::Resolved
		} else {
			DependencyState::Stale
		};
		data.content_version = Some(record.version);
		data.specifiers = specifiers;
		data.child_uris = children.into();
		data.imports = Arc::new(imports);
		data.compiled = Some(compiled);
		data.sandbox = None;
		data.error = None;
		tracing::trace!(
			uri = %self.uri,
			version = record.version,
			children = data.child_uris.len(),
			state = data.state.as_str(),
			"dependency.load"
		);
		Ok(())
	}

	pub(crate) fn evaluate_with(self: &Arc<Self>, graph: &GraphInner) -> Result<Arc<ExportTable>> {
		let (compiled, imports, children) = {
			let data = self.data.read();
			if data.disposed {
				return Err(SandboxError::Disposed);
			}
			match (data.state, &data.sandbox) {
				(DependencyState::Evaluated, Some(sandbox)) => return Ok(Arc::clone(sandbox.exports())),
				(DependencyState::Resolved | DependencyState::Evaluating, _) => {}
				_ => {
					return Err(SandboxError::NotReady {
						uri: self.uri.clone(),
						child: self.uri.clone(),
					});
				}
			}
			(data.compiled.clone(), Arc::clone(&data.imports), Arc::clone(&data.child_uris))
		};

		for child in children.iter() {
			let state = graph.get(child).map(|dependency| dependency.state());
			if !matches!(state, Some(DependencyState::Evaluated | DependencyState::Evaluating)) {
				return Err(SandboxError::NotReady {
					uri: self.uri.clone(),
					child: child.clone(),
				});
			}
		}

		self.begin_evaluation();
		let resolver = GraphImports {
			graph,
			imports: &imports,
			partial: RefCell::default(),
		};
		let mut sandbox = Sandbox::new(self);
		let exports = sandbox.evaluate(compiled.as_ref(), &resolver, &graph.eval);
		for specifier in resolver.partial.into_inner() {
			sandbox.push_diagnostic(Diagnostic::warning(
				self.uri.clone(),
				format!("import of `{specifier}` is cyclic; partial exports"),
			));
		}
		let seq = graph.clock.next();

		let mut data = self.data.write();
		if data.disposed {
			return Err(SandboxError::Disposed);
		}
		if data.state != DependencyState::Evaluating {
			// Invalidated while running; the result is already out of date.
			return Err(SandboxError::NotReady {
				uri: self.uri.clone(),
				child: self.uri.clone(),
			});
		}
		data.state = DependencyState::Evaluated;
		data.evaluation_seq = Some(seq);
		data.sandbox = Some(sandbox);
		tracing::trace!(uri = %self.uri, seq, "dependency.evaluate");
		Ok(exports)
	}

	/// `Resolved -> Evaluating`.
	pub(crate) fn begin_evaluation(&self) -> bool {
		let mut data = self.data.write();
		if data.state == DependencyState::Resolved {
			data.state = DependencyState::Evaluating;
			return true;
		}
		data.state == DependencyState::Evaluating
	}

	/// `Evaluating -> Resolved`, for passes that stop halfway.
	pub(crate) fn abort_evaluation(&self) {
		let mut data = self.data.write();
		if data.state == DependencyState::Evaluating {
			data.state = DependencyState::Resolved;
		}
	}

	/// Marks a resolved or evaluated dependency stale and drops its exports.
	pub(crate) fn mark_stale(&self) -> bool {
		let mut data = self.data.write();
		if !data.state.is_resolved() {
			return false;
		}
		data.state = DependencyState::Stale;
		data.sandbox = None;
		true
	}

	/// Clears a sticky error so the next load retries.
	pub(crate) fn rearm(&self) -> bool {
		let mut data = self.data.write();
		if data.state != DependencyState::Error {
			return false;
		}
		data.state = DependencyState::Unresolved;
		data.error = None;
		true
	}

	pub(crate) fn set_subscription(&self, subscription: CacheSubscription) {
		self.data.write().subscription = Some(subscription);
	}

	pub(crate) fn fail(&self, error: SandboxError) -> SandboxError {
		let mut data = self.data.write();
		if !data.disposed {
			data.state = DependencyState::Error;
			data.error = Some(error.clone());
			data.sandbox = None;
		}
		tracing::debug!(uri = %self.uri, %error, "dependency.error");
		error
	}
}

/// Answers imports from children already evaluated in the same graph.
struct GraphImports<'a> {
	graph: &'a GraphInner,
	imports: &'a FxHashMap<String, CanonicalUri>,
	/// Specifiers answered with a cyclic child's partial table.
	partial: RefCell<Vec<String>>,
}

impl ImportResolver for GraphImports<'_> {
	fn import(&self, specifier: &str) -> std::result::Result<Arc<ExportTable>, EvaluationError> {
		let unresolved = || EvaluationError::UnresolvedImport(specifier.to_string());
		let uri = self.imports.get(specifier).ok_or_else(unresolved)?;
		let dependency = self.graph.get(uri).ok_or_else(unresolved)?;
		if let Some(exports) = dependency.exports() {
			return Ok(exports);
		}
		// A child still evaluating sits on a cycle; it offers what it has so far.
		match dependency.state() {
			DependencyState::Evaluating => {
				let mut partial = self.partial.borrow_mut();
				if !partial.iter().any(|seen| seen == specifier) {
					partial.push(specifier.to_string());
				}
				Ok(Arc::new(ExportTable::new()))
			}
			_ => Err(unresolved()),
		}
	}
}
