//! Dependency graph: resolution, evaluation order, invalidation.
//!
//! A graph owns one [`Dependency`] per canonical URI reachable from its
//! roots. `open` loads the reachable subgraph concurrently, `evaluate`
//! additionally runs every node children-first under a per-graph gate, and
//! cache change notifications mark the changed node and its transitive
//! dependents stale so the next `evaluate` only redoes what changed.
//!
//! # Concurrency
//!
//! - node loads are deduplicated per URI, as are whole `open` and `evaluate`
//!   calls on the same root;
//! - `state` is a `parking_lot::RwLock` never held across an await;
//! - evaluation passes are serialized by `eval_gate`;
//! - `dispose` cancels in-flight calls through a `CancellationToken`.

mod evaluate;
mod invalidate;
mod traverse;

use std::future::Future;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tandem_fs::{CanonicalUri, FileSystem};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheChange, FileCache};
use crate::clock::EvaluationClock;
use crate::config::{EvalOptions, GraphOptions, SandboxConfig};
use crate::dependency::Dependency;
use crate::error::{Result, SandboxError};
use crate::resolver::FileResolver;
use crate::singleflight::SingleFlight;
use crate::strategy::StrategySet;

const EVENT_CAPACITY: usize = 256;

/// Collaborators a graph is built from.
#[derive(Debug, Clone)]
pub struct GraphConfig {
	pub cache: FileCache,
	pub resolver: FileResolver,
	pub strategies: StrategySet,
	pub options: GraphOptions,
	pub eval: EvalOptions,
}

impl GraphConfig {
	pub fn new(cache: FileCache, resolver: FileResolver, strategies: StrategySet) -> Self {
		Self {
			cache,
			resolver,
			strategies,
			options: GraphOptions::default(),
			eval: EvalOptions::default(),
		}
	}

	/// Builds every collaborator over `fs` from one configuration.
	pub fn from_config(fs: Arc<dyn FileSystem>, config: &SandboxConfig) -> Self {
		Self {
			cache: FileCache::new(Arc::clone(&fs), config.cache.clone()),
			resolver: FileResolver::new(fs, config.resolver.clone()),
			strategies: StrategySet::from_options(&config.strategies),
			options: config.graph.clone(),
			eval: config.sandbox.clone(),
		}
	}
}

/// How [`DependencyGraph::remove`] treats dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveMode {
	/// Refuse while another dependency imports the URI.
	Strict,
	/// Remove anyway, mark dependents stale and prune unreachable nodes.
	Cascade,
}

/// An import edge that closes a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct CycleEdge {
	pub from: CanonicalUri,
	pub to: CanonicalUri,
}

/// Notifications published by a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
	/// The subgraph under this root finished loading.
	Resolved(CanonicalUri),
	/// A dependency was evaluated, stamped with its evaluation sequence.
	Evaluated { uri: CanonicalUri, seq: u64 },
	/// These dependencies went stale.
	Invalidated(Vec<CanonicalUri>),
	/// These dependencies left the graph.
	Removed(Vec<CanonicalUri>),
	Disposed,
}

#[derive(Default)]
struct GraphState {
	dependencies: FxHashMap<CanonicalUri, Arc<Dependency>>,
	roots: IndexSet<CanonicalUri>,
	disposed: bool,
}

pub(crate) struct GraphInner {
	pub(crate) cache: FileCache,
	pub(crate) resolver: FileResolver,
	pub(crate) strategies: StrategySet,
	pub(crate) options: GraphOptions,
	pub(crate) eval: EvalOptions,
	pub(crate) eval_gate: tokio::sync::Mutex<()>,
	pub(crate) clock: EvaluationClock,
	state: RwLock<GraphState>,
	loads: SingleFlight<CanonicalUri, Result<()>>,
	opens: SingleFlight<CanonicalUri, Result<Arc<Dependency>>>,
	evaluations: SingleFlight<CanonicalUri, Result<Arc<Dependency>>>,
	cancel: CancellationToken,
	events: broadcast::Sender<GraphEvent>,
}

/// Handle to a dependency graph. Cheap to clone; clones share the graph.
#[derive(Clone)]
pub struct DependencyGraph {
	inner: Arc<GraphInner>,
}

impl std::fmt::Debug for DependencyGraph {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.read();
		f.debug_struct("DependencyGraph")
			.field("dependencies", &state.dependencies.len())
			.field("roots", &state.roots)
			.field("disposed", &state.disposed)
			.finish_non_exhaustive()
	}
}

impl DependencyGraph {
	pub fn new(config: GraphConfig) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Self {
			inner: Arc::new(GraphInner {
				cache: config.cache,
				resolver: config.resolver,
				strategies: config.strategies,
				options: config.options,
				eval: config.eval,
				eval_gate: tokio::sync::Mutex::new(()),
				clock: EvaluationClock::new(),
				state: RwLock::new(GraphState::default()),
				loads: SingleFlight::new(),
				opens: SingleFlight::new(),
				evaluations: SingleFlight::new(),
				cancel: CancellationToken::new(),
				events,
			}),
		}
	}

	pub fn cache(&self) -> &FileCache {
		&self.inner.cache
	}

	pub fn resolver(&self) -> &FileResolver {
		&self.inner.resolver
	}

	/// Adds `uri` as a root and loads everything reachable from it.
	///
	/// Returns once every reachable dependency is at least resolved. A
	/// resolution failure anywhere rejects the call; siblings that resolved
	/// stay resolved.
	pub async fn open(&self, uri: &CanonicalUri) -> Result<Arc<Dependency>> {
		self.inner.add_root(uri)?;
		tracing::debug!(uri = %uri, "graph.open");
		let inner = Arc::clone(&self.inner);
		let key = uri.clone();
		let work = self.inner.opens.run(uri.clone(), move || async move { traverse::resolve_subgraph(&inner, &key).await });
		self.inner.cancellable(work).await
	}

	/// [`Self::open`]s `uri`, then evaluates its subgraph children-first.
	pub async fn evaluate(&self, uri: &CanonicalUri) -> Result<Arc<Dependency>> {
		self.inner.add_root(uri)?;
		tracing::debug!(uri = %uri, "graph.evaluate");
		let inner = Arc::clone(&self.inner);
		let key = uri.clone();
		let work = self.inner.evaluations.run(uri.clone(), move || async move { evaluate::evaluate_subgraph(&inner, &key).await });
		self.inner.cancellable(work).await
	}

	/// Re-fetches `uri`, marks it and its dependents stale, then re-evaluates.
	///
	/// Also retries a dependency stuck in the error state.
	pub async fn reload(&self, uri: &CanonicalUri) -> Result<Arc<Dependency>> {
		self.inner.ensure_live()?;
		let dependency = self.get(uri).ok_or_else(|| SandboxError::NotInGraph(uri.clone()))?;
		dependency.rearm();
		tracing::debug!(uri = %uri, "graph.reload");
		let refreshed = self.inner.cancellable(async { Ok(self.inner.cache.refresh(uri).await) }).await?;
		if let Err(error) = refreshed {
			return Err(dependency.fail(error.into()));
		}
		self.inner.invalidate(uri);
		self.inner.cancellable(evaluate::evaluate_subgraph(&self.inner, uri)).await
	}

	/// Removes `uri` from the graph. Returns every URI that left the graph,
	/// including pruned orphans.
	pub fn remove(&self, uri: &CanonicalUri, mode: RemoveMode) -> Result<Vec<CanonicalUri>> {
		self.inner.remove(uri, mode)
	}

	/// Cancels in-flight work and releases every dependency.
	///
	/// Every later call fails with [`SandboxError::Disposed`].
	pub fn dispose(&self) {
		self.inner.dispose();
	}

	pub fn is_disposed(&self) -> bool {
		self.inner.state.read().disposed
	}

	/// Marks `uri` and its transitive dependents stale. Returns the URIs that
	/// changed state.
	pub fn invalidate(&self, uri: &CanonicalUri) -> Vec<CanonicalUri> {
		self.inner.invalidate(uri)
	}

	/// Re-arms every dependency in the error state and marks its dependents
	/// stale, so the next `evaluate` of any affected root retries it. Returns
	/// how many were re-armed.
	pub fn retry_errors(&self) -> usize {
		let dependencies: Vec<_> = self.inner.state.read().dependencies.values().cloned().collect();
		let rearmed: Vec<CanonicalUri> = dependencies
			.iter()
			.filter(|dependency| dependency.rearm())
			.map(|dependency| dependency.uri().clone())
			.collect();
		for uri in &rearmed {
			self.inner.invalidate(uri);
		}
		if !rearmed.is_empty() {
			tracing::debug!(rearmed = rearmed.len(), "graph.retry_errors");
		}
		rearmed.len()
	}

	pub fn get(&self, uri: &CanonicalUri) -> Option<Arc<Dependency>> {
		self.inner.get(uri)
	}

	pub fn contains(&self, uri: &CanonicalUri) -> bool {
		self.inner.state.read().dependencies.contains_key(uri)
	}

	/// Every dependency, ordered by URI.
	pub fn dependencies(&self) -> Vec<Arc<Dependency>> {
		let mut dependencies: Vec<_> = self.inner.state.read().dependencies.values().cloned().collect();
		dependencies.sort_by(|a, b| a.uri().cmp(b.uri()));
		dependencies
	}

	/// Held URIs equal to or under `dir`.
	pub fn uris_under(&self, dir: &CanonicalUri) -> Vec<CanonicalUri> {
		let mut uris: Vec<_> = self
			.inner
			.state
			.read()
			.dependencies
			.keys()
			.filter(|uri| uri.is_under(dir))
			.cloned()
			.collect();
		uris.sort();
		uris
	}

	pub fn roots(&self) -> Vec<CanonicalUri> {
		self.inner.state.read().roots.iter().cloned().collect()
	}

	/// Dependencies that list `uri` as a direct child, ordered by URI.
	pub fn dependents(&self, uri: &CanonicalUri) -> Vec<CanonicalUri> {
		invalidate::direct_dependents(&self.inner.state.read(), uri)
	}

	/// `uri` and everything reachable from it, depth-first in import order.
	pub fn subgraph(&self, uri: &CanonicalUri) -> Vec<Arc<Dependency>> {
		let state = self.inner.state.read();
		let mut seen = rustc_hash::FxHashSet::default();
		let mut stack = vec![uri.clone()];
		let mut out = Vec::new();
		while let Some(next) = stack.pop() {
			if !seen.insert(next.clone()) {
				continue;
			}
			let Some(dependency) = state.dependencies.get(&next) else {
				continue;
			};
			stack.extend(dependency.child_uris().iter().rev().cloned());
			out.push(Arc::clone(dependency));
		}
		out
	}

	/// Cycle-closing edges found by a depth-first walk from each root in
	/// import order.
	pub fn cycles(&self) -> Vec<CycleEdge> {
		evaluate::find_cycles(&self.inner.state.read())
	}

	/// Subscribes to graph events. Slow receivers miss events rather than
	/// block the graph.
	pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
		self.inner.events.subscribe()
	}
}

impl GraphInner {
	pub(crate) fn get(&self, uri: &CanonicalUri) -> Option<Arc<Dependency>> {
		self.state.read().dependencies.get(uri).cloned()
	}

	fn ensure_live(&self) -> Result<()> {
		if self.state.read().disposed {
			return Err(SandboxError::Disposed);
		}
		Ok(())
	}

	fn add_root(&self, uri: &CanonicalUri) -> Result<()> {
		let mut state = self.state.write();
		if state.disposed {
			return Err(SandboxError::Disposed);
		}
		state.roots.insert(uri.clone());
		Ok(())
	}

	fn emit(&self, event: GraphEvent) {
		// No receivers is fine.
		let _ = self.events.send(event);
	}

	async fn cancellable<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
		tokio::select! {
			biased;
			() = self.cancel.cancelled() => Err(SandboxError::Disposed),
			result = work => result,
		}
	}

	/// Returns the dependency for `uri`, creating and subscribing it if new.
	pub(crate) fn get_or_create(self: &Arc<Self>, uri: &CanonicalUri) -> Result<Arc<Dependency>> {
		let mut state = self.state.write();
		if state.disposed {
			return Err(SandboxError::Disposed);
		}
		if let Some(existing) = state.dependencies.get(uri) {
			return Ok(Arc::clone(existing));
		}
		let dependency = Dependency::new(uri.clone(), Arc::downgrade(self));
		let weak = Arc::downgrade(self);
		let subscription = self.cache.on_change(uri, move |change| {
			if let Some(inner) = weak.upgrade() {
				inner.on_content_change(change);
			}
		});
		dependency.set_subscription(subscription);
		state.dependencies.insert(uri.clone(), Arc::clone(&dependency));
		tracing::trace!(uri = %uri, "graph.dependency.create");
		Ok(dependency)
	}

	/// Loads one dependency, sharing the run with concurrent callers.
	pub(crate) async fn load_node(self: &Arc<Self>, dependency: &Arc<Dependency>) -> Result<()> {
		let inner = Arc::clone(self);
		let node = Arc::clone(dependency);
		self.loads
			.run(dependency.uri().clone(), move || async move { node.load_with(&inner).await })
			.await
	}

	fn on_content_change(&self, change: &CacheChange) {
		let Some(dependency) = self.get(&change.uri) else {
			return;
		};
		// Loads in progress compare versions themselves when they commit.
		if !dependency.state().is_resolved() || dependency.content_version() == Some(change.version) {
			return;
		}
		tracing::debug!(uri = %change.uri, version = change.version, "graph.content_changed");
		self.invalidate(&change.uri);
	}

	fn dispose(&self) {
		self.cancel.cancel();
		let dependencies: Vec<_> = {
			let mut state = self.state.write();
			if state.disposed {
				return;
			}
			state.disposed = true;
			state.roots.clear();
			state.dependencies.drain().map(|(_, dependency)| dependency).collect()
		};
		for dependency in &dependencies {
			dependency.dispose();
		}
		tracing::debug!(dependencies = dependencies.len(), "graph.dispose");
		self.emit(GraphEvent::Disposed);
	}
}
