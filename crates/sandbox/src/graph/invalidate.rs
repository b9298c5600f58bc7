//! Staleness propagation and removal.

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tandem_fs::CanonicalUri;

use super::{GraphEvent, GraphInner, GraphState, RemoveMode};
use crate::dependency::Dependency;
use crate::error::{Result, SandboxError};

impl GraphInner {
	/// Marks `uri` and every transitive dependent stale.
	///
	/// Walks import edges backward from `uri`, which need not itself be in
	/// the graph any more.
	pub(crate) fn invalidate(&self, uri: &CanonicalUri) -> Vec<CanonicalUri> {
		let targets = {
			let state = self.state.read();
			if state.disposed {
				return Vec::new();
			}
			ancestors(&state, uri)
		};
		let marked: Vec<CanonicalUri> = targets
			.iter()
			.filter(|dependency| dependency.mark_stale())
			.map(|dependency| dependency.uri().clone())
			.collect();
		if !marked.is_empty() {
			tracing::debug!(uri = %uri, stale = marked.len(), "graph.invalidate");
			self.emit(GraphEvent::Invalidated(marked.clone()));
		}
		marked
	}

	pub(crate) fn remove(&self, uri: &CanonicalUri, mode: RemoveMode) -> Result<Vec<CanonicalUri>> {
		let (removed, dependents) = {
			let mut state = self.state.write();
			if state.disposed {
				return Err(SandboxError::Disposed);
			}
			if !state.dependencies.contains_key(uri) {
				return Err(SandboxError::NotInGraph(uri.clone()));
			}
			let dependents = direct_dependents(&state, uri);
			if mode == RemoveMode::Strict && !dependents.is_empty() {
				return Err(SandboxError::DependencyInUse {
					uri: uri.clone(),
					dependents,
				});
			}

			state.roots.shift_remove(uri);
			let mut removed: Vec<Arc<Dependency>> = state.dependencies.remove(uri).into_iter().collect();
			let reachable = reachable_from_roots(&state);
			let orphans: Vec<CanonicalUri> = state
				.dependencies
				.keys()
				.filter(|candidate| !reachable.contains(*candidate))
				.cloned()
				.collect();
			for orphan in &orphans {
				removed.extend(state.dependencies.remove(orphan));
			}
			(removed, dependents)
		};

		for dependency in &removed {
			dependency.dispose();
		}
		for dependent in &dependents {
			self.invalidate(dependent);
		}

		let mut uris: Vec<CanonicalUri> = removed.iter().map(|dependency| dependency.uri().clone()).collect();
		uris.sort();
		tracing::debug!(uri = %uri, removed = uris.len(), ?mode, "graph.remove");
		self.emit(GraphEvent::Removed(uris.clone()));
		Ok(uris)
	}
}

/// Dependencies other than `uri` that list it as a child, ordered by URI.
pub(super) fn direct_dependents(state: &GraphState, uri: &CanonicalUri) -> Vec<CanonicalUri> {
	let mut dependents: Vec<CanonicalUri> = state
		.dependencies
		.values()
		.filter(|dependency| dependency.uri() != uri && dependency.child_uris().contains(uri))
		.map(|dependency| dependency.uri().clone())
		.collect();
	dependents.sort();
	dependents
}

/// `uri` (if held) and every dependency that reaches it.
fn ancestors(state: &GraphState, uri: &CanonicalUri) -> Vec<Arc<Dependency>> {
	let mut parents: FxHashMap<CanonicalUri, Vec<Arc<Dependency>>> = FxHashMap::default();
	for dependency in state.dependencies.values() {
		for child in dependency.child_uris().iter() {
			parents.entry(child.clone()).or_default().push(Arc::clone(dependency));
		}
	}

	let mut seen = FxHashSet::default();
	let mut out = Vec::new();
	let mut queue = VecDeque::from([uri.clone()]);
	seen.insert(uri.clone());
	if let Some(dependency) = state.dependencies.get(uri) {
		out.push(Arc::clone(dependency));
	}
	while let Some(next) = queue.pop_front() {
		for parent in parents.get(&next).into_iter().flatten() {
			if seen.insert(parent.uri().clone()) {
				out.push(Arc::clone(parent));
				queue.push_back(parent.uri().clone());
			}
		}
	}
	out
}

fn reachable_from_roots(state: &GraphState) -> FxHashSet<CanonicalUri> {
	let mut reachable = FxHashSet::default();
	let mut stack: Vec<CanonicalUri> = state.roots.iter().cloned().collect();
	while let Some(uri) = stack.pop() {
		let Some(dependency) = state.dependencies.get(&uri) else {
			continue;
		};
		if !reachable.insert(uri) {
			continue;
		}
		stack.extend(dependency.child_uris().iter().cloned());
	}
	reachable
}
