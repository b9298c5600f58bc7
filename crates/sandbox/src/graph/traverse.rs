//! Concurrent loading of a reachable subgraph.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use rustc_hash::FxHashSet;
use tandem_fs::CanonicalUri;

use super::{GraphEvent, GraphInner};
use crate::dependency::Dependency;
use crate::error::{Result, SandboxError};

/// Loads `root` and everything reachable from it.
///
/// Independent nodes load concurrently. A node load never waits on another
/// node, so cycles cannot deadlock; the per-call `visited` set stops the walk
/// from re-entering them. Failures do not stop sibling loads; the first one
/// observed is returned once the worklist drains.
pub(super) async fn resolve_subgraph(inner: &Arc<GraphInner>, root: &CanonicalUri) -> Result<Arc<Dependency>> {
	let root_dependency = inner.get_or_create(root)?;
	let mut visited = FxHashSet::default();
	visited.insert(root.clone());

	let mut pending = FuturesUnordered::new();
	pending.push(load_one(Arc::clone(inner), Arc::clone(&root_dependency)));

	let mut first_error: Option<SandboxError> = None;
	let mut loaded = 0usize;
	while let Some((dependency, result)) = pending.next().await {
		match result {
			Ok(()) => {
				loaded += 1;
				for child in dependency.child_uris().iter() {
					if !visited.insert(child.clone()) {
						continue;
					}
					match inner.get_or_create(child) {
						Ok(child_dependency) => pending.push(load_one(Arc::clone(inner), child_dependency)),
						Err(error) => return Err(error),
					}
				}
			}
			Err(SandboxError::Disposed) => return Err(SandboxError::Disposed),
			Err(error) => {
				tracing::debug!(uri = %dependency.uri(), %error, "graph.load_failed");
				first_error.get_or_insert(error);
			}
		}
	}

	if let Some(error) = first_error {
		return Err(error);
	}
	tracing::debug!(uri = %root, loaded, "graph.resolved");
	inner.emit(GraphEvent::Resolved(root.clone()));
	Ok(root_dependency)
}

async fn load_one(inner: Arc<GraphInner>, dependency: Arc<Dependency>) -> (Arc<Dependency>, Result<()>) {
	let result = inner.load_node(&dependency).await;
	(dependency, result)
}
