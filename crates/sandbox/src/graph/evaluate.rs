//! Children-first evaluation and cycle detection.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tandem_fs::CanonicalUri;

use super::{CycleEdge, GraphEvent, GraphInner, GraphState, traverse};
use crate::dependency::{Dependency, DependencyState};
use crate::error::{Result, SandboxError};

enum Pass {
	Done,
	/// Something went stale or disappeared mid-pass; load again.
	Unsettled,
}

struct Frame {
	dependency: Arc<Dependency>,
	children: Arc<[CanonicalUri]>,
	next: usize,
}

impl Frame {
	fn new(dependency: Arc<Dependency>) -> Self {
		let children = dependency.child_uris();
		Self {
			dependency,
			children,
			next: 0,
		}
	}
}

/// Loads and evaluates the subgraph under `root`, retrying while
/// invalidations race the pass, up to `graph.max_settle_passes`.
pub(super) async fn evaluate_subgraph(inner: &Arc<GraphInner>, root: &CanonicalUri) -> Result<Arc<Dependency>> {
	let max_passes = inner.options.max_settle_passes;
	for pass in 1..=max_passes {
		let dependency = traverse::resolve_subgraph(inner, root).await?;
		let _gate = inner.eval_gate.lock().await;
		inner.ensure_live()?;
		match run_pass(inner, &dependency)? {
			Pass::Done => return Ok(dependency),
			Pass::Unsettled => tracing::debug!(uri = %root, pass, "graph.unsettled"),
		}
	}
	Err(SandboxError::Unsettled {
		uri: root.clone(),
		passes: max_passes,
	})
}

/// One depth-first evaluation pass in `child_uris` order.
///
/// A child already on the path is a cycle edge: it is skipped, and the
/// importer sees that child's partial exports.
fn run_pass(inner: &GraphInner, root: &Arc<Dependency>) -> Result<Pass> {
	match root.state() {
		DependencyState::Evaluated => return Ok(Pass::Done),
		DependencyState::Resolved => {}
		_ => return Ok(Pass::Unsettled),
	}

	let mut on_path = FxHashSet::default();
	let mut done = FxHashSet::default();
	let mut stack = vec![Frame::new(Arc::clone(root))];
	root.begin_evaluation();
	on_path.insert(root.uri().clone());

	loop {
		if inner.cancel.is_cancelled() {
			rollback(&stack);
			return Err(SandboxError::Disposed);
		}
		let Some(frame) = stack.last_mut() else {
			break;
		};

		if let Some(child_uri) = frame.children.get(frame.next).cloned() {
			frame.next += 1;
			if on_path.contains(&child_uri) {
				tracing::debug!(from = %frame.dependency.uri(), to = %child_uri, "graph.cycle");
				continue;
			}
			if done.contains(&child_uri) {
				continue;
			}
			let Some(child) = inner.get(&child_uri) else {
				rollback(&stack);
				return Ok(Pass::Unsettled);
			};
			match child.state() {
				DependencyState::Evaluated => {
					done.insert(child_uri);
				}
				DependencyState::Resolved => {
					child.begin_evaluation();
					on_path.insert(child_uri);
					stack.push(Frame::new(child));
				}
				_ => {
					rollback(&stack);
					return Ok(Pass::Unsettled);
				}
			}
			continue;
		}

		let Some(frame) = stack.pop() else {
			break;
		};
		let uri = frame.dependency.uri().clone();
		on_path.remove(&uri);
		match frame.dependency.evaluate_with(inner) {
			Ok(_) => {
				if let Some(seq) = frame.dependency.evaluation_seq() {
					inner.emit(GraphEvent::Evaluated { uri: uri.clone(), seq });
				}
				done.insert(uri);
			}
			Err(SandboxError::Disposed) => {
				rollback(&stack);
				return Err(SandboxError::Disposed);
			}
			Err(error) => {
				tracing::debug!(uri = %uri, %error, "graph.evaluate_interrupted");
				frame.dependency.abort_evaluation();
				rollback(&stack);
				return Ok(Pass::Unsettled);
			}
		}
	}
	Ok(Pass::Done)
}

fn rollback(stack: &[Frame]) {
	for frame in stack {
		frame.dependency.abort_evaluation();
	}
}

/// Back edges of a depth-first walk from each root, in root order.
pub(super) fn find_cycles(state: &GraphState) -> Vec<CycleEdge> {
	let mut edges = Vec::new();
	let mut finished: FxHashSet<CanonicalUri> = FxHashSet::default();

	for root in &state.roots {
		if finished.contains(root) {
			continue;
		}
		let Some(dependency) = state.dependencies.get(root) else {
			continue;
		};
		let mut on_path = FxHashSet::default();
		on_path.insert(root.clone());
		let mut stack = vec![Frame::new(Arc::clone(dependency))];

		while let Some(frame) = stack.last_mut() {
			let Some(child) = frame.children.get(frame.next).cloned() else {
				on_path.remove(frame.dependency.uri());
				finished.insert(frame.dependency.uri().clone());
				stack.pop();
				continue;
			};
			frame.next += 1;
			if on_path.contains(&child) {
				let edge = CycleEdge {
					from: frame.dependency.uri().clone(),
					to: child,
				};
				if !edges.contains(&edge) {
					edges.push(edge);
				}
				continue;
			}
			if finished.contains(&child) {
				continue;
			}
			if let Some(next) = state.dependencies.get(&child) {
				on_path.insert(child);
				stack.push(Frame::new(Arc::clone(next)));
			}
		}
	}
	edges
}
