//! Debounced bridge from file system events to a graph.
//!
//! Events are buffered per URI for one flush interval, starting at the first
//! event of a batch. Repeated events for one URI collapse into a single
//! entry, so a burst of saves costs one reload:
//!
//! | queued | incoming | result    |
//! |--------|----------|-----------|
//! | Unlink | Add      | Change    |
//! | Add    | Change   | Add       |
//! | Add    | Unlink   | (dropped) |
//! | any    | any      | incoming  |
//!
//! A flushed batch is dispatched in arrival order, then every root left
//! stale or re-armed by the batch is evaluated again.

use std::time::Duration;

use indexmap::IndexMap;
use indexmap::map::Entry;
use tandem_fs::{CanonicalUri, FileEvent, FileEventKind, WatchSubscription};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::WatchOptions;
use crate::dependency::DependencyState;
use crate::error::SandboxError;
use crate::graph::{DependencyGraph, RemoveMode};

/// What one dispatched batch did to the graph.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
	/// URIs reloaded because their content changed.
	pub reloaded: Vec<CanonicalUri>,
	/// URIs that left the graph, pruned orphans included.
	pub removed: Vec<CanonicalUri>,
	/// Roots evaluated again after the batch.
	pub reevaluated: Vec<CanonicalUri>,
	/// Dependencies taken out of the error state.
	pub rearmed: usize,
	pub failed: Vec<(CanonicalUri, SandboxError)>,
}

impl DispatchReport {
	pub fn is_empty(&self) -> bool {
		self.reloaded.is_empty()
			&& self.removed.is_empty()
			&& self.reevaluated.is_empty()
			&& self.rearmed == 0
			&& self.failed.is_empty()
	}
}

/// Coalesces [`FileEvent`]s and applies them to a [`DependencyGraph`].
#[derive(Debug)]
pub struct ChangePipeline {
	graph: DependencyGraph,
	flush_interval: Duration,
	pending: IndexMap<CanonicalUri, FileEventKind>,
}

impl ChangePipeline {
	pub fn new(graph: DependencyGraph, options: &WatchOptions) -> Self {
		Self {
			graph,
			flush_interval: options.flush_interval(),
			pending: IndexMap::new(),
		}
	}

	pub fn flush_interval(&self) -> Duration {
		self.flush_interval
	}

	/// Queues `event`, merging it with any queued event for the same URI.
	pub fn push(&mut self, event: FileEvent) {
		use FileEventKind::{Add, Change, Unlink};

		match self.pending.entry(event.uri) {
			Entry::Vacant(slot) => {
				slot.insert(event.kind);
			}
			Entry::Occupied(mut slot) => match (*slot.get(), event.kind) {
				(Unlink, Add) => *slot.get_mut() = Change,
				(Add, Change) => {}
				(Add, Unlink) => {
					slot.shift_remove();
				}
				(_, kind) => *slot.get_mut() = kind,
			},
		}
	}

	pub fn pending(&self) -> usize {
		self.pending.len()
	}

	/// Drains queued events in arrival order.
	pub fn take_batch(&mut self) -> Vec<FileEvent> {
		self.pending.drain(..).map(|(uri, kind)| FileEvent::new(kind, uri)).collect()
	}

	/// Applies one batch to the graph.
	///
	/// Failures are collected in the report rather than returned; a batch
	/// stops early only once the graph is disposed.
	pub async fn dispatch(&self, batch: Vec<FileEvent>) -> DispatchReport {
		let mut report = DispatchReport::default();
		for FileEvent { kind, uri } in batch {
			tracing::trace!(uri = %uri, %kind, "watch.dispatch");
			let outcome = match kind {
				FileEventKind::Add | FileEventKind::Change => self.on_content(kind, &uri, &mut report).await,
				FileEventKind::Unlink => {
					self.graph.resolver().clear();
					self.graph.cache().evict(&uri);
					self.remove(&uri, &mut report)
				}
				FileEventKind::UnlinkDir => {
					self.graph.resolver().clear();
					let dir = uri.as_dir();
					self.graph.cache().evict_under(&dir);
					self.graph
						.uris_under(&dir)
						.iter()
						.try_for_each(|held| self.remove(held, &mut report))
				}
				FileEventKind::AddDir => {
					self.graph.resolver().clear();
					report.rearmed += self.graph.retry_errors();
					Ok(())
				}
			};
			if outcome.is_err() {
				return report;
			}
		}
		self.settle_roots(&mut report).await;
		report
	}

	/// Consumes `events` until `cancel` fires or the backend goes away.
	pub async fn run(mut self, mut events: WatchSubscription, cancel: CancellationToken) {
		tracing::debug!(flush_ms = self.flush_interval.as_millis() as u64, "watch.start");
		let mut deadline: Option<Instant> = None;
		loop {
			let wait = deadline;
			let flush = async move {
				match wait {
					Some(at) => tokio::time::sleep_until(at).await,
					None => std::future::pending().await,
				}
			};
			tokio::select! {
				biased;
				() = cancel.cancelled() => break,
				event = events.recv() => match event {
					Some(event) => {
						self.push(event);
						if deadline.is_none() {
							deadline = Some(Instant::now() + self.flush_interval);
						}
					}
					None => {
						let batch = self.take_batch();
						if !batch.is_empty() {
							self.flush(batch).await;
						}
						break;
					}
				},
				() = flush => {
					deadline = None;
					let batch = self.take_batch();
					self.flush(batch).await;
				}
			}
			if self.graph.is_disposed() {
				break;
			}
		}
		tracing::debug!("watch.stop");
	}

	async fn flush(&self, batch: Vec<FileEvent>) {
		let events = batch.len();
		let report = self.dispatch(batch).await;
		tracing::debug!(
			events,
			reloaded = report.reloaded.len(),
			removed = report.removed.len(),
			reevaluated = report.reevaluated.len(),
			rearmed = report.rearmed,
			failed = report.failed.len(),
			"watch.flush"
		);
	}

	async fn on_content(&self, kind: FileEventKind, uri: &CanonicalUri, report: &mut DispatchReport) -> Result<(), SandboxError> {
		if kind == FileEventKind::Add {
			self.graph.resolver().clear();
			report.rearmed += self.graph.retry_errors();
		}
		self.graph.cache().invalidate(uri);
		if !self.graph.contains(uri) {
			return Ok(());
		}
		match self.graph.reload(uri).await {
			Ok(_) => report.reloaded.push(uri.clone()),
			Err(SandboxError::Disposed) => return Err(SandboxError::Disposed),
			Err(error) => {
				tracing::warn!(uri = %uri, %error, "watch.reload_failed");
				report.failed.push((uri.clone(), error));
			}
		}
		Ok(())
	}

	fn remove(&self, uri: &CanonicalUri, report: &mut DispatchReport) -> Result<(), SandboxError> {
		// Cascading removal may already have pruned it.
		if !self.graph.contains(uri) {
			return Ok(());
		}
		match self.graph.remove(uri, RemoveMode::Cascade) {
			Ok(removed) => report.removed.extend(removed),
			Err(SandboxError::Disposed) => return Err(SandboxError::Disposed),
			Err(error) => report.failed.push((uri.clone(), error)),
		}
		Ok(())
	}

	async fn settle_roots(&self, report: &mut DispatchReport) {
		for root in self.graph.roots() {
			let Some(dependency) = self.graph.get(&root) else {
				continue;
			};
			if !matches!(dependency.state(), DependencyState::Stale | DependencyState::Unresolved) {
				continue;
			}
			match self.graph.evaluate(&root).await {
				Ok(_) => report.reevaluated.push(root),
				Err(SandboxError::Disposed) => return,
				Err(error) => {
					tracing::warn!(uri = %root, %error, "watch.reevaluate_failed");
					report.failed.push((root, error));
				}
			}
		}
	}
}
