use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic stamp source for evaluation order within one graph.
#[derive(Debug, Default, Clone)]
pub(crate) struct EvaluationClock {
	next: Arc<AtomicU64>,
}

impl EvaluationClock {
	/// Creates a clock whose first stamp is 1.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next stamp.
	pub fn next(&self) -> u64 {
		self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}
}
