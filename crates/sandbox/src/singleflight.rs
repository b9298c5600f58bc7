//! Per-key deduplication of concurrent async work.
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! that arrive while it is in flight wait on a `watch` channel and receive a
//! clone of the leader's result. If the leader is dropped before finishing,
//! its guard removes the entry and closes the channel, and one waiter takes
//! over as the new leader.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::watch;

struct Flight<V> {
	tx: watch::Sender<Option<V>>,
}

type FlightMap<K, V> = Arc<Mutex<FxHashMap<K, Arc<Flight<V>>>>>;

pub(crate) struct SingleFlight<K, V> {
	flights: FlightMap<K, V>,
}

impl<K, V> Default for SingleFlight<K, V> {
	fn default() -> Self {
		Self {
			flights: Arc::new(Mutex::new(FxHashMap::default())),
		}
	}
}

impl<K, V> SingleFlight<K, V>
where
	K: Eq + Hash + Clone,
	V: Clone,
{
	pub fn new() -> Self {
		Self::default()
	}

	/// Runs `work` for `key` unless a run is already in flight, in which case
	/// the in-flight result is shared.
	///
	/// `work` is only invoked by the caller that ends up leading.
	pub async fn run<F, Fut>(&self, key: K, work: F) -> V
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = V>,
	{
		let guard = loop {
			let (flight, is_leader) = {
				let mut flights = self.flights.lock();
				match flights.get(&key) {
					Some(flight) => (Arc::clone(flight), false),
					None => {
						let (tx, _rx) = watch::channel(None);
						let flight = Arc::new(Flight { tx });
						flights.insert(key.clone(), Arc::clone(&flight));
						(flight, true)
					}
				}
			};

			if is_leader {
				break FlightGuard {
					key: key.clone(),
					flights: Arc::clone(&self.flights),
					flight,
					completed: false,
				};
			}

			let mut rx = flight.tx.subscribe();
			// Only the map and the leader may keep the sender alive.
			drop(flight);
			loop {
				if let Some(value) = rx.borrow_and_update().as_ref() {
					return value.clone();
				}
				if rx.changed().await.is_err() {
					break;
				}
			}
			tracing::trace!("singleflight.takeover");
		};

		let value = work().await;
		guard.complete(value)
	}

	/// Number of keys currently in flight.
	#[cfg(test)]
	pub fn in_flight(&self) -> usize {
		self.flights.lock().len()
	}
}

/// Removes the entry once the leader completes or is dropped early.
struct FlightGuard<K: Eq + Hash, V> {
	key: K,
	flights: FlightMap<K, V>,
	flight: Arc<Flight<V>>,
	completed: bool,
}

impl<K: Eq + Hash, V: Clone> FlightGuard<K, V> {
	fn complete(mut self, value: V) -> V {
		self.completed = true;
		self.flight.tx.send_replace(Some(value.clone()));
		self.remove_entry();
		value
	}

	fn remove_entry(&self) {
		let mut flights = self.flights.lock();
		if flights.get(&self.key).is_some_and(|current| Arc::ptr_eq(current, &self.flight)) {
			flights.remove(&self.key);
		}
	}
}

impl<K: Eq + Hash, V> Drop for FlightGuard<K, V> {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		// Waiters see the channel close once this guard releases the sender.
		let mut flights = self.flights.lock();
		if flights.get(&self.key).is_some_and(|current| Arc::ptr_eq(current, &self.flight)) {
			flights.remove(&self.key);
		}
	}
}
