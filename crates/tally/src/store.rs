// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory event store for the local queue.
//!
//! Events are kept in a primary map `handle -> event` plus an index
//! `project -> collection -> ordered handles`. Both live behind a single
//! `tokio::sync::RwLock`, which queues readers and writers fairly, so a
//! steady stream of producers cannot starve a flush snapshot or the other
//! way round. Every mutation goes through [`EventStore::store`],
//! [`EventStore::remove`], [`EventStore::claim`] and [`EventStore::release`].
//!
//! Handles that a flush is currently sending are marked in flight by
//! [`EventStore::claim`]. A second flush running at the same time skips
//! them, so the same event is never part of two outstanding writes. The
//! in-flight set sits behind its own `std::sync::Mutex` (always taken after
//! the map lock) so that a dropped [`Claim`] can release it synchronously.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::IgnoredAny;
use tally_core::{CoreError, EventHandle, StoredEvent};
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::{Result, TallyError};

#[derive(Default)]
struct StoreInner {
	next_handle: u64,
	events: HashMap<EventHandle, StoredEvent>,
	index: BTreeMap<String, BTreeMap<String, BTreeSet<EventHandle>>>,
}

impl StoreInner {
	fn collection_len(&self, project_id: &str, collection: &str) -> usize {
		self
			.index
			.get(project_id)
			.and_then(|collections| collections.get(collection))
			.map_or(0, BTreeSet::len)
	}

	fn take(&mut self, handle: &EventHandle) -> Option<StoredEvent> {
		let event = self.events.remove(handle)?;

		if let Some(collections) = self.index.get_mut(&event.project_id) {
			if let Some(handles) = collections.get_mut(&event.collection) {
				handles.remove(&event.handle);
				if handles.is_empty() {
					collections.remove(&event.collection);
				}
			}
			if collections.is_empty() {
				self.index.remove(&event.project_id);
			}
		}

		Some(event)
	}
}

/// Thread-safe buffer of events waiting to be sent.
pub struct EventStore {
	inner: RwLock<StoreInner>,
	in_flight: Mutex<HashSet<EventHandle>>,
	live: AtomicUsize,
	max_events_per_collection: usize,
}

impl EventStore {
	/// Creates an empty store holding at most `max_events_per_collection`
	/// events for any one `(project, collection)`.
	pub fn new(max_events_per_collection: usize) -> Self {
		Self {
			inner: RwLock::new(StoreInner {
				next_handle: 1,
				..StoreInner::default()
			}),
			in_flight: Mutex::new(HashSet::new()),
			live: AtomicUsize::new(0),
			max_events_per_collection,
		}
	}

	/// Per-collection limit given at construction.
	pub fn capacity(&self) -> usize {
		self.max_events_per_collection
	}

	/// Stores an event body and returns its handle.
	///
	/// Fails with [`TallyError::CapacityExceeded`] if the collection is
	/// already full; nothing is evicted. Bodies that are not well-formed
	/// JSON are refused.
	pub async fn store(
		&self,
		project_id: &str,
		collection: &str,
		body: impl Into<String>,
	) -> Result<EventHandle> {
		let body = body.into();
		if let Err(e) = serde_json::from_str::<IgnoredAny>(&body) {
			return Err(CoreError::InvalidEventBody(e.to_string()).into());
		}

		let mut inner = self.inner.write().await;

		if inner.collection_len(project_id, collection) >= self.max_events_per_collection {
			return Err(TallyError::CapacityExceeded {
				project_id: project_id.to_string(),
				collection: collection.to_string(),
				limit: self.max_events_per_collection,
			});
		}

		let handle = EventHandle(inner.next_handle);
		inner.next_handle += 1;

		inner
			.index
			.entry(project_id.to_string())
			.or_default()
			.entry(collection.to_string())
			.or_default()
			.insert(handle);
		inner
			.events
			.insert(handle, StoredEvent::new(handle, project_id, collection, body));
		self.live.fetch_add(1, Ordering::SeqCst);

		trace!(%handle, project_id, collection, "Stored event");
		Ok(handle)
	}

	/// Snapshot of the handles queued for `project_id`, grouped by
	/// collection and ordered oldest first.
	pub async fn handles_by_collection(&self, project_id: &str) -> BTreeMap<String, Vec<EventHandle>> {
		let inner = self.inner.read().await;
		inner
			.index
			.get(project_id)
			.map(|collections| {
				collections
					.iter()
					.map(|(name, handles)| (name.clone(), handles.iter().copied().collect()))
					.collect()
			})
			.unwrap_or_default()
	}

	/// Returns the body stored under `handle`.
	pub async fn get(&self, handle: EventHandle) -> Result<String> {
		let inner = self.inner.read().await;
		inner
			.events
			.get(&handle)
			.map(|event| event.body.clone())
			.ok_or(TallyError::NotFound(handle))
	}

	/// Removes `handle`. Returns `false` if it was already gone.
	pub async fn remove(&self, handle: EventHandle) -> bool {
		self.remove_all(&[handle]).await == 1
	}

	/// Removes every handle in `handles` and returns how many were present.
	pub async fn remove_all(&self, handles: &[EventHandle]) -> usize {
		let mut inner = self.inner.write().await;
		let mut in_flight = self.lock_in_flight();
		let mut removed = 0;

		for handle in handles {
			in_flight.remove(handle);
			if inner.take(handle).is_some() {
				removed += 1;
			}
		}

		self.live.fetch_sub(removed, Ordering::SeqCst);
		removed
	}

	/// Marks live, unclaimed handles as in flight.
	///
	/// The returned [`Claim`] lists the handles actually claimed, in the
	/// order given; missing or already-claimed handles are skipped. Dropping
	/// the claim releases whatever is still marked.
	pub async fn claim(self: &Arc<Self>, handles: &[EventHandle]) -> Claim {
		let inner = self.inner.read().await;
		let mut in_flight = self.lock_in_flight();
		let mut claimed = Vec::with_capacity(handles.len());

		for handle in handles {
			if inner.events.contains_key(handle) && in_flight.insert(*handle) {
				claimed.push(*handle);
			}
		}

		Claim {
			store: Arc::clone(self),
			handles: claimed,
		}
	}

	/// Clears the in-flight mark so a later flush can pick the handles up.
	pub fn release(&self, handles: &[EventHandle]) {
		let mut in_flight = self.lock_in_flight();
		for handle in handles {
			in_flight.remove(handle);
		}
	}

	/// Number of handles currently claimed by a flush.
	pub fn in_flight(&self) -> usize {
		self.lock_in_flight().len()
	}

	/// Project ids that currently hold events.
	pub async fn projects(&self) -> Vec<String> {
		self.inner.read().await.index.keys().cloned().collect()
	}

	/// Live count for one collection.
	pub async fn len_for(&self, project_id: &str, collection: &str) -> usize {
		self.inner.read().await.collection_len(project_id, collection)
	}

	/// Total live events across all collections.
	///
	/// Advisory: the value may already be stale when the caller reads it.
	pub fn size(&self) -> usize {
		self.live.load(Ordering::SeqCst)
	}

	/// Whether [`size`](Self::size) is zero.
	pub fn is_empty(&self) -> bool {
		self.size() == 0
	}

	fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<EventHandle>> {
		self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Handles claimed by one flush; released on drop.
pub struct Claim {
	store: Arc<EventStore>,
	handles: Vec<EventHandle>,
}

impl Claim {
	/// Claimed handles, in the order they were requested.
	pub fn handles(&self) -> &[EventHandle] {
		&self.handles
	}

	/// Number of handles claimed.
	pub fn len(&self) -> usize {
		self.handles.len()
	}

	/// True when every requested handle was missing or already claimed.
	pub fn is_empty(&self) -> bool {
		self.handles.is_empty()
	}
}

impl Drop for Claim {
	fn drop(&mut self) {
		self.store.release(&self.handles);
	}
}
