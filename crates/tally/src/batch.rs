// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Batched delivery of queued events.
//!
//! A flush walks every project in the [`EventStore`], claims each
//! collection's pending handles, cuts them into groups of at most
//! `batch_size` (oldest first) and sends one write per group. A group is
//! removed from the store only after a 2xx answer; any other outcome leaves
//! it queued for the next flush. Groups succeed or fail independently.
//!
//! Every running flush is tracked so shutdown can wait for flushes started
//! by callers as well as by the timer.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use serde::Serialize;
use tally_core::{BatchInsertResult, BatchPayload, EventHandle, WriteKey};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::TallyError;
use crate::store::EventStore;
use crate::transport::{Transport, TransportRequest};

/// Path of the batched write endpoint for `project_id`.
pub fn events_path(project_id: &str) -> String {
	format!("/3.0/projects/{project_id}/events")
}

/// How a single group fared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchResult {
	/// The service accepted the write. `rejected` counts events the
	/// response body flagged individually; they are removed all the same.
	Delivered { status: u16, rejected: usize },
	/// The service answered with a non-2xx status.
	Rejected { status: u16, body: String },
	/// No response was obtained.
	TransportFailed { error: String },
	/// The payload could not be encoded.
	EncodeFailed { error: String },
}

/// Outcome record for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
	pub project_id: String,
	pub collection: String,
	pub handles: Vec<EventHandle>,
	/// Events included in the request.
	pub sent: usize,
	/// Events removed from the store as a result.
	pub removed: usize,
	pub result: BatchResult,
}

impl BatchOutcome {
	pub fn is_delivered(&self) -> bool {
		matches!(self.result, BatchResult::Delivered { .. })
	}
}

/// Everything one flush did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
	pub batches: Vec<BatchOutcome>,
}

impl FlushReport {
	pub fn is_empty(&self) -> bool {
		self.batches.is_empty()
	}

	/// Events included in any request.
	pub fn sent(&self) -> usize {
		self.batches.iter().map(|b| b.sent).sum()
	}

	/// Events removed from the store.
	pub fn removed(&self) -> usize {
		self.batches.iter().map(|b| b.removed).sum()
	}

	/// Number of groups that were not delivered.
	pub fn failed(&self) -> usize {
		self.batches.iter().filter(|b| !b.is_delivered()).count()
	}

	fn merge(&mut self, other: FlushReport) {
		self.batches.extend(other.batches);
	}
}

/// Receives a report after every flush.
pub trait FlushObserver: Send + Sync {
	fn on_flush(&self, report: &FlushReport);
}

/// Groups queued events and ships them through a [`Transport`].
pub struct BatchSender {
	store: Arc<EventStore>,
	transport: Arc<dyn Transport>,
	write_key: WriteKey,
	batch_size: usize,
	observer: Option<Arc<dyn FlushObserver>>,
	flights: TaskTracker,
}

impl BatchSender {
	pub fn new(
		store: Arc<EventStore>,
		transport: Arc<dyn Transport>,
		write_key: WriteKey,
		batch_size: usize,
	) -> Self {
		Self {
			store,
			transport,
			write_key,
			batch_size: batch_size.max(1),
			observer: None,
			flights: TaskTracker::new(),
		}
	}

	pub fn with_observer(mut self, observer: Arc<dyn FlushObserver>) -> Self {
		self.observer = Some(observer);
		self
	}

	pub fn store(&self) -> &Arc<EventStore> {
		&self.store
	}

	pub fn batch_size(&self) -> usize {
		self.batch_size
	}

	/// Sends everything queued at the time of the call, across all projects.
	///
	/// Safe to run concurrently with other flushes: handles already claimed
	/// by another flush are left to it.
	pub async fn flush(&self) -> FlushReport {
		self.flights.track_future(self.flush_all()).await
	}

	/// Sends everything queued for one project.
	pub async fn flush_project(&self, project_id: &str) -> FlushReport {
		self
			.flights
			.track_future(async {
				let report = self.send_project(project_id).await;
				self.notify(&report);
				report
			})
			.await
	}

	/// Number of flushes currently running.
	pub fn flushes_in_flight(&self) -> usize {
		self.flights.len()
	}

	/// Waits until no flush is running.
	///
	/// Flushes started after this returns still run and are still tracked.
	pub async fn wait_for_flushes(&self) {
		self.flights.close();
		self.flights.wait().await;
	}

	async fn flush_all(&self) -> FlushReport {
		let mut report = FlushReport::default();

		for project_id in self.store.projects().await {
			report.merge(self.send_project(&project_id).await);
		}

		if !report.is_empty() {
			debug!(
				batches = report.batches.len(),
				sent = report.sent(),
				removed = report.removed(),
				failed = report.failed(),
				remaining = self.store.size(),
				"Flush complete"
			);
		}

		self.notify(&report);
		report
	}

	/// Failed groups stay claimed until the collection's [`Claim`] drops, so a
	/// concurrent flush cannot pick them up while this one still holds them.
	///
	/// [`Claim`]: crate::store::Claim
	async fn send_project(&self, project_id: &str) -> FlushReport {
		let mut report = FlushReport::default();

		for (collection, handles) in self.store.handles_by_collection(project_id).await {
			let claim = self.store.claim(&handles).await;
			if claim.is_empty() {
				continue;
			}

			for group in claim.handles().chunks(self.batch_size) {
				if let Some(outcome) = self.send_group(project_id, &collection, group).await {
					report.batches.push(outcome);
				}
			}
		}

		report
	}

	async fn send_group(
		&self,
		project_id: &str,
		collection: &str,
		group: &[EventHandle],
	) -> Option<BatchOutcome> {
		let mut handles = Vec::with_capacity(group.len());
		let mut bodies = Vec::with_capacity(group.len());

		for handle in group {
			match self.store.get(*handle).await {
				Ok(body) => {
					handles.push(*handle);
					bodies.push(body);
				}
				Err(TallyError::NotFound(_)) => {
					debug!(%handle, "Event already removed, skipping");
				}
				Err(e) => {
					warn!(%handle, error = %e, "Failed to read queued event, skipping");
				}
			}
		}

		if handles.is_empty() {
			return None;
		}

		let sent = handles.len();
		let payload = BatchPayload::new(collection, bodies);
		let body = match payload.to_json() {
			Ok(body) => body,
			Err(e) => {
				error!(project_id, collection, count = sent, error = %e, "Failed to encode batch");
				return Some(BatchOutcome {
					project_id: project_id.to_string(),
					collection: collection.to_string(),
					handles,
					sent: 0,
					removed: 0,
					result: BatchResult::EncodeFailed { error: e.to_string() },
				});
			}
		};

		debug!(project_id, collection, count = sent, "Sending event batch");

		let request = TransportRequest::post_json(events_path(project_id), self.write_key.clone(), body);
		let result = match self.transport.send(request).await {
			Ok(response) if response.is_success() => {
				let rejected = BatchInsertResult::parse(&response.body)
					.map(|r| r.rejected())
					.unwrap_or(0);
				BatchResult::Delivered {
					status: response.status,
					rejected,
				}
			}
			Ok(response) => BatchResult::Rejected {
				status: response.status,
				body: response.body,
			},
			Err(e) => BatchResult::TransportFailed { error: e.to_string() },
		};

		let removed = match &result {
			BatchResult::Delivered { rejected, .. } => {
				let removed = self.store.remove_all(&handles).await;
				info!(project_id, collection, sent, removed, "Event batch delivered");
				if *rejected > 0 {
					warn!(project_id, collection, rejected, "Service rejected some events in batch");
				}
				removed
			}
			BatchResult::Rejected { status, body } => {
				warn!(project_id, collection, count = sent, status, body = %body, "Event batch rejected, will retry");
				0
			}
			BatchResult::TransportFailed { error } => {
				warn!(project_id, collection, count = sent, error = %error, "Event batch not delivered, will retry");
				0
			}
			BatchResult::EncodeFailed { .. } => 0,
		};

		Some(BatchOutcome {
			project_id: project_id.to_string(),
			collection: collection.to_string(),
			handles,
			sent,
			removed,
			result,
		})
	}

	fn notify(&self, report: &FlushReport) {
		let Some(observer) = &self.observer else {
			return;
		};
		let result = std::panic::catch_unwind(AssertUnwindSafe(|| observer.on_flush(report)));
		if result.is_err() {
			error!("Flush observer panicked");
		}
	}
}
