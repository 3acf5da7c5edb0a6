// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory transport for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::store::EventStore;
use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};

/// One scripted reaction to a request.
pub(crate) enum Step {
	Reply(Result<TransportResponse, TransportError>),
	Delayed(Duration, Result<TransportResponse, TransportError>),
	Panic,
}

impl Step {
	pub(crate) fn status(status: u16, body: &str) -> Self {
		Step::Reply(Ok(TransportResponse::new(status, body)))
	}
}

/// Records every request and plays back a script, answering 200 once it
/// runs out.
pub(crate) struct ScriptedTransport {
	requests: Mutex<Vec<TransportRequest>>,
	script: Mutex<VecDeque<Step>>,
}

impl ScriptedTransport {
	pub(crate) fn ok() -> Self {
		Self::scripted(Vec::new())
	}

	pub(crate) fn scripted(script: Vec<Step>) -> Self {
		Self {
			requests: Mutex::new(Vec::new()),
			script: Mutex::new(script.into()),
		}
	}

	pub(crate) fn requests(&self) -> Vec<TransportRequest> {
		self.requests.lock().unwrap().clone()
	}

	pub(crate) fn calls(&self) -> usize {
		self.requests.lock().unwrap().len()
	}

	/// Request bodies parsed as JSON.
	pub(crate) fn bodies(&self) -> Vec<serde_json::Value> {
		self
			.requests()
			.iter()
			.map(|r| serde_json::from_str(r.body.as_deref().unwrap()).unwrap())
			.collect()
	}

	/// Names of all shipped events in `collection`, in send order.
	pub(crate) fn shipped_names(&self, collection: &str) -> Vec<String> {
		self
			.bodies()
			.iter()
			.flat_map(|b| b[collection].as_array().cloned().unwrap_or_default())
			.map(|e| e["name"].as_str().unwrap().to_string())
			.collect()
	}
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
	async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
		self.requests.lock().unwrap().push(request);
		let step = self.script.lock().unwrap().pop_front();
		match step {
			None => Ok(TransportResponse::new(200, "{}")),
			Some(Step::Reply(reply)) => reply,
			Some(Step::Delayed(delay, reply)) => {
				tokio::time::sleep(delay).await;
				reply
			}
			Some(Step::Panic) => panic!("scripted transport panic"),
		}
	}
}

/// `e0`, `e1`, ... used as event names.
pub(crate) fn event_names(count: usize) -> Vec<String> {
	(0..count).map(|i| format!("e{i}")).collect()
}

/// Store holding one `{"name": ..}` event per name in `collection`.
pub(crate) async fn store_with(project: &str, collection: &str, names: &[&str]) -> Arc<EventStore> {
	let store = Arc::new(EventStore::new(10_000));
	for name in names {
		store
			.store(project, collection, format!("{{\"name\":\"{name}\"}}"))
			.await
			.unwrap();
	}
	store
}
