// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wire payloads for batched writes.
//!
//! A batch carries events for exactly one collection:
//!
//! ```json
//! {"purchases": [{"price": 10}, {"price": 12}]}
//! ```
//!
//! Event bodies are already serialized when they enter the queue, so the
//! payload embeds them as raw JSON instead of parsing them again.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::Result;

/// Request body for one batched write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPayload {
	collection: String,
	events: Vec<String>,
}

impl BatchPayload {
	pub fn new(collection: impl Into<String>, events: Vec<String>) -> Self {
		Self {
			collection: collection.into(),
			events,
		}
	}

	pub fn collection(&self) -> &str {
		&self.collection
	}

	pub fn len(&self) -> usize {
		self.events.len()
	}

	pub fn is_empty(&self) -> bool {
		self.events.is_empty()
	}

	/// Serializes the payload, failing if any body is not valid JSON.
	pub fn to_json(&self) -> Result<String> {
		let raw = self
			.events
			.iter()
			.map(|body| RawValue::from_string(body.clone()))
			.collect::<std::result::Result<Vec<Box<RawValue>>, _>>()?;

		let mut wire: BTreeMap<&str, Vec<Box<RawValue>>> = BTreeMap::new();
		wire.insert(&self.collection, raw);
		Ok(serde_json::to_string(&wire)?)
	}
}

/// Per-event error reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertError {
	pub name: String,
	#[serde(default)]
	pub description: String,
}

/// Per-event result reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOutcome {
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<InsertError>,
}

/// Decoded response body of a batched write, keyed by collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchInsertResult(pub BTreeMap<String, Vec<InsertOutcome>>);

impl BatchInsertResult {
	pub fn parse(body: &str) -> Result<Self> {
		Ok(serde_json::from_str(body)?)
	}

	/// Number of events the service reported as rejected.
	pub fn rejected(&self) -> usize {
		self
			.0
			.values()
			.flat_map(|outcomes| outcomes.iter())
			.filter(|o| !o.success)
			.count()
	}

	/// First rejection reported, if any.
	pub fn first_error(&self) -> Option<&InsertError> {
		self
			.0
			.values()
			.flat_map(|outcomes| outcomes.iter())
			.find_map(|o| o.error.as_ref())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::CoreError;

	#[test]
	fn payload_embeds_raw_bodies_in_order() {
		let payload = BatchPayload::new(
			"logs",
			vec![r#"{"n":1}"#.to_string(), r#"{"n":2}"#.to_string()],
		);
		assert_eq!(payload.len(), 2);
		assert_eq!(payload.to_json().unwrap(), r#"{"logs":[{"n":1},{"n":2}]}"#);
	}

	#[test]
	fn payload_escapes_collection_name() {
		let payload = BatchPayload::new("say \"hi\"", vec!["{}".to_string()]);
		assert_eq!(payload.to_json().unwrap(), r#"{"say \"hi\"":[{}]}"#);
	}

	#[test]
	fn payload_rejects_invalid_body() {
		let payload = BatchPayload::new("logs", vec!["{not json".to_string()]);
		assert!(matches!(payload.to_json(), Err(CoreError::Serialization(_))));
	}

	#[test]
	fn insert_result_counts_rejections() {
		let body = r#"{
			"logs": [
				{"success": true},
				{"success": false, "error": {"name": "InvalidPropertyNameError", "description": "bad name"}}
			]
		}"#;
		let result = BatchInsertResult::parse(body).unwrap();
		assert_eq!(result.rejected(), 1);
		assert_eq!(
			result.first_error().map(|e| e.name.as_str()),
			Some("InvalidPropertyNameError")
		);
	}

	#[test]
	fn insert_result_all_success() {
		let result = BatchInsertResult::parse(r#"{"logs":[{"success":true}]}"#).unwrap();
		assert_eq!(result.rejected(), 0);
		assert!(result.first_error().is_none());
	}
}
