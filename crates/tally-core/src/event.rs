// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Buffered event identity and validation.
//!
//! An event enters the local queue as a serialized JSON object and is
//! addressed from then on by an [`EventHandle`]. Handles are allocated from a
//! monotonic counter, so ordering handles orders events by enqueue time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Maximum length of a project id.
pub const MAX_PROJECT_ID_LENGTH: usize = 64;

/// Maximum length of a collection name.
pub const MAX_COLLECTION_NAME_LENGTH: usize = 256;

/// Maximum serialized size of a single event body (1 MiB).
pub const MAX_EVENT_BODY_SIZE: usize = 1024 * 1024;

/// Opaque identifier for one buffered event.
///
/// Unique for the lifetime of the store that allocated it. A larger handle
/// was always allocated later than a smaller one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventHandle(pub u64);

impl EventHandle {
	/// Returns the raw allocation counter value.
	pub fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for EventHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// An event held by the local queue.
///
/// Immutable once stored. The body is the exact JSON text that will be
/// placed into the batch payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
	pub handle: EventHandle,
	pub project_id: String,
	pub collection: String,
	pub body: String,
}

impl StoredEvent {
	pub fn new(
		handle: EventHandle,
		project_id: impl Into<String>,
		collection: impl Into<String>,
		body: impl Into<String>,
	) -> Self {
		Self {
			handle,
			project_id: project_id.into(),
			collection: collection.into(),
			body: body.into(),
		}
	}
}

/// Validates a project id.
///
/// Rules:
/// - 1 to 64 characters
/// - ASCII alphanumerics, `-` and `_` only
pub fn validate_project_id(id: &str) -> bool {
	!id.is_empty()
		&& id.len() <= MAX_PROJECT_ID_LENGTH
		&& id
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Validates a collection name.
///
/// Rules:
/// - 1 to 256 characters, ASCII only
/// - must not contain `.`
/// - must not start with `$` (reserved for server-side collections)
pub fn validate_collection_name(name: &str) -> bool {
	!name.is_empty()
		&& name.len() <= MAX_COLLECTION_NAME_LENGTH
		&& name.is_ascii()
		&& !name.contains('.')
		&& !name.starts_with('$')
		&& !name.chars().any(|c| c.is_ascii_control())
}

/// Validates an event body and returns its serialized form.
///
/// The body must be a JSON object no larger than [`MAX_EVENT_BODY_SIZE`]
/// once serialized.
pub fn validate_event_body(body: &serde_json::Value) -> Result<String> {
	if !body.is_object() {
		return Err(CoreError::InvalidEventBody(
			"event body must be a JSON object".to_string(),
		));
	}

	let serialized = serde_json::to_string(body)?;
	if serialized.len() > MAX_EVENT_BODY_SIZE {
		return Err(CoreError::EventBodyTooLarge(
			serialized.len(),
			MAX_EVENT_BODY_SIZE,
		));
	}

	Ok(serialized)
}
