// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the Tally SDK.

use tally_core::{CoreError, EventHandle};
use tally_http::RetryableError;
use thiserror::Error;

use crate::transport::TransportError;

/// Tally SDK errors.
///
/// Only [`CapacityExceeded`](TallyError::CapacityExceeded), validation and
/// shutdown errors reach a caller of `queue_event`. Delivery failures of
/// queued events are reported through flush reports and logs instead.
#[derive(Debug, Error)]
pub enum TallyError {
	/// The collection already holds the configured maximum of queued events.
	#[error("queue full for {project_id}/{collection}: {limit} events already queued")]
	CapacityExceeded {
		project_id: String,
		collection: String,
		limit: usize,
	},

	/// The handle is no longer in the store.
	#[error("event {0} not found")]
	NotFound(EventHandle),

	/// The request never produced an HTTP response.
	#[error("transport failure: {0}")]
	Transport(#[from] TransportError),

	/// The service answered with a non-2xx status.
	#[error("HTTP error ({status}): {body}")]
	Http { status: u16, body: String },

	/// A configuration value is outside its allowed range.
	#[error("invalid configuration: {0}")]
	ConfigValidation(String),

	/// Write key is missing or blank.
	#[error("invalid write key: must be non-empty")]
	InvalidWriteKey,

	/// Base URL is missing or not http(s).
	#[error("invalid base URL")]
	InvalidBaseUrl,

	/// No project id was configured.
	#[error("project id is required")]
	MissingProjectId,

	/// Project id, collection name or event body failed validation.
	#[error(transparent)]
	Validation(#[from] CoreError),

	/// Serialization error.
	#[error("serialization error: {0}")]
	Serialization(String),

	/// Client has been shut down.
	#[error("client has been shut down")]
	ClientShutdown,
}

impl From<serde_json::Error> for TallyError {
	fn from(err: serde_json::Error) -> Self {
		TallyError::Serialization(err.to_string())
	}
}

impl RetryableError for TallyError {
	fn is_retryable(&self) -> bool {
		match self {
			TallyError::Transport(e) => e.is_retryable(),
			TallyError::Http { status, .. } => matches!(*status, 408 | 429 | 500 | 502 | 503 | 504),
			_ => false,
		}
	}
}

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, TallyError>;
