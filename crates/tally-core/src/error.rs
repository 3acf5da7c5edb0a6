// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the core event model.

use thiserror::Error;

/// Errors raised while validating or encoding events.
#[derive(Debug, Error)]
pub enum CoreError {
	#[error("invalid project id: {0}")]
	InvalidProjectId(String),

	#[error("invalid collection name: {0}")]
	InvalidCollectionName(String),

	#[error("invalid event body: {0}")]
	InvalidEventBody(String),

	#[error("event body too large: {0} bytes (max {1})")]
	EventBodyTooLarge(usize, usize),

	#[error("serialization error: {0}")]
	Serialization(String),
}

impl From<serde_json::Error> for CoreError {
	fn from(err: serde_json::Error) -> Self {
		CoreError::Serialization(err.to_string())
	}
}

/// A specialized `Result` type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
