// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Tally analytics SDK.
//!
//! This crate holds the value types shared by the queue, the batch sender
//! and the HTTP transport in the `tally` SDK crate:
//!
//! - [`EventHandle`] and [`StoredEvent`]: identity and contents of one
//!   buffered event
//! - [`WriteKey`]: the writer authorization key, redacted in all output
//! - [`BatchPayload`]: the wire body for one batched write
//! - validation helpers for project ids, collection names and event bodies
//!
//! # Example
//!
//! ```
//! use tally_core::{validate_collection_name, BatchPayload, WriteKey};
//!
//! assert!(validate_collection_name("purchases"));
//! assert!(!validate_collection_name("$internal"));
//!
//! let key = WriteKey::new("wk_secret");
//! assert_eq!(format!("{key}"), "[REDACTED]");
//!
//! let payload = BatchPayload::new("purchases", vec![r#"{"price":10}"#.to_string()]);
//! assert_eq!(payload.to_json().unwrap(), r#"{"purchases":[{"price":10}]}"#);
//! ```

pub mod error;
pub mod event;
pub mod key;
pub mod payload;

pub use error::{CoreError, Result};
pub use event::{
	validate_collection_name, validate_event_body, validate_project_id, EventHandle, StoredEvent,
	MAX_COLLECTION_NAME_LENGTH, MAX_EVENT_BODY_SIZE, MAX_PROJECT_ID_LENGTH,
};
pub use key::{WriteKey, REDACTED};
pub use payload::{BatchInsertResult, BatchPayload, InsertError, InsertOutcome};
