// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Builder for event bodies.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Top-level key reserved for SDK and service metadata.
pub const RESERVED_KEY: &str = "tally";

/// Key under [`RESERVED_KEY`] carrying the event time.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// An event body under construction.
///
/// # Example
///
/// ```
/// use tally::Properties;
///
/// let event = Properties::new()
///     .insert("path", "/checkout")
///     .insert("items", 3)
///     .insert("user", Properties::new().insert("plan", "pro"));
/// assert_eq!(event.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
	inner: Map<String, Value>,
}

impl Properties {
	pub fn new() -> Self {
		Self { inner: Map::new() }
	}

	/// Sets `key`, replacing any earlier value. Nested objects can be passed
	/// as another `Properties`.
	pub fn insert<K, V>(mut self, key: K, value: V) -> Self
	where
		K: Into<String>,
		V: Into<Value>,
	{
		self.inner.insert(key.into(), value.into());
		self
	}

	/// Copies every key of `other` into `self`; `other` wins on conflicts.
	pub fn merge(mut self, other: Properties) -> Self {
		self.inner.extend(other.inner);
		self
	}

	/// Sets `tally.timestamp`, keeping any other `tally.*` keys.
	pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
		let reserved = self
			.inner
			.entry(RESERVED_KEY)
			.or_insert_with(|| Value::Object(Map::new()));
		if !reserved.is_object() {
			*reserved = Value::Object(Map::new());
		}
		if let Value::Object(map) = reserved {
			map.insert(TIMESTAMP_KEY.to_string(), Value::String(format_timestamp(at)));
		}
		self
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.inner.get(key)
	}

	pub fn into_value(self) -> Value {
		Value::Object(self.inner)
	}
}

impl From<Properties> for Value {
	fn from(props: Properties) -> Self {
		props.into_value()
	}
}

impl From<Map<String, Value>> for Properties {
	fn from(map: Map<String, Value>) -> Self {
		Self { inner: map }
	}
}

/// RFC 3339 with millisecond precision, as the service stores it.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
	at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Adds `tally.timestamp = now` unless the body already carries one.
///
/// Non-object bodies are returned untouched.
pub(crate) fn stamp_timestamp(mut body: Value, now: DateTime<Utc>) -> Value {
	if let Value::Object(map) = &mut body {
		let reserved = map
			.entry(RESERVED_KEY)
			.or_insert_with(|| Value::Object(Map::new()));
		if let Value::Object(reserved) = reserved {
			reserved
				.entry(TIMESTAMP_KEY)
				.or_insert_with(|| Value::String(format_timestamp(now)));
		}
	}
	body
}
