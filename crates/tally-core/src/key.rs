// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Writer authorization key.
//!
//! The key is attached to every write request. It never appears in
//! `Debug`/`Display` output, so it stays out of `tracing` fields, and its
//! memory is zeroed when dropped.

use std::fmt;

use zeroize::Zeroize;

/// Placeholder printed instead of the key.
pub const REDACTED: &str = "[REDACTED]";

/// The project's write key.
///
/// ```
/// use tally_core::WriteKey;
///
/// let key = WriteKey::new("wk_live_abc");
/// assert_eq!(format!("{key:?}"), "WriteKey(\"[REDACTED]\")");
/// assert_eq!(key.expose(), "wk_live_abc");
/// ```
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct WriteKey {
	inner: String,
}

impl WriteKey {
	pub fn new(key: impl Into<String>) -> Self {
		Self { inner: key.into() }
	}

	/// Returns the raw key for placing into a request header.
	pub fn expose(&self) -> &str {
		&self.inner
	}

	pub fn is_empty(&self) -> bool {
		self.inner.trim().is_empty()
	}
}

impl fmt::Debug for WriteKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("WriteKey").field(&REDACTED).finish()
	}
}

impl fmt::Display for WriteKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl From<String> for WriteKey {
	fn from(key: String) -> Self {
		Self::new(key)
	}
}

impl From<&str> for WriteKey {
	fn from(key: &str) -> Self {
		Self::new(key)
	}
}
