// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Queue and client configuration.
//!
//! Every queue option can be overridden from the environment:
//!
//! | Variable | Option |
//! |----------|--------|
//! | `TALLY_BATCH_SIZE` | [`QueueConfig::batch_size`] |
//! | `TALLY_SEND_INTERVAL_EVENTS` | [`QueueConfig::send_interval_events`] |
//! | `TALLY_SEND_INTERVAL_SECS` | [`QueueConfig::send_interval`] |
//! | `TALLY_MAX_EVENTS_PER_COLLECTION` | [`QueueConfig::max_events_per_collection`] |
//! | `TALLY_SHUTDOWN_DELAY_SECS` | [`QueueConfig::shutdown_delay`] |
//! | `TALLY_ENV=test` | [`QueueConfig::test_mode`] |
//!
//! The write key is read with [`load_write_key_from`], which honours the
//! `TALLY_WRITE_KEY_FILE` convention for mounted secrets.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tally_core::WriteKey;
use tally_http::RetryConfig;

use crate::error::{Result, TallyError};

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_MAX_EVENTS_PER_COLLECTION: usize = 10_000;
pub const DEFAULT_SHUTDOWN_DELAY: Duration = Duration::from_secs(30);

pub const MIN_SEND_INTERVAL_EVENTS: usize = 100;
pub const MAX_SEND_INTERVAL_EVENTS: usize = 10_000;
pub const MIN_SEND_INTERVAL: Duration = Duration::from_secs(60);
pub const MAX_SEND_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub const ENV_BATCH_SIZE: &str = "TALLY_BATCH_SIZE";
pub const ENV_SEND_INTERVAL_EVENTS: &str = "TALLY_SEND_INTERVAL_EVENTS";
pub const ENV_SEND_INTERVAL_SECS: &str = "TALLY_SEND_INTERVAL_SECS";
pub const ENV_MAX_EVENTS_PER_COLLECTION: &str = "TALLY_MAX_EVENTS_PER_COLLECTION";
pub const ENV_SHUTDOWN_DELAY_SECS: &str = "TALLY_SHUTDOWN_DELAY_SECS";
pub const ENV_MODE: &str = "TALLY_ENV";
pub const ENV_PROJECT_ID: &str = "TALLY_PROJECT_ID";
pub const ENV_WRITE_KEY: &str = "TALLY_WRITE_KEY";
pub const ENV_BASE_URL: &str = "TALLY_BASE_URL";

/// Configuration for the local event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
	/// Maximum number of events sent in one write call.
	pub batch_size: usize,
	/// Queue size that triggers an inline flush. Zero disables the trigger.
	pub send_interval_events: usize,
	/// Period of the background flush timer. Zero disables the timer.
	pub send_interval: Duration,
	/// Maximum number of queued events per collection.
	pub max_events_per_collection: usize,
	/// How long shutdown waits for an in-flight timer flush.
	pub shutdown_delay: Duration,
	/// Skips the interval and threshold range checks.
	pub test_mode: bool,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			batch_size: DEFAULT_BATCH_SIZE,
			send_interval_events: 0,
			send_interval: Duration::ZERO,
			max_events_per_collection: DEFAULT_MAX_EVENTS_PER_COLLECTION,
			shutdown_delay: DEFAULT_SHUTDOWN_DELAY,
			test_mode: false,
		}
	}
}

impl QueueConfig {
	/// Defaults overlaid with the process environment.
	pub fn from_env() -> Result<Self> {
		Self::default().apply_env()
	}

	/// Overlays the process environment onto this config.
	pub fn apply_env(self) -> Result<Self> {
		self.apply_env_from(|var| std::env::var(var).ok())
	}

	/// Overlays values returned by `lookup` onto this config.
	pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(v) = parse_var::<usize, _>(&lookup, ENV_BATCH_SIZE)? {
			self.batch_size = v;
		}
		if let Some(v) = parse_var::<usize, _>(&lookup, ENV_SEND_INTERVAL_EVENTS)? {
			self.send_interval_events = v;
		}
		if let Some(v) = parse_var::<u64, _>(&lookup, ENV_SEND_INTERVAL_SECS)? {
			self.send_interval = Duration::from_secs(v);
		}
		if let Some(v) = parse_var::<usize, _>(&lookup, ENV_MAX_EVENTS_PER_COLLECTION)? {
			self.max_events_per_collection = v;
		}
		if let Some(v) = parse_var::<u64, _>(&lookup, ENV_SHUTDOWN_DELAY_SECS)? {
			self.shutdown_delay = Duration::from_secs(v);
		}
		if let Some(mode) = lookup(ENV_MODE) {
			self.test_mode = mode.trim().eq_ignore_ascii_case("test");
		}
		Ok(self)
	}

	/// Checks sizes and, outside test mode, the interval and threshold bounds.
	pub fn validate(&self) -> Result<()> {
		if self.batch_size == 0 {
			return Err(TallyError::ConfigValidation(
				"batch_size must be greater than zero".to_string(),
			));
		}

		if self.max_events_per_collection == 0 {
			return Err(TallyError::ConfigValidation(
				"max_events_per_collection must be greater than zero".to_string(),
			));
		}

		if self.test_mode {
			return Ok(());
		}

		if self.send_interval_events != 0
			&& !(MIN_SEND_INTERVAL_EVENTS..=MAX_SEND_INTERVAL_EVENTS).contains(&self.send_interval_events)
		{
			return Err(TallyError::ConfigValidation(format!(
				"send_interval_events must be 0 or between {MIN_SEND_INTERVAL_EVENTS} and {MAX_SEND_INTERVAL_EVENTS}, got {}",
				self.send_interval_events
			)));
		}

		if !self.send_interval.is_zero()
			&& !(MIN_SEND_INTERVAL..=MAX_SEND_INTERVAL).contains(&self.send_interval)
		{
			return Err(TallyError::ConfigValidation(format!(
				"send_interval must be 0 or between {}s and {}s, got {:?}",
				MIN_SEND_INTERVAL.as_secs(),
				MAX_SEND_INTERVAL.as_secs(),
				self.send_interval
			)));
		}

		Ok(())
	}

	pub fn timer_enabled(&self) -> bool {
		!self.send_interval.is_zero()
	}

	pub fn threshold_enabled(&self) -> bool {
		self.send_interval_events > 0
	}
}

fn parse_var<T, F>(lookup: &F, var: &str) -> Result<Option<T>>
where
	T: FromStr,
	F: Fn(&str) -> Option<String>,
{
	match lookup(var) {
		None => Ok(None),
		Some(raw) => raw
			.trim()
			.parse::<T>()
			.map(Some)
			.map_err(|_| TallyError::ConfigValidation(format!("{var} has invalid value '{raw}'"))),
	}
}

/// Loads the write key using the `VAR` / `VAR_FILE` convention.
///
/// `TALLY_WRITE_KEY_FILE` wins over `TALLY_WRITE_KEY`. One trailing newline
/// is stripped from file contents.
pub fn load_write_key_from<F>(lookup: F) -> Result<Option<WriteKey>>
where
	F: Fn(&str) -> Option<String>,
{
	let file_var = format!("{ENV_WRITE_KEY}_FILE");

	if let Some(path) = lookup(&file_var) {
		if path.is_empty() {
			return Err(TallyError::ConfigValidation(format!("{file_var} is empty")));
		}

		let path = PathBuf::from(path);
		let content = std::fs::read_to_string(&path).map_err(|e| {
			TallyError::ConfigValidation(format!(
				"failed to read write key file at {}: {e}",
				path.display()
			))
		})?;
		let key = content.strip_suffix('\n').unwrap_or(&content);
		return Ok(Some(WriteKey::new(key)));
	}

	Ok(lookup(ENV_WRITE_KEY).map(WriteKey::new))
}

/// Configuration for the client as a whole.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Timeout for HTTP requests.
	pub request_timeout: Duration,
	/// Local queue configuration.
	pub queue: QueueConfig,
	/// Retry configuration for transport failures.
	pub retry_config: RetryConfig,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			request_timeout: Duration::from_secs(10),
			queue: QueueConfig::default(),
			retry_config: RetryConfig::default(),
		}
	}
}
