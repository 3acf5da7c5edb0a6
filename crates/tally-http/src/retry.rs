// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Exponential backoff for transport-level failures.
//!
//! Only failures where no response was received are retried here. Once the
//! service has answered with a status code the caller owns the decision.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	pub jitter: bool,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_millis(200),
			max_delay: Duration::from_secs(5),
			backoff_factor: 2.0,
			jitter: true,
		}
	}
}

impl RetryConfig {
	/// A config that performs exactly one attempt.
	pub fn no_retry() -> Self {
		Self {
			max_attempts: 1,
			..Self::default()
		}
	}
}

pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

impl RetryableError for reqwest::Error {
	fn is_retryable(&self) -> bool {
		self.is_timeout() || self.is_connect()
	}
}

fn backoff_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
	let exponential = cfg.base_delay.as_secs_f64() * cfg.backoff_factor.powi(attempt as i32);
	let capped = exponential.min(cfg.max_delay.as_secs_f64());

	let delay = if cfg.jitter {
		capped * (0.5 + fastrand::f64())
	} else {
		capped
	};

	Duration::from_secs_f64(delay)
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is reached.
pub async fn retry<F, Fut, T, E>(cfg: &RetryConfig, mut op: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
	E: RetryableError + std::fmt::Debug,
{
	let max_attempts = cfg.max_attempts.max(1);
	let mut attempt = 0;

	loop {
		let err = match op().await {
			Ok(value) => return Ok(value),
			Err(err) => err,
		};
		attempt += 1;

		if !err.is_retryable() {
			return Err(err);
		}

		if attempt >= max_attempts {
			warn!(error = ?err, attempt, max_attempts, "retry attempts exhausted");
			return Err(err);
		}

		let delay = backoff_delay(cfg, attempt - 1);
		warn!(
			error = ?err,
			attempt,
			max_attempts,
			delay_ms = delay.as_millis() as u64,
			"retrying after transport error"
		);
		tokio::time::sleep(delay).await;
	}
}
