// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flush scheduling: the periodic timer, the queue-size trigger and
//! graceful shutdown.
//!
//! Lifecycle is `Stopped -> Running -> Draining -> Stopped`. Shutdown stops
//! the timer before draining so no tick can start once the final flush has
//! begun.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchSender, FlushReport};
use crate::config::QueueConfig;

/// Lifecycle state of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
	Stopped,
	Running,
	Draining,
}

/// What shutdown did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
	/// A flush running at shutdown outlived the grace period.
	pub timed_out: bool,
	/// Result of the draining flush.
	pub final_flush: FlushReport,
}

/// Drives [`BatchSender::flush`] from a timer and from the enqueue path.
pub struct Scheduler {
	sender: Arc<BatchSender>,
	interval: Duration,
	threshold: usize,
	shutdown_delay: Duration,
	cancellation_token: CancellationToken,
	timer: Mutex<Option<JoinHandle<()>>>,
	state: Mutex<SchedulerState>,
	closed: AtomicBool,
}

impl Scheduler {
	/// Creates a stopped scheduler using the interval, threshold and grace
	/// period from `config`.
	pub fn new(sender: Arc<BatchSender>, config: &QueueConfig) -> Self {
		Self {
			sender,
			interval: config.send_interval,
			threshold: config.send_interval_events,
			shutdown_delay: config.shutdown_delay,
			cancellation_token: CancellationToken::new(),
			timer: Mutex::new(None),
			state: Mutex::new(SchedulerState::Stopped),
			closed: AtomicBool::new(false),
		}
	}

	/// Starts the periodic timer. Does nothing when the interval is zero, the
	/// timer is already running or the scheduler was shut down.
	///
	/// Must be called from within a tokio runtime.
	pub fn start(&self) {
		if self.interval.is_zero() || self.closed.load(Ordering::SeqCst) {
			return;
		}

		let mut timer = self.lock_timer();
		if timer.is_some() {
			return;
		}

		let sender = Arc::clone(&self.sender);
		let token = self.cancellation_token.clone();
		let interval = self.interval;

		*timer = Some(tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			// The first tick completes immediately.
			ticker.tick().await;

			loop {
				tokio::select! {
					biased;
					_ = token.cancelled() => {
						debug!("Flush timer cancelled");
						break;
					}
					_ = ticker.tick() => {
						run_tick(&sender).await;
					}
				}
			}
		}));

		self.set_state(SchedulerState::Running);
		info!(interval_secs = interval.as_secs(), "Flush timer started");
	}

	/// Flushes inline when the queue has reached the configured size.
	///
	/// Runs on the caller's task, so the caller waits for the network.
	pub async fn on_enqueue(&self) -> Option<FlushReport> {
		if self.threshold == 0 || self.closed.load(Ordering::SeqCst) {
			return None;
		}

		let queued = self.sender.store().size();
		if queued < self.threshold {
			return None;
		}

		debug!(queued, threshold = self.threshold, "Queue threshold reached, flushing");
		Some(self.sender.flush().await)
	}

	/// Stops the timer, waits up to the grace period for flushes already
	/// running (timer ticks and caller flushes alike), then drains the queue
	/// once more.
	///
	/// A timer tick still running at the deadline is aborted. A caller's
	/// flush cannot be aborted from here; its events stay claimed by it and
	/// are left out of the final flush.
	///
	/// Only the first call does anything; later calls return `None`.
	pub async fn shutdown(&self) -> Option<ShutdownReport> {
		if self.closed.swap(true, Ordering::SeqCst) {
			return None;
		}

		self.set_state(SchedulerState::Draining);
		self.cancellation_token.cancel();

		let deadline = Instant::now() + self.shutdown_delay;
		let timer = self.lock_timer().take();
		let mut timed_out = false;

		if let Some(mut handle) = timer {
			match tokio::time::timeout_at(deadline, &mut handle).await {
				Ok(Ok(())) => {}
				Ok(Err(e)) => warn!(error = %e, "Flush timer task ended abnormally"),
				Err(_) => {
					timed_out = true;
					warn!(
						grace_secs = self.shutdown_delay.as_secs(),
						"In-flight flush did not finish within grace period, aborting it"
					);
					handle.abort();
					// Wait for the task to be dropped so its claims are released.
					let _ = handle.await;
				}
			}
		}

		if tokio::time::timeout_at(deadline, self.sender.wait_for_flushes())
			.await
			.is_err()
		{
			timed_out = true;
			warn!(
				grace_secs = self.shutdown_delay.as_secs(),
				running = self.sender.flushes_in_flight(),
				"Flushes still running after grace period, draining without them"
			);
		}

		let final_flush = self.sender.flush().await;
		self.set_state(SchedulerState::Stopped);

		info!(
			timed_out,
			sent = final_flush.sent(),
			remaining = self.sender.store().size(),
			"Scheduler stopped"
		);

		Some(ShutdownReport {
			timed_out,
			final_flush,
		})
	}

	pub fn state(&self) -> SchedulerState {
		*self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	fn set_state(&self, state: SchedulerState) {
		*self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
	}

	fn lock_timer(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
		self.timer.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

impl Drop for Scheduler {
	fn drop(&mut self) {
		self.cancellation_token.cancel();
	}
}

async fn run_tick(sender: &BatchSender) {
	match AssertUnwindSafe(sender.flush()).catch_unwind().await {
		Ok(report) => {
			if report.failed() > 0 {
				debug!(failed = report.failed(), "Timer flush left batches queued");
			}
		}
		Err(panic) => {
			error!(panic = %panic_message(panic.as_ref()), "Timer flush panicked, continuing");
		}
	}
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
	if let Some(s) = panic.downcast_ref::<&'static str>() {
		*s
	} else if let Some(s) = panic.downcast_ref::<String>() {
		s.as_str()
	} else {
		"unknown panic"
	}
}
