// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Rust SDK for Tally event analytics.
//!
//! Events are buffered in a memory-resident queue and delivered in batches:
//!
//! - [`EventStore`] holds queued events per project and collection, bounded
//!   by `max_events_per_collection`
//! - [`BatchSender`] cuts each collection into batches of `batch_size`,
//!   removes a batch only after a 2xx answer and leaves failed batches
//!   queued for the next flush
//! - [`Scheduler`] flushes on a timer, when the queue reaches
//!   `send_interval_events`, and once more on shutdown
//!
//! Delivery is at-least-once and nothing survives a restart.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tally::{Properties, TallyClient};
//!
//! #[tokio::main]
//! async fn main() -> tally::Result<()> {
//!     let client = TallyClient::builder()
//!         .project_id("my-project")
//!         .write_key("wk_xxx")
//!         .send_interval(Duration::from_secs(60))
//!         .build()?;
//!
//!     client
//!         .queue_event("signups", Properties::new().insert("plan", "pro"))
//!         .await?;
//!
//!     if let Some(report) = client.shutdown().await? {
//!         println!("drained {} events", report.final_flush.removed());
//!     }
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod properties;
pub mod scheduler;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

pub use batch::{BatchOutcome, BatchResult, BatchSender, FlushObserver, FlushReport};
pub use client::{TallyClient, TallyClientBuilder, DEFAULT_BASE_URL};
pub use config::{ClientConfig, QueueConfig};
pub use error::{Result, TallyError};
pub use properties::Properties;
pub use scheduler::{Scheduler, SchedulerState, ShutdownReport};
pub use store::{Claim, EventStore};
pub use transport::{HttpTransport, Transport, TransportError, TransportRequest, TransportResponse};

pub use tally_core::{BatchInsertResult, EventHandle, WriteKey};
pub use tally_http::RetryConfig;
