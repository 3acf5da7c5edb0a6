// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Queues a handful of events and drains them on shutdown.
//!
//! ```sh
//! TALLY_PROJECT_ID=my-project TALLY_WRITE_KEY=wk_xxx \
//!     RUST_LOG=tally=debug cargo run -p tally --example queue
//! ```

use std::sync::Arc;
use std::time::Duration;

use tally::{FlushObserver, FlushReport, Properties, TallyClient};
use tracing_subscriber::EnvFilter;

struct PrintReport;

impl FlushObserver for PrintReport {
	fn on_flush(&self, report: &FlushReport) {
		if report.is_empty() {
			return;
		}
		match serde_json::to_string_pretty(report) {
			Ok(json) => println!("{json}"),
			Err(e) => eprintln!("failed to encode flush report: {e}"),
		}
	}
}

#[tokio::main]
async fn main() -> tally::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.init();

	let client = TallyClient::builder()
		.batch_size(10)
		.send_interval(Duration::from_secs(60))
		.observer(Arc::new(PrintReport))
		.from_env()?
		.build()?;

	for i in 0..25 {
		let event = Properties::new()
			.insert("path", format!("/page/{}", i % 3))
			.insert("sequence", i);
		client.queue_event("pageviews", event).await?;
	}

	println!("queued {} events", client.queue_len());

	if let Some(report) = client.shutdown().await? {
		println!(
			"shutdown sent {} events, {} left queued",
			report.final_flush.sent(),
			client.queue_len()
		);
	}

	Ok(())
}
