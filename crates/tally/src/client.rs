// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tally client for queuing and writing events.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Url;
use serde_json::Value;
use tally_core::{
	validate_collection_name, validate_event_body, validate_project_id, BatchInsertResult, CoreError,
	EventHandle, WriteKey,
};
use tally_http::RetryConfig;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::batch::{events_path, BatchSender, FlushObserver, FlushReport};
use crate::config::{load_write_key_from, ClientConfig, QueueConfig, ENV_BASE_URL, ENV_PROJECT_ID};
use crate::error::{Result, TallyError};
use crate::properties::stamp_timestamp;
use crate::scheduler::{Scheduler, SchedulerState, ShutdownReport};
use crate::store::EventStore;
use crate::transport::{HttpTransport, Transport, TransportRequest};

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.tally.io";

/// Builder for constructing a [`TallyClient`].
pub struct TallyClientBuilder {
	project_id: Option<String>,
	write_key: Option<WriteKey>,
	base_url: Option<String>,
	config: ClientConfig,
	transport: Option<Arc<dyn Transport>>,
	observer: Option<Arc<dyn FlushObserver>>,
}

impl TallyClientBuilder {
	pub fn new() -> Self {
		Self {
			project_id: None,
			write_key: None,
			base_url: None,
			config: ClientConfig::default(),
			transport: None,
			observer: None,
		}
	}

	pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
		self.project_id = Some(project_id.into());
		self
	}

	pub fn write_key(mut self, key: impl Into<WriteKey>) -> Self {
		self.write_key = Some(key.into());
		self
	}

	/// Sets the service base URL. Defaults to [`DEFAULT_BASE_URL`].
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = Some(url.into());
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = timeout;
		self
	}

	/// Maximum events per write call.
	pub fn batch_size(mut self, size: usize) -> Self {
		self.config.queue.batch_size = size;
		self
	}

	/// Queue size that triggers an inline flush from `queue_event`.
	pub fn send_interval_events(mut self, events: usize) -> Self {
		self.config.queue.send_interval_events = events;
		self
	}

	/// Period of the background flush timer.
	pub fn send_interval(mut self, interval: Duration) -> Self {
		self.config.queue.send_interval = interval;
		self
	}

	pub fn max_events_per_collection(mut self, max: usize) -> Self {
		self.config.queue.max_events_per_collection = max;
		self
	}

	/// How long shutdown waits for flushes already in progress.
	pub fn shutdown_delay(mut self, delay: Duration) -> Self {
		self.config.queue.shutdown_delay = delay;
		self
	}

	/// Skips the interval and threshold range checks.
	pub fn test_mode(mut self, enabled: bool) -> Self {
		self.config.queue.test_mode = enabled;
		self
	}

	pub fn queue_config(mut self, config: QueueConfig) -> Self {
		self.config.queue = config;
		self
	}

	pub fn retry_config(mut self, config: RetryConfig) -> Self {
		self.config.retry_config = config;
		self
	}

	/// Replaces the HTTP transport. The base URL is ignored when set.
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Registers a hook that receives every flush report.
	pub fn observer(mut self, observer: Arc<dyn FlushObserver>) -> Self {
		self.observer = Some(observer);
		self
	}

	/// Applies `TALLY_*` environment variables on top of the current settings.
	pub fn from_env(self) -> Result<Self> {
		self.from_env_with(|var| std::env::var(var).ok())
	}

	/// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
	pub fn from_env_with<F>(mut self, lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(project_id) = lookup(ENV_PROJECT_ID) {
			self.project_id = Some(project_id);
		}
		if let Some(key) = load_write_key_from(&lookup)? {
			self.write_key = Some(key);
		}
		if let Some(base_url) = lookup(ENV_BASE_URL) {
			self.base_url = Some(base_url);
		}
		self.config.queue = self.config.queue.apply_env_from(&lookup)?;
		Ok(self)
	}

	/// Validates the configuration and builds the client.
	///
	/// Starts the flush timer when `send_interval` is non-zero, which requires
	/// a running tokio runtime.
	pub fn build(self) -> Result<TallyClient> {
		let project_id = self.project_id.ok_or(TallyError::MissingProjectId)?;
		if !validate_project_id(&project_id) {
			return Err(CoreError::InvalidProjectId(project_id).into());
		}

		let write_key = self
			.write_key
			.filter(|key| !key.is_empty())
			.ok_or(TallyError::InvalidWriteKey)?;

		self.config.queue.validate()?;

		let transport: Arc<dyn Transport> = match self.transport {
			Some(transport) => transport,
			None => {
				let base_url = self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
				validate_base_url(base_url)?;
				Arc::new(HttpTransport::new(
					base_url,
					self.config.request_timeout,
					self.config.retry_config.clone(),
				)?)
			}
		};

		let queue = &self.config.queue;
		let store = Arc::new(EventStore::new(queue.max_events_per_collection));
		let mut sender = BatchSender::new(
			Arc::clone(&store),
			Arc::clone(&transport),
			write_key.clone(),
			queue.batch_size,
		);
		if let Some(observer) = self.observer {
			sender = sender.with_observer(observer);
		}

		let sender = Arc::new(sender);
		let scheduler = Scheduler::new(Arc::clone(&sender), queue);
		scheduler.start();

		info!(
			project_id = %project_id,
			batch_size = queue.batch_size,
			send_interval_secs = queue.send_interval.as_secs(),
			send_interval_events = queue.send_interval_events,
			"Tally client initialized"
		);

		Ok(TallyClient {
			project_id,
			write_key,
			store,
			sender,
			scheduler,
			transport,
			config: self.config,
			closed: AtomicBool::new(false),
			gate: RwLock::new(()),
		})
	}
}

impl Default for TallyClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn validate_base_url(base_url: &str) -> Result<()> {
	let url = Url::parse(base_url).map_err(|_| TallyError::InvalidBaseUrl)?;
	if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
		return Err(TallyError::InvalidBaseUrl);
	}
	Ok(())
}

fn check_collection(collection: &str) -> Result<()> {
	if !validate_collection_name(collection) {
		return Err(CoreError::InvalidCollectionName(collection.to_string()).into());
	}
	Ok(())
}

/// Client for one Tally project.
///
/// Events passed to [`queue_event`](Self::queue_event) are buffered and sent
/// in batches by the timer, the queue-size trigger, [`flush`](Self::flush)
/// or [`shutdown`](Self::shutdown). [`add_event`](Self::add_event) and
/// [`add_events`](Self::add_events) write immediately.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use tally::{Properties, TallyClient};
///
/// let client = TallyClient::builder()
///     .project_id("my-project")
///     .write_key("wk_xxx")
///     .send_interval(Duration::from_secs(60))
///     .build()?;
///
/// client.queue_event("purchases", Properties::new().insert("price", 10)).await?;
///
/// client.shutdown().await?;
/// ```
pub struct TallyClient {
	project_id: String,
	write_key: WriteKey,
	store: Arc<EventStore>,
	sender: Arc<BatchSender>,
	scheduler: Scheduler,
	transport: Arc<dyn Transport>,
	config: ClientConfig,
	closed: AtomicBool,
	/// Held shared while an event is stored and exclusively while the client
	/// closes, so no event lands in the queue after the final drain starts.
	gate: RwLock<()>,
}

impl TallyClient {
	pub fn builder() -> TallyClientBuilder {
		TallyClientBuilder::new()
	}

	pub fn project_id(&self) -> &str {
		&self.project_id
	}

	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Buffers one event for batched delivery.
	///
	/// Adds `tally.timestamp` when the body has none, so the event keeps the
	/// time it was queued rather than the time it was sent. May flush inline
	/// when the queue reaches `send_interval_events`.
	pub async fn queue_event(&self, collection: &str, event: impl Into<Value>) -> Result<EventHandle> {
		self.check_closed()?;
		check_collection(collection)?;

		let body = stamp_timestamp(event.into(), Utc::now());
		let serialized = validate_event_body(&body)?;

		let handle = {
			let _open = self.gate.read().await;
			self.check_closed()?;
			self.store.store(&self.project_id, collection, serialized).await?
		};
		debug!(collection, %handle, queued = self.store.size(), "Event queued");

		self.scheduler.on_enqueue().await;
		Ok(handle)
	}

	/// Writes one event immediately, bypassing the queue.
	pub async fn add_event(&self, collection: &str, event: impl Into<Value>) -> Result<()> {
		self.check_closed()?;
		check_collection(collection)?;

		let body = validate_event_body(&event.into())?;
		let path = format!(
			"{}/{}",
			events_path(&self.project_id),
			urlencoding::encode(collection)
		);

		let request = TransportRequest::post_json(path, self.write_key.clone(), body);
		self.transport.send(request).await?.error_for_status()?;
		Ok(())
	}

	/// Writes events for several collections in one call, bypassing the queue.
	///
	/// Returns the per-event outcome reported by the service.
	pub async fn add_events(&self, events: BTreeMap<String, Vec<Value>>) -> Result<BatchInsertResult> {
		self.check_closed()?;

		for (collection, bodies) in &events {
			check_collection(collection)?;
			for body in bodies {
				validate_event_body(body)?;
			}
		}

		let body = serde_json::to_string(&events)?;
		let request = TransportRequest::post_json(events_path(&self.project_id), self.write_key.clone(), body);
		let response = self.transport.send(request).await?.error_for_status()?;

		BatchInsertResult::parse(&response.body).map_err(|e| TallyError::Serialization(e.to_string()))
	}

	/// Sends everything currently queued.
	pub async fn flush(&self) -> FlushReport {
		self.sender.flush().await
	}

	/// Number of queued events.
	pub fn queue_len(&self) -> usize {
		self.store.size()
	}

	pub fn scheduler_state(&self) -> SchedulerState {
		self.scheduler.state()
	}

	/// Stops the timer and drains the queue.
	///
	/// The first call returns the drain report; later calls return `None`.
	/// Afterwards queuing and writing fail with [`TallyError::ClientShutdown`].
	pub async fn shutdown(&self) -> Result<Option<ShutdownReport>> {
		{
			let _closing = self.gate.write().await;
			if self.closed.swap(true, Ordering::SeqCst) {
				return Ok(None);
			}
		}

		info!(queued = self.store.size(), "Shutting down Tally client");
		let report = self.scheduler.shutdown().await;

		info!(remaining = self.store.size(), "Tally client shutdown complete");
		Ok(report)
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	fn check_closed(&self) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(TallyError::ClientShutdown);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{ScriptedTransport, Step};
	use crate::Properties;
	use serde_json::json;
	use std::collections::HashMap;

	fn builder_with(transport: &Arc<ScriptedTransport>) -> TallyClientBuilder {
		TallyClient::builder()
			.project_id("p1")
			.write_key("wk_test")
			.transport(transport.clone() as Arc<dyn Transport>)
	}

	#[test]
	fn build_requires_project_id() {
		let result = TallyClient::builder().write_key("wk_test").build();
		assert!(matches!(result, Err(TallyError::MissingProjectId)));
	}

	#[test]
	fn build_rejects_malformed_project_id() {
		let result = TallyClient::builder()
			.project_id("has spaces")
			.write_key("wk_test")
			.build();
		assert!(matches!(
			result,
			Err(TallyError::Validation(CoreError::InvalidProjectId(_)))
		));
	}

	#[test]
	fn build_requires_non_blank_write_key() {
		let missing = TallyClient::builder().project_id("p1").build();
		assert!(matches!(missing, Err(TallyError::InvalidWriteKey)));

		let blank = TallyClient::builder().project_id("p1").write_key("   ").build();
		assert!(matches!(blank, Err(TallyError::InvalidWriteKey)));
	}

	#[test]
	fn build_rejects_bad_base_url() {
		for url in ["not a url", "ftp://example.com", "file:///tmp/x"] {
			let result = TallyClient::builder()
				.project_id("p1")
				.write_key("wk_test")
				.base_url(url)
				.build();
			assert!(matches!(result, Err(TallyError::InvalidBaseUrl)), "{url} should be rejected");
		}
	}

	#[test]
	fn build_accepts_default_base_url() {
		let client = TallyClient::builder()
			.project_id("p1")
			.write_key("wk_test")
			.build()
			.unwrap();
		assert_eq!(client.project_id(), "p1");
		assert_eq!(client.scheduler_state(), SchedulerState::Stopped);
	}

	#[test]
	fn custom_transport_skips_base_url_check() {
		let transport = Arc::new(ScriptedTransport::ok());
		let client = builder_with(&transport).base_url("not a url").build();
		assert!(client.is_ok());
	}

	#[test]
	fn out_of_range_threshold_fails_outside_test_mode() {
		let transport = Arc::new(ScriptedTransport::ok());
		let result = builder_with(&transport).send_interval_events(5).build();
		assert!(matches!(result, Err(TallyError::ConfigValidation(_))));

		let result = builder_with(&transport)
			.send_interval_events(5)
			.test_mode(true)
			.build();
		assert!(result.is_ok());
	}

	#[test]
	fn from_env_reads_identity_and_queue_settings() {
		let vars: HashMap<&str, &str> = HashMap::from([
			("TALLY_PROJECT_ID", "env-project"),
			("TALLY_WRITE_KEY", "wk_env"),
			("TALLY_BASE_URL", "http://localhost:9999"),
			("TALLY_BATCH_SIZE", "25"),
			("TALLY_ENV", "test"),
			("TALLY_SEND_INTERVAL_EVENTS", "3"),
		]);

		let client = TallyClient::builder()
			.from_env_with(|var| vars.get(var).map(|v| v.to_string()))
			.unwrap()
			.build()
			.unwrap();

		assert_eq!(client.project_id(), "env-project");
		assert_eq!(client.config().queue.batch_size, 25);
		assert_eq!(client.config().queue.send_interval_events, 3);
		assert!(client.config().queue.test_mode);
	}

	#[tokio::test]
	async fn queue_event_stamps_and_buffers() {
		let transport = Arc::new(ScriptedTransport::ok());
		let client = builder_with(&transport).build().unwrap();

		let first = client
			.queue_event("purchases", Properties::new().insert("price", 10))
			.await
			.unwrap();
		let second = client
			.queue_event("purchases", json!({"price": 20, "tally": {"timestamp": "2024-01-01T00:00:00.000Z"}}))
			.await
			.unwrap();

		assert!(second > first);
		assert_eq!(client.queue_len(), 2);
		assert_eq!(transport.calls(), 0);

		let report = client.flush().await;
		assert_eq!(report.removed(), 2);

		let body = &transport.bodies()[0]["purchases"];
		assert!(body[0]["tally"]["timestamp"].is_string());
		assert_eq!(body[1]["tally"]["timestamp"], "2024-01-01T00:00:00.000Z");
	}

	#[tokio::test]
	async fn queue_event_rejects_invalid_input() {
		let transport = Arc::new(ScriptedTransport::ok());
		let client = builder_with(&transport).build().unwrap();

		let bad_name = client.queue_event("$system", json!({})).await;
		assert!(matches!(
			bad_name,
			Err(TallyError::Validation(CoreError::InvalidCollectionName(_)))
		));

		let bad_body = client.queue_event("logs", json!([1, 2, 3])).await;
		assert!(matches!(
			bad_body,
			Err(TallyError::Validation(CoreError::InvalidEventBody(_)))
		));
		assert_eq!(client.queue_len(), 0);
	}

	#[tokio::test]
	async fn fifth_event_flushes_before_returning() {
		let transport = Arc::new(ScriptedTransport::ok());
		let client = builder_with(&transport)
			.send_interval_events(5)
			.test_mode(true)
			.build()
			.unwrap();

		for i in 0..4 {
			client.queue_event("logs", json!({ "n": i })).await.unwrap();
		}
		assert_eq!(transport.calls(), 0);
		assert_eq!(client.queue_len(), 4);

		client.queue_event("logs", json!({ "n": 4 })).await.unwrap();
		assert_eq!(transport.calls(), 1);
		assert_eq!(client.queue_len(), 0);
	}

	#[tokio::test]
	async fn full_collection_surfaces_capacity_error() {
		let transport = Arc::new(ScriptedTransport::ok());
		let client = builder_with(&transport)
			.max_events_per_collection(2)
			.build()
			.unwrap();

		client.queue_event("logs", json!({})).await.unwrap();
		client.queue_event("logs", json!({})).await.unwrap();
		let third = client.queue_event("logs", json!({})).await;

		assert!(matches!(third, Err(TallyError::CapacityExceeded { limit: 2, .. })));
		client.queue_event("clicks", json!({})).await.unwrap();
		assert_eq!(client.queue_len(), 3);
	}

	#[tokio::test]
	async fn add_event_writes_single_event_path() {
		let transport = Arc::new(ScriptedTransport::scripted(vec![Step::status(201, r#"{"created":true}"#)]));
		let client = builder_with(&transport).build().unwrap();

		client.add_event("page views", json!({"path": "/"})).await.unwrap();

		let request = &transport.requests()[0];
		assert_eq!(request.path, "/3.0/projects/p1/events/page%20views");
		assert_eq!(request.body.as_deref(), Some(r#"{"path":"/"}"#));
		assert_eq!(client.queue_len(), 0);
	}

	#[tokio::test]
	async fn add_event_surfaces_http_errors() {
		let transport = Arc::new(ScriptedTransport::scripted(vec![Step::status(401, "bad key")]));
		let client = builder_with(&transport).build().unwrap();

		let result = client.add_event("logs", json!({})).await;
		assert!(matches!(result, Err(TallyError::Http { status: 401, .. })));
	}

	#[tokio::test]
	async fn add_events_posts_all_collections() {
		let transport = Arc::new(ScriptedTransport::scripted(vec![Step::status(
			200,
			r#"{"logs":[{"success":true}],"clicks":[{"success":true},{"success":true}]}"#,
		)]));
		let client = builder_with(&transport).build().unwrap();

		let events = BTreeMap::from([
			("logs".to_string(), vec![json!({"n": 1})]),
			("clicks".to_string(), vec![json!({"x": 1}), json!({"x": 2})]),
		]);
		let result = client.add_events(events).await.unwrap();

		assert_eq!(result.rejected(), 0);
		let request = &transport.requests()[0];
		assert_eq!(request.path, "/3.0/projects/p1/events");
		assert_eq!(
			transport.bodies()[0],
			json!({"clicks": [{"x": 1}, {"x": 2}], "logs": [{"n": 1}]})
		);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn enqueue_racing_shutdown_is_either_sent_or_refused() {
		let transport = Arc::new(ScriptedTransport::ok());
		let client = Arc::new(
			builder_with(&transport)
				.max_events_per_collection(100_000)
				.build()
				.unwrap(),
		);

		let producers: Vec<_> = (0..4)
			.map(|producer| {
				let client = Arc::clone(&client);
				tokio::spawn(async move {
					let mut accepted = 0usize;
					for i in 0..5_000 {
						let event = json!({ "name": format!("p{producer}-{i}") });
						match client.queue_event("logs", event).await {
							Ok(_) => accepted += 1,
							Err(TallyError::ClientShutdown) => break,
							Err(e) => panic!("unexpected error: {e}"),
						}
						if i % 8 == 0 {
							tokio::task::yield_now().await;
						}
					}
					accepted
				})
			})
			.collect();

		tokio::time::sleep(Duration::from_millis(2)).await;
		client.shutdown().await.unwrap();

		let mut accepted = 0;
		for producer in producers {
			accepted += producer.await.unwrap();
		}

		assert_eq!(client.queue_len(), 0, "no event stored after the final drain");
		assert_eq!(transport.shipped_names("logs").len(), accepted);
	}

	#[tokio::test(start_paused = true)]
	async fn shutdown_drains_events_held_by_a_failing_caller_flush() {
		let transport = Arc::new(ScriptedTransport::scripted(vec![Step::Delayed(
			Duration::from_secs(5),
			Ok(crate::transport::TransportResponse::new(500, "boom")),
		)]));
		let client = Arc::new(builder_with(&transport).build().unwrap());
		client.queue_event("logs", json!({"n": 1})).await.unwrap();

		let caller = {
			let client = Arc::clone(&client);
			tokio::spawn(async move { client.flush().await })
		};
		tokio::time::sleep(Duration::from_millis(10)).await;

		let report = client.shutdown().await.unwrap().unwrap();

		assert!(!report.timed_out);
		assert_eq!(report.final_flush.removed(), 1);
		assert_eq!(client.queue_len(), 0);
		assert_eq!(caller.await.unwrap().failed(), 1);
		assert_eq!(transport.calls(), 2);
	}

	#[tokio::test]
	async fn shutdown_drains_once_then_refuses_work() {
		let transport = Arc::new(ScriptedTransport::ok());
		let client = builder_with(&transport)
			.send_interval(Duration::from_secs(60))
			.build()
			.unwrap();
		assert_eq!(client.scheduler_state(), SchedulerState::Running);

		client.queue_event("logs", json!({"n": 1})).await.unwrap();
		client.queue_event("logs", json!({"n": 2})).await.unwrap();

		let report = client.shutdown().await.unwrap().expect("first shutdown reports");
		assert!(!report.timed_out);
		assert_eq!(report.final_flush.removed(), 2);
		assert_eq!(client.queue_len(), 0);
		assert!(client.is_closed());
		assert_eq!(client.scheduler_state(), SchedulerState::Stopped);

		assert!(client.shutdown().await.unwrap().is_none());
		assert!(matches!(
			client.queue_event("logs", json!({})).await,
			Err(TallyError::ClientShutdown)
		));
		assert!(matches!(
			client.add_event("logs", json!({})).await,
			Err(TallyError::ClientShutdown)
		));
	}
}
