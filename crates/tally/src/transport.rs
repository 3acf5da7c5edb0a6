// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request execution against the analytics service.
//!
//! The batch sender only sees the [`Transport`] trait. Non-2xx statuses come
//! back as a normal [`TransportResponse`]; [`TransportError`] is reserved for
//! requests that never got an answer, so callers can tell the two apart.

use std::time::Duration;

use reqwest::{Client, Method};
use tally_core::WriteKey;
use tally_http::{RetryConfig, RetryableError};
use thiserror::Error;
use tracing::debug;

use crate::error::{Result, TallyError};

/// Failure to obtain any HTTP response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
	#[error("request timed out")]
	Timeout,

	#[error("connection failed: {0}")]
	Connect(String),

	#[error("request failed: {0}")]
	Request(String),
}

impl RetryableError for TransportError {
	fn is_retryable(&self) -> bool {
		matches!(self, TransportError::Timeout | TransportError::Connect(_))
	}
}

impl From<reqwest::Error> for TransportError {
	fn from(err: reqwest::Error) -> Self {
		if err.is_timeout() {
			TransportError::Timeout
		} else if err.is_connect() {
			TransportError::Connect(err.to_string())
		} else {
			TransportError::Request(err.to_string())
		}
	}
}

/// One request to the service.
#[derive(Debug, Clone)]
pub struct TransportRequest {
	pub method: Method,
	pub path: String,
	pub auth_key: WriteKey,
	pub body: Option<String>,
	pub query: Vec<(String, String)>,
}

impl TransportRequest {
	pub fn post_json(path: impl Into<String>, auth_key: WriteKey, body: String) -> Self {
		Self {
			method: Method::POST,
			path: path.into(),
			auth_key,
			body: Some(body),
			query: Vec::new(),
		}
	}

	pub fn get(path: impl Into<String>, auth_key: WriteKey) -> Self {
		Self {
			method: Method::GET,
			path: path.into(),
			auth_key,
			body: None,
			query: Vec::new(),
		}
	}

	pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));
		self
	}
}

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
	pub status: u16,
	pub body: String,
}

impl TransportResponse {
	pub fn new(status: u16, body: impl Into<String>) -> Self {
		Self {
			status,
			body: body.into(),
		}
	}

	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Converts a non-2xx response into [`TallyError::Http`].
	pub fn error_for_status(self) -> Result<Self> {
		if self.is_success() {
			Ok(self)
		} else {
			Err(TallyError::Http {
				status: self.status,
				body: self.body,
			})
		}
	}
}

/// Executes requests for the SDK.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
	async fn send(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by `reqwest`.
pub struct HttpTransport {
	http_client: Client,
	base_url: String,
	retry_config: RetryConfig,
}

impl HttpTransport {
	/// Creates a transport for `base_url` (trailing slashes are dropped).
	pub fn new(base_url: &str, request_timeout: Duration, retry_config: RetryConfig) -> Result<Self> {
		let http_client = tally_http::builder()
			.timeout(request_timeout)
			.build()
			.map_err(|e| TallyError::Transport(e.into()))?;

		Ok(Self::with_client(http_client, base_url, retry_config))
	}

	pub fn with_client(http_client: Client, base_url: &str, retry_config: RetryConfig) -> Self {
		Self {
			http_client,
			base_url: base_url.trim_end_matches('/').to_string(),
			retry_config,
		}
	}

	pub fn base_url(&self) -> &str {
		&self.base_url
	}

	fn url_for(&self, path: &str) -> String {
		format!("{}/{}", self.base_url, path.trim_start_matches('/'))
	}
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
	async fn send(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
		let url = self.url_for(&request.path);
		debug!(method = %request.method, url = %url, "Sending request");

		let response = tally_http::retry(&self.retry_config, || async {
			let mut builder = self
				.http_client
				.request(request.method.clone(), &url)
				.header(reqwest::header::AUTHORIZATION, request.auth_key.expose());

			if !request.query.is_empty() {
				builder = builder.query(&request.query);
			}

			if let Some(body) = &request.body {
				builder = builder
					.header(reqwest::header::CONTENT_TYPE, "application/json")
					.body(body.clone());
			}

			builder.send().await
		})
		.await?;

		let status = response.status().as_u16();
		let body = response.text().await?;
		Ok(TransportResponse { status, body })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn response_success_is_any_2xx() {
		assert!(TransportResponse::new(200, "").is_success());
		assert!(TransportResponse::new(201, "").is_success());
		assert!(TransportResponse::new(204, "").is_success());
		assert!(!TransportResponse::new(199, "").is_success());
		assert!(!TransportResponse::new(302, "").is_success());
		assert!(!TransportResponse::new(500, "").is_success());
	}

	#[test]
	fn error_for_status_keeps_body() {
		let err = TransportResponse::new(503, "try later").error_for_status().unwrap_err();
		assert!(matches!(err, TallyError::Http { status: 503, ref body } if body == "try later"));
	}

	#[test]
	fn timeouts_and_connect_failures_are_retryable() {
		assert!(TransportError::Timeout.is_retryable());
		assert!(TransportError::Connect("refused".into()).is_retryable());
		assert!(!TransportError::Request("builder".into()).is_retryable());
	}

	#[test]
	fn url_joins_without_double_slash() {
		let transport =
			HttpTransport::new("https://api.example.com/", Duration::from_secs(1), RetryConfig::no_retry())
				.unwrap();
		assert_eq!(transport.base_url(), "https://api.example.com");
		assert_eq!(
			transport.url_for("/3.0/projects/p/events"),
			"https://api.example.com/3.0/projects/p/events"
		);
		assert_eq!(
			transport.url_for("3.0/projects/p/events"),
			"https://api.example.com/3.0/projects/p/events"
		);
	}

	#[test]
	fn request_builders_set_method_and_body() {
		let post = TransportRequest::post_json("/events", WriteKey::new("wk"), "{}".to_string());
		assert_eq!(post.method, Method::POST);
		assert_eq!(post.body.as_deref(), Some("{}"));

		let get = TransportRequest::get("/events", WriteKey::new("wk")).with_query("timeframe", "this_7_days");
		assert_eq!(get.method, Method::GET);
		assert!(get.body.is_none());
		assert_eq!(get.query, vec![("timeframe".to_string(), "this_7_days".to_string())]);
	}
}
