// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! HTTP client construction with the SDK User-Agent.

use reqwest::ClientBuilder;

/// SDK name reported to the service.
pub const SDK_NAME: &str = "tally-rust";
/// SDK version reported to the service.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Creates an HTTP client builder carrying the SDK User-Agent.
///
/// # Example
/// ```ignore
/// let client = tally_http::builder()
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder {
	reqwest::Client::builder().user_agent(user_agent())
}

/// Returns the SDK User-Agent string.
///
/// Format: `tally-rust/{version} ({os}-{arch})`
pub fn user_agent() -> String {
	format!(
		"{SDK_NAME}/{SDK_VERSION} ({}-{})",
		std::env::consts::OS,
		std::env::consts::ARCH
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn user_agent_names_sdk_and_platform() {
		let ua = user_agent();
		assert!(ua.starts_with("tally-rust/"));
		assert!(ua.contains(SDK_VERSION));
		assert!(ua.contains(std::env::consts::OS));
	}

	#[test]
	fn builder_produces_client() {
		assert!(builder().build().is_ok());
	}
}
