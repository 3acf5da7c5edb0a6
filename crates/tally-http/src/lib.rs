// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for the Tally SDK.
//!
//! This crate provides:
//! - A pre-configured HTTP client builder with a stable User-Agent header
//! - Retry with exponential backoff for transport-level failures

mod client;
mod retry;

pub use client::{builder, user_agent, SDK_NAME, SDK_VERSION};
pub use retry::{retry, RetryConfig, RetryableError};
