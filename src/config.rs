//! Client configuration.

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Prompt shown before cancelling a request that may lose user input.
pub const DEFAULT_CONFIRM_CANCEL_MESSAGE: &str = "This page is asking you to confirm that you want to cancel a network request - data you have entered may not be saved.";

/// Reconnection policy for server streams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per stream, the first connection included.
    /// Default: 3
    pub max_attempts: u32,

    /// Delay before the first retry; doubled after every retry.
    /// Default: 1000
    pub base_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 1000,
        }
    }
}

/// Client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub retry: RetryPolicy,

    /// Text of the interactive confirmation asked before cancelling writes.
    pub confirm_cancel_message: String,

    /// Notices listed before the rest are collapsed.
    /// Default: 2
    pub max_displayed_notices: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            confirm_cancel_message: DEFAULT_CONFIRM_CANCEL_MESSAGE.to_string(),
            max_displayed_notices: 2,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(ClientError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_backoff_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "retry.base_backoff_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
