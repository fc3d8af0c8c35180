//! Serde-backed client configuration.
//!
//! ```
//! let config = rebound::ClientConfig::from_json_str(
//!     r#"{ "base_url": "https://api.example.com", "backoff": { "max_attempts": 5 } }"#,
//! )?;
//! assert_eq!(config.backoff.max_attempts, 5);
//! # Ok::<(), rebound::Error>(())
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ReboundResult;
use crate::backoff::{BackoffPolicy, default_retryable_error_substrings};
use crate::client::ClientBuilder;
use crate::error::Error;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffConfig {
    pub max_attempts: usize,
    pub initial_delay_secs: f64,
    pub max_delay_secs: f64,
    pub multiplier: f64,
    pub jitter: bool,
    pub retryable_status_codes: Vec<u16>,
    pub retryable_error_substrings: Vec<String>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_secs: 1.0,
            max_delay_secs: 30.0,
            multiplier: 2.0,
            jitter: true,
            retryable_status_codes: vec![408, 425, 429, 500, 502, 503, 504],
            retryable_error_substrings: default_retryable_error_substrings(),
        }
    }
}

impl BackoffConfig {
    pub fn into_policy(self) -> ReboundResult<BackoffPolicy> {
        let initial_delay = seconds("initial_delay_secs", self.initial_delay_secs)?;
        let max_delay = seconds("max_delay_secs", self.max_delay_secs)?;
        if max_delay < initial_delay {
            return Err(Error::InvalidConfig {
                message: format!(
                    "max_delay_secs ({}) is below initial_delay_secs ({})",
                    self.max_delay_secs, self.initial_delay_secs
                ),
            });
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig {
                message: "max_attempts must be at least 1".to_owned(),
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::InvalidConfig {
                message: format!("multiplier must be >= 1, got {}", self.multiplier),
            });
        }
        Ok(BackoffPolicy::standard()
            .max_attempts(self.max_attempts)
            .initial_delay(initial_delay)
            .max_delay(max_delay)
            .multiplier(self.multiplier)
            .jitter(self.jitter)
            .retryable_status_codes(self.retryable_status_codes)
            .retryable_error_substrings(self.retryable_error_substrings))
    }
}

impl ClientConfig {
    pub fn from_json_str(text: &str) -> ReboundResult<Self> {
        serde_json::from_str(text).map_err(|source| Error::InvalidConfig {
            message: source.to_string(),
        })
    }

    pub fn into_builder(self) -> ReboundResult<ClientBuilder> {
        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig {
                message: "request_timeout_ms must be positive".to_owned(),
            });
        }
        let mut builder = ClientBuilder::new(self.base_url)
            .request_timeout(Duration::from_millis(self.request_timeout_ms))
            .backoff_policy(self.backoff.into_policy()?);
        if let Some(client_name) = self.client_name {
            builder = builder.client_name(client_name);
        }
        for (name, value) in &self.default_headers {
            builder = builder.try_default_header(name, value)?;
        }
        Ok(builder)
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn seconds(field: &str, value: f64) -> ReboundResult<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| Error::InvalidConfig {
        message: format!("{field} must be a finite, non-negative number of seconds, got {value}"),
    })
}
