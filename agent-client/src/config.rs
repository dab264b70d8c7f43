//! Configuration types for the mtconnect-client crate
//!
//! This module defines the configuration that controls how the client talks to
//! an agent: request parameters, timeouts, reconnection delay and whether the
//! observation log is consumed by streaming or by polling.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ClientError;

/// Which request the polling loop issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollingMode {
    /// `sample` from the tracked position; nothing is skipped between polls
    #[default]
    Sample,
    /// `current` snapshots; intermediate values may be skipped
    Current,
}

/// Configuration for the AgentClient
///
/// Durations are (de)serialized as milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Minimum delay the agent waits between stream documents
    /// Default: 500 ms
    #[serde(with = "duration_ms")]
    pub interval: Duration,

    /// Delay after which an idle stream carries a heartbeat document
    /// Default: 10 seconds
    #[serde(with = "duration_ms")]
    pub heartbeat: Duration,

    /// Stream read timeout, as a multiple of the heartbeat
    /// Default: 3
    pub stream_timeout_multiplier: u32,

    /// Timeout for probe/current/sample/assets requests
    /// Default: 5 seconds
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,

    /// Delay before the supervisor probes again after a failure
    /// Default: 10 seconds
    #[serde(with = "duration_ms")]
    pub reconnection_interval: Duration,

    /// Delay between requests in polling mode
    /// Default: 1 second
    #[serde(with = "duration_ms")]
    pub polling_interval: Duration,

    /// Maximum number of observations per sample or stream document
    /// Default: 1000
    pub max_sample_count: u32,

    /// Stream the observation log instead of polling it
    /// Default: true
    pub streaming: bool,

    /// Request used by the polling loop
    /// Default: Sample
    pub polling_mode: PollingMode,

    /// Device name or uuid every request is scoped to
    /// Default: None (all devices)
    pub device_filter: Option<String>,

    /// Only this device's metadata and observations are emitted
    /// Default: None
    pub target_device_uuid: Option<String>,

    /// Number of assets fetched at start-up instead of the header's asset count
    /// Default: None
    pub initial_asset_count: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            heartbeat: Duration::from_secs(10),
            stream_timeout_multiplier: 3,
            request_timeout: Duration::from_secs(5),
            reconnection_interval: Duration::from_secs(10),
            polling_interval: Duration::from_secs(1),
            max_sample_count: 1000,
            streaming: true,
            polling_mode: PollingMode::Sample,
            device_filter: None,
            target_device_uuid: None,
            initial_asset_count: None,
        }
    }
}

impl ClientConfig {
    /// Create a new ClientConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ClientConfig that polls with `sample` requests instead of streaming
    pub fn polling() -> Self {
        Self {
            streaming: false,
            polling_mode: PollingMode::Sample,
            ..Default::default()
        }
    }

    /// Create a ClientConfig tuned for quick delivery and fast reconnects
    pub fn low_latency() -> Self {
        Self {
            interval: Duration::from_millis(100),
            heartbeat: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
            reconnection_interval: Duration::from_secs(1),
            polling_interval: Duration::from_millis(250),
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ClientError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ClientError::Configuration(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// How long a stream may stay silent before it is considered dead
    ///
    /// Saturates at `Duration::MAX`; `validate` rejects such configurations.
    pub fn stream_timeout(&self) -> Duration {
        self.heartbeat
            .checked_mul(self.stream_timeout_multiplier)
            .unwrap_or(Duration::MAX)
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), ClientError> {
        let durations = [
            ("interval", self.interval),
            ("heartbeat", self.heartbeat),
            ("request timeout", self.request_timeout),
            ("reconnection interval", self.reconnection_interval),
            ("polling interval", self.polling_interval),
        ];
        for (name, value) in durations {
            if value == Duration::ZERO {
                return Err(ClientError::Configuration(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.stream_timeout_multiplier == 0 {
            return Err(ClientError::Configuration(
                "Stream timeout multiplier must be at least 1".to_string(),
            ));
        }

        if self
            .heartbeat
            .checked_mul(self.stream_timeout_multiplier)
            .is_none()
        {
            return Err(ClientError::Configuration(
                "Heartbeat times stream timeout multiplier overflows".to_string(),
            ));
        }

        if self.max_sample_count == 0 {
            return Err(ClientError::Configuration(
                "Max sample count must be greater than 0".to_string(),
            ));
        }

        if matches!(&self.device_filter, Some(d) if d.trim().is_empty()) {
            return Err(ClientError::Configuration(
                "Device filter must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnection_interval(mut self, interval: Duration) -> Self {
        self.reconnection_interval = interval;
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_max_sample_count(mut self, count: u32) -> Self {
        self.max_sample_count = count;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_polling_mode(mut self, mode: PollingMode) -> Self {
        self.polling_mode = mode;
        self
    }

    pub fn with_device_filter(mut self, device: impl Into<String>) -> Self {
        self.device_filter = Some(device.into());
        self
    }

    pub fn with_target_device(mut self, uuid: impl Into<String>) -> Self {
        self.target_device_uuid = Some(uuid.into());
        self
    }

    pub fn with_stream_timeout_multiplier(mut self, multiplier: u32) -> Self {
        self.stream_timeout_multiplier = multiplier;
        self
    }

    pub fn with_initial_asset_count(mut self, count: u32) -> Self {
        self.initial_asset_count = Some(count);
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
