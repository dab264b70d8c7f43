//! HTTP transport configuration

use std::time::Duration;
use url::Url;

use crate::error::{HttpError, Result};
use crate::framing::DEFAULT_MAX_PART_SIZE;

/// Configuration for [`HttpGateway`](crate::HttpGateway)
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    /// Agent base URL, e.g. `http://agent:5000/`
    pub base_url: Url,

    /// TCP connect timeout
    /// Default: 5 seconds
    pub connect_timeout: Duration,

    /// Timeout for a complete non-streaming exchange
    /// Default: 10 seconds
    pub request_timeout: Duration,

    /// Stream idle timeout, as a multiple of the requested heartbeat
    /// Default: 3
    pub stream_idle_multiplier: u32,

    /// Largest stream part accepted before the stream is failed
    /// Default: 16 MiB
    pub max_part_size: usize,

    /// Value of the `User-Agent` header
    /// Default: `mtconnect-sdk/<version>`
    pub user_agent: String,
}

impl HttpGatewayConfig {
    /// Configuration for the agent at `base_url` with default timeouts
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| HttpError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let config = Self {
            base_url,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            stream_idle_multiplier: 3,
            max_part_size: DEFAULT_MAX_PART_SIZE,
            user_agent: format!("mtconnect-sdk/{}", env!("CARGO_PKG_VERSION")),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.base_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(HttpError::InvalidUrl(format!(
                    "Unsupported scheme '{}' in {}",
                    other, self.base_url
                )))
            }
        }

        if self.base_url.cannot_be_a_base() {
            return Err(HttpError::InvalidUrl(format!(
                "{} cannot be used as a base URL",
                self.base_url
            )));
        }

        if self.connect_timeout == Duration::ZERO || self.request_timeout == Duration::ZERO {
            return Err(HttpError::Configuration(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        if self.stream_idle_multiplier == 0 {
            return Err(HttpError::Configuration(
                "Stream idle multiplier must be at least 1".to_string(),
            ));
        }

        if self.max_part_size == 0 {
            return Err(HttpError::Configuration(
                "Max part size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_stream_idle_multiplier(mut self, multiplier: u32) -> Self {
        self.stream_idle_multiplier = multiplier;
        self
    }

    pub fn with_max_part_size(mut self, max_part_size: usize) -> Self {
        self.max_part_size = max_part_size;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = HttpGatewayConfig::new("http://localhost:5000").unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.stream_idle_multiplier, 3);
        assert_eq!(config.max_part_size, 16 * 1024 * 1024);
        assert!(config.user_agent.starts_with("mtconnect-sdk/"));
    }

    #[rstest]
    #[case("ftp://agent:21")]
    #[case("mailto:agent@example.com")]
    #[case("not a url")]
    fn test_rejects_unusable_urls(#[case] url: &str) {
        assert!(matches!(HttpGatewayConfig::new(url), Err(HttpError::InvalidUrl(_))));
    }

    #[test]
    fn test_validation() {
        let config = HttpGatewayConfig::new("https://agent.example.com/mtc/")
            .unwrap()
            .with_request_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(HttpError::Configuration(_))));

        let config = HttpGatewayConfig::new("https://agent.example.com/mtc/")
            .unwrap()
            .with_stream_idle_multiplier(0);
        assert!(config.validate().is_err());

        let config = HttpGatewayConfig::new("https://agent.example.com/mtc/")
            .unwrap()
            .with_max_part_size(0);
        assert!(config.validate().is_err());
    }
}
