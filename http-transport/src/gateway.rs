//! reqwest-backed [`RequestGateway`]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use mtconnect_client::{
    AssetsDocument, AssetsRequest, CurrentRequest, GatewayError, GatewayResult, ProbeDocument,
    ProbeRequest, RequestGateway, SampleRequest, StreamRequest, StreamSession, StreamsDocument,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::HttpGatewayConfig;
use crate::decoder::{DocumentDecoder, NativeJsonDecoder};
use crate::error::{HttpError, Result};
use crate::framing::MultipartFramer;
use crate::stream::HttpStreamSession;

type Query = Vec<(&'static str, String)>;

/// HTTP transport for one agent.
///
/// The gateway owns its connection pool. Clones share the pool and the
/// shutdown signal, so one gateway can be handed to a client while the
/// application keeps a handle for [`close`](Self::close).
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    config: Arc<HttpGatewayConfig>,
    decoder: Arc<dyn DocumentDecoder>,
    shutdown: CancellationToken,
}

impl HttpGateway {
    /// Create a gateway decoding with [`NativeJsonDecoder`].
    pub fn new(config: HttpGatewayConfig) -> Result<Self> {
        config.validate()?;

        // No client-wide timeout: stream responses stay open indefinitely.
        // Non-streaming requests set their own.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(HttpError::Client)?;

        Ok(Self {
            client,
            config: Arc::new(config),
            decoder: Arc::new(NativeJsonDecoder),
            shutdown: CancellationToken::new(),
        })
    }

    /// Gateway for `base_url` with default settings
    pub fn connect(base_url: &str) -> Result<Self> {
        Self::new(HttpGatewayConfig::new(base_url)?)
    }

    pub fn with_decoder(mut self, decoder: impl DocumentDecoder + 'static) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    pub fn config(&self) -> &HttpGatewayConfig {
        &self.config
    }

    /// Shut the transport down.
    ///
    /// Open stream sessions end and every later request fails with a
    /// connection error.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Closing HTTP gateway for {}", self.config.base_url);
            self.shutdown.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// `{base}/{device?}/{segments...}`
    fn endpoint(&self, device: Option<&str>, segments: &[&str]) -> GatewayResult<Url> {
        let mut url = self.config.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                GatewayError::Internal(format!("{} cannot be used as a base URL", self.config.base_url))
            })?;
            path.pop_if_empty().extend(device).extend(segments);
        }
        Ok(url)
    }

    /// Silence tolerated on a stream with `heartbeat`, saturating on overflow
    fn stream_idle_timeout(&self, heartbeat: Duration) -> Duration {
        heartbeat
            .checked_mul(self.config.stream_idle_multiplier)
            .unwrap_or(Duration::MAX)
    }

    fn closed_error() -> GatewayError {
        GatewayError::Connection("Gateway is closed".to_string())
    }

    fn transport_error(&self, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::Timeout(self.config.request_timeout)
        } else {
            GatewayError::Connection(error.to_string())
        }
    }

    /// Race `call` against gateway shutdown.
    async fn guarded<T>(&self, call: impl Future<Output = GatewayResult<T>>) -> GatewayResult<T> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Self::closed_error()),
            result = call => result,
        }
    }

    /// GET `url` and return the body of a successful, non-error response.
    async fn fetch(&self, url: Url, query: Query) -> GatewayResult<Bytes> {
        debug!("GET {} {:?}", url, query);

        let exchange = async {
            let response = self
                .client
                .get(url)
                .query(&query)
                .header(ACCEPT, self.decoder.accept())
                .timeout(self.config.request_timeout)
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;
            self.read_body(response).await
        };
        self.guarded(exchange).await
    }

    async fn read_body(&self, response: Response) -> GatewayResult<Bytes> {
        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            if let Some(document) = self.decoder.decode_error(&body) {
                return Err(GatewayError::Protocol(document));
            }
            warn!("Agent responded with HTTP {}", status);
            return Err(GatewayError::Connection(format!(
                "Agent responded with HTTP {}",
                status
            )));
        }

        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(GatewayError::NoDocument);
        }

        if let Some(document) = self.decoder.decode_error(&body) {
            return Err(GatewayError::Protocol(document));
        }

        Ok(body)
    }

    async fn fetch_streams(&self, url: Url, query: Query) -> GatewayResult<StreamsDocument> {
        let body = self.fetch(url, query).await?;
        Ok(self.decoder.decode_streams(&body)?)
    }

    async fn fetch_assets(&self, url: Url, query: Query) -> GatewayResult<AssetsDocument> {
        let body = self.fetch(url, query).await?;
        Ok(self.decoder.decode_assets(&body)?)
    }
}

#[async_trait]
impl RequestGateway for HttpGateway {
    async fn probe(&self, request: &ProbeRequest) -> GatewayResult<ProbeDocument> {
        let url = self.endpoint(request.device.as_deref(), &["probe"])?;
        let body = self.fetch(url, Vec::new()).await?;
        Ok(self.decoder.decode_probe(&body)?)
    }

    async fn current(&self, request: &CurrentRequest) -> GatewayResult<StreamsDocument> {
        let url = self.endpoint(request.device.as_deref(), &["current"])?;
        self.fetch_streams(url, request.query_pairs()).await
    }

    async fn sample(&self, request: &SampleRequest) -> GatewayResult<StreamsDocument> {
        let url = self.endpoint(request.device.as_deref(), &["sample"])?;
        self.fetch_streams(url, request.query_pairs()).await
    }

    async fn assets(&self, request: &AssetsRequest) -> GatewayResult<AssetsDocument> {
        let url = self.endpoint(request.device.as_deref(), &["assets"])?;
        self.fetch_assets(url, request.query_pairs()).await
    }

    async fn asset(&self, asset_id: &str) -> GatewayResult<AssetsDocument> {
        let url = self.endpoint(None, &["asset", asset_id])?;
        self.fetch_assets(url, Vec::new()).await
    }

    async fn open_stream(
        &self,
        request: &StreamRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<Box<dyn StreamSession>> {
        let url = self.endpoint(request.device.as_deref(), &["sample"])?;
        let query = request.query_pairs();
        debug!("Opening stream {} {:?}", url, query);

        // Only the response head is bounded by the request timeout
        let connect = async {
            let send = self
                .client
                .get(url)
                .query(&query)
                .header(ACCEPT, self.decoder.accept())
                .send();
            match tokio::time::timeout(self.config.request_timeout, send).await {
                Ok(result) => result.map_err(|e| self.transport_error(e)),
                Err(_) => Err(GatewayError::Timeout(self.config.request_timeout)),
            }
        };
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(GatewayError::Connection("Stream request cancelled".to_string()));
            }
            result = self.guarded(connect) => result?,
        };

        if !response.status().is_success() {
            let body = self.read_body(response).await;
            return Err(body.err().unwrap_or(GatewayError::NoDocument));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let framer = MultipartFramer::from_content_type(&content_type)?
            .with_max_part_size(self.config.max_part_size);

        let idle_timeout = self.stream_idle_timeout(request.heartbeat);
        info!("Stream opened ({}), idle timeout {:?}", content_type, idle_timeout);

        Ok(Box::new(HttpStreamSession::new(
            response.bytes_stream().boxed(),
            Box::new(framer),
            self.decoder.clone(),
            cancel,
            self.shutdown.child_token(),
            idle_timeout,
        )))
    }
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.config.base_url.as_str())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://agent:5000", None, &["probe"], "http://agent:5000/probe")]
    #[case("http://agent:5000/", Some("Mill"), &["current"], "http://agent:5000/Mill/current")]
    #[case("http://agent/mtc/", None, &["asset", "T 1"], "http://agent/mtc/asset/T%201")]
    #[case("http://agent/mtc", Some("Mill"), &["sample"], "http://agent/mtc/Mill/sample")]
    fn test_endpoint_layout(
        #[case] base: &str,
        #[case] device: Option<&str>,
        #[case] segments: &[&str],
        #[case] expected: &str,
    ) {
        let gateway = HttpGateway::connect(base).unwrap();
        assert_eq!(gateway.endpoint(device, segments).unwrap().as_str(), expected);
    }

    #[rstest]
    #[case(Duration::from_secs(10), 3, Duration::from_secs(30))]
    #[case(Duration::from_millis(500), 1, Duration::from_millis(500))]
    #[case(Duration::MAX, 3, Duration::MAX)]
    #[case(Duration::from_secs(u64::MAX / 2), u32::MAX, Duration::MAX)]
    fn test_stream_idle_timeout(
        #[case] heartbeat: Duration,
        #[case] multiplier: u32,
        #[case] expected: Duration,
    ) {
        let config = HttpGatewayConfig::new("http://agent:5000")
            .unwrap()
            .with_stream_idle_multiplier(multiplier);
        let gateway = HttpGateway::new(config).unwrap();
        assert_eq!(gateway.stream_idle_timeout(heartbeat), expected);
    }

    #[tokio::test]
    async fn test_closed_gateway_rejects_requests() {
        let gateway = HttpGateway::connect("http://127.0.0.1:9").unwrap();
        let handle = gateway.clone();
        handle.close();

        assert!(gateway.is_closed());
        match gateway.probe(&ProbeRequest::default()).await {
            Err(GatewayError::Connection(message)) => assert!(message.contains("closed")),
            other => panic!("Expected connection error, got {:?}", other.map(|_| ())),
        }
    }
}
