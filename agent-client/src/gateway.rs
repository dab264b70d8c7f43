//! Collaborator interfaces for talking to an agent
//!
//! The client never builds URLs or parses documents itself. It issues typed
//! requests through a [`RequestGateway`] and reads stream documents from a
//! [`StreamSession`]. `mtconnect-sdk-http` provides the HTTP implementation;
//! tests plug in scripted mocks.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, GatewayResult};
use crate::types::{AssetsDocument, ProbeDocument, StreamsDocument};

/// Parameters of a probe request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeRequest {
    pub device: Option<String>,
}

/// Parameters of a current request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentRequest {
    pub device: Option<String>,
    pub path: Option<String>,
    /// Snapshot at this sequence instead of the latest values
    pub at: Option<u64>,
}

/// Parameters of a sample request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRequest {
    pub device: Option<String>,
    pub path: Option<String>,
    pub from: Option<u64>,
    pub to: Option<u64>,
    pub count: Option<u32>,
}

/// Parameters of an assets request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetsRequest {
    pub device: Option<String>,
    pub count: Option<u32>,
    pub asset_type: Option<String>,
}

/// Parameters of a long-lived sample stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub device: Option<String>,
    pub path: Option<String>,
    /// First sequence requested; `None` replays from the head of the buffer
    pub from: Option<u64>,
    pub interval: Duration,
    pub heartbeat: Duration,
    pub count: u32,
}

impl CurrentRequest {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push(&mut pairs, "path", self.path.clone());
        push(&mut pairs, "at", self.at);
        pairs
    }
}

impl SampleRequest {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push(&mut pairs, "path", self.path.clone());
        push(&mut pairs, "from", self.from);
        push(&mut pairs, "to", self.to);
        push(&mut pairs, "count", self.count);
        pairs
    }
}

impl AssetsRequest {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push(&mut pairs, "type", self.asset_type.clone());
        push(&mut pairs, "count", self.count);
        pairs
    }
}

impl StreamRequest {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push(&mut pairs, "path", self.path.clone());
        push(&mut pairs, "from", self.from);
        pairs.push(("interval", self.interval.as_millis().to_string()));
        pairs.push(("heartbeat", self.heartbeat.as_millis().to_string()));
        pairs.push(("count", self.count.to_string()));
        pairs
    }
}

fn push<T: ToString>(pairs: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<T>) {
    if let Some(value) = value {
        pairs.push((key, value.to_string()));
    }
}

/// Request/response exchanges with an agent.
///
/// Implementations report failures with the [`GatewayError`](crate::GatewayError)
/// taxonomy and must be safe to call from several tasks at once; the
/// supervisor and asset refresh tasks share one gateway.
#[async_trait]
pub trait RequestGateway: Send + Sync {
    async fn probe(&self, request: &ProbeRequest) -> GatewayResult<ProbeDocument>;

    async fn current(&self, request: &CurrentRequest) -> GatewayResult<StreamsDocument>;

    async fn sample(&self, request: &SampleRequest) -> GatewayResult<StreamsDocument>;

    async fn assets(&self, request: &AssetsRequest) -> GatewayResult<AssetsDocument>;

    async fn asset(&self, asset_id: &str) -> GatewayResult<AssetsDocument>;

    /// Open a long-lived sample stream.
    ///
    /// The session must stop yielding documents once `cancel` fires.
    async fn open_stream(
        &self,
        request: &StreamRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<Box<dyn StreamSession>>;
}

/// An open stream of sample documents.
#[async_trait]
pub trait StreamSession: Send {
    /// Next document, or `Ok(None)` once the agent closed the stream.
    ///
    /// An error document received on the stream is returned as
    /// `GatewayError::Protocol`.
    async fn next_document(&mut self) -> GatewayResult<Option<StreamsDocument>>;

    /// Release the underlying connection. Idempotent.
    async fn close(&mut self) {}
}

/// Run one gateway call bounded by `limit` and abandoned on cancellation.
///
/// `None` means the token fired first.
pub(crate) async fn bounded_call<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    call: F,
) -> Option<GatewayResult<T>>
where
    F: Future<Output = GatewayResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = tokio::time::timeout(limit, call) => {
            Some(result.unwrap_or_else(|_| Err(GatewayError::Timeout(limit))))
        }
    }
}
