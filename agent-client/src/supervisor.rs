//! The consumption state machine
//!
//! One supervisor drives one run of the client on a background task:
//!
//! ```text
//! Idle -> Probing -> [FetchingAssets] -> FetchingCurrent -> Streaming | Polling
//!            ^                                                    |
//!            +------------------------ Backoff <------------------+
//! ```
//!
//! Every failure of a cycle is reported as an event and routed through
//! `Backoff`; cancellation moves to `Stopped` from any state without waiting.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::asset_watcher::AssetChangeWatcher;
use crate::cache::MetadataCache;
use crate::config::{ClientConfig, PollingMode};
use crate::error::{GatewayError, GatewayResult};
use crate::event::{ClientEvent, EventEmitter};
use crate::gateway::{
    bounded_call, AssetsRequest, CurrentRequest, ProbeRequest, RequestGateway, SampleRequest,
    StreamRequest, StreamSession,
};
use crate::position::{PositionTracker, ResumeMode};
use crate::resolver::ObservationResolver;
use crate::types::StreamsDocument;

/// States of the consumption state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Probing,
    FetchingAssets,
    FetchingCurrent,
    Streaming,
    Polling,
    Backoff,
    Stopped,
}

impl SupervisorState {
    /// Whether observations are being consumed in this state
    pub fn is_consuming(&self) -> bool {
        matches!(self, SupervisorState::Streaming | SupervisorState::Polling)
    }
}

/// Which request produced a document in the batch path
#[derive(Debug, Clone, Copy)]
enum BatchSource {
    Current,
    Sample,
}

/// Shared pieces the client hands to each run
pub(crate) struct SupervisorParts {
    pub config: ClientConfig,
    pub gateway: Arc<dyn RequestGateway>,
    pub cache: Arc<MetadataCache>,
    pub tracker: Arc<PositionTracker>,
    pub emitter: EventEmitter,
    pub state: Arc<watch::Sender<SupervisorState>>,
    pub cancel: CancellationToken,
}

pub(crate) struct ConsumptionSupervisor {
    config: ClientConfig,
    gateway: Arc<dyn RequestGateway>,
    cache: Arc<MetadataCache>,
    tracker: Arc<PositionTracker>,
    resolver: ObservationResolver,
    watcher: AssetChangeWatcher,
    emitter: EventEmitter,
    state: Arc<watch::Sender<SupervisorState>>,
    cancel: CancellationToken,
    path: Option<String>,
    resume: ResumeMode,
    pending_asset_count: u32,
}

impl ConsumptionSupervisor {
    pub fn new(parts: SupervisorParts, path: Option<String>, resume: ResumeMode) -> Self {
        let SupervisorParts {
            config,
            gateway,
            cache,
            tracker,
            emitter,
            state,
            cancel,
        } = parts;

        let resolver = ObservationResolver::new(Arc::clone(&cache), config.target_device_uuid.clone());
        let watcher = AssetChangeWatcher::new(
            Arc::clone(&gateway),
            emitter.clone(),
            cancel.clone(),
            config.request_timeout,
        );

        Self {
            config,
            gateway,
            cache,
            tracker,
            resolver,
            watcher,
            emitter,
            state,
            cancel,
            path,
            resume,
            pending_asset_count: 0,
        }
    }

    /// Drive the state machine until cancellation.
    pub async fn run(mut self) {
        tracing::info!("Client started ({:?})", self.resume);
        self.emitter.emit(ClientEvent::ClientStarted);

        let mut state = SupervisorState::Probing;
        loop {
            self.enter(state);
            if state == SupervisorState::Stopped {
                break;
            }

            // A panicking collaborator fails the cycle, not the worker
            state = match AssertUnwindSafe(self.step(state)).catch_unwind().await {
                Ok(next) => next,
                Err(payload) => {
                    let message = format!("{:?} panicked: {}", state, panic_message(payload.as_ref()));
                    tracing::error!("{}", message);
                    self.emitter.emit(ClientEvent::InternalError(message));
                    SupervisorState::Backoff
                }
            };
        }

        tracing::info!("Client stopped");
        self.emitter.emit_final(ClientEvent::ClientStopped);
    }

    async fn step(&mut self, state: SupervisorState) -> SupervisorState {
        match state {
            SupervisorState::Idle | SupervisorState::Probing => self.probe().await,
            SupervisorState::FetchingAssets => self.fetch_assets().await,
            SupervisorState::FetchingCurrent => self.fetch_current().await,
            SupervisorState::Streaming => self.stream().await,
            SupervisorState::Polling => self.poll().await,
            SupervisorState::Backoff => self.backoff().await,
            SupervisorState::Stopped => SupervisorState::Stopped,
        }
    }

    fn enter(&self, state: SupervisorState) {
        tracing::debug!("Supervisor -> {:?}", state);
        self.state.send_replace(state);
    }

    /// Report a failed cycle and pick the state that follows it.
    fn fail(&self, operation: &str, error: GatewayError) -> SupervisorState {
        tracing::warn!("{} failed: {}", operation, error);
        self.emitter.emit(ClientEvent::from_error(error));
        SupervisorState::Backoff
    }

    async fn call<T, F>(&self, call: F) -> Option<GatewayResult<T>>
    where
        F: std::future::Future<Output = GatewayResult<T>>,
    {
        bounded_call(&self.cancel, self.config.request_timeout, call).await
    }

    async fn probe(&mut self) -> SupervisorState {
        let request = ProbeRequest {
            device: self.config.device_filter.clone(),
        };

        let document = match self.call(self.gateway.probe(&request)).await {
            None => return SupervisorState::Stopped,
            Some(Err(e)) => return self.fail("Probe", e),
            Some(Ok(document)) => document,
        };

        tracing::debug!(
            "Probe returned {} devices, {}",
            document.devices.len(),
            document.header
        );
        self.cache.update(&document.devices);

        let document = Arc::new(document);
        self.emitter.emit(ClientEvent::ProbeReceived(Arc::clone(&document)));
        for device in &document.devices {
            if self.is_target(&device.uuid) {
                self.emitter.emit(ClientEvent::DeviceReceived(device.clone()));
            }
        }

        self.pending_asset_count = self
            .config
            .initial_asset_count
            .unwrap_or(document.header.asset_count);

        if self.pending_asset_count > 0 {
            SupervisorState::FetchingAssets
        } else {
            SupervisorState::FetchingCurrent
        }
    }

    async fn fetch_assets(&mut self) -> SupervisorState {
        let request = AssetsRequest {
            device: self.config.device_filter.clone(),
            count: Some(self.pending_asset_count),
            asset_type: None,
        };

        match self.call(self.gateway.assets(&request)).await {
            None => return SupervisorState::Stopped,
            Some(Ok(document)) => {
                tracing::debug!("Fetched {} assets", document.assets.len());
                let assets = document.assets.clone();
                self.emitter.emit(ClientEvent::AssetsReceived(Arc::new(document)));
                for asset in assets {
                    self.emitter.emit(ClientEvent::AssetReceived(asset));
                }
            }
            // Assets are best-effort at start-up
            Some(Err(e)) => {
                tracing::warn!("Initial asset fetch failed: {}", e);
                self.emitter.emit(ClientEvent::from_error(e));
            }
        }

        SupervisorState::FetchingCurrent
    }

    async fn fetch_current(&mut self) -> SupervisorState {
        let request = CurrentRequest {
            device: self.config.device_filter.clone(),
            path: self.path.clone(),
            at: None,
        };

        let document = match self.call(self.gateway.current(&request)).await {
            None => return SupervisorState::Stopped,
            Some(Err(e)) => return self.fail("Current", e),
            Some(Ok(document)) => document,
        };

        self.tracker.on_header_observed(&document.header);
        if !self.tracker.is_initialized() {
            // Explicit runs are seeded before the first request; reaching this
            // point in one means the position was reset mid-run.
            let mode = match self.resume {
                ResumeMode::FromExplicitSequence(_) => ResumeMode::FromHead,
                mode => mode,
            };
            self.tracker.initialize(&document.header, mode);
        }
        self.tracker.reconcile(&document.header);

        self.deliver(BatchSource::Current, document);

        if self.config.streaming {
            SupervisorState::Streaming
        } else {
            SupervisorState::Polling
        }
    }

    /// Emit a document and its resolved observations, then scan for asset
    /// changes. Returns the highest sequence in the batch.
    fn deliver(&self, source: BatchSource, document: StreamsDocument) -> Option<u64> {
        let observations = self.resolver.resolve_all(&document.observations);
        let max_sequence = document.max_sequence();

        let document = Arc::new(document);
        self.emitter.emit(match source {
            BatchSource::Current => ClientEvent::CurrentReceived(document),
            BatchSource::Sample => ClientEvent::SampleReceived(document),
        });

        self.watcher.scan(&observations);
        for observation in observations {
            self.emitter.emit(ClientEvent::ObservationReceived(observation));
        }

        max_sequence
    }

    async fn stream(&mut self) -> SupervisorState {
        let request = StreamRequest {
            device: self.config.device_filter.clone(),
            path: self.path.clone(),
            from: self.tracker.next_request_sequence(),
            interval: self.config.interval,
            heartbeat: self.config.heartbeat,
            count: self.config.max_sample_count,
        };

        tracing::info!("Opening stream from {:?}", request.from);
        self.emitter.emit(ClientEvent::StreamStarting {
            url_sequence: request.from,
        });

        let session_cancel = self.cancel.child_token();
        let opened = self
            .call(self.gateway.open_stream(&request, session_cancel.clone()))
            .await;
        let mut session = match opened {
            None => {
                self.emitter.emit(ClientEvent::StreamStopped);
                return SupervisorState::Stopped;
            }
            Some(Err(e)) => {
                self.emitter.emit(ClientEvent::StreamStopped);
                return self.fail("Opening stream", e);
            }
            Some(Ok(session)) => session,
        };

        self.emitter.emit(ClientEvent::StreamStarted);
        let next = self.consume_stream(session.as_mut()).await;

        self.emitter.emit(ClientEvent::StreamStopping);
        session_cancel.cancel();
        session.close().await;
        self.emitter.emit(ClientEvent::StreamStopped);
        tracing::info!("Stream closed");

        next
    }

    async fn consume_stream(&self, session: &mut dyn StreamSession) -> SupervisorState {
        let read_timeout = self.config.stream_timeout();

        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SupervisorState::Stopped,
                read = tokio::time::timeout(read_timeout, session.next_document()) => read,
            };

            let document = match read {
                Err(_) => {
                    tracing::warn!("No stream data or heartbeat within {:?}", read_timeout);
                    return self.fail("Stream", GatewayError::Timeout(read_timeout));
                }
                Ok(Err(e)) => return self.fail("Stream", e),
                Ok(Ok(None)) => {
                    tracing::info!("Agent closed the stream");
                    return SupervisorState::Backoff;
                }
                Ok(Ok(Some(document))) => document,
            };

            if self.tracker.on_header_observed(&document.header) {
                // Observations of the new instance are replayed after a fresh probe
                return SupervisorState::Backoff;
            }

            if let Some(max) = self.deliver(BatchSource::Sample, document) {
                self.tracker.advance(max);
            }
        }
    }

    async fn poll(&mut self) -> SupervisorState {
        loop {
            let (source, result) = match self.config.polling_mode {
                PollingMode::Sample => {
                    let request = SampleRequest {
                        device: self.config.device_filter.clone(),
                        path: self.path.clone(),
                        from: self.tracker.next_request_sequence(),
                        to: None,
                        count: Some(self.config.max_sample_count),
                    };
                    (BatchSource::Sample, self.call(self.gateway.sample(&request)).await)
                }
                PollingMode::Current => {
                    let request = CurrentRequest {
                        device: self.config.device_filter.clone(),
                        path: self.path.clone(),
                        at: None,
                    };
                    (BatchSource::Current, self.call(self.gateway.current(&request)).await)
                }
            };

            let document = match result {
                None => return SupervisorState::Stopped,
                Some(Err(e)) => return self.fail("Poll", e),
                Some(Ok(document)) => document,
            };

            if self.tracker.on_header_observed(&document.header) {
                return SupervisorState::Backoff;
            }
            if self.tracker.reconcile(&document.header) {
                return SupervisorState::Backoff;
            }

            if let Some(max) = self.deliver(source, document) {
                self.tracker.advance(max);
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SupervisorState::Stopped,
                _ = tokio::time::sleep(self.config.polling_interval) => {}
            }
        }
    }

    async fn backoff(&mut self) -> SupervisorState {
        tracing::debug!(
            "Waiting {:?} before reconnecting",
            self.config.reconnection_interval
        );
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => SupervisorState::Stopped,
            _ = tokio::time::sleep(self.config.reconnection_interval) => SupervisorState::Probing,
        }
    }

    fn is_target(&self, uuid: &str) -> bool {
        self.config
            .target_device_uuid
            .as_deref()
            .map_or(true, |target| target == uuid)
    }
}

/// Text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
