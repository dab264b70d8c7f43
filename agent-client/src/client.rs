//! Public client API

use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::cache::MetadataCache;
use crate::config::ClientConfig;
use crate::error::{ClientError, GatewayResult, Result};
use crate::event::{ClientEvent, EventEmitter};
use crate::gateway::{
    bounded_call, AssetsRequest, CurrentRequest, ProbeRequest, RequestGateway, SampleRequest,
};
use crate::position::{ConsumerPosition, PositionTracker, ResumeMode};
use crate::supervisor::{panic_message, ConsumptionSupervisor, SupervisorParts, SupervisorState};
use crate::types::{AssetsDocument, DeviceDescriptor, ProbeDocument, StreamsDocument};

/// Handle to the background worker of one run
struct Worker {
    cancel: CancellationToken,
    emitter: EventEmitter,
    handle: JoinHandle<()>,
}

/// Client for one agent.
///
/// The client owns its metadata cache and position; nothing is shared between
/// instances. Consumption runs on a background task between [`start`] and
/// [`stop`], and everything it observes is published on the
/// [`event_stream`].
///
/// # Example
///
/// ```rust,ignore
/// let client = AgentClient::new(ClientConfig::default(), Arc::new(gateway))?;
/// let mut events = client.event_stream()?;
/// client.start(None)?;
///
/// while let Some(event) = events.recv().await {
///     if let ClientEvent::ObservationReceived(obs) = event {
///         println!("{} = {:?}", obs.data_item_id(), obs.result());
///     }
/// }
/// ```
///
/// [`start`]: AgentClient::start
/// [`stop`]: AgentClient::stop
/// [`event_stream`]: AgentClient::event_stream
pub struct AgentClient {
    config: ClientConfig,
    gateway: Arc<dyn RequestGateway>,
    cache: Arc<MetadataCache>,
    tracker: Arc<PositionTracker>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    state: Arc<watch::Sender<SupervisorState>>,
    worker: Mutex<Option<Worker>>,
    /// Cancelled when the client is dropped
    root: CancellationToken,
}

impl AgentClient {
    /// Create a client; the configuration is validated here.
    pub fn new(config: ClientConfig, gateway: Arc<dyn RequestGateway>) -> Result<Self> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SupervisorState::Idle);

        Ok(Self {
            config,
            gateway,
            cache: Arc::new(MetadataCache::new()),
            tracker: Arc::new(PositionTracker::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            state: Arc::new(state),
            worker: Mutex::new(None),
            root: CancellationToken::new(),
        })
    }

    /// Take the event receiver. Only the first call succeeds.
    pub fn event_stream(&self) -> Result<mpsc::UnboundedReceiver<ClientEvent>> {
        self.event_rx
            .lock()
            .take()
            .ok_or(ClientError::EventStreamTaken)
    }

    /// Start consuming from the head of the log: only observations newer than
    /// the first `current` are streamed.
    pub fn start(&self, path: Option<&str>) -> Result<()> {
        self.spawn(path, ResumeMode::FromHead, None)
    }

    /// Start by replaying everything still retained in the agent's buffer.
    pub fn start_from_buffer(&self, path: Option<&str>) -> Result<()> {
        self.spawn(path, ResumeMode::FromBuffer, None)
    }

    /// Resume after `sequence`, the last sequence the caller processed under
    /// agent instance `instance_id`.
    ///
    /// If the agent has restarted since, the position falls back to the head
    /// of the new instance's buffer.
    pub fn start_from_sequence(&self, instance_id: u64, sequence: u64, path: Option<&str>) -> Result<()> {
        self.spawn(path, ResumeMode::FromExplicitSequence(sequence), Some(instance_id))
    }

    fn spawn(&self, path: Option<&str>, resume: ResumeMode, instance_id: Option<u64>) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ClientError::WorkerFailed(format!("No tokio runtime: {}", e)))?;

        let mut worker = self.worker.lock();
        if let Some(existing) = worker.take() {
            if !existing.handle.is_finished() {
                *worker = Some(existing);
                return Err(ClientError::AlreadyRunning);
            }
            reap(existing, &self.state);
        }

        self.tracker.reset();
        if let (ResumeMode::FromExplicitSequence(sequence), Some(instance_id)) = (resume, instance_id) {
            self.tracker.resume_at(instance_id, sequence);
        }

        let cancel = self.root.child_token();
        let emitter = EventEmitter::new(self.event_tx.clone());
        emitter.emit(ClientEvent::ClientStarting);

        let supervisor = ConsumptionSupervisor::new(
            SupervisorParts {
                config: self.config.clone(),
                gateway: Arc::clone(&self.gateway),
                cache: Arc::clone(&self.cache),
                tracker: Arc::clone(&self.tracker),
                emitter: emitter.clone(),
                state: Arc::clone(&self.state),
                cancel: cancel.clone(),
            },
            path.map(str::to_string),
            resume,
        );

        let handle = runtime.spawn(supervisor.run());
        *worker = Some(Worker {
            cancel,
            emitter,
            handle,
        });

        Ok(())
    }

    /// Stop the running worker and wait for it to finish.
    ///
    /// In-flight requests and the open stream are abandoned. `ClientStopped`
    /// is the last event of the run.
    pub async fn stop(&self) -> Result<()> {
        let Worker {
            cancel,
            emitter,
            handle,
        } = self.worker.lock().take().ok_or(ClientError::NotRunning)?;

        tracing::info!("Stopping client");
        emitter.emit(ClientEvent::ClientStopping);
        cancel.cancel();

        match handle.await {
            Ok(()) => Ok(()),
            Err(e) => {
                let message = join_error_message(e);
                report_failure(&emitter, &self.state, &message);
                Err(ClientError::WorkerFailed(message))
            }
        }
    }

    /// Zero the position. A running client re-initializes it from the next
    /// `current` response.
    pub fn reset(&self) {
        self.tracker.reset();
        if !self.is_running() {
            self.state.send_replace(SupervisorState::Idle);
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map_or(false, |w| !w.handle.is_finished())
    }

    /// Current state of the consumption state machine
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn state_changes(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn position(&self) -> ConsumerPosition {
        self.tracker.position()
    }

    /// Devices from the last successful probe
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.cache.devices()
    }

    pub fn device(&self, uuid: &str) -> Option<DeviceDescriptor> {
        self.cache.device(uuid)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // One-shot requests. These neither update the cache nor move the position.

    pub async fn probe(&self) -> Result<ProbeDocument> {
        let request = ProbeRequest {
            device: self.config.device_filter.clone(),
        };
        self.one_shot(self.gateway.probe(&request)).await
    }

    pub async fn current(&self, mut request: CurrentRequest) -> Result<StreamsDocument> {
        request.device = request.device.or_else(|| self.config.device_filter.clone());
        self.one_shot(self.gateway.current(&request)).await
    }

    pub async fn sample(&self, mut request: SampleRequest) -> Result<StreamsDocument> {
        request.device = request.device.or_else(|| self.config.device_filter.clone());
        self.one_shot(self.gateway.sample(&request)).await
    }

    pub async fn assets(&self, mut request: AssetsRequest) -> Result<AssetsDocument> {
        request.device = request.device.or_else(|| self.config.device_filter.clone());
        self.one_shot(self.gateway.assets(&request)).await
    }

    pub async fn asset(&self, asset_id: &str) -> Result<AssetsDocument> {
        self.one_shot(self.gateway.asset(asset_id)).await
    }

    async fn one_shot<T, F>(&self, call: F) -> Result<T>
    where
        F: std::future::Future<Output = GatewayResult<T>>,
    {
        match bounded_call(&self.root, self.config.request_timeout, call).await {
            Some(result) => Ok(result?),
            None => Err(ClientError::Cancelled),
        }
    }
}

/// Collect a worker that already finished, reporting it if it failed.
///
/// Returns `true` when a failure was reported.
fn reap(worker: Worker, state: &watch::Sender<SupervisorState>) -> bool {
    let Worker { emitter, handle, .. } = worker;
    match handle.now_or_never() {
        Some(Err(e)) => {
            report_failure(&emitter, state, &join_error_message(e));
            true
        }
        _ => false,
    }
}

/// Close a run whose worker died before it could emit `ClientStopped`.
fn report_failure(emitter: &EventEmitter, state: &watch::Sender<SupervisorState>, message: &str) {
    tracing::error!("Client worker failed: {}", message);
    emitter.emit(ClientEvent::InternalError(format!("Worker failed: {}", message)));
    emitter.emit_final(ClientEvent::ClientStopped);
    state.send_replace(SupervisorState::Stopped);
}

fn join_error_message(error: JoinError) -> String {
    if error.is_panic() {
        panic_message(error.into_panic().as_ref())
    } else {
        error.to_string()
    }
}

impl Drop for AgentClient {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClient")
            .field("state", &self.state())
            .field("position", &self.position())
            .field("running", &self.is_running())
            .finish()
    }
}
