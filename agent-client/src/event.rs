//! Events published by a running client

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::types::{
    Asset, AssetsDocument, DeviceDescriptor, ErrorDocument, Observation, ProbeDocument,
    StreamsDocument,
};

/// Everything the client reports to its caller.
///
/// Events of one document arrive in document order: the document-level event
/// first, then one `ObservationReceived` per resolved observation.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    ClientStarting,
    ClientStarted,
    ClientStopping,
    /// Last event of a run
    ClientStopped,

    /// A stream is about to be opened from `url_sequence` (`None` = buffer head)
    StreamStarting { url_sequence: Option<u64> },
    StreamStarted,
    StreamStopping,
    StreamStopped,

    ProbeReceived(Arc<ProbeDocument>),
    CurrentReceived(Arc<StreamsDocument>),
    SampleReceived(Arc<StreamsDocument>),
    AssetsReceived(Arc<AssetsDocument>),

    DeviceReceived(DeviceDescriptor),
    ObservationReceived(Observation),
    AssetReceived(Asset),

    /// Transport failure or timeout
    ConnectionError(GatewayError),
    /// The agent answered with an error document
    ProtocolError(ErrorDocument),
    /// Local failure, including a panicked background task
    InternalError(String),
}

impl ClientEvent {
    /// Map a gateway failure onto the matching error event.
    pub fn from_error(error: GatewayError) -> Self {
        match error {
            GatewayError::Protocol(document) => ClientEvent::ProtocolError(document),
            GatewayError::Internal(message) => ClientEvent::InternalError(message),
            other => ClientEvent::ConnectionError(other),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ClientEvent::ConnectionError(_)
                | ClientEvent::ProtocolError(_)
                | ClientEvent::InternalError(_)
        )
    }

    /// Short name used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::ClientStarting => "ClientStarting",
            ClientEvent::ClientStarted => "ClientStarted",
            ClientEvent::ClientStopping => "ClientStopping",
            ClientEvent::ClientStopped => "ClientStopped",
            ClientEvent::StreamStarting { .. } => "StreamStarting",
            ClientEvent::StreamStarted => "StreamStarted",
            ClientEvent::StreamStopping => "StreamStopping",
            ClientEvent::StreamStopped => "StreamStopped",
            ClientEvent::ProbeReceived(_) => "ProbeReceived",
            ClientEvent::CurrentReceived(_) => "CurrentReceived",
            ClientEvent::SampleReceived(_) => "SampleReceived",
            ClientEvent::AssetsReceived(_) => "AssetsReceived",
            ClientEvent::DeviceReceived(_) => "DeviceReceived",
            ClientEvent::ObservationReceived(_) => "ObservationReceived",
            ClientEvent::AssetReceived(_) => "AssetReceived",
            ClientEvent::ConnectionError(_) => "ConnectionError",
            ClientEvent::ProtocolError(_) => "ProtocolError",
            ClientEvent::InternalError(_) => "InternalError",
        }
    }
}

/// Publishing side of the event channel for one run.
///
/// Clones share one gate. Once [`EventEmitter::emit_final`] has sent its
/// event, every later `emit` from any clone is discarded, so nothing reaches
/// the caller after `ClientStopped`.
#[derive(Debug, Clone)]
pub(crate) struct EventEmitter {
    sender: mpsc::UnboundedSender<ClientEvent>,
    open: Arc<Mutex<bool>>,
}

impl EventEmitter {
    pub fn new(sender: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            sender,
            open: Arc::new(Mutex::new(true)),
        }
    }

    /// Publish `event`; returns `false` if it was discarded.
    pub fn emit(&self, event: ClientEvent) -> bool {
        let open = self.open.lock();
        if !*open {
            tracing::trace!("Discarding {} after the run stopped", event.name());
            return false;
        }
        // A dropped receiver is not an error for the producer.
        self.sender.send(event).is_ok()
    }

    /// Publish `event` and close the gate. Only the first call sends.
    pub fn emit_final(&self, event: ClientEvent) -> bool {
        let mut open = self.open.lock();
        if !*open {
            return false;
        }
        *open = false;
        self.sender.send(event).is_ok()
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_mapping() {
        let event = ClientEvent::from_error(GatewayError::Timeout(Duration::from_secs(1)));
        assert!(matches!(event, ClientEvent::ConnectionError(GatewayError::Timeout(_))));

        let event = ClientEvent::from_error(GatewayError::Protocol(ErrorDocument::single(
            "INVALID_REQUEST",
            "bad",
        )));
        assert!(matches!(event, ClientEvent::ProtocolError(ref doc) if doc.errors[0].code == "INVALID_REQUEST"));

        let event = ClientEvent::from_error(GatewayError::Internal("boom".to_string()));
        assert!(matches!(event, ClientEvent::InternalError(ref m) if m == "boom"));
        assert!(event.is_error());
        assert!(!ClientEvent::StreamStarted.is_error());
    }

    #[test]
    fn test_gate_closes_after_final_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let emitter = EventEmitter::new(tx);
        let clone = emitter.clone();

        assert!(emitter.emit(ClientEvent::ClientStarted));
        assert!(emitter.emit_final(ClientEvent::ClientStopped));
        assert!(!clone.emit(ClientEvent::InternalError("late".to_string())));
        assert!(!emitter.emit_final(ClientEvent::ClientStopped));
        assert!(!clone.is_open());

        assert!(matches!(rx.try_recv(), Ok(ClientEvent::ClientStarted)));
        assert!(matches!(rx.try_recv(), Ok(ClientEvent::ClientStopped)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emit_without_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let emitter = EventEmitter::new(tx);
        assert!(!emitter.emit(ClientEvent::ClientStarted));
        assert!(emitter.is_open());
    }
}
