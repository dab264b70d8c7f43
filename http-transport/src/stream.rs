//! Long-lived sample stream over a multipart HTTP response

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use mtconnect_client::{GatewayError, GatewayResult, StreamSession, StreamsDocument};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::decoder::DocumentDecoder;
use crate::framing::StreamFramer;

pub(crate) type BodyStream = BoxStream<'static, reqwest::Result<Bytes>>;

/// A [`StreamSession`] reading documents out of a chunked response body.
pub struct HttpStreamSession {
    body: BodyStream,
    framer: Box<dyn StreamFramer>,
    decoder: Arc<dyn DocumentDecoder>,
    /// Fires when the consumer abandons the stream
    cancel: CancellationToken,
    /// Fires when the owning gateway is closed
    shutdown: CancellationToken,
    idle_timeout: Duration,
    closed: bool,
}

impl HttpStreamSession {
    pub(crate) fn new(
        body: BodyStream,
        framer: Box<dyn StreamFramer>,
        decoder: Arc<dyn DocumentDecoder>,
        cancel: CancellationToken,
        shutdown: CancellationToken,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            body,
            framer,
            decoder,
            cancel,
            shutdown,
            idle_timeout,
            closed: false,
        }
    }

    fn decode(&self, frame: &[u8]) -> GatewayResult<StreamsDocument> {
        if let Some(document) = self.decoder.decode_error(frame) {
            return Err(GatewayError::Protocol(document));
        }
        Ok(self.decoder.decode_streams(frame)?)
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.body = stream::empty().boxed();
        }
    }
}

#[async_trait]
impl StreamSession for HttpStreamSession {
    async fn next_document(&mut self) -> GatewayResult<Option<StreamsDocument>> {
        loop {
            if self.closed {
                return Ok(None);
            }

            if let Some(frame) = self.framer.next_frame()? {
                trace!("Stream frame of {} bytes", frame.len());
                return self.decode(&frame).map(Some);
            }

            if self.framer.is_finished() {
                debug!("Agent sent the closing stream delimiter");
                self.release();
                return Ok(None);
            }

            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                _ = self.shutdown.cancelled() => None,
                next = tokio::time::timeout(self.idle_timeout, self.body.next()) => {
                    match next {
                        Ok(chunk) => Some(chunk),
                        Err(_) => return Err(GatewayError::Timeout(self.idle_timeout)),
                    }
                }
            };

            match chunk {
                None | Some(None) => {
                    debug!("Stream ended");
                    self.release();
                    return Ok(None);
                }
                Some(Some(Ok(bytes))) => self.framer.push(&bytes),
                Some(Some(Err(e))) => {
                    self.release();
                    return Err(GatewayError::Connection(format!("Stream read failed: {}", e)));
                }
            }
        }
    }

    async fn close(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::NativeJsonDecoder;
    use crate::framing::MultipartFramer;
    use mtconnect_client::Header;

    fn part(body: &str) -> Bytes {
        Bytes::from(format!(
            "--B\r\nContent-type: application/json\r\nContent-length: {}\r\n\r\n{}\r\n",
            body.len(),
            body
        ))
    }

    fn document(sequence: u64) -> String {
        let document = StreamsDocument {
            header: Header::new(1, 1, sequence + 1),
            observations: Vec::new(),
        };
        serde_json::to_string(&document).unwrap()
    }

    fn session(chunks: Vec<Bytes>, cancel: CancellationToken) -> HttpStreamSession {
        let body = stream::iter(chunks.into_iter().map(Ok::<Bytes, reqwest::Error>)).boxed();
        HttpStreamSession::new(
            body,
            Box::new(MultipartFramer::new("B")),
            Arc::new(NativeJsonDecoder),
            cancel,
            CancellationToken::new(),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_documents_then_end_of_body() {
        let mut session = session(
            vec![part(&document(10)), part(&document(11))],
            CancellationToken::new(),
        );

        let first = session.next_document().await.unwrap().unwrap();
        assert_eq!(first.header.next_sequence, 11);
        let second = session.next_document().await.unwrap().unwrap();
        assert_eq!(second.header.next_sequence, 12);
        assert!(session.next_document().await.unwrap().is_none());
        assert!(session.next_document().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_part_is_protocol_error() {
        let error = r#"{"errors": [{"code": "OUT_OF_RANGE", "message": "gone"}]}"#;
        let mut session = session(vec![part(error)], CancellationToken::new());

        match session.next_document().await {
            Err(GatewayError::Protocol(document)) => assert_eq!(document.errors[0].code, "OUT_OF_RANGE"),
            other => panic!("Expected protocol error, got {:?}", other.map(|d| d.is_some())),
        }
    }

    #[tokio::test]
    async fn test_undecodable_part_is_internal_error() {
        let mut session = session(vec![part("{\"nonsense\": true}")], CancellationToken::new());
        assert!(matches!(session.next_document().await, Err(GatewayError::Internal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_body_times_out() {
        let body = stream::pending::<reqwest::Result<Bytes>>().boxed();
        let mut session = HttpStreamSession::new(
            body,
            Box::new(MultipartFramer::new("B")),
            Arc::new(NativeJsonDecoder),
            CancellationToken::new(),
            CancellationToken::new(),
            Duration::from_secs(3),
        );

        assert!(matches!(
            session.next_document().await,
            Err(GatewayError::Timeout(d)) if d == Duration::from_secs(3)
        ));
    }

    #[tokio::test]
    async fn test_cancel_and_close_end_the_session() {
        let cancel = CancellationToken::new();
        let mut session = session(vec![], cancel.clone());
        cancel.cancel();
        assert!(session.next_document().await.unwrap().is_none());

        let mut session = self::session(vec![part(&document(1))], CancellationToken::new());
        session.close().await;
        session.close().await;
        assert!(session.next_document().await.unwrap().is_none());
    }
}
