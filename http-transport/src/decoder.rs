//! Turning response bodies into documents
//!
//! The transport does not fix a wire schema. Anything that can produce the
//! client's document types from bytes can be plugged in through
//! [`DocumentDecoder`].

use mtconnect_client::{AssetsDocument, ErrorDocument, ProbeDocument, StreamsDocument};
use serde::de::DeserializeOwned;

use crate::error::DecodeError;

/// Decodes agent response bodies.
pub trait DocumentDecoder: Send + Sync {
    /// Value sent in the `Accept` header
    fn accept(&self) -> &'static str;

    fn decode_probe(&self, body: &[u8]) -> Result<ProbeDocument, DecodeError>;

    fn decode_streams(&self, body: &[u8]) -> Result<StreamsDocument, DecodeError>;

    fn decode_assets(&self, body: &[u8]) -> Result<AssetsDocument, DecodeError>;

    /// The error document in `body`, if it is one.
    fn decode_error(&self, body: &[u8]) -> Option<ErrorDocument>;
}

/// Decoder for the client's own serde representation of each document.
///
/// An error document is a JSON object with an `errors` array and no
/// `header`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeJsonDecoder;

impl NativeJsonDecoder {
    fn decode<T: DeserializeOwned>(kind: &'static str, body: &[u8]) -> Result<T, DecodeError> {
        serde_json::from_slice(body).map_err(|e| DecodeError::new(kind, e.to_string()))
    }
}

impl DocumentDecoder for NativeJsonDecoder {
    fn accept(&self) -> &'static str {
        "application/json"
    }

    fn decode_probe(&self, body: &[u8]) -> Result<ProbeDocument, DecodeError> {
        Self::decode("probe", body)
    }

    fn decode_streams(&self, body: &[u8]) -> Result<StreamsDocument, DecodeError> {
        Self::decode("streams", body)
    }

    fn decode_assets(&self, body: &[u8]) -> Result<AssetsDocument, DecodeError> {
        Self::decode("assets", body)
    }

    fn decode_error(&self, body: &[u8]) -> Option<ErrorDocument> {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        let object = value.as_object()?;
        if object.contains_key("header") || !object.get("errors")?.is_array() {
            return None;
        }
        serde_json::from_value(value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtconnect_client::{DeviceDescriptor, Header};

    #[test]
    fn test_probe_round_trip() {
        let document = ProbeDocument {
            header: Header::new(7, 1, 20),
            devices: vec![DeviceDescriptor::new("uuid-1", "Mill")],
        };
        let body = serde_json::to_vec(&document).unwrap();

        let decoded = NativeJsonDecoder.decode_probe(&body).unwrap();
        assert_eq!(decoded, document);
        assert!(NativeJsonDecoder.decode_error(&body).is_none());
    }

    #[test]
    fn test_error_document_detection() {
        let body = br#"{"instance_id": 3, "errors": [{"code": "OUT_OF_RANGE", "message": "too old"}]}"#;
        let document = NativeJsonDecoder.decode_error(body).unwrap();
        assert_eq!(document.instance_id, Some(3));
        assert_eq!(document.errors[0].code, "OUT_OF_RANGE");

        assert!(NativeJsonDecoder.decode_error(b"{}").is_none());
        assert!(NativeJsonDecoder.decode_error(b"[1, 2]").is_none());
        assert!(NativeJsonDecoder.decode_error(b"<xml/>").is_none());
    }

    #[test]
    fn test_decode_failure_names_document_kind() {
        let error = NativeJsonDecoder.decode_streams(b"{\"observations\": []}").unwrap_err();
        assert_eq!(error.kind, "streams");
        assert!(error.message.contains("header"));
    }
}
