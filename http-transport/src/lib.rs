//! HTTP transport for mtconnect-sdk-client
//!
//! [`HttpGateway`] implements [`RequestGateway`](mtconnect_client::RequestGateway)
//! over reqwest. It is constructed explicitly and handed to the client, owns
//! its own connection pool and can be shut down with [`HttpGateway::close`].
//!
//! Request URLs follow the agent layout
//! `{base}/{device?}/{probe|current|sample|assets|asset/{id}}`. Long-lived
//! sample streams are read as `multipart/x-mixed-replace` responses and split
//! into documents by a [`StreamFramer`].
//!
//! Bodies are turned into documents by a [`DocumentDecoder`]. The bundled
//! [`NativeJsonDecoder`] reads the client's own serde representation.
//!
//! # Example
//!
//! ```rust,ignore
//! use mtconnect_client::{AgentClient, ClientConfig};
//! use mtconnect_http::{HttpGateway, HttpGatewayConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = HttpGatewayConfig::new("http://agent:5000/")?
//!     .with_request_timeout(Duration::from_secs(5));
//! let gateway = HttpGateway::new(config)?;
//!
//! let client = AgentClient::new(ClientConfig::default(), Arc::new(gateway.clone()))?;
//! client.start(None)?;
//! // ...
//! client.stop().await?;
//! gateway.close();
//! ```

mod config;
mod decoder;
mod error;
mod framing;
mod gateway;
mod stream;

pub use config::HttpGatewayConfig;
pub use decoder::{DocumentDecoder, NativeJsonDecoder};
pub use error::{DecodeError, FramingError, HttpError, Result};
pub use framing::{MultipartFramer, StreamFramer, DEFAULT_MAX_PART_SIZE};
pub use gateway::HttpGateway;
pub use stream::HttpStreamSession;
