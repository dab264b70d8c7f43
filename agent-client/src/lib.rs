//! MTConnect Agent Client
//!
//! Resumable consumption of an MTConnect-style agent's observation log.
//!
//! # Features
//!
//! - **Probe → Current → Stream**: one background worker sequences the
//!   requests and falls back to polling when streaming is disabled
//! - **Resumable position**: the `(instance id, sequence)` pair survives
//!   reconnects; agent restarts and buffer rollovers reset it instead of failing
//! - **Metadata resolution**: observations are bound to the probed data item
//!   and component descriptors, unknown items are dropped
//! - **Asset refresh**: `ASSET_CHANGED` observations trigger supervised asset
//!   fetches
//! - **Pluggable transport**: all I/O goes through [`RequestGateway`]
//!
//! # Architecture
//!
//! ```text
//! AgentClient → ConsumptionSupervisor → RequestGateway / StreamSession
//!                      │
//!                      ├─ MetadataCache ← ObservationResolver
//!                      ├─ PositionTracker
//!                      └─ AssetChangeWatcher (spawned fetches)
//!                      ↓
//!               ClientEvent channel
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use mtconnect_client::{AgentClient, ClientConfig, ClientEvent};
//! use mtconnect_http::HttpGateway;
//!
//! let gateway = HttpGateway::connect("http://localhost:5000")?;
//! let client = AgentClient::new(ClientConfig::default(), Arc::new(gateway))?;
//! let mut events = client.event_stream()?;
//! client.start(None)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ClientEvent::ObservationReceived(obs) => {
//!             println!("{} {} = {:?}", obs.sequence(), obs.data_item_id(), obs.result());
//!         }
//!         ClientEvent::ConnectionError(e) => eprintln!("connection: {}", e),
//!         _ => {}
//!     }
//! }
//! ```

mod asset_watcher;
mod cache;
mod client;
mod config;
mod error;
mod event;
mod gateway;
pub mod logging;
mod position;
mod resolver;
mod supervisor;
mod types;

pub use asset_watcher::changed_asset_ids;
pub use cache::MetadataCache;
pub use client::AgentClient;
pub use config::{ClientConfig, PollingMode};
pub use error::{ClientError, ErrorKind, GatewayError, GatewayResult, Result};
pub use event::ClientEvent;
pub use gateway::{
    AssetsRequest, CurrentRequest, ProbeRequest, RequestGateway, SampleRequest, StreamRequest,
    StreamSession,
};
pub use position::{ConsumerPosition, PositionTracker, ResumeMode};
pub use resolver::ObservationResolver;
pub use supervisor::SupervisorState;
pub use types::*;
