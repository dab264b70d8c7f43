//! Out-of-band asset refresh
//!
//! Agents announce asset changes in the observation log with an
//! `ASSET_CHANGED` observation whose value is the asset id. The watcher picks
//! those out of every batch and fetches each asset on its own task so the
//! batch loop never waits on it.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::event::{ClientEvent, EventEmitter};
use crate::gateway::{bounded_call, RequestGateway};
use crate::types::{Observation, ASSET_CHANGED};

/// Ids of the assets announced as changed in `observations`, in batch order.
///
/// `UNAVAILABLE` values and `ASSET_REMOVED` observations are skipped.
pub fn changed_asset_ids(observations: &[Observation]) -> Vec<String> {
    observations
        .iter()
        .filter(|o| o.raw.observation_type == ASSET_CHANGED)
        .filter(|o| !o.raw.is_unavailable())
        .filter_map(|o| o.result())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Spawns one supervised fetch per changed asset.
pub(crate) struct AssetChangeWatcher {
    gateway: Arc<dyn RequestGateway>,
    emitter: EventEmitter,
    cancel: CancellationToken,
    request_timeout: Duration,
}

impl AssetChangeWatcher {
    pub fn new(
        gateway: Arc<dyn RequestGateway>,
        emitter: EventEmitter,
        cancel: CancellationToken,
        request_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            emitter,
            cancel,
            request_timeout,
        }
    }

    /// Start a fetch for every changed asset in the batch. Returns the number
    /// of fetches started.
    pub fn scan(&self, observations: &[Observation]) -> usize {
        let ids = changed_asset_ids(observations);
        for asset_id in &ids {
            self.spawn_fetch(asset_id.clone());
        }
        ids.len()
    }

    fn spawn_fetch(&self, asset_id: String) {
        tracing::debug!("Asset {} changed, fetching", asset_id);

        let gateway = Arc::clone(&self.gateway);
        let emitter = self.emitter.clone();
        let cancel = self.cancel.child_token();
        let limit = self.request_timeout;
        let id = asset_id.clone();

        let fetch = tokio::spawn(async move {
            let Some(result) = bounded_call(&cancel, limit, gateway.asset(&id)).await else {
                tracing::debug!("Fetch of asset {} cancelled", id);
                return;
            };

            match result {
                Ok(document) => {
                    let assets = document.assets.clone();
                    emitter.emit(ClientEvent::AssetsReceived(Arc::new(document)));
                    for asset in assets {
                        emitter.emit(ClientEvent::AssetReceived(asset));
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch asset {}: {}", id, e);
                    emitter.emit(ClientEvent::from_error(e));
                }
            }
        });

        // A panic inside the fetch would otherwise vanish with the task.
        let emitter = self.emitter.clone();
        tokio::spawn(async move {
            if let Err(e) = fetch.await {
                if e.is_panic() {
                    tracing::error!("Fetch task for asset {} panicked", asset_id);
                    emitter.emit(ClientEvent::InternalError(format!(
                        "Asset fetch for {} panicked",
                        asset_id
                    )));
                }
            }
        });
    }
}
