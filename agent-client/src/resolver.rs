//! Binding raw observations to cached metadata

use std::sync::Arc;

use crate::cache::MetadataCache;
use crate::types::{Observation, RawObservation};

/// Resolves raw observations against the [`MetadataCache`].
///
/// An observation whose data item is unknown is dropped without an error;
/// metadata missing from the last probe means the item is not of interest.
/// When a target device is set, observations of every other device are
/// dropped the same way.
#[derive(Debug, Clone)]
pub struct ObservationResolver {
    cache: Arc<MetadataCache>,
    target_device: Option<String>,
}

impl ObservationResolver {
    pub fn new(cache: Arc<MetadataCache>, target_device: Option<String>) -> Self {
        Self {
            cache,
            target_device,
        }
    }

    pub fn resolve(&self, raw: &RawObservation) -> Option<Observation> {
        if let Some(target) = &self.target_device {
            if raw.device_uuid != *target {
                return None;
            }
        }

        let Some(data_item) = self.cache.resolve_data_item(&raw.device_uuid, &raw.data_item_id) else {
            tracing::trace!(
                "Dropping observation {} of unknown data item {}/{}",
                raw.sequence,
                raw.device_uuid,
                raw.data_item_id
            );
            return None;
        };

        let component = raw
            .component_id
            .as_deref()
            .or(data_item.component_id.as_deref())
            .and_then(|id| self.cache.resolve_component(&raw.device_uuid, id));

        Some(Observation {
            raw: raw.clone(),
            data_item,
            component,
        })
    }

    /// Resolve a batch, keeping arrival order.
    pub fn resolve_all(&self, raw: &[RawObservation]) -> Vec<Observation> {
        let resolved: Vec<Observation> = raw.iter().filter_map(|r| self.resolve(r)).collect();
        if resolved.len() != raw.len() {
            tracing::debug!(
                "Resolved {} of {} observations",
                resolved.len(),
                raw.len()
            );
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComponentDescriptor, DataItemCategory, DataItemDescriptor, DeviceDescriptor};

    fn cache() -> Arc<MetadataCache> {
        let cache = Arc::new(MetadataCache::new());
        cache.update(&[
            DeviceDescriptor::new("mill", "Mill")
                .with_component(ComponentDescriptor::new("x", "Linear"))
                .with_data_item(
                    DataItemDescriptor::new("xpos", DataItemCategory::Sample, "POSITION")
                        .with_component("x"),
                ),
            DeviceDescriptor::new("lathe", "Lathe").with_data_item(DataItemDescriptor::new(
                "exec",
                DataItemCategory::Event,
                "EXECUTION",
            )),
        ]);
        cache
    }

    #[test]
    fn test_resolves_data_item_and_component() {
        let resolver = ObservationResolver::new(cache(), None);
        let raw = RawObservation::new("mill", "xpos", "POSITION", 12, "10.5");

        let observation = resolver.resolve(&raw).unwrap();
        assert_eq!(observation.data_item.data_item_type, "POSITION");
        assert_eq!(observation.component.as_ref().unwrap().component_type, "Linear");
        assert_eq!(observation.sequence(), 12);
        assert_eq!(observation.result(), Some("10.5"));
    }

    #[test]
    fn test_drop_on_miss() {
        let resolver = ObservationResolver::new(cache(), None);
        let raw = RawObservation::new("mill", "unknown", "POSITION", 13, "1");
        assert!(resolver.resolve(&raw).is_none());

        let raw = RawObservation::new("unknown-device", "xpos", "POSITION", 14, "1");
        assert!(resolver.resolve(&raw).is_none());
    }

    #[test]
    fn test_target_device_filter() {
        let resolver = ObservationResolver::new(cache(), Some("lathe".to_string()));
        let batch = vec![
            RawObservation::new("mill", "xpos", "POSITION", 1, "1"),
            RawObservation::new("lathe", "exec", "EXECUTION", 2, "ACTIVE"),
        ];

        let resolved = resolver.resolve_all(&batch);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].device_uuid(), "lathe");
    }

    #[test]
    fn test_resolve_all_keeps_order() {
        let resolver = ObservationResolver::new(cache(), None);
        let batch = vec![
            RawObservation::new("lathe", "exec", "EXECUTION", 5, "READY"),
            RawObservation::new("mill", "nope", "X", 6, "1"),
            RawObservation::new("mill", "xpos", "POSITION", 7, "2"),
        ];

        let sequences: Vec<u64> = resolver.resolve_all(&batch).iter().map(|o| o.sequence()).collect();
        assert_eq!(sequences, vec![5, 7]);
    }
}
