//! Document and metadata types exchanged with an agent.
//!
//! These are the parsed shapes the core works with. How they are produced from
//! the wire is up to the [`RequestGateway`](crate::RequestGateway) implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observation type the agent uses to announce an added or modified asset.
pub const ASSET_CHANGED: &str = "ASSET_CHANGED";

/// Observation type the agent uses to announce a removed asset.
pub const ASSET_REMOVED: &str = "ASSET_REMOVED";

/// Value an agent reports when a data item has no known value.
pub const UNAVAILABLE: &str = "UNAVAILABLE";

/// Key of the primary value in [`RawObservation::values`].
pub const RESULT_KEY: &str = "Result";

/// Header carried by every probe, current and sample response.
///
/// Sequence numbers are only comparable between headers that share the same
/// `instance_id`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Header {
    pub instance_id: u64,
    pub first_sequence: u64,
    pub next_sequence: u64,
    pub asset_count: u32,
    #[serde(default)]
    pub creation_time: Option<DateTime<Utc>>,
}

impl Header {
    pub fn new(instance_id: u64, first_sequence: u64, next_sequence: u64) -> Self {
        Self {
            instance_id,
            first_sequence,
            next_sequence,
            asset_count: 0,
            creation_time: None,
        }
    }

    pub fn with_asset_count(mut self, asset_count: u32) -> Self {
        self.asset_count = asset_count;
        self
    }

    /// Whether `sequence` is still retained in the agent's buffer.
    pub fn contains(&self, sequence: u64) -> bool {
        sequence >= self.first_sequence && sequence <= self.next_sequence
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "instance {} [{}..{}]",
            self.instance_id, self.first_sequence, self.next_sequence
        )
    }
}

/// Category of a data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataItemCategory {
    Sample,
    #[default]
    Event,
    Condition,
}

/// How an observation's value is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Representation {
    #[default]
    Value,
    DataSet,
    Table,
    TimeSeries,
}

/// Metadata for a single data item as reported by a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItemDescriptor {
    pub id: String,
    pub category: DataItemCategory,
    #[serde(rename = "type")]
    pub data_item_type: String,
    #[serde(default)]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Id of the component the data item belongs to.
    #[serde(default)]
    pub component_id: Option<String>,
}

impl DataItemDescriptor {
    pub fn new(id: impl Into<String>, category: DataItemCategory, data_item_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category,
            data_item_type: data_item_type.into(),
            sub_type: None,
            name: None,
            component_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = Some(component_id.into());
        self
    }
}

/// A component of a device. Components are flattened; `parent_id` keeps the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl ComponentDescriptor {
    pub fn new(id: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            component_type: component_type.into(),
            name: None,
            parent_id: None,
        }
    }
}

/// A device with all of its components and data items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub components: Vec<ComponentDescriptor>,
    #[serde(default)]
    pub data_items: Vec<DataItemDescriptor>,
}

impl DeviceDescriptor {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            components: Vec::new(),
            data_items: Vec::new(),
        }
    }

    pub fn with_component(mut self, component: ComponentDescriptor) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_data_item(mut self, data_item: DataItemDescriptor) -> Self {
        self.data_items.push(data_item);
        self
    }
}

/// One keyed value of an observation. Plain values use [`RESULT_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationValue {
    pub key: String,
    pub value: String,
}

/// An observation as it arrives in a current or sample document, before it is
/// matched against metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub device_uuid: String,
    #[serde(default)]
    pub component_id: Option<String>,
    pub data_item_id: String,
    #[serde(default)]
    pub composition_id: Option<String>,
    pub category: DataItemCategory,
    #[serde(default)]
    pub representation: Representation,
    #[serde(rename = "type")]
    pub observation_type: String,
    #[serde(default)]
    pub sub_type: Option<String>,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub values: Vec<ObservationValue>,
}

impl RawObservation {
    /// Build a single-valued observation.
    pub fn new(
        device_uuid: impl Into<String>,
        data_item_id: impl Into<String>,
        observation_type: impl Into<String>,
        sequence: u64,
        result: impl Into<String>,
    ) -> Self {
        Self {
            device_uuid: device_uuid.into(),
            component_id: None,
            data_item_id: data_item_id.into(),
            composition_id: None,
            category: DataItemCategory::Event,
            representation: Representation::Value,
            observation_type: observation_type.into(),
            sub_type: None,
            sequence,
            timestamp: Utc::now(),
            values: vec![ObservationValue {
                key: RESULT_KEY.to_string(),
                value: result.into(),
            }],
        }
    }

    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = Some(component_id.into());
        self
    }

    pub fn with_category(mut self, category: DataItemCategory) -> Self {
        self.category = category;
        self
    }

    /// The primary value, if any.
    pub fn result(&self) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.key == RESULT_KEY)
            .map(|v| v.value.as_str())
    }

    pub fn is_unavailable(&self) -> bool {
        self.result() == Some(UNAVAILABLE)
    }
}

/// An observation bound to the metadata it was resolved against.
///
/// The descriptors are copies taken at resolution time, so a batch never keeps
/// the cache alive and a later probe never changes an already delivered
/// observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub raw: RawObservation,
    pub data_item: DataItemDescriptor,
    pub component: Option<ComponentDescriptor>,
}

impl Observation {
    pub fn sequence(&self) -> u64 {
        self.raw.sequence
    }

    pub fn device_uuid(&self) -> &str {
        &self.raw.device_uuid
    }

    pub fn data_item_id(&self) -> &str {
        &self.raw.data_item_id
    }

    pub fn result(&self) -> Option<&str> {
        self.raw.result()
    }
}

/// A named document fetched independently of the observation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub asset_id: String,
    #[serde(rename = "type")]
    pub asset_type: String,
    #[serde(default)]
    pub device_uuid: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub content: String,
}

impl Asset {
    pub fn new(asset_id: impl Into<String>, asset_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            asset_type: asset_type.into(),
            device_uuid: None,
            timestamp: None,
            content: content.into(),
        }
    }
}

/// Response to a probe request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeDocument {
    pub header: Header,
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
}

/// Response to a current or sample request, and each document of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamsDocument {
    pub header: Header,
    #[serde(default)]
    pub observations: Vec<RawObservation>,
}

impl StreamsDocument {
    /// Highest sequence number in the batch.
    pub fn max_sequence(&self) -> Option<u64> {
        self.observations.iter().map(|o| o.sequence).max()
    }
}

/// Response to an assets or asset-by-id request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetsDocument {
    pub instance_id: u64,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// One entry of an error document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolErrorEntry {
    pub code: String,
    pub message: String,
}

/// Well-formed error document returned instead of the expected response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorDocument {
    #[serde(default)]
    pub instance_id: Option<u64>,
    #[serde(default)]
    pub errors: Vec<ProtocolErrorEntry>,
}

impl ErrorDocument {
    pub fn single(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            instance_id: None,
            errors: vec![ProtocolErrorEntry {
                code: code.into(),
                message: message.into(),
            }],
        }
    }
}

impl fmt::Display for ErrorDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for entry in &self.errors {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", entry.code, entry.message)?;
            first = false;
        }
        if first {
            write!(f, "empty error document")?;
        }
        Ok(())
    }
}
