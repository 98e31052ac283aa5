use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A cloud resource as seen by discovery. Lives only for the duration of a
/// scan unless a finding references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudResource {
    pub id: Uuid,
    pub resource_type: String,
    /// Provider-native identifier (ARN).
    pub identifier: String,
    pub name: String,
    pub account_id: String,
    pub region: String,
    pub service: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Service-specific configuration snapshot.
    #[serde(default)]
    pub metadata: Value,
}

impl CloudResource {
    pub fn new(
        service: impl Into<String>,
        resource_type: impl Into<String>,
        identifier: impl Into<String>,
        name: impl Into<String>,
        account_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        let identifier = identifier.into();
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_URL, identifier.as_bytes()),
            resource_type: resource_type.into(),
            identifier,
            name: name.into(),
            account_id: account_id.into(),
            region: region.into(),
            service: service.into(),
            tags: BTreeMap::new(),
            metadata: Value::Null,
        }
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Merge a deeper configuration document under `metadata.configuration`.
    pub fn attach_configuration(&mut self, configuration: Value) {
        match &mut self.metadata {
            Value::Object(map) => {
                map.insert("configuration".to_string(), configuration);
            }
            other => {
                let mut map = serde_json::Map::new();
                if !other.is_null() {
                    map.insert("snapshot".to_string(), other.take());
                }
                map.insert("configuration".to_string(), configuration);
                *other = Value::Object(map);
            }
        }
    }
}
