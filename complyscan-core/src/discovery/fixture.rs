//! Offline cloud backed by an inventory document.
//!
//! ```json
//! {
//!   "regions": {
//!     "us-east-1": {
//!       "ec2": {
//!         "DescribeInstances": { "pages": [
//!           { "Reservations": [], "NextToken": "1" },
//!           { "Reservations": [] }
//!         ] },
//!         "DescribeVolumes": { "Volumes": [] }
//!       },
//!       "s3": {
//!         "GetBucketLocation": { "key": "Bucket", "responses": {
//!           "logs": { "LocationConstraint": "eu-west-1" }
//!         } }
//!       }
//!     }
//!   },
//!   "failures": [ { "region": "eu-west-1", "service": "rds", "message": "AccessDenied" } ]
//! }
//! ```
//!
//! Paged responses use the page index as continuation token. Operations the
//! inventory does not mention answer with an empty object.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::trace;

use super::client::{CloudClient, CloudClientFactory};
use crate::error::{Result, ScanError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixtureResponse {
    Paged { pages: Vec<Value> },
    Keyed {
        key: String,
        responses: BTreeMap<String, Value>,
    },
    Single(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureFailure {
    #[serde(default)]
    pub region: Option<String>,
    pub service: String,
    #[serde(default)]
    pub operation: Option<String>,
    pub message: String,
}

impl FixtureFailure {
    fn applies(&self, region: &str, service: &str, operation: &str) -> bool {
        self.service == service
            && self.region.as_deref().is_none_or(|r| r == region)
            && self.operation.as_deref().is_none_or(|o| o == operation)
    }
}

type ServiceResponses = BTreeMap<String, FixtureResponse>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureInventory {
    /// region -> service -> operation -> response
    #[serde(default)]
    pub regions: BTreeMap<String, BTreeMap<String, ServiceResponses>>,
    #[serde(default)]
    pub failures: Vec<FixtureFailure>,
}

/// [`CloudClientFactory`] answering from a [`FixtureInventory`].
#[derive(Clone)]
pub struct FixtureCloud {
    inventory: Arc<FixtureInventory>,
    calls: Arc<AtomicUsize>,
}

impl fmt::Debug for FixtureCloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureCloud")
            .field("regions", &self.inventory.regions.len())
            .field("failures", &self.inventory.failures.len())
            .field("calls", &self.calls())
            .finish()
    }
}

impl FixtureCloud {
    pub fn new(inventory: FixtureInventory) -> Self {
        Self {
            inventory: Arc::new(inventory),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(Self::new(serde_json::from_value(value)?))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::new(serde_json::from_str(&raw)?))
    }

    /// Number of `call`s served so far, across all clients.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CloudClientFactory for FixtureCloud {
    async fn client(
        &self,
        account_id: &str,
        region: &str,
    ) -> Result<Arc<dyn CloudClient>> {
        Ok(Arc::new(FixtureClient {
            inventory: Arc::clone(&self.inventory),
            calls: Arc::clone(&self.calls),
            account_id: account_id.to_string(),
            region: region.to_string(),
        }))
    }
}

struct FixtureClient {
    inventory: Arc<FixtureInventory>,
    calls: Arc<AtomicUsize>,
    account_id: String,
    region: String,
}

const TOKEN_KEYS: [&str; 3] = ["NextToken", "Marker", "ExclusiveStartTableName"];

#[async_trait]
impl CloudClient for FixtureClient {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn call(
        &self,
        service: &str,
        operation: &str,
        params: Value,
    ) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        trace!(
            target: "scan::discovery",
            region = %self.region,
            service,
            operation,
            "fixture call"
        );

        if let Some(failure) = self
            .inventory
            .failures
            .iter()
            .find(|f| f.applies(&self.region, service, operation))
        {
            return Err(ScanError::cloud(service, operation, &failure.message));
        }

        let response = self
            .inventory
            .regions
            .get(&self.region)
            .and_then(|services| services.get(service))
            .and_then(|operations| operations.get(operation));

        match response {
            None => Ok(json!({})),
            Some(FixtureResponse::Single(value)) => Ok(value.clone()),
            Some(FixtureResponse::Paged { pages }) => {
                let index = TOKEN_KEYS
                    .iter()
                    .find_map(|key| params.get(*key).and_then(Value::as_str))
                    .map(|token| {
                        token.parse::<usize>().map_err(|_| {
                            ScanError::cloud(
                                service,
                                operation,
                                format!("invalid pagination token {token}"),
                            )
                        })
                    })
                    .transpose()?
                    .unwrap_or(0);
                pages.get(index).cloned().ok_or_else(|| {
                    ScanError::cloud(service, operation, "page out of range")
                })
            }
            Some(FixtureResponse::Keyed { key, responses }) => {
                let wanted = params.get(key).and_then(Value::as_str).ok_or_else(
                    || {
                        ScanError::cloud(
                            service,
                            operation,
                            format!("missing parameter {key}"),
                        )
                    },
                )?;
                responses.get(wanted).cloned().ok_or_else(|| {
                    ScanError::cloud(
                        service,
                        operation,
                        format!("NoSuchEntity: {wanted}"),
                    )
                })
            }
        }
    }
}
