//! Built-in collectors, one per cloud service.

mod cloudtrail;
mod dynamodb;
mod ec2;
mod iam;
mod kms;
mod lambda;
mod rds;
mod s3;

pub use cloudtrail::CloudTrailCollector;
pub use dynamodb::DynamoDbCollector;
pub use ec2::Ec2Collector;
pub use iam::{GLOBAL_REGION, IamCollector};
pub use kms::KmsCollector;
pub use lambda::LambdaCollector;
pub use rds::RdsCollector;
pub use s3::S3Collector;

use std::collections::BTreeMap;

use complyscan_model::CloudResource;
use serde_json::Value;
use tracing::{debug, warn};

use super::client::CloudClient;
use crate::error::Result;

pub(crate) fn arn(
    service: &str,
    region: &str,
    account_id: &str,
    resource: &str,
) -> String {
    format!("arn:aws:{service}:{region}:{account_id}:{resource}")
}

/// `[{"Key": k, "Value": v}, ..]` as a map.
pub(crate) fn tags_from_list(
    value: Option<&Value>,
) -> BTreeMap<String, String> {
    tags_from_pairs(value, "Key", "Value")
}

/// Tag list whose entries name their fields `key_field` / `value_field`.
pub(crate) fn tags_from_pairs(
    value: Option<&Value>,
    key_field: &str,
    value_field: &str,
) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|tag| {
                    let key = tag.get(key_field)?.as_str()?;
                    let value = tag.get(value_field).and_then(Value::as_str).unwrap_or("");
                    Some((key.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `{"k": "v", ..}` as a map.
pub(crate) fn tags_from_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Boolean flag, absent meaning `false`.
pub(crate) fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Name tag if present, otherwise the fallback identifier.
pub(crate) fn display_name(tags: &BTreeMap<String, String>, fallback: &str) -> String {
    tags.get("Name")
        .filter(|n| !n.is_empty())
        .cloned()
        .unwrap_or_else(|| fallback.to_string())
}

/// Fetch an optional sub-document. Failures become `null`.
pub(crate) async fn optional(
    client: &dyn CloudClient,
    service: &str,
    operation: &str,
    params: Value,
) -> Value {
    match client.call(service, operation, params).await {
        Ok(value) => value,
        Err(err) => {
            debug!(
                target: "scan::discovery",
                region = client.region(),
                service,
                operation,
                error = %err,
                "sub-configuration unavailable"
            );
            Value::Null
        }
    }
}

/// Join listings of one service that can fail on their own. A failed listing
/// is logged and left out; the first error is returned only when every
/// listing failed, so the region still shows up as a coverage gap.
pub(crate) fn merge_listings(
    client: &dyn CloudClient,
    listings: Vec<(&str, Result<Vec<CloudResource>>)>,
) -> Result<Vec<CloudResource>> {
    let mut resources = Vec::new();
    let mut first_error = None;
    let mut succeeded = false;
    for (operation, listing) in listings {
        match listing {
            Ok(found) => {
                succeeded = true;
                resources.extend(found);
            }
            Err(err) => {
                warn!(
                    target: "scan::discovery",
                    region = client.region(),
                    operation,
                    error = %err,
                    "listing failed, keeping the others"
                );
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) if !succeeded => Err(err),
        _ => Ok(resources),
    }
}

/// Parse a policy document delivered as an embedded JSON string.
pub(crate) fn embedded_policy(value: &Value, key: &str) -> Value {
    match value.get(key) {
        Some(Value::String(raw)) => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
        }
        Some(other) => other.clone(),
        None => Value::Null,
    }
}
