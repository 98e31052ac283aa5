use async_trait::async_trait;
use complyscan_model::CloudResource;
use serde_json::{Value, json};
use tracing::warn;

use super::{arn, embedded_policy, optional, str_field, tags_from_pairs};
use crate::discovery::client::{CloudClient, Pagination, collect_items, paginate};
use crate::discovery::registry::ResourceCollector;
use crate::error::Result;

const SERVICE: &str = "kms";
const KEY: &str = "AWS::KMS::Key";

/// Customer-managed keys. AWS-managed keys are outside the tenant's control
/// and are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct KmsCollector;

#[async_trait]
impl ResourceCollector for KmsCollector {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn discover_regional(&self, client: &dyn CloudClient) -> Result<Vec<CloudResource>> {
        let pages = paginate(
            client,
            SERVICE,
            "ListKeys",
            json!({}),
            Pagination::NEXT_MARKER,
        )
        .await?;

        let mut resources = Vec::new();
        for key in collect_items(pages, "Keys") {
            let Some(key_id) = str_field(&key, "KeyId").map(str::to_string) else {
                continue;
            };
            let described = match client
                .call(SERVICE, "DescribeKey", json!({ "KeyId": key_id }))
                .await
            {
                Ok(described) => described,
                Err(err) => {
                    warn!(
                        target: "scan::discovery",
                        region = %client.region(),
                        key = %key_id,
                        error = %err,
                        "skipping key that could not be described"
                    );
                    continue;
                }
            };
            let Some(meta) = described.get("KeyMetadata") else {
                continue;
            };
            if str_field(meta, "KeyManager") != Some("CUSTOMER") {
                continue;
            }
            let identifier = str_field(meta, "Arn")
                .or_else(|| str_field(&key, "KeyArn"))
                .map(str::to_string)
                .unwrap_or_else(|| {
                    arn(
                        SERVICE,
                        client.region(),
                        client.account_id(),
                        &format!("key/{key_id}"),
                    )
                });
            let tags = optional(
                client,
                SERVICE,
                "ListResourceTags",
                json!({ "KeyId": key_id }),
            )
            .await;
            let name = str_field(meta, "Description")
                .filter(|d| !d.is_empty())
                .unwrap_or(key_id.as_str())
                .to_string();
            let metadata = json!({
                "keyId": key_id,
                "keyState": meta.get("KeyState"),
                "keyUsage": meta.get("KeyUsage"),
                "keySpec": meta.get("KeySpec"),
                "origin": meta.get("Origin"),
                "multiRegion": meta.get("MultiRegion"),
                "creationDate": meta.get("CreationDate"),
            });
            resources.push(
                CloudResource::new(
                    SERVICE,
                    KEY,
                    identifier,
                    name,
                    client.account_id(),
                    client.region(),
                )
                .with_tags(tags_from_pairs(tags.get("Tags"), "TagKey", "TagValue"))
                .with_metadata(metadata),
            );
        }
        Ok(resources)
    }

    async fn get_configuration(
        &self,
        client: &dyn CloudClient,
        resource: &CloudResource,
    ) -> Result<Value> {
        let key_id = resource
            .metadata
            .get("keyId")
            .and_then(Value::as_str)
            .unwrap_or(resource.identifier.as_str())
            .to_string();
        let rotation = optional(
            client,
            SERVICE,
            "GetKeyRotationStatus",
            json!({ "KeyId": key_id }),
        )
        .await;
        let policy = optional(
            client,
            SERVICE,
            "GetKeyPolicy",
            json!({ "KeyId": key_id, "PolicyName": "default" }),
        )
        .await;
        Ok(json!({
            "rotationEnabled": rotation
                .get("KeyRotationEnabled")
                .cloned()
                .unwrap_or(Value::Null),
            "policy": embedded_policy(&policy, "Policy"),
        }))
    }
}
