use async_trait::async_trait;
use complyscan_model::CloudResource;
use serde_json::{Value, json};
use tracing::warn;

use super::{arn, optional, tags_from_list};
use crate::discovery::client::{CloudClient, Pagination, collect_items, paginate};
use crate::discovery::registry::ResourceCollector;
use crate::error::Result;

const SERVICE: &str = "dynamodb";
const TABLE: &str = "AWS::DynamoDB::Table";

#[derive(Debug, Clone, Copy, Default)]
pub struct DynamoDbCollector;

#[async_trait]
impl ResourceCollector for DynamoDbCollector {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn discover_regional(&self, client: &dyn CloudClient) -> Result<Vec<CloudResource>> {
        let pages = paginate(
            client,
            SERVICE,
            "ListTables",
            json!({}),
            Pagination::TABLE_NAME,
        )
        .await?;

        let mut resources = Vec::new();
        for name in collect_items(pages, "TableNames") {
            let Some(name) = name.as_str().map(str::to_string) else {
                continue;
            };
            let described = match client
                .call(SERVICE, "DescribeTable", json!({ "TableName": name }))
                .await
            {
                Ok(described) => described,
                Err(err) => {
                    warn!(
                        target: "scan::discovery",
                        region = %client.region(),
                        table = %name,
                        error = %err,
                        "skipping table that could not be described"
                    );
                    continue;
                }
            };
            let table = described.get("Table").cloned().unwrap_or(Value::Null);
            let identifier = table
                .get("TableArn")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    arn(
                        SERVICE,
                        client.region(),
                        client.account_id(),
                        &format!("table/{name}"),
                    )
                });
            let tags = optional(
                client,
                SERVICE,
                "ListTagsOfResource",
                json!({ "ResourceArn": identifier }),
            )
            .await;
            let metadata = json!({
                "status": table.get("TableStatus"),
                "billingMode": table.pointer("/BillingModeSummary/BillingMode"),
                "sseStatus": table.pointer("/SSEDescription/Status"),
                "sseType": table.pointer("/SSEDescription/SSEType"),
                "kmsKeyArn": table.pointer("/SSEDescription/KMSMasterKeyArn"),
                "itemCount": table.get("ItemCount"),
                "deletionProtection": table.get("DeletionProtectionEnabled"),
                "streamEnabled": table.pointer("/StreamSpecification/StreamEnabled"),
            });
            resources.push(
                CloudResource::new(
                    SERVICE,
                    TABLE,
                    identifier,
                    name,
                    client.account_id(),
                    client.region(),
                )
                .with_tags(tags_from_list(tags.get("Tags")))
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
        let table = json!({ "TableName": resource.name });
        let backups =
            optional(client, SERVICE, "DescribeContinuousBackups", table.clone()).await;
        Ok(json!({
            "continuousBackups": backups
                .get("ContinuousBackupsDescription")
                .cloned()
                .unwrap_or(Value::Null),
            "timeToLive": optional(client, SERVICE, "DescribeTimeToLive", table).await,
        }))
    }
}
