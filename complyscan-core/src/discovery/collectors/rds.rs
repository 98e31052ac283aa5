use async_trait::async_trait;
use complyscan_model::CloudResource;
use serde_json::{Value, json};

use super::{arn, bool_field, optional, str_field, tags_from_list};
use crate::discovery::client::{CloudClient, Pagination, collect_items, paginate};
use crate::discovery::registry::ResourceCollector;
use crate::error::Result;

const SERVICE: &str = "rds";
const DB_INSTANCE: &str = "AWS::RDS::DBInstance";

#[derive(Debug, Clone, Copy, Default)]
pub struct RdsCollector;

#[async_trait]
impl ResourceCollector for RdsCollector {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn discover_regional(&self, client: &dyn CloudClient) -> Result<Vec<CloudResource>> {
        let pages = paginate(
            client,
            SERVICE,
            "DescribeDBInstances",
            json!({}),
            Pagination::MARKER,
        )
        .await?;

        Ok(collect_items(pages, "DBInstances")
            .into_iter()
            .filter_map(|db| {
                let id = str_field(&db, "DBInstanceIdentifier")?.to_string();
                let identifier = str_field(&db, "DBInstanceArn")
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        arn(
                            SERVICE,
                            client.region(),
                            client.account_id(),
                            &format!("db:{id}"),
                        )
                    });
                let tags = tags_from_list(db.get("TagList"));
                let parameter_groups: Vec<Value> = db
                    .get("DBParameterGroups")
                    .and_then(Value::as_array)
                    .map(|groups| {
                        groups
                            .iter()
                            .filter_map(|g| g.get("DBParameterGroupName").cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                let metadata = json!({
                    "engine": db.get("Engine"),
                    "engineVersion": db.get("EngineVersion"),
                    "instanceClass": db.get("DBInstanceClass"),
                    "storageEncrypted": bool_field(&db, "StorageEncrypted"),
                    "publiclyAccessible": bool_field(&db, "PubliclyAccessible"),
                    "multiAz": db.get("MultiAZ"),
                    "backupRetentionPeriod": db.get("BackupRetentionPeriod"),
                    "deletionProtection": db.get("DeletionProtection"),
                    "autoMinorVersionUpgrade": db.get("AutoMinorVersionUpgrade"),
                    "parameterGroups": parameter_groups,
                    "subnetGroup": db.pointer("/DBSubnetGroup/DBSubnetGroupName"),
                });
                Some(
                    CloudResource::new(
                        SERVICE,
                        DB_INSTANCE,
                        identifier,
                        id,
                        client.account_id(),
                        client.region(),
                    )
                    .with_tags(tags)
                    .with_metadata(metadata),
                )
            })
            .collect())
    }

    async fn get_configuration(
        &self,
        client: &dyn CloudClient,
        resource: &CloudResource,
    ) -> Result<Value> {
        let mut parameters = serde_json::Map::new();
        let groups = resource
            .metadata
            .get("parameterGroups")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for group in groups.iter().filter_map(Value::as_str) {
            let response = optional(
                client,
                SERVICE,
                "DescribeDBParameters",
                json!({ "DBParameterGroupName": group }),
            )
            .await;
            parameters.insert(
                group.to_string(),
                response.get("Parameters").cloned().unwrap_or(Value::Null),
            );
        }

        let subnet_group = match resource.metadata.get("subnetGroup").and_then(Value::as_str) {
            Some(name) => optional(
                client,
                SERVICE,
                "DescribeDBSubnetGroups",
                json!({ "DBSubnetGroupName": name }),
            )
            .await
            .pointer("/DBSubnetGroups/0")
            .cloned()
            .unwrap_or(Value::Null),
            None => Value::Null,
        };

        Ok(json!({
            "parameters": parameters,
            "subnetGroup": subnet_group,
        }))
    }
}
