use async_trait::async_trait;
use complyscan_model::CloudResource;
use serde_json::{Value, json};

use super::{arn, bool_field, optional, str_field};
use crate::discovery::client::{CloudClient, collect_items};
use crate::discovery::registry::ResourceCollector;
use crate::error::Result;

const SERVICE: &str = "cloudtrail";
const TRAIL: &str = "AWS::CloudTrail::Trail";

/// Trails, attributed to their home region. Multi-region trails show up in
/// every region's listing but are only collected once.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudTrailCollector;

#[async_trait]
impl ResourceCollector for CloudTrailCollector {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn discover_regional(&self, client: &dyn CloudClient) -> Result<Vec<CloudResource>> {
        let listing = client.call(SERVICE, "DescribeTrails", json!({})).await?;

        Ok(collect_items(vec![listing], "trailList")
            .into_iter()
            .filter(|trail| {
                str_field(trail, "HomeRegion").is_none_or(|home| home == client.region())
            })
            .filter_map(|trail| {
                let name = str_field(&trail, "Name")?.to_string();
                let identifier = str_field(&trail, "TrailARN")
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        arn(
                            SERVICE,
                            client.region(),
                            client.account_id(),
                            &format!("trail/{name}"),
                        )
                    });
                let metadata = json!({
                    "isMultiRegionTrail": bool_field(&trail, "IsMultiRegionTrail"),
                    "logFileValidationEnabled": bool_field(&trail, "LogFileValidationEnabled"),
                    "includeGlobalServiceEvents": trail.get("IncludeGlobalServiceEvents"),
                    "isOrganizationTrail": trail.get("IsOrganizationTrail"),
                    "kmsKeyId": trail.get("KmsKeyId"),
                    "s3BucketName": trail.get("S3BucketName"),
                    "cloudWatchLogsLogGroupArn": trail.get("CloudWatchLogsLogGroupArn"),
                });
                Some(
                    CloudResource::new(
                        SERVICE,
                        TRAIL,
                        identifier,
                        name,
                        client.account_id(),
                        client.region(),
                    )
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
        let trail = json!({ "Name": resource.identifier });
        Ok(json!({
            "status": optional(client, SERVICE, "GetTrailStatus", trail.clone()).await,
            "eventSelectors": optional(client, SERVICE, "GetEventSelectors", trail).await,
        }))
    }
}
