use async_trait::async_trait;
use complyscan_model::CloudResource;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{optional, str_field, tags_from_list};
use crate::discovery::client::{CloudClient, collect_items};
use crate::discovery::registry::ResourceCollector;
use crate::error::Result;

const SERVICE: &str = "s3";
const BUCKET: &str = "AWS::S3::Bucket";

/// Buckets. The listing is account-wide, so each bucket is located and only
/// the ones living in the client's region are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Collector;

/// `GetBucketLocation` answers null/empty for us-east-1 and the legacy `EU`
/// alias for eu-west-1.
pub(crate) fn bucket_region(location: &Value) -> String {
    match location.get("LocationConstraint").and_then(Value::as_str) {
        None | Some("") => "us-east-1".to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(region) => region.to_string(),
    }
}

#[async_trait]
impl ResourceCollector for S3Collector {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn discover_regional(&self, client: &dyn CloudClient) -> Result<Vec<CloudResource>> {
        let listing = client.call(SERVICE, "ListBuckets", json!({})).await?;
        let mut resources = Vec::new();

        for bucket in collect_items(vec![listing], "Buckets") {
            let Some(name) = str_field(&bucket, "Name").map(str::to_string) else {
                continue;
            };
            let location = match client
                .call(SERVICE, "GetBucketLocation", json!({ "Bucket": name }))
                .await
            {
                Ok(location) => location,
                Err(err) => {
                    warn!(
                        target: "scan::discovery",
                        bucket = %name,
                        region = client.region(),
                        error = %err,
                        "skipping bucket that could not be located"
                    );
                    continue;
                }
            };
            let region = bucket_region(&location);
            if region != client.region() {
                debug!(
                    target: "scan::discovery",
                    bucket = %name,
                    bucket_region = %region,
                    region = client.region(),
                    "bucket skipped, lives in another region"
                );
                continue;
            }

            // Untagged buckets answer NoSuchTagSet.
            let tagging = optional(
                client,
                SERVICE,
                "GetBucketTagging",
                json!({ "Bucket": name }),
            )
            .await;
            let tags = tags_from_list(tagging.get("TagSet"));
            let metadata = json!({
                "creationDate": bucket.get("CreationDate"),
                "locationConstraint": location.get("LocationConstraint"),
            });
            resources.push(
                CloudResource::new(
                    SERVICE,
                    BUCKET,
                    format!("arn:aws:s3:::{name}"),
                    name,
                    client.account_id(),
                    region,
                )
                .with_tags(tags)
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
        let bucket = json!({ "Bucket": resource.name });
        let fetch = |operation: &'static str| optional(client, SERVICE, operation, bucket.clone());
        Ok(json!({
            "encryption": fetch("GetBucketEncryption").await,
            "versioning": fetch("GetBucketVersioning").await,
            "publicAccessBlock": fetch("GetPublicAccessBlock").await,
            "policy": super::embedded_policy(&fetch("GetBucketPolicy").await, "Policy"),
            "acl": fetch("GetBucketAcl").await,
            "logging": fetch("GetBucketLogging").await,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::client::CloudClientFactory;
    use crate::discovery::fixture::FixtureCloud;

    fn cloud() -> FixtureCloud {
        let s3 = json!({
            "ListBuckets": { "Buckets": [
                { "Name": "virginia" }, { "Name": "ireland" }, { "Name": "legacy-eu" }
            ] },
            "GetBucketLocation": { "key": "Bucket", "responses": {
                "virginia": { "LocationConstraint": null },
                "ireland": { "LocationConstraint": "eu-west-1" },
                "legacy-eu": { "LocationConstraint": "EU" }
            } },
            "GetBucketTagging": { "key": "Bucket", "responses": {
                "ireland": { "TagSet": [ { "Key": "team", "Value": "data" } ] }
            } },
            "GetBucketVersioning": { "key": "Bucket", "responses": {
                "ireland": { "Status": "Enabled" }
            } }
        });
        FixtureCloud::from_value(json!({ "regions": {
            "us-east-1": { "s3": s3.clone() },
            "eu-west-1": { "s3": s3 }
        } }))
        .unwrap()
    }

    #[tokio::test]
    async fn buckets_are_filtered_to_their_true_region() -> Result<()> {
        let cloud = cloud();
        let virginia = cloud.client("1", "us-east-1").await?;
        let names: Vec<String> = S3Collector
            .discover_regional(virginia.as_ref())
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["virginia"]);

        let ireland = cloud.client("1", "eu-west-1").await?;
        let buckets = S3Collector.discover_regional(ireland.as_ref()).await?;
        assert_eq!(buckets.len(), 2);
        assert!(buckets.iter().all(|b| b.region == "eu-west-1"));
        assert_eq!(buckets[0].tags["team"], "data");
        assert!(buckets[1].tags.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_sub_configuration_is_null() -> Result<()> {
        let cloud = cloud();
        let client = cloud.client("1", "eu-west-1").await?;
        let bucket = S3Collector
            .discover_regional(client.as_ref())
            .await?
            .remove(0);
        let config = S3Collector
            .get_configuration(client.as_ref(), &bucket)
            .await?;
        assert_eq!(config["versioning"]["Status"], "Enabled");
        // Unmentioned operations answer `{}`; keyed misses become null.
        assert_eq!(config["encryption"], json!({}));
        let legacy = S3Collector
            .discover_regional(client.as_ref())
            .await?
            .remove(1);
        let config = S3Collector
            .get_configuration(client.as_ref(), &legacy)
            .await?;
        assert_eq!(config["versioning"], Value::Null);
        Ok(())
    }

    #[tokio::test]
    async fn bucket_that_cannot_be_located_is_skipped() -> Result<()> {
        let cloud = FixtureCloud::from_value(json!({ "regions": { "eu-west-1": { "s3": {
            "ListBuckets": { "Buckets": [ { "Name": "gone" }, { "Name": "ireland" } ] },
            "GetBucketLocation": { "key": "Bucket", "responses": {
                "ireland": { "LocationConstraint": "eu-west-1" }
            } }
        } } } }))?;
        let client = cloud.client("1", "eu-west-1").await?;

        let buckets = S3Collector.discover_regional(client.as_ref()).await?;
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].name, "ireland");
        Ok(())
    }
}
