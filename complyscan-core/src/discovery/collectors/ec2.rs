use async_trait::async_trait;
use complyscan_model::CloudResource;
use serde_json::{Value, json};

use super::{arn, bool_field, display_name, merge_listings, optional, str_field, tags_from_list};
use crate::discovery::client::{CloudClient, Pagination, collect_items, paginate};
use crate::discovery::registry::ResourceCollector;
use crate::error::Result;

const SERVICE: &str = "ec2";
const INSTANCE: &str = "AWS::EC2::Instance";
const SECURITY_GROUP: &str = "AWS::EC2::SecurityGroup";
const VOLUME: &str = "AWS::EC2::Volume";

/// Instances, security groups and EBS volumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ec2Collector;

impl Ec2Collector {
    async fn instances(&self, client: &dyn CloudClient) -> Result<Vec<CloudResource>> {
        let pages = paginate(
            client,
            SERVICE,
            "DescribeInstances",
            json!({}),
            Pagination::NEXT_TOKEN,
        )
        .await?;
        let instances = collect_items(pages, "Reservations")
            .into_iter()
            .flat_map(|mut reservation| {
                match reservation.get_mut("Instances").map(Value::take) {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                }
            });

        Ok(instances
            .filter_map(|instance| {
                let id = str_field(&instance, "InstanceId")?.to_string();
                // Terminated instances linger in listings for an hour.
                let state = instance.pointer("/State/Name").and_then(Value::as_str);
                if state == Some("terminated") {
                    return None;
                }
                let tags = tags_from_list(instance.get("Tags"));
                let metadata = json!({
                    "instanceType": instance.get("InstanceType"),
                    "state": instance.pointer("/State/Name"),
                    "vpcId": instance.get("VpcId"),
                    "subnetId": instance.get("SubnetId"),
                    "publicIpAddress": instance.get("PublicIpAddress"),
                    "iamInstanceProfile": instance.pointer("/IamInstanceProfile/Arn"),
                    "securityGroups": instance.get("SecurityGroups"),
                    "metadataOptions": instance.get("MetadataOptions"),
                    "monitoring": instance.pointer("/Monitoring/State"),
                });
                Some(
                    CloudResource::new(
                        SERVICE,
                        INSTANCE,
                        arn(
                            SERVICE,
                            client.region(),
                            client.account_id(),
                            &format!("instance/{id}"),
                        ),
                        display_name(&tags, &id),
                        client.account_id(),
                        client.region(),
                    )
                    .with_tags(tags)
                    .with_metadata(metadata),
                )
            })
            .collect())
    }

    async fn security_groups(&self, client: &dyn CloudClient) -> Result<Vec<CloudResource>> {
        let pages = paginate(
            client,
            SERVICE,
            "DescribeSecurityGroups",
            json!({}),
            Pagination::NEXT_TOKEN,
        )
        .await?;
        Ok(collect_items(pages, "SecurityGroups")
            .into_iter()
            .filter_map(|group| {
                let id = str_field(&group, "GroupId")?.to_string();
                let name = str_field(&group, "GroupName")
                    .unwrap_or(id.as_str())
                    .to_string();
                let tags = tags_from_list(group.get("Tags"));
                let metadata = json!({
                    "groupName": name,
                    "description": group.get("Description"),
                    "vpcId": group.get("VpcId"),
                    "ipPermissions": group.get("IpPermissions"),
                    "ipPermissionsEgress": group.get("IpPermissionsEgress"),
                });
                Some(
                    CloudResource::new(
                        SERVICE,
                        SECURITY_GROUP,
                        arn(
                            SERVICE,
                            client.region(),
                            client.account_id(),
                            &format!("security-group/{id}"),
                        ),
                        name,
                        client.account_id(),
                        client.region(),
                    )
                    .with_tags(tags)
                    .with_metadata(metadata),
                )
            })
            .collect())
    }

    async fn volumes(&self, client: &dyn CloudClient) -> Result<Vec<CloudResource>> {
        let pages = paginate(
            client,
            SERVICE,
            "DescribeVolumes",
            json!({}),
            Pagination::NEXT_TOKEN,
        )
        .await?;
        Ok(collect_items(pages, "Volumes")
            .into_iter()
            .filter_map(|volume| {
                let id = str_field(&volume, "VolumeId")?.to_string();
                let tags = tags_from_list(volume.get("Tags"));
                let metadata = json!({
                    "encrypted": bool_field(&volume, "Encrypted"),
                    "kmsKeyId": volume.get("KmsKeyId"),
                    "size": volume.get("Size"),
                    "volumeType": volume.get("VolumeType"),
                    "state": volume.get("State"),
                    "attachments": volume.get("Attachments"),
                });
                Some(
                    CloudResource::new(
                        SERVICE,
                        VOLUME,
                        arn(
                            SERVICE,
                            client.region(),
                            client.account_id(),
                            &format!("volume/{id}"),
                        ),
                        display_name(&tags, &id),
                        client.account_id(),
                        client.region(),
                    )
                    .with_tags(tags)
                    .with_metadata(metadata),
                )
            })
            .collect())
    }
}

/// Trailing id of `arn:...:kind/id`.
fn resource_id(resource: &CloudResource) -> &str {
    resource
        .identifier
        .rsplit_once('/')
        .map_or(resource.identifier.as_str(), |(_, id)| id)
}

#[async_trait]
impl ResourceCollector for Ec2Collector {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn discover_regional(&self, client: &dyn CloudClient) -> Result<Vec<CloudResource>> {
        let listings = vec![
            ("DescribeInstances", self.instances(client).await),
            ("DescribeSecurityGroups", self.security_groups(client).await),
            ("DescribeVolumes", self.volumes(client).await),
        ];
        merge_listings(client, listings)
    }

    async fn get_configuration(
        &self,
        client: &dyn CloudClient,
        resource: &CloudResource,
    ) -> Result<Value> {
        let id = resource_id(resource);
        Ok(match resource.resource_type.as_str() {
            INSTANCE => json!({
                "disableApiTermination": optional(
                    client,
                    SERVICE,
                    "DescribeInstanceAttribute",
                    json!({ "InstanceId": id, "Attribute": "disableApiTermination" }),
                )
                .await,
                "iamInstanceProfileAssociations": optional(
                    client,
                    SERVICE,
                    "DescribeIamInstanceProfileAssociations",
                    json!({ "Filters": [{ "Name": "instance-id", "Values": [id] }] }),
                )
                .await,
            }),
            SECURITY_GROUP => json!({
                "rules": optional(
                    client,
                    SERVICE,
                    "DescribeSecurityGroupRules",
                    json!({ "Filters": [{ "Name": "group-id", "Values": [id] }] }),
                )
                .await,
            }),
            VOLUME => json!({
                "snapshots": optional(
                    client,
                    SERVICE,
                    "DescribeSnapshots",
                    json!({ "Filters": [{ "Name": "volume-id", "Values": [id] }] }),
                )
                .await,
            }),
            _ => Value::Null,
        })
    }
}
