use async_trait::async_trait;
use complyscan_model::CloudResource;
use serde_json::{Value, json};

use super::{merge_listings, optional, str_field, tags_from_list};
use crate::discovery::client::{CloudClient, Pagination, collect_items, paginate};
use crate::discovery::registry::{CollectorScope, ResourceCollector};
use crate::error::Result;

const SERVICE: &str = "iam";
const USER: &str = "AWS::IAM::User";
const ROLE: &str = "AWS::IAM::Role";
const PASSWORD_POLICY: &str = "AWS::IAM::AccountPasswordPolicy";

/// Region recorded on account-scoped resources.
pub const GLOBAL_REGION: &str = "global";

/// Users, roles and the account password policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct IamCollector;

impl IamCollector {
    async fn users(&self, client: &dyn CloudClient) -> Result<Vec<CloudResource>> {
        let pages =
            paginate(client, SERVICE, "ListUsers", json!({}), Pagination::MARKER).await?;
        Ok(collect_items(pages, "Users")
            .into_iter()
            .filter_map(|user| {
                let name = str_field(&user, "UserName")?.to_string();
                let identifier = str_field(&user, "Arn")
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        format!("arn:aws:iam::{}:user/{name}", client.account_id())
                    });
                let metadata = json!({
                    "userId": user.get("UserId"),
                    "createDate": user.get("CreateDate"),
                    "passwordLastUsed": user.get("PasswordLastUsed"),
                    "path": user.get("Path"),
                });
                Some(
                    CloudResource::new(
                        SERVICE,
                        USER,
                        identifier,
                        name,
                        client.account_id(),
                        GLOBAL_REGION,
                    )
                    .with_tags(tags_from_list(user.get("Tags")))
                    .with_metadata(metadata),
                )
            })
            .collect())
    }

    async fn roles(&self, client: &dyn CloudClient) -> Result<Vec<CloudResource>> {
        let pages =
            paginate(client, SERVICE, "ListRoles", json!({}), Pagination::MARKER).await?;
        Ok(collect_items(pages, "Roles")
            .into_iter()
            .filter_map(|role| {
                let name = str_field(&role, "RoleName")?.to_string();
                let identifier = str_field(&role, "Arn")
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        format!("arn:aws:iam::{}:role/{name}", client.account_id())
                    });
                let trust = super::embedded_policy(&role, "AssumeRolePolicyDocument");
                let metadata = json!({
                    "roleId": role.get("RoleId"),
                    "createDate": role.get("CreateDate"),
                    "path": role.get("Path"),
                    "maxSessionDuration": role.get("MaxSessionDuration"),
                    "assumeRolePolicyDocument": trust,
                });
                Some(
                    CloudResource::new(
                        SERVICE,
                        ROLE,
                        identifier,
                        name,
                        client.account_id(),
                        GLOBAL_REGION,
                    )
                    .with_tags(tags_from_list(role.get("Tags")))
                    .with_metadata(metadata),
                )
            })
            .collect())
    }

    /// Always one resource, so rules can flag an account without a policy.
    async fn password_policy(&self, client: &dyn CloudClient) -> CloudResource {
        let response = optional(client, SERVICE, "GetAccountPasswordPolicy", json!({})).await;
        let policy = response.get("PasswordPolicy").cloned().unwrap_or(Value::Null);
        let metadata = json!({
            "configured": !policy.is_null(),
            "passwordPolicy": policy,
        });
        CloudResource::new(
            SERVICE,
            PASSWORD_POLICY,
            format!("arn:aws:iam::{}:account-password-policy", client.account_id()),
            "account-password-policy",
            client.account_id(),
            GLOBAL_REGION,
        )
        .with_metadata(metadata)
    }
}

#[async_trait]
impl ResourceCollector for IamCollector {
    fn service(&self) -> &'static str {
        SERVICE
    }

    fn scope(&self) -> CollectorScope {
        CollectorScope::Global
    }

    async fn discover_regional(&self, client: &dyn CloudClient) -> Result<Vec<CloudResource>> {
        let listings = vec![
            ("ListUsers", self.users(client).await),
            ("ListRoles", self.roles(client).await),
        ];
        let mut resources = merge_listings(client, listings)?;
        resources.push(self.password_policy(client).await);
        Ok(resources)
    }

    async fn get_configuration(
        &self,
        client: &dyn CloudClient,
        resource: &CloudResource,
    ) -> Result<Value> {
        Ok(match resource.resource_type.as_str() {
            USER => {
                let user = json!({ "UserName": resource.name });
                let fetch =
                    |operation: &'static str| optional(client, SERVICE, operation, user.clone());
                json!({
                    "attachedPolicies": fetch("ListAttachedUserPolicies").await,
                    "inlinePolicies": fetch("ListUserPolicies").await,
                    "mfaDevices": fetch("ListMFADevices").await,
                    "accessKeys": fetch("ListAccessKeys").await,
                    "loginProfile": fetch("GetLoginProfile").await,
                })
            }
            ROLE => {
                let role = json!({ "RoleName": resource.name });
                let fetch =
                    |operation: &'static str| optional(client, SERVICE, operation, role.clone());
                json!({
                    "attachedPolicies": fetch("ListAttachedRolePolicies").await,
                    "inlinePolicies": fetch("ListRolePolicies").await,
                })
            }
            _ => Value::Null,
        })
    }
}
