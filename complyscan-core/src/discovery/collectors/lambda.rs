use async_trait::async_trait;
use complyscan_model::CloudResource;
use serde_json::{Value, json};

use super::{arn, embedded_policy, optional, str_field, tags_from_map};
use crate::discovery::client::{CloudClient, Pagination, collect_items, paginate};
use crate::discovery::registry::ResourceCollector;
use crate::error::Result;

const SERVICE: &str = "lambda";
const FUNCTION: &str = "AWS::Lambda::Function";

#[derive(Debug, Clone, Copy, Default)]
pub struct LambdaCollector;

#[async_trait]
impl ResourceCollector for LambdaCollector {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn discover_regional(&self, client: &dyn CloudClient) -> Result<Vec<CloudResource>> {
        let pages = paginate(
            client,
            SERVICE,
            "ListFunctions",
            json!({}),
            Pagination::NEXT_MARKER,
        )
        .await?;

        let mut resources = Vec::new();
        for function in collect_items(pages, "Functions") {
            let Some(name) = str_field(&function, "FunctionName").map(str::to_string) else {
                continue;
            };
            let identifier = str_field(&function, "FunctionArn")
                .map(str::to_string)
                .unwrap_or_else(|| {
                    arn(
                        SERVICE,
                        client.region(),
                        client.account_id(),
                        &format!("function:{name}"),
                    )
                });
            let tags = optional(
                client,
                SERVICE,
                "ListTags",
                json!({ "Resource": identifier }),
            )
            .await;
            let environment_keys: Vec<&String> = function
                .pointer("/Environment/Variables")
                .and_then(Value::as_object)
                .map(|vars| vars.keys().collect())
                .unwrap_or_default();
            // Variable values may hold secrets; only the names are kept.
            let metadata = json!({
                "runtime": function.get("Runtime"),
                "role": function.get("Role"),
                "handler": function.get("Handler"),
                "timeout": function.get("Timeout"),
                "memorySize": function.get("MemorySize"),
                "vpcConfig": function.get("VpcConfig"),
                "kmsKeyArn": function.get("KMSKeyArn"),
                "tracingConfig": function.get("TracingConfig"),
                "environmentVariables": environment_keys,
            });
            resources.push(
                CloudResource::new(
                    SERVICE,
                    FUNCTION,
                    identifier,
                    name,
                    client.account_id(),
                    client.region(),
                )
                .with_tags(tags_from_map(tags.get("Tags")))
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
        let function = json!({ "FunctionName": resource.name });
        let policy = optional(client, SERVICE, "GetPolicy", function.clone()).await;
        Ok(json!({
            "policy": embedded_policy(&policy, "Policy"),
            "urlConfig": optional(client, SERVICE, "GetFunctionUrlConfig", function.clone()).await,
            "concurrency": optional(client, SERVICE, "GetFunctionConcurrency", function).await,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::client::CloudClientFactory;
    use crate::discovery::fixture::FixtureCloud;

    #[tokio::test]
    async fn functions_keep_variable_names_only() -> Result<()> {
        let cloud = FixtureCloud::from_value(json!({ "regions": { "us-east-1": { "lambda": {
            "ListFunctions": { "Functions": [ {
                "FunctionName": "ingest",
                "Runtime": "python3.12",
                "Environment": { "Variables": { "API_KEY": "secret" } }
            } ] },
            "ListTags": { "key": "Resource", "responses": {
                "arn:aws:lambda:us-east-1:1:function:ingest": { "Tags": { "team": "etl" } }
            } },
            "GetPolicy": { "key": "FunctionName", "responses": {
                "ingest": { "Policy": "{\"Statement\":[]}" }
            } }
        } } } }))?;
        let client = cloud.client("1", "us-east-1").await?;

        let functions = LambdaCollector.discover_regional(client.as_ref()).await?;
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].tags["team"], "etl");
        assert_eq!(functions[0].metadata["environmentVariables"], json!(["API_KEY"]));
        assert!(!functions[0].metadata.to_string().contains("secret"));

        let config = LambdaCollector.get_configuration(client.as_ref(), &functions[0]).await?;
        assert_eq!(config["policy"]["Statement"], json!([]));
        Ok(())
    }
}
