use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::client::{CloudClient, CloudClientFactory};
use crate::error::{Result, ScanError};

/// Clients that forward describe calls to a read-only gateway over HTTP.
///
/// Each call is a `POST {endpoint}/describe` carrying account, region,
/// service, operation and parameters; the gateway answers with the raw
/// provider response.
#[derive(Clone)]
pub struct GatewayClientFactory {
    http: reqwest::Client,
    describe_url: Url,
    token: Option<Arc<str>>,
}

impl fmt::Debug for GatewayClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClientFactory")
            .field("describe_url", &self.describe_url.as_str())
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl GatewayClientFactory {
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut base = Url::parse(endpoint).map_err(|e| {
            ScanError::Validation(format!("invalid gateway endpoint {endpoint}: {e}"))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let describe_url = base.join("describe").map_err(|e| {
            ScanError::Validation(format!("invalid gateway endpoint {endpoint}: {e}"))
        })?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScanError::Internal(format!("http client: {e}")))?;

        Ok(Self {
            http,
            describe_url,
            token: token.map(Arc::from),
        })
    }

    pub fn describe_url(&self) -> &Url {
        &self.describe_url
    }
}

#[async_trait]
impl CloudClientFactory for GatewayClientFactory {
    async fn client(
        &self,
        account_id: &str,
        region: &str,
    ) -> Result<Arc<dyn CloudClient>> {
        Ok(Arc::new(GatewayClient {
            factory: self.clone(),
            account_id: account_id.to_string(),
            region: region.to_string(),
        }))
    }
}

struct GatewayClient {
    factory: GatewayClientFactory,
    account_id: String,
    region: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeRequest<'a> {
    account_id: &'a str,
    region: &'a str,
    service: &'a str,
    operation: &'a str,
    params: Value,
}

#[async_trait]
impl CloudClient for GatewayClient {
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
        let body = DescribeRequest {
            account_id: &self.account_id,
            region: &self.region,
            service,
            operation,
            params,
        };
        let mut request = self
            .factory
            .http
            .post(self.factory.describe_url.clone())
            .json(&body);
        if let Some(token) = &self.factory.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ScanError::cloud(service, operation, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            debug!(
                target: "scan::discovery",
                region = %self.region,
                service,
                operation,
                %status,
                "gateway call rejected"
            );
            return Err(ScanError::cloud(
                service,
                operation,
                format!("gateway returned {status}: {}", detail.trim()),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ScanError::cloud(service, operation, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_url_appends_to_endpoint_path() {
        let factory = GatewayClientFactory::new(
            "https://gateway.internal/v1",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            factory.describe_url().as_str(),
            "https://gateway.internal/v1/describe"
        );
    }

    #[test]
    fn rejects_malformed_endpoint() {
        let err = GatewayClientFactory::new("not a url", None, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ScanError::Validation(_)));
    }
}
