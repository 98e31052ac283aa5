use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{Result, ScanError};

/// Read-only access to one cloud account in one region.
///
/// `call` mirrors the provider's describe/list APIs: a service name, an
/// operation name and a JSON parameter document in, a JSON response out.
#[async_trait]
pub trait CloudClient: Send + Sync {
    fn account_id(&self) -> &str;

    fn region(&self) -> &str;

    async fn call(
        &self,
        service: &str,
        operation: &str,
        params: Value,
    ) -> Result<Value>;
}

/// Builds clients per `(account, region)`. Clients are never shared across
/// regions.
#[async_trait]
pub trait CloudClientFactory: Send + Sync {
    async fn client(
        &self,
        account_id: &str,
        region: &str,
    ) -> Result<Arc<dyn CloudClient>>;
}

/// Request/response field names carrying a pagination token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub request_key: &'static str,
    pub response_key: &'static str,
}

impl Pagination {
    pub const NEXT_TOKEN: Pagination = Pagination {
        request_key: "NextToken",
        response_key: "NextToken",
    };
    pub const MARKER: Pagination = Pagination {
        request_key: "Marker",
        response_key: "Marker",
    };
    pub const NEXT_MARKER: Pagination = Pagination {
        request_key: "Marker",
        response_key: "NextMarker",
    };
    pub const TABLE_NAME: Pagination = Pagination {
        request_key: "ExclusiveStartTableName",
        response_key: "LastEvaluatedTableName",
    };
}

const MAX_PAGES: usize = 1_000;

/// Drain a paginated operation, returning every response page in order.
pub async fn paginate(
    client: &dyn CloudClient,
    service: &str,
    operation: &str,
    params: Value,
    pagination: Pagination,
) -> Result<Vec<Value>> {
    let mut pages = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let mut request = match &params {
            Value::Object(_) => params.clone(),
            _ => json!({}),
        };
        if let (Some(token), Some(map)) = (&token, request.as_object_mut()) {
            map.insert(pagination.request_key.to_string(), json!(token));
        }

        let page = client.call(service, operation, request).await?;
        token = page
            .get(pagination.response_key)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        pages.push(page);

        if token.is_none() {
            return Ok(pages);
        }
        if pages.len() >= MAX_PAGES {
            return Err(ScanError::cloud(
                service,
                operation,
                format!("pagination did not terminate after {MAX_PAGES} pages"),
            ));
        }
    }
}

/// Concatenate the array found under `key` in every page.
pub fn collect_items(pages: Vec<Value>, key: &str) -> Vec<Value> {
    pages
        .into_iter()
        .filter_map(|mut page| match page.get_mut(key).map(Value::take) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        })
        .flatten()
        .collect()
}
