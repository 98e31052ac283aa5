use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use complyscan_model::{CloudResource, EvaluationContext, RuleResult};
use tracing::debug;
use url::Url;

use super::{EvaluationRequest, EvaluationResponse, RuleEvaluator};
use crate::error::{Result, ScanError};

/// Posts the request document to a rule engine service.
#[derive(Clone)]
pub struct HttpRuleEvaluator {
    http: reqwest::Client,
    endpoint: Url,
}

impl fmt::Debug for HttpRuleEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRuleEvaluator")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl HttpRuleEvaluator {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            ScanError::Validation(format!("invalid evaluator endpoint {endpoint}: {e}"))
        })?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScanError::Internal(format!("http client: {e}")))?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl RuleEvaluator for HttpRuleEvaluator {
    async fn execute_rules(
        &self,
        resources: &[CloudResource],
        context: &EvaluationContext,
    ) -> Result<Vec<RuleResult>> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&EvaluationRequest { context, resources })
            .send()
            .await
            .map_err(|e| ScanError::Evaluation(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ScanError::Evaluation(e.to_string()))?;
        if !status.is_success() {
            return Err(ScanError::Evaluation(format!(
                "rule engine returned {status}: {}",
                String::from_utf8_lossy(&body).trim()
            )));
        }

        let results = EvaluationResponse::parse(&body)?;
        debug!(
            target: "scan::evaluator",
            scan = %context.scan_id,
            results = results.len(),
            "rule engine answered"
        );
        Ok(results)
    }
}
