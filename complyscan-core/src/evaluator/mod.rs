//! Rule evaluation port and its adapters.
//!
//! The engine never interprets rules. It hands the discovered resources and
//! the scan context to a [`RuleEvaluator`] and takes back one verdict per
//! (rule, resource) pair.

mod command;
mod http;

pub use command::CommandRuleEvaluator;
pub use http::HttpRuleEvaluator;

use async_trait::async_trait;
use complyscan_model::{CloudResource, EvaluationContext, RuleResult};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleEvaluator: Send + Sync {
    async fn execute_rules(
        &self,
        resources: &[CloudResource],
        context: &EvaluationContext,
    ) -> Result<Vec<RuleResult>>;
}

/// Document sent to out-of-process evaluators.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EvaluationRequest<'a> {
    pub context: &'a EvaluationContext,
    pub resources: &'a [CloudResource],
}

/// Evaluators may answer with a bare array or `{"results": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum EvaluationResponse {
    Bare(Vec<RuleResult>),
    Wrapped { results: Vec<RuleResult> },
}

impl EvaluationResponse {
    pub(crate) fn parse(raw: &[u8]) -> Result<Vec<RuleResult>> {
        let response: EvaluationResponse = serde_json::from_slice(raw)
            .map_err(|e| ScanError::Evaluation(format!("malformed evaluator output: {e}")))?;
        Ok(match response {
            EvaluationResponse::Bare(results) => results,
            EvaluationResponse::Wrapped { results } => results,
        })
    }
}
