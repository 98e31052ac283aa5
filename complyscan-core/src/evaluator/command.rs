use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use complyscan_model::{CloudResource, EvaluationContext, RuleResult};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{EvaluationRequest, EvaluationResponse, RuleEvaluator};
use crate::error::{Result, ScanError};

/// Runs an external rule engine once per scan.
///
/// The request document is written to the child's stdin; the child prints
/// its verdicts as JSON on stdout and exits 0.
#[derive(Clone)]
pub struct CommandRuleEvaluator {
    program: String,
    args: Vec<String>,
}

impl fmt::Debug for CommandRuleEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRuleEvaluator")
            .field("program", &self.program)
            .field("args", &self.args.len())
            .finish()
    }
}

impl CommandRuleEvaluator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl RuleEvaluator for CommandRuleEvaluator {
    async fn execute_rules(
        &self,
        resources: &[CloudResource],
        context: &EvaluationContext,
    ) -> Result<Vec<RuleResult>> {
        let request = serde_json::to_vec(&EvaluationRequest { context, resources })?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ScanError::Evaluation(format!("failed to start {}: {e}", self.program))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&request).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                target: "scan::evaluator",
                scan = %context.scan_id,
                program = %self.program,
                status = %output.status,
                "rule engine exited unsuccessfully"
            );
            return Err(ScanError::Evaluation(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let results = EvaluationResponse::parse(&output.stdout)?;
        debug!(
            target: "scan::evaluator",
            scan = %context.scan_id,
            resources = resources.len(),
            results = results.len(),
            "rule engine finished"
        );
        Ok(results)
    }
}
