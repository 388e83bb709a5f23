//! Tool call execution
//!
//! Decodes a worker's tool call and runs it. Failures never escape:
//! they come back as tool output text so the worker can retry, pick
//! another tool, or report the failure.

use crate::models::ToolCall;
use crate::tools::{ToolExecutor, ToolRequest};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    /// Unknown tool or undecodable arguments; nothing ran
    Rejected,
}

/// What happened when one tool call ran
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolObservation {
    pub tool_name: String,
    pub status: ExecutionStatus,
    /// Text handed back to the worker
    pub output: String,
    pub execution_time_ms: u64,
}

pub async fn execute_tool_call(executor: &dyn ToolExecutor, call: &ToolCall) -> ToolObservation {
    let start = Instant::now();

    let request = match ToolRequest::from_call(call) {
        Ok(request) => request,
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Rejected tool call");
            return ToolObservation {
                tool_name: call.name.clone(),
                status: ExecutionStatus::Rejected,
                output: format!("Tool `{}` could not be called: {}", call.name, e),
                execution_time_ms: 0,
            };
        }
    };

    let (status, output) = match executor.invoke(request).await {
        Ok(output) => (ExecutionStatus::Success, output),
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Tool execution failed");
            (
                ExecutionStatus::Failed,
                format!("Tool `{}` failed: {}", call.name, e),
            )
        }
    };

    let execution_time_ms = start.elapsed().as_millis() as u64;
    debug!(tool = %call.name, ?status, execution_time_ms, "Tool call finished");

    ToolObservation {
        tool_name: call.name.clone(),
        status,
        output,
        execution_time_ms,
    }
}
