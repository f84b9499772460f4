//! Execution status

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of an execution, stage or task.
///
/// `NOT_STARTED -> RUNNING -> {SUCCEEDED, FAILED_CONTINUE, TERMINAL, CANCELED,
/// STOPPED, SKIPPED}`, with `RUNNING <-> PAUSED` and `BUFFERED` for executions
/// held pending admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    NotStarted,
    Buffered,
    Running,
    Paused,
    Succeeded,
    FailedContinue,
    Terminal,
    Canceled,
    Stopped,
    Skipped,
}

impl ExecutionStatus {
    /// True for statuses that end an execution. Completed executions do not
    /// transition further.
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded
                | ExecutionStatus::FailedContinue
                | ExecutionStatus::Terminal
                | ExecutionStatus::Canceled
                | ExecutionStatus::Stopped
                | ExecutionStatus::Skipped
        )
    }

    /// All completed statuses, in a stable order.
    pub fn completed() -> Vec<ExecutionStatus> {
        vec![
            ExecutionStatus::Succeeded,
            ExecutionStatus::FailedContinue,
            ExecutionStatus::Terminal,
            ExecutionStatus::Canceled,
            ExecutionStatus::Stopped,
            ExecutionStatus::Skipped,
        ]
    }

    /// Wire name as stored in the flat hash representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::NotStarted => "NOT_STARTED",
            ExecutionStatus::Buffered => "BUFFERED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Paused => "PAUSED",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::FailedContinue => "FAILED_CONTINUE",
            ExecutionStatus::Terminal => "TERMINAL",
            ExecutionStatus::Canceled => "CANCELED",
            ExecutionStatus::Stopped => "STOPPED",
            ExecutionStatus::Skipped => "SKIPPED",
        }
    }
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        ExecutionStatus::NotStarted
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(ExecutionStatus::NotStarted),
            "BUFFERED" => Ok(ExecutionStatus::Buffered),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "PAUSED" => Ok(ExecutionStatus::Paused),
            "SUCCEEDED" => Ok(ExecutionStatus::Succeeded),
            "FAILED_CONTINUE" => Ok(ExecutionStatus::FailedContinue),
            "TERMINAL" => Ok(ExecutionStatus::Terminal),
            "CANCELED" => Ok(ExecutionStatus::Canceled),
            "STOPPED" => Ok(ExecutionStatus::Stopped),
            "SKIPPED" => Ok(ExecutionStatus::Skipped),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}
