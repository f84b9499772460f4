//! Execution domain type

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::stage::Stage;
use crate::domain::status::ExecutionStatus;
use crate::domain::trigger::Trigger;

/// Whether an execution is a run of a configured pipeline or an ad-hoc
/// orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    Pipeline,
    Orchestration,
}

impl ExecutionType {
    /// Lowercase name used to namespace store keys.
    pub fn key_name(self) -> &'static str {
        match self {
            ExecutionType::Pipeline => "pipeline",
            ExecutionType::Orchestration => "orchestration",
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_name())
    }
}

impl FromStr for ExecutionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipeline" | "PIPELINE" => Ok(ExecutionType::Pipeline),
            "orchestration" | "ORCHESTRATION" => Ok(ExecutionType::Orchestration),
            other => Err(format!("unknown execution type: {}", other)),
        }
    }
}

/// One run of a pipeline or an ad-hoc orchestration.
///
/// Structure shared between the store (persists) and the task runner
/// (mutates stage context/outputs and status).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    #[serde(rename = "type")]
    pub execution_type: ExecutionType,
    /// All indices are partitioned by application.
    pub application: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Orchestrations only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The logical pipeline this is a run of. Pipelines only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_config_id: Option<String>,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub canceled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canceled_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<PausedDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    /// Absolute deadline after which a NOT_STARTED execution is abandoned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time_expiry: Option<i64>,
    #[serde(default)]
    pub keep_waiting_pipelines: bool,
    #[serde(default)]
    pub limit_concurrent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub initial_config: Map<String, Value>,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl Execution {
    pub fn new(
        execution_type: ExecutionType,
        id: impl Into<String>,
        application: impl Into<String>,
    ) -> Self {
        Execution {
            id: id.into(),
            execution_type,
            application: application.into(),
            name: None,
            description: None,
            pipeline_config_id: None,
            status: ExecutionStatus::NotStarted,
            canceled: false,
            canceled_by: None,
            cancellation_reason: None,
            paused: None,
            build_time: None,
            start_time: None,
            end_time: None,
            start_time_expiry: None,
            keep_waiting_pipelines: false,
            limit_concurrent: false,
            origin: None,
            trigger: Trigger::default(),
            initial_config: Map::new(),
            stages: Vec::new(),
        }
    }

    pub fn new_pipeline(application: impl Into<String>) -> Self {
        Execution::new(
            ExecutionType::Pipeline,
            Uuid::new_v4().to_string(),
            application,
        )
    }

    pub fn new_orchestration(application: impl Into<String>) -> Self {
        Execution::new(
            ExecutionType::Orchestration,
            Uuid::new_v4().to_string(),
            application,
        )
    }

    pub fn stage_by_id(&self, stage_id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    pub fn stage_by_ref_id(&self, ref_id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.ref_id.as_deref() == Some(ref_id))
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }
}

/// Pause bookkeeping for an execution. Present only once a pause has
/// happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_time: Option<i64>,
}

impl PausedDetails {
    pub fn is_paused(&self) -> bool {
        self.pause_time.is_some() && self.resume_time.is_none()
    }

    /// Milliseconds spent paused, zero while still paused or never paused.
    pub fn paused_ms(&self) -> i64 {
        match (self.pause_time, self.resume_time) {
            (Some(p), Some(r)) => r - p,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let pipeline = Execution::new_pipeline("myapp");
        assert_eq!(pipeline.execution_type, ExecutionType::Pipeline);
        assert_eq!(pipeline.application, "myapp");
        assert_eq!(pipeline.status, ExecutionStatus::NotStarted);
        assert!(!pipeline.id.is_empty());

        let orchestration = Execution::new_orchestration("myapp");
        assert_eq!(orchestration.execution_type, ExecutionType::Orchestration);
        assert_ne!(pipeline.id, orchestration.id);
    }

    #[test]
    fn test_stage_lookup() {
        let mut execution = Execution::new_pipeline("myapp");
        let mut stage = Stage::new("bake");
        stage.ref_id = Some("1".to_string());
        let stage_id = stage.id.clone();
        execution.stages.push(stage);

        assert!(execution.stage_by_id(&stage_id).is_some());
        assert!(execution.stage_by_ref_id("1").is_some());
        assert!(execution.stage_by_ref_id("2").is_none());
    }

    #[test]
    fn test_paused_details() {
        let mut paused = PausedDetails {
            pause_time: Some(1_000),
            ..PausedDetails::default()
        };
        assert!(paused.is_paused());
        assert_eq!(paused.paused_ms(), 0);

        paused.resume_time = Some(4_500);
        assert!(!paused.is_paused());
        assert_eq!(paused.paused_ms(), 3_500);
    }
}
