//! Stage and task domain types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::status::ExecutionStatus;

/// Marks a stage injected at run time by a parent stage rather than authored
/// in the pipeline definition, and whether it runs before or after its
/// parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyntheticStageOwner {
    StageBefore,
    StageAfter,
}

impl SyntheticStageOwner {
    pub fn as_str(self) -> &'static str {
        match self {
            SyntheticStageOwner::StageBefore => "STAGE_BEFORE",
            SyntheticStageOwner::StageAfter => "STAGE_AFTER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STAGE_BEFORE" => Some(SyntheticStageOwner::StageBefore),
            "STAGE_AFTER" => Some(SyntheticStageOwner::StageAfter),
            _ => None,
        }
    }
}

/// One node in an execution's DAG.
///
/// Stages are exclusively owned by their execution and never reference it
/// back; repository operations that need the owning execution take its type
/// and id explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: String,
    /// DAG-edge identity, distinct from `id`. Incoming edges are expressed
    /// as other stages' `requisite_stage_ref_ids`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    /// Discriminates behavior; resolved externally to a stage handler.
    #[serde(rename = "type")]
    pub stage_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time_expiry: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<i64>,
    /// Mutable input/config map.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Mutable produced-data map, conventionally including an `artifacts`
    /// list.
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub requisite_stage_ref_ids: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_stage_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthetic_stage_owner: Option<SyntheticStageOwner>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<LastModifiedDetails>,
}

impl Stage {
    pub fn new(stage_type: impl Into<String>) -> Self {
        Stage {
            id: Uuid::new_v4().to_string(),
            stage_type: stage_type.into(),
            ..Stage::default()
        }
    }

    /// True when this stage was injected by a parent stage at run time.
    pub fn is_synthetic(&self) -> bool {
        self.synthetic_stage_owner.is_some() && self.parent_stage_id.is_some()
    }

    pub fn task_by_id(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }
}

/// One unit of work within a stage's lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub stage_start: bool,
    #[serde(default)]
    pub stage_end: bool,
}

/// Who/what last touched a stage, stamped by the task runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastModifiedDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_accounts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_time: Option<i64>,
}
