//! Flat hash serialization of execution graphs
//!
//! An execution is one keyed hash record. Stage and task data live under
//! `stage.{stageId}.{field}` paths inside that record so a stage update
//! never rewrites unrelated stages; authoritative stage order lives in a
//! companion list key. Nested structures (trigger, paused details, context,
//! outputs, tasks) are stored as JSON; scalars are stored as plain strings.

use std::collections::{BTreeSet, HashMap};

use capstan_core::domain::{
    Execution, ExecutionStatus, ExecutionType, PausedDetails, Stage, SyntheticStageOwner, Task,
    Trigger,
};

use crate::error::{RepositoryError, RepositoryResult};

/// Serialized fields. `None` values mark fields to clear from the stored
/// hash on partial updates.
pub type FieldMap = HashMap<String, Option<String>>;

/// Splits a field map into the values to write and the fields to delete.
pub fn split_fields(map: FieldMap) -> (HashMap<String, String>, Vec<String>) {
    let mut set = HashMap::with_capacity(map.len());
    let mut clear = Vec::new();
    for (key, value) in map {
        match value {
            Some(value) => {
                set.insert(key, value);
            }
            None => clear.push(key),
        }
    }
    (set, clear)
}

pub fn serialize_execution(execution: &Execution) -> RepositoryResult<FieldMap> {
    let mut map = FieldMap::new();
    map.insert("application".to_string(), Some(execution.application.clone()));
    map.insert("canceled".to_string(), Some(execution.canceled.to_string()));
    map.insert("canceledBy".to_string(), execution.canceled_by.clone());
    map.insert(
        "cancellationReason".to_string(),
        execution.cancellation_reason.clone(),
    );
    map.insert(
        "limitConcurrent".to_string(),
        Some(execution.limit_concurrent.to_string()),
    );
    map.insert(
        "keepWaitingPipelines".to_string(),
        Some(execution.keep_waiting_pipelines.to_string()),
    );
    map.insert(
        "buildTime".to_string(),
        execution.build_time.map(|t| t.to_string()),
    );
    map.insert(
        "startTime".to_string(),
        execution.start_time.map(|t| t.to_string()),
    );
    map.insert(
        "endTime".to_string(),
        execution.end_time.map(|t| t.to_string()),
    );
    map.insert(
        "startTimeExpiry".to_string(),
        execution.start_time_expiry.map(|t| t.to_string()),
    );
    map.insert("status".to_string(), Some(execution.status.to_string()));
    map.insert("origin".to_string(), execution.origin.clone());
    map.insert(
        "paused".to_string(),
        match &execution.paused {
            Some(paused) => Some(to_json(&execution.id, None, paused)?),
            None => None,
        },
    );
    map.insert(
        "trigger".to_string(),
        Some(to_json(&execution.id, None, &execution.trigger)?),
    );

    for stage in &execution.stages {
        map.extend(serialize_stage(&execution.id, stage)?);
    }

    match execution.execution_type {
        ExecutionType::Pipeline => {
            map.insert("name".to_string(), execution.name.clone());
            map.insert(
                "pipelineConfigId".to_string(),
                execution.pipeline_config_id.clone(),
            );
            map.insert(
                "initialConfig".to_string(),
                Some(to_json(&execution.id, None, &execution.initial_config)?),
            );
        }
        ExecutionType::Orchestration => {
            map.insert("description".to_string(), execution.description.clone());
        }
    }

    Ok(map)
}

pub fn serialize_stage(execution_id: &str, stage: &Stage) -> RepositoryResult<FieldMap> {
    let prefix = format!("stage.{}.", stage.id);
    let field = |name: &str| format!("{}{}", prefix, name);
    let stage_id = Some(stage.id.clone());

    let mut map = FieldMap::new();
    map.insert(field("refId"), stage.ref_id.clone());
    map.insert(field("type"), Some(stage.stage_type.clone()));
    map.insert(field("name"), stage.name.clone());
    map.insert(field("startTime"), stage.start_time.map(|t| t.to_string()));
    map.insert(field("endTime"), stage.end_time.map(|t| t.to_string()));
    map.insert(
        field("startTimeExpiry"),
        stage.start_time_expiry.map(|t| t.to_string()),
    );
    map.insert(
        field("scheduledTime"),
        stage.scheduled_time.map(|t| t.to_string()),
    );
    map.insert(field("status"), Some(stage.status.to_string()));
    map.insert(
        field("syntheticStageOwner"),
        stage.synthetic_stage_owner.map(|o| o.as_str().to_string()),
    );
    map.insert(field("parentStageId"), stage.parent_stage_id.clone());
    map.insert(
        field("requisiteStageRefIds"),
        if stage.requisite_stage_ref_ids.is_empty() {
            None
        } else {
            Some(
                stage
                    .requisite_stage_ref_ids
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(","),
            )
        },
    );
    map.insert(
        field("context"),
        Some(to_json(execution_id, stage_id.clone(), &stage.context)?),
    );
    map.insert(
        field("outputs"),
        Some(to_json(execution_id, stage_id.clone(), &stage.outputs)?),
    );
    map.insert(
        field("tasks"),
        Some(to_json(execution_id, stage_id.clone(), &stage.tasks)?),
    );
    map.insert(
        field("lastModified"),
        match &stage.last_modified {
            Some(details) => Some(to_json(execution_id, stage_id, details)?),
            None => None,
        },
    );

    Ok(map)
}

/// Rebuilds an execution from its flat record and the ordered stage ids.
pub fn build_execution(
    execution_type: ExecutionType,
    id: &str,
    map: &HashMap<String, String>,
    stage_ids: &[String],
) -> RepositoryResult<Execution> {
    let mut execution = Execution::new(
        execution_type,
        id,
        map.get("application").cloned().unwrap_or_default(),
    );

    execution.canceled = parse_bool(map.get("canceled"));
    execution.canceled_by = map.get("canceledBy").cloned();
    execution.cancellation_reason = map.get("cancellationReason").cloned();
    execution.limit_concurrent = parse_bool(map.get("limitConcurrent"));
    execution.keep_waiting_pipelines = parse_bool(map.get("keepWaitingPipelines"));
    execution.build_time = parse_i64(id, None, map.get("buildTime"))?;
    execution.start_time = parse_i64(id, None, map.get("startTime"))?;
    execution.end_time = parse_i64(id, None, map.get("endTime"))?;
    execution.start_time_expiry = parse_i64(id, None, map.get("startTimeExpiry"))?;
    execution.origin = map.get("origin").cloned();
    if let Some(status) = map.get("status") {
        execution.status = parse_status(id, None, status)?;
    }
    execution.paused = match map.get("paused") {
        Some(json) => Some(from_json::<PausedDetails>(id, None, json)?),
        None => None,
    };
    execution.trigger = match map.get("trigger") {
        Some(json) => from_json::<Trigger>(id, None, json)?,
        None => Trigger::default(),
    };

    for stage_id in stage_ids {
        execution.stages.push(build_stage(id, stage_id, map)?);
    }

    match execution_type {
        ExecutionType::Pipeline => {
            execution.name = map.get("name").cloned();
            execution.pipeline_config_id = map.get("pipelineConfigId").cloned();
            if let Some(json) = map.get("initialConfig") {
                execution.initial_config = from_json(id, None, json)?;
            }
        }
        ExecutionType::Orchestration => {
            execution.description = map.get("description").cloned();
        }
    }

    Ok(execution)
}

fn build_stage(
    execution_id: &str,
    stage_id: &str,
    map: &HashMap<String, String>,
) -> RepositoryResult<Stage> {
    let prefix = format!("stage.{}.", stage_id);
    let get = |name: &str| map.get(&format!("{}{}", prefix, name));
    let sid = Some(stage_id.to_string());

    let mut stage = Stage::default();
    stage.id = stage_id.to_string();
    stage.ref_id = get("refId").cloned();
    stage.stage_type = get("type").cloned().ok_or_else(|| {
        RepositoryError::serialization(execution_id, sid.clone(), "missing stage type")
    })?;
    stage.name = get("name").cloned();
    stage.start_time = parse_i64(execution_id, sid.clone(), get("startTime"))?;
    stage.end_time = parse_i64(execution_id, sid.clone(), get("endTime"))?;
    stage.start_time_expiry = parse_i64(execution_id, sid.clone(), get("startTimeExpiry"))?;
    stage.scheduled_time = parse_i64(execution_id, sid.clone(), get("scheduledTime"))?;
    stage.status = match get("status") {
        Some(status) => parse_status(execution_id, sid.clone(), status)?,
        None => ExecutionStatus::NotStarted,
    };
    stage.synthetic_stage_owner = match get("syntheticStageOwner") {
        Some(owner) => Some(SyntheticStageOwner::parse(owner).ok_or_else(|| {
            RepositoryError::serialization(
                execution_id,
                sid.clone(),
                format!("unknown synthetic stage owner: {}", owner),
            )
        })?),
        None => None,
    };
    stage.parent_stage_id = get("parentStageId").cloned();
    stage.requisite_stage_ref_ids = match get("requisiteStageRefIds") {
        Some(csv) if !csv.is_empty() => csv.split(',').map(|s| s.to_string()).collect(),
        _ => BTreeSet::new(),
    };
    if let Some(json) = get("context") {
        stage.context = from_json(execution_id, sid.clone(), json)?;
    }
    if let Some(json) = get("outputs") {
        stage.outputs = from_json(execution_id, sid.clone(), json)?;
    }
    if let Some(json) = get("tasks") {
        stage.tasks = from_json::<Vec<Task>>(execution_id, sid.clone(), json)?;
    }
    if let Some(json) = get("lastModified") {
        stage.last_modified = Some(from_json(execution_id, sid, json)?);
    }

    Ok(stage)
}

/// Recovers stage ids from serialized key paths for records whose ordered
/// index is empty (legacy/migrated data). The recovered order is
/// unspecified and best-effort.
pub fn extract_stage_ids(map: &HashMap<String, String>) -> Vec<String> {
    let mut ids = BTreeSet::new();
    for key in map.keys() {
        if let Some(rest) = key.strip_prefix("stage.") {
            if let Some((stage_id, _)) = rest.split_once('.') {
                ids.insert(stage_id.to_string());
            }
        }
    }
    ids.into_iter().collect()
}

fn parse_bool(value: Option<&String>) -> bool {
    value.map(|v| v == "true").unwrap_or(false)
}

fn parse_i64(
    execution_id: &str,
    stage_id: Option<String>,
    value: Option<&String>,
) -> RepositoryResult<Option<i64>> {
    match value {
        None => Ok(None),
        Some(raw) => raw.parse::<i64>().map(Some).map_err(|_| {
            RepositoryError::serialization(
                execution_id,
                stage_id,
                format!("malformed number: {}", raw),
            )
        }),
    }
}

fn parse_status(
    execution_id: &str,
    stage_id: Option<String>,
    value: &str,
) -> RepositoryResult<ExecutionStatus> {
    value
        .parse::<ExecutionStatus>()
        .map_err(|e| RepositoryError::serialization(execution_id, stage_id, e))
}

fn to_json<T: serde::Serialize>(
    execution_id: &str,
    stage_id: Option<String>,
    value: &T,
) -> RepositoryResult<String> {
    serde_json::to_string(value)
        .map_err(|e| RepositoryError::serialization(execution_id, stage_id, e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(
    execution_id: &str,
    stage_id: Option<String>,
    json: &str,
) -> RepositoryResult<T> {
    serde_json::from_str(json)
        .map_err(|e| RepositoryError::serialization(execution_id, stage_id, e.to_string()))
}
