//! Stage graph utilities
//!
//! Topological ordering, ancestor/descendant traversal and ordered synthetic
//! insertion over an execution's stage DAG. The DAG is keyed by `ref_id` /
//! `requisite_stage_ref_ids`; synthetic stages hang off their parent via
//! `parent_stage_id` instead.

use std::collections::{BTreeSet, HashSet, VecDeque};
use thiserror::Error;

use crate::domain::execution::Execution;
use crate::domain::stage::{Stage, SyntheticStageOwner};

/// Error type for graph operations
#[derive(Debug, Error)]
pub enum GraphError {
    /// The stage set cannot be ordered: a cycle or a dangling requisite ref.
    #[error("invalid stage relationships found: {0}")]
    InvalidRelationships(String),
    /// A synthetic stage references a parent that is not in the stage set.
    #[error("parent stage '{0}' not found")]
    UnknownParent(String),
    /// Ad-hoc insertion is only valid for synthetic stages.
    #[error("stage '{0}' is not synthetic")]
    NotSynthetic(String),
}

/// Behavior descriptor for a stage type, supplied by an external registry.
pub trait StageDescriptor {
    fn stage_type(&self) -> &str;
}

/// External registry mapping a stage `type` string to its behavior
/// descriptor.
pub trait StageTypeRegistry {
    fn descriptor(&self, stage_type: &str) -> Option<&dyn StageDescriptor>;
}

/// Sorts top-level stages so that every stage appears after all stages in
/// its `requisite_stage_ref_ids`.
///
/// Synthetic stages (those with a `parent_stage_id`) are not part of the
/// user-authored DAG and are excluded. Independent branches keep their
/// input order, so the sort is stable for a given input.
pub fn topological_sort(stages: &[Stage]) -> Result<Vec<&Stage>, GraphError> {
    let mut unsorted: Vec<&Stage> = stages
        .iter()
        .filter(|s| s.parent_stage_id.is_none())
        .collect();
    let mut sorted = Vec::with_capacity(unsorted.len());
    let mut ref_ids: HashSet<&str> = HashSet::new();

    while !unsorted.is_empty() {
        let (ready, rest): (Vec<&Stage>, Vec<&Stage>) = unsorted.into_iter().partition(|s| {
            s.requisite_stage_ref_ids
                .iter()
                .all(|r| ref_ids.contains(r.as_str()))
        });

        if ready.is_empty() {
            let edges = rest
                .iter()
                .map(|s| {
                    format!(
                        "{:?}->{}",
                        s.requisite_stage_ref_ids,
                        s.ref_id.as_deref().unwrap_or("?")
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            return Err(GraphError::InvalidRelationships(edges));
        }

        for stage in ready {
            if let Some(ref_id) = stage.ref_id.as_deref() {
                ref_ids.insert(ref_id);
            }
            sorted.push(stage);
        }
        unsorted = rest;
    }

    Ok(sorted)
}

/// All stages transitively required by `stage`, including the stage itself.
///
/// Ancestors include stages reachable via `requisite_stage_ref_ids`,
/// synthetic children of those stages, and (for a synthetic stage) its
/// parent chain, with STAGE_BEFORE siblings visited for a STAGE_AFTER stage.
pub fn ancestors<'a>(execution: &'a Execution, stage: &'a Stage) -> Vec<&'a Stage> {
    let mut visited: HashSet<String> = HashSet::with_capacity(execution.stages.len());
    let mut result = vec![stage];
    result.extend(ancestors_impl(execution, stage, &mut visited));
    result
}

/// [`ancestors`], with each stage paired with the descriptor registered for
/// its type, when one exists.
pub fn ancestors_with_descriptors<'a, 'r>(
    execution: &'a Execution,
    stage: &'a Stage,
    registry: &'r dyn StageTypeRegistry,
) -> Vec<(&'a Stage, Option<&'r dyn StageDescriptor>)> {
    ancestors(execution, stage)
        .into_iter()
        .map(|s| (s, registry.descriptor(&s.stage_type)))
        .collect()
}

fn ancestors_impl<'a>(
    execution: &'a Execution,
    stage: &'a Stage,
    visited: &mut HashSet<String>,
) -> Vec<&'a Stage> {
    if let Some(ref_id) = &stage.ref_id {
        visited.insert(ref_id.clone());
    }

    if !stage.requisite_stage_ref_ids.is_empty() {
        let previous: Vec<&Stage> = execution
            .stages
            .iter()
            .filter(|s| {
                s.ref_id
                    .as_ref()
                    .is_some_and(|r| stage.requisite_stage_ref_ids.contains(r))
            })
            .filter(|s| s.ref_id.as_ref().is_some_and(|r| !visited.contains(r)))
            .collect();
        let synthetic: Vec<&Stage> = execution
            .stages
            .iter()
            .filter(|s| {
                s.parent_stage_id
                    .as_ref()
                    .is_some_and(|p| previous.iter().any(|prev| &prev.id == p))
            })
            .collect();

        let mut result: Vec<&Stage> = Vec::new();
        result.extend(previous.iter().copied());
        result.extend(synthetic);
        for prev in previous {
            result.extend(ancestors_impl(execution, prev, visited));
        }
        result
    } else if let Some(parent_id) = &stage.parent_stage_id {
        if visited.contains(parent_id) {
            return Vec::new();
        }

        let mut result: Vec<&Stage> = Vec::new();
        if stage.synthetic_stage_owner == Some(SyntheticStageOwner::StageAfter) {
            result.extend(execution.stages.iter().filter(|s| {
                s.parent_stage_id.as_deref() == Some(parent_id.as_str())
                    && s.synthetic_stage_owner == Some(SyntheticStageOwner::StageBefore)
            }));
        }
        if let Some(parent) = execution.stages.iter().find(|s| &s.id == parent_id) {
            result.push(parent);
            result.extend(ancestors_impl(execution, parent, visited));
        }
        result
    } else {
        Vec::new()
    }
}

/// Stages directly downstream of `stage`: those whose requisites name its
/// `ref_id`.
pub fn downstream_stages<'a>(execution: &'a Execution, stage: &'a Stage) -> Vec<&'a Stage> {
    let Some(ref_id) = stage.ref_id.as_deref() else {
        return Vec::new();
    };
    execution
        .stages
        .iter()
        .filter(|s| s.requisite_stage_ref_ids.contains(ref_id))
        .collect()
}

/// Forward transitive closure: every stage downstream of `stage`, excluding
/// the stage itself.
pub fn all_downstream_stages<'a>(execution: &'a Execution, stage: &'a Stage) -> Vec<&'a Stage> {
    let mut children: Vec<&Stage> = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&Stage> = VecDeque::new();

    queue.push_back(stage);
    let mut first = true;

    while let Some(current) = queue.pop_front() {
        if let Some(ref_id) = current.ref_id.as_deref() {
            if !visited.insert(ref_id) {
                continue;
            }
        }
        if !first {
            children.push(current);
        }
        first = false;

        for next in downstream_stages(execution, current) {
            if next.ref_id.as_deref().is_none_or(|r| !visited.contains(r)) {
                queue.push_back(next);
            }
        }
    }

    children
}

/// Downstream traversal plus extraction: applies `extract` to every stage
/// downstream of `stage` and concatenates the results.
pub fn collect_downstream<'a, T, F>(
    execution: &'a Execution,
    stage: &'a Stage,
    mut extract: F,
) -> Vec<T>
where
    F: FnMut(&'a Stage) -> Vec<T>,
{
    all_downstream_stages(execution, stage)
        .into_iter()
        .flat_map(|s| extract(s))
        .collect()
}

/// Stage types whose context carries deployment regions.
const DEPLOY_STAGE_TYPES: &[&str] = &["deploy", "canary", "createServerGroup", "cloneServerGroup"];

/// Union of all deployment regions referenced by downstream deploy and
/// canary stages.
pub fn downstream_deploy_regions(execution: &Execution, stage: &Stage) -> BTreeSet<String> {
    collect_downstream(execution, stage, |s| {
        if !DEPLOY_STAGE_TYPES.contains(&s.stage_type.as_str()) {
            return Vec::new();
        }
        let mut regions: Vec<String> = Vec::new();
        if let Some(list) = s.context.get("regions").and_then(|v| v.as_array()) {
            regions.extend(list.iter().filter_map(|v| v.as_str().map(String::from)));
        }
        if let Some(region) = s.context.get("region").and_then(|v| v.as_str()) {
            regions.push(region.to_string());
        }
        regions
    })
    .into_iter()
    .collect()
}

/// Inserts a synthetic stage into an in-memory stage list at the correct
/// position: STAGE_BEFORE immediately before its parent, STAGE_AFTER
/// immediately after. Returns the insertion index.
pub fn insert_synthetic_stage(stages: &mut Vec<Stage>, stage: Stage) -> Result<usize, GraphError> {
    let (Some(owner), Some(parent_id)) = (
        stage.synthetic_stage_owner,
        stage.parent_stage_id.clone(),
    ) else {
        return Err(GraphError::NotSynthetic(stage.id));
    };

    let parent_index = stages
        .iter()
        .position(|s| s.id == parent_id)
        .ok_or(GraphError::UnknownParent(parent_id))?;

    let index = match owner {
        SyntheticStageOwner::StageBefore => parent_index,
        SyntheticStageOwner::StageAfter => parent_index + 1,
    };
    stages.insert(index, stage);
    Ok(index)
}
