//! Artifact resolution engine
//!
//! One engine serves both resolution sites: the trigger-time entry point
//! over a loosely-typed pipeline submission, and the stage-run-time lookups
//! for a single bound artifact. Resolution is deterministic and idempotent:
//! bindings are memoized on the expected artifact itself, so re-resolving
//! the same submission is a no-op.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_stream::StreamExt;
use tracing::warn;

use capstan_core::domain::{Artifact, Execution, ExecutionStatus, ExpectedArtifact, Stage};
use capstan_core::graph::topological_sort;
use capstan_store::{ExecutionComparator, ExecutionCriteria, ExecutionRepository};

use crate::error::{ArtifactError, ArtifactResult};
use crate::expression::{EvaluationSummary, ExpressionEvaluator};

/// Resolves expected-artifact bindings for a stage or an entire pipeline
/// submission.
pub struct ArtifactEngine {
    repository: Arc<ExecutionRepository>,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl ArtifactEngine {
    pub fn new(
        repository: Arc<ExecutionRepository>,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> Self {
        Self {
            repository,
            evaluator,
        }
    }

    /// Artifacts explicitly attached to this stage's invocation via
    /// `context.artifacts`. An unrecognized shape yields an empty list, not
    /// an error.
    pub fn get_artifacts(&self, stage: &Stage) -> Vec<Artifact> {
        parse_artifact_list(
            stage.context.get("artifacts"),
            &format!("context of stage {}", stage.id),
        )
    }

    /// The full provenance-ordered artifact list for an execution:
    /// artifacts from later-executing stages rank earlier, trigger
    /// artifacts come last.
    pub fn get_all_artifacts(&self, execution: &Execution) -> ArtifactResult<Vec<Artifact>> {
        self.get_all_artifacts_with(execution, true, None)
    }

    pub fn get_all_artifacts_with(
        &self,
        execution: &Execution,
        include_trigger: bool,
        stage_filter: Option<&dyn Fn(&Stage) -> bool>,
    ) -> ArtifactResult<Vec<Artifact>> {
        let sorted = topological_sort(&execution.stages)?;

        let mut artifacts: Vec<Artifact> = Vec::new();
        for stage in sorted {
            if let Some(filter) = stage_filter {
                if !filter(stage) {
                    continue;
                }
            }
            artifacts.extend(parse_artifact_list(
                stage.outputs.get("artifacts"),
                &format!("outputs of stage {}", stage.id),
            ));
        }
        // Most-recent-first: artifacts emitted by later stages win.
        artifacts.reverse();

        if include_trigger {
            artifacts.extend(execution.trigger.artifacts.iter().cloned());
        }
        Ok(artifacts)
    }

    /// Looks up a named expected artifact in the stage context's
    /// `resolvedExpectedArtifacts`. A bound artifact without an account
    /// inherits the match artifact's account. Returns None on absence or
    /// lookup failure.
    pub fn get_bound_artifact_for_id(
        &self,
        stage: &Stage,
        expected_artifact_id: &str,
    ) -> Option<Artifact> {
        let value = stage.context.get("resolvedExpectedArtifacts")?;
        let resolved: Vec<ExpectedArtifact> = match serde_json::from_value(value.clone()) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(
                    "Unable to read resolvedExpectedArtifacts from stage {}: {}",
                    stage.id, e
                );
                return None;
            }
        };

        let expectation = resolved
            .into_iter()
            .find(|e| e.id.as_deref() == Some(expected_artifact_id))?;
        let mut bound = expectation.bound_artifact?;
        if bound.artifact_account.is_none() {
            bound.artifact_account = expectation.match_artifact.artifact_account.clone();
        }
        Some(bound)
    }

    /// Resolves by expected-artifact id if given, else uses the inline
    /// artifact, then expands inline expressions against the execution
    /// context. Evaluation failures are logged, not fatal.
    pub fn get_bound_artifact(
        &self,
        execution: &Execution,
        stage: &Stage,
        expected_artifact_id: Option<&str>,
        inline_artifact: Option<Artifact>,
    ) -> ArtifactResult<Option<Artifact>> {
        let artifact = match expected_artifact_id {
            Some(id) => self.get_bound_artifact_for_id(stage, id),
            None => inline_artifact,
        };
        let Some(artifact) = artifact else {
            return Ok(None);
        };

        let value = serde_json::to_value(&artifact)
            .map_err(|e| ArtifactError::MalformedSubmission(e.to_string()))?;
        let Value::Object(map) = value else {
            return Ok(Some(artifact));
        };
        let context = serde_json::to_value(execution)
            .map_err(|e| ArtifactError::MalformedSubmission(e.to_string()))?;

        let mut summary = EvaluationSummary::default();
        let evaluated = self.evaluator.evaluate(&map, &context, &mut summary, true);
        if summary.has_errors() {
            warn!(
                "Failed evaluating expressions for artifact in stage {}: {:?}",
                stage.id,
                summary.errors()
            );
        }

        let artifact = serde_json::from_value(Value::Object(evaluated))
            .map_err(|e| ArtifactError::Expression(e.to_string()))?;
        Ok(Some(artifact))
    }

    /// Artifacts from the single most recent completed execution of a
    /// pipeline config, most-recent-first. `exclude_stage_id` drops one
    /// stage's emissions from the provenance list.
    pub async fn prior_artifacts(
        &self,
        pipeline_config_id: &str,
        exclude_stage_id: Option<&str>,
    ) -> ArtifactResult<Vec<Artifact>> {
        let criteria = ExecutionCriteria::default()
            .with_limit(1)
            .with_statuses(ExecutionStatus::completed());
        let stream = self
            .repository
            .retrieve_pipelines_for_pipeline_config_id(pipeline_config_id, &criteria)
            .await?;
        let mut executions: Vec<Execution> = stream.collect().await;
        executions.sort_by(|a, b| ExecutionComparator::StartTimeOrId.compare(a, b));

        match executions.first() {
            Some(prior) => match exclude_stage_id {
                Some(excluded) => {
                    let keep = |stage: &Stage| stage.id != excluded;
                    self.get_all_artifacts_with(prior, true, Some(&keep))
                }
                None => self.get_all_artifacts(prior),
            },
            None => Ok(Vec::new()),
        }
    }

    /// Trigger-time entry point over a loosely-typed pipeline submission.
    ///
    /// Dedups received and trigger artifacts, resolves every expected
    /// artifact (fetching prior-run artifacts only when some expectation
    /// asks for them), then writes the artifact union, the bound expected
    /// artifacts and a `resolvedExpectedArtifacts` echo back into the
    /// submission's trigger. With no expected artifacts it short-circuits
    /// to writing the received union.
    pub async fn resolve_artifacts(
        &self,
        submission: &mut Map<String, Value>,
    ) -> ArtifactResult<()> {
        let mut expected: Vec<ExpectedArtifact> = parse_list(
            submission.get("expectedArtifacts"),
            "expectedArtifacts",
        );
        let received_raw: Vec<Artifact> =
            parse_list(submission.get("receivedArtifacts"), "receivedArtifacts");
        let trigger_artifacts: Vec<Artifact> = parse_list(
            submission.get("trigger").and_then(|t| t.get("artifacts")),
            "trigger.artifacts",
        );

        let received = dedup(received_raw.into_iter().chain(trigger_artifacts));

        if expected.is_empty() {
            write_trigger_field(submission, "artifacts", to_value(&received)?);
            return Ok(());
        }

        let prior = if expected.iter().any(|e| e.use_prior_artifact) {
            match submission.get("id").and_then(|v| v.as_str()) {
                Some(pipeline_config_id) => {
                    Some(self.prior_artifacts(pipeline_config_id, None).await?)
                }
                None => {
                    warn!("Pipeline submission has no config id, prior artifacts unavailable");
                    Some(Vec::new())
                }
            }
        } else {
            None
        };

        let resolved =
            resolve_expected_artifacts(&mut expected, &received, prior.as_deref(), true)?;

        let all = dedup(received.into_iter().chain(resolved));
        let bound: Vec<&ExpectedArtifact> = expected
            .iter()
            .filter(|e| e.bound_artifact.is_some())
            .collect();

        write_trigger_field(submission, "artifacts", to_value(&all)?);
        write_trigger_field(submission, "resolvedExpectedArtifacts", to_value(&bound)?);
        write_trigger_field(submission, "expectedArtifacts", to_value(&expected)?);
        Ok(())
    }
}

/// Resolves each expected artifact in list order: a memoized binding is
/// reused; otherwise received artifacts are matched, then (optionally)
/// prior artifacts, then the literal default. Ambiguity throws when unique
/// matches are required, otherwise the first match in list order binds.
/// Every binding is memoized onto the expected artifact.
pub fn resolve_expected_artifacts(
    expected: &mut [ExpectedArtifact],
    received: &[Artifact],
    prior: Option<&[Artifact]>,
    require_unique_matches: bool,
) -> ArtifactResult<Vec<Artifact>> {
    let mut resolved = Vec::with_capacity(expected.len());

    for expectation in expected.iter_mut() {
        if let Some(bound) = &expectation.bound_artifact {
            resolved.push(bound.clone());
            continue;
        }

        let mut binding = match_one(expectation, received, require_unique_matches)?;
        if binding.is_none() && expectation.use_prior_artifact {
            if let Some(prior) = prior {
                binding = match_one(expectation, prior, require_unique_matches)?;
            }
        }
        if binding.is_none() && expectation.use_default_artifact {
            binding = expectation.default_artifact.clone();
        }

        let Some(artifact) = binding else {
            return Err(ArtifactError::UnresolvedExpectedArtifact(label(expectation)));
        };
        expectation.bound_artifact = Some(artifact.clone());
        resolved.push(artifact);
    }

    Ok(resolved)
}

fn match_one(
    expectation: &ExpectedArtifact,
    candidates: &[Artifact],
    require_unique_matches: bool,
) -> ArtifactResult<Option<Artifact>> {
    let matches: Vec<&Artifact> = candidates
        .iter()
        .filter(|candidate| expectation.matches(candidate))
        .collect();
    if matches.len() > 1 && require_unique_matches {
        return Err(ArtifactError::AmbiguousMatch(
            label(expectation),
            matches.len(),
        ));
    }
    Ok(matches.first().map(|artifact| (*artifact).clone()))
}

fn label(expectation: &ExpectedArtifact) -> String {
    expectation
        .id
        .clone()
        .or_else(|| expectation.match_artifact.name.clone())
        .unwrap_or_else(|| "unnamed".to_string())
}

/// Value-equality dedup preserving insertion order.
fn dedup(artifacts: impl IntoIterator<Item = Artifact>) -> Vec<Artifact> {
    let mut out: Vec<Artifact> = Vec::new();
    for artifact in artifacts {
        if !out.contains(&artifact) {
            out.push(artifact);
        }
    }
    out
}

fn parse_artifact_list(value: Option<&Value>, source: &str) -> Vec<Artifact> {
    match value {
        None => Vec::new(),
        Some(value) => match serde_json::from_value::<Vec<Artifact>>(value.clone()) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                warn!("Unable to read artifacts from {}: {}", source, e);
                Vec::new()
            }
        },
    }
}

fn parse_list<T: serde::de::DeserializeOwned>(value: Option<&Value>, source: &str) -> Vec<T> {
    match value {
        None => Vec::new(),
        Some(value) => match serde_json::from_value::<Vec<T>>(value.clone()) {
            Ok(items) => items,
            Err(e) => {
                warn!("Unable to read {} from pipeline submission: {}", source, e);
                Vec::new()
            }
        },
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> ArtifactResult<Value> {
    serde_json::to_value(value).map_err(|e| ArtifactError::MalformedSubmission(e.to_string()))
}

fn write_trigger_field(submission: &mut Map<String, Value>, field: &str, value: Value) {
    let trigger = submission
        .entry("trigger".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !trigger.is_object() {
        warn!("Pipeline submission trigger is not an object, replacing it");
        *trigger = Value::Object(Map::new());
    }
    if let Some(trigger) = trigger.as_object_mut() {
        trigger.insert(field.to_string(), value);
    }
}
