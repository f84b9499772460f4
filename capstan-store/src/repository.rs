//! Execution repository
//!
//! Durable store for execution graphs: flat-hash persistence with partial
//! stage updates, lifecycle transitions with index side effects, lazy
//! streaming retrieval merged across store generations, and the
//! correlation-id registry.
//!
//! Index layout per execution type:
//! - `allJobs:{type}`: set of every execution id
//! - `{type}:app:{application}`: set of ids per application
//! - `buffered:{type}`: set of ids currently BUFFERED
//! - `pipeline:executions:{pipelineConfigId}`: sorted set scored by build
//!   time
//! - `correlation:{correlationId}`: trigger correlation id -> execution id
//!
//! Bulk scans are lazy: each store generation gets a producer task feeding a
//! bounded channel, so a consumer that stops pulling cancels the scan.
//! Whole-type scans and per-application queries acquire permits from
//! separate pools so a slow bulk scan cannot starve interactive queries.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;

use capstan_core::domain::{
    Execution, ExecutionStatus, ExecutionType, PausedDetails, Stage, SyntheticStageOwner,
};
use tokio::sync::{Semaphore, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, info, warn};

use crate::config::RepositoryConfig;
use crate::criteria::{ExecutionComparator, ExecutionCriteria};
use crate::error::{RepositoryError, RepositoryResult};
use crate::generation::StoreGenerations;
use crate::kv::{KeyValueStore, ListPosition, WriteBatch};
use crate::serialization::{
    build_execution, extract_stage_ids, serialize_execution, serialize_stage, split_fields,
};

/// Lazily-produced sequence of executions. Unordered unless the caller
/// sorts; dropping the stream cancels the underlying scan.
pub type ExecutionStream = Pin<Box<dyn Stream<Item = Execution> + Send + 'static>>;

pub fn execution_key(execution_type: ExecutionType, id: &str) -> String {
    format!("{}:{}", execution_type.key_name(), id)
}

fn stage_index_key(execution_key: &str) -> String {
    format!("{}:stageIndex", execution_key)
}

fn all_jobs_key(execution_type: ExecutionType) -> String {
    format!("allJobs:{}", execution_type.key_name())
}

fn app_key(execution_type: ExecutionType, application: &str) -> String {
    format!("{}:app:{}", execution_type.key_name(), application)
}

fn app_key_pattern(execution_type: Option<ExecutionType>) -> String {
    match execution_type {
        Some(t) => format!("{}:app:*", t.key_name()),
        None => "*:app:*".to_string(),
    }
}

fn executions_by_pipeline_key(pipeline_config_id: Option<&str>) -> String {
    format!(
        "pipeline:executions:{}",
        pipeline_config_id.unwrap_or("---")
    )
}

fn correlation_key(correlation_id: &str) -> String {
    format!("correlation:{}", correlation_id)
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy)]
enum IndexKind {
    Set,
    SortedSet,
}

enum IdSource {
    /// Members of a set index, listed inside the scan task.
    Set { key: String },
    /// Ids already known, optionally backed by an index to self-heal.
    Listed {
        ids: Vec<String>,
        heal: Option<(String, IndexKind)>,
    },
}

struct ScanTarget {
    store: Arc<dyn KeyValueStore>,
    execution_type: ExecutionType,
    ids: IdSource,
    /// Post-hydration status filter.
    statuses: Option<HashSet<ExecutionStatus>>,
    /// Max executions produced by this scan; zero means unbounded.
    limit: usize,
}

/// Reads an execution out of one store generation. The hash and its stage
/// index are read atomically; an empty index falls back to recovering stage
/// ids from serialized key paths (legacy data, best-effort order).
async fn hydrate(
    store: &dyn KeyValueStore,
    execution_type: ExecutionType,
    id: &str,
) -> RepositoryResult<Execution> {
    let key = execution_key(execution_type, id);
    if !store.exists(&key).await? {
        return Err(RepositoryError::not_found(execution_type, id));
    }

    let (map, mut stage_ids) = store.hash_with_list(&key, &stage_index_key(&key)).await?;
    if stage_ids.is_empty() {
        stage_ids = extract_stage_ids(&map);
    }
    build_execution(execution_type, id, &map, &stage_ids)
}

fn merged(streams: Vec<ReceiverStream<Execution>>) -> ExecutionStream {
    let mut result: ExecutionStream = Box::pin(tokio_stream::empty());
    for stream in streams {
        result = Box::pin(result.merge(stream));
    }
    result
}

fn truncate_ids(mut ids: Vec<String>, limit: usize) -> Vec<String> {
    if limit > 0 && ids.len() > limit {
        ids.truncate(limit);
    }
    ids
}

/// The execution repository over one or two store generations.
///
/// Individual `store`/`store_stage` calls are atomic, but read-modify-write
/// sequences across calls are not isolated; callers serialize their own
/// writes to a given execution id.
#[derive(Clone)]
pub struct ExecutionRepository {
    generations: StoreGenerations,
    config: Arc<RepositoryConfig>,
    query_all: Arc<Semaphore>,
    query_by_app: Arc<Semaphore>,
}

impl ExecutionRepository {
    pub fn new(generations: StoreGenerations) -> Self {
        Self::with_config(generations, RepositoryConfig::default())
    }

    pub fn with_config(generations: StoreGenerations, config: RepositoryConfig) -> Self {
        let query_all = Arc::new(Semaphore::new(config.query_all_concurrency));
        let query_by_app = Arc::new(Semaphore::new(config.query_by_app_concurrency));
        Self {
            generations,
            config: Arc::new(config),
            query_all,
            query_by_app,
        }
    }

    fn buffered_key(&self, execution_type: ExecutionType) -> String {
        match &self.config.buffered_prefix {
            Some(prefix) => format!("{}:buffered:{}", prefix, execution_type.key_name()),
            None => format!("buffered:{}", execution_type.key_name()),
        }
    }

    /// Upserts the full execution graph. Re-storing the same id overwrites.
    pub async fn store(&self, execution: &Execution) -> RepositoryResult<()> {
        let store = self
            .generations
            .store_for(execution.execution_type, &execution.id)
            .await?;
        let key = execution_key(execution.execution_type, &execution.id);
        let index_key = stage_index_key(&key);
        let (fields, clear) = split_fields(serialize_execution(execution)?);

        let mut batch = WriteBatch::new();
        batch.set_add(all_jobs_key(execution.execution_type), execution.id.clone());
        batch.set_add(
            app_key(execution.execution_type, &execution.application),
            execution.id.clone(),
        );
        if execution.status == ExecutionStatus::Buffered {
            batch.set_add(
                self.buffered_key(execution.execution_type),
                execution.id.clone(),
            );
        } else {
            batch.set_remove(
                self.buffered_key(execution.execution_type),
                execution.id.clone(),
            );
        }
        if !clear.is_empty() {
            batch.hash_delete(&key, clear);
        }
        batch.hash_set(&key, fields);
        if !execution.stages.is_empty() {
            batch.list_clear(&index_key);
            batch.list_push(
                &index_key,
                execution.stages.iter().map(|s| s.id.clone()).collect(),
            );
        }
        if let Some(correlation_id) = &execution.trigger.correlation_id {
            batch.set(correlation_key(correlation_id), execution.id.clone());
        }
        if execution.execution_type == ExecutionType::Pipeline {
            let score = execution.build_time.unwrap_or_else(now_millis);
            batch.sorted_set_add(
                executions_by_pipeline_key(execution.pipeline_config_id.as_deref()),
                execution.id.clone(),
                score,
            );
        }

        store.write(batch).await?;
        Ok(())
    }

    /// Rewrites a single stage's serialized fields, leaving unrelated stages
    /// untouched.
    pub async fn store_stage(
        &self,
        execution_type: ExecutionType,
        execution_id: &str,
        stage: &Stage,
    ) -> RepositoryResult<()> {
        self.store_stage_internal(execution_type, execution_id, stage, false)
            .await
    }

    /// Inserts a synthetic stage ad-hoc, placing its id immediately before
    /// or after its parent in the stage order index.
    pub async fn add_stage(
        &self,
        execution_type: ExecutionType,
        execution_id: &str,
        stage: &Stage,
    ) -> RepositoryResult<()> {
        if !stage.is_synthetic() {
            return Err(RepositoryError::InvalidOperation(
                "only synthetic stages can be inserted ad-hoc".to_string(),
            ));
        }
        self.store_stage_internal(execution_type, execution_id, stage, true)
            .await
    }

    async fn store_stage_internal(
        &self,
        execution_type: ExecutionType,
        execution_id: &str,
        stage: &Stage,
        update_index: bool,
    ) -> RepositoryResult<()> {
        let store = self
            .generations
            .store_for(execution_type, execution_id)
            .await?;
        let key = execution_key(execution_type, execution_id);
        let (fields, clear) = split_fields(serialize_stage(execution_id, stage)?);

        let mut batch = WriteBatch::new();
        batch.hash_set(&key, fields);
        if !clear.is_empty() {
            batch.hash_delete(&key, clear);
        }
        if update_index {
            let position = match stage.synthetic_stage_owner {
                Some(SyntheticStageOwner::StageBefore) => ListPosition::Before,
                _ => ListPosition::After,
            };
            batch.list_insert(
                stage_index_key(&key),
                position,
                stage.parent_stage_id.clone().unwrap_or_default(),
                stage.id.clone(),
            );
        }
        store.write(batch).await?;
        Ok(())
    }

    /// Rewrites only the stage's context field.
    pub async fn update_stage_context(
        &self,
        execution_type: ExecutionType,
        execution_id: &str,
        stage: &Stage,
    ) -> RepositoryResult<()> {
        let store = self
            .generations
            .store_for(execution_type, execution_id)
            .await?;
        let key = execution_key(execution_type, execution_id);
        let context = serde_json::to_string(&stage.context).map_err(|e| {
            RepositoryError::serialization(execution_id, Some(stage.id.clone()), e.to_string())
        })?;

        let mut fields = HashMap::new();
        fields.insert(format!("stage.{}.context", stage.id), context);
        let mut batch = WriteBatch::new();
        batch.hash_set(&key, fields);
        store.write(batch).await?;
        Ok(())
    }

    /// Removes a stage's serialized fields and its stage index entry.
    pub async fn remove_stage(
        &self,
        execution_type: ExecutionType,
        execution_id: &str,
        stage_id: &str,
    ) -> RepositoryResult<()> {
        let store = self
            .generations
            .store_for(execution_type, execution_id)
            .await?;
        let key = execution_key(execution_type, execution_id);
        let prefix = format!("stage.{}.", stage_id);
        let stage_fields: Vec<String> = store
            .hash_keys(&key)
            .await?
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .collect();

        let mut batch = WriteBatch::new();
        batch.list_remove(stage_index_key(&key), stage_id);
        if !stage_fields.is_empty() {
            batch.hash_delete(&key, stage_fields);
        }
        store.write(batch).await?;
        Ok(())
    }

    async fn current_status(
        &self,
        store: &dyn KeyValueStore,
        key: &str,
        id: &str,
    ) -> RepositoryResult<ExecutionStatus> {
        match store.hash_get(key, "status").await? {
            Some(raw) => raw
                .parse::<ExecutionStatus>()
                .map_err(|e| RepositoryError::serialization(id, None, e)),
            None => Ok(ExecutionStatus::NotStarted),
        }
    }

    /// Transitions status. Entering RUNNING clears the canceled flag and
    /// stamps the start time; entering a completed status stamps the end
    /// time when a start time exists; BUFFERED maintains the buffered index.
    /// All writes land in one atomic batch.
    pub async fn update_status(
        &self,
        execution_type: ExecutionType,
        id: &str,
        status: ExecutionStatus,
    ) -> RepositoryResult<()> {
        let store = self.generations.store_for(execution_type, id).await?;
        let key = execution_key(execution_type, id);
        let start_time = store.hash_get(&key, "startTime").await?;

        let mut fields = HashMap::new();
        fields.insert("status".to_string(), status.to_string());
        if status == ExecutionStatus::Running {
            fields.insert("canceled".to_string(), "false".to_string());
            fields.insert("startTime".to_string(), now_millis().to_string());
        } else if status.is_complete() && start_time.is_some() {
            fields.insert("endTime".to_string(), now_millis().to_string());
        }

        let mut batch = WriteBatch::new();
        batch.hash_set(&key, fields);
        if status == ExecutionStatus::Buffered {
            batch.set_add(self.buffered_key(execution_type), id);
        } else {
            batch.set_remove(self.buffered_key(execution_type), id);
        }
        store.write(batch).await?;
        Ok(())
    }

    /// Requests cancellation. A NOT_STARTED execution is force-set to
    /// CANCELED (nothing is running to stop); otherwise only the canceled
    /// flag is set and the task runner is expected to observe it and stop
    /// cooperatively.
    pub async fn cancel(
        &self,
        execution_type: ExecutionType,
        id: &str,
        user: Option<&str>,
        reason: Option<&str>,
    ) -> RepositoryResult<()> {
        let (_, key, store) = self.generations.locate(id).await?;
        let current = self.current_status(store.as_ref(), &key, id).await?;

        let mut fields = HashMap::new();
        fields.insert("canceled".to_string(), "true".to_string());
        if let Some(user) = user.filter(|u| !u.is_empty()) {
            fields.insert("canceledBy".to_string(), user.to_string());
        }
        if let Some(reason) = reason.filter(|r| !r.is_empty()) {
            fields.insert("cancellationReason".to_string(), reason.to_string());
        }
        if current == ExecutionStatus::NotStarted {
            fields.insert("status".to_string(), ExecutionStatus::Canceled.to_string());
        }

        let mut batch = WriteBatch::new();
        batch.hash_set(&key, fields);
        batch.set_remove(self.buffered_key(execution_type), id);
        store.write(batch).await?;
        Ok(())
    }

    pub async fn is_canceled(
        &self,
        execution_type: ExecutionType,
        id: &str,
    ) -> RepositoryResult<bool> {
        let store = self.generations.store_for(execution_type, id).await?;
        let key = execution_key(execution_type, id);
        Ok(store
            .hash_get(&key, "canceled")
            .await?
            .map(|v| v == "true")
            .unwrap_or(false))
    }

    pub async fn pause(
        &self,
        execution_type: ExecutionType,
        id: &str,
        user: Option<&str>,
    ) -> RepositoryResult<()> {
        let (_, key, store) = self.generations.locate(id).await?;
        let current = self.current_status(store.as_ref(), &key, id).await?;
        if current != ExecutionStatus::Running {
            return Err(RepositoryError::InvalidState(format!(
                "unable to pause pipeline that is not RUNNING (executionId: {}, currentStatus: {})",
                id, current
            )));
        }

        let paused = PausedDetails {
            paused_by: user.map(String::from),
            pause_time: Some(now_millis()),
            ..PausedDetails::default()
        };
        let paused_json = serde_json::to_string(&paused)
            .map_err(|e| RepositoryError::serialization(id, None, e.to_string()))?;

        let mut fields = HashMap::new();
        fields.insert("paused".to_string(), paused_json);
        fields.insert("status".to_string(), ExecutionStatus::Paused.to_string());
        let mut batch = WriteBatch::new();
        batch.hash_set(&key, fields);
        batch.set_remove(self.buffered_key(execution_type), id);
        store.write(batch).await?;
        Ok(())
    }

    pub async fn resume(
        &self,
        execution_type: ExecutionType,
        id: &str,
        user: Option<&str>,
        ignore_current_status: bool,
    ) -> RepositoryResult<()> {
        let (_, key, store) = self.generations.locate(id).await?;
        let current = self.current_status(store.as_ref(), &key, id).await?;
        if !ignore_current_status && current != ExecutionStatus::Paused {
            return Err(RepositoryError::InvalidState(format!(
                "unable to resume pipeline that is not PAUSED (executionId: {}, currentStatus: {})",
                id, current
            )));
        }

        let mut paused: PausedDetails = match store.hash_get(&key, "paused").await? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| RepositoryError::serialization(id, None, e.to_string()))?,
            None => PausedDetails::default(),
        };
        paused.resumed_by = user.map(String::from);
        paused.resume_time = Some(now_millis());
        let paused_json = serde_json::to_string(&paused)
            .map_err(|e| RepositoryError::serialization(id, None, e.to_string()))?;

        let mut fields = HashMap::new();
        fields.insert("paused".to_string(), paused_json);
        fields.insert("status".to_string(), ExecutionStatus::Running.to_string());
        let mut batch = WriteBatch::new();
        batch.hash_set(&key, fields);
        batch.set_remove(self.buffered_key(execution_type), id);
        store.write(batch).await?;
        Ok(())
    }

    /// Fails with NotFound when the id is absent from every generation.
    pub async fn retrieve(
        &self,
        execution_type: ExecutionType,
        id: &str,
    ) -> RepositoryResult<Execution> {
        let store = self.generations.store_for(execution_type, id).await?;
        hydrate(store.as_ref(), execution_type, id).await
    }

    /// All executions of a type, lazily, merged across generations.
    pub fn retrieve_all(&self, execution_type: ExecutionType) -> ExecutionStream {
        let streams = self
            .generations
            .all()
            .into_iter()
            .map(|store| {
                self.spawn_scan(
                    ScanTarget {
                        store,
                        execution_type,
                        ids: IdSource::Set {
                            key: all_jobs_key(execution_type),
                        },
                        statuses: None,
                        limit: 0,
                    },
                    Arc::clone(&self.query_all),
                )
            })
            .collect();
        merged(streams)
    }

    /// All executions of a type, filtered by status set and capped per
    /// generation.
    pub fn retrieve_by_criteria(
        &self,
        execution_type: ExecutionType,
        criteria: &ExecutionCriteria,
    ) -> ExecutionStream {
        let statuses: Option<HashSet<ExecutionStatus>> = if criteria.statuses.is_empty() {
            None
        } else {
            Some(criteria.statuses.iter().copied().collect())
        };
        let streams = self
            .generations
            .all()
            .into_iter()
            .map(|store| {
                self.spawn_scan(
                    ScanTarget {
                        store,
                        execution_type,
                        ids: IdSource::Set {
                            key: all_jobs_key(execution_type),
                        },
                        statuses: statuses.clone(),
                        limit: criteria.limit,
                    },
                    Arc::clone(&self.query_all),
                )
            })
            .collect();
        merged(streams)
    }

    pub fn retrieve_pipelines_for_application(&self, application: &str) -> ExecutionStream {
        let streams = self
            .generations
            .all()
            .into_iter()
            .map(|store| {
                self.spawn_scan(
                    ScanTarget {
                        store,
                        execution_type: ExecutionType::Pipeline,
                        ids: IdSource::Set {
                            key: app_key(ExecutionType::Pipeline, application),
                        },
                        statuses: None,
                        limit: 0,
                    },
                    Arc::clone(&self.query_by_app),
                )
            })
            .collect();
        merged(streams)
    }

    /// Orchestrations for an application. A non-empty status set pre-filters
    /// candidate ids with a bulk status lookup before anything is hydrated.
    pub async fn retrieve_orchestrations_for_application(
        &self,
        application: &str,
        criteria: &ExecutionCriteria,
    ) -> RepositoryResult<ExecutionStream> {
        let key = app_key(ExecutionType::Orchestration, application);
        let mut streams = Vec::new();

        for store in self.generations.all() {
            let candidates = store.set_members(&key).await?;
            let ids = if criteria.statuses.is_empty() {
                truncate_ids(candidates, criteria.limit)
            } else {
                let filtered = self
                    .filter_ids_by_status(
                        store.as_ref(),
                        ExecutionType::Orchestration,
                        candidates,
                        &criteria.statuses,
                    )
                    .await?;
                truncate_ids(filtered, criteria.limit)
            };

            streams.push(self.spawn_scan(
                ScanTarget {
                    store,
                    execution_type: ExecutionType::Orchestration,
                    ids: IdSource::Listed {
                        ids,
                        heal: Some((key.clone(), IndexKind::Set)),
                    },
                    statuses: None,
                    limit: 0,
                },
                Arc::clone(&self.query_by_app),
            ));
        }
        Ok(merged(streams))
    }

    /// Materializing overload: applies the start-time cutoff, sorts with the
    /// comparator and truncates to the criteria limit.
    pub async fn retrieve_orchestrations_for_application_sorted(
        &self,
        application: &str,
        criteria: &ExecutionCriteria,
        comparator: Option<ExecutionComparator>,
    ) -> RepositoryResult<Vec<Execution>> {
        let cutoff = criteria.start_time_cutoff;
        let stream = self
            .retrieve_orchestrations_for_application(application, criteria)
            .await?;
        let mut executions: Vec<Execution> = stream
            .filter(|execution| match cutoff {
                Some(cutoff) => {
                    let start_time = execution.start_time.unwrap_or(0);
                    start_time == 0 || start_time > cutoff
                }
                None => true,
            })
            .collect()
            .await;

        if let Some(comparator) = comparator {
            executions.sort_by(|a, b| comparator.compare(a, b));
        }
        if criteria.limit > 0 && executions.len() > criteria.limit {
            executions.truncate(criteria.limit);
        }
        Ok(executions)
    }

    /// The most recent executions of one pipeline config, reverse
    /// chronological. A non-empty status set pre-filters candidates by bulk
    /// status lookup; previous-generation ids already seen in current are
    /// excluded.
    pub async fn retrieve_pipelines_for_pipeline_config_id(
        &self,
        pipeline_config_id: &str,
        criteria: &ExecutionCriteria,
    ) -> RepositoryResult<ExecutionStream> {
        let index_key = executions_by_pipeline_key(Some(pipeline_config_id));
        let mut streams = Vec::new();
        let mut current_ids: Vec<String> = Vec::new();

        for (generation, store) in self.generations.all().into_iter().enumerate() {
            let ids = if criteria.statuses.is_empty() {
                store
                    .sorted_set_range_desc(
                        &index_key,
                        (criteria.limit > 0).then_some(criteria.limit),
                    )
                    .await?
            } else {
                let candidates = store.sorted_set_range_desc(&index_key, None).await?;
                let filtered = self
                    .filter_ids_by_status(
                        store.as_ref(),
                        ExecutionType::Pipeline,
                        candidates,
                        &criteria.statuses,
                    )
                    .await?;
                truncate_ids(filtered, criteria.limit)
            };

            let ids = if generation == 0 {
                current_ids = ids.clone();
                ids
            } else {
                ids.into_iter()
                    .filter(|id| !current_ids.contains(id))
                    .collect()
            };

            streams.push(self.spawn_scan(
                ScanTarget {
                    store,
                    execution_type: ExecutionType::Pipeline,
                    ids: IdSource::Listed {
                        ids,
                        heal: Some((index_key.clone(), IndexKind::SortedSet)),
                    },
                    statuses: None,
                    limit: 0,
                },
                Arc::clone(&self.query_by_app),
            ));
        }
        Ok(merged(streams))
    }

    /// Store-side range query across many pipeline configs at once, for bulk
    /// search. Results are unordered; `limit` caps each generation's stream.
    pub fn retrieve_pipelines_for_pipeline_config_ids_between_build_time_boundary(
        &self,
        pipeline_config_ids: &[String],
        build_time_start_boundary: i64,
        build_time_end_boundary: i64,
        limit: usize,
    ) -> ExecutionStream {
        let mut streams = Vec::new();
        for store in self.generations.all() {
            let config_ids = pipeline_config_ids.to_vec();
            let pool = Arc::clone(&self.query_all);
            let (tx, rx) = mpsc::channel(self.config.chunk_size);

            tokio::spawn(async move {
                let Ok(_permit) = pool.acquire_owned().await else {
                    return;
                };
                let mut produced = 0usize;
                'configs: for config_id in config_ids {
                    let index_key = executions_by_pipeline_key(Some(&config_id));
                    let ids = match store
                        .sorted_set_range_by_score(
                            &index_key,
                            build_time_start_boundary,
                            build_time_end_boundary,
                        )
                        .await
                    {
                        Ok(ids) => ids,
                        Err(e) => {
                            error!("Failed to range pipeline config '{}': {}", config_id, e);
                            continue;
                        }
                    };

                    for id in ids {
                        if limit > 0 && produced >= limit {
                            break 'configs;
                        }
                        match hydrate(store.as_ref(), ExecutionType::Pipeline, &id).await {
                            Ok(execution) => {
                                produced += 1;
                                if tx.send(execution).await.is_err() {
                                    break 'configs;
                                }
                            }
                            Err(e) if e.is_not_found() => {
                                info!("Execution ({}) does not exist", id);
                                let mut batch = WriteBatch::new();
                                batch.sorted_set_remove(&index_key, &id);
                                if let Err(heal_err) = store.write(batch).await {
                                    warn!(
                                        "Failed to remove stale index entry '{}': {}",
                                        id, heal_err
                                    );
                                }
                            }
                            Err(e) => {
                                error!("Failed to retrieve execution '{}': {}", id, e);
                            }
                        }
                    }
                }
            });
            streams.push(ReceiverStream::new(rx));
        }
        merged(streams)
    }

    /// Every execution currently flagged BUFFERED, across both types and
    /// all generations.
    pub async fn retrieve_buffered_executions(&self) -> RepositoryResult<Vec<Execution>> {
        let mut streams = Vec::new();
        for store in self.generations.all() {
            for execution_type in [ExecutionType::Pipeline, ExecutionType::Orchestration] {
                streams.push(self.spawn_scan(
                    ScanTarget {
                        store: Arc::clone(&store),
                        execution_type,
                        ids: IdSource::Set {
                            key: self.buffered_key(execution_type),
                        },
                        statuses: None,
                        limit: 0,
                    },
                    Arc::clone(&self.query_all),
                ));
            }
        }

        let executions: Vec<Execution> = merged(streams)
            .filter(|e| e.status == ExecutionStatus::Buffered)
            .collect()
            .await;
        Ok(executions)
    }

    /// Looks up a still-incomplete orchestration by its trigger correlation
    /// id. Correlation ids are valid only until the correlated execution
    /// finishes: a completed match clears the stale mapping and reports
    /// NotFound.
    pub async fn retrieve_orchestration_for_correlation_id(
        &self,
        correlation_id: &str,
    ) -> RepositoryResult<Execution> {
        let key = correlation_key(correlation_id);
        let store = self.generations.store_for_key(&key).await?;

        if let Some(orchestration_id) = store.get(&key).await? {
            let orchestration_store = self
                .generations
                .store_for(ExecutionType::Orchestration, &orchestration_id)
                .await?;
            let orchestration = hydrate(
                orchestration_store.as_ref(),
                ExecutionType::Orchestration,
                &orchestration_id,
            )
            .await?;

            if !orchestration.status.is_complete() {
                return Ok(orchestration);
            }
            let mut batch = WriteBatch::new();
            batch.delete(&key);
            store.write(batch).await?;
        }

        Err(RepositoryError::NotFoundAny(format!(
            "for correlation ID {}",
            correlation_id
        )))
    }

    pub async fn has_execution(
        &self,
        execution_type: ExecutionType,
        id: &str,
    ) -> RepositoryResult<bool> {
        let key = execution_key(execution_type, id);
        for store in self.generations.all() {
            if store.exists(&key).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn retrieve_all_execution_ids(
        &self,
        execution_type: ExecutionType,
    ) -> RepositoryResult<Vec<String>> {
        let key = all_jobs_key(execution_type);
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for store in self.generations.all() {
            for id in store.set_members(&key).await? {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Scans per-application index keys and aggregates execution counts per
    /// application, keeping applications meeting the minimum.
    pub async fn retrieve_all_application_names(
        &self,
        execution_type: Option<ExecutionType>,
        min_executions: u64,
    ) -> RepositoryResult<Vec<String>> {
        let pattern = app_key_pattern(execution_type);
        let mut counts: HashMap<String, u64> = HashMap::new();

        for store in self.generations.all() {
            for key in store.scan_keys(&pattern).await? {
                let Some(application) = key.splitn(3, ':').nth(2) else {
                    continue;
                };
                let count = store.set_size(&key).await?;
                *counts.entry(application.to_string()).or_insert(0) += count;
            }
        }

        let mut applications: Vec<String> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_executions)
            .map(|(application, _)| application)
            .collect();
        applications.sort();
        Ok(applications)
    }

    /// Removes the execution and scrubs every index it participated in.
    pub async fn delete(&self, execution_type: ExecutionType, id: &str) -> RepositoryResult<()> {
        let store = self.generations.store_for(execution_type, id).await?;
        let key = execution_key(execution_type, id);

        let mut batch = WriteBatch::new();
        if let Some(application) = store.hash_get(&key, "application").await? {
            batch.set_remove(app_key(execution_type, &application), id);
        }
        batch.set_remove(self.buffered_key(execution_type), id);
        if execution_type == ExecutionType::Pipeline {
            let config_id = store.hash_get(&key, "pipelineConfigId").await?;
            batch.sorted_set_remove(executions_by_pipeline_key(config_id.as_deref()), id);
        }
        batch.delete(&key);
        batch.delete(stage_index_key(&key));
        batch.set_remove(all_jobs_key(execution_type), id);
        store.write(batch).await?;
        Ok(())
    }

    /// Bulk status lookup: keeps the ids whose stored status parses and is
    /// in the allowed set, preserving input order.
    async fn filter_ids_by_status(
        &self,
        store: &dyn KeyValueStore,
        execution_type: ExecutionType,
        ids: Vec<String>,
        statuses: &[ExecutionStatus],
    ) -> RepositoryResult<Vec<String>> {
        if ids.is_empty() {
            return Ok(ids);
        }
        let keys: Vec<String> = ids
            .iter()
            .map(|id| execution_key(execution_type, id))
            .collect();
        let raw_statuses = store.hash_get_many(&keys, "status").await?;
        let allowed: HashSet<ExecutionStatus> = statuses.iter().copied().collect();

        Ok(ids
            .into_iter()
            .zip(raw_statuses)
            .filter_map(|(id, raw)| {
                let status = raw?.parse::<ExecutionStatus>().ok()?;
                allowed.contains(&status).then_some(id)
            })
            .collect())
    }

    /// Spawns a producer task that hydrates executions behind a bounded
    /// channel. Retrieval errors are logged and the execution skipped; an
    /// index entry pointing at a missing execution is removed.
    fn spawn_scan(&self, target: ScanTarget, pool: Arc<Semaphore>) -> ReceiverStream<Execution> {
        let (tx, rx) = mpsc::channel(self.config.chunk_size);
        let ScanTarget {
            store,
            execution_type,
            ids: id_source,
            statuses,
            limit,
        } = target;

        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                return;
            };

            let (ids, heal) = match id_source {
                IdSource::Set { key } => match store.set_members(&key).await {
                    Ok(ids) => (ids, Some((key, IndexKind::Set))),
                    Err(e) => {
                        error!("Failed to list index '{}': {}", key, e);
                        return;
                    }
                },
                IdSource::Listed { ids, heal } => (ids, heal),
            };

            let mut produced = 0usize;
            for id in ids {
                if limit > 0 && produced >= limit {
                    break;
                }
                match hydrate(store.as_ref(), execution_type, &id).await {
                    Ok(execution) => {
                        if let Some(statuses) = &statuses {
                            if !statuses.contains(&execution.status) {
                                continue;
                            }
                        }
                        produced += 1;
                        if tx.send(execution).await.is_err() {
                            // Consumer stopped pulling.
                            break;
                        }
                    }
                    Err(e) if e.is_not_found() => {
                        info!("Execution ({}) does not exist", id);
                        if let Some((heal_key, kind)) = &heal {
                            let mut batch = WriteBatch::new();
                            match kind {
                                IndexKind::Set => batch.set_remove(heal_key.clone(), id.clone()),
                                IndexKind::SortedSet => {
                                    batch.sorted_set_remove(heal_key.clone(), id.clone())
                                }
                            };
                            if let Err(heal_err) = store.write(batch).await {
                                warn!(
                                    "Failed to remove stale index entry '{}': {}",
                                    id, heal_err
                                );
                            }
                        }
                    }
                    Err(e) => {
                        error!("Failed to retrieve execution '{}': {}", id, e);
                    }
                }
            }
        });

        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use capstan_core::domain::Trigger;

    fn repository() -> (ExecutionRepository, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let repo = ExecutionRepository::new(StoreGenerations::new(store.clone()));
        (repo, store)
    }

    fn make_pipeline(id: &str, config_id: &str, build_time: i64) -> Execution {
        let mut execution = Execution::new(ExecutionType::Pipeline, id, "myapp");
        execution.pipeline_config_id = Some(config_id.to_string());
        execution.build_time = Some(build_time);
        execution
    }

    fn make_stage(id: &str, ref_id: &str) -> Stage {
        let mut stage = Stage::new("wait");
        stage.id = id.to_string();
        stage.ref_id = Some(ref_id.to_string());
        stage
    }

    #[tokio::test]
    async fn test_store_and_retrieve_roundtrip() {
        let (repo, _) = repository();
        let mut execution = make_pipeline("e1", "cfg-1", 1_000);
        execution.stages = vec![make_stage("s1", "1"), make_stage("s2", "2")];

        repo.store(&execution).await.unwrap();
        let fetched = repo.retrieve(ExecutionType::Pipeline, "e1").await.unwrap();
        assert_eq!(fetched, execution);

        let order: Vec<_> = fetched.stages.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_retrieve_missing_is_not_found() {
        let (repo, _) = repository();
        let err = repo
            .retrieve(ExecutionType::Orchestration, "nope")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_status_running_side_effects() {
        let (repo, _) = repository();
        let mut execution = make_pipeline("e1", "cfg-1", 1_000);
        execution.canceled = true;
        repo.store(&execution).await.unwrap();

        repo.update_status(ExecutionType::Pipeline, "e1", ExecutionStatus::Running)
            .await
            .unwrap();
        let fetched = repo.retrieve(ExecutionType::Pipeline, "e1").await.unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Running);
        assert!(!fetched.canceled);
        assert!(fetched.start_time.is_some());
        assert!(fetched.end_time.is_none());

        repo.update_status(ExecutionType::Pipeline, "e1", ExecutionStatus::Succeeded)
            .await
            .unwrap();
        let fetched = repo.retrieve(ExecutionType::Pipeline, "e1").await.unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Succeeded);
        assert!(fetched.end_time.is_some());
    }

    #[tokio::test]
    async fn test_completed_without_start_time_has_no_end_time() {
        let (repo, _) = repository();
        repo.store(&make_pipeline("e1", "cfg-1", 1_000)).await.unwrap();

        repo.update_status(ExecutionType::Pipeline, "e1", ExecutionStatus::Terminal)
            .await
            .unwrap();
        let fetched = repo.retrieve(ExecutionType::Pipeline, "e1").await.unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Terminal);
        assert!(fetched.end_time.is_none());
    }

    #[tokio::test]
    async fn test_buffered_index_follows_status() {
        let (repo, _) = repository();
        repo.store(&make_pipeline("e1", "cfg-1", 1_000)).await.unwrap();

        repo.update_status(ExecutionType::Pipeline, "e1", ExecutionStatus::Buffered)
            .await
            .unwrap();
        let buffered = repo.retrieve_buffered_executions().await.unwrap();
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].id, "e1");

        repo.update_status(ExecutionType::Pipeline, "e1", ExecutionStatus::Running)
            .await
            .unwrap();
        assert!(repo.retrieve_buffered_executions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_not_started_is_forced_canceled() {
        let (repo, _) = repository();
        let execution = Execution::new(ExecutionType::Orchestration, "x", "myapp");
        repo.store(&execution).await.unwrap();

        repo.cancel(
            ExecutionType::Orchestration,
            "x",
            Some("alice"),
            Some("no longer needed"),
        )
        .await
        .unwrap();

        let fetched = repo.retrieve(ExecutionType::Orchestration, "x").await.unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Canceled);
        assert!(fetched.canceled);
        assert_eq!(fetched.canceled_by.as_deref(), Some("alice"));
        assert_eq!(fetched.cancellation_reason.as_deref(), Some("no longer needed"));
        // Nothing was ever running.
        assert!(fetched.start_time.is_none());
        assert!(fetched.end_time.is_none());
    }

    #[tokio::test]
    async fn test_cancel_running_is_advisory() {
        let (repo, _) = repository();
        repo.store(&make_pipeline("e1", "cfg-1", 1_000)).await.unwrap();
        repo.update_status(ExecutionType::Pipeline, "e1", ExecutionStatus::Running)
            .await
            .unwrap();

        repo.cancel(ExecutionType::Pipeline, "e1", None, None)
            .await
            .unwrap();

        let fetched = repo.retrieve(ExecutionType::Pipeline, "e1").await.unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Running);
        assert!(fetched.canceled);
        assert!(repo.is_canceled(ExecutionType::Pipeline, "e1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_missing_is_not_found() {
        let (repo, _) = repository();
        let err = repo
            .cancel(ExecutionType::Pipeline, "nope", None, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_pause_and_resume_flow() {
        let (repo, _) = repository();
        repo.store(&make_pipeline("e1", "cfg-1", 1_000)).await.unwrap();

        // Pause is only valid from RUNNING.
        let err = repo
            .pause(ExecutionType::Pipeline, "e1", Some("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidState(_)));

        repo.update_status(ExecutionType::Pipeline, "e1", ExecutionStatus::Running)
            .await
            .unwrap();
        repo.pause(ExecutionType::Pipeline, "e1", Some("alice"))
            .await
            .unwrap();

        let fetched = repo.retrieve(ExecutionType::Pipeline, "e1").await.unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Paused);
        let paused = fetched.paused.unwrap();
        assert_eq!(paused.paused_by.as_deref(), Some("alice"));
        assert!(paused.is_paused());

        repo.resume(ExecutionType::Pipeline, "e1", Some("bob"), false)
            .await
            .unwrap();
        let fetched = repo.retrieve(ExecutionType::Pipeline, "e1").await.unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Running);
        let paused = fetched.paused.unwrap();
        assert_eq!(paused.resumed_by.as_deref(), Some("bob"));
        assert!(!paused.is_paused());

        // Resuming a non-paused execution requires the explicit override.
        let err = repo
            .resume(ExecutionType::Pipeline, "e1", Some("bob"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidState(_)));
        repo.resume(ExecutionType::Pipeline, "e1", Some("bob"), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dual_store_fallback_reads_and_writes_in_place() {
        let previous = Arc::new(MemoryStore::new());
        let seed_repo = ExecutionRepository::new(StoreGenerations::new(previous.clone()));
        let execution = make_pipeline("old-1", "cfg-1", 1_000);
        seed_repo.store(&execution).await.unwrap();

        let current = Arc::new(MemoryStore::new());
        let repo = ExecutionRepository::new(StoreGenerations::with_previous(
            current.clone(),
            previous.clone(),
        ));

        let fetched = repo.retrieve(ExecutionType::Pipeline, "old-1").await.unwrap();
        assert_eq!(fetched, execution);

        repo.update_status(ExecutionType::Pipeline, "old-1", ExecutionStatus::Running)
            .await
            .unwrap();
        // The write landed in the previous generation, not as a copy in
        // current.
        assert!(!current.exists("pipeline:old-1").await.unwrap());
        let fetched = repo.retrieve(ExecutionType::Pipeline, "old-1").await.unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Running);

        // New ids still land in current.
        repo.store(&make_pipeline("new-1", "cfg-1", 2_000)).await.unwrap();
        assert!(current.exists("pipeline:new-1").await.unwrap());
        assert!(!previous.exists("pipeline:new-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_stage_orders_relative_to_parent() {
        let (repo, _) = repository();
        let mut execution = make_pipeline("e1", "cfg-1", 1_000);
        execution.stages = vec![make_stage("s1", "1"), make_stage("s2", "2")];
        repo.store(&execution).await.unwrap();

        let mut before = make_stage("syn-before", "2<1");
        before.parent_stage_id = Some("s2".to_string());
        before.synthetic_stage_owner = Some(SyntheticStageOwner::StageBefore);
        repo.add_stage(ExecutionType::Pipeline, "e1", &before)
            .await
            .unwrap();

        let mut after = make_stage("syn-after", "2>1");
        after.parent_stage_id = Some("s2".to_string());
        after.synthetic_stage_owner = Some(SyntheticStageOwner::StageAfter);
        repo.add_stage(ExecutionType::Pipeline, "e1", &after)
            .await
            .unwrap();

        let fetched = repo.retrieve(ExecutionType::Pipeline, "e1").await.unwrap();
        let order: Vec<_> = fetched.stages.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["s1", "syn-before", "s2", "syn-after"]);
    }

    #[tokio::test]
    async fn test_add_stage_rejects_non_synthetic() {
        let (repo, _) = repository();
        let mut execution = make_pipeline("e1", "cfg-1", 1_000);
        execution.stages = vec![make_stage("s1", "1")];
        repo.store(&execution).await.unwrap();

        let err = repo
            .add_stage(ExecutionType::Pipeline, "e1", &make_stage("s2", "2"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_remove_stage_scrubs_fields_and_index() {
        let (repo, store) = repository();
        let mut execution = make_pipeline("e1", "cfg-1", 1_000);
        execution.stages = vec![make_stage("s1", "1"), make_stage("s2", "2")];
        repo.store(&execution).await.unwrap();

        repo.remove_stage(ExecutionType::Pipeline, "e1", "s1")
            .await
            .unwrap();

        let fetched = repo.retrieve(ExecutionType::Pipeline, "e1").await.unwrap();
        let order: Vec<_> = fetched.stages.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["s2"]);

        let leftover: Vec<_> = store
            .hash_keys("pipeline:e1")
            .await
            .unwrap()
            .into_iter()
            .filter(|k| k.starts_with("stage.s1."))
            .collect();
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn test_update_stage_context_touches_only_context() {
        let (repo, _) = repository();
        let mut execution = make_pipeline("e1", "cfg-1", 1_000);
        let mut stage = make_stage("s1", "1");
        stage.name = Some("original".to_string());
        execution.stages = vec![stage];
        repo.store(&execution).await.unwrap();

        let mut updated = execution.stages[0].clone();
        updated.name = Some("locally changed, not persisted".to_string());
        updated
            .context
            .insert("region".to_string(), serde_json::json!("us-east-1"));
        repo.update_stage_context(ExecutionType::Pipeline, "e1", &updated)
            .await
            .unwrap();

        let fetched = repo.retrieve(ExecutionType::Pipeline, "e1").await.unwrap();
        assert_eq!(fetched.stages[0].name.as_deref(), Some("original"));
        assert_eq!(
            fetched.stages[0].context.get("region"),
            Some(&serde_json::json!("us-east-1"))
        );
    }

    #[tokio::test]
    async fn test_pipelines_for_config_id_reverse_chronological() {
        let (repo, _) = repository();
        for (id, build_time) in [("e1", 1_000), ("e2", 2_000), ("e3", 3_000)] {
            repo.store(&make_pipeline(id, "cfg-1", build_time)).await.unwrap();
        }

        let criteria = ExecutionCriteria::default().with_limit(2);
        let stream = repo
            .retrieve_pipelines_for_pipeline_config_id("cfg-1", &criteria)
            .await
            .unwrap();
        let ids: Vec<_> = stream.map(|e| e.id).collect().await;
        assert_eq!(ids, vec!["e3", "e2"]);
    }

    #[tokio::test]
    async fn test_pipelines_for_config_id_status_prefilter() {
        let (repo, _) = repository();
        for (id, build_time) in [("e1", 1_000), ("e2", 2_000), ("e3", 3_000)] {
            repo.store(&make_pipeline(id, "cfg-1", build_time)).await.unwrap();
        }
        repo.update_status(ExecutionType::Pipeline, "e1", ExecutionStatus::Running)
            .await
            .unwrap();
        repo.update_status(ExecutionType::Pipeline, "e1", ExecutionStatus::Succeeded)
            .await
            .unwrap();

        let criteria = ExecutionCriteria::default()
            .with_limit(10)
            .with_statuses(vec![ExecutionStatus::Succeeded]);
        let stream = repo
            .retrieve_pipelines_for_pipeline_config_id("cfg-1", &criteria)
            .await
            .unwrap();
        let ids: Vec<_> = stream.map(|e| e.id).collect().await;
        assert_eq!(ids, vec!["e1"]);
    }

    #[tokio::test]
    async fn test_pipelines_for_config_id_merges_generations() {
        let previous = Arc::new(MemoryStore::new());
        let seed_repo = ExecutionRepository::new(StoreGenerations::new(previous.clone()));
        seed_repo.store(&make_pipeline("old", "cfg-1", 1_000)).await.unwrap();

        let current = Arc::new(MemoryStore::new());
        let repo = ExecutionRepository::new(StoreGenerations::with_previous(current, previous));
        repo.store(&make_pipeline("new", "cfg-1", 2_000)).await.unwrap();

        let stream = repo
            .retrieve_pipelines_for_pipeline_config_id("cfg-1", &ExecutionCriteria::default())
            .await
            .unwrap();
        let mut ids: Vec<_> = stream.map(|e| e.id).collect().await;
        ids.sort();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_correlation_id_lookup_and_staleness() {
        let (repo, store) = repository();
        let mut orchestration = Execution::new(ExecutionType::Orchestration, "o1", "myapp");
        orchestration.trigger = Trigger {
            correlation_id: Some("corr-1".to_string()),
            ..Trigger::default()
        };
        repo.store(&orchestration).await.unwrap();

        let found = repo
            .retrieve_orchestration_for_correlation_id("corr-1")
            .await
            .unwrap();
        assert_eq!(found.id, "o1");

        // Once the orchestration completes, the correlation mapping is
        // stale: the lookup fails and clears it.
        repo.update_status(ExecutionType::Orchestration, "o1", ExecutionStatus::Succeeded)
            .await
            .unwrap();
        let err = repo
            .retrieve_orchestration_for_correlation_id("corr-1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.exists("correlation:corr-1").await.unwrap());

        let err = repo
            .retrieve_orchestration_for_correlation_id("corr-1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_scrubs_all_indices() {
        let (repo, store) = repository();
        let mut execution = make_pipeline("e1", "cfg-1", 1_000);
        execution.stages = vec![make_stage("s1", "1")];
        repo.store(&execution).await.unwrap();
        repo.update_status(ExecutionType::Pipeline, "e1", ExecutionStatus::Buffered)
            .await
            .unwrap();

        repo.delete(ExecutionType::Pipeline, "e1").await.unwrap();

        assert!(!repo.has_execution(ExecutionType::Pipeline, "e1").await.unwrap());
        assert!(!store.exists("pipeline:e1").await.unwrap());
        assert!(!store.exists("pipeline:e1:stageIndex").await.unwrap());
        assert!(repo
            .retrieve_all_execution_ids(ExecutionType::Pipeline)
            .await
            .unwrap()
            .is_empty());
        assert!(repo.retrieve_buffered_executions().await.unwrap().is_empty());

        let stream = repo
            .retrieve_pipelines_for_pipeline_config_id("cfg-1", &ExecutionCriteria::default())
            .await
            .unwrap();
        let remaining: Vec<_> = stream.collect().await;
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_scan_self_heals_stale_index_entries() {
        let (repo, store) = repository();
        repo.store(&make_pipeline("e1", "cfg-1", 1_000)).await.unwrap();
        repo.store(&make_pipeline("e2", "cfg-1", 2_000)).await.unwrap();

        // Simulate a lost record whose index entries remain.
        let mut batch = WriteBatch::new();
        batch.delete("pipeline:e2");
        batch.delete("pipeline:e2:stageIndex");
        store.write(batch).await.unwrap();

        let survivors: Vec<_> = repo
            .retrieve_all(ExecutionType::Pipeline)
            .map(|e| e.id)
            .collect()
            .await;
        assert_eq!(survivors, vec!["e1"]);

        // The stale id was removed from the scanned index.
        let ids = store.set_members("allJobs:pipeline").await.unwrap();
        assert_eq!(ids, vec!["e1"]);
    }

    #[tokio::test]
    async fn test_retrieve_by_criteria_status_and_limit() {
        let (repo, _) = repository();
        for id in ["e1", "e2", "e3"] {
            repo.store(&make_pipeline(id, "cfg-1", 1_000)).await.unwrap();
        }
        repo.update_status(ExecutionType::Pipeline, "e2", ExecutionStatus::Terminal)
            .await
            .unwrap();

        let criteria =
            ExecutionCriteria::default().with_statuses(vec![ExecutionStatus::Terminal]);
        let matching: Vec<_> = repo
            .retrieve_by_criteria(ExecutionType::Pipeline, &criteria)
            .map(|e| e.id)
            .collect()
            .await;
        assert_eq!(matching, vec!["e2"]);

        let criteria = ExecutionCriteria::default().with_limit(2);
        let capped: Vec<_> = repo
            .retrieve_by_criteria(ExecutionType::Pipeline, &criteria)
            .collect()
            .await;
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn test_orchestrations_for_application_sorted() {
        let (repo, _) = repository();
        for (id, start_time) in [("o1", Some(1_000)), ("o2", Some(3_000)), ("o3", None)] {
            let mut orchestration = Execution::new(ExecutionType::Orchestration, id, "myapp");
            orchestration.start_time = start_time;
            repo.store(&orchestration).await.unwrap();
        }

        let criteria = ExecutionCriteria::default().with_limit(2);
        let executions = repo
            .retrieve_orchestrations_for_application_sorted(
                "myapp",
                &criteria,
                Some(ExecutionComparator::StartTimeOrId),
            )
            .await
            .unwrap();
        let ids: Vec<_> = executions.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["o2", "o1"]);

        // A start-time cutoff drops old executions but keeps never-started
        // ones.
        let criteria = ExecutionCriteria::default()
            .with_limit(10)
            .with_start_time_cutoff(2_000);
        let executions = repo
            .retrieve_orchestrations_for_application_sorted(
                "myapp",
                &criteria,
                Some(ExecutionComparator::StartTimeOrId),
            )
            .await
            .unwrap();
        let ids: Vec<_> = executions.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["o2", "o3"]);
    }

    #[tokio::test]
    async fn test_pipelines_for_application() {
        let (repo, _) = repository();
        repo.store(&make_pipeline("e1", "cfg-1", 1_000)).await.unwrap();
        let mut other = make_pipeline("e2", "cfg-2", 2_000);
        other.application = "otherapp".to_string();
        repo.store(&other).await.unwrap();

        let ids: Vec<_> = repo
            .retrieve_pipelines_for_application("myapp")
            .map(|e| e.id)
            .collect()
            .await;
        assert_eq!(ids, vec!["e1"]);
    }

    #[tokio::test]
    async fn test_application_names_with_minimum() {
        let (repo, _) = repository();
        repo.store(&make_pipeline("e1", "cfg-1", 1_000)).await.unwrap();
        repo.store(&make_pipeline("e2", "cfg-1", 2_000)).await.unwrap();
        let mut other = make_pipeline("e3", "cfg-2", 3_000);
        other.application = "otherapp".to_string();
        repo.store(&other).await.unwrap();

        let apps = repo
            .retrieve_all_application_names(Some(ExecutionType::Pipeline), 2)
            .await
            .unwrap();
        assert_eq!(apps, vec!["myapp"]);

        let apps = repo
            .retrieve_all_application_names(Some(ExecutionType::Pipeline), 0)
            .await
            .unwrap();
        assert_eq!(apps, vec!["myapp", "otherapp"]);
    }

    #[tokio::test]
    async fn test_between_build_time_boundary() {
        let (repo, _) = repository();
        repo.store(&make_pipeline("e1", "cfg-a", 100)).await.unwrap();
        repo.store(&make_pipeline("e2", "cfg-b", 200)).await.unwrap();
        repo.store(&make_pipeline("e3", "cfg-a", 300)).await.unwrap();

        let config_ids = vec!["cfg-a".to_string(), "cfg-b".to_string()];
        let ids: Vec<_> = repo
            .retrieve_pipelines_for_pipeline_config_ids_between_build_time_boundary(
                &config_ids,
                150,
                250,
                0,
            )
            .map(|e| e.id)
            .collect()
            .await;
        assert_eq!(ids, vec!["e2"]);

        let capped: Vec<_> = repo
            .retrieve_pipelines_for_pipeline_config_ids_between_build_time_boundary(
                &config_ids,
                0,
                1_000,
                2,
            )
            .collect()
            .await;
        assert_eq!(capped.len(), 2);
    }
}
