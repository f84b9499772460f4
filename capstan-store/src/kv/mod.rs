//! Key-value primitive abstraction
//!
//! The repository is store-agnostic: any ordered key-value engine offering
//! hashes, ordered lists, sets, sorted sets and atomic multi-key write
//! batches satisfies this trait. An in-memory backend ships for embedding
//! and tests.

pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::StoreResult;

pub use memory::MemoryStore;

/// Insertion side for [`WriteCommand::ListInsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPosition {
    Before,
    After,
}

/// One mutation inside an atomic write batch.
#[derive(Debug, Clone)]
pub enum WriteCommand {
    Set { key: String, value: String },
    Delete { key: String },
    HashSet { key: String, fields: HashMap<String, String> },
    HashDelete { key: String, fields: Vec<String> },
    SetAdd { key: String, member: String },
    SetRemove { key: String, member: String },
    SortedSetAdd { key: String, member: String, score: i64 },
    SortedSetRemove { key: String, member: String },
    ListClear { key: String },
    ListPush { key: String, values: Vec<String> },
    ListInsert {
        key: String,
        position: ListPosition,
        pivot: String,
        value: String,
    },
    ListRemove { key: String, value: String },
}

/// An ordered group of mutations applied atomically: either every command
/// lands or none does. Index maintenance that must stay consistent with a
/// primary record (status + buffered set, execution hash + stage index) is
/// always expressed as a single batch.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub commands: Vec<WriteCommand>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: WriteCommand) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(WriteCommand::Set {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(WriteCommand::Delete { key: key.into() })
    }

    pub fn hash_set(
        &mut self,
        key: impl Into<String>,
        fields: HashMap<String, String>,
    ) -> &mut Self {
        self.push(WriteCommand::HashSet {
            key: key.into(),
            fields,
        })
    }

    pub fn hash_delete(&mut self, key: impl Into<String>, fields: Vec<String>) -> &mut Self {
        self.push(WriteCommand::HashDelete {
            key: key.into(),
            fields,
        })
    }

    pub fn set_add(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(WriteCommand::SetAdd {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn set_remove(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(WriteCommand::SetRemove {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn sorted_set_add(
        &mut self,
        key: impl Into<String>,
        member: impl Into<String>,
        score: i64,
    ) -> &mut Self {
        self.push(WriteCommand::SortedSetAdd {
            key: key.into(),
            member: member.into(),
            score,
        })
    }

    pub fn sorted_set_remove(
        &mut self,
        key: impl Into<String>,
        member: impl Into<String>,
    ) -> &mut Self {
        self.push(WriteCommand::SortedSetRemove {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn list_clear(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(WriteCommand::ListClear { key: key.into() })
    }

    pub fn list_push(&mut self, key: impl Into<String>, values: Vec<String>) -> &mut Self {
        self.push(WriteCommand::ListPush {
            key: key.into(),
            values,
        })
    }

    pub fn list_insert(
        &mut self,
        key: impl Into<String>,
        position: ListPosition,
        pivot: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.push(WriteCommand::ListInsert {
            key: key.into(),
            position,
            pivot: pivot.into(),
            value: value.into(),
        })
    }

    pub fn list_remove(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(WriteCommand::ListRemove {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// The primitive surface the repository is built on.
///
/// Absent keys read as empty values; readers never block writers beyond the
/// duration of a single call.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Bulk single-field read across many hashes, in input order. Missing
    /// hashes and missing fields yield `None`.
    async fn hash_get_many(&self, keys: &[String], field: &str)
        -> StoreResult<Vec<Option<String>>>;

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    async fn hash_keys(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Atomic paired read of a hash and its companion ordered index.
    async fn hash_with_list(
        &self,
        hash_key: &str,
        list_key: &str,
    ) -> StoreResult<(HashMap<String, String>, Vec<String>)>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    async fn set_size(&self, key: &str) -> StoreResult<u64>;

    /// Members of a sorted set, highest score first, optionally capped.
    async fn sorted_set_range_desc(
        &self,
        key: &str,
        limit: Option<usize>,
    ) -> StoreResult<Vec<String>>;

    /// Members of a sorted set with scores in `[min, max]`, ascending.
    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> StoreResult<Vec<String>>;

    /// Keys matching a `*` glob pattern.
    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Applies a batch of mutations atomically.
    async fn write(&self, batch: WriteBatch) -> StoreResult<()>;
}
