//! Capstan Store
//!
//! Durable, queryable persistence for execution graphs over a pluggable
//! ordered key-value store.
//!
//! This crate contains:
//! - `kv`: the key-value primitive abstraction and an in-memory backend
//! - `generation`: current/previous store selection for live migration
//! - `serialization`: the flat hash layout for executions and stages
//! - `repository`: the execution repository contract (store, retrieve,
//!   lifecycle transitions, streaming queries, index maintenance)

pub mod config;
pub mod criteria;
pub mod error;
pub mod generation;
pub mod kv;
pub mod repository;
pub mod serialization;

pub use config::RepositoryConfig;
pub use criteria::{ExecutionComparator, ExecutionCriteria};
pub use error::{RepositoryError, StoreError};
pub use generation::StoreGenerations;
pub use kv::{KeyValueStore, ListPosition, MemoryStore, WriteBatch, WriteCommand};
pub use repository::{ExecutionRepository, ExecutionStream};
