//! Capstan Artifacts
//!
//! The artifact resolution engine: matches a pipeline's declared expected
//! artifacts against artifacts received at trigger time, emitted by
//! upstream stages, or carried over from a prior run, enforcing uniqueness
//! and defaulting rules.

pub mod engine;
pub mod error;
pub mod expression;

pub use engine::{ArtifactEngine, resolve_expected_artifacts};
pub use error::ArtifactError;
pub use expression::{EvaluationSummary, ExpressionEvaluator, PassthroughEvaluator};
