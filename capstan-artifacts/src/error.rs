//! Error types for artifact resolution
//!
//! Resolution errors are always surfaced, never silently skipped: an
//! unresolved required artifact makes the pipeline run meaningless.

use capstan_core::graph::GraphError;
use capstan_store::RepositoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No received, prior or default artifact satisfied the expectation.
    #[error("unmatched expected artifact '{0}' could not be resolved")]
    UnresolvedExpectedArtifact(String),

    /// More than one candidate matched and unique matches were required.
    #[error("expected artifact '{0}' matched {1} artifacts, expected exactly one")]
    AmbiguousMatch(String, usize),

    /// The pipeline submission could not be read or written back.
    #[error("malformed pipeline submission: {0}")]
    MalformedSubmission(String),

    /// The evaluated artifact no longer parses as an artifact.
    #[error("expression evaluation produced an invalid artifact: {0}")]
    Expression(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type ArtifactResult<T> = std::result::Result<T, ArtifactError>;
