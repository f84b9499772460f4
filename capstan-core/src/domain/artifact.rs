//! Artifact domain types
//!
//! An `Artifact` is an immutable, content-identifying reference to a
//! deployable or data object. An `ExpectedArtifact` is a pipeline-declared
//! constraint describing what artifact a stage expects to consume, together
//! with its fallback rules and the memoized resolution result.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reference to a deployable/data object. Matched by value, never mutated
/// after creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// A declared constraint on the artifacts a pipeline consumes: a partial
/// match pattern plus fallback rules, and the bound result once resolution
/// has run. Resolution is idempotent; the binding is cached on
/// `bound_artifact` so repeated resolution never re-matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedArtifact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub match_artifact: Artifact,
    #[serde(default)]
    pub use_prior_artifact: bool,
    #[serde(default)]
    pub use_default_artifact: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_artifact: Option<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_artifact: Option<Artifact>,
}

impl ExpectedArtifact {
    /// Whether `candidate` satisfies this expectation's match pattern.
    ///
    /// Every populated field of the match artifact among type, name,
    /// version, location and reference must equal the candidate's field.
    /// The account is deliberately not part of the match so that a bound
    /// artifact can inherit the match artifact's account afterwards.
    pub fn matches(&self, candidate: &Artifact) -> bool {
        field_matches(&self.match_artifact.artifact_type, &candidate.artifact_type)
            && field_matches(&self.match_artifact.name, &candidate.name)
            && field_matches(&self.match_artifact.version, &candidate.version)
            && field_matches(&self.match_artifact.location, &candidate.location)
            && field_matches(&self.match_artifact.reference, &candidate.reference)
    }
}

fn field_matches(pattern: &Option<String>, value: &Option<String>) -> bool {
    match pattern.as_deref() {
        None | Some("") => true,
        Some(p) => value.as_deref() == Some(p),
    }
}
