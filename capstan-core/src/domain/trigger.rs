//! Trigger domain type

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::artifact::Artifact;

/// How an execution started.
///
/// Triggers are polymorphic (manual, Jenkins, Concourse, pipeline, webhook,
/// ...); the discriminating `type` plus the common fields are modeled
/// explicitly and provider-specific fields ride along in the flattened
/// payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    /// Idempotency key preventing duplicate starts of externally-triggered
    /// runs. Valid only until the correlated execution completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Weak back-reference (id only) for pipelines triggered by other
    /// pipelines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Trigger {
    pub fn manual(user: impl Into<String>) -> Self {
        Trigger {
            trigger_type: Some("manual".to_string()),
            user: Some(user.into()),
            ..Trigger::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_fields_ride_in_payload() {
        let json = serde_json::json!({
            "type": "jenkins",
            "correlationId": "abc-123",
            "master": "ci",
            "job": "app-build",
            "buildNumber": 17,
        });
        let trigger: Trigger = serde_json::from_value(json).unwrap();
        assert_eq!(trigger.trigger_type.as_deref(), Some("jenkins"));
        assert_eq!(trigger.correlation_id.as_deref(), Some("abc-123"));
        assert_eq!(trigger.payload.get("buildNumber"), Some(&Value::from(17)));

        let back = serde_json::to_value(&trigger).unwrap();
        assert_eq!(back.get("master"), Some(&Value::from("ci")));
    }
}
