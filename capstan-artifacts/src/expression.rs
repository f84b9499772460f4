//! Expression evaluator collaborator
//!
//! Bound artifacts and stage context may contain inline expressions (e.g.
//! `${trigger.buildNumber}`) that are expanded at resolution time. The
//! grammar and sandboxing live outside this crate; the engine only needs
//! this seam.

use serde_json::{Map, Value};

/// Collects evaluation failures without aborting evaluation.
#[derive(Debug, Default)]
pub struct EvaluationSummary {
    errors: Vec<String>,
}

impl EvaluationSummary {
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// Expands inline expressions in `input` against an execution context.
/// Failures are recorded on the summary; the evaluator returns its best
/// effort either way.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        input: &Map<String, Value>,
        context: &Value,
        summary: &mut EvaluationSummary,
        allow_unknown_keys: bool,
    ) -> Map<String, Value>;
}

/// Identity evaluator for deployments without an expression language.
pub struct PassthroughEvaluator;

impl ExpressionEvaluator for PassthroughEvaluator {
    fn evaluate(
        &self,
        input: &Map<String, Value>,
        _context: &Value,
        _summary: &mut EvaluationSummary,
        _allow_unknown_keys: bool,
    ) -> Map<String, Value> {
        input.clone()
    }
}
