//! Retrieval criteria and ordering

use capstan_core::domain::{Execution, ExecutionStatus};
use std::cmp::Ordering;

/// Filtering and capping for bulk retrieval.
#[derive(Debug, Clone, Default)]
pub struct ExecutionCriteria {
    /// Maximum executions to return per store generation. Zero means
    /// unbounded.
    pub limit: usize,
    /// When non-empty, only executions in one of these statuses are
    /// returned; candidate ids are pre-filtered by a bulk status lookup
    /// before hydration where the index allows it.
    pub statuses: Vec<ExecutionStatus>,
    /// When set, executions that started at or before this instant (epoch
    /// millis) are dropped. Executions that never started are kept.
    pub start_time_cutoff: Option<i64>,
}

impl ExecutionCriteria {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<ExecutionStatus>) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn with_start_time_cutoff(mut self, cutoff: i64) -> Self {
        self.start_time_cutoff = Some(cutoff);
        self
    }

    pub fn matches_status(&self, status: ExecutionStatus) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&status)
    }
}

/// Orderings for materialized execution lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionComparator {
    /// Most recently started first; executions without a start time rank by
    /// id, and ids break ties, both descending.
    StartTimeOrId,
    /// Most recently built first.
    BuildTimeDesc,
}

impl ExecutionComparator {
    pub fn compare(self, a: &Execution, b: &Execution) -> Ordering {
        match self {
            ExecutionComparator::StartTimeOrId => {
                let by_start = b.start_time.cmp(&a.start_time);
                if by_start != Ordering::Equal {
                    return by_start;
                }
                b.id.cmp(&a.id)
            }
            ExecutionComparator::BuildTimeDesc => {
                let by_build = b.build_time.cmp(&a.build_time);
                if by_build != Ordering::Equal {
                    return by_build;
                }
                b.id.cmp(&a.id)
            }
        }
    }
}
