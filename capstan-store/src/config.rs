//! Repository configuration
//!
//! Defines the tunable parameters of the execution repository: scan
//! chunking, worker-pool sizing for bulk versus per-application queries,
//! and the buffered-index key prefix.

/// Execution repository configuration
///
/// Whole-type scans and per-application queries run on separately sized
/// pools so a slow bulk scan cannot starve interactive queries.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// How many executions a scan hydrates per channel round-trip.
    pub chunk_size: usize,

    /// Max concurrent whole-type scans.
    pub query_all_concurrency: usize,

    /// Max concurrent per-application queries.
    pub query_by_app_concurrency: usize,

    /// Optional prefix for the buffered-executions index key, for sharing a
    /// store between repository instances.
    pub buffered_prefix: Option<String>,
}

impl RepositoryConfig {
    pub fn new() -> Self {
        Self {
            chunk_size: 75,
            query_all_concurrency: 10,
            query_by_app_concurrency: 10,
            buffered_prefix: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - CAPSTAN_CHUNK_SIZE (optional, default: 75)
    /// - CAPSTAN_QUERY_ALL_CONCURRENCY (optional, default: 10)
    /// - CAPSTAN_QUERY_BY_APP_CONCURRENCY (optional, default: 10)
    /// - CAPSTAN_BUFFERED_PREFIX (optional, default: unset)
    pub fn from_env() -> Self {
        let defaults = Self::new();

        let chunk_size = std::env::var("CAPSTAN_CHUNK_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.chunk_size);

        let query_all_concurrency = std::env::var("CAPSTAN_QUERY_ALL_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.query_all_concurrency);

        let query_by_app_concurrency = std::env::var("CAPSTAN_QUERY_BY_APP_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.query_by_app_concurrency);

        let buffered_prefix = std::env::var("CAPSTAN_BUFFERED_PREFIX")
            .ok()
            .filter(|s| !s.is_empty());

        Self {
            chunk_size,
            query_all_concurrency,
            query_by_app_concurrency,
            buffered_prefix,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than 0".to_string());
        }
        if self.query_all_concurrency == 0 {
            return Err("query_all_concurrency must be greater than 0".to_string());
        }
        if self.query_by_app_concurrency == 0 {
            return Err("query_by_app_concurrency must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::new()
    }
}
