use ota_backend::KvError;

/// Errors surfaced by cache and metrics writes and by health checks.
///
/// Read paths never return these; they degrade to a miss instead.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No backend is configured, or the service has been closed.
    #[error("cache/metrics service is not enabled")]
    Disabled,

    /// The key-value backend failed the request.
    #[error("{namespace} backend error: {source}")]
    Backend {
        namespace: &'static str,
        #[source]
        source: KvError,
    },

    /// A response could not be encoded for caching.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn ops(source: KvError) -> Self {
        Self::Backend {
            namespace: "ops",
            source,
        }
    }

    pub(crate) fn metrics(source: KvError) -> Self {
        Self::Backend {
            namespace: "metrics",
            source,
        }
    }
}

/// Result alias for cache/metrics operations.
pub type CacheResult<T> = Result<T, CacheError>;
