use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the [`CacheMetricsService`](crate::CacheMetricsService).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When `false` every operation is a no-op.
    pub enabled: bool,
    /// TTL set on a response-cache group when it is first written.
    pub default_expiry_secs: u64,
    /// Logical database holding the usage counters.
    pub metrics_db: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_expiry_secs: 3_600,
            metrics_db: 1,
        }
    }
}

impl CacheConfig {
    pub fn default_expiry(&self) -> Duration {
        Duration::from_secs(self.default_expiry_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = CacheConfig::default();
        assert!(c.enabled);
        assert_eq!(c.default_expiry(), Duration::from_secs(3600));
        assert_eq!(c.metrics_db, 1);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let c: CacheConfig = serde_json::from_str(r#"{"enabled": false}"#).unwrap();
        assert!(!c.enabled);
        assert_eq!(c.metrics_db, 1);
    }
}
