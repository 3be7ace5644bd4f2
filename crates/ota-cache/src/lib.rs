//! Response cache and usage metrics for the OTA update store.
//!
//! [`CacheMetricsService`] keeps two namespaces on a [`KvStore`](ota_backend::KvStore):
//! - an "ops" namespace of response-cache groups, each a hash of
//!   `url -> serialized response` expiring one hour after it is created
//! - a "metrics" namespace of per-deployment-key counter hashes updated
//!   with atomic increments and batches
//!
//! The service is optional. Without a backend every read is a miss and
//! every write succeeds without effect.

pub mod config;
pub mod error;
pub mod keys;
pub mod service;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use keys::DeploymentStatus;
pub use service::{CacheMetricsService, MetricValue};
