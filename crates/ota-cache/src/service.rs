use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use ota_backend::{HashOp, InMemoryKv, KvStore};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::keys::{self, DeploymentStatus};

/// A counter value read back from the metrics namespace.
///
/// Integer counters come back as [`Count`](Self::Count), other finite
/// numbers as [`Number`](Self::Number); anything else is passed through as
/// text.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Count(i64),
    Number(f64),
    Text(String),
}

impl MetricValue {
    fn parse(raw: String) -> Self {
        let trimmed = raw.trim();
        if let Ok(n) = trimmed.parse() {
            return MetricValue::Count(n);
        }
        match trimmed.parse::<f64>() {
            Ok(x) if x.is_finite() => MetricValue::Number(x),
            _ => MetricValue::Text(raw),
        }
    }

    pub fn as_count(&self) -> Option<i64> {
        match self {
            MetricValue::Count(n) => Some(*n),
            MetricValue::Number(_) | MetricValue::Text(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Count(n) => Some(*n as f64),
            MetricValue::Number(x) => Some(*x),
            MetricValue::Text(_) => None,
        }
    }
}

#[derive(Clone)]
struct Connections {
    ops: Arc<dyn KvStore>,
    metrics: Arc<dyn KvStore>,
}

/// TTL-bounded response cache plus atomic usage counters.
///
/// Holds two handles: `ops` for cached responses and `metrics` for
/// per-deployment counters, normally two logical databases of one backend.
/// A disabled (or closed) service answers every read with a miss and every
/// write with `Ok(())`, so callers never special-case it. Counter updates
/// go through the backend's atomic increment and batch commands; no
/// increment is lost between concurrent instances.
pub struct CacheMetricsService {
    connections: RwLock<Option<Connections>>,
    config: CacheConfig,
}

impl CacheMetricsService {
    pub fn new(ops: Arc<dyn KvStore>, metrics: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        let connections = if config.enabled {
            Some(Connections { ops, metrics })
        } else {
            info!("cache/metrics service configured as disabled");
            None
        };
        Self {
            connections: RwLock::new(connections),
            config,
        }
    }

    /// Both namespaces on one in-memory backend: database 0 for responses,
    /// `config.metrics_db` for counters.
    pub fn in_memory(kv: &InMemoryKv, config: CacheConfig) -> Self {
        let ops = Arc::new(kv.select(0));
        let metrics = Arc::new(kv.select(config.metrics_db));
        Self::new(ops, metrics, config)
    }

    /// A service with no backend; every operation is a no-op.
    pub fn disabled() -> Self {
        Self {
            connections: RwLock::new(None),
            config: CacheConfig {
                enabled: false,
                ..CacheConfig::default()
            },
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.connections().is_some()
    }

    fn connections(&self) -> Option<Connections> {
        self.connections.read().ok().and_then(|c| c.clone())
    }

    fn ops(&self) -> Option<Arc<dyn KvStore>> {
        self.connections().map(|c| c.ops)
    }

    fn metrics(&self) -> Option<Arc<dyn KvStore>> {
        self.connections().map(|c| c.metrics)
    }

    /// Succeeds only when both namespaces answer a ping.
    pub async fn check_health(&self) -> CacheResult<()> {
        let conns = self.connections().ok_or(CacheError::Disabled)?;
        conns.ops.ping().await.map_err(CacheError::ops)?;
        conns.metrics.ping().await.map_err(CacheError::metrics)?;
        Ok(())
    }

    /// Cached response for `url` in group `group_key`, if any.
    pub async fn get_cached_response<T: DeserializeOwned>(
        &self,
        group_key: &str,
        url: &str,
    ) -> Option<T> {
        let ops = self.ops()?;
        let raw = match ops.hget(group_key, url).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(group_key, error = %e, "cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(group_key, url, error = %e, "discarding undecodable cached response");
                None
            }
        }
    }

    /// Cache `response` for `url` in group `group_key`.
    ///
    /// The group's TTL is set only when the group has none after this write,
    /// which is when this write created it; later writes into a group do not
    /// extend it. Checking after the write means a group that expired and
    /// was recreated between two commands still gets a TTL.
    pub async fn set_cached_response<T: Serialize>(
        &self,
        group_key: &str,
        url: &str,
        response: &T,
    ) -> CacheResult<()> {
        let Some(ops) = self.ops() else {
            return Ok(());
        };
        let serialized = serde_json::to_string(response)?;
        ops.hset(group_key, url, &serialized)
            .await
            .map_err(CacheError::ops)?;
        let ttl = ops.ttl(group_key).await.map_err(CacheError::ops)?;
        if ttl.is_none() {
            ops.expire(group_key, self.config.default_expiry())
                .await
                .map_err(CacheError::ops)?;
        }
        Ok(())
    }

    /// Drop every cached response in a group.
    pub async fn invalidate_cache(&self, group_key: &str) -> CacheResult<()> {
        let Some(ops) = self.ops() else {
            return Ok(());
        };
        ops.del(&[group_key]).await.map_err(CacheError::ops)?;
        debug!(group_key, "cache group invalidated");
        Ok(())
    }

    /// Add one to `{label}:{status}` for a deployment key.
    ///
    /// A status outside `DeploymentSucceeded`, `DeploymentFailed` and
    /// `Downloaded` is ignored.
    pub async fn increment_label_status_count(
        &self,
        deployment_key: &str,
        label: &str,
        status: &str,
    ) -> CacheResult<()> {
        let Some(metrics) = self.metrics() else {
            return Ok(());
        };
        let status: DeploymentStatus = match status.parse() {
            Ok(s) => s,
            Err(e) => {
                debug!(deployment_key, error = %e, "status not counted");
                return Ok(());
            }
        };
        metrics
            .hincrby(
                &keys::labels_hash(deployment_key),
                &keys::status_field(label, status),
                1,
            )
            .await
            .map_err(CacheError::metrics)?;
        Ok(())
    }

    /// Record a client moving to `current_label`.
    ///
    /// In one atomic batch: `{current}:Active` and
    /// `{current}:DeploymentSucceeded` go up by one, and when a previous
    /// deployment key and label are both given, `{previous}:Active` on the
    /// previous key goes down by one.
    pub async fn record_update(
        &self,
        current_deployment_key: &str,
        current_label: &str,
        previous_deployment_key: Option<&str>,
        previous_label: Option<&str>,
    ) -> CacheResult<()> {
        let Some(metrics) = self.metrics() else {
            return Ok(());
        };
        let Some(current_active) = keys::active_field(current_label) else {
            debug!(current_deployment_key, "update without label not recorded");
            return Ok(());
        };

        let current_hash = keys::labels_hash(current_deployment_key);
        let mut ops = vec![
            HashOp::incr_by(&current_hash, current_active, 1),
            HashOp::incr_by(
                &current_hash,
                keys::status_field(current_label, DeploymentStatus::Succeeded),
                1,
            ),
        ];
        if let (Some(prev_key), Some(prev_label)) = (previous_deployment_key, previous_label) {
            if let Some(prev_active) = keys::active_field(prev_label) {
                ops.push(HashOp::incr_by(keys::labels_hash(prev_key), prev_active, -1));
            }
        }
        metrics.batch(ops).await.map_err(CacheError::metrics)?;
        Ok(())
    }

    /// Forget which label a client is on.
    pub async fn remove_deployment_key_client_active_label(
        &self,
        deployment_key: &str,
        client_id: &str,
    ) -> CacheResult<()> {
        let Some(metrics) = self.metrics() else {
            return Ok(());
        };
        metrics
            .hdel(&keys::clients_hash(deployment_key), client_id)
            .await
            .map_err(CacheError::metrics)?;
        Ok(())
    }

    /// Delete the counter and client hashes of a deployment key.
    pub async fn clear_metrics_for_deployment_key(&self, deployment_key: &str) -> CacheResult<()> {
        let Some(metrics) = self.metrics() else {
            return Ok(());
        };
        let labels = keys::labels_hash(deployment_key);
        let clients = keys::clients_hash(deployment_key);
        metrics
            .del(&[labels.as_str(), clients.as_str()])
            .await
            .map_err(CacheError::metrics)?;
        debug!(deployment_key, "metrics cleared");
        Ok(())
    }

    /// All counters of a deployment key, e.g. `v1:Active -> 12`.
    ///
    /// `None` when the service is disabled, the backend fails, or no
    /// counter exists yet.
    pub async fn get_metrics_with_deployment_key(
        &self,
        deployment_key: &str,
    ) -> Option<HashMap<String, MetricValue>> {
        let metrics = self.metrics()?;
        let raw = match metrics.hgetall(&keys::labels_hash(deployment_key)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(deployment_key, error = %e, "metrics read failed");
                return None;
            }
        };
        if raw.is_empty() {
            return None;
        }
        Some(
            raw.into_iter()
                .map(|(field, value)| (field, MetricValue::parse(value)))
                .collect(),
        )
    }

    /// Label a client was last recorded on.
    #[deprecated(note = "per-client tracking is superseded by record_update")]
    pub async fn get_current_active_label(
        &self,
        deployment_key: &str,
        client_id: &str,
    ) -> Option<String> {
        let metrics = self.metrics()?;
        match metrics.hget(&keys::clients_hash(deployment_key), client_id).await {
            Ok(label) => label,
            Err(e) => {
                warn!(deployment_key, error = %e, "client label read failed");
                None
            }
        }
    }

    /// Move a client to `to_label`, tracking it per client.
    ///
    /// One atomic batch sets the client's label, adds one to
    /// `{to}:Active`, and subtracts one from `{from}:Active` when given.
    #[deprecated(note = "per-client tracking is superseded by record_update")]
    pub async fn update_active_app_for_client(
        &self,
        deployment_key: &str,
        client_id: &str,
        to_label: &str,
        from_label: Option<&str>,
    ) -> CacheResult<()> {
        let Some(metrics) = self.metrics() else {
            return Ok(());
        };
        let Some(to_active) = keys::active_field(to_label) else {
            debug!(deployment_key, client_id, "client update without label ignored");
            return Ok(());
        };

        let labels = keys::labels_hash(deployment_key);
        let mut ops = vec![
            HashOp::set(keys::clients_hash(deployment_key), client_id, to_label),
            HashOp::incr_by(&labels, to_active, 1),
        ];
        if let Some(from_active) = from_label.and_then(keys::active_field) {
            ops.push(HashOp::incr_by(&labels, from_active, -1));
        }
        metrics.batch(ops).await.map_err(CacheError::metrics)?;
        Ok(())
    }

    /// Release both connections. The service behaves as disabled afterwards.
    pub fn close(&self) {
        if let Ok(mut conns) = self.connections.write() {
            if conns.take().is_some() {
                info!("cache/metrics connections closed");
            }
        }
    }
}

impl std::fmt::Debug for CacheMetricsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheMetricsService")
            .field("enabled", &self.is_enabled())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Response {
        status: u16,
        body: String,
    }

    fn response(body: &str) -> Response {
        Response {
            status: 200,
            body: body.into(),
        }
    }

    fn service() -> (CacheMetricsService, InMemoryKv) {
        let kv = InMemoryKv::new();
        (CacheMetricsService::in_memory(&kv, CacheConfig::default()), kv)
    }

    async fn counter(kv: &InMemoryKv, deployment_key: &str, field: &str) -> i64 {
        kv.select(1)
            .hget(&keys::labels_hash(deployment_key), field)
            .await
            .unwrap()
            .map(|v| v.parse().unwrap())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn cached_response_round_trip() {
        let (svc, _) = service();
        assert_eq!(svc.get_cached_response::<Response>("g", "/a").await, None);
        svc.set_cached_response("g", "/a", &response("hello")).await.unwrap();
        assert_eq!(
            svc.get_cached_response::<Response>("g", "/a").await,
            Some(response("hello"))
        );

        svc.invalidate_cache("g").await.unwrap();
        assert_eq!(svc.get_cached_response::<Response>("g", "/a").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn second_write_does_not_reset_group_ttl() {
        let (svc, kv) = service();
        svc.set_cached_response("g", "/a", &response("1")).await.unwrap();

        tokio::time::advance(Duration::from_secs(1_800)).await;
        svc.set_cached_response("g", "/b", &response("2")).await.unwrap();
        let remaining = kv.ttl("g").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(1_800));

        tokio::time::advance(Duration::from_secs(1_801)).await;
        assert_eq!(svc.get_cached_response::<Response>("g", "/b").await, None);
    }

    #[tokio::test]
    async fn responses_live_outside_the_metrics_database() {
        let (svc, kv) = service();
        svc.set_cached_response("g", "/a", &response("x")).await.unwrap();
        assert!(kv.exists("g").await.unwrap());
        assert!(!kv.select(1).exists("g").await.unwrap());
    }

    #[tokio::test]
    async fn undecodable_entry_is_a_miss() {
        let (svc, kv) = service();
        kv.hset("g", "/a", "not json").await.unwrap();
        assert_eq!(svc.get_cached_response::<Response>("g", "/a").await, None);
    }

    #[tokio::test]
    async fn status_counts() {
        let (svc, kv) = service();
        svc.increment_label_status_count("dk", "v1", "DeploymentSucceeded")
            .await
            .unwrap();
        svc.increment_label_status_count("dk", "v1", "DeploymentSucceeded")
            .await
            .unwrap();
        svc.increment_label_status_count("dk", "v1", "Downloaded")
            .await
            .unwrap();
        svc.increment_label_status_count("dk", "v1", "Exploded")
            .await
            .unwrap();

        assert_eq!(counter(&kv, "dk", "v1:DeploymentSucceeded").await, 2);
        assert_eq!(counter(&kv, "dk", "v1:Downloaded").await, 1);
        let metrics = svc.get_metrics_with_deployment_key("dk").await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics["v1:DeploymentSucceeded"], MetricValue::Count(2));
    }

    #[tokio::test]
    async fn record_update_moves_one_client() {
        let (svc, kv) = service();
        svc.record_update("dk", "v1", None, None).await.unwrap();
        svc.record_update("dk", "v1", None, None).await.unwrap();

        let active_before =
            counter(&kv, "dk", "v1:Active").await + counter(&kv, "dk", "v2:Active").await;
        let succeeded_before = counter(&kv, "dk", "v2:DeploymentSucceeded").await;

        svc.record_update("dk", "v2", Some("dk"), Some("v1"))
            .await
            .unwrap();

        let active_after =
            counter(&kv, "dk", "v1:Active").await + counter(&kv, "dk", "v2:Active").await;
        assert_eq!(active_after, active_before);
        assert_eq!(counter(&kv, "dk", "v1:Active").await, 1);
        assert_eq!(
            counter(&kv, "dk", "v2:DeploymentSucceeded").await,
            succeeded_before + 1
        );
    }

    #[tokio::test]
    async fn record_update_across_deployment_keys() {
        let (svc, kv) = service();
        svc.record_update("staging", "v4", None, None).await.unwrap();
        svc.record_update("prod", "v1", Some("staging"), Some("v4"))
            .await
            .unwrap();
        assert_eq!(counter(&kv, "staging", "v4:Active").await, 0);
        assert_eq!(counter(&kv, "prod", "v1:Active").await, 1);

        // A previous label without a previous key is not decremented.
        svc.record_update("prod", "v2", None, Some("v1")).await.unwrap();
        assert_eq!(counter(&kv, "prod", "v1:Active").await, 1);
    }

    #[tokio::test]
    async fn record_update_is_all_or_nothing() {
        let (svc, kv) = service();
        kv.select(1)
            .set(&keys::labels_hash("broken"), "plain value")
            .await
            .unwrap();
        let err = svc
            .record_update("dk", "v2", Some("broken"), Some("v1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Backend { namespace: "metrics", .. }));
        assert_eq!(counter(&kv, "dk", "v2:Active").await, 0);
    }

    #[tokio::test]
    async fn concurrent_record_updates_are_not_lost() {
        let (svc, kv) = service();
        let svc = Arc::new(svc);
        let mut handles = Vec::new();
        for _ in 0..50 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move {
                svc.record_update("dk", "v1", None, None).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter(&kv, "dk", "v1:Active").await, 50);
        assert_eq!(counter(&kv, "dk", "v1:DeploymentSucceeded").await, 50);
    }

    #[tokio::test]
    #[allow(deprecated)]
    async fn per_client_tracking() {
        let (svc, kv) = service();
        svc.update_active_app_for_client("dk", "client-1", "v1", None)
            .await
            .unwrap();
        svc.update_active_app_for_client("dk", "client-1", "v2", Some("v1"))
            .await
            .unwrap();
        assert_eq!(
            svc.get_current_active_label("dk", "client-1").await.as_deref(),
            Some("v2")
        );
        assert_eq!(counter(&kv, "dk", "v1:Active").await, 0);
        assert_eq!(counter(&kv, "dk", "v2:Active").await, 1);

        svc.remove_deployment_key_client_active_label("dk", "client-1")
            .await
            .unwrap();
        assert_eq!(svc.get_current_active_label("dk", "client-1").await, None);
    }

    #[tokio::test]
    #[allow(deprecated)]
    async fn clear_removes_both_hashes() {
        let (svc, _) = service();
        svc.update_active_app_for_client("dk", "c", "v1", None)
            .await
            .unwrap();
        svc.clear_metrics_for_deployment_key("dk").await.unwrap();
        assert!(svc.get_metrics_with_deployment_key("dk").await.is_none());
        assert_eq!(svc.get_current_active_label("dk", "c").await, None);
    }

    #[tokio::test]
    async fn text_values_pass_through() {
        let (svc, kv) = service();
        kv.select(1)
            .hset(&keys::labels_hash("dk"), "note", "hello")
            .await
            .unwrap();
        let metrics = svc.get_metrics_with_deployment_key("dk").await.unwrap();
        assert_eq!(metrics["note"], MetricValue::Text("hello".into()));
        assert_eq!(metrics["note"].as_count(), None);
    }

    #[tokio::test]
    async fn fractional_values_read_as_numbers() {
        let (svc, kv) = service();
        let metrics_db = kv.select(1);
        let hash = keys::labels_hash("dk");
        metrics_db.hset(&hash, "ratio", "1.5").await.unwrap();
        metrics_db.hset(&hash, "padded", " 7 ").await.unwrap();
        metrics_db.hset(&hash, "odd", "NaN").await.unwrap();

        let metrics = svc.get_metrics_with_deployment_key("dk").await.unwrap();
        assert_eq!(metrics["ratio"], MetricValue::Number(1.5));
        assert_eq!(metrics["ratio"].as_count(), None);
        assert_eq!(metrics["ratio"].as_f64(), Some(1.5));
        assert_eq!(metrics["padded"], MetricValue::Count(7));
        assert_eq!(metrics["odd"], MetricValue::Text("NaN".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn group_recreated_without_ttl_gets_one() {
        let (svc, kv) = service();
        kv.hset("g", "/stale", "{}").await.unwrap();
        assert_eq!(kv.ttl("g").await.unwrap(), None);

        svc.set_cached_response("g", "/a", &response("x")).await.unwrap();
        assert_eq!(kv.ttl("g").await.unwrap(), Some(Duration::from_secs(3600)));
    }

    #[tokio::test]
    #[allow(deprecated)]
    async fn disabled_service_is_inert() {
        let svc = CacheMetricsService::disabled();
        assert!(!svc.is_enabled());
        svc.set_cached_response("g", "/a", &response("x")).await.unwrap();
        assert_eq!(svc.get_cached_response::<Response>("g", "/a").await, None);
        svc.invalidate_cache("g").await.unwrap();
        svc.increment_label_status_count("dk", "v1", "Downloaded")
            .await
            .unwrap();
        svc.record_update("dk", "v1", None, None).await.unwrap();
        svc.update_active_app_for_client("dk", "c", "v1", None)
            .await
            .unwrap();
        assert!(svc.get_metrics_with_deployment_key("dk").await.is_none());
        assert!(svc.get_current_active_label("dk", "c").await.is_none());
        assert!(matches!(
            svc.check_health().await.unwrap_err(),
            CacheError::Disabled
        ));
    }

    #[tokio::test]
    async fn config_can_disable() {
        let kv = InMemoryKv::new();
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let svc = CacheMetricsService::in_memory(&kv, config);
        svc.record_update("dk", "v1", None, None).await.unwrap();
        assert_eq!(kv.select(1).key_count(), 0);
    }

    #[tokio::test]
    async fn unreachable_backend_reads_as_miss() {
        let (svc, kv) = service();
        svc.set_cached_response("g", "/a", &response("x")).await.unwrap();
        svc.record_update("dk", "v1", None, None).await.unwrap();

        kv.set_offline(true);
        assert_eq!(svc.get_cached_response::<Response>("g", "/a").await, None);
        assert!(svc.get_metrics_with_deployment_key("dk").await.is_none());
        assert!(svc.record_update("dk", "v1", None, None).await.is_err());
        assert!(svc.check_health().await.is_err());

        kv.set_offline(false);
        svc.check_health().await.unwrap();
    }

    #[tokio::test]
    async fn close_disables() {
        let (svc, _) = service();
        svc.close();
        assert!(!svc.is_enabled());
        svc.record_update("dk", "v1", None, None).await.unwrap();
        assert!(svc.check_health().await.is_err());
        // Closing twice is harmless.
        svc.close();
    }
}
