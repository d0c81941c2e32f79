//! The namespaced cache facade the rest of the pipeline talks to.
//!
//! Composes the in-process tier (L1) with Redis (L2): reads check L1, fall
//! through to L2 and re-populate L1, and only then report a miss. Writes go
//! to both tiers. Per-namespace hit/miss counters feed the cache API.
//!
//! The manager never raises — a broken backing store degrades to a miss.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use oc_domain::config::CacheConfig;
use serde::Serialize;
use serde_json::Value;

use crate::keys::{Namespace, STAT_NAMESPACES};
use crate::memory::MemoryStore;
use crate::redis_tier::RedisTier;

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

pub struct CacheManager {
    enabled: bool,
    cfg: CacheConfig,
    redis: RedisTier,
    stores: HashMap<Namespace, MemoryStore>,
    counters: HashMap<Namespace, Counters>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stats / health types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub connected: bool,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
    pub by_namespace: HashMap<String, NamespaceStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub ok: bool,
    pub redis_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl CacheManager {
    pub fn new(cfg: &CacheConfig, redis: RedisTier) -> Self {
        let all = [
            Namespace::StageA,
            Namespace::StageB,
            Namespace::StageC,
            Namespace::Asset,
            Namespace::Tool,
            Namespace::Pending,
        ];
        let stores = all
            .iter()
            .map(|ns| (*ns, MemoryStore::new(cfg.l1_max_entries)))
            .collect();
        let counters = all.iter().map(|ns| (*ns, Counters::default())).collect();
        Self {
            enabled: cfg.enabled,
            cfg: cfg.clone(),
            redis,
            stores,
            counters,
        }
    }

    /// (L1, L2) TTLs for a namespace, in seconds. The asset namespace is the
    /// only split-TTL tier.
    fn ttls_for(&self, namespace: Namespace) -> (u64, u64) {
        let c = &self.cfg;
        match namespace {
            Namespace::StageA => (c.ttl_stage_a_s, c.ttl_stage_a_s),
            Namespace::StageB => (c.ttl_stage_b_s, c.ttl_stage_b_s),
            Namespace::StageC => (c.ttl_stage_c_s, c.ttl_stage_c_s),
            Namespace::Asset => (c.ttl_asset_l1_s, c.ttl_asset_l2_s),
            Namespace::Tool => (c.ttl_tool_s, c.ttl_tool_s),
            Namespace::Pending => (0, 0), // explicit TTL via set_raw
        }
    }

    fn store(&self, namespace: Namespace) -> &MemoryStore {
        &self.stores[&namespace]
    }

    fn record(&self, namespace: Namespace, hit: bool) {
        let counters = &self.counters[&namespace];
        if hit {
            counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    // ── Core operations ───────────────────────────────────────────

    /// Read a value. L1 first, then L2 (re-populating L1 on the way back).
    pub async fn get(&self, namespace: Namespace, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }

        if let Some(value) = self.store(namespace).get(key) {
            self.record(namespace, true);
            return Some(value);
        }

        if let Some(raw) = self.redis.get(key).await {
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => {
                    let (l1_ttl, _) = self.ttls_for(namespace);
                    self.store(namespace)
                        .set(key, value.clone(), Duration::from_secs(l1_ttl));
                    self.record(namespace, true);
                    return Some(value);
                }
                Err(e) => {
                    tracing::warn!(%key, error = %e, "undecodable cache entry, dropping");
                    self.redis.del(key).await;
                }
            }
        }

        self.record(namespace, false);
        None
    }

    /// Write a value to both tiers with the namespace's TTLs.
    pub async fn set(&self, namespace: Namespace, key: &str, value: &Value) {
        if !self.enabled {
            return;
        }
        let (l1_ttl, l2_ttl) = self.ttls_for(namespace);
        self.store(namespace)
            .set(key, value.clone(), Duration::from_secs(l1_ttl));
        self.redis
            .set_ex(key, &value.to_string(), l2_ttl.max(1))
            .await;
    }

    // ── Raw keyed access (pending-approval records) ───────────────

    /// Write under an explicit full key and TTL, bypassing namespace TTLs.
    /// Used for awaiting-approval artifacts.
    pub async fn set_raw(&self, key: &str, value: &Value, ttl_s: u64) {
        self.store(Namespace::Pending)
            .set(key, value.clone(), Duration::from_secs(ttl_s));
        self.redis.set_ex(key, &value.to_string(), ttl_s.max(1)).await;
    }

    pub async fn get_raw(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.store(Namespace::Pending).get(key) {
            return Some(value);
        }
        let raw = self.redis.get(key).await?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn del_raw(&self, key: &str) {
        // A literal key is a valid glob: it matches exactly itself.
        self.store(Namespace::Pending).invalidate_pattern(key);
        self.redis.del(key).await;
    }

    // ── Invalidation ──────────────────────────────────────────────

    /// Invalidate all keys matching a glob over the full key space.
    /// Returns the number of entries removed (the larger of the two tiers,
    /// since both hold the same logical entries).
    pub async fn invalidate(&self, pattern: &str) -> u64 {
        let mut l1_total = 0;
        for store in self.stores.values() {
            l1_total += store.invalidate_pattern(pattern);
        }
        let l2_total = self.redis.del_pattern(pattern).await;
        let count = l1_total.max(l2_total);
        oc_domain::trace::PipelineEvent::CacheInvalidated {
            namespace: pattern.to_string(),
            invalidated_count: count,
        }
        .emit();
        count
    }

    /// Invalidate one stage namespace wholesale.
    pub async fn invalidate_stage(&self, namespace: Namespace) -> u64 {
        self.invalidate(&format!("{}*", namespace.prefix())).await
    }

    pub async fn invalidate_all(&self) -> u64 {
        self.invalidate(&format!("{}:*", crate::keys::KEY_PREFIX))
            .await
    }

    // ── Introspection ─────────────────────────────────────────────

    pub fn stats(&self) -> CacheStats {
        let mut by_namespace = HashMap::new();
        let mut hits = 0;
        let mut misses = 0;
        for ns in STAT_NAMESPACES {
            let counters = &self.counters[ns];
            let ns_hits = counters.hits.load(Ordering::Relaxed);
            let ns_misses = counters.misses.load(Ordering::Relaxed);
            hits += ns_hits;
            misses += ns_misses;
            by_namespace.insert(
                ns.as_str().to_string(),
                NamespaceStats {
                    hits: ns_hits,
                    misses: ns_misses,
                    size: self.store(*ns).len(),
                },
            );
        }
        let total = hits + misses;
        let hit_rate_percent = if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        };
        CacheStats {
            enabled: self.enabled,
            connected: self.redis.is_connected(),
            hits,
            misses,
            hit_rate_percent,
            by_namespace,
        }
    }

    pub async fn health(&self) -> CacheHealth {
        let latency_ms = self.redis.ping().await;
        let redis_ok = latency_ms.is_some();
        CacheHealth {
            // In-process tier always works; health is "degraded" rather
            // than down when Redis is away.
            ok: true,
            redis_ok,
            latency_ms,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> CacheManager {
        CacheManager::new(&CacheConfig::default(), RedisTier::disconnected())
    }

    #[tokio::test]
    async fn set_then_get_hits_l1() {
        let cache = manager();
        let key = crate::keys::cache_key(Namespace::StageA, "list servers");
        cache.set(Namespace::StageA, &key, &json!({"intent": "q"})).await;

        let value = cache.get(Namespace::StageA, &key).await.unwrap();
        assert_eq!(value["intent"], "q");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.by_namespace["stage_a"].size, 1);
    }

    #[tokio::test]
    async fn miss_is_counted() {
        let cache = manager();
        assert!(cache.get(Namespace::StageC, "opsconductor:stage_c:nope").await.is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate_percent, 0.0);
    }

    #[tokio::test]
    async fn disabled_cache_never_stores() {
        let cfg = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = CacheManager::new(&cfg, RedisTier::disconnected());
        cache.set(Namespace::StageA, "k", &json!(1)).await;
        assert!(cache.get(Namespace::StageA, "k").await.is_none());
        // Disabled caches do not move the counters either.
        assert_eq!(cache.stats().hits + cache.stats().misses, 0);
    }

    #[tokio::test]
    async fn invalidate_stage_is_monotonic() {
        let cache = manager();
        let key = crate::keys::cache_key(Namespace::StageA, "list servers");
        cache.set(Namespace::StageA, &key, &json!(1)).await;
        assert!(cache.get(Namespace::StageA, &key).await.is_some());

        let removed = cache.invalidate_stage(Namespace::StageA).await;
        assert_eq!(removed, 1);
        // A previously-hit key now records a miss.
        assert!(cache.get(Namespace::StageA, &key).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_pattern_spares_other_namespaces() {
        let cache = manager();
        let a = crate::keys::cache_key(Namespace::StageA, "x");
        let c = crate::keys::cache_key(Namespace::StageC, "x");
        cache.set(Namespace::StageA, &a, &json!(1)).await;
        cache.set(Namespace::StageC, &c, &json!(2)).await;

        cache.invalidate("opsconductor:stage_a:*").await;
        assert!(cache.get(Namespace::StageA, &a).await.is_none());
        assert!(cache.get(Namespace::StageC, &c).await.is_some());
    }

    #[tokio::test]
    async fn invalidate_all_clears_everything() {
        let cache = manager();
        let a = crate::keys::cache_key(Namespace::StageA, "x");
        let t = crate::keys::cache_key(Namespace::Tool, "y");
        cache.set(Namespace::StageA, &a, &json!(1)).await;
        cache.set(Namespace::Tool, &t, &json!(2)).await;

        let removed = cache.invalidate_all().await;
        assert_eq!(removed, 2);
        assert!(cache.get(Namespace::StageA, &a).await.is_none());
    }

    #[tokio::test]
    async fn pending_records_round_trip_and_delete() {
        let cache = manager();
        let key = crate::keys::pending_key("req-42");
        cache.set_raw(&key, &json!({"plan": {}}), 3600).await;
        assert!(cache.get_raw(&key).await.is_some());
        cache.del_raw(&key).await;
        assert!(cache.get_raw(&key).await.is_none());
    }

    #[tokio::test]
    async fn health_reports_degraded_without_redis() {
        let cache = manager();
        let health = cache.health().await;
        assert!(health.ok);
        assert!(!health.redis_ok);
        assert!(health.latency_ms.is_none());
    }
}
