//! 合并读取缓存
//!
//! 键为 (实体类型, 查询选项序列化)；条目在写入 TTL 之后失效，
//! 同时受容量上限约束。双写默认不失效缓存。

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::model::{QueryOptions, Record};

/// 缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeCacheKey {
    pub entity_type: String,
    pub options: String,
}

impl MergeCacheKey {
    pub fn new(entity_type: &str, options: &QueryOptions) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            options: options.cache_fragment(),
        }
    }
}

/// 合并读取结果缓存（Moka 实现）
///
/// TTL 为 0 时缓存关闭，`get` 永远未命中。
#[derive(Clone)]
pub struct MergeCache {
    inner: Option<Cache<MergeCacheKey, Arc<Vec<Record>>>>,
    ttl: Duration,
}

impl MergeCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let inner = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .support_invalidation_closures()
                .build()
        });

        Self { inner, ttl }
    }

    /// 关闭的缓存
    pub fn disabled() -> Self {
        Self {
            inner: None,
            ttl: Duration::ZERO,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub async fn get(&self, key: &MergeCacheKey) -> Option<Vec<Record>> {
        let cache = self.inner.as_ref()?;
        let records = cache.get(key).await?;
        debug!(
            "合并缓存命中: entity={}, options={}, records={}",
            key.entity_type,
            key.options,
            records.len()
        );
        Some(records.as_ref().clone())
    }

    pub async fn put(&self, key: MergeCacheKey, records: Vec<Record>) {
        if let Some(cache) = &self.inner {
            cache.insert(key, Arc::new(records)).await;
        }
    }

    /// 失效某实体类型的全部缓存条目
    pub fn invalidate_entity(&self, entity_type: &str) {
        let Some(cache) = &self.inner else {
            return;
        };

        let entity_type = entity_type.to_string();
        if let Err(e) = cache.invalidate_entries_if(move |key, _| key.entity_type == entity_type) {
            warn!("合并缓存失效失败: {}", e);
        }
    }

    /// 清空缓存
    pub fn clear(&self) {
        if let Some(cache) = &self.inner {
            cache.invalidate_all();
        }
    }

    /// 当前条目数（近似值）
    pub fn entry_count(&self) -> u64 {
        self.inner.as_ref().map_or(0, |c| c.entry_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Record> {
        vec![json!({"asset_id": 1}).as_object().cloned().unwrap()]
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = MergeCache::new(Duration::from_secs(5), 16);
        let key = MergeCacheKey::new("assets", &QueryOptions::new());

        assert!(cache.get(&key).await.is_none());
        cache.put(key.clone(), rows()).await;
        assert_eq!(cache.get(&key).await, Some(rows()));

        let other = MergeCacheKey::new("assets", &QueryOptions::new().take(1));
        assert!(cache.get(&other).await.is_none());
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = MergeCache::new(Duration::from_millis(50), 16);
        let key = MergeCacheKey::new("assets", &QueryOptions::new());

        cache.put(key.clone(), rows()).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_entity_only_touches_that_entity() {
        let cache = MergeCache::new(Duration::from_secs(5), 16);
        let assets = MergeCacheKey::new("assets", &QueryOptions::new());
        let users = MergeCacheKey::new("users", &QueryOptions::new());

        cache.put(assets.clone(), rows()).await;
        cache.put(users.clone(), rows()).await;
        cache.invalidate_entity("assets");

        assert!(cache.get(&assets).await.is_none());
        assert!(cache.get(&users).await.is_some());
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let cache = MergeCache::new(Duration::ZERO, 16);
        let key = MergeCacheKey::new("assets", &QueryOptions::new());

        cache.put(key.clone(), rows()).await;
        assert!(!cache.is_enabled());
        assert!(cache.get(&key).await.is_none());
    }
}
