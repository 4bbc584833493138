//! 复制协调器
//!
//! 主节点：写操作并发发往本地库和虚拟库（任一成功即成功），
//! 读操作合并两库结果，主键冲突时虚拟库记录覆盖本地库记录。
//! 成员节点：所有操作只访问虚拟库。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::cache::{MergeCache, MergeCacheKey};
use crate::config::ReplicaConfig;
use crate::error::Result;
use crate::model::{
    key_of, EntityRegistry, MatchCriteria, NodeRole, OperationResult, QueryOptions, Record,
};
use crate::store::{Datastore, StoreOp};

/// 存储侧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreSide {
    Local,
    Virtual,
}

impl fmt::Display for StoreSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreSide::Local => write!(f, "Local"),
            StoreSide::Virtual => write!(f, "Virtual"),
        }
    }
}

/// 协调器统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// 单库失败、另一库成功的写操作数
    pub partial_failures: u64,
    /// 两库都失败的写操作数
    pub total_failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Default)]
struct Counters {
    partial_failures: AtomicU64,
    total_failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// 单次写操作
#[derive(Clone, Copy)]
enum WriteOp<'a> {
    Create(&'a Record),
    Update(&'a MatchCriteria, &'a Record),
    Delete(&'a MatchCriteria),
}

impl WriteOp<'_> {
    fn kind(&self) -> StoreOp {
        match self {
            WriteOp::Create(_) => StoreOp::Create,
            WriteOp::Update(..) => StoreOp::Update,
            WriteOp::Delete(_) => StoreOp::Delete,
        }
    }

    async fn apply(self, store: &dyn Datastore, entity: &str) -> Result<Record> {
        match self {
            WriteOp::Create(data) => store.create(entity, data).await,
            WriteOp::Update(criteria, data) => store.update(entity, criteria, data).await,
            WriteOp::Delete(criteria) => store.delete(entity, criteria).await,
        }
    }
}

/// 复制协调器
pub struct ReplicationCoordinator {
    local: Arc<dyn Datastore>,
    virtual_store: Arc<dyn Datastore>,
    role: NodeRole,
    registry: EntityRegistry,
    cache: MergeCache,
    invalidate_on_write: bool,
    counters: Counters,
}

impl ReplicationCoordinator {
    /// 默认实体表、5 秒缓存 TTL、写入不失效缓存
    pub fn new(local: Arc<dyn Datastore>, virtual_store: Arc<dyn Datastore>, role: NodeRole) -> Self {
        Self {
            local,
            virtual_store,
            role,
            registry: EntityRegistry::default(),
            cache: MergeCache::new(Duration::from_secs(5), 1024),
            invalidate_on_write: false,
            counters: Counters::default(),
        }
    }

    /// 按配置创建
    pub fn from_config(
        config: &ReplicaConfig,
        local: Arc<dyn Datastore>,
        virtual_store: Arc<dyn Datastore>,
    ) -> Self {
        Self::new(local, virtual_store, config.role)
            .with_registry(config.entities.clone())
            .with_cache(MergeCache::new(config.cache_ttl(), config.cache.max_capacity))
            .with_invalidate_on_write(config.cache.invalidate_on_write)
    }

    pub fn with_registry(mut self, registry: EntityRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cache(mut self, cache: MergeCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_invalidate_on_write(mut self, invalidate: bool) -> Self {
        self.invalidate_on_write = invalidate;
        self
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn local(&self) -> &Arc<dyn Datastore> {
        &self.local
    }

    pub fn virtual_store(&self) -> &Arc<dyn Datastore> {
        &self.virtual_store
    }

    pub fn cache(&self) -> &MergeCache {
        &self.cache
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            partial_failures: self.counters.partial_failures.load(Ordering::Relaxed),
            total_failures: self.counters.total_failures.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
        }
    }

    /// 双写创建
    pub async fn dual_create(&self, entity: &str, data: &Record) -> OperationResult {
        self.dual_write(entity, WriteOp::Create(data)).await
    }

    /// 双写更新
    pub async fn dual_update(
        &self,
        entity: &str,
        criteria: &MatchCriteria,
        data: &Record,
    ) -> OperationResult {
        self.dual_write(entity, WriteOp::Update(criteria, data)).await
    }

    /// 双写删除
    pub async fn dual_delete(&self, entity: &str, criteria: &MatchCriteria) -> OperationResult {
        self.dual_write(entity, WriteOp::Delete(criteria)).await
    }

    async fn dual_write(&self, entity: &str, op: WriteOp<'_>) -> OperationResult {
        let kind = op.kind();

        if !self.role.is_primary() {
            return match op.apply(self.virtual_store.as_ref(), entity).await {
                Ok(row) => OperationResult::succeeded(None, Some(Value::Object(row))),
                Err(e) => {
                    error!("Virtual database {} failed on {}: {}", kind, entity, e);
                    OperationResult::failed(e.to_string())
                }
            };
        }

        // 两个调用互不影响：一方失败不会取消另一方
        let (local, remote) = tokio::join!(
            op.apply(self.local.as_ref(), entity),
            op.apply(self.virtual_store.as_ref(), entity),
        );

        let local = self.settle(StoreSide::Local, kind, entity, local);
        let remote = self.settle(StoreSide::Virtual, kind, entity, remote);

        match (local, remote) {
            (None, None) => {
                self.counters.total_failures.fetch_add(1, Ordering::Relaxed);
                error!("❌ Both databases failed to {} {} record", kind, entity);
                OperationResult::failed(format!("Both databases failed to {} record", kind))
            }
            (local, remote) => {
                if local.is_none() || remote.is_none() {
                    self.counters.partial_failures.fetch_add(1, Ordering::Relaxed);
                }
                if self.invalidate_on_write {
                    self.cache.invalidate_entity(entity);
                }
                OperationResult::succeeded(local.map(Value::Object), remote.map(Value::Object))
            }
        }
    }

    fn settle(
        &self,
        side: StoreSide,
        kind: StoreOp,
        entity: &str,
        outcome: Result<Record>,
    ) -> Option<Record> {
        match outcome {
            Ok(row) => Some(row),
            Err(e) => {
                warn!("{} database {} failed on {}: {}", side, kind, entity, e);
                None
            }
        }
    }

    /// 合并读取
    ///
    /// 主节点先查缓存，未命中时并发读取两库并按主键合并（虚拟库优先）。
    /// 任一库读取失败直接返回错误，不降级为部分数据。
    pub async fn get_merged_data(&self, entity: &str, options: &QueryOptions) -> Result<Vec<Record>> {
        if !self.role.is_primary() {
            return self.virtual_store.list(entity, options).await;
        }

        let Some(key_field) = self.registry.key_field(entity) else {
            debug!("{} 未注册主键字段，直接返回虚拟库数据", entity);
            return self.virtual_store.list(entity, options).await;
        };

        let cache_key = MergeCacheKey::new(entity, options);
        if let Some(records) = self.cache.get(&cache_key).await {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(records);
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let (local_rows, virtual_rows) = tokio::try_join!(
            self.local.list(entity, options),
            self.virtual_store.list(entity, options),
        )?;

        let merged = merge_records(local_rows, virtual_rows, key_field);
        self.cache.put(cache_key, merged.clone()).await;

        Ok(merged)
    }
}

/// 按主键合并两组记录：先放入本地记录，再用虚拟库记录覆盖同键记录
///
/// 结果保持首次出现的位置顺序；缺少主键的记录原样保留。
pub fn merge_records(local: Vec<Record>, remote: Vec<Record>, key_field: &str) -> Vec<Record> {
    let mut merged: Vec<Record> = Vec::with_capacity(local.len() + remote.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in local.into_iter().chain(remote) {
        match key_of(&record, key_field) {
            Some(key) => match positions.get(&key) {
                Some(&index) => merged[index] = record,
                None => {
                    positions.insert(key, merged.len());
                    merged.push(record);
                }
            },
            None => merged.push(record),
        }
    }

    merged
}
