//! 内存存储实现
//!
//! `memory://` 连接使用，也用于测试：支持调用计数、故障注入和人为延迟。

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

use super::{Datastore, StoreOp};
use crate::error::{ReplicaError, Result};
use crate::model::{key_of, matches_criteria, EntityRegistry, MatchCriteria, QueryOptions, Record};

/// 调用统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStoreStats {
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    pub lists: u64,
    pub upserts: u64,
}

impl MemoryStoreStats {
    /// 所有操作的调用总数
    pub fn total(&self) -> u64 {
        self.creates + self.updates + self.deletes + self.lists + self.upserts
    }

    pub fn calls(&self, op: StoreOp) -> u64 {
        match op {
            StoreOp::Create => self.creates,
            StoreOp::Update => self.updates,
            StoreOp::Delete => self.deletes,
            StoreOp::List => self.lists,
            StoreOp::Upsert => self.upserts,
        }
    }
}

#[derive(Default)]
struct Counters {
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    lists: AtomicU64,
    upserts: AtomicU64,
}

impl Counters {
    fn bump(&self, op: StoreOp) {
        let counter = match op {
            StoreOp::Create => &self.creates,
            StoreOp::Update => &self.updates,
            StoreOp::Delete => &self.deletes,
            StoreOp::List => &self.lists,
            StoreOp::Upsert => &self.upserts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            creates: self.creates.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            lists: self.lists.load(Ordering::Relaxed),
            upserts: self.upserts.load(Ordering::Relaxed),
        }
    }
}

/// 故障注入计划
#[derive(Debug, Default)]
struct FaultPlan {
    /// 整类操作失败
    operations: HashSet<StoreOp>,
    /// 整个实体类型的所有操作失败
    entities: HashSet<String>,
    /// 负载满足条件时失败
    records: Vec<(StoreOp, MatchCriteria)>,
}

impl FaultPlan {
    fn check(&self, store: &str, op: StoreOp, entity: &str, payload: Option<&Record>) -> Result<()> {
        let record_hit = payload.is_some_and(|payload| {
            self.records
                .iter()
                .any(|(fault_op, criteria)| *fault_op == op && matches_criteria(payload, criteria))
        });

        if self.operations.contains(&op) || self.entities.contains(entity) || record_hit {
            return Err(ReplicaError::Unavailable(format!(
                "[{}] injected {} failure on {}",
                store, op, entity
            )));
        }
        Ok(())
    }
}

/// 进程内存储
pub struct MemoryDatastore {
    name: String,
    registry: EntityRegistry,
    tables: RwLock<HashMap<String, Vec<Record>>>,
    counters: Counters,
    faults: RwLock<FaultPlan>,
    latency: RwLock<Option<Duration>>,
}

impl MemoryDatastore {
    /// 使用默认实体表创建
    pub fn new(name: &str) -> Self {
        Self::with_registry(name, EntityRegistry::default())
    }

    /// 使用指定实体表创建（用于主键唯一约束和自增）
    pub fn with_registry(name: &str, registry: EntityRegistry) -> Self {
        Self {
            name: name.to_string(),
            registry,
            tables: RwLock::new(HashMap::new()),
            counters: Counters::default(),
            faults: RwLock::new(FaultPlan::default()),
            latency: RwLock::new(None),
        }
    }

    /// 每次调用前等待指定时长
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.write() = Some(latency);
        self
    }

    /// 直接写入行（不计数、不触发故障）
    pub fn seed(&self, entity: &str, rows: impl IntoIterator<Item = Record>) {
        self.tables
            .write()
            .entry(entity.to_string())
            .or_default()
            .extend(rows);
    }

    /// 当前表内容快照
    pub fn rows(&self, entity: &str) -> Vec<Record> {
        self.tables.read().get(entity).cloned().unwrap_or_default()
    }

    /// 调用统计
    pub fn stats(&self) -> MemoryStoreStats {
        self.counters.snapshot()
    }

    /// 让某类操作全部失败
    pub fn fail_operation(&self, op: StoreOp) {
        self.faults.write().operations.insert(op);
    }

    /// 让某实体类型的所有操作失败
    pub fn fail_entity(&self, entity: &str) {
        self.faults.write().entities.insert(entity.to_string());
    }

    /// 负载满足条件的操作失败
    pub fn fail_matching(&self, op: StoreOp, criteria: MatchCriteria) {
        self.faults.write().records.push((op, criteria));
    }

    /// 清除所有故障
    pub fn clear_faults(&self) {
        *self.faults.write() = FaultPlan::default();
    }

    async fn enter(&self, op: StoreOp, entity: &str, payload: Option<&Record>) -> Result<()> {
        self.counters.bump(op);
        trace!("[{}] {} {}", self.name, op, entity);

        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.faults.read().check(&self.name, op, entity, payload)
    }

    fn insert_row(&self, rows: &mut Vec<Record>, entity: &str, data: &Record) -> Result<Record> {
        let mut row = data.clone();

        if let Some(key_field) = self.registry.key_field(entity) {
            match key_of(&row, key_field) {
                Some(key) => {
                    if rows.iter().any(|r| key_of(r, key_field).as_deref() == Some(key.as_str())) {
                        return Err(ReplicaError::Database(format!(
                            "[{}] unique constraint failed on {}.{} = {}",
                            self.name, entity, key_field, key
                        )));
                    }
                }
                None => {
                    let next = rows
                        .iter()
                        .filter_map(|r| r.get(key_field).and_then(Value::as_i64))
                        .max()
                        .unwrap_or(0)
                        + 1;
                    row.insert(key_field.to_string(), Value::from(next));
                }
            }
        }

        rows.push(row.clone());
        Ok(row)
    }

    fn not_found(&self, entity: &str) -> ReplicaError {
        ReplicaError::NotFound(format!("[{}] no matching {} record", self.name, entity))
    }
}

fn merge_into(row: &mut Record, data: &Record) {
    for (field, value) in data {
        row.insert(field.clone(), value.clone());
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self, entity: &str, data: &Record) -> Result<Record> {
        self.enter(StoreOp::Create, entity, Some(data)).await?;

        let mut tables = self.tables.write();
        let rows = tables.entry(entity.to_string()).or_default();
        self.insert_row(rows, entity, data)
    }

    async fn update(&self, entity: &str, criteria: &MatchCriteria, data: &Record) -> Result<Record> {
        self.enter(StoreOp::Update, entity, Some(criteria)).await?;

        let mut tables = self.tables.write();
        let row = tables
            .get_mut(entity)
            .and_then(|rows| rows.iter_mut().find(|r| matches_criteria(r, criteria)))
            .ok_or_else(|| self.not_found(entity))?;

        merge_into(row, data);
        Ok(row.clone())
    }

    async fn delete(&self, entity: &str, criteria: &MatchCriteria) -> Result<Record> {
        self.enter(StoreOp::Delete, entity, Some(criteria)).await?;

        let mut tables = self.tables.write();
        let rows = tables.get_mut(entity).ok_or_else(|| self.not_found(entity))?;
        let index = rows
            .iter()
            .position(|r| matches_criteria(r, criteria))
            .ok_or_else(|| self.not_found(entity))?;

        Ok(rows.remove(index))
    }

    async fn list(&self, entity: &str, options: &QueryOptions) -> Result<Vec<Record>> {
        self.enter(StoreOp::List, entity, None).await?;

        let rows = self
            .tables
            .read()
            .get(entity)
            .map(|rows| rows.iter().filter(|r| options.matches(r)).cloned().collect())
            .unwrap_or_default();

        Ok(options.apply(rows))
    }

    async fn upsert(
        &self,
        entity: &str,
        criteria: &MatchCriteria,
        update: &Record,
        create: &Record,
    ) -> Result<Record> {
        self.enter(StoreOp::Upsert, entity, Some(create)).await?;

        let mut tables = self.tables.write();
        let rows = tables.entry(entity.to_string()).or_default();

        if let Some(row) = rows.iter_mut().find(|r| matches_criteria(r, criteria)) {
            merge_into(row, update);
            return Ok(row.clone());
        }

        self.insert_row(rows, entity, create)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
