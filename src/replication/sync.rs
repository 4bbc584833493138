//! 同步 Worker
//!
//! 主节点启动时执行一次虚拟库 → 本地库同步，之后按固定间隔重复。
//! 每轮按实体表顺序拉取源库全部记录，逐行以主键 upsert 到目标库；
//! 单行或单个实体类型失败只计数，不中断本轮。

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ReplicaConfig;
use crate::model::{key_criteria, EntityRegistry, NodeRole, QueryOptions};
use crate::store::Datastore;

/// 同步方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    /// 虚拟库 → 本地库（定时同步使用）
    VirtualToLocal,
    /// 本地库 → 虚拟库（仅手动触发）
    LocalToVirtual,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::VirtualToLocal => write!(f, "virtual-to-local"),
            SyncDirection::LocalToVirtual => write!(f, "local-to-virtual"),
        }
    }
}

/// 单轮同步结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub direction: SyncDirection,
    /// 成功 upsert 的行数
    pub synced_count: u64,
    /// 失败的行数 + 拉取失败的实体类型数
    pub error_count: u64,
    /// 缺少主键字段而跳过的行数
    pub skipped_rows: u64,
    /// 本轮处理的实体类型数
    pub entity_types: u64,
    /// 本轮是否整体跳过（成员节点或上一轮仍在运行）
    pub skipped: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn begin(direction: SyncDirection) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            direction,
            synced_count: 0,
            error_count: 0,
            skipped_rows: 0,
            entity_types: 0,
            skipped: false,
            started_at: now,
            finished_at: now,
        }
    }

    fn skipped(direction: SyncDirection) -> Self {
        Self {
            skipped: true,
            ..Self::begin(direction)
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    /// 本轮耗时
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Worker 统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    /// 实际执行的轮数
    pub total_passes: u64,
    /// 被跳过的轮数
    pub skipped_passes: u64,
    /// 最近一次执行的结果
    pub last_report: Option<SyncReport>,
}

/// 同步 Worker
pub struct SyncWorker {
    local: Arc<dyn Datastore>,
    virtual_store: Arc<dyn Datastore>,
    role: NodeRole,
    registry: EntityRegistry,
    interval: Duration,
    /// 同一时刻只允许一轮同步
    pass_lock: Mutex<()>,
    is_running: Arc<RwLock<bool>>,
    shutdown: Notify,
    total_passes: AtomicU64,
    skipped_passes: AtomicU64,
    last_report: SyncMutex<Option<SyncReport>>,
}

impl SyncWorker {
    pub fn new(
        local: Arc<dyn Datastore>,
        virtual_store: Arc<dyn Datastore>,
        role: NodeRole,
        interval: Duration,
    ) -> Self {
        Self {
            local,
            virtual_store,
            role,
            registry: EntityRegistry::default(),
            interval,
            pass_lock: Mutex::new(()),
            is_running: Arc::new(RwLock::new(false)),
            shutdown: Notify::new(),
            total_passes: AtomicU64::new(0),
            skipped_passes: AtomicU64::new(0),
            last_report: SyncMutex::new(None),
        }
    }

    pub fn from_config(
        config: &ReplicaConfig,
        local: Arc<dyn Datastore>,
        virtual_store: Arc<dyn Datastore>,
    ) -> Self {
        Self::new(local, virtual_store, config.role, config.sync_interval())
            .with_registry(config.entities.clone())
    }

    pub fn with_registry(mut self, registry: EntityRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            total_passes: self.total_passes.load(Ordering::Relaxed),
            skipped_passes: self.skipped_passes.load(Ordering::Relaxed),
            last_report: self.last_report.lock().clone(),
        }
    }

    /// 虚拟库 → 本地库同步一轮
    pub async fn sync_virtual_to_local(&self) -> SyncReport {
        self.sync_once(SyncDirection::VirtualToLocal).await
    }

    /// 执行一轮同步
    ///
    /// 成员节点、或已有一轮正在执行时，返回 `skipped = true` 的报告。
    pub async fn sync_once(&self, direction: SyncDirection) -> SyncReport {
        if !self.role.is_primary() {
            info!("⏭️ 非主节点，跳过同步");
            return self.record_skip(direction);
        }

        let Ok(_guard) = self.pass_lock.try_lock() else {
            warn!("⏭️ 上一轮同步仍在进行，跳过本轮 ({})", direction);
            return self.record_skip(direction);
        };

        let (source, target) = match direction {
            SyncDirection::VirtualToLocal => (&self.virtual_store, &self.local),
            SyncDirection::LocalToVirtual => (&self.local, &self.virtual_store),
        };

        info!("🔄 开始同步 {} → {}", source.name(), target.name());

        let mut report = SyncReport::begin(direction);
        for entity in self.registry.entities() {
            report.entity_types += 1;
            self.sync_entity(
                source.as_ref(),
                target.as_ref(),
                &entity.name,
                &entity.key_field,
                &mut report,
            )
            .await;
        }
        let report = report.finish();

        info!(
            "✅ 同步完成 ({}): synced={}, errors={}, skipped_rows={}, elapsed={}ms",
            direction,
            report.synced_count,
            report.error_count,
            report.skipped_rows,
            report.elapsed().num_milliseconds()
        );

        self.total_passes.fetch_add(1, Ordering::Relaxed);
        *self.last_report.lock() = Some(report.clone());
        report
    }

    async fn sync_entity(
        &self,
        source: &dyn Datastore,
        target: &dyn Datastore,
        entity: &str,
        key_field: &str,
        report: &mut SyncReport,
    ) {
        let rows = match source.list(entity, &QueryOptions::new()).await {
            Ok(rows) => rows,
            Err(e) => {
                error!("❌ 拉取 {} 失败 ({}): {}", entity, source.name(), e);
                report.error_count += 1;
                return;
            }
        };

        debug!("{}: {} 行待同步", entity, rows.len());

        for row in rows {
            let key = match row.get(key_field) {
                Some(value) if !value.is_null() => value.clone(),
                _ => {
                    debug!("{} 行缺少主键字段 {}，跳过", entity, key_field);
                    report.skipped_rows += 1;
                    continue;
                }
            };

            let criteria = key_criteria(key_field, key.clone());
            match target.upsert(entity, &criteria, &row, &row).await {
                Ok(_) => report.synced_count += 1,
                Err(e) => {
                    warn!("⚠️ 同步 {} {}={} 失败: {}", entity, key_field, display_key(&key), e);
                    report.error_count += 1;
                }
            }
        }
    }

    fn record_skip(&self, direction: SyncDirection) -> SyncReport {
        self.skipped_passes.fetch_add(1, Ordering::Relaxed);
        SyncReport::skipped(direction)
    }

    /// 启动定时同步循环
    ///
    /// 第一轮立即执行，之后每个间隔执行一次，直到调用 [`SyncWorker::stop`]。
    pub async fn start(self: Arc<Self>) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow::anyhow!("Sync interval must be greater than zero"));
        }

        {
            let mut running = self.is_running.write().await;
            if *running {
                return Err(anyhow::anyhow!("Sync worker is already running"));
            }
            *running = true;
        }

        if !self.role.is_primary() {
            info!("ℹ️ 成员节点不运行同步循环");
            *self.is_running.write().await = false;
            return Ok(());
        }

        info!("🚀 同步 Worker 已启动，间隔 {:?}", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_pass: Option<JoinHandle<SyncReport>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // 每轮放到独立任务中，tick 不被长时间的同步阻塞
                    let worker = self.clone();
                    last_pass = Some(tokio::spawn(async move {
                        worker.sync_virtual_to_local().await
                    }));
                }
                _ = self.shutdown.notified() => break,
            }

            if !*self.is_running.read().await {
                break;
            }
        }

        // 等待仍在进行的一轮结束后再返回
        if let Some(pass) = last_pass {
            if let Err(e) = pass.await {
                error!("同步任务异常结束: {}", e);
            }
        }
        drop(self.pass_lock.lock().await);

        info!("同步 Worker 已停止");
        Ok(())
    }

    /// 停止定时同步
    ///
    /// 正在进行的一轮会执行完，[`SyncWorker::start`] 在其结束后才返回。
    pub async fn stop(&self) {
        info!("正在停止同步 Worker...");
        *self.is_running.write().await = false;
        self.shutdown.notify_one();
    }
}

fn display_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Record;
    use crate::store::{MemoryDatastore, StoreOp};
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn worker(role: NodeRole) -> (Arc<MemoryDatastore>, Arc<MemoryDatastore>, SyncWorker) {
        let local = Arc::new(MemoryDatastore::new("local"));
        let remote = Arc::new(MemoryDatastore::new("virtual"));
        let worker = SyncWorker::new(local.clone(), remote.clone(), role, Duration::from_secs(30));
        (local, remote, worker)
    }

    #[tokio::test]
    async fn test_member_skips_without_touching_stores() {
        let (local, remote, worker) = worker(NodeRole::Member);
        remote.seed("assets", vec![record(json!({"asset_id": 1}))]);

        let report = worker.sync_virtual_to_local().await;

        assert!(report.skipped);
        assert_eq!(remote.stats().total(), 0);
        assert_eq!(local.stats().total(), 0);
        assert_eq!(worker.stats().skipped_passes, 1);
    }

    #[tokio::test]
    async fn test_rows_without_key_are_skipped() {
        let (local, remote, worker) = worker(NodeRole::Primary);
        remote.seed(
            "assets",
            vec![record(json!({"asset_id": 1})), record(json!({"name": "orphan"}))],
        );

        let report = worker.sync_virtual_to_local().await;

        assert_eq!(report.synced_count, 1);
        assert_eq!(report.skipped_rows, 1);
        assert_eq!(report.error_count, 0);
        assert_eq!(local.rows("assets").len(), 1);
    }

    #[tokio::test]
    async fn test_entity_fetch_failure_does_not_stop_pass() {
        let (local, remote, worker) = worker(NodeRole::Primary);
        remote.seed("users", vec![record(json!({"user_id": 7}))]);
        remote.seed("assets", vec![record(json!({"asset_id": 1}))]);
        remote.fail_entity("users");

        let report = worker.sync_virtual_to_local().await;

        assert_eq!(report.error_count, 1);
        assert_eq!(report.synced_count, 1);
        assert_eq!(report.entity_types, EntityRegistry::default().len() as u64);
        assert_eq!(local.rows("assets").len(), 1);
    }

    #[tokio::test]
    async fn test_local_to_virtual_direction() {
        let (local, remote, worker) = worker(NodeRole::Primary);
        local.seed("categories", vec![record(json!({"category_id": 3, "name": "IT"}))]);

        let report = worker.sync_once(SyncDirection::LocalToVirtual).await;

        assert_eq!(report.direction, SyncDirection::LocalToVirtual);
        assert_eq!(report.synced_count, 1);
        assert_eq!(remote.rows("categories"), vec![record(json!({"category_id": 3, "name": "IT"}))]);
        assert_eq!(local.stats().calls(StoreOp::Upsert), 0);
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let (local, remote, worker) = worker(NodeRole::Primary);
        remote.seed("assets", vec![record(json!({"asset_id": 1}))]);
        let worker = Arc::new(worker);

        let handle = tokio::spawn(worker.clone().start());
        // 第一轮在启动时立即执行
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(local.rows("assets").len(), 1);
        assert!(worker.is_running().await);

        worker.stop().await;
        handle.await.unwrap().unwrap();
        assert!(!worker.is_running().await);
    }

    #[tokio::test]
    async fn test_start_rejects_zero_interval() {
        let local = Arc::new(MemoryDatastore::new("local"));
        let remote = Arc::new(MemoryDatastore::new("virtual"));
        let worker = Arc::new(SyncWorker::new(local, remote, NodeRole::Primary, Duration::ZERO));

        let err = worker.clone().start().await.unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
        assert!(!worker.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_pass() {
        let local = Arc::new(MemoryDatastore::new("local"));
        let remote =
            Arc::new(MemoryDatastore::new("virtual").with_latency(Duration::from_millis(20)));
        remote.seed("assets", vec![record(json!({"asset_id": 1}))]);
        let worker = Arc::new(SyncWorker::new(
            local.clone(),
            remote,
            NodeRole::Primary,
            Duration::from_secs(30),
        ));

        let handle = tokio::spawn(worker.clone().start());
        // 一轮要遍历全部实体类型，每次 list 延迟 20ms
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(worker.stats().total_passes, 0);

        worker.stop().await;
        handle.await.unwrap().unwrap();

        assert_eq!(worker.stats().total_passes, 1);
        assert_eq!(local.rows("assets").len(), 1);
    }
}
