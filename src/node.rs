use std::sync::Arc;
use tracing::{error, info};

use crate::config::ReplicaConfig;
use crate::error::{ReplicaError, Result};
use crate::replication::{ReplicationCoordinator, SyncWorker};
use crate::store::{open_datastore, Datastore};

/// 复制节点
///
/// 持有两个存储句柄、复制协调器和同步 Worker。角色在创建时确定，运行期间不变。
pub struct ReplicaNode {
    config: ReplicaConfig,
    coordinator: Arc<ReplicationCoordinator>,
    sync_worker: Arc<SyncWorker>,
}

impl ReplicaNode {
    /// 按配置连接两个存储并组装节点
    pub async fn new(config: ReplicaConfig) -> Result<Self> {
        info!("🔧 初始化复制节点 (role={})...", config.role);

        let local = open_datastore(
            "local",
            &config.local_database_url,
            &config.pool,
            &config.entities,
        )
        .await?;
        let virtual_store = open_datastore(
            "virtual",
            &config.virtual_database_url,
            &config.pool,
            &config.entities,
        )
        .await?;

        Ok(Self::from_stores(config, local, virtual_store))
    }

    /// 使用已打开的存储组装节点
    pub fn from_stores(
        config: ReplicaConfig,
        local: Arc<dyn Datastore>,
        virtual_store: Arc<dyn Datastore>,
    ) -> Self {
        let coordinator = Arc::new(ReplicationCoordinator::from_config(
            &config,
            local.clone(),
            virtual_store.clone(),
        ));
        let sync_worker = Arc::new(SyncWorker::from_config(&config, local, virtual_store));

        Self {
            config,
            coordinator,
            sync_worker,
        }
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn coordinator(&self) -> Arc<ReplicationCoordinator> {
        self.coordinator.clone()
    }

    pub fn sync_worker(&self) -> Arc<SyncWorker> {
        self.sync_worker.clone()
    }

    /// 运行节点直到收到 Ctrl-C
    pub async fn run(&self) -> Result<()> {
        for store in [self.coordinator.local(), self.coordinator.virtual_store()] {
            match store.ping().await {
                Ok(()) => info!("✅ {} 存储连接正常", store.name()),
                Err(e) => error!("❌ {} 存储不可用: {}", store.name(), e),
            }
        }

        let worker = self.sync_worker.clone();
        let worker_task = tokio::spawn(async move {
            if let Err(e) = worker.start().await {
                error!("同步 Worker 异常退出: {}", e);
            }
        });

        info!("🚀 复制节点已启动，按 Ctrl-C 退出");
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| ReplicaError::Internal(format!("等待退出信号失败: {}", e)))?;

        info!("🛑 收到退出信号，正在关闭...");
        self.sync_worker.stop().await;
        worker_task
            .await
            .map_err(|e| ReplicaError::Internal(format!("同步 Worker 任务失败: {}", e)))?;

        let stats = self.coordinator.stats();
        info!(
            "📊 partial_failures={}, total_failures={}, cache_hits={}, cache_misses={}",
            stats.partial_failures, stats.total_failures, stats.cache_hits, stats.cache_misses
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeRole;

    #[tokio::test]
    async fn test_new_with_memory_stores() {
        let config = ReplicaConfig {
            local_database_url: "memory://local".to_string(),
            virtual_database_url: "memory://virtual".to_string(),
            role: NodeRole::Primary,
            ..ReplicaConfig::default()
        };

        let node = ReplicaNode::new(config).await.unwrap();
        assert_eq!(node.coordinator().role(), NodeRole::Primary);
        assert_eq!(node.coordinator().local().name(), "local");
        assert_eq!(node.sync_worker().role(), NodeRole::Primary);
    }
}
