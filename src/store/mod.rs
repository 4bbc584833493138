//! 数据存储句柄
//!
//! 本地库与虚拟库都实现同一个 [`Datastore`] trait，复制层只依赖该 trait。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::config::PoolConfig;
use crate::error::{ReplicaError, Result};
use crate::infra::database::{mask_database_url, Database};
use crate::model::{EntityRegistry, MatchCriteria, QueryOptions, Record};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryDatastore, MemoryStoreStats};
pub use postgres::PgDatastore;

/// 存储操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreOp {
    Create,
    Update,
    Delete,
    List,
    Upsert,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOp::Create => "create",
            StoreOp::Update => "update",
            StoreOp::Delete => "delete",
            StoreOp::List => "list",
            StoreOp::Upsert => "upsert",
        };
        f.write_str(name)
    }
}

/// 关系型存储句柄
///
/// 所有操作都以实体类型名（表名）寻址，记录以 JSON 对象传递。
/// `update` / `delete` 在没有匹配行时返回 [`ReplicaError::NotFound`]。
#[async_trait]
pub trait Datastore: Send + Sync {
    /// 存储名称（用于日志）
    fn name(&self) -> &str;

    /// 创建记录，返回写入后的完整行
    async fn create(&self, entity: &str, data: &Record) -> Result<Record>;

    /// 按条件更新记录
    async fn update(&self, entity: &str, criteria: &MatchCriteria, data: &Record) -> Result<Record>;

    /// 按条件删除记录，返回被删除的行
    async fn delete(&self, entity: &str, criteria: &MatchCriteria) -> Result<Record>;

    /// 列表查询
    async fn list(&self, entity: &str, options: &QueryOptions) -> Result<Vec<Record>>;

    /// 存在则更新，不存在则创建
    async fn upsert(
        &self,
        entity: &str,
        criteria: &MatchCriteria,
        update: &Record,
        create: &Record,
    ) -> Result<Record>;

    /// 连通性检查
    async fn ping(&self) -> Result<()>;
}

/// 按连接字符串打开存储
///
/// - `postgres://` / `postgresql://`：PostgreSQL 连接池
/// - `memory://<name>`：进程内存储
pub async fn open_datastore(
    name: &str,
    url: &str,
    pool: &PoolConfig,
    registry: &EntityRegistry,
) -> Result<Arc<dyn Datastore>> {
    let parsed = Url::parse(url).map_err(|e| {
        ReplicaError::Configuration(format!(
            "{} database url is invalid ({}): {}",
            name,
            mask_database_url(url),
            e
        ))
    })?;

    match parsed.scheme() {
        "postgres" | "postgresql" => {
            let database = Database::connect(url, pool).await?;
            Ok(Arc::new(PgDatastore::new(name, database.pool().clone())))
        }
        "memory" => {
            info!("🧠 {} 使用内存存储: {}", name, url);
            Ok(Arc::new(MemoryDatastore::with_registry(name, registry.clone())))
        }
        other => Err(ReplicaError::Configuration(format!(
            "{} database url has unsupported scheme '{}'",
            name, other
        ))),
    }
}
