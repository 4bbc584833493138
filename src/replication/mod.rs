//! 复制层：双写协调、合并读取缓存、定时同步

pub mod cache;
pub mod coordinator;
pub mod sync;

pub use cache::{MergeCache, MergeCacheKey};
pub use coordinator::{merge_records, CoordinatorStats, ReplicationCoordinator, StoreSide};
pub use sync::{SyncDirection, SyncReport, SyncWorker, WorkerStats};
