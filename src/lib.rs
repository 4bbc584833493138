pub mod cli;
pub mod config;
pub mod error;
pub mod infra;
pub mod logging;
pub mod model;
pub mod node;
pub mod replication;
pub mod store;

pub use config::ReplicaConfig;
pub use error::{ErrorCode, ReplicaError, Result};
pub use model::*;
pub use node::ReplicaNode;
pub use replication::{
    MergeCache, ReplicationCoordinator, SyncDirection, SyncReport, SyncWorker,
};
pub use store::{Datastore, MemoryDatastore, PgDatastore, StoreOp};
