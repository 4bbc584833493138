//! 数据模型模块

pub mod entity;
pub mod record;
pub mod role;

// 重新导出常用类型
pub use entity::{validate_identifier, EntityDef, EntityRegistry, DEFAULT_ENTITY_KEYS};
pub use record::{
    key_criteria, key_of, matches_criteria, MatchCriteria, OperationResult, OrderBy,
    QueryOptions, Record, SortOrder,
};
pub use role::NodeRole;
