use serde::{Deserialize, Serialize};

/// 复制层错误类型
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum ReplicaError {
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(String),
    /// 记录未找到
    #[error("Not found: {0}")]
    NotFound(String),
    /// 验证错误（非法标识符、空条件等）
    #[error("Validation error: {0}")]
    Validation(String),
    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// 未注册主键字段的实体类型
    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),
    /// 存储不可用（含测试注入的故障）
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for ReplicaError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ReplicaError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                ReplicaError::Unavailable(err.to_string())
            }
            other => ReplicaError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ReplicaError {
    fn from(err: serde_json::Error) -> Self {
        ReplicaError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ReplicaError {
    fn from(err: std::io::Error) -> Self {
        ReplicaError::Internal(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ReplicaError>;

/// 错误代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 内部错误
    Internal = 1000,
    /// 验证错误
    Validation = 1003,
    /// 记录未找到
    NotFound = 1004,
    /// 未知实体类型
    UnknownEntity = 1005,
    /// 数据库错误
    Database = 2000,
    /// 序列化错误
    Serialization = 2002,
    /// 配置错误
    Configuration = 2003,
    /// 存储不可用
    Unavailable = 5000,
}

impl From<&ReplicaError> for ErrorCode {
    fn from(error: &ReplicaError) -> Self {
        match error {
            ReplicaError::Database(_) => ErrorCode::Database,
            ReplicaError::NotFound(_) => ErrorCode::NotFound,
            ReplicaError::Validation(_) => ErrorCode::Validation,
            ReplicaError::Configuration(_) => ErrorCode::Configuration,
            ReplicaError::Serialization(_) => ErrorCode::Serialization,
            ReplicaError::UnknownEntity(_) => ErrorCode::UnknownEntity,
            ReplicaError::Unavailable(_) => ErrorCode::Unavailable,
            ReplicaError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl ReplicaError {
    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from(self)
    }

    /// 是否为“记录不存在”类错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReplicaError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: ReplicaError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_display_carries_message() {
        let err = ReplicaError::UnknownEntity("widgets".to_string());
        assert_eq!(err.to_string(), "Unknown entity type: widgets");
    }
}
