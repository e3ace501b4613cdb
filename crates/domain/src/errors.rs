//! 领域模型错误定义

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Outbox 记录字段校验错误
    #[error("Outbox 数据无效: {field}: {message}")]
    InvalidOutboxData { field: String, message: String },

    /// 状态机非法转换
    #[error("非法状态转换: {message}")]
    InvalidTransition { message: String },
}

impl DomainError {
    pub fn invalid_outbox_data(field: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::InvalidOutboxData {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// 仓储层错误类型
///
/// 基础设施实现（Postgres/Redis）把驱动错误映射到这里，
/// 应用层只依赖该枚举。
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("存储错误: {message}")]
    Storage { message: String },

    #[error("序列化错误: {message}")]
    Serialization { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        RepositoryError::Storage {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        RepositoryError::Serialization {
            message: message.into(),
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;
pub type RepositoryResult<T> = Result<T, RepositoryError>;
