// 目录错误类型定义

use std::path::PathBuf;

use thiserror::Error;

/// 目录加载 / 校验 / 保存错误
#[derive(Debug, Error)]
pub enum CatalogError {
    /// 目录文件不存在
    #[error("Catalog file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// JSON 格式错误或包含未知字段
    #[error("Failed to parse catalog: {0}")]
    Parse(String),

    /// 字段校验失败，field 为完整路径，例如 servers[0].key
    #[error("Invalid catalog [{field}]: {message}")]
    Validation { field: String, message: String },

    /// 文件读写失败
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CatalogError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CatalogError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CatalogError::Io {
            context: context.into(),
            source,
        }
    }
}
