// ==========================================
// 校车车队管理系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，转换导入/Repository错误为调用方可读的错误
// 说明: 每个错误都对应一个机器可读的 ErrorType 标签
// ==========================================

use crate::domain::{ErrorType, Issue};
use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 请求错误
    // ==========================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 文件被拒绝（扩展名 / 大小 / 无法打开 / 无表头）
    #[error("{message}")]
    FileRejected {
        error_type: ErrorType,
        message: String,
    },

    #[error("Column mapping is invalid ({} problem(s))", .0.len())]
    InvalidMapping(Vec<Issue>),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // ==========================================
    // 作业状态错误
    // ==========================================
    #[error("{0}")]
    ExpiredFile(String),

    #[error("{0}")]
    Busy(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    TypeMismatch(String),

    #[error("{0}")]
    RollbackUnavailable(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Database connection failed: {0}")]
    DatabaseConnectionError(String),

    #[error("Database transaction failed: {0}")]
    DatabaseTransactionError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("Internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 机器可读错误标签
    pub fn error_type(&self) -> ErrorType {
        match self {
            ApiError::InvalidInput(_) => ErrorType::Validation,
            ApiError::FileRejected { error_type, .. } => *error_type,
            ApiError::InvalidMapping(_) => ErrorType::InvalidMapping,
            ApiError::NotFound(_) => ErrorType::Validation,
            ApiError::ExpiredFile(_) => ErrorType::ExpiredFile,
            ApiError::Busy(_) => ErrorType::Busy,
            ApiError::InvalidState(_) => ErrorType::InvalidState,
            ApiError::TypeMismatch(_) => ErrorType::TypeMismatch,
            ApiError::RollbackUnavailable(_) => ErrorType::RollbackUnavailable,
            ApiError::DatabaseError(_) | ApiError::DatabaseConnectionError(_) => {
                ErrorType::Database
            }
            ApiError::DatabaseTransactionError(_) => ErrorType::Transaction,
            ApiError::StorageError(_) => ErrorType::Storage,
            ApiError::InternalError(_) | ApiError::Other(_) => ErrorType::Transaction,
        }
    }

    /// 转换为 Issue（供调用方统一展示）
    pub fn to_issue(&self) -> Issue {
        Issue::error(self.error_type(), self.to_string())
    }
}

// ==========================================
// 从 ImportError 转换
// ==========================================
impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        let error_type = err.error_type();
        match err {
            ImportError::FileValidation(_)
            | ImportError::FileOpen(_)
            | ImportError::NoSheets
            | ImportError::NoHeader
            | ImportError::SheetRead { .. } => ApiError::FileRejected {
                error_type,
                message: err.to_string(),
            },
            ImportError::Storage(msg) => ApiError::StorageError(msg),
            ImportError::ExpiredFile(_) => ApiError::ExpiredFile(err.to_string()),
            ImportError::Busy(_) => ApiError::Busy(err.to_string()),
            ImportError::InvalidState { .. } => ApiError::InvalidState(err.to_string()),
            ImportError::TypeMismatch { .. } => ApiError::TypeMismatch(err.to_string()),
            ImportError::RollbackUnavailable { .. } => {
                ApiError::RollbackUnavailable(err.to_string())
            }
            ImportError::InvalidMapping(issues) => ApiError::InvalidMapping(issues),
            ImportError::Repository(repo_err) => repo_err.into(),
            ImportError::InternalError(msg) => ApiError::InternalError(msg),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{} (id={})", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("failed to acquire database lock: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::DatabaseError(format!("unique constraint violated: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::DatabaseError(format!("foreign key constraint violated: {}", msg))
            }
            RepositoryError::InvalidIdentifier(msg) => ApiError::InvalidInput(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("field {}: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobState;

    #[test]
    fn test_import_error_conversion_keeps_tag() {
        let api_err: ApiError = ImportError::FileValidation("File is empty".into()).into();
        assert_eq!(api_err.error_type(), ErrorType::FileValidation);
        assert_eq!(api_err.to_string(), "File is empty");

        let api_err: ApiError = ImportError::Busy("f1".into()).into();
        assert_eq!(api_err.error_type(), ErrorType::Busy);

        let api_err: ApiError = ImportError::InvalidState {
            file_id: "f1".into(),
            state: JobState::Committed,
        }
        .into();
        assert_eq!(api_err.error_type(), ErrorType::InvalidState);
        assert!(api_err.to_string().contains("COMMITTED"));
    }

    #[test]
    fn test_repository_error_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "ImportHistory".to_string(),
            id: "imp-1".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("ImportHistory"));
                assert!(msg.contains("imp-1"));
            }
            _ => panic!("Expected NotFound"),
        }

        let api_err: ApiError = ImportError::Repository(RepositoryError::LockError(
            "poisoned".into(),
        ))
        .into();
        assert_eq!(api_err.error_type(), ErrorType::Database);
    }

    #[test]
    fn test_to_issue() {
        let issue = ApiError::RollbackUnavailable("window closed".into()).to_issue();
        assert_eq!(issue.error_type, ErrorType::RollbackUnavailable);
        assert!(issue.is_error());
        assert_eq!(issue.message, "window closed");
    }
}
