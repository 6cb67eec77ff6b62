// ==========================================
// 校车车队管理系统 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 只承载“中断作业”的失败；行级问题一律以 Issue 累积
// ==========================================

use crate::domain::{ErrorType, Issue, JobState};
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("{0}")]
    FileValidation(String),

    #[error("Failed to open workbook: {0}")]
    FileOpen(String),

    #[error("Workbook contains no sheets")]
    NoSheets,

    #[error("No header row found in any sheet")]
    NoHeader,

    #[error("Failed to read sheet '{sheet}': {message}")]
    SheetRead { sheet: String, message: String },

    #[error("Failed to store upload: {0}")]
    Storage(String),

    // ===== 会话/作业状态错误 =====
    #[error("File '{0}' has expired or is unknown")]
    ExpiredFile(String),

    #[error("An import is already running for file '{0}'")]
    Busy(String),

    #[error("File '{file_id}' is in state {state} and cannot accept this request")]
    InvalidState { file_id: String, state: JobState },

    #[error("File was analyzed as '{expected}' but request declares '{actual}'")]
    TypeMismatch { expected: String, actual: String },

    #[error("Import '{import_id}' cannot be rolled back: {reason}")]
    RollbackUnavailable { import_id: String, reason: String },

    // ===== 映射错误 =====
    #[error("Column mapping is invalid ({} problem(s))", .0.len())]
    InvalidMapping(Vec<Issue>),

    // ===== 数据库错误 =====
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    // ===== 通用错误 =====
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ImportError {
    /// 对应的机器可读错误标签
    pub fn error_type(&self) -> ErrorType {
        match self {
            ImportError::FileValidation(_) => ErrorType::FileValidation,
            ImportError::FileOpen(_) => ErrorType::FileOpen,
            ImportError::NoSheets => ErrorType::NoSheets,
            ImportError::NoHeader => ErrorType::NoHeader,
            ImportError::SheetRead { .. } => ErrorType::SheetRead,
            ImportError::Storage(_) => ErrorType::Storage,
            ImportError::ExpiredFile(_) => ErrorType::ExpiredFile,
            ImportError::Busy(_) => ErrorType::Busy,
            ImportError::InvalidState { .. } => ErrorType::InvalidState,
            ImportError::TypeMismatch { .. } => ErrorType::TypeMismatch,
            ImportError::RollbackUnavailable { .. } => ErrorType::RollbackUnavailable,
            ImportError::InvalidMapping(_) => ErrorType::InvalidMapping,
            ImportError::Repository(_) => ErrorType::Database,
            ImportError::InternalError(_) => ErrorType::Transaction,
        }
    }

    /// 转换为文件级 Issue（供前端统一展示）
    pub fn to_issue(&self) -> Issue {
        let issue = Issue::error(self.error_type(), self.to_string());
        match self {
            ImportError::SheetRead { sheet, .. } => issue.in_sheet(sheet),
            _ => issue,
        }
    }
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::Storage(err.to_string())
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::FileOpen(err.to_string())
    }
}
