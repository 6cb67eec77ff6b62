// ==========================================
// 校车车队管理系统 - 领域层
// ==========================================
// 职责: 导入管道的实体与类型（不含业务逻辑）
// ==========================================

pub mod import;
pub mod types;

// 重导出核心类型
pub use import::{
    CanonicalRecord, FieldValue, ImportHistoryRecord, ImportResult, Issue, Mapping, PreviewRow,
    RollbackInfo, SheetDescriptor, StagedUpload, ValidationResult,
};
pub use types::{ErrorType, ImportType, JobState, MileageSection, Severity};
