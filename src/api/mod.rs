// ==========================================
// 校车车队管理系统 - API 层
// ==========================================
// 职责: 提供异步业务 API 接口，供宿主（HTTP / CLI）调用
// ==========================================

pub mod error;
pub mod import_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use import_api::{
    AnalyzeRequest, AnalyzeResponse, ExecuteRequest, ImportApi, RollbackResponse, ValidateRequest,
};
