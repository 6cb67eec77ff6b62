// ==========================================
// 校车车队管理系统 - 导入API
// ==========================================
// 职责: 封装导入管道（分析 / 校验 / 执行 / 撤销 / 历史）
// 说明: 工作簿解析与执行器的同步数据库循环放入 spawn_blocking
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::{
    ImportHistoryRecord, ImportResult, ImportType, Issue, Mapping, SheetDescriptor,
    ValidationResult,
};
use crate::importer::{ExecuteFlags, ImportService};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

// ==========================================
// 请求 / 响应
// ==========================================

/// 分析请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(rename = "type")]
    pub import_type: ImportType,
    pub file_name: String,
    /// 声明的 MIME 类型（可选）
    #[serde(default)]
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// 分析响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    /// 主工作表表头
    pub columns: Vec<String>,
    /// 所有已分析工作表的非空数据行数
    pub row_count: usize,
    pub sample_data: Vec<BTreeMap<String, String>>,
    pub import_type: ImportType,
    pub sheets: Vec<SheetDescriptor>,
    /// 原始表头 → 规范字段
    pub suggested_mappings: BTreeMap<String, String>,
    pub warnings: Vec<Issue>,
    pub errors: Vec<Issue>,
}

/// 校验请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRequest {
    #[serde(rename = "type")]
    pub import_type: ImportType,
    pub file_id: String,
    pub mappings: Mapping,
    /// 部分导入模式（执行时生效）
    #[serde(default)]
    pub allow_partial: bool,
}

/// 执行请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(rename = "type")]
    pub import_type: ImportType,
    pub file_id: String,
    pub mappings: Mapping,
    #[serde(default)]
    pub skip_duplicates: bool,
    #[serde(default)]
    pub update_existing: bool,
    /// 相对截止时间（毫秒）
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

/// 撤销响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResponse {
    pub import_id: String,
    pub table_name: String,
    pub deleted: usize,
}

// ==========================================
// ImportApi
// ==========================================
#[derive(Clone)]
pub struct ImportApi {
    service: Arc<ImportService>,
}

impl ImportApi {
    pub fn new(service: Arc<ImportService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<ImportService> {
        &self.service
    }

    /// 分析上传文件
    ///
    /// # 返回
    /// - Ok(AnalyzeResponse): 文件已暂存，返回 file_id
    /// - Err(ApiError::FileRejected): 预检或工作簿结构失败，无残留状态
    #[instrument(skip(self, request), fields(import_type = %request.import_type, file_name = %request.file_name))]
    pub async fn analyze(&self, request: AnalyzeRequest) -> ApiResult<AnalyzeResponse> {
        let service = Arc::clone(&self.service);
        let outcome = run_blocking(move || {
            service.analyze(
                request.import_type,
                &request.file_name,
                request.content_type.as_deref(),
                &request.bytes,
            )
        })
        .await?;

        let upload = outcome.upload;
        let analysis = outcome.analysis;
        info!(file_id = %upload.file_id, rows = analysis.row_count, "分析完成");

        Ok(AnalyzeResponse {
            file_id: upload.file_id,
            file_name: upload.file_name,
            file_size: upload.file_size,
            columns: analysis.columns,
            row_count: analysis.row_count,
            sample_data: analysis.sample_data,
            import_type: upload.import_type,
            sheets: analysis.sheets,
            suggested_mappings: analysis.suggested_mappings,
            warnings: analysis.warnings,
            errors: analysis.errors,
        })
    }

    /// 校验（只读，可重复）
    #[instrument(skip(self, request), fields(file_id = %request.file_id))]
    pub async fn validate(&self, request: ValidateRequest) -> ApiResult<ValidationResult> {
        let service = Arc::clone(&self.service);
        run_blocking(move || {
            service.validate(
                request.import_type,
                &request.file_id,
                &request.mappings,
                request.allow_partial,
            )
        })
        .await
    }

    /// 执行导入
    #[instrument(skip(self, request), fields(file_id = %request.file_id))]
    pub async fn execute(&self, request: ExecuteRequest) -> ApiResult<ImportResult> {
        let service = Arc::clone(&self.service);
        run_blocking(move || {
            service.execute(
                request.import_type,
                &request.file_id,
                &request.mappings,
                ExecuteFlags {
                    skip_duplicates: request.skip_duplicates,
                    update_existing: request.update_existing,
                    deadline_ms: request.deadline_ms,
                },
            )
        })
        .await
    }

    /// 撤销已提交的导入
    #[instrument(skip(self))]
    pub async fn rollback_import(&self, import_id: &str) -> ApiResult<RollbackResponse> {
        let service = Arc::clone(&self.service);
        let import_id = import_id.to_string();
        let outcome = run_blocking(move || service.rollback_import(&import_id)).await?;
        Ok(RollbackResponse {
            import_id: outcome.import_id,
            table_name: outcome.table_name,
            deleted: outcome.deleted,
        })
    }

    /// 最近的导入历史
    pub async fn list_history(&self, limit: usize) -> ApiResult<Vec<ImportHistoryRecord>> {
        let service = Arc::clone(&self.service);
        run_blocking(move || service.list_history(limit)).await
    }
}

/// 在阻塞线程池中运行同步导入操作
async fn run_blocking<T, F>(task: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, crate::importer::ImportError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ApiError::InternalError(format!("blocking task failed: {}", e)))?
        .map_err(ApiError::from)
}
