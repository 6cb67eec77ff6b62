// ==========================================
// 校车车队管理系统 - 导入服务（同步编排）
// ==========================================
// 职责: 串联 预检/分析 → 暂存 → 校验 → 执行 → 撤销
// 说明: 全部为同步方法，由 API 层放入 spawn_blocking
// ==========================================

use crate::clock::Clock;
use crate::config::ImportConfig;
use crate::domain::{
    ImportHistoryRecord, ImportResult, ImportType, JobState, Mapping, StagedUpload,
    ValidationResult,
};
use crate::importer::analyzer::{file_extension, load_workbook, Analysis, Analyzer, WorkbookLayout};
use crate::importer::error::ImportError;
use crate::importer::executor::{ExecuteJob, ExecuteOptions, Executor};
use crate::importer::file_parser::FileParser;
use crate::importer::registry::spec_for;
use crate::importer::row_validator::RowValidator;
use crate::importer::rules::RuleContext;
use crate::importer::session_store::SessionStore;
use crate::importer::validator::Validator;
use crate::repository::ImportRepository;
use chrono::Duration;
use std::fs;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// 分析结果 + 暂存会话
#[derive(Debug, Clone)]
pub struct AnalyzeOutcome {
    pub upload: StagedUpload,
    pub analysis: Analysis,
}

/// 执行请求参数
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteFlags {
    pub skip_duplicates: bool,
    pub update_existing: bool,
    /// 相对截止时间（毫秒）
    pub deadline_ms: Option<u64>,
}

/// 撤销结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoOutcome {
    pub import_id: String,
    pub table_name: String,
    pub deleted: usize,
}

// ==========================================
// ImportService
// ==========================================
pub struct ImportService {
    repo: Arc<dyn ImportRepository>,
    sessions: Arc<SessionStore>,
    analyzer: Analyzer,
    clock: Arc<dyn Clock>,
    config: ImportConfig,
}

impl ImportService {
    /// 创建导入服务
    ///
    /// # 参数
    /// - repo: 导入数据仓储
    /// - parser: 工作簿解析器
    /// - clock: 时钟（会话过期 / 回滚窗口 / 截止时间）
    /// - config: 导入配置
    pub fn new(
        repo: Arc<dyn ImportRepository>,
        parser: Box<dyn FileParser>,
        clock: Arc<dyn Clock>,
        config: ImportConfig,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(
            Arc::clone(&clock),
            config.staging_dir.clone(),
            config.session_ttl(),
        ));
        let analyzer = Analyzer::new(parser, config.max_file_size_bytes, config.preview_limit);
        Self {
            repo,
            sessions,
            analyzer,
            clock,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    // ==========================================
    // analyze
    // ==========================================

    /// 预检 + 分析；成功后暂存文件
    #[instrument(skip(self, bytes, content_type), fields(size = bytes.len()))]
    pub fn analyze(
        &self,
        import_type: ImportType,
        file_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<AnalyzeOutcome, ImportError> {
        let spec = spec_for(import_type);
        let mime_warnings = self
            .analyzer
            .check_upload(file_name, bytes.len() as u64, content_type)?;

        let mut analysis = self.analyzer.analyze(bytes, spec, self.clock.today())?;
        if !mime_warnings.is_empty() {
            let sheet_warnings = std::mem::take(&mut analysis.warnings);
            analysis.warnings = mime_warnings;
            analysis.warnings.extend(sheet_warnings);
        }

        let extension = file_extension(file_name)
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();
        let upload = self.sessions.stage(bytes, file_name, &extension, import_type)?;

        Ok(AnalyzeOutcome { upload, analysis })
    }

    // ==========================================
    // validate
    // ==========================================

    /// 只读校验（可重复、可并发）
    #[instrument(skip(self, mapping))]
    pub fn validate(
        &self,
        import_type: ImportType,
        file_id: &str,
        mapping: &Mapping,
        allow_partial: bool,
    ) -> Result<ValidationResult, ImportError> {
        let upload = self.sessions.lookup(file_id)?;
        check_type(&upload, import_type)?;

        let workbook = self.reload(&upload)?;
        let validator = Validator::new(self.row_validator(import_type), self.config.preview_limit);
        let result = validator.validate(&workbook, mapping, self.repo.as_ref())?;

        self.sessions.set_allow_partial(file_id, allow_partial)?;
        Ok(result)
    }

    // ==========================================
    // execute
    // ==========================================

    /// 执行导入；同一 file_id 同时只允许一个执行
    #[instrument(skip(self, mapping, flags))]
    pub fn execute(
        &self,
        import_type: ImportType,
        file_id: &str,
        mapping: &Mapping,
        flags: ExecuteFlags,
    ) -> Result<ImportResult, ImportError> {
        let (upload, allow_partial) = self.sessions.begin_execute(file_id)?;
        let deadline = flags.deadline_ms.and_then(|ms| {
            let ms = i64::try_from(ms).unwrap_or(i64::MAX);
            self.clock.now().checked_add_signed(Duration::milliseconds(ms))
        });

        let outcome = check_type(&upload, import_type)
            .and_then(|_| self.reload(&upload))
            .and_then(|workbook| {
                let executor = Executor::new(
                    self.row_validator(import_type),
                    Arc::clone(&self.clock),
                    self.config.rollback_window(),
                );
                let import_id = Uuid::new_v4().to_string();
                executor.execute(
                    self.repo.as_ref(),
                    ExecuteJob {
                        import_id: &import_id,
                        import_type,
                        file_name: &upload.file_name,
                        file_size: upload.file_size,
                        workbook: &workbook,
                        mapping,
                        options: ExecuteOptions {
                            skip_duplicates: flags.skip_duplicates,
                            update_existing: flags.update_existing,
                            allow_partial,
                            deadline,
                        },
                    },
                )
            });

        match outcome {
            Ok(result) => {
                self.sessions.finish_execute(file_id, result.state);
                Ok(result)
            }
            Err(e) => {
                warn!(file_id, error = %e, "执行前置检查失败，会话保持 STAGED");
                self.sessions.abandon_execute(file_id);
                Err(e)
            }
        }
    }

    // ==========================================
    // 撤销 / 历史
    // ==========================================

    /// 撤销一次已提交的导入（回滚窗口内）
    #[instrument(skip(self))]
    pub fn rollback_import(&self, import_id: &str) -> Result<UndoOutcome, ImportError> {
        let unavailable = |reason: &str| ImportError::RollbackUnavailable {
            import_id: import_id.to_string(),
            reason: reason.to_string(),
        };

        let history = self
            .repo
            .get_history(import_id)?
            .ok_or_else(|| unavailable("import not found"))?;
        if history.rolled_back_at.is_some() {
            return Err(unavailable("already rolled back"));
        }
        if !history.can_rollback {
            return Err(unavailable("import was not committed or has been superseded"));
        }
        let now = self.clock.now();
        match history.rollback_until {
            Some(until) if now < until => {}
            _ => return Err(unavailable("rollback window has closed")),
        }

        let deleted = self
            .repo
            .undo_import(&history.table_name, import_id, now)?;
        info!(import_id, table = %history.table_name, deleted, "导入已撤销");

        Ok(UndoOutcome {
            import_id: import_id.to_string(),
            table_name: history.table_name,
            deleted,
        })
    }

    pub fn list_history(&self, limit: usize) -> Result<Vec<ImportHistoryRecord>, ImportError> {
        Ok(self.repo.list_history(limit)?)
    }

    /// 会话状态（测试与运维查询）
    pub fn session_state(&self, file_id: &str) -> Option<JobState> {
        self.sessions.state(file_id)
    }

    fn row_validator(&self, import_type: ImportType) -> RowValidator {
        RowValidator::new(
            spec_for(import_type),
            RuleContext {
                today: self.clock.today(),
            },
        )
    }

    /// 重新读取暂存文件并识别结构
    fn reload(&self, upload: &StagedUpload) -> Result<WorkbookLayout, ImportError> {
        let bytes = fs::read(&upload.path)?;
        load_workbook(
            self.analyzer.parser(),
            &bytes,
            spec_for(upload.import_type),
            self.clock.today(),
        )
    }
}

fn check_type(upload: &StagedUpload, declared: ImportType) -> Result<(), ImportError> {
    if upload.import_type != declared {
        return Err(ImportError::TypeMismatch {
            expected: upload.import_type.to_string(),
            actual: declared.to_string(),
        });
    }
    Ok(())
}
