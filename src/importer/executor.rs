// ==========================================
// 校车车队管理系统 - 导入执行器
// ==========================================
// 事务协议:
//   1. BEGIN IMMEDIATE（失败 → TRANSACTION）
//   2. 逐行（工作表顺序 → 行顺序）:
//        截止时间检查 → 规则重算 → SAVEPOINT → 按 upsert 键 INSERT / UPDATE / SKIP
//        行级数据库错误 → ROLLBACK TO SAVEPOINT，事务保持打开
//   3. 全部成功 → COMMIT；部分失败且允许部分导入 → COMMIT；否则 ROLLBACK
//   4. 写入 import_history（失败只记日志）
// ==========================================

use crate::clock::Clock;
use crate::domain::{
    CanonicalRecord, ErrorType, FieldValue, ImportHistoryRecord, ImportResult, ImportType, Issue,
    JobState, Mapping, RollbackInfo, Severity,
};
use crate::importer::analyzer::WorkbookLayout;
use crate::importer::error::ImportError;
use crate::importer::field_mapper::check_mapping;
use crate::importer::row_validator::RowValidator;
use crate::importer::validator::walk_rows;
use crate::repository::{ImportRepository, ImportTransaction, RepositoryResult};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// 执行选项
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub skip_duplicates: bool,
    pub update_existing: bool,
    /// 校验时选择的部分导入模式
    pub allow_partial: bool,
    /// 绝对截止时间
    pub deadline: Option<DateTime<Utc>>,
}

/// 单次执行的输入
#[derive(Debug, Clone, Copy)]
pub struct ExecuteJob<'a> {
    pub import_id: &'a str,
    pub import_type: ImportType,
    pub file_name: &'a str,
    pub file_size: u64,
    pub workbook: &'a WorkbookLayout,
    pub mapping: &'a Mapping,
    pub options: ExecuteOptions,
}

/// 单行写入效果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowEffect {
    Inserted,
    Updated,
    Skipped,
    /// 键已存在且未允许跳过/更新
    Conflict,
}

/// 遍历中止原因
#[derive(Debug)]
enum Halt {
    Timeout,
}

// ==========================================
// Executor
// ==========================================
pub struct Executor {
    row_validator: RowValidator,
    clock: Arc<dyn Clock>,
    rollback_window: Duration,
}

impl Executor {
    pub fn new(row_validator: RowValidator, clock: Arc<dyn Clock>, rollback_window: Duration) -> Self {
        Self {
            row_validator,
            clock,
            rollback_window,
        }
    }

    /// 执行导入
    ///
    /// # 返回
    /// - Ok(ImportResult): 作业结束（COMMITTED 或 ABORTED）
    /// - Err(InvalidMapping): 映射不合法，未开启事务
    #[instrument(skip_all, fields(import_id = %job.import_id, import_type = %job.import_type))]
    pub fn execute(
        &self,
        repo: &dyn ImportRepository,
        job: ExecuteJob<'_>,
    ) -> Result<ImportResult, ImportError> {
        let spec = self.row_validator.spec();

        let mapping_issues = check_mapping(spec, job.mapping, &job.workbook.known_headers());
        let mapping_errors: Vec<Issue> = mapping_issues.iter().filter(|i| i.is_error()).cloned().collect();
        if !mapping_errors.is_empty() {
            return Err(ImportError::InvalidMapping(mapping_errors));
        }

        let start_time = self.clock.now();
        let total = job.workbook.total_rows();
        let data_rows = job.workbook.data_row_count();

        let mut result = ImportResult {
            import_id: job.import_id.to_string(),
            import_type: job.import_type,
            file_name: job.file_name.to_string(),
            file_size: job.file_size,
            total,
            processed: data_rows,
            successful: 0,
            imported: 0,
            skipped: 0,
            failed: 0,
            empty_rows: total.saturating_sub(data_rows),
            warning_count: 0,
            errors: Vec::new(),
            warnings: mapping_issues,
            details: Vec::new(),
            summary: String::new(),
            start_time,
            end_time: start_time,
            duration_ms: 0,
            sheets: job.workbook.usable().map(|s| s.name.clone()).collect(),
            rollback_info: None,
            state: JobState::Running,
        };

        // 读取失败的工作表在执行阶段是致命的
        let mut fatal: Vec<Issue> = job.workbook.read_failures().cloned().collect();

        info!(rows = data_rows, sheets = result.sheets.len(), "开始执行导入");

        let committed = match repo.begin() {
            Ok(mut tx) => {
                let record_ids = match self.apply_rows(tx.as_mut(), &job, &mut result) {
                    Ok(ids) => ids,
                    Err(Halt::Timeout) => {
                        warn!("执行超过截止时间，回滚");
                        fatal.push(Issue::error(
                            ErrorType::Timeout,
                            "Import exceeded its deadline and was rolled back",
                        ));
                        Vec::new()
                    }
                };
                self.finish_transaction(tx, &job, &fatal, record_ids, &mut result)
            }
            Err(e) => {
                error!(error = %e, "开启事务失败");
                fatal.push(Issue::error(
                    ErrorType::Transaction,
                    format!("Failed to begin transaction: {}", e),
                ));
                false
            }
        };

        // 未到达的行计为失败
        let reached = result.successful + result.skipped + result.failed;
        result.failed += data_rows.saturating_sub(reached);

        result.errors.extend(fatal);
        result.imported = if committed { result.successful } else { 0 };
        result.state = if committed {
            JobState::Committed
        } else {
            JobState::Aborted
        };
        result.summary = summarize(&result);
        result.warning_count = result.warnings.len();
        result.end_time = self.clock.now();
        result.duration_ms = (result.end_time - result.start_time).num_milliseconds();

        if let Err(e) = repo.save_history(&ImportHistoryRecord::from_result(&result, spec.table)) {
            warn!(error = %e, "写入导入历史失败");
        }

        info!(
            state = %result.state,
            successful = result.successful,
            imported = result.imported,
            skipped = result.skipped,
            failed = result.failed,
            duration_ms = result.duration_ms,
            "导入执行结束"
        );
        Ok(result)
    }

    /// 逐行写入；返回受影响主键
    fn apply_rows(
        &self,
        tx: &mut dyn ImportTransaction,
        job: &ExecuteJob<'_>,
        result: &mut ImportResult,
    ) -> Result<Vec<i64>, Halt> {
        let mut record_ids: Vec<i64> = Vec::new();
        let mut seq = 0usize;

        walk_rows(job.workbook, job.mapping, &self.row_validator, |_, outcome| {
            if let Some(deadline) = job.options.deadline {
                if self.clock.now() > deadline {
                    return Err(Halt::Timeout);
                }
            }

            let valid = outcome.is_valid();
            for issue in outcome.issues {
                match issue.severity {
                    Severity::Error => result.errors.push(issue),
                    Severity::Warning => result.warnings.push(issue),
                    Severity::Info => result.details.push(issue),
                }
            }
            if !valid {
                result.failed += 1;
                return Ok(());
            }

            let record = outcome.record;
            seq += 1;
            let savepoint = format!("row_{}", seq);

            let applied = match tx.savepoint(&savepoint) {
                Ok(()) => self.apply_record(tx, &record, job, &mut record_ids),
                Err(e) => Err(e),
            };

            match applied {
                Ok(effect) => {
                    if let Err(e) = tx.release_savepoint(&savepoint) {
                        self.row_database_error(tx, &savepoint, &record, &e.to_string(), result);
                        return Ok(());
                    }
                    match effect {
                        RowEffect::Inserted | RowEffect::Updated => result.successful += 1,
                        RowEffect::Skipped => {
                            result.skipped += 1;
                            result.details.push(
                                Issue::info(
                                    ErrorType::Duplicate,
                                    "Record already exists; skipped",
                                )
                                .at_row(&record.sheet, record.row_number)
                                .with_column(self.row_validator.spec().upsert_key[0])
                                .with_value(key_value(&record, self.row_validator.spec().upsert_key)),
                            );
                        }
                        RowEffect::Conflict => {
                            result.failed += 1;
                            result.errors.push(
                                Issue::error(
                                    ErrorType::Duplicate,
                                    "Record already exists (enable skip duplicates or update existing)",
                                )
                                .at_row(&record.sheet, record.row_number)
                                .with_column(self.row_validator.spec().upsert_key[0])
                                .with_value(key_value(&record, self.row_validator.spec().upsert_key)),
                            );
                        }
                    }
                }
                Err(e) => {
                    self.row_database_error(tx, &savepoint, &record, &e.to_string(), result);
                }
            }
            Ok(())
        })?;

        Ok(record_ids)
    }

    /// 按 upsert 键写入一行
    fn apply_record(
        &self,
        tx: &mut dyn ImportTransaction,
        record: &CanonicalRecord,
        job: &ExecuteJob<'_>,
        record_ids: &mut Vec<i64>,
    ) -> RepositoryResult<RowEffect> {
        let spec = self.row_validator.spec();
        let now = self.clock.now();

        let key: Vec<(&str, &FieldValue)> = spec
            .upsert_key
            .iter()
            .map(|field| (*field, record.get(field)))
            .collect();
        let existing = if key.iter().any(|(_, v)| v.key_string().is_none()) {
            None
        } else {
            tx.find_existing(spec.table, &key)?
        };

        match existing {
            None => {
                let values: Vec<(&str, &FieldValue)> = record
                    .values
                    .iter()
                    .map(|(k, v)| (k.as_str(), v))
                    .collect();
                let id = tx.insert_record(spec.table, &values, job.import_id, now)?;
                record_ids.push(id);
                Ok(RowEffect::Inserted)
            }
            Some(existing) if job.options.update_existing => {
                // 只覆盖本次映射到的字段，其余列保持原值
                let mutable: Vec<(&str, &FieldValue)> = record
                    .values
                    .iter()
                    .filter(|(k, _)| !spec.is_key_field(k) && record.is_mapped(k))
                    .map(|(k, v)| (k.as_str(), v))
                    .collect();
                tx.update_record(spec.table, existing.id, &mutable, job.import_id, now)?;

                if let Some(previous) = existing.import_id.as_deref() {
                    if previous != job.import_id {
                        debug!(previous, record_id = existing.id, "覆盖其他导入写入的行");
                        tx.clear_rollback(previous)?;
                    }
                }
                if !record_ids.contains(&existing.id) {
                    record_ids.push(existing.id);
                }
                Ok(RowEffect::Updated)
            }
            Some(_) if job.options.skip_duplicates => Ok(RowEffect::Skipped),
            Some(_) => Ok(RowEffect::Conflict),
        }
    }

    fn row_database_error(
        &self,
        tx: &mut dyn ImportTransaction,
        savepoint: &str,
        record: &CanonicalRecord,
        message: &str,
        result: &mut ImportResult,
    ) {
        warn!(sheet = %record.sheet, row = record.row_number, error = %message, "行写入失败");
        if let Err(e) = tx.rollback_to_savepoint(savepoint) {
            error!(error = %e, "回滚保存点失败");
        }
        result.failed += 1;
        result.errors.push(
            Issue::error(ErrorType::Database, format!("Database error: {}", message))
                .at_row(&record.sheet, record.row_number),
        );
    }

    /// 提交或回滚；返回是否已提交
    fn finish_transaction(
        &self,
        tx: Box<dyn ImportTransaction + '_>,
        job: &ExecuteJob<'_>,
        fatal: &[Issue],
        record_ids: Vec<i64>,
        result: &mut ImportResult,
    ) -> bool {
        let clean = result.failed == 0 && fatal.is_empty();
        let partial = fatal.is_empty()
            && result.failed > 0
            && job.options.allow_partial
            && !job.options.update_existing
            && result.successful > 0;

        if !(clean || partial) {
            if let Err(e) = tx.rollback() {
                error!(error = %e, "回滚事务失败");
            }
            debug!(failed = result.failed, "事务已回滚");
            return false;
        }

        match tx.commit() {
            Ok(()) => {
                result.rollback_info = Some(RollbackInfo {
                    transaction_id: job.import_id.to_string(),
                    table_name: self.row_validator.spec().table.to_string(),
                    record_ids,
                    can_rollback: true,
                    rollback_until: self.clock.now() + self.rollback_window,
                });
                true
            }
            Err(e) => {
                error!(error = %e, "提交事务失败");
                result.errors.push(Issue::error(
                    ErrorType::TransactionCommit,
                    format!("Failed to commit transaction: {}", e),
                ));
                false
            }
        }
    }
}

fn key_value(record: &CanonicalRecord, key: &[&str]) -> String {
    key.iter()
        .filter_map(|k| record.get(k).key_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// 结果摘要
pub fn summarize(result: &ImportResult) -> String {
    if result.state == JobState::Committed {
        if result.failed == 0 {
            format!(
                "Import completed successfully. {} records imported.",
                result.imported
            )
        } else {
            format!(
                "Import partially completed. {} succeeded, {} failed.",
                result.successful, result.failed
            )
        }
    } else {
        "Import failed. No records were imported.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::init_schema;
    use crate::importer::file_parser::{RawSheet, SheetRow};
    use crate::importer::registry::spec_for;
    use crate::importer::rules::RuleContext;
    use crate::importer::sheet_sections::layout_sheet;
    use crate::repository::SqliteImportRepository;
    use chrono::TimeZone;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap(),
        ))
    }

    fn repo() -> SqliteImportRepository {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        SqliteImportRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn row(n: usize, cells: &[&str]) -> SheetRow {
        SheetRow::new(n, cells.iter().map(|s| s.to_string()).collect())
    }

    fn vehicle_workbook(rows: Vec<SheetRow>) -> WorkbookLayout {
        let mut all = vec![row(1, &["Vehicle ID", "Year", "Make", "Model"])];
        all.extend(rows);
        let sheet = RawSheet {
            name: "Fleet".into(),
            rows: all,
        };
        let layout = layout_sheet(
            &sheet,
            spec_for(ImportType::Vehicle),
            chrono::NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
        );
        WorkbookLayout {
            issues: layout.issues.clone(),
            sheets: vec![layout],
        }
    }

    fn mapping() -> Mapping {
        Mapping::from_pairs([
            ("Vehicle ID", "vehicle_id"),
            ("Year", "year"),
            ("Make", "make"),
            ("Model", "model"),
        ])
    }

    fn executor(clock: Arc<ManualClock>) -> Executor {
        let today = clock.today();
        Executor::new(
            RowValidator::new(spec_for(ImportType::Vehicle), RuleContext { today }),
            clock,
            Duration::hours(24),
        )
    }

    fn job<'a>(
        import_id: &'a str,
        workbook: &'a WorkbookLayout,
        mapping: &'a Mapping,
        options: ExecuteOptions,
    ) -> ExecuteJob<'a> {
        ExecuteJob {
            import_id,
            import_type: ImportType::Vehicle,
            file_name: "fleet.xlsx",
            file_size: 1024,
            workbook,
            mapping,
            options,
        }
    }

    #[test]
    fn test_all_valid_rows_commit() {
        let clock = clock();
        let repo = repo();
        let wb = vehicle_workbook(vec![
            row(2, &["BUS01", "2018", "Blue Bird", "Vision"]),
            row(3, &["", "", "", ""]),
            row(4, &["VAN02", "2021", "Ford", "Transit"]),
        ]);
        let m = mapping();

        let result = executor(clock.clone())
            .execute(&repo, job("imp-a", &wb, &m, ExecuteOptions::default()))
            .unwrap();

        assert_eq!(result.state, JobState::Committed);
        assert_eq!(result.total, 3);
        assert_eq!(result.empty_rows, 1);
        assert_eq!(result.successful, 2);
        assert_eq!(result.imported, 2);
        assert_eq!(result.summary, "Import completed successfully. 2 records imported.");
        let info = result.rollback_info.unwrap();
        assert_eq!(info.record_ids.len(), 2);
        assert_eq!(info.rollback_until, clock.now() + Duration::hours(24));
        assert_eq!(repo.count_by_import("vehicles", "imp-a").unwrap(), 2);

        let history = repo.get_history("imp-a").unwrap().unwrap();
        assert!(history.can_rollback);
        assert_eq!(history.successful_rows, 2);
    }

    #[test]
    fn test_one_invalid_row_rolls_back_everything() {
        let repo = repo();
        let wb = vehicle_workbook(vec![
            row(2, &["BUS01", "2018", "Blue Bird", "Vision"]),
            row(3, &["BUS02", "1800", "Blue Bird", "Vision"]),
        ]);
        let m = mapping();

        let result = executor(clock())
            .execute(&repo, job("imp-b", &wb, &m, ExecuteOptions::default()))
            .unwrap();

        assert_eq!(result.state, JobState::Aborted);
        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.imported, 0);
        assert!(result.rollback_info.is_none());
        assert_eq!(result.summary, "Import failed. No records were imported.");
        assert_eq!(repo.count_by_import("vehicles", "imp-b").unwrap(), 0);
        assert!(!repo.get_history("imp-b").unwrap().unwrap().can_rollback);
    }

    #[test]
    fn test_partial_mode_commits_successful_rows() {
        let repo = repo();
        let wb = vehicle_workbook(vec![
            row(2, &["BUS01", "2018", "Blue Bird", "Vision"]),
            row(3, &["BUS02", "1800", "Blue Bird", "Vision"]),
        ]);
        let m = mapping();
        let options = ExecuteOptions {
            allow_partial: true,
            ..Default::default()
        };

        let result = executor(clock())
            .execute(&repo, job("imp-c", &wb, &m, options))
            .unwrap();
        assert_eq!(result.state, JobState::Committed);
        assert_eq!(result.imported, 1);
        assert_eq!(result.summary, "Import partially completed. 1 succeeded, 1 failed.");
        assert_eq!(repo.count_by_import("vehicles", "imp-c").unwrap(), 1);
    }

    #[test]
    fn test_in_file_duplicates_first_write_wins_when_skipping() {
        let repo = repo();
        let wb = vehicle_workbook(vec![
            row(2, &["BUS01", "2018", "Blue Bird", "Vision"]),
            row(3, &["BUS01", "2019", "Thomas", "C2"]),
        ]);
        let m = mapping();
        let options = ExecuteOptions {
            skip_duplicates: true,
            ..Default::default()
        };

        let result = executor(clock())
            .execute(&repo, job("imp-d", &wb, &m, options))
            .unwrap();
        assert_eq!(result.successful, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.details.len(), 1);
        assert_eq!(result.details[0].row, 3);
    }

    #[test]
    fn test_in_file_duplicates_last_write_wins_when_updating() {
        let repo = repo();
        let wb = vehicle_workbook(vec![
            row(2, &["BUS01", "2018", "Blue Bird", "Vision"]),
            row(3, &["BUS01", "2019", "Thomas", "C2"]),
        ]);
        let m = mapping();
        let options = ExecuteOptions {
            update_existing: true,
            ..Default::default()
        };

        let result = executor(clock())
            .execute(&repo, job("imp-e", &wb, &m, options))
            .unwrap();
        assert_eq!(result.successful, 2);
        let info = result.rollback_info.unwrap();
        assert_eq!(info.record_ids.len(), 1);
    }

    #[test]
    fn test_update_leaves_unmapped_columns_untouched() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO vehicles (vehicle_id, year, make, model, vin, status, import_id, created_at, updated_at)
             VALUES ('BUS01', 2015, 'Blue Bird', 'Vision', '1HGCM82633A004352', 'retired', 'seed',
                     '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let repo = SqliteImportRepository::from_connection(conn.clone());

        let wb = vehicle_workbook(vec![row(2, &["BUS01", "2019", "Thomas", "C2"])]);
        let m = mapping();
        let options = ExecuteOptions {
            update_existing: true,
            ..Default::default()
        };
        let result = executor(clock())
            .execute(&repo, job("imp-u", &wb, &m, options))
            .unwrap();
        assert_eq!(result.state, JobState::Committed);
        assert_eq!(result.imported, 1);

        let (year, model, vin, status, vehicle_type): (i64, String, Option<String>, String, Option<String>) = conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT year, model, vin, status, vehicle_type FROM vehicles WHERE vehicle_id = 'BUS01'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap();
        assert_eq!(year, 2019);
        assert_eq!(model, "C2");
        assert_eq!(vin.as_deref(), Some("1HGCM82633A004352"));
        assert_eq!(status, "retired");
        assert_eq!(vehicle_type.as_deref(), Some("bus"));
    }

    #[test]
    fn test_insert_applies_defaults_for_unmapped_fields() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let repo = SqliteImportRepository::from_connection(conn.clone());

        let wb = vehicle_workbook(vec![row(2, &["VAN07", "2020", "Ford", "Transit"])]);
        let m = mapping();
        executor(clock())
            .execute(&repo, job("imp-v", &wb, &m, ExecuteOptions::default()))
            .unwrap();

        let (vin, status): (Option<String>, String) = conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT vin, status FROM vehicles WHERE vehicle_id = 'VAN07'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(vin, None);
        assert_eq!(status, "active");
    }

    #[test]
    fn test_duplicate_without_flags_fails_row() {
        let repo = repo();
        let wb = vehicle_workbook(vec![
            row(2, &["BUS01", "2018", "Blue Bird", "Vision"]),
            row(3, &["BUS01", "2019", "Thomas", "C2"]),
        ]);
        let m = mapping();
        let result = executor(clock())
            .execute(&repo, job("imp-f", &wb, &m, ExecuteOptions::default()))
            .unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(result.state, JobState::Aborted);
        assert!(result
            .errors
            .iter()
            .any(|e| e.error_type == ErrorType::Duplicate && e.row == 3));
    }

    #[test]
    fn test_deadline_in_past_times_out() {
        let clock = clock();
        let repo = repo();
        let wb = vehicle_workbook(vec![row(2, &["BUS01", "2018", "Blue Bird", "Vision"])]);
        let m = mapping();
        let options = ExecuteOptions {
            deadline: Some(clock.now() - Duration::seconds(1)),
            ..Default::default()
        };

        let result = executor(clock)
            .execute(&repo, job("imp-g", &wb, &m, options))
            .unwrap();
        assert_eq!(result.state, JobState::Aborted);
        assert!(result.errors.iter().any(|e| e.error_type == ErrorType::Timeout));
        assert_eq!(result.failed, 1);
        assert_eq!(repo.count_by_import("vehicles", "imp-g").unwrap(), 0);
    }

    #[test]
    fn test_invalid_mapping_is_rejected_before_transaction() {
        let repo = repo();
        let wb = vehicle_workbook(vec![row(2, &["BUS01", "2018", "Blue Bird", "Vision"])]);
        let m = Mapping::from_pairs([("Vehicle ID", "vehicle_id"), ("Year", "colour")]);
        let err = executor(clock())
            .execute(&repo, job("imp-h", &wb, &m, ExecuteOptions::default()))
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidMapping(_)));
        assert!(repo.get_history("imp-h").unwrap().is_none());
    }
}
