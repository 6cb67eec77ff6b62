// ==========================================
// 校车车队管理系统 - 导入校验（只读）
// ==========================================
// 流程:
//   1. 映射检查（INVALID_MAPPING / MISSING_COLUMN）
//   2. 逐行规则求值 + 跨字段检查
//   3. 同文件重复键（WARNING DUPLICATE）
//   4. 学生: 与数据库已有 student_id 碰撞（单条 WARNING，不阻断）
//   5. 预览: 前 N 条有效行
// ==========================================

use crate::domain::{
    CanonicalRecord, ErrorType, ImportType, Issue, Mapping, PreviewRow, Severity, ValidationResult,
};
use crate::importer::analyzer::WorkbookLayout;
use crate::importer::conflict_handler::{count_existing, ConflictHandler};
use crate::importer::error::ImportError;
use crate::importer::field_mapper::{check_mapping, column_index};
use crate::importer::row_validator::{RowOutcome, RowValidator, SegmentContext};
use crate::repository::ImportRepository;
use tracing::{debug, info, instrument};

/// 按工作表顺序、行顺序遍历所有非空数据行
///
/// 回调参数: (分段上下文, 行校验结果)
/// 回调返回 Err 时立即停止
pub fn walk_rows<F, E>(
    workbook: &WorkbookLayout,
    mapping: &Mapping,
    validator: &RowValidator,
    mut visit: F,
) -> Result<(), E>
where
    F: FnMut(&SegmentContext<'_>, RowOutcome) -> Result<(), E>,
{
    for layout in workbook.usable() {
        for segment in &layout.segments {
            let columns = column_index(mapping, &segment.headers);
            let seg = SegmentContext {
                sheet: &layout.name,
                section: segment.section,
                period: layout.period.as_ref(),
                columns: &columns,
            };
            for row in segment.data_rows() {
                visit(&seg, validator.validate_row(&seg, row))?;
            }
        }
    }
    Ok(())
}

// ==========================================
// Validator
// ==========================================
pub struct Validator {
    row_validator: RowValidator,
    preview_limit: usize,
}

impl Validator {
    pub fn new(row_validator: RowValidator, preview_limit: usize) -> Self {
        Self {
            row_validator,
            preview_limit,
        }
    }

    /// 校验整个工作簿
    #[instrument(skip_all, fields(import_type = %self.row_validator.spec().import_type))]
    pub fn validate(
        &self,
        workbook: &WorkbookLayout,
        mapping: &Mapping,
        repo: &dyn ImportRepository,
    ) -> Result<ValidationResult, ImportError> {
        let spec = self.row_validator.spec();
        let mut result = ValidationResult::default();

        // 工作表级问题
        for issue in &workbook.issues {
            push_issue(&mut result, issue.clone());
        }

        // 映射问题
        for issue in check_mapping(spec, mapping, &workbook.known_headers()) {
            push_issue(&mut result, issue);
        }

        let mut conflicts = ConflictHandler::new(spec.upsert_key);
        let mut valid_records: Vec<CanonicalRecord> = Vec::new();

        walk_rows(workbook, mapping, &self.row_validator, |_, outcome| {
            result.total_records += 1;
            let valid = outcome.is_valid();
            for issue in outcome.issues {
                push_issue(&mut result, issue);
            }
            if let Some(dup) = conflicts.observe(&outcome.record) {
                push_issue(&mut result, dup);
            }

            if valid {
                result.valid_records += 1;
                if result.preview.len() < self.preview_limit {
                    result.preview.push(PreviewRow {
                        sheet: outcome.record.sheet.clone(),
                        row: outcome.record.row_number,
                        values: outcome.record.values.clone(),
                    });
                }
                valid_records.push(outcome.record);
            } else {
                result.invalid_records += 1;
            }
            Ok::<(), ImportError>(())
        })?;

        if spec.import_type == ImportType::Student {
            self.check_existing_students(&valid_records, repo, &mut result)?;
        }

        info!(
            total = result.total_records,
            valid = result.valid_records,
            invalid = result.invalid_records,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "校验完成"
        );
        Ok(result)
    }

    /// 学生 student_id 与数据库已有记录碰撞
    fn check_existing_students(
        &self,
        records: &[CanonicalRecord],
        repo: &dyn ImportRepository,
        result: &mut ValidationResult,
    ) -> Result<(), ImportError> {
        let spec = self.row_validator.spec();
        let keys: Vec<String> = records
            .iter()
            .filter_map(|r| r.get("student_id").key_string())
            .collect();
        if keys.is_empty() {
            return Ok(());
        }

        let existing = repo.existing_keys(spec.table, "student_id", &keys)?;
        let refs: Vec<&CanonicalRecord> = records.iter().collect();
        let count = count_existing(&refs, "student_id", &existing);
        debug!(checked = keys.len(), existing = count, "已有学生检查");

        if count > 0 {
            result.warnings.push(
                Issue::warning(
                    ErrorType::Duplicate,
                    format!("{} students already exist in the database", count),
                )
                .with_column("student_id")
                .with_value(count),
            );
        }
        Ok(())
    }
}

fn push_issue(result: &mut ValidationResult, issue: Issue) {
    match issue.severity {
        Severity::Error => result.errors.push(issue),
        Severity::Warning | Severity::Info => result.warnings.push(issue),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::importer::file_parser::{RawSheet, SheetRow};
    use crate::importer::registry::spec_for;
    use crate::importer::rules::RuleContext;
    use crate::importer::sheet_sections::layout_sheet;
    use crate::repository::SqliteImportRepository;
    use chrono::NaiveDate;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 1).unwrap()
    }

    fn row(n: usize, cells: &[&str]) -> SheetRow {
        SheetRow::new(n, cells.iter().map(|s| s.to_string()).collect())
    }

    fn workbook(import_type: ImportType, sheet: RawSheet) -> WorkbookLayout {
        let layout = layout_sheet(&sheet, spec_for(import_type), today());
        WorkbookLayout {
            issues: layout.issues.clone(),
            sheets: vec![layout],
        }
    }

    fn repo() -> SqliteImportRepository {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO students (student_id, name, grade, address, phone, import_id, created_at, updated_at)
             VALUES ('S2', 'Bo Kim', 'K', '2 Oak Ave', '(503) 555-0101', 'seed', '2024-01-01', '2024-01-01')",
            [],
        )
        .unwrap();
        SqliteImportRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn validator(import_type: ImportType) -> Validator {
        Validator::new(
            RowValidator::new(spec_for(import_type), RuleContext { today: today() }),
            10,
        )
    }

    fn student_mapping() -> Mapping {
        Mapping::from_pairs([
            ("ID", "student_id"),
            ("Name", "name"),
            ("Grade", "grade"),
            ("Address", "address"),
            ("Phone", "phone"),
        ])
    }

    #[test]
    fn test_student_validation_reports_duplicates_and_existing() {
        let wb = workbook(
            ImportType::Student,
            RawSheet {
                name: "Roster".into(),
                rows: vec![
                    row(1, &["ID", "Name", "Grade", "Address", "Phone"]),
                    row(2, &["S1", "Ann Lee", "3", "1 Main St", "5035550100"]),
                    row(3, &["S2", "Bo Kim", "K", "2 Oak Ave", "5035550101"]),
                    row(4, &["S1", "Ann Lee", "3", "1 Main St", "5035550100"]),
                    row(5, &["S3", "Cy 3rd", "14", "", "123"]),
                ],
            },
        );

        let result = validator(ImportType::Student)
            .validate(&wb, &student_mapping(), &repo())
            .unwrap();

        assert_eq!(result.total_records, 4);
        assert_eq!(result.valid_records, 3);
        assert_eq!(result.invalid_records, 1);
        // name / grade / address / phone 各一条
        assert_eq!(result.errors.len(), 4);
        assert!(result.errors.iter().all(|e| e.row == 5));

        let dup = result
            .warnings
            .iter()
            .find(|w| w.error_type == ErrorType::Duplicate && w.row == 4)
            .unwrap();
        assert!(dup.message.contains("row 2"));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message == "1 students already exist in the database"));
        assert_eq!(result.preview.len(), 3);
        assert_eq!(result.preview[0].row, 2);
    }

    #[test]
    fn test_missing_required_mapping_is_warning_then_rows_fail() {
        let wb = workbook(
            ImportType::Student,
            RawSheet {
                name: "Roster".into(),
                rows: vec![
                    row(1, &["ID", "Name", "Grade", "Address", "Phone"]),
                    row(2, &["S1", "Ann Lee", "3", "1 Main St", "5035550100"]),
                ],
            },
        );
        let mapping = Mapping::from_pairs([
            ("Name", "name"),
            ("Grade", "grade"),
            ("Address", "address"),
        ]);

        let result = validator(ImportType::Student)
            .validate(&wb, &mapping, &repo())
            .unwrap();
        assert!(result
            .warnings
            .iter()
            .any(|w| w.error_type == ErrorType::MissingColumn && w.column == "phone"));
        assert_eq!(result.invalid_records, 1);
        assert_eq!(result.errors[0].error_type, ErrorType::RequiredField);
    }

    #[test]
    fn test_preview_limit() {
        let mut rows = vec![row(1, &["Vehicle ID", "Year", "Make", "Model"])];
        for i in 0..15 {
            let id = format!("V{:02}", i);
            rows.push(SheetRow::new(
                i + 2,
                vec![id, "2020".into(), "Ford".into(), "Transit".into()],
            ));
        }
        let wb = workbook(
            ImportType::Vehicle,
            RawSheet {
                name: "Fleet".into(),
                rows,
            },
        );
        let mapping = Mapping::from_pairs([
            ("Vehicle ID", "vehicle_id"),
            ("Year", "year"),
            ("Make", "make"),
            ("Model", "model"),
        ]);
        let result = validator(ImportType::Vehicle)
            .validate(&wb, &mapping, &repo())
            .unwrap();
        assert_eq!(result.valid_records, 15);
        assert_eq!(result.preview.len(), 10);
    }
}
