// ==========================================
// 校车车队管理系统 - 导入领域实体
// ==========================================
// 职责: 暂存上传 / 工作表描述 / 列映射 / 问题 / 校验结果 / 导入结果 / 回滚信息
// 说明: 除 ImportHistoryRecord 外均为内存对象
// ==========================================

use crate::domain::types::{ErrorType, ImportType, JobState, MileageSection, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

// ==========================================
// Issue - 问题记录
// ==========================================
// row = 0 表示文件级/工作表级问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub row: usize,
    pub column: String,
    pub sheet: String,
    pub value: serde_json::Value,
    #[serde(rename = "error")]
    pub message: String,
    pub error_type: ErrorType,
    pub severity: Severity,
}

impl Issue {
    pub fn new(severity: Severity, error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            row: 0,
            column: String::new(),
            sheet: String::new(),
            value: serde_json::Value::Null,
            message: message.into(),
            error_type,
            severity,
        }
    }

    pub fn error(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, error_type, message)
    }

    pub fn warning(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, error_type, message)
    }

    pub fn info(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, error_type, message)
    }

    pub fn in_sheet(mut self, sheet: &str) -> Self {
        self.sheet = sheet.to_string();
        self
    }

    pub fn at_row(mut self, sheet: &str, row: usize) -> Self {
        self.sheet = sheet.to_string();
        self.row = row;
        self
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = column.to_string();
        self
    }

    pub fn with_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.value = value.into();
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

// ==========================================
// StagedUpload - 暂存上传
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedUpload {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub path: PathBuf,
    pub import_type: ImportType,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ==========================================
// SheetDescriptor - 工作表描述
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetDescriptor {
    pub name: String,
    /// 表头所在行号（1 基）；None 表示未检测到表头
    pub header_row: Option<usize>,
    pub headers: Vec<String>,
    pub row_count: usize,
    pub sample: Vec<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_month: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<MileageSection>,
}

// ==========================================
// Mapping - 列映射（原始表头 → 规范字段）
// ==========================================
// 目标为空字符串表示忽略该列
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mapping(BTreeMap<String, String>);

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn insert(&mut self, raw_header: impl Into<String>, field: impl Into<String>) {
        self.0.insert(raw_header.into(), field.into());
    }

    /// 有效映射项（跳过忽略列），按原始表头排序
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(k, v)| (k.as_str(), v.trim()))
            .filter(|(_, v)| !v.is_empty())
    }

    /// 规范字段 → 原始表头
    pub fn raw_header_for(&self, field: &str) -> Option<&str> {
        self.entries()
            .find(|(_, target)| *target == field)
            .map(|(raw, _)| raw)
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }
}

impl From<BTreeMap<String, String>> for Mapping {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

// ==========================================
// FieldValue - 规范字段的类型化取值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 用作重复键比较的字符串形式
    pub fn key_string(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::Integer(v) => Some(v.to_string()),
            FieldValue::Text(s) if s.is_empty() => None,
            FieldValue::Text(s) => Some(s.clone()),
        }
    }
}

// ==========================================
// CanonicalRecord - 规范化后的行记录
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub sheet: String,
    pub row_number: usize,
    pub values: BTreeMap<String, FieldValue>,
    /// 取自已映射列或由管道派生的字段；未列出的字段只在 INSERT 时使用默认值
    pub mapped: BTreeSet<String>,
}

impl CanonicalRecord {
    pub fn get(&self, field: &str) -> &FieldValue {
        self.values.get(field).unwrap_or(&FieldValue::Null)
    }

    pub fn is_mapped(&self, field: &str) -> bool {
        self.mapped.contains(field)
    }
}

// ==========================================
// ValidationResult - 校验结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewRow {
    pub sheet: String,
    pub row: usize,
    pub values: BTreeMap<String, FieldValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub total_records: usize,
    pub valid_records: usize,
    pub invalid_records: usize,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    pub preview: Vec<PreviewRow>,
}

// ==========================================
// RollbackInfo - 回滚信息
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackInfo {
    /// 等于 import_id
    pub transaction_id: String,
    pub table_name: String,
    pub record_ids: Vec<i64>,
    pub can_rollback: bool,
    pub rollback_until: DateTime<Utc>,
}

// ==========================================
// ImportResult - 执行结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub import_id: String,
    pub import_type: ImportType,
    pub file_name: String,
    pub file_size: u64,

    // ===== 计数 =====
    /// 表头以下的全部数据行（含空行）
    pub total: usize,
    /// 非空数据行
    pub processed: usize,
    /// 在事务内成功写入的行
    pub successful: usize,
    /// 已提交的行（回滚时为 0）
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub empty_rows: usize,
    pub warning_count: usize,

    // ===== 问题 =====
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    pub details: Vec<Issue>,
    pub summary: String,

    // ===== 时间 =====
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,

    pub sheets: Vec<String>,
    pub rollback_info: Option<RollbackInfo>,
    pub state: JobState,
}

impl ImportResult {
    pub fn committed(&self) -> bool {
        self.state == JobState::Committed
    }
}

// ==========================================
// ImportHistoryRecord - 导入历史（持久化）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportHistoryRecord {
    pub import_id: String,
    pub import_type: ImportType,
    pub file_name: String,
    pub file_size: u64,
    pub total_rows: usize,
    pub successful_rows: usize,
    pub failed_rows: usize,
    pub skipped_rows: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub summary: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub table_name: String,
    pub record_ids: Vec<i64>,
    pub can_rollback: bool,
    pub rollback_until: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl ImportHistoryRecord {
    pub fn from_result(result: &ImportResult, table_name: &str) -> Self {
        let (record_ids, can_rollback, rollback_until) = match &result.rollback_info {
            Some(info) => (
                info.record_ids.clone(),
                info.can_rollback,
                Some(info.rollback_until),
            ),
            None => (Vec::new(), false, None),
        };

        Self {
            import_id: result.import_id.clone(),
            import_type: result.import_type,
            file_name: result.file_name.clone(),
            file_size: result.file_size,
            total_rows: result.total,
            successful_rows: result.imported,
            failed_rows: result.failed,
            skipped_rows: result.skipped,
            error_count: result.errors.len(),
            warning_count: result.warning_count,
            summary: result.summary.clone(),
            start_time: result.start_time,
            end_time: result.end_time,
            table_name: table_name.to_string(),
            record_ids,
            can_rollback,
            rollback_until,
            rolled_back_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_serialization_uses_error_key() {
        let issue = Issue::error(ErrorType::Validation, "ending_mileage must be >= beginning")
            .at_row("January 2024", 4)
            .with_column("ending_mileage")
            .with_value("100");

        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["error"], "ending_mileage must be >= beginning");
        assert_eq!(json["error_type"], "VALIDATION");
        assert_eq!(json["severity"], "error");
        assert_eq!(json["row"], 4);
        assert_eq!(json["value"], "100");
    }

    #[test]
    fn test_mapping_skips_ignored_columns() {
        let mapping = Mapping::from_pairs([("ID", "vehicle_id"), ("Notes", ""), ("Total", "total_miles")]);
        let entries: Vec<_> = mapping.entries().collect();
        assert_eq!(entries, vec![("ID", "vehicle_id"), ("Total", "total_miles")]);
        assert_eq!(mapping.raw_header_for("total_miles"), Some("Total"));
        assert_eq!(mapping.raw_header_for("make"), None);
    }

    #[test]
    fn test_mapping_deserializes_from_object() {
        let mapping: Mapping = serde_json::from_str(r#"{"Bus #":"vehicle_id","Odometer":""}"#).unwrap();
        assert_eq!(mapping.entries().count(), 1);
    }

    #[test]
    fn test_field_value_key_string() {
        assert_eq!(FieldValue::Text("S001".into()).key_string(), Some("S001".to_string()));
        assert_eq!(FieldValue::Text(String::new()).key_string(), None);
        assert_eq!(FieldValue::Integer(2024).key_string(), Some("2024".to_string()));
        assert_eq!(FieldValue::Null.key_string(), None);
    }
}
