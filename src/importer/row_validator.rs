// ==========================================
// 校车车队管理系统 - 行级校验与规范化
// ==========================================
// 职责:
//   1. 按映射取出原始单元格 → 逐字段规则求值（字段内短路）
//   2. 规则通过后做类型转换（整数 / 日期 / 时间 / 布尔 / 电话 / 年级 / 状态）
//   3. 填充派生字段（报表月份/年份、车辆分区、车辆类型）
//   4. 跨字段检查（里程: ending ≥ beginning，total 缺省推导）
// 说明: 校验阶段与执行阶段共用，保证两次判定一致
// ==========================================

use crate::domain::{CanonicalRecord, ErrorType, FieldValue, ImportType, Issue, MileageSection, Severity};
use crate::importer::data_cleaner::{
    clean_text, normalize_grade, normalize_phone, parse_boolean, parse_date, parse_integer,
    parse_time,
};
use crate::importer::file_parser::SheetRow;
use crate::importer::registry::{FieldKind, FieldSpec, ImportTypeSpec};
use crate::importer::rules::{apply_rules, RuleContext};
use crate::importer::sheet_sections::SheetPeriod;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// 一个分段内所有行共享的上下文
#[derive(Debug, Clone, Copy)]
pub struct SegmentContext<'a> {
    pub sheet: &'a str,
    pub section: Option<MileageSection>,
    pub period: Option<&'a SheetPeriod>,
    /// 规范字段 → 列下标
    pub columns: &'a HashMap<String, usize>,
}

/// 单行校验结果
#[derive(Debug, Clone)]
pub struct RowOutcome {
    pub record: CanonicalRecord,
    pub issues: Vec<Issue>,
}

impl RowOutcome {
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.is_error())
    }
}

// ==========================================
// RowValidator
// ==========================================
#[derive(Debug, Clone, Copy)]
pub struct RowValidator {
    spec: &'static ImportTypeSpec,
    ctx: RuleContext,
}

impl RowValidator {
    pub fn new(spec: &'static ImportTypeSpec, ctx: RuleContext) -> Self {
        Self { spec, ctx }
    }

    pub fn spec(&self) -> &'static ImportTypeSpec {
        self.spec
    }

    /// 校验并规范化一行
    pub fn validate_row(&self, seg: &SegmentContext<'_>, row: &SheetRow) -> RowOutcome {
        let mut values = BTreeMap::new();
        let mut mapped = BTreeSet::new();
        let mut issues = Vec::new();

        for field in self.spec.fields.iter().filter(|f| !f.derived) {
            let raw = seg
                .columns
                .get(field.name)
                .map(|idx| row.cell(*idx))
                .unwrap_or("");

            let value = match apply_rules(field.rules, raw, field.name, &self.ctx) {
                Some(violation) => {
                    issues.push(
                        Issue::new(field.on_fail, violation.error_type, violation.message)
                            .at_row(seg.sheet, row.row_number)
                            .with_column(field.name)
                            .with_value(raw),
                    );
                    match field.on_fail {
                        Severity::Error => FieldValue::Null,
                        _ => fallback(field),
                    }
                }
                None if raw.trim().is_empty() => fallback(field),
                None => convert(field.kind, raw),
            };
            if seg.columns.contains_key(field.name) {
                mapped.insert(field.name.to_string());
            }
            values.insert(field.name.to_string(), value);
        }

        self.fill_derived(seg, &mut values, &mut mapped);

        let mut record = CanonicalRecord {
            sheet: seg.sheet.to_string(),
            row_number: row.row_number,
            values,
            mapped,
        };

        if self.spec.import_type == ImportType::Mileage {
            check_mileage(&mut record, &mut issues);
        }

        RowOutcome { record, issues }
    }

    fn fill_derived(
        &self,
        seg: &SegmentContext<'_>,
        values: &mut BTreeMap<String, FieldValue>,
        mapped: &mut BTreeSet<String>,
    ) {
        for field in self.spec.fields.iter().filter(|f| f.derived) {
            let value = match field.name {
                "report_month" => seg
                    .period
                    .map(|p| FieldValue::Text(p.month.clone()))
                    .unwrap_or(FieldValue::Null),
                "report_year" => seg
                    .period
                    .map(|p| FieldValue::Integer(i64::from(p.year)))
                    .unwrap_or(FieldValue::Null),
                "vehicle_category" => seg
                    .section
                    .map(|s| FieldValue::Text(s.as_str().to_string()))
                    .unwrap_or(FieldValue::Null),
                "vehicle_type" => {
                    let is_bus = values
                        .get("vehicle_id")
                        .and_then(|v| v.as_text())
                        .map(|id| id.to_lowercase().contains("bus"))
                        .unwrap_or(false);
                    FieldValue::Text(if is_bus { "bus" } else { "company" }.to_string())
                }
                _ => FieldValue::Null,
            };
            if !value.is_null() {
                mapped.insert(field.name.to_string());
            }
            values.insert(field.name.to_string(), value);
        }
    }
}

/// 空值 / Warning 级失败时的替代值
fn fallback(field: &FieldSpec) -> FieldValue {
    field
        .default_value
        .map(|d| convert(field.kind, d))
        .unwrap_or(FieldValue::Null)
}

/// 规则通过后的类型转换
pub fn convert(kind: FieldKind, raw: &str) -> FieldValue {
    let cleaned = clean_text(raw);
    if cleaned.is_empty() {
        return FieldValue::Null;
    }
    match kind {
        FieldKind::Text => FieldValue::Text(cleaned),
        FieldKind::Integer => parse_integer(&cleaned)
            .map(FieldValue::Integer)
            .unwrap_or(FieldValue::Text(cleaned)),
        FieldKind::Date => parse_date(&cleaned)
            .map(|d| FieldValue::Text(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(FieldValue::Text(cleaned)),
        FieldKind::Time => parse_time(&cleaned)
            .map(|t| FieldValue::Text(t.format("%H:%M:%S").to_string()))
            .unwrap_or(FieldValue::Text(cleaned)),
        FieldKind::Boolean => parse_boolean(&cleaned)
            .map(FieldValue::Bool)
            .unwrap_or(FieldValue::Text(cleaned)),
        FieldKind::Phone => FieldValue::Text(normalize_phone(&cleaned)),
        FieldKind::Grade => FieldValue::Text(normalize_grade(&cleaned)),
        FieldKind::Status => FieldValue::Text(cleaned.to_lowercase()),
    }
}

/// 里程跨字段检查
fn check_mileage(record: &mut CanonicalRecord, issues: &mut Vec<Issue>) {
    let beginning = record.get("beginning_mileage").as_integer().filter(|v| *v >= 0);
    let ending = record.get("ending_mileage").as_integer().filter(|v| *v >= 0);

    if let (Some(beginning), Some(ending)) = (beginning, ending) {
        if ending < beginning {
            issues.push(
                Issue::error(
                    ErrorType::Validation,
                    "ending_mileage must be greater than or equal to beginning_mileage",
                )
                .at_row(&record.sheet, record.row_number)
                .with_column("ending_mileage")
                .with_value(ending),
            );
        } else if record.get("total_miles").is_null() {
            record.values.insert(
                "total_miles".to_string(),
                FieldValue::Integer(ending - beginning),
            );
            record.mapped.insert("total_miles".to_string());
        }
    }
}
