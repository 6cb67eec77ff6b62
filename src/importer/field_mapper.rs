// ==========================================
// 校车车队管理系统 - 列映射器
// ==========================================
// 职责:
//   - 表头标准化（小写 / TRIM / 空白折叠 / - . # 替换）
//   - 按同义词推荐 原始表头 → 规范字段
//   - 校验调用方提交的映射（未知字段 / 未知列 / 非双射 / 必填缺失）
// ==========================================

use crate::domain::{ErrorType, Issue, Mapping};
use crate::importer::registry::ImportTypeSpec;
use std::collections::{BTreeMap, HashMap, HashSet};

/// 表头标准化
///
/// 例: "Vehicle #" → "vehicle_number"，"Lic." → "lic"，"Drop-Off Time" → "drop_off_time"
pub fn normalize_header(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let mut out = String::with_capacity(lower.len());
    for c in lower.chars() {
        match c {
            '#' => {
                if !out.is_empty() && !out.ends_with('_') {
                    out.push('_');
                }
                out.push_str("number");
            }
            '.' => {}
            '-' | '_' => out.push('_'),
            c if c.is_whitespace() => out.push('_'),
            c => out.push(c),
        }
    }

    // 压缩连续下划线，去除首尾下划线
    let mut squeezed = String::with_capacity(out.len());
    for c in out.chars() {
        if c == '_' && squeezed.ends_with('_') {
            continue;
        }
        squeezed.push(c);
    }
    squeezed.trim_matches('_').to_string()
}

/// 标准化表头 → 规范字段（字段名本身或同义词）
pub fn resolve_field(spec: &ImportTypeSpec, raw: &str) -> Option<&'static str> {
    let normalized = normalize_header(raw);
    if normalized.is_empty() {
        return None;
    }
    if let Some(field) = spec.mappable_fields().find(|f| f.name == normalized) {
        return Some(field.name);
    }
    spec.resolve_alias(&normalized)
        .filter(|name| spec.field(name).map(|f| !f.derived).unwrap_or(false))
}

/// 推荐映射（保持双射：同一字段只取第一个命中的表头）
pub fn suggest_mappings(spec: &ImportTypeSpec, headers: &[String]) -> BTreeMap<String, String> {
    let mut used = HashSet::new();
    let mut suggestions = BTreeMap::new();
    for header in headers {
        if header.trim().is_empty() {
            continue;
        }
        if let Some(field) = resolve_field(spec, header) {
            if used.insert(field) {
                suggestions.insert(header.clone(), field.to_string());
            }
        }
    }
    suggestions
}

/// 校验映射
///
/// # 返回
/// - Vec<Issue>: ERROR(INVALID_MAPPING) 与 WARNING(MISSING_COLUMN)
pub fn check_mapping(
    spec: &ImportTypeSpec,
    mapping: &Mapping,
    known_headers: &HashSet<String>,
) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut targets: HashMap<&str, &str> = HashMap::new();

    for (raw, field) in mapping.entries() {
        if !known_headers.contains(raw) {
            issues.push(
                Issue::error(
                    ErrorType::InvalidMapping,
                    format!("Column '{}' does not exist in the uploaded file", raw),
                )
                .with_value(raw),
            );
        }

        match spec.field(field) {
            Some(f) if !f.derived => {}
            _ => {
                issues.push(
                    Issue::error(
                        ErrorType::InvalidMapping,
                        format!(
                            "'{}' is not a valid field for {} imports",
                            field, spec.import_type
                        ),
                    )
                    .with_column(field)
                    .with_value(raw),
                );
                continue;
            }
        }

        if let Some(previous) = targets.insert(field, raw) {
            issues.push(
                Issue::error(
                    ErrorType::InvalidMapping,
                    format!(
                        "Field '{}' is mapped from both '{}' and '{}'",
                        field, previous, raw
                    ),
                )
                .with_column(field)
                .with_value(raw),
            );
        }
    }

    for required in spec.required_fields() {
        if !targets.contains_key(required) {
            issues.push(
                Issue::warning(
                    ErrorType::MissingColumn,
                    format!("Required field '{}' is not mapped", required),
                )
                .with_column(required),
            );
        }
    }

    issues
}

/// 为某个分段的表头建立 规范字段 → 列下标
pub fn column_index(mapping: &Mapping, headers: &[String]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (raw, field) in mapping.entries() {
        if let Some(pos) = headers.iter().position(|h| h.trim() == raw.trim()) {
            index.entry(field.to_string()).or_insert(pos);
        }
    }
    index
}
