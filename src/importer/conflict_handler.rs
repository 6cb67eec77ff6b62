// ==========================================
// 校车车队管理系统 - 重复键检测
// ==========================================
// 职责:
//   - 同一文件内 upsert 键重复（WARNING DUPLICATE，列出更早的行）
//   - 与数据库已有记录的键碰撞（仅学生导入做预检）
// ==========================================

use crate::domain::{CanonicalRecord, ErrorType, Issue};
use std::collections::{HashMap, HashSet};

/// 同文件重复键跟踪器
#[derive(Debug)]
pub struct ConflictHandler {
    key_fields: &'static [&'static str],
    seen: HashMap<Vec<String>, Vec<(String, usize)>>,
}

impl ConflictHandler {
    pub fn new(key_fields: &'static [&'static str]) -> Self {
        Self {
            key_fields,
            seen: HashMap::new(),
        }
    }

    /// 记录的 upsert 键；任一分量为空时返回 None（不参与去重）
    pub fn key_of(&self, record: &CanonicalRecord) -> Option<Vec<String>> {
        self.key_fields
            .iter()
            .map(|field| record.get(field).key_string())
            .collect()
    }

    /// 登记一行，若键在更早的行出现过则返回 DUPLICATE 警告
    pub fn observe(&mut self, record: &CanonicalRecord) -> Option<Issue> {
        let key = self.key_of(record)?;
        let earlier = self.seen.entry(key.clone()).or_default();
        let issue = if earlier.is_empty() {
            None
        } else {
            let rows: Vec<String> = earlier
                .iter()
                .map(|(sheet, row)| {
                    if sheet == &record.sheet {
                        format!("row {}", row)
                    } else {
                        format!("'{}' row {}", sheet, row)
                    }
                })
                .collect();
            Some(
                Issue::warning(
                    ErrorType::Duplicate,
                    format!(
                        "Duplicate {} '{}' (also at {})",
                        self.key_fields.join("/"),
                        key.join("/"),
                        rows.join(", ")
                    ),
                )
                .at_row(&record.sheet, record.row_number)
                .with_column(self.key_fields[0])
                .with_value(key.join("/")),
            )
        };
        earlier.push((record.sheet.clone(), record.row_number));
        issue
    }
}

/// 与数据库已有键碰撞的记录数
pub fn count_existing(records: &[&CanonicalRecord], field: &str, existing: &HashSet<String>) -> usize {
    records
        .iter()
        .filter_map(|r| r.get(field).key_string())
        .filter(|k| existing.contains(k))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldValue;
    use std::collections::BTreeMap;

    fn record(sheet: &str, row: usize, pairs: &[(&str, FieldValue)]) -> CanonicalRecord {
        CanonicalRecord {
            sheet: sheet.to_string(),
            row_number: row,
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
            mapped: pairs.iter().map(|(k, _)| k.to_string()).collect(),
        }
    }

    #[test]
    fn test_detect_duplicates_none() {
        let mut handler = ConflictHandler::new(&["vehicle_id"]);
        assert!(handler
            .observe(&record("Fleet", 2, &[("vehicle_id", FieldValue::Text("BUS01".into()))]))
            .is_none());
        assert!(handler
            .observe(&record("Fleet", 3, &[("vehicle_id", FieldValue::Text("BUS02".into()))]))
            .is_none());
    }

    #[test]
    fn test_detect_duplicates_lists_earlier_rows() {
        let mut handler = ConflictHandler::new(&["vehicle_id"]);
        let r = |row| record("Fleet", row, &[("vehicle_id", FieldValue::Text("BUS01".into()))]);
        assert!(handler.observe(&r(2)).is_none());
        let second = handler.observe(&r(5)).unwrap();
        assert_eq!(second.error_type, ErrorType::Duplicate);
        assert_eq!(second.row, 5);
        assert!(second.message.contains("row 2"));

        let third = handler.observe(&r(9)).unwrap();
        assert!(third.message.contains("row 2, row 5"));
    }

    #[test]
    fn test_composite_key_across_sheets() {
        let mut handler = ConflictHandler::new(&["vehicle_id", "report_month", "report_year"]);
        let jan = |sheet, row| {
            record(
                sheet,
                row,
                &[
                    ("vehicle_id", FieldValue::Text("V01".into())),
                    ("report_month", FieldValue::Text("January".into())),
                    ("report_year", FieldValue::Integer(2024)),
                ],
            )
        };
        assert!(handler.observe(&jan("January 2024", 4)).is_none());
        let dup = handler.observe(&jan("Jan 24", 7)).unwrap();
        assert!(dup.message.contains("'January 2024' row 4"));
    }

    #[test]
    fn test_empty_key_component_is_ignored() {
        let mut handler = ConflictHandler::new(&["student_id"]);
        let r = |row| record("Roster", row, &[("student_id", FieldValue::Null)]);
        assert!(handler.observe(&r(2)).is_none());
        assert!(handler.observe(&r(3)).is_none());
    }

    #[test]
    fn test_count_existing() {
        let a = record("Roster", 2, &[("student_id", FieldValue::Text("S1".into()))]);
        let b = record("Roster", 3, &[("student_id", FieldValue::Text("S2".into()))]);
        let existing: HashSet<String> = ["S2".to_string()].into_iter().collect();
        assert_eq!(count_existing(&[&a, &b], "student_id", &existing), 1);
    }
}
