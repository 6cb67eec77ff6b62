// ==========================================
// 校车车队管理系统 - 工作簿解析器
// ==========================================
// 阶段 0: 文件读取与解析
// 支持: Excel (.xlsx / .xls)，格式由 calamine 自动识别
// 输出: 每个工作表的全部行（单元格已渲染为字符串）
// ==========================================

use crate::domain::{ErrorType, Issue};
use crate::importer::error::ImportError;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::Datelike;
use std::io::Cursor;
use tracing::{debug, warn};

// ==========================================
// 解析结果
// ==========================================

/// 工作表中的一行
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    /// 工作表内 1 基行号
    pub row_number: usize,
    pub cells: Vec<String>,
}

impl SheetRow {
    pub fn new(row_number: usize, cells: Vec<String>) -> Self {
        Self { row_number, cells }
    }

    /// 所有单元格 TRIM 后为空
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.trim().is_empty())
    }

    pub fn cell(&self, idx: usize) -> &str {
        self.cells.get(idx).map(|c| c.trim()).unwrap_or("")
    }

    /// 第一个非空单元格
    pub fn first_non_blank(&self) -> Option<&str> {
        self.cells.iter().map(|c| c.trim()).find(|c| !c.is_empty())
    }
}

/// 单个工作表
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    pub name: String,
    pub rows: Vec<SheetRow>,
}

/// 整个工作簿
#[derive(Debug, Clone, Default)]
pub struct ParsedWorkbook {
    pub sheets: Vec<RawSheet>,
    /// 读取失败的工作表（SHEET_READ）
    pub sheet_errors: Vec<Issue>,
}

// ==========================================
// FileParser Trait
// ==========================================
pub trait FileParser: Send + Sync {
    /// 解析工作簿字节
    ///
    /// # 参数
    /// - bytes: 上传文件内容
    /// - all_sheets: true 读取全部工作表，false 只读取第一个
    ///
    /// # 返回
    /// - Ok(ParsedWorkbook)
    /// - Err(FileOpen / NoSheets)
    fn parse_workbook(&self, bytes: &[u8], all_sheets: bool)
        -> Result<ParsedWorkbook, ImportError>;
}

// ==========================================
// Excel Parser 实现
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct ExcelParser;

impl FileParser for ExcelParser {
    fn parse_workbook(
        &self,
        bytes: &[u8],
        all_sheets: bool,
    ) -> Result<ParsedWorkbook, ImportError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|e| ImportError::FileOpen(e.to_string()))?;

        let sheet_names = workbook.sheet_names();
        if sheet_names.is_empty() {
            return Err(ImportError::NoSheets);
        }

        let selected: Vec<String> = if all_sheets {
            sheet_names
        } else {
            sheet_names.into_iter().take(1).collect()
        };

        let mut parsed = ParsedWorkbook::default();
        for name in selected {
            match workbook.worksheet_range(&name) {
                Ok(range) => {
                    let (start_row, _) = range.start().unwrap_or((0, 0));
                    let rows: Vec<SheetRow> = range
                        .rows()
                        .enumerate()
                        .map(|(idx, row)| {
                            SheetRow::new(
                                start_row as usize + idx + 1,
                                row.iter().map(cell_to_string).collect(),
                            )
                        })
                        .collect();
                    debug!(sheet = %name, rows = rows.len(), "工作表读取完成");
                    parsed.sheets.push(RawSheet { name, rows });
                }
                Err(e) => {
                    warn!(sheet = %name, error = %e, "工作表读取失败");
                    parsed.sheet_errors.push(
                        Issue::error(
                            ErrorType::SheetRead,
                            format!("Failed to read sheet '{}': {}", name, e),
                        )
                        .in_sheet(&name),
                    );
                }
            }
        }

        Ok(parsed)
    }
}

/// 单元格渲染为字符串
///
/// - 整数值浮点 → 无小数
/// - 日期 → YYYY-MM-DD（含时间时附 HH:MM:SS），纯时间 → HH:MM
/// - 错误单元格（#REF! 等）→ 空
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ndt) if ndt.date().year() < 1900 => ndt.format("%H:%M").to_string(),
            Some(ndt) if ndt.time() == chrono::NaiveTime::MIN => {
                ndt.format("%Y-%m-%d").to_string()
            }
            Some(ndt) => ndt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Error(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_to_string() {
        assert_eq!(cell_to_string(&Data::Float(12345.0)), "12345");
        assert_eq!(cell_to_string(&Data::Float(12.5)), "12.5");
        assert_eq!(cell_to_string(&Data::Int(7)), "7");
        assert_eq!(cell_to_string(&Data::String("  Ford ".into())), "Ford");
        assert_eq!(cell_to_string(&Data::Empty), "");
        assert_eq!(
            cell_to_string(&Data::Error(calamine::CellErrorType::Ref)),
            ""
        );
    }

    #[test]
    fn test_sheet_row_helpers() {
        let row = SheetRow::new(3, vec!["".into(), "  Agency Vehicles ".into(), "".into()]);
        assert!(!row.is_blank());
        assert_eq!(row.first_non_blank(), Some("Agency Vehicles"));
        assert_eq!(row.cell(10), "");

        let blank = SheetRow::new(4, vec![" ".into(), "".into()]);
        assert!(blank.is_blank());
    }

    #[test]
    fn test_parse_rejects_non_workbook_bytes() {
        let parser = ExcelParser;
        let result = parser.parse_workbook(b"%PDF-1.4\n%fake pdf body", true);
        assert!(matches!(result, Err(ImportError::FileOpen(_))));
    }
}
