// ==========================================
// 校车车队管理系统 - 工作表结构识别
// ==========================================
// 职责:
//   - 表头行定位（提示词命中数 ≥ ⌈|expected|/2⌉）
//   - 里程工作表分区状态机:
//       SEARCHING_SECTION ─横幅→ SEARCHING_HEADER ─表头→ READING_ROWS
//       READING_ROWS ─横幅→ SEARCHING_HEADER（切换当前分区并重新找表头）
//   - 从工作表名推断报表月份 / 年份
// ==========================================

use crate::domain::{ErrorType, Issue, MileageSection};
use crate::importer::file_parser::{RawSheet, SheetRow};
use crate::importer::registry::ImportTypeSpec;
use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// 表头之下的一个数据分段
#[derive(Debug, Clone, PartialEq)]
pub struct SheetSegment {
    pub section: Option<MileageSection>,
    /// 表头行号（1 基）
    pub header_row: usize,
    pub headers: Vec<String>,
    /// 表头以下的行（含空行，不含横幅/表头/合计行）
    pub rows: Vec<SheetRow>,
}

impl SheetSegment {
    fn new(section: Option<MileageSection>, header: &SheetRow) -> Self {
        Self {
            section,
            header_row: header.row_number,
            headers: header.cells.iter().map(|c| c.trim().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn data_rows(&self) -> impl Iterator<Item = &SheetRow> {
        self.rows.iter().filter(|r| !r.is_blank())
    }
}

/// 报表期间（仅里程）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetPeriod {
    pub month: String,
    pub year: i32,
    /// 年份是否来自默认值
    pub year_defaulted: bool,
}

/// 工作表结构识别结果
#[derive(Debug, Clone, PartialEq)]
pub struct SheetLayout {
    pub name: String,
    pub segments: Vec<SheetSegment>,
    pub period: Option<SheetPeriod>,
    /// 工作表级问题（NO_HEADER / EMPTY_SHEET / INVALID_HEADER / SHEET_PERIOD）
    pub issues: Vec<Issue>,
}

impl SheetLayout {
    /// 能否参与导入
    pub fn is_usable(&self) -> bool {
        !self.segments.is_empty()
    }

    /// 表头以下的全部行（含空行）
    pub fn total_rows(&self) -> usize {
        self.segments.iter().map(|s| s.rows.len()).sum()
    }

    /// 非空数据行
    pub fn data_row_count(&self) -> usize {
        self.segments.iter().map(|s| s.data_rows().count()).sum()
    }

    /// 第一个分段的表头
    pub fn primary_headers(&self) -> &[String] {
        self.segments
            .first()
            .map(|s| s.headers.as_slice())
            .unwrap_or(&[])
    }

    pub fn sections(&self) -> Vec<MileageSection> {
        let mut seen = Vec::new();
        for section in self.segments.iter().filter_map(|s| s.section) {
            if !seen.contains(&section) {
                seen.push(section);
            }
        }
        seen
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    SearchingSection,
    SearchingHeader,
    ReadingRows,
}

/// 识别工作表结构
pub fn layout_sheet(sheet: &RawSheet, spec: &ImportTypeSpec, today: NaiveDate) -> SheetLayout {
    let mut layout = SheetLayout {
        name: sheet.name.clone(),
        segments: Vec::new(),
        period: None,
        issues: Vec::new(),
    };

    if sheet.rows.iter().all(|r| r.is_blank()) {
        layout.issues.push(
            Issue::warning(
                ErrorType::EmptySheet,
                format!("Sheet '{}' is empty", sheet.name),
            )
            .in_sheet(&sheet.name),
        );
        return layout;
    }

    if spec.has_sections {
        match parse_sheet_period(&sheet.name, today) {
            Some(period) => {
                if period.year_defaulted {
                    layout.issues.push(
                        Issue::info(
                            ErrorType::SheetPeriod,
                            format!(
                                "Could not determine year from sheet name '{}'; using {}",
                                sheet.name, period.year
                            ),
                        )
                        .in_sheet(&sheet.name)
                        .with_column("report_year")
                        .with_value(period.year),
                    );
                }
                layout.period = Some(period);
            }
            None => {
                layout.issues.push(
                    Issue::warning(
                        ErrorType::SheetPeriod,
                        format!(
                            "Could not determine month from sheet name '{}'; sheet skipped",
                            sheet.name
                        ),
                    )
                    .in_sheet(&sheet.name),
                );
                return layout;
            }
        }
        layout.segments = walk_sections(&sheet.rows, spec);
    } else if let Some(pos) = sheet.rows.iter().position(|r| spec.is_header_row(&r.cells)) {
        let mut segment = SheetSegment::new(None, &sheet.rows[pos]);
        segment.rows = sheet.rows[pos + 1..].to_vec();
        layout.segments.push(segment);
    }

    if layout.segments.is_empty() {
        layout.issues.push(
            Issue::error(
                ErrorType::NoHeader,
                format!(
                    "No header row found in sheet '{}' (need at least {} of: {})",
                    sheet.name,
                    spec.header_threshold(),
                    spec.expected_headers.join(", ")
                ),
            )
            .in_sheet(&sheet.name),
        );
        return layout;
    }

    for segment in &layout.segments {
        if let Some(dup) = first_duplicate_header(&segment.headers) {
            layout.issues.push(
                Issue::warning(
                    ErrorType::InvalidHeader,
                    format!(
                        "Header '{}' appears more than once; the first column is used",
                        dup
                    ),
                )
                .at_row(&sheet.name, segment.header_row)
                .with_value(dup),
            );
        }
    }

    trim_trailing_blank_rows(&mut layout.segments);
    layout
}

/// 里程分区状态机
fn walk_sections(rows: &[SheetRow], spec: &ImportTypeSpec) -> Vec<SheetSegment> {
    let mut segments: Vec<SheetSegment> = Vec::new();
    let mut state = WalkState::SearchingSection;
    let mut current_section: Option<MileageSection> = None;

    for row in rows {
        if row.is_blank() {
            if state == WalkState::ReadingRows {
                if let Some(segment) = segments.last_mut() {
                    segment.rows.push(row.clone());
                }
            }
            continue;
        }

        let is_header = spec.is_header_row(&row.cells);
        if !is_header {
            if let Some(section) = row.first_non_blank().and_then(MileageSection::from_banner) {
                current_section = Some(section);
                state = WalkState::SearchingHeader;
                continue;
            }
        }

        if is_header {
            segments.push(SheetSegment::new(current_section, row));
            state = WalkState::ReadingRows;
            continue;
        }

        match state {
            WalkState::ReadingRows => {
                if is_footer_row(row) {
                    continue;
                }
                if let Some(segment) = segments.last_mut() {
                    segment.rows.push(row.clone());
                }
            }
            // 标题行、说明行等
            WalkState::SearchingSection | WalkState::SearchingHeader => {}
        }
    }

    segments
}

/// 分区合计行（首个非空单元格以 "total" 开头）
fn is_footer_row(row: &SheetRow) -> bool {
    row.first_non_blank()
        .map(|c| c.to_lowercase().starts_with("total"))
        .unwrap_or(false)
}

/// 去掉分段末尾的空行（工作表尾部的格式残留不计入数据行）
fn trim_trailing_blank_rows(segments: &mut [SheetSegment]) {
    for segment in segments {
        while segment.rows.last().map(|r| r.is_blank()).unwrap_or(false) {
            segment.rows.pop();
        }
    }
}

fn first_duplicate_header(headers: &[String]) -> Option<String> {
    let mut seen = HashSet::new();
    headers
        .iter()
        .filter(|h| !h.is_empty())
        .find(|h| !seen.insert(h.to_lowercase()))
        .cloned()
}

/// 从工作表名推断月份和年份
///
/// - 月份: 全称或前缀缩写（jan / feb / ... / sept），缺失返回 None
/// - 年份: 四位数字，或两位数字 yy → 20yy；缺失时使用当前年份
pub fn parse_sheet_period(name: &str, today: NaiveDate) -> Option<SheetPeriod> {
    let tokens = tokenize(name);

    let month = tokens.iter().find_map(|t| {
        if !t.chars().all(|c| c.is_ascii_alphabetic()) || t.len() < 3 {
            return None;
        }
        let lower = t.to_lowercase();
        MONTHS
            .iter()
            .find(|m| m.to_lowercase().starts_with(&lower))
            .map(|m| m.to_string())
    })?;

    let four_digit = tokens.iter().find_map(|t| {
        if t.len() == 4 && t.chars().all(|c| c.is_ascii_digit()) {
            t.parse::<i32>().ok().filter(|y| (1900..=2100).contains(y))
        } else {
            None
        }
    });
    let two_digit = || {
        tokens.iter().find_map(|t| {
            if t.len() == 2 && t.chars().all(|c| c.is_ascii_digit()) {
                t.parse::<i32>().ok().map(|yy| 2000 + yy)
            } else {
                None
            }
        })
    };

    match four_digit.or_else(two_digit) {
        Some(year) => Some(SheetPeriod {
            month,
            year,
            year_defaulted: false,
        }),
        None => Some(SheetPeriod {
            month,
            year: today.year(),
            year_defaulted: true,
        }),
    }
}

/// 切分为字母串 / 数字串
fn tokenize(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_is_digit = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            let is_digit = c.is_ascii_digit();
            if !current.is_empty() && is_digit != current_is_digit {
                tokens.push(std::mem::take(&mut current));
            }
            current_is_digit = is_digit;
            current.push(c);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
