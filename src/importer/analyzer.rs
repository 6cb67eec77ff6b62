// ==========================================
// 校车车队管理系统 - 上传预检与工作簿分析
// ==========================================
// 流程:
//   1. 预检: 扩展名 → 大小 → 声明的 MIME 类型（不匹配仅告警）
//   2. 解析工作簿（里程读取全部工作表，其余只读第一个）
//   3. 每个工作表: 定位表头 / 分区 / 报表期间
//   4. 生成 SheetDescriptor、样例行、推荐映射
// 说明: 同一套结构识别供校验与执行阶段复用（重新读取暂存文件）
// ==========================================

use crate::domain::{ErrorType, Issue, SheetDescriptor};
use crate::importer::error::ImportError;
use crate::importer::field_mapper::suggest_mappings;
use crate::importer::file_parser::{FileParser, SheetRow};
use crate::importer::registry::ImportTypeSpec;
use crate::importer::sheet_sections::{layout_sheet, SheetLayout, SheetSegment};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info, instrument};

/// 允许的扩展名
pub const ALLOWED_EXTENSIONS: &[&str] = &["xlsx", "xls"];

/// 允许的 MIME 类型
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-excel",
    "application/octet-stream",
];

// ==========================================
// WorkbookLayout - 整个工作簿的结构识别结果
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct WorkbookLayout {
    pub sheets: Vec<SheetLayout>,
    /// 工作表级问题（含 SHEET_READ）
    pub issues: Vec<Issue>,
}

impl WorkbookLayout {
    /// 可参与导入的工作表
    pub fn usable(&self) -> impl Iterator<Item = &SheetLayout> {
        self.sheets.iter().filter(|s| s.is_usable())
    }

    pub fn has_usable_sheet(&self) -> bool {
        self.usable().next().is_some()
    }

    /// 所有可用分段的表头（供映射校验）
    pub fn known_headers(&self) -> HashSet<String> {
        self.usable()
            .flat_map(|s| s.segments.iter())
            .flat_map(|seg| seg.headers.iter())
            .filter(|h| !h.is_empty())
            .cloned()
            .collect()
    }

    /// 表头以下全部行（含空行）
    pub fn total_rows(&self) -> usize {
        self.usable().map(|s| s.total_rows()).sum()
    }

    pub fn data_row_count(&self) -> usize {
        self.usable().map(|s| s.data_row_count()).sum()
    }

    /// 读取失败的工作表（执行阶段视为致命）
    pub fn read_failures(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.error_type == ErrorType::SheetRead)
    }
}

/// 解析并识别工作簿结构
pub fn load_workbook(
    parser: &dyn FileParser,
    bytes: &[u8],
    spec: &ImportTypeSpec,
    today: NaiveDate,
) -> Result<WorkbookLayout, ImportError> {
    let parsed = parser.parse_workbook(bytes, spec.all_sheets)?;

    let mut workbook = WorkbookLayout {
        sheets: Vec::with_capacity(parsed.sheets.len()),
        issues: parsed.sheet_errors,
    };
    for sheet in &parsed.sheets {
        let layout = layout_sheet(sheet, spec, today);
        workbook.issues.extend(layout.issues.iter().cloned());
        workbook.sheets.push(layout);
    }
    Ok(workbook)
}

// ==========================================
// Analysis - 分析结果
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// 主工作表表头
    pub columns: Vec<String>,
    pub row_count: usize,
    pub sample_data: Vec<BTreeMap<String, String>>,
    pub sheets: Vec<SheetDescriptor>,
    pub suggested_mappings: BTreeMap<String, String>,
    pub warnings: Vec<Issue>,
    pub errors: Vec<Issue>,
}

// ==========================================
// Analyzer
// ==========================================
pub struct Analyzer {
    parser: Box<dyn FileParser>,
    max_file_size: u64,
    sample_limit: usize,
}

impl Analyzer {
    pub fn new(parser: Box<dyn FileParser>, max_file_size: u64, sample_limit: usize) -> Self {
        Self {
            parser,
            max_file_size,
            sample_limit,
        }
    }

    pub fn parser(&self) -> &dyn FileParser {
        self.parser.as_ref()
    }

    /// 上传预检
    ///
    /// # 返回
    /// - Ok(Vec<Issue>): 非致命告警（MIME_TYPE）
    /// - Err(FileValidation): 扩展名或大小不合格
    pub fn check_upload(
        &self,
        file_name: &str,
        size: u64,
        content_type: Option<&str>,
    ) -> Result<Vec<Issue>, ImportError> {
        let ext = file_extension(file_name).ok_or_else(|| {
            ImportError::FileValidation(format!(
                "Invalid file type '{}'. Only .xlsx and .xls files are allowed",
                file_name
            ))
        })?;
        if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(ImportError::FileValidation(format!(
                "Invalid file type '.{}'. Only .xlsx and .xls files are allowed",
                ext
            )));
        }

        if size == 0 {
            return Err(ImportError::FileValidation("File is empty".to_string()));
        }
        if size > self.max_file_size {
            return Err(ImportError::FileValidation(format!(
                "File size {} bytes exceeds the maximum of {} bytes",
                size, self.max_file_size
            )));
        }

        let mut warnings = Vec::new();
        if let Some(declared) = content_type.map(str::trim).filter(|c| !c.is_empty()) {
            let essence = declared.split(';').next().unwrap_or("").trim().to_lowercase();
            if !ALLOWED_CONTENT_TYPES.contains(&essence.as_str()) {
                warnings.push(
                    Issue::warning(
                        ErrorType::MimeType,
                        format!("Unexpected content type '{}' for an Excel file", declared),
                    )
                    .with_value(declared),
                );
            }
        }
        Ok(warnings)
    }

    /// 分析工作簿
    ///
    /// # 返回
    /// - Err(FileOpen / NoSheets): 工作簿无法打开
    /// - Err(NoHeader): 所有工作表都被跳过
    #[instrument(skip(self, bytes, spec), fields(import_type = %spec.import_type, size = bytes.len()))]
    pub fn analyze(
        &self,
        bytes: &[u8],
        spec: &ImportTypeSpec,
        today: NaiveDate,
    ) -> Result<Analysis, ImportError> {
        let workbook = load_workbook(self.parser(), bytes, spec, today)?;
        if !workbook.has_usable_sheet() {
            debug!(issues = workbook.issues.len(), "没有可用的工作表");
            return Err(ImportError::NoHeader);
        }

        let mut analysis = Analysis::default();
        for issue in &workbook.issues {
            if issue.is_error() {
                analysis.errors.push(issue.clone());
            } else {
                analysis.warnings.push(issue.clone());
            }
        }

        for layout in &workbook.sheets {
            analysis.sheets.push(self.describe(layout));
        }

        if let Some(primary) = workbook.usable().next() {
            analysis.columns = primary
                .primary_headers()
                .iter()
                .filter(|h| !h.is_empty())
                .cloned()
                .collect();
            analysis.sample_data = self.sample(&primary.segments);
        }
        analysis.row_count = workbook.data_row_count();

        // 所有分段表头合并后推荐映射（首次出现优先）
        let mut ordered_headers: Vec<String> = Vec::new();
        for header in workbook
            .usable()
            .flat_map(|s| s.segments.iter())
            .flat_map(|seg| seg.headers.iter())
        {
            if !header.is_empty() && !ordered_headers.contains(header) {
                ordered_headers.push(header.clone());
            }
        }
        analysis.suggested_mappings = suggest_mappings(spec, &ordered_headers);

        info!(
            sheets = analysis.sheets.len(),
            rows = analysis.row_count,
            columns = analysis.columns.len(),
            "工作簿分析完成"
        );
        Ok(analysis)
    }

    fn describe(&self, layout: &SheetLayout) -> SheetDescriptor {
        SheetDescriptor {
            name: layout.name.clone(),
            header_row: layout.segments.first().map(|s| s.header_row),
            headers: layout.primary_headers().to_vec(),
            row_count: layout.data_row_count(),
            sample: self.sample(&layout.segments),
            report_month: layout.period.as_ref().map(|p| p.month.clone()),
            report_year: layout.period.as_ref().map(|p| p.year),
            sections: layout.sections(),
        }
    }

    /// 前 N 个非空数据行（原始表头 → 值）
    fn sample(&self, segments: &[SheetSegment]) -> Vec<BTreeMap<String, String>> {
        segments
            .iter()
            .flat_map(|seg| seg.data_rows().map(move |row| row_to_map(&seg.headers, row)))
            .take(self.sample_limit)
            .collect()
    }
}

fn row_to_map(headers: &[String], row: &SheetRow) -> BTreeMap<String, String> {
    headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.is_empty())
        .map(|(idx, h)| (h.clone(), row.cell(idx).to_string()))
        .collect()
}

/// 小写扩展名（不含点）
pub fn file_extension(file_name: &str) -> Option<String> {
    Path::new(file_name.trim())
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}
