// ==========================================
// 校车车队管理系统 - 导入层
// ==========================================
// 职责: Excel 批量导入（分析 → 校验 → 执行）
// 支持: MILEAGE / ECSE / STUDENT / VEHICLE
// ==========================================

// 模块声明
pub mod analyzer;
pub mod conflict_handler;
pub mod data_cleaner;
pub mod error;
pub mod executor;
pub mod field_mapper;
pub mod file_parser;
pub mod import_service;
pub mod registry;
pub mod row_validator;
pub mod rules;
pub mod session_store;
pub mod sheet_sections;
pub mod validator;

// 重导出核心类型
pub use analyzer::{Analysis, Analyzer, WorkbookLayout};
pub use conflict_handler::ConflictHandler;
pub use error::ImportError;
pub use executor::{ExecuteOptions, Executor};
pub use file_parser::{ExcelParser, FileParser};
pub use import_service::{AnalyzeOutcome, ExecuteFlags, ImportService, UndoOutcome};
pub use registry::{spec_for, FieldKind, FieldSpec, ImportTypeSpec};
pub use session_store::SessionStore;
pub use validator::Validator;
