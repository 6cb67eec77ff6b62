// ==========================================
// 校车车队管理系统 - 导入领域类型定义
// ==========================================
// 职责: 导入类型 / 问题级别 / 错误类型标签 / 作业状态
// 序列化格式: 与前端向导约定一致
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 导入类型 (Import Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportType {
    Mileage,
    Ecse,
    #[serde(alias = "students")]
    Student,
    #[serde(alias = "vehicles")]
    Vehicle,
}

impl ImportType {
    pub const ALL: [ImportType; 4] = [
        ImportType::Mileage,
        ImportType::Ecse,
        ImportType::Student,
        ImportType::Vehicle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportType::Mileage => "mileage",
            ImportType::Ecse => "ecse",
            ImportType::Student => "student",
            ImportType::Vehicle => "vehicle",
        }
    }
}

impl fmt::Display for ImportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ImportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mileage" => Ok(ImportType::Mileage),
            "ecse" => Ok(ImportType::Ecse),
            "student" | "students" => Ok(ImportType::Student),
            "vehicle" | "vehicles" => Ok(ImportType::Vehicle),
            other => Err(format!("unsupported import type: {}", other)),
        }
    }
}

// ==========================================
// 问题级别 (Severity)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

// ==========================================
// 错误类型标签 (Error Type)
// ==========================================
// 机器可读标签，序列化为 SCREAMING_SNAKE_CASE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    // ----- 文件级 -----
    FileValidation,
    FileOpen,
    NoSheets,
    MimeType,
    Storage,

    // ----- 工作表级 -----
    NoHeader,
    EmptySheet,
    InvalidHeader,
    SheetPeriod,
    SheetRead,

    // ----- 映射级 -----
    MissingColumn,
    InvalidMapping,

    // ----- 行级 -----
    RequiredField,
    Format,
    Validation,
    Duplicate,
    Database,

    // ----- 作业级 -----
    Transaction,
    TransactionCommit,
    Timeout,
    Busy,
    ExpiredFile,
    InvalidState,
    TypeMismatch,
    RollbackUnavailable,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::FileValidation => "FILE_VALIDATION",
            ErrorType::FileOpen => "FILE_OPEN",
            ErrorType::NoSheets => "NO_SHEETS",
            ErrorType::MimeType => "MIME_TYPE",
            ErrorType::Storage => "STORAGE",
            ErrorType::NoHeader => "NO_HEADER",
            ErrorType::EmptySheet => "EMPTY_SHEET",
            ErrorType::InvalidHeader => "INVALID_HEADER",
            ErrorType::SheetPeriod => "SHEET_PERIOD",
            ErrorType::SheetRead => "SHEET_READ",
            ErrorType::MissingColumn => "MISSING_COLUMN",
            ErrorType::InvalidMapping => "INVALID_MAPPING",
            ErrorType::RequiredField => "REQUIRED_FIELD",
            ErrorType::Format => "FORMAT",
            ErrorType::Validation => "VALIDATION",
            ErrorType::Duplicate => "DUPLICATE",
            ErrorType::Database => "DATABASE",
            ErrorType::Transaction => "TRANSACTION",
            ErrorType::TransactionCommit => "TRANSACTION_COMMIT",
            ErrorType::Timeout => "TIMEOUT",
            ErrorType::Busy => "BUSY",
            ErrorType::ExpiredFile => "EXPIRED_FILE",
            ErrorType::InvalidState => "INVALID_STATE",
            ErrorType::TypeMismatch => "TYPE_MISMATCH",
            ErrorType::RollbackUnavailable => "ROLLBACK_UNAVAILABLE",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 作业状态 (Job State)
// ==========================================
// new ─analyze→ STAGED ─execute→ RUNNING ─commit→ COMMITTED
//                                         └rollback→ ABORTED
// STAGED / COMMITTED / ABORTED ─expiry→ PURGED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Staged,
    Running,
    Committed,
    Aborted,
    Purged,
}

impl JobState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Committed | JobState::Aborted | JobState::Purged)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Staged => write!(f, "STAGED"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Committed => write!(f, "COMMITTED"),
            JobState::Aborted => write!(f, "ABORTED"),
            JobState::Purged => write!(f, "PURGED"),
        }
    }
}

// ==========================================
// 里程表分区 (Mileage Section)
// ==========================================
// 里程工作表内由横幅行分隔的分区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MileageSection {
    AgencyVehicle,
    SchoolBus,
    Program,
}

impl MileageSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MileageSection::AgencyVehicle => "agency_vehicle",
            MileageSection::SchoolBus => "school_bus",
            MileageSection::Program => "program",
        }
    }

    /// 根据横幅文字识别分区（大小写不敏感的子串匹配）
    pub fn from_banner(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        if lower.contains("agency vehicle") {
            Some(MileageSection::AgencyVehicle)
        } else if lower.contains("school bus") {
            Some(MileageSection::SchoolBus)
        } else if lower.contains("program") {
            Some(MileageSection::Program)
        } else {
            None
        }
    }
}

impl fmt::Display for MileageSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
