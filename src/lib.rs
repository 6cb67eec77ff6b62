// ==========================================
// 校车车队管理系统 - Excel 批量导入核心库
// ==========================================
// 技术栈: Rust + SQLite + calamine
// 支持类型: MILEAGE / ECSE / STUDENT / VEHICLE
// 流程: analyze → validate → execute（单事务 + 行级 SAVEPOINT）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 分析 / 校验 / 执行
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// 时钟抽象
pub mod clock;

// API 层 - 业务接口
pub mod api;

// 应用层 - 宿主集成
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ErrorType, ImportType, JobState, MileageSection, Severity};

// 领域实体
pub use domain::{
    ImportHistoryRecord, ImportResult, Issue, Mapping, RollbackInfo, SheetDescriptor,
    StagedUpload, ValidationResult,
};

// API
pub use api::{ApiError, ImportApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "Fleet Excel Import";
