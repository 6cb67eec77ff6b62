// ==========================================
// 日志系统初始化
// ==========================================
// tracing + tracing-subscriber
// RUST_LOG 覆盖默认过滤；FLEET_IMPORT_LOG_FORMAT=json 输出结构化日志
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 默认过滤: 依赖库只报 warn，导入管道 info
pub const DEFAULT_DIRECTIVES: &str = "warn,fleet_import=info";

/// 测试过滤: 导入管道 debug（执行器逐行日志可见）
pub const TEST_DIRECTIVES: &str = "warn,fleet_import=debug";

/// 输出格式环境变量
pub const FORMAT_ENV: &str = "FLEET_IMPORT_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// 未知值回退为 Text
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }

    fn from_env() -> Self {
        std::env::var(FORMAT_ENV)
            .map(|v| Self::parse(&v))
            .unwrap_or(LogFormat::Text)
    }
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// 初始化日志系统
///
/// # 环境变量
/// - RUST_LOG: 例如 `RUST_LOG=fleet_import::importer::executor=trace`
/// - FLEET_IMPORT_LOG_FORMAT: `text`（默认）或 `json`
///
/// # 示例
/// ```no_run
/// use fleet_import::logging;
/// logging::init();
/// ```
pub fn init() {
    let filter = env_filter(DEFAULT_DIRECTIVES);
    let result = match LogFormat::from_env() {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_line_number(true)
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("logging already initialised: {}", e);
    }
}

/// 测试用日志初始化，可重复调用
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new(TEST_DIRECTIVES))
        .with_test_writer()
        .try_init();
}
