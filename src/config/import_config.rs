// ==========================================
// 校车车队管理系统 - 导入管道配置
// ==========================================

use chrono::Duration;
use std::path::PathBuf;

/// 默认最大文件大小 10 MiB
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
/// 默认会话有效期 1 小时
pub const DEFAULT_SESSION_TTL_SECS: i64 = 3_600;
/// 默认清理间隔 1 分钟
pub const DEFAULT_CLEANER_INTERVAL_SECS: u64 = 60;
/// 默认可回滚窗口 24 小时
pub const DEFAULT_ROLLBACK_WINDOW_HOURS: i64 = 24;
/// 默认样例/预览行数
pub const DEFAULT_PREVIEW_LIMIT: usize = 10;

/// 导入管道配置
#[derive(Debug, Clone, PartialEq)]
pub struct ImportConfig {
    pub max_file_size_bytes: u64,
    pub session_ttl_secs: i64,
    pub cleaner_interval_secs: u64,
    pub rollback_window_hours: i64,
    pub preview_limit: usize,
    pub staging_dir: PathBuf,
}

impl ImportConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::seconds(self.session_ttl_secs)
    }

    pub fn rollback_window(&self) -> Duration {
        Duration::hours(self.rollback_window_hours)
    }

    pub fn cleaner_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleaner_interval_secs.max(1))
    }
}

/// 默认暂存目录 `<os temp>/fleet-import`
pub fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("fleet-import")
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            cleaner_interval_secs: DEFAULT_CLEANER_INTERVAL_SECS,
            rollback_window_hours: DEFAULT_ROLLBACK_WINDOW_HOURS,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            staging_dir: default_staging_dir(),
        }
    }
}
