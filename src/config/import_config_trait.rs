// ==========================================
// 校车车队管理系统 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入模块所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::import_config::ImportConfig;
use async_trait::async_trait;
use std::error::Error;
use std::path::PathBuf;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入模块所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    // ===== 上传限制 =====

    /// 获取最大上传文件大小（字节）
    ///
    /// # 默认值
    /// - 10485760 (10 MiB)
    async fn get_max_file_size_bytes(&self) -> Result<u64, Box<dyn Error + Send + Sync>>;

    // ===== 会话 =====

    /// 获取暂存会话有效期（秒）
    ///
    /// # 默认值
    /// - 3600
    async fn get_session_ttl_secs(&self) -> Result<i64, Box<dyn Error + Send + Sync>>;

    /// 获取后台清理间隔（秒）
    ///
    /// # 默认值
    /// - 60
    async fn get_cleaner_interval_secs(&self) -> Result<u64, Box<dyn Error + Send + Sync>>;

    /// 获取暂存目录
    ///
    /// # 默认值
    /// - `<os temp>/fleet-import`
    async fn get_staging_dir(&self) -> Result<PathBuf, Box<dyn Error + Send + Sync>>;

    // ===== 执行 =====

    /// 获取可回滚窗口（小时）
    ///
    /// # 默认值
    /// - 24
    async fn get_rollback_window_hours(&self) -> Result<i64, Box<dyn Error + Send + Sync>>;

    /// 获取样例/预览行数
    ///
    /// # 默认值
    /// - 10
    async fn get_preview_limit(&self) -> Result<usize, Box<dyn Error + Send + Sync>>;

    /// 一次性读取完整配置
    async fn load_import_config(&self) -> Result<ImportConfig, Box<dyn Error + Send + Sync>> {
        Ok(ImportConfig {
            max_file_size_bytes: self.get_max_file_size_bytes().await?,
            session_ttl_secs: self.get_session_ttl_secs().await?,
            cleaner_interval_secs: self.get_cleaner_interval_secs().await?,
            rollback_window_hours: self.get_rollback_window_hours().await?,
            preview_limit: self.get_preview_limit().await?,
            staging_dir: self.get_staging_dir().await?,
        })
    }
}
