// ==========================================
// 校车车队管理系统 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// 流程: 打开数据库 → 建表 → 读取配置 → 构建 ImportApi → 启动会话清理任务
// ==========================================

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::api::ImportApi;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigManager, ImportConfig, ImportConfigReader};
use crate::db::{init_schema, open_sqlite_connection};
use crate::importer::{ExcelParser, ImportService};
use crate::repository::SqliteImportRepository;

/// 应用状态
///
/// 包含API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 生效的导入配置
    pub config: ImportConfig,

    /// 导入API
    pub import_api: Arc<ImportApi>,

    /// 后台会话清理任务
    cleaner: Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    /// 创建新的AppState实例（需在 tokio 运行时内调用）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 初始化错误
    pub async fn new(db_path: &str) -> Result<Self, String> {
        Self::with_clock(db_path, Arc::new(SystemClock)).await
    }

    /// 使用指定时钟创建（测试注入 ManualClock）
    pub async fn with_clock(db_path: &str, clock: Arc<dyn Clock>) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        // 共享连接
        let conn = open_sqlite_connection(db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("数据库建表失败: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // 配置
        let config_manager = ConfigManager::from_connection(conn.clone())
            .map_err(|e| format!("无法创建ConfigManager: {}", e))?;
        let config = config_manager
            .load_import_config()
            .await
            .map_err(|e| format!("读取导入配置失败: {}", e))?;
        tracing::info!(
            max_file_size = config.max_file_size_bytes,
            session_ttl_secs = config.session_ttl_secs,
            staging_dir = %config.staging_dir.display(),
            "导入配置已加载"
        );

        // Repository / Service / API
        let repo = Arc::new(SqliteImportRepository::from_connection(conn));
        let service = Arc::new(ImportService::new(
            repo,
            Box::new(ExcelParser),
            clock,
            config.clone(),
        ));
        let cleaner = service.sessions().spawn_cleaner(config.cleaner_interval());
        let import_api = Arc::new(ImportApi::new(service));

        tracing::info!("AppState初始化完成");
        Ok(Self {
            db_path: db_path.to_string(),
            config,
            import_api,
            cleaner: Mutex::new(Some(cleaner)),
        })
    }

    /// 停止清理任务并删除所有暂存文件
    pub fn shutdown(&self) {
        if let Ok(mut cleaner) = self.cleaner.lock() {
            if let Some(handle) = cleaner.take() {
                handle.abort();
            }
        }
        self.import_api.service().sessions().shutdown();
        tracing::info!("AppState已关闭");
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 默认数据库路径
///
/// 优先级: FLEET_IMPORT_DB_PATH 环境变量 → 用户数据目录 → 当前目录
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var("FLEET_IMPORT_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./fleet_import.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("fleet-import");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("fleet_import.db");
        }
    }
    path.to_string_lossy().to_string()
}
