// ==========================================
// 校车车队管理系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config::{
    default_staging_dir, DEFAULT_CLEANER_INTERVAL_SECS, DEFAULT_MAX_FILE_SIZE_BYTES,
    DEFAULT_PREVIEW_LIMIT, DEFAULT_ROLLBACK_WINDOW_HOURS, DEFAULT_SESSION_TTL_SECS,
};
use crate::config::import_config_trait::ImportConfigReader;
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::warn;

type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析数值配置；缺失或无法解析时回退默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr + Copy + PartialOrd + Default,
    {
        match self.get_config_value(key)? {
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) if v > T::default() => Ok(v),
                _ => {
                    warn!(key, value = %raw, "配置值无效，使用默认值");
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }
}

// ==========================================
// ImportConfigReader 实现
// ==========================================
#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_max_file_size_bytes(&self) -> ConfigResult<u64> {
        self.get_parsed_or_default(config_keys::MAX_FILE_SIZE_BYTES, DEFAULT_MAX_FILE_SIZE_BYTES)
    }

    async fn get_session_ttl_secs(&self) -> ConfigResult<i64> {
        self.get_parsed_or_default(config_keys::SESSION_TTL_SECS, DEFAULT_SESSION_TTL_SECS)
    }

    async fn get_cleaner_interval_secs(&self) -> ConfigResult<u64> {
        self.get_parsed_or_default(
            config_keys::CLEANER_INTERVAL_SECS,
            DEFAULT_CLEANER_INTERVAL_SECS,
        )
    }

    async fn get_staging_dir(&self) -> ConfigResult<PathBuf> {
        Ok(self
            .get_config_value(config_keys::STAGING_DIR)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_staging_dir))
    }

    async fn get_rollback_window_hours(&self) -> ConfigResult<i64> {
        self.get_parsed_or_default(
            config_keys::ROLLBACK_WINDOW_HOURS,
            DEFAULT_ROLLBACK_WINDOW_HOURS,
        )
    }

    async fn get_preview_limit(&self) -> ConfigResult<usize> {
        self.get_parsed_or_default(config_keys::PREVIEW_LIMIT, DEFAULT_PREVIEW_LIMIT)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 上传
    pub const MAX_FILE_SIZE_BYTES: &str = "import/max_file_size_bytes";

    // 会话
    pub const SESSION_TTL_SECS: &str = "import/session_ttl_secs";
    pub const CLEANER_INTERVAL_SECS: &str = "import/cleaner_interval_secs";
    pub const STAGING_DIR: &str = "import/staging_dir";

    // 执行
    pub const ROLLBACK_WINDOW_HOURS: &str = "import/rollback_window_hours";
    pub const PREVIEW_LIMIT: &str = "import/preview_limit";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::import_config::ImportConfig;
    use crate::db::init_schema;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn test_defaults_when_table_empty() {
        let config = manager().load_import_config().await.unwrap();
        assert_eq!(config, ImportConfig::default());
    }

    #[tokio::test]
    async fn test_overrides_from_config_kv() {
        let manager = manager();
        manager
            .set_global_config_value(config_keys::MAX_FILE_SIZE_BYTES, "2048")
            .unwrap();
        manager
            .set_global_config_value(config_keys::SESSION_TTL_SECS, "120")
            .unwrap();
        manager
            .set_global_config_value(config_keys::STAGING_DIR, "/var/tmp/fleet")
            .unwrap();

        let config = manager.load_import_config().await.unwrap();
        assert_eq!(config.max_file_size_bytes, 2048);
        assert_eq!(config.session_ttl_secs, 120);
        assert_eq!(config.staging_dir, PathBuf::from("/var/tmp/fleet"));
        assert_eq!(config.preview_limit, DEFAULT_PREVIEW_LIMIT);
    }

    #[tokio::test]
    async fn test_invalid_values_fall_back() {
        let manager = manager();
        manager
            .set_global_config_value(config_keys::PREVIEW_LIMIT, "lots")
            .unwrap();
        manager
            .set_global_config_value(config_keys::ROLLBACK_WINDOW_HOURS, "-3")
            .unwrap();
        assert_eq!(manager.get_preview_limit().await.unwrap(), DEFAULT_PREVIEW_LIMIT);
        assert_eq!(
            manager.get_rollback_window_hours().await.unwrap(),
            DEFAULT_ROLLBACK_WINDOW_HOURS
        );
    }
}
