// ==========================================
// 校车车队管理系统 - 导入 Repository Trait
// ==========================================
// 职责: 定义导入相关数据访问接口（不包含业务逻辑）
// 红线: Repository 不含业务规则，只做数据 CRUD
// 说明: 同步接口；执行器在 spawn_blocking 中驱动
// ==========================================

use crate::domain::{FieldValue, ImportHistoryRecord};
use crate::repository::error::RepositoryResult;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// 按 upsert 键查到的已有记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRecord {
    pub id: i64,
    /// 最后写入该行的导入
    pub import_id: Option<String>,
}

// ==========================================
// ImportTransaction - 单次执行的数据库事务
// ==========================================
// 未调用 commit / rollback 即被丢弃时回滚
pub trait ImportTransaction {
    /// 按键查询（所有分量均非空）
    fn find_existing(
        &mut self,
        table: &str,
        key: &[(&str, &FieldValue)],
    ) -> RepositoryResult<Option<ExistingRecord>>;

    /// 插入一行，返回主键
    fn insert_record(
        &mut self,
        table: &str,
        values: &[(&str, &FieldValue)],
        import_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<i64>;

    /// 更新一行的可变字段
    fn update_record(
        &mut self,
        table: &str,
        id: i64,
        values: &[(&str, &FieldValue)],
        import_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<()>;

    /// 清除某次导入的可回滚标记（被后续导入覆盖写入）
    fn clear_rollback(&mut self, import_id: &str) -> RepositoryResult<()>;

    fn savepoint(&mut self, name: &str) -> RepositoryResult<()>;

    fn release_savepoint(&mut self, name: &str) -> RepositoryResult<()>;

    /// 回滚到保存点并释放
    fn rollback_to_savepoint(&mut self, name: &str) -> RepositoryResult<()>;

    fn commit(self: Box<Self>) -> RepositoryResult<()>;

    fn rollback(self: Box<Self>) -> RepositoryResult<()>;
}

// ==========================================
// ImportRepository Trait
// ==========================================
// 实现者: SqliteImportRepository（使用 rusqlite）
pub trait ImportRepository: Send + Sync {
    /// 开启事务（BEGIN IMMEDIATE）
    fn begin(&self) -> RepositoryResult<Box<dyn ImportTransaction + '_>>;

    // ===== 导入历史 =====

    fn save_history(&self, record: &ImportHistoryRecord) -> RepositoryResult<()>;

    fn get_history(&self, import_id: &str) -> RepositoryResult<Option<ImportHistoryRecord>>;

    /// 最近的导入历史（按开始时间倒序）
    fn list_history(&self, limit: usize) -> RepositoryResult<Vec<ImportHistoryRecord>>;

    // ===== 查询 =====

    /// 返回 keys 中已存在于 table.column 的值
    fn existing_keys(
        &self,
        table: &str,
        column: &str,
        keys: &[String],
    ) -> RepositoryResult<HashSet<String>>;

    /// 统计带有某个 import_id 的行数
    fn count_by_import(&self, table: &str, import_id: &str) -> RepositoryResult<usize>;

    // ===== 撤销 =====

    /// 删除带有 import_id 的行并标记历史已回滚
    ///
    /// # 返回
    /// - Ok(usize): 删除的行数
    fn undo_import(
        &self,
        table: &str,
        import_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<usize>;
}
