// ==========================================
// 校车车队管理系统 - 导入 Repository 实现
// ==========================================
// 职责: 实现导入相关数据访问（使用 rusqlite）
// 红线: Repository 不含业务规则，只做数据 CRUD
// 约束: 表名/列名来自静态注册表并经过标识符校验，取值一律参数化
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::{FieldValue, ImportHistoryRecord, ImportType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::import_repo::{ExistingRecord, ImportRepository, ImportTransaction};
use chrono::{DateTime, Utc};
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

// 实现 ToSql for FieldValue
impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            FieldValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(s.as_str().into()),
        })
    }
}

/// 标识符校验（仅允许小写字母、数字、下划线）
fn ident(name: &str) -> RepositoryResult<&str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(RepositoryError::InvalidIdentifier(name.to_string()))
    }
}

// ==========================================
// SqliteImportRepository
// ==========================================
pub struct SqliteImportRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteImportRepository {
    /// 创建新的 Repository 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 使用共享连接创建实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_history_row(row: &Row<'_>) -> rusqlite::Result<(ImportHistoryRecord, String, String)> {
        let import_type: String = row.get("import_type")?;
        let record_ids: String = row.get("record_ids")?;
        let file_size: i64 = row.get("file_size")?;
        let total_rows: i64 = row.get("total_rows")?;
        let successful_rows: i64 = row.get("successful_rows")?;
        let failed_rows: i64 = row.get("failed_rows")?;
        let skipped_rows: i64 = row.get("skipped_rows")?;
        let error_count: i64 = row.get("error_count")?;
        let warning_count: i64 = row.get("warning_count")?;
        let can_rollback: i64 = row.get("can_rollback")?;

        let record = ImportHistoryRecord {
            import_id: row.get("import_id")?,
            // 占位，稍后由 import_type 字符串解析
            import_type: ImportType::Mileage,
            file_name: row.get("file_name")?,
            file_size: file_size.max(0) as u64,
            total_rows: total_rows.max(0) as usize,
            successful_rows: successful_rows.max(0) as usize,
            failed_rows: failed_rows.max(0) as usize,
            skipped_rows: skipped_rows.max(0) as usize,
            error_count: error_count.max(0) as usize,
            warning_count: warning_count.max(0) as usize,
            summary: row.get("summary")?,
            start_time: row.get("start_time")?,
            end_time: row.get("end_time")?,
            table_name: row.get("table_name")?,
            record_ids: Vec::new(),
            can_rollback: can_rollback != 0,
            rollback_until: row.get("rollback_until")?,
            rolled_back_at: row.get("rolled_back_at")?,
        };
        Ok((record, import_type, record_ids))
    }

    fn finish_history_row(
        (mut record, import_type, record_ids): (ImportHistoryRecord, String, String),
    ) -> RepositoryResult<ImportHistoryRecord> {
        record.import_type =
            import_type
                .parse::<ImportType>()
                .map_err(|e| RepositoryError::FieldValueError {
                    field: "import_type".to_string(),
                    message: e,
                })?;
        record.record_ids =
            serde_json::from_str(&record_ids).map_err(|e| RepositoryError::FieldValueError {
                field: "record_ids".to_string(),
                message: e.to_string(),
            })?;
        Ok(record)
    }
}

const HISTORY_COLUMNS: &str = "import_id, import_type, file_name, file_size, total_rows, \
     successful_rows, failed_rows, skipped_rows, error_count, warning_count, summary, \
     start_time, end_time, table_name, record_ids, can_rollback, rollback_until, rolled_back_at";

impl ImportRepository for SqliteImportRepository {
    fn begin(&self) -> RepositoryResult<Box<dyn ImportTransaction + '_>> {
        let conn = self.get_conn()?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        debug!("导入事务已开启");
        Ok(Box::new(SqliteImportTransaction {
            conn,
            finished: false,
        }))
    }

    fn save_history(&self, record: &ImportHistoryRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let record_ids = serde_json::to_string(&record.record_ids)
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;

        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO import_history ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                HISTORY_COLUMNS
            ),
            params![
                record.import_id,
                record.import_type.as_str(),
                record.file_name,
                record.file_size as i64,
                record.total_rows as i64,
                record.successful_rows as i64,
                record.failed_rows as i64,
                record.skipped_rows as i64,
                record.error_count as i64,
                record.warning_count as i64,
                record.summary,
                record.start_time,
                record.end_time,
                record.table_name,
                record_ids,
                record.can_rollback,
                record.rollback_until,
                record.rolled_back_at,
            ],
        )?;
        Ok(())
    }

    fn get_history(&self, import_id: &str) -> RepositoryResult<Option<ImportHistoryRecord>> {
        let conn = self.get_conn()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM import_history WHERE import_id = ?1",
                    HISTORY_COLUMNS
                ),
                params![import_id],
                Self::map_history_row,
            )
            .optional()?;
        raw.map(Self::finish_history_row).transpose()
    }

    fn list_history(&self, limit: usize) -> RepositoryResult<Vec<ImportHistoryRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_history ORDER BY start_time DESC LIMIT ?1",
            HISTORY_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], Self::map_history_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::finish_history_row).collect()
    }

    fn existing_keys(
        &self,
        table: &str,
        column: &str,
        keys: &[String],
    ) -> RepositoryResult<HashSet<String>> {
        let mut found = HashSet::new();
        if keys.is_empty() {
            return Ok(found);
        }
        let conn = self.get_conn()?;
        let (table, column) = (ident(table)?, ident(column)?);

        // 分批查询，避免超出 SQLite 参数上限
        for chunk in keys.chunks(500) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {col} FROM {table} WHERE {col} IN ({placeholders})",
                col = column,
                table = table,
                placeholders = placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let values = stmt
                .query_map(params_from_iter(chunk.iter()), |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            found.extend(values);
        }
        Ok(found)
    }

    fn count_by_import(&self, table: &str, import_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE import_id = ?1", ident(table)?),
            params![import_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    fn undo_import(
        &self,
        table: &str,
        import_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let table = ident(table)?;
        let tx = conn.transaction()?;

        let deleted = tx.execute(
            &format!("DELETE FROM {} WHERE import_id = ?1", table),
            params![import_id],
        )?;
        tx.execute(
            "UPDATE import_history SET can_rollback = 0, rolled_back_at = ?2 WHERE import_id = ?1",
            params![import_id, now],
        )?;

        tx.commit()?;
        Ok(deleted)
    }
}

// ==========================================
// SqliteImportTransaction
// ==========================================
// 持有连接锁直到 commit / rollback / drop
struct SqliteImportTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl SqliteImportTransaction<'_> {
    fn savepoint_name(name: &str) -> RepositoryResult<&str> {
        ident(name)
    }
}

impl ImportTransaction for SqliteImportTransaction<'_> {
    fn find_existing(
        &mut self,
        table: &str,
        key: &[(&str, &FieldValue)],
    ) -> RepositoryResult<Option<ExistingRecord>> {
        if key.is_empty() || key.iter().any(|(_, v)| v.is_null()) {
            return Ok(None);
        }

        let mut conditions = Vec::with_capacity(key.len());
        for (idx, (column, _)) in key.iter().enumerate() {
            conditions.push(format!("{} = ?{}", ident(column)?, idx + 1));
        }
        let sql = format!(
            "SELECT id, import_id FROM {} WHERE {} LIMIT 1",
            ident(table)?,
            conditions.join(" AND ")
        );

        let record = self
            .conn
            .query_row(&sql, params_from_iter(key.iter().map(|(_, v)| *v)), |row| {
                Ok(ExistingRecord {
                    id: row.get(0)?,
                    import_id: row.get(1)?,
                })
            })
            .optional()?;
        Ok(record)
    }

    fn insert_record(
        &mut self,
        table: &str,
        values: &[(&str, &FieldValue)],
        import_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let mut columns = Vec::with_capacity(values.len() + 3);
        for (column, _) in values {
            columns.push(ident(column)?.to_string());
        }
        columns.extend(["import_id", "created_at", "updated_at"].map(String::from));

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            ident(table)?,
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut args: Vec<&dyn ToSql> = values.iter().map(|(_, v)| *v as &dyn ToSql).collect();
        args.push(&import_id);
        args.push(&now);
        args.push(&now);

        self.conn.execute(&sql, args.as_slice())?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_record(
        &mut self,
        table: &str,
        id: i64,
        values: &[(&str, &FieldValue)],
        import_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let mut assignments = Vec::with_capacity(values.len() + 2);
        for (idx, (column, _)) in values.iter().enumerate() {
            assignments.push(format!("{} = ?{}", ident(column)?, idx + 1));
        }
        let n = values.len();
        assignments.push(format!("import_id = ?{}", n + 1));
        assignments.push(format!("updated_at = ?{}", n + 2));

        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            ident(table)?,
            assignments.join(", "),
            n + 3
        );

        let mut args: Vec<&dyn ToSql> = values.iter().map(|(_, v)| *v as &dyn ToSql).collect();
        args.push(&import_id);
        args.push(&now);
        args.push(&id);

        let affected = self.conn.execute(&sql, args.as_slice())?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: table.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn clear_rollback(&mut self, import_id: &str) -> RepositoryResult<()> {
        self.conn.execute(
            "UPDATE import_history SET can_rollback = 0 WHERE import_id = ?1",
            params![import_id],
        )?;
        Ok(())
    }

    fn savepoint(&mut self, name: &str) -> RepositoryResult<()> {
        let name = Self::savepoint_name(name)?;
        self.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> RepositoryResult<()> {
        let name = Self::savepoint_name(name)?;
        self.conn.execute_batch(&format!("RELEASE SAVEPOINT {}", name))?;
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> RepositoryResult<()> {
        let name = Self::savepoint_name(name)?;
        self.conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}",
            name = name
        ))?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> RepositoryResult<()> {
        self.finished = true;
        if let Err(e) = self.conn.execute_batch("COMMIT") {
            // COMMIT 失败后事务可能仍处于打开状态
            if !self.conn.is_autocommit() {
                let _ = self.conn.execute_batch("ROLLBACK");
            }
            return Err(RepositoryError::DatabaseTransactionError(e.to_string()));
        }
        debug!("导入事务已提交");
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> RepositoryResult<()> {
        self.finished = true;
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        debug!("导入事务已回滚");
        Ok(())
    }
}

impl Drop for SqliteImportTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "丢弃事务时回滚失败");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use chrono::Duration;

    fn repo() -> SqliteImportRepository {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        SqliteImportRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    #[test]
    fn test_insert_find_update_commit() {
        let repo = repo();
        let now = Utc::now();
        let id = {
            let mut tx = repo.begin().unwrap();
            let vid = text("BUS01");
            let (year, make, model) = (FieldValue::Integer(2018), text("Blue Bird"), text("Vision"));
            let id = tx
                .insert_record(
                    "vehicles",
                    &[("vehicle_id", &vid), ("year", &year), ("make", &make), ("model", &model)],
                    "imp-1",
                    now,
                )
                .unwrap();

            let found = tx.find_existing("vehicles", &[("vehicle_id", &vid)]).unwrap().unwrap();
            assert_eq!(found.id, id);
            assert_eq!(found.import_id.as_deref(), Some("imp-1"));

            let new_model = text("All American");
            tx.update_record("vehicles", id, &[("model", &new_model)], "imp-2", now)
                .unwrap();
            tx.commit().unwrap();
            id
        };

        assert_eq!(repo.count_by_import("vehicles", "imp-2").unwrap(), 1);
        let conn = repo.get_conn().unwrap();
        let model: String = conn
            .query_row("SELECT model FROM vehicles WHERE id = ?1", [id], |r| r.get(0))
            .unwrap();
        assert_eq!(model, "All American");
    }

    #[test]
    fn test_null_key_component_is_not_found() {
        let repo = repo();
        let mut tx = repo.begin().unwrap();
        assert!(tx
            .find_existing("students", &[("student_id", &FieldValue::Null)])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_savepoint_rollback_keeps_transaction_alive() {
        let repo = repo();
        let now = Utc::now();
        let mut tx = repo.begin().unwrap();
        let vid = text("BUS02");
        let (year, make, model) = (FieldValue::Integer(2019), text("Ford"), text("E450"));
        let row = [("vehicle_id", &vid), ("year", &year), ("make", &make), ("model", &model)];

        tx.savepoint("row_1").unwrap();
        tx.insert_record("vehicles", &row, "imp-3", now).unwrap();
        tx.release_savepoint("row_1").unwrap();

        tx.savepoint("row_2").unwrap();
        // UNIQUE(vehicle_id) 冲突
        let err = tx.insert_record("vehicles", &row, "imp-3", now).unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));
        tx.rollback_to_savepoint("row_2").unwrap();

        tx.commit().unwrap();
        assert_eq!(repo.count_by_import("vehicles", "imp-3").unwrap(), 1);
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let repo = repo();
        {
            let mut tx = repo.begin().unwrap();
            let vid = text("BUS03");
            let (year, make, model) = (FieldValue::Integer(2020), text("Ford"), text("Transit"));
            tx.insert_record(
                "vehicles",
                &[("vehicle_id", &vid), ("year", &year), ("make", &make), ("model", &model)],
                "imp-4",
                Utc::now(),
            )
            .unwrap();
        }
        assert_eq!(repo.count_by_import("vehicles", "imp-4").unwrap(), 0);
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        let repo = repo();
        let err = repo.count_by_import("vehicles; DROP TABLE vehicles", "x").unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidIdentifier(_)));
    }

    #[test]
    fn test_history_round_trip_and_undo() {
        let repo = repo();
        let now = Utc::now();
        let record = ImportHistoryRecord {
            import_id: "imp-5".into(),
            import_type: ImportType::Student,
            file_name: "roster.xlsx".into(),
            file_size: 2048,
            total_rows: 3,
            successful_rows: 2,
            failed_rows: 1,
            skipped_rows: 0,
            error_count: 1,
            warning_count: 0,
            summary: "Import partially completed. 2 succeeded, 1 failed.".into(),
            start_time: now,
            end_time: now,
            table_name: "students".into(),
            record_ids: vec![1, 2],
            can_rollback: true,
            rollback_until: Some(now + Duration::hours(24)),
            rolled_back_at: None,
        };
        repo.save_history(&record).unwrap();

        let loaded = repo.get_history("imp-5").unwrap().unwrap();
        assert_eq!(loaded.record_ids, vec![1, 2]);
        assert_eq!(loaded.import_type, ImportType::Student);
        assert!(loaded.can_rollback);
        assert_eq!(repo.list_history(10).unwrap().len(), 1);

        let deleted = repo.undo_import("students", "imp-5", now).unwrap();
        assert_eq!(deleted, 0);
        let loaded = repo.get_history("imp-5").unwrap().unwrap();
        assert!(!loaded.can_rollback);
        assert!(loaded.rolled_back_at.is_some());
    }

    #[test]
    fn test_existing_keys() {
        let repo = repo();
        {
            let conn = repo.get_conn().unwrap();
            conn.execute(
                "INSERT INTO students (student_id, name, grade, address, phone, import_id, created_at, updated_at)
                 VALUES ('S1', 'Ann Lee', '3', '1 Main St', '(503) 555-0100', 'seed', '2024-01-01', '2024-01-01')",
                [],
            )
            .unwrap();
        }
        let found = repo
            .existing_keys("students", "student_id", &["S1".to_string(), "S9".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains("S1"));
    }
}
