// ==========================================
// 校车车队管理系统 - 上传会话存储
// ==========================================
// 职责: 暂存上传文件，维护 file_id → 会话状态
// 状态: STAGED → RUNNING → COMMITTED | ABORTED
//       STAGED → PURGED（过期清理）
// 说明: 终态保留墓碑记录，暂存文件在终态时删除
// ==========================================

use crate::clock::Clock;
use crate::domain::{ImportType, JobState, StagedUpload};
use crate::importer::error::ImportError;
use chrono::Duration;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 会话条目
#[derive(Debug, Clone)]
struct SessionEntry {
    upload: StagedUpload,
    state: JobState,
    /// 校验时选择的部分导入模式
    allow_partial: bool,
}

// ==========================================
// SessionStore
// ==========================================
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    clock: Arc<dyn Clock>,
    staging_dir: PathBuf,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>, staging_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            clock,
            staging_dir: staging_dir.into(),
            ttl,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, SessionEntry>>, ImportError> {
        self.sessions
            .lock()
            .map_err(|e| ImportError::InternalError(format!("session lock poisoned: {}", e)))
    }

    /// 暂存上传文件并登记会话
    ///
    /// # 参数
    /// - bytes: 文件内容
    /// - file_name: 原始文件名
    /// - extension: 含点的小写扩展名（如 ".xlsx"）
    pub fn stage(
        &self,
        bytes: &[u8],
        file_name: &str,
        extension: &str,
        import_type: ImportType,
    ) -> Result<StagedUpload, ImportError> {
        let file_id = Uuid::new_v4().to_string();
        let path = self.staging_dir.join(format!("{}{}", file_id, extension));

        fs::create_dir_all(&self.staging_dir)?;
        fs::write(&path, bytes)?;

        let now = self.clock.now();
        let upload = StagedUpload {
            file_id: file_id.clone(),
            file_name: file_name.to_string(),
            file_size: bytes.len() as u64,
            path: path.clone(),
            import_type,
            created_at: now,
            expires_at: now + self.ttl,
        };

        match self.lock() {
            Ok(mut sessions) => {
                sessions.insert(
                    file_id.clone(),
                    SessionEntry {
                        upload: upload.clone(),
                        state: JobState::Staged,
                        allow_partial: false,
                    },
                );
            }
            Err(e) => {
                remove_file_quietly(&path);
                return Err(e);
            }
        }

        info!(file_id = %file_id, file_name, size = upload.file_size, "上传文件已暂存");
        Ok(upload)
    }

    /// 查询可用会话（STAGED 且未过期）
    pub fn lookup(&self, file_id: &str) -> Result<StagedUpload, ImportError> {
        let mut sessions = self.lock()?;
        let now = self.clock.now();
        let entry = live_entry(&mut sessions, file_id, now)?;
        match entry.state {
            JobState::Staged => Ok(entry.upload.clone()),
            state => Err(ImportError::InvalidState {
                file_id: file_id.to_string(),
                state,
            }),
        }
    }

    /// 当前状态（未知 file_id 返回 None）
    pub fn state(&self, file_id: &str) -> Option<JobState> {
        self.sessions
            .lock()
            .ok()
            .and_then(|s| s.get(file_id).map(|e| e.state))
    }

    /// 记录校验时选择的部分导入模式
    pub fn set_allow_partial(&self, file_id: &str, allow_partial: bool) -> Result<(), ImportError> {
        let mut sessions = self.lock()?;
        let now = self.clock.now();
        let entry = live_entry(&mut sessions, file_id, now)?;
        if entry.state != JobState::Staged {
            return Err(ImportError::InvalidState {
                file_id: file_id.to_string(),
                state: entry.state,
            });
        }
        entry.allow_partial = allow_partial;
        Ok(())
    }

    /// STAGED → RUNNING（原子）
    ///
    /// # 返回
    /// - Ok((upload, allow_partial))
    /// - Err(Busy): 已有执行在进行
    /// - Err(InvalidState): 会话已结束
    /// - Err(ExpiredFile): 过期或未知
    pub fn begin_execute(&self, file_id: &str) -> Result<(StagedUpload, bool), ImportError> {
        let mut sessions = self.lock()?;
        let now = self.clock.now();
        let entry = live_entry(&mut sessions, file_id, now)?;
        match entry.state {
            JobState::Staged => {
                entry.state = JobState::Running;
                debug!(file_id, "会话进入 RUNNING");
                Ok((entry.upload.clone(), entry.allow_partial))
            }
            JobState::Running => Err(ImportError::Busy(file_id.to_string())),
            state => Err(ImportError::InvalidState {
                file_id: file_id.to_string(),
                state,
            }),
        }
    }

    /// RUNNING → STAGED（执行前置检查失败，会话保持可用）
    pub fn abandon_execute(&self, file_id: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if let Some(entry) = sessions.get_mut(file_id) {
                if entry.state == JobState::Running {
                    entry.state = JobState::Staged;
                }
            }
        }
    }

    /// RUNNING → 终态；删除暂存文件，保留墓碑
    pub fn finish_execute(&self, file_id: &str, state: JobState) {
        let path = match self.sessions.lock() {
            Ok(mut sessions) => match sessions.get_mut(file_id) {
                Some(entry) => {
                    entry.state = state;
                    Some(entry.upload.path.clone())
                }
                None => None,
            },
            Err(e) => {
                warn!(file_id, error = %e, "会话锁获取失败");
                None
            }
        };
        if let Some(path) = path {
            remove_file_quietly(&path);
        }
        debug!(file_id, state = %state, "会话结束");
    }

    /// 清理过期会话（跳过 RUNNING）
    ///
    /// # 返回
    /// 清理的会话数
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut expired: Vec<PathBuf> = Vec::new();

        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.retain(|_, entry| {
                let stale = entry.state != JobState::Running && entry.upload.expires_at <= now;
                if stale && entry.state == JobState::Staged {
                    expired.push(entry.upload.path.clone());
                }
                !stale
            });
        }

        for path in &expired {
            remove_file_quietly(path);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "已清理过期上传");
        }
        expired.len()
    }

    /// 启动后台清理任务
    pub fn spawn_cleaner(self: &Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 首个 tick 立即返回
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.purge_expired();
            }
        })
    }

    /// 删除所有暂存文件并清空会话
    pub fn shutdown(&self) {
        let paths: Vec<PathBuf> = match self.sessions.lock() {
            Ok(mut sessions) => sessions
                .drain()
                .filter(|(_, e)| !e.state.is_terminal())
                .map(|(_, e)| e.upload.path)
                .collect(),
            Err(_) => Vec::new(),
        };
        for path in &paths {
            remove_file_quietly(path);
        }
        if !paths.is_empty() {
            info!(count = paths.len(), "关闭时删除暂存文件");
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 取出会话；过期的非 RUNNING 会话（含终态记录）就地清理并返回 ExpiredFile
fn live_entry<'a>(
    sessions: &'a mut HashMap<String, SessionEntry>,
    file_id: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<&'a mut SessionEntry, ImportError> {
    let expired = match sessions.get(file_id) {
        None => return Err(ImportError::ExpiredFile(file_id.to_string())),
        Some(entry) => entry.state != JobState::Running && entry.upload.expires_at <= now,
    };
    if expired {
        if let Some(entry) = sessions.remove(file_id) {
            remove_file_quietly(&entry.upload.path);
        }
        return Err(ImportError::ExpiredFile(file_id.to_string()));
    }
    sessions
        .get_mut(file_id)
        .ok_or_else(|| ImportError::ExpiredFile(file_id.to_string()))
}

fn remove_file_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "删除暂存文件失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn store() -> (TempDir, Arc<ManualClock>, SessionStore) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap(),
        ));
        let store = SessionStore::new(clock.clone(), dir.path(), Duration::minutes(30));
        (dir, clock, store)
    }

    #[test]
    fn test_stage_writes_file_named_by_id() {
        let (dir, _clock, store) = store();
        let upload = store
            .stage(b"PK", "roster.xlsx", ".xlsx", ImportType::Student)
            .unwrap();
        assert_eq!(upload.path, dir.path().join(format!("{}.xlsx", upload.file_id)));
        assert!(upload.path.exists());
        assert_eq!(store.state(&upload.file_id), Some(JobState::Staged));
    }

    #[test]
    fn test_lookup_after_ttl_is_expired_and_file_removed() {
        let (_dir, clock, store) = store();
        let upload = store
            .stage(b"PK", "roster.xlsx", ".xlsx", ImportType::Student)
            .unwrap();
        clock.advance(Duration::minutes(31));
        assert!(matches!(
            store.lookup(&upload.file_id),
            Err(ImportError::ExpiredFile(_))
        ));
        assert!(!upload.path.exists());
    }

    #[test]
    fn test_begin_execute_twice_is_busy() {
        let (_dir, _clock, store) = store();
        let upload = store
            .stage(b"PK", "fleet.xlsx", ".xlsx", ImportType::Vehicle)
            .unwrap();
        store.begin_execute(&upload.file_id).unwrap();
        assert!(matches!(
            store.begin_execute(&upload.file_id),
            Err(ImportError::Busy(_))
        ));

        store.abandon_execute(&upload.file_id);
        assert_eq!(store.state(&upload.file_id), Some(JobState::Staged));
    }

    #[test]
    fn test_finish_leaves_tombstone() {
        let (_dir, _clock, store) = store();
        let upload = store
            .stage(b"PK", "fleet.xlsx", ".xlsx", ImportType::Vehicle)
            .unwrap();
        store.begin_execute(&upload.file_id).unwrap();
        store.finish_execute(&upload.file_id, JobState::Committed);

        assert!(!upload.path.exists());
        match store.begin_execute(&upload.file_id) {
            Err(ImportError::InvalidState { state, .. }) => assert_eq!(state, JobState::Committed),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_tombstone_past_ttl_is_expired() {
        let (_dir, clock, store) = store();
        let upload = store
            .stage(b"PK", "fleet.xlsx", ".xlsx", ImportType::Vehicle)
            .unwrap();
        store.begin_execute(&upload.file_id).unwrap();
        store.finish_execute(&upload.file_id, JobState::Aborted);

        clock.advance(Duration::minutes(31));
        assert!(matches!(
            store.begin_execute(&upload.file_id),
            Err(ImportError::ExpiredFile(_))
        ));
        assert_eq!(store.state(&upload.file_id), None);
    }

    #[test]
    fn test_running_session_outlives_ttl() {
        let (_dir, clock, store) = store();
        let upload = store
            .stage(b"PK", "fleet.xlsx", ".xlsx", ImportType::Vehicle)
            .unwrap();
        store.begin_execute(&upload.file_id).unwrap();

        clock.advance(Duration::minutes(31));
        assert!(matches!(
            store.begin_execute(&upload.file_id),
            Err(ImportError::Busy(_))
        ));
    }

    #[test]
    fn test_purge_skips_running() {
        let (_dir, clock, store) = store();
        let idle = store
            .stage(b"PK", "a.xlsx", ".xlsx", ImportType::Vehicle)
            .unwrap();
        let busy = store
            .stage(b"PK", "b.xlsx", ".xlsx", ImportType::Vehicle)
            .unwrap();
        store.begin_execute(&busy.file_id).unwrap();

        clock.advance(Duration::hours(1));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.state(&idle.file_id), None);
        assert_eq!(store.state(&busy.file_id), Some(JobState::Running));
        assert!(busy.path.exists());
    }

    #[test]
    fn test_shutdown_removes_staged_files() {
        let (_dir, _clock, store) = store();
        let upload = store
            .stage(b"PK", "a.xlsx", ".xlsx", ImportType::Ecse)
            .unwrap();
        store.shutdown();
        assert!(!upload.path.exists());
    }

    #[tokio::test]
    async fn test_cleaner_task_purges() {
        let (_dir, clock, store) = store();
        let store = Arc::new(store);
        let upload = store
            .stage(b"PK", "a.xlsx", ".xlsx", ImportType::Mileage)
            .unwrap();
        clock.advance(Duration::hours(1));

        let handle = store.spawn_cleaner(std::time::Duration::from_millis(10));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(store.state(&upload.file_id), None);
        assert!(!upload.path.exists());
    }
}
