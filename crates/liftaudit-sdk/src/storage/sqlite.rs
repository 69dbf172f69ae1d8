//! SQLite 后端 - 首选的事务型索引存储
//!
//! 表结构：聚合整体序列化为 JSON 存入 payload 列；has_local_changes 与
//! offline_timestamp 冗余为独立列，分别承担脏索引查询与淘汰排序，
//! payload 是唯一的数据权威。

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{LiftauditSDKError, Result};
use crate::storage::backend::StorageBackend;
use crate::storage::entities::ProjectAggregate;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS offline_projects (
    project_id        TEXT PRIMARY KEY,
    payload           TEXT NOT NULL,
    has_local_changes INTEGER NOT NULL DEFAULT 0,
    offline_timestamp INTEGER NOT NULL,
    last_synced_at    INTEGER
);
CREATE INDEX IF NOT EXISTS idx_offline_projects_dirty
    ON offline_projects (has_local_changes);
CREATE INDEX IF NOT EXISTS idx_offline_projects_cached_at
    ON offline_projects (offline_timestamp);
"#;

#[derive(Debug)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// 打开（或创建）数据库并建表。失败即视为该后端不可用，
    /// 由上层转入 sled 回退路径。
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LiftauditSDKError::IO(format!("创建存储目录失败: {}", e)))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| LiftauditSDKError::Storage(format!("打开 SQLite 数据库失败: {}", e)))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| LiftauditSDKError::Storage(format!("设置 WAL 失败: {}", e)))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| LiftauditSDKError::Storage(format!("初始化表结构失败: {}", e)))?;

        tracing::info!(path = %db_path.display(), "SQLite 离线存储已就绪");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        // 锁被毒化说明某次写入 panic 过；连接本身仍可用，继续使用
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn decode_row(payload: &str) -> Result<ProjectAggregate> {
        serde_json::from_str(payload)
            .map_err(|e| LiftauditSDKError::Serialization(format!("反序列化聚合失败: {}", e)))
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn put(&self, aggregate: &ProjectAggregate) -> Result<()> {
        let payload = serde_json::to_string(aggregate)
            .map_err(|e| LiftauditSDKError::Serialization(format!("序列化聚合失败: {}", e)))?;

        let conn = self.lock_conn();
        conn.execute(
            r#"
            INSERT INTO offline_projects (
                project_id, payload, has_local_changes, offline_timestamp, last_synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(project_id) DO UPDATE SET
                payload = excluded.payload,
                has_local_changes = excluded.has_local_changes,
                offline_timestamp = excluded.offline_timestamp,
                last_synced_at = excluded.last_synced_at
            "#,
            params![
                aggregate.id,
                payload,
                aggregate.has_local_changes as i64,
                aggregate.offline_timestamp,
                aggregate.last_synced_at,
            ],
        )?;

        Ok(())
    }

    async fn get(&self, project_id: &str) -> Result<Option<ProjectAggregate>> {
        let conn = self.lock_conn();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM offline_projects WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(payload) => Ok(Some(Self::decode_row(&payload)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<ProjectAggregate>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT payload FROM offline_projects ORDER BY offline_timestamp DESC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(Self::decode_row(&row?)?);
        }
        Ok(results)
    }

    async fn delete(&self, project_id: &str) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM offline_projects WHERE project_id = ?1",
            params![project_id],
        )?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let conn = self.lock_conn();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM offline_projects", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    async fn clear_all(&self) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute("DELETE FROM offline_projects", [])?;
        Ok(())
    }

    async fn dirty_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT project_id FROM offline_projects WHERE has_local_changes = 1
             ORDER BY offline_timestamp DESC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}
