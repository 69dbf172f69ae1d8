//! 存储模块 - 离线项目聚合的持久化层
//!
//! 分层设计：
//! - OfflineStore: 统一入口，启动时探测并选定后端，执行容量淘汰策略
//! - StorageBackend: 后端抽象，SQLite（事务型索引存储）与 sled（扁平 KV）
//! - Entities: 项目聚合及嵌套的设备/楼层/清单实体
//!
//! 后端在构造时探测一次：SQLite 优先，失败则回退 sled，两者都失败才
//! 报 StorageUnavailable。选定后整个会话不再切换，避免脑裂读。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{LiftauditSDKError, Result};

pub mod backend;
pub mod entities;
pub mod kv;
pub mod sqlite;

pub use backend::StorageBackend;
pub use entities::{ChecklistAnswer, EquipmentRecord, FieldMap, FloorRecord, ProjectAggregate};

/// 本地最多缓存的项目数（超出后按 offline_timestamp 淘汰最旧的非脏聚合）
pub const DEFAULT_MAX_CACHED_PROJECTS: usize = 10;

/// 存储统计信息（配额/界面展示用）
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub backend: &'static str,
    pub cached_projects: u64,
    pub dirty_projects: u64,
    pub max_cached_projects: usize,
}

/// 本地项目存储 - 以项目 id 为主键的聚合持久化
#[derive(Debug, Clone)]
pub struct OfflineStore {
    backend: Arc<dyn StorageBackend>,
    max_cached_projects: usize,
}

impl OfflineStore {
    /// 探测并打开存储后端。
    ///
    /// 探测只发生在这里：SQLite 打不开（目录只读、文件损坏等）时回退
    /// sled；sled 也失败则离线能力整体不可用，应用应继续纯在线模式。
    pub async fn open(base_path: &Path, max_cached_projects: usize) -> Result<Self> {
        let backend = Self::probe_backend(base_path)?;
        Ok(Self {
            backend,
            max_cached_projects: max_cached_projects.max(1),
        })
    }

    fn probe_backend(base_path: &Path) -> Result<Arc<dyn StorageBackend>> {
        match sqlite::SqliteBackend::open(&base_path.join("offline.db")) {
            Ok(primary) => Ok(Arc::new(primary)),
            Err(e) => {
                tracing::warn!(error = %e, "SQLite 后端不可用，回退到 sled");
                match kv::SledBackend::open(&base_path.join("kv")) {
                    Ok(fallback) => Ok(Arc::new(fallback)),
                    Err(fallback_err) => Err(LiftauditSDKError::StorageUnavailable(format!(
                        "sqlite: {}, sled: {}",
                        e, fallback_err
                    ))),
                }
            }
        }
    }

    /// 测试/演示用：在指定目录下直接构造（仍走探测路径）
    pub async fn open_in(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open(&dir.into(), DEFAULT_MAX_CACHED_PROJECTS).await
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// 插入或整体替换聚合，随后执行容量淘汰。
    /// 返回本次被淘汰的项目 id（可能为空）。
    ///
    /// 写入前断言脏标记不变量：带脏标记却没有变更时间戳（或反之）的
    /// 聚合一律拒绝落盘。
    pub async fn put(&self, aggregate: &ProjectAggregate) -> Result<Vec<String>> {
        if !aggregate.invariant_holds() {
            return Err(LiftauditSDKError::Storage(format!(
                "聚合 {} 违反脏标记不变量 (has_local_changes={}, last_local_change_at={:?})",
                aggregate.id, aggregate.has_local_changes, aggregate.last_local_change_at
            )));
        }

        self.backend.put(aggregate).await?;
        self.enforce_capacity().await
    }

    pub async fn get(&self, project_id: &str) -> Result<Option<ProjectAggregate>> {
        self.backend.get(project_id).await
    }

    pub async fn get_all(&self) -> Result<Vec<ProjectAggregate>> {
        self.backend.get_all().await
    }

    pub async fn delete(&self, project_id: &str) -> Result<()> {
        self.backend.delete(project_id).await
    }

    pub async fn count(&self) -> Result<u64> {
        self.backend.count().await
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.backend.clear_all().await
    }

    pub async fn dirty_ids(&self) -> Result<Vec<String>> {
        self.backend.dirty_ids().await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            backend: self.backend.name(),
            cached_projects: self.backend.count().await?,
            dirty_projects: self.backend.dirty_ids().await?.len() as u64,
            max_cached_projects: self.max_cached_projects,
        })
    }

    /// 容量淘汰：超出上限时删除最旧（offline_timestamp 最小）的非脏
    /// 聚合。脏聚合承载未同步的用户工作，永远不淘汰——全是脏数据时
    /// 允许超出上限并告警。
    async fn enforce_capacity(&self) -> Result<Vec<String>> {
        let count = self.backend.count().await? as usize;
        if count <= self.max_cached_projects {
            return Ok(Vec::new());
        }

        let mut excess = count - self.max_cached_projects;
        let all = self.backend.get_all().await?;

        let mut evicted = Vec::new();
        // get_all 按缓存时间降序，从尾部（最旧）开始淘汰
        for aggregate in all.iter().rev() {
            if excess == 0 {
                break;
            }
            if aggregate.has_local_changes {
                continue;
            }
            self.backend.delete(&aggregate.id).await?;
            tracing::debug!(project_id = %aggregate.id, "已淘汰最旧的离线项目");
            evicted.push(aggregate.id.clone());
            excess -= 1;
        }

        if excess > 0 {
            tracing::warn!(
                over_capacity = excess,
                "缓存超出上限但剩余项目均有未同步修改，跳过淘汰"
            );
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_millis;
    use tempfile::TempDir;

    async fn open_store(cap: usize) -> (TempDir, OfflineStore) {
        let dir = TempDir::new().unwrap();
        let store = OfflineStore::open(dir.path(), cap).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_probe_prefers_sqlite() {
        let (_dir, store) = open_store(10).await;
        assert_eq!(store.backend_name(), "sqlite");
    }

    #[tokio::test]
    async fn test_probe_falls_back_to_sled() {
        let dir = TempDir::new().unwrap();
        // 在预期的数据库文件路径上放一个目录，SQLite 打开必然失败
        std::fs::create_dir_all(dir.path().join("offline.db")).unwrap();

        let store = OfflineStore::open(dir.path(), 10).await.unwrap();
        assert_eq!(store.backend_name(), "sled");

        // 回退后端功能完整
        store
            .put(&ProjectAggregate::new("p1", now_millis()))
            .await
            .unwrap();
        assert!(store.get("p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_put_rejects_invariant_violation() {
        let (_dir, store) = open_store(10).await;

        let mut broken = ProjectAggregate::new("bad", now_millis());
        broken.has_local_changes = true; // 绕过 mark_dirty，不带时间戳

        assert!(store.put(&broken).await.is_err());
        assert!(store.get("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eviction_oldest_clean_first() {
        let (_dir, store) = open_store(2).await;

        store.put(&ProjectAggregate::new("oldest", 100)).await.unwrap();
        store.put(&ProjectAggregate::new("mid", 200)).await.unwrap();
        let evicted = store.put(&ProjectAggregate::new("new", 300)).await.unwrap();

        assert_eq!(evicted, vec!["oldest".to_string()]);
        assert_eq!(store.count().await.unwrap(), 2);
        assert!(store.get("oldest").await.unwrap().is_none());
        assert!(store.get("mid").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_eviction_never_drops_dirty() {
        let (_dir, store) = open_store(2).await;

        // 最旧的是脏聚合
        let mut dirty = ProjectAggregate::new("dirty-oldest", 100);
        dirty.mark_dirty(150);
        store.put(&dirty).await.unwrap();
        store.put(&ProjectAggregate::new("clean-mid", 200)).await.unwrap();

        let evicted = store
            .put(&ProjectAggregate::new("clean-new", 300))
            .await
            .unwrap();

        // 淘汰跳过了更旧的脏聚合，删掉次旧的干净聚合
        assert_eq!(evicted, vec!["clean-mid".to_string()]);
        assert!(store.get("dirty-oldest").await.unwrap().is_some());
        assert!(store.get("clean-new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_all_dirty_exceeds_capacity_without_eviction() {
        let (_dir, store) = open_store(1).await;

        for (id, ts) in [("d1", 100), ("d2", 200)] {
            let mut p = ProjectAggregate::new(id, ts);
            p.mark_dirty(ts + 1);
            let evicted = store.put(&p).await.unwrap();
            assert!(evicted.is_empty());
        }
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stats() {
        let (_dir, store) = open_store(5).await;

        let mut dirty = ProjectAggregate::new("d", 100);
        dirty.mark_dirty(110);
        store.put(&dirty).await.unwrap();
        store.put(&ProjectAggregate::new("c", 200)).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.backend, "sqlite");
        assert_eq!(stats.cached_projects, 2);
        assert_eq!(stats.dirty_projects, 1);
        assert_eq!(stats.max_cached_projects, 5);
    }
}
