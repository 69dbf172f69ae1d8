//! sled 后端 - 回退用的扁平键值存储
//!
//! 按扁平 KV 的纪律工作：每个聚合一个键（JSON 值），另维护一个显式的
//! id 索引键。没有二级索引，脏查询靠全量扫描——回退路径以可用性换
//! 查询能力，容量上限（默认 10 个项目）使扫描代价可以接受。

use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;

use crate::error::{LiftauditSDKError, Result};
use crate::storage::backend::StorageBackend;
use crate::storage::entities::ProjectAggregate;

const PROJECTS_TREE: &str = "offline_projects";
const META_TREE: &str = "offline_meta";
/// meta 树里的 id 索引键，值为 JSON 编码的 Vec<String>
const PROJECT_IDS_KEY: &str = "project_ids";

#[derive(Debug)]
pub struct SledBackend {
    _db: Db,
    projects: Tree,
    meta: Tree,
}

impl SledBackend {
    pub fn open(base_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_path)
            .map_err(|e| LiftauditSDKError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        let db = sled::open(base_path)
            .map_err(|e| LiftauditSDKError::Storage(format!("打开 sled 数据库失败: {}", e)))?;
        let projects = db
            .open_tree(PROJECTS_TREE)
            .map_err(|e| LiftauditSDKError::Storage(format!("打开项目 Tree 失败: {}", e)))?;
        let meta = db
            .open_tree(META_TREE)
            .map_err(|e| LiftauditSDKError::Storage(format!("打开 meta Tree 失败: {}", e)))?;

        tracing::info!(path = %base_path.display(), "sled 离线存储已就绪（回退后端）");

        Ok(Self {
            _db: db,
            projects,
            meta,
        })
    }

    fn load_id_index(&self) -> Result<Vec<String>> {
        match self.meta.get(PROJECT_IDS_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| LiftauditSDKError::Serialization(format!("id 索引损坏: {}", e))),
            None => Ok(Vec::new()),
        }
    }

    fn decode(bytes: &[u8]) -> Result<ProjectAggregate> {
        serde_json::from_slice(bytes)
            .map_err(|e| LiftauditSDKError::Serialization(format!("反序列化聚合失败: {}", e)))
    }

    fn map_tx_error(error: TransactionError<String>) -> LiftauditSDKError {
        match error {
            TransactionError::Abort(msg) => LiftauditSDKError::Serialization(msg),
            TransactionError::Storage(e) => LiftauditSDKError::Storage(e.to_string()),
        }
    }
}

#[async_trait]
impl StorageBackend for SledBackend {
    fn name(&self) -> &'static str {
        "sled"
    }

    async fn put(&self, aggregate: &ProjectAggregate) -> Result<()> {
        let bytes = serde_json::to_vec(aggregate)?;
        let id = aggregate.id.clone();

        // 聚合与 id 索引在一个事务里更新，外部观察不到半写状态
        (&self.projects, &self.meta)
            .transaction(move |(projects, meta)| {
                projects.insert(id.as_bytes(), bytes.clone())?;

                let mut ids: Vec<String> = match meta.get(PROJECT_IDS_KEY)? {
                    Some(raw) => serde_json::from_slice(&raw).map_err(|e| {
                        ConflictableTransactionError::Abort(format!("id 索引损坏: {}", e))
                    })?,
                    None => Vec::new(),
                };
                if !ids.iter().any(|existing| existing == &id) {
                    ids.push(id.clone());
                    let encoded = serde_json::to_vec(&ids).map_err(|e| {
                        ConflictableTransactionError::Abort(format!("序列化 id 索引失败: {}", e))
                    })?;
                    meta.insert(PROJECT_IDS_KEY, encoded)?;
                }
                Ok(())
            })
            .map_err(Self::map_tx_error)?;
        Ok(())
    }

    async fn get(&self, project_id: &str) -> Result<Option<ProjectAggregate>> {
        match self.projects.get(project_id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<ProjectAggregate>> {
        let ids = self.load_id_index()?;
        let mut results = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(bytes) = self.projects.get(id.as_bytes())? {
                results.push(Self::decode(&bytes)?);
            }
        }
        results.sort_by(|a, b| b.offline_timestamp.cmp(&a.offline_timestamp));
        Ok(results)
    }

    async fn delete(&self, project_id: &str) -> Result<()> {
        let id = project_id.to_string();
        (&self.projects, &self.meta)
            .transaction(move |(projects, meta)| {
                projects.remove(id.as_bytes())?;

                if let Some(raw) = meta.get(PROJECT_IDS_KEY)? {
                    let ids: Vec<String> = serde_json::from_slice(&raw).map_err(|e| {
                        ConflictableTransactionError::Abort(format!("id 索引损坏: {}", e))
                    })?;
                    let before = ids.len();
                    let remaining: Vec<String> =
                        ids.into_iter().filter(|existing| existing != &id).collect();
                    if remaining.len() != before {
                        let encoded = serde_json::to_vec(&remaining).map_err(|e| {
                            ConflictableTransactionError::Abort(format!(
                                "序列化 id 索引失败: {}",
                                e
                            ))
                        })?;
                        meta.insert(PROJECT_IDS_KEY, encoded)?;
                    }
                }
                Ok(())
            })
            .map_err(Self::map_tx_error)?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.load_id_index()?.len() as u64)
    }

    async fn clear_all(&self) -> Result<()> {
        self.projects.clear()?;
        self.meta.remove(PROJECT_IDS_KEY)?;
        Ok(())
    }

    async fn dirty_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for aggregate in self.get_all().await? {
            if aggregate.has_local_changes {
                ids.push(aggregate.id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_millis;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SledBackend) {
        let dir = TempDir::new().unwrap();
        let backend = SledBackend::open(&dir.path().join("kv")).unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn test_put_maintains_id_index() {
        let (_dir, backend) = open_temp().await;

        backend
            .put(&ProjectAggregate::new("p1", now_millis()))
            .await
            .unwrap();
        backend
            .put(&ProjectAggregate::new("p2", now_millis()))
            .await
            .unwrap();
        // 同 id 重写不重复计数
        backend
            .put(&ProjectAggregate::new("p1", now_millis()))
            .await
            .unwrap();

        assert_eq!(backend.count().await.unwrap(), 2);

        backend.delete("p1").await.unwrap();
        assert_eq!(backend.count().await.unwrap(), 1);
        assert!(backend.get("p1").await.unwrap().is_none());

        // 幂等删除
        backend.delete("p1").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_all_ordering_and_dirty_scan() {
        let (_dir, backend) = open_temp().await;

        let mut dirty = ProjectAggregate::new("dirty", 100);
        dirty.mark_dirty(150);
        backend.put(&dirty).await.unwrap();
        backend.put(&ProjectAggregate::new("clean", 300)).await.unwrap();

        let all = backend.get_all().await.unwrap();
        assert_eq!(all[0].id, "clean");
        assert_eq!(all[1].id, "dirty");

        assert_eq!(backend.dirty_ids().await.unwrap(), vec!["dirty".to_string()]);

        backend.clear_all().await.unwrap();
        assert_eq!(backend.count().await.unwrap(), 0);
        assert!(backend.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_preserves_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv");
        {
            let backend = SledBackend::open(&path).unwrap();
            backend
                .put(&ProjectAggregate::new("persisted", 42))
                .await
                .unwrap();
            // drop 时释放文件锁
        }

        let backend = SledBackend::open(&path).unwrap();
        let loaded = backend.get("persisted").await.unwrap().unwrap();
        assert_eq!(loaded.offline_timestamp, 42);
        assert_eq!(backend.count().await.unwrap(), 1);
    }
}
