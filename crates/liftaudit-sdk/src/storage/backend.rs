//! 存储后端抽象
//!
//! 两个后端（SQLite 事务型索引存储 / sled 扁平 KV 存储）实现同一 trait，
//! 后端差异集中在各自的实现文件里，调用方永远只面对这一个接口——
//! 会话期间只使用启动时探测选定的那一个，绝不中途切换。

use async_trait::async_trait;

use crate::error::Result;
use crate::storage::entities::ProjectAggregate;

#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// 后端名称（"sqlite" / "sled"），用于日志与统计展示
    fn name(&self) -> &'static str;

    /// 按 id 插入或整体替换（upsert）。从调用方视角原子：
    /// 要么聚合与其索引项一起写入，要么什么都没写。
    async fn put(&self, aggregate: &ProjectAggregate) -> Result<()>;

    /// 缺失 id 返回 Ok(None)，不是错误
    async fn get(&self, project_id: &str) -> Result<Option<ProjectAggregate>>;

    /// 全部缓存聚合，按 offline_timestamp 降序（最近缓存在前）
    async fn get_all(&self) -> Result<Vec<ProjectAggregate>>;

    /// 幂等删除：id 不存在也返回 Ok
    async fn delete(&self, project_id: &str) -> Result<()>;

    async fn count(&self) -> Result<u64>;

    async fn clear_all(&self) -> Result<()>;

    /// 所有 has_local_changes == true 的项目 id（"N 个项目有未同步修改"）
    async fn dirty_ids(&self) -> Result<Vec<String>>;
}
