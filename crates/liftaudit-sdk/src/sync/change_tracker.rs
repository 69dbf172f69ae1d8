//! 变更追踪器 - 本地修改的脏标记簿记
//!
//! 所有本地发起的聚合修改都必须经过这里，调用点不可能忘记脏标记：
//! 读取当前快照 → 应用修改 → 盖脏标记与变更时间 → 落盘，四步在
//! 每项目一把的互斥锁内完成，保证同一项目的修改严格有序（后一次
//! 修改一定建立在前一次已落盘的快照上，不存在拿着过期内存副本的
//! "最后写入者赢"）。
//!
//! 修改是合并式的，不是排队式的：嵌套集合按子记录 id 合并（替换命中
//! 的那一条、保留其余），字段级修改在被改的子对象上浅合并——快速
//! 连续编辑字段 A、字段 B 的用户不会丢掉 A 的修改。

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::events::{EventBus, SdkEvent};
use crate::storage::entities::ProjectAggregate;
use crate::storage::OfflineStore;
use crate::utils::now_millis;

#[derive(Debug, Clone)]
pub struct ChangeTracker {
    store: Arc<OfflineStore>,
    events: EventBus,
    /// 每个项目一把修改锁，保证单项目内读-改-写的严格顺序
    mutation_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ChangeTracker {
    pub fn new(store: Arc<OfflineStore>, events: EventBus) -> Self {
        Self {
            store,
            events,
            mutation_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn mutation_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.mutation_locks.lock().await;
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 应用一次本地修改。
    ///
    /// 项目未缓存时从空聚合起步（"新增设备"场景：项目尚未打开过，
    /// 但用户已经在离线状态下创建内容）。
    ///
    /// 返回 `Ok(true)` 表示已持久化；`Ok(false)` 表示后端写入失败，
    /// 本次修改**不保证持久**，调用方可重试或提示用户。存储层写失败
    /// 不作为异常向上抛，避免击穿 UI。
    pub async fn apply_local_mutation<F>(&self, project_id: &str, mutator: F) -> Result<bool>
    where
        F: FnOnce(&mut ProjectAggregate),
    {
        let lock = self.mutation_lock(project_id).await;
        let _guard = lock.lock().await;

        let now = now_millis();
        // 关键：合并总是基于存储里的最新快照，不信任调用方手里的副本
        let mut aggregate = match self.store.get(project_id).await? {
            Some(existing) => existing,
            None => ProjectAggregate::new(project_id, now),
        };

        mutator(&mut aggregate);
        aggregate.mark_dirty(now);

        match self.store.put(&aggregate).await {
            Ok(evicted) => {
                for id in evicted {
                    self.events.emit(SdkEvent::ProjectEvicted { project_id: id });
                }
                self.events.emit(SdkEvent::LocalChangeSaved {
                    project_id: project_id.to_string(),
                    changed_at: now,
                });
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(project_id, error = %e, "本地修改落盘失败");
                self.events.emit(SdkEvent::LocalChangeNotDurable {
                    project_id: project_id.to_string(),
                });
                Ok(false)
            }
        }
    }

    /// 仅更新同步时间戳的元数据触达。
    ///
    /// 刻意不走 [`apply_local_mutation`]：时间戳触达不是内容修改，
    /// 不能置脏——否则一次"刷新同步时间"就会把干净副本错标成有
    /// 未同步修改。项目未缓存时无事可做，返回 `Ok(false)`。
    pub async fn touch_sync_timestamp(&self, project_id: &str) -> Result<bool> {
        let lock = self.mutation_lock(project_id).await;
        let _guard = lock.lock().await;

        let mut aggregate = match self.store.get(project_id).await? {
            Some(existing) => existing,
            None => return Ok(false),
        };

        aggregate.last_synced_at = Some(now_millis());
        // 脏标记与变更时间保持原样

        match self.store.put(&aggregate).await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(project_id, error = %e, "同步时间戳更新失败");
                Ok(false)
            }
        }
    }
}
