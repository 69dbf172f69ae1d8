//! 同步回放器 - 把脏项目的设备子聚合整批推送回服务端
//!
//! 推成功后删除本地影子副本（而不是原地改成干净）：删除更简单，也
//! 排除了"本地声称干净、实际已与服务端写入后状态悄悄分叉"这类
//! bug（服务端落库时的默认值/校验可能改写数据）。代价是下次打开多
//! 一次全量拉取——对低频、用户触发的操作是可接受的取舍。
//!
//! 失败时本地脏副本一个字节都不动，留给下一次重试；批量推送从本
//! 组件视角是全有或全无，不做按设备/楼层的部分提交。

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::error::Result;
use crate::events::{EventBus, SdkEvent};
use crate::network::transport::ProjectTransport;
use crate::network::ConnectivityMonitor;
use crate::storage::OfflineStore;
use crate::sync::retry_policy::{RetryPolicy, SyncFailureReason};
use crate::sync::{ProjectSyncReport, SyncOutcome, SyncState};
use crate::utils::now_millis;

#[derive(Debug, Clone)]
pub struct SyncReplayer {
    store: Arc<OfflineStore>,
    transport: Arc<dyn ProjectTransport>,
    connectivity: Arc<ConnectivityMonitor>,
    events: EventBus,
    retry_policy: RetryPolicy,
    /// 显式同步状态 {Idle, Syncing} + 最近成功时间，供 UI 查询
    state: Arc<RwLock<SyncState>>,
    last_sync_at: Arc<RwLock<Option<i64>>>,
    /// 每个项目一把锁，防止同一项目被并发重复推送
    project_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SyncReplayer {
    pub fn new(
        store: Arc<OfflineStore>,
        transport: Arc<dyn ProjectTransport>,
        connectivity: Arc<ConnectivityMonitor>,
        events: EventBus,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            transport,
            connectivity,
            events,
            retry_policy,
            state: Arc::new(RwLock::new(SyncState::Idle)),
            last_sync_at: Arc::new(RwLock::new(None)),
            project_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn state(&self) -> SyncState {
        *self.state.read().await
    }

    pub async fn last_sync_at(&self) -> Option<i64> {
        *self.last_sync_at.read().await
    }

    /// 失败后建议的下次重试时间（UTC 秒）；不可重试返回 None
    pub fn next_retry_at(&self, retry_count: u32, reason: &SyncFailureReason) -> Option<u64> {
        self.retry_policy.next_retry_at(retry_count, reason)
    }

    async fn project_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.project_locks.lock().await;
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 同步单个项目。
    ///
    /// 前置条件：项目在本地存在且有未同步修改；否则返回
    /// [`SyncOutcome::NothingToSync`]（上报而非抛错——调用方可以
    /// 投机性地调用）。失败同样以 [`SyncOutcome::Failed`] 上报，
    /// 本地状态保持原样。
    pub async fn sync_project(&self, project_id: &str) -> Result<SyncOutcome> {
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        // 拿到锁后重读：前一个持锁者可能刚同步完并删除了副本
        let aggregate = match self.store.get(project_id).await? {
            Some(aggregate) => aggregate,
            None => return Ok(SyncOutcome::NothingToSync),
        };
        if !aggregate.has_local_changes {
            return Ok(SyncOutcome::NothingToSync);
        }

        if !self.connectivity.is_online() {
            tracing::debug!(project_id, "当前离线，跳过同步");
            return Ok(SyncOutcome::Failed {
                reason: SyncFailureReason::NetworkUnavailable,
            });
        }

        *self.state.write().await = SyncState::Syncing;
        self.events.emit(SdkEvent::SyncStarted {
            project_id: project_id.to_string(),
        });
        tracing::info!(
            project_id,
            equipments = aggregate.equipments.len(),
            "开始推送本地修改"
        );

        let push_result = self
            .transport
            .push_equipments(project_id, &aggregate.equipments)
            .await;
        *self.state.write().await = SyncState::Idle;

        match push_result {
            Ok(()) => {
                let pushed = aggregate.equipments.len();
                // 整批确认后才删除本地影子；下次打开走 NoLocalCopy
                // 路径从服务端重新播种
                self.store.delete(project_id).await?;
                *self.last_sync_at.write().await = Some(now_millis());

                tracing::info!(project_id, pushed, "同步完成，本地影子副本已删除");
                self.events.emit(SdkEvent::SyncSucceeded {
                    project_id: project_id.to_string(),
                    pushed_equipments: pushed,
                });
                Ok(SyncOutcome::Synced {
                    pushed_equipments: pushed,
                })
            }
            Err(e) => {
                let reason: SyncFailureReason = e.into();
                tracing::warn!(project_id, reason = %reason.describe(), "推送失败，本地脏副本保留");
                self.events.emit(SdkEvent::SyncFailed {
                    project_id: project_id.to_string(),
                    reason: reason.describe(),
                });
                Ok(SyncOutcome::Failed { reason })
            }
        }
    }

    /// 同步所有脏项目，返回逐项目报告。
    /// 单个项目失败不中断整批（各项目相互独立，无跨项目顺序保证）。
    pub async fn sync_all(&self) -> Result<Vec<ProjectSyncReport>> {
        let dirty = self.store.dirty_ids().await?;
        if dirty.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(count = dirty.len(), "开始批量同步脏项目");
        let mut reports = Vec::with_capacity(dirty.len());
        for project_id in dirty {
            let outcome = self.sync_project(&project_id).await?;
            reports.push(ProjectSyncReport {
                project_id,
                outcome,
                finished_at: now_millis(),
            });
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::network::test_helpers::DummyConnectivityListener;
    use crate::network::transport::test_helpers::MockTransport;
    use crate::storage::entities::{EquipmentRecord, FloorRecord, ProjectAggregate};
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<OfflineStore>,
        transport: Arc<MockTransport>,
        monitor: Arc<ConnectivityMonitor>,
        replayer: SyncReplayer,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(OfflineStore::open_in(dir.path()).await.unwrap());
        let transport = Arc::new(MockTransport::default());
        let listener = Arc::new(DummyConnectivityListener::default());
        let monitor = Arc::new(
            ConnectivityMonitor::new(listener, dir.path()).await.unwrap(),
        );
        let replayer = SyncReplayer::new(
            store.clone(),
            transport.clone(),
            monitor.clone(),
            EventBus::default(),
            RetryPolicy::default(),
        );
        Fixture {
            _dir: dir,
            store,
            transport,
            monitor,
            replayer,
        }
    }

    fn dirty_project(id: &str) -> ProjectAggregate {
        let mut floor = FloorRecord::new("f1");
        floor.set_field("designation", json!("L1"));
        let mut equipment = EquipmentRecord::new("e1");
        equipment.floors.push(floor);
        let mut project = ProjectAggregate::new(id, 1_000);
        project.equipments.push(equipment);
        project.mark_dirty(2_000);
        project
    }

    #[tokio::test]
    async fn test_sync_pushes_batch_and_deletes_shadow() {
        let f = fixture().await;
        f.store.put(&dirty_project("p1")).await.unwrap();

        let outcome = f.replayer.sync_project("p1").await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { pushed_equipments: 1 });

        // 整个设备子聚合作为一个批次到达
        let pushed = f.transport.pushed.lock().await;
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0, "p1");
        assert_eq!(pushed[0].1[0].id, "e1");

        // 本地影子已删除
        assert!(f.store.get("p1").await.unwrap().is_none());
        assert!(f.replayer.last_sync_at().await.is_some());
        assert_eq!(f.replayer.state().await, SyncState::Idle);
    }

    #[tokio::test]
    async fn test_sync_missing_or_clean_is_nothing_to_sync() {
        let f = fixture().await;

        assert_eq!(
            f.replayer.sync_project("ghost").await.unwrap(),
            SyncOutcome::NothingToSync
        );

        let mut clean = dirty_project("p1");
        clean.mark_clean();
        f.store.put(&clean).await.unwrap();
        assert_eq!(
            f.replayer.sync_project("p1").await.unwrap(),
            SyncOutcome::NothingToSync
        );
        // 干净副本不被触碰
        assert!(f.store.get("p1").await.unwrap().is_some());
        assert!(f.transport.pushed.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_sync_failure_preserves_state_byte_for_byte() {
        let f = fixture().await;
        let project = dirty_project("p1");
        f.store.put(&project).await.unwrap();
        let before = serde_json::to_value(f.store.get("p1").await.unwrap().unwrap()).unwrap();

        f.transport.set_fail_push(true);
        let outcome = f.replayer.sync_project("p1").await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));

        // 存储内容逐字节一致（JSON 序列化比对，含脏标记与嵌套内容）
        let after = serde_json::to_value(f.store.get("p1").await.unwrap().unwrap()).unwrap();
        assert_eq!(before, after);

        // 失败后可重试：修好网络再同步成功
        f.transport.set_fail_push(false);
        let outcome = f.replayer.sync_project("p1").await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { pushed_equipments: 1 });
    }

    #[tokio::test]
    async fn test_sync_while_offline_reports_failure_without_push() {
        let f = fixture().await;
        f.store.put(&dirty_project("p1")).await.unwrap();
        f.monitor.set_offline_override(true).await.unwrap();

        let outcome = f.replayer.sync_project("p1").await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Failed {
                reason: SyncFailureReason::NetworkUnavailable
            }
        );
        assert!(f.transport.pushed.lock().await.is_empty());
        assert!(f.store.get("p1").await.unwrap().unwrap().has_local_changes);
    }

    #[tokio::test]
    async fn test_sync_all_reports_per_project() {
        let f = fixture().await;
        f.store.put(&dirty_project("p1")).await.unwrap();
        f.store.put(&dirty_project("p2")).await.unwrap();
        let mut clean = dirty_project("p3");
        clean.mark_clean();
        f.store.put(&clean).await.unwrap();

        let reports = f.replayer.sync_all().await.unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports
            .iter()
            .all(|r| matches!(r.outcome, SyncOutcome::Synced { .. })));

        // 干净项目未被触及
        assert!(f.store.get("p3").await.unwrap().is_some());
        assert_eq!(f.store.dirty_ids().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sync_single_flight() {
        let f = fixture().await;
        f.store.put(&dirty_project("p1")).await.unwrap();

        let r1 = {
            let replayer = f.replayer.clone();
            tokio::spawn(async move { replayer.sync_project("p1").await.unwrap() })
        };
        let r2 = {
            let replayer = f.replayer.clone();
            tokio::spawn(async move { replayer.sync_project("p1").await.unwrap() })
        };
        let (a, b) = (r1.await.unwrap(), r2.await.unwrap());

        // 一个推成功，另一个看到副本已删而无事可做；决不能推两次
        let synced = [&a, &b]
            .iter()
            .filter(|o| matches!(o, SyncOutcome::Synced { .. }))
            .count();
        assert_eq!(synced, 1);
        assert_eq!(f.transport.pushed.lock().await.len(), 1);
    }
}
