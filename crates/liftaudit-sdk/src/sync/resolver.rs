//! 权威判定器 - 打开项目时在本地副本与服务端副本之间做选择
//!
//! 每次打开项目界面都重新评估一次状态机：
//!
//! - **DirtyLocal**: 本地有脏副本 → 它就是权威，不拉取、不覆盖，
//!   直到同步成功为止。这是全子系统的核心不变量：联网刷新永远
//!   不能冲掉未同步的本地修改。
//! - **CleanLocal**: 本地有干净副本。在线则拉取刷新并覆盖；离线则
//!   按原样使用本地副本。
//! - **NoLocalCopy**: 本地没有。在线则拉取并以干净状态缓存；离线则
//!   报"离线不可用"（终态，用户可见）。
//!
//! 在线拉取失败时：有本地副本就回退到它；没有则把失败上报——
//! "拉取失败"与"服务端不存在"是两种不同的错误，UI 要据此决定
//! 提供重试还是提供离线模式。

use std::sync::Arc;

use crate::error::{LiftauditSDKError, Result};
use crate::events::{EventBus, SdkEvent};
use crate::network::transport::{FetchError, ProjectTransport};
use crate::network::ConnectivityMonitor;
use crate::storage::entities::ProjectAggregate;
use crate::storage::OfflineStore;
use crate::utils::now_millis;

/// 权威副本的来源（UI 可据此提示"正在查看离线副本"等）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectSource {
    /// 本地脏副本（未同步的修改，服务端副本被拒绝）
    LocalDirty,
    /// 本地干净副本（离线、或在线但拉取失败时的回退）
    LocalClean,
    /// 刚从服务端拉取的新副本
    Server,
}

/// 判定结果：权威聚合 + 其来源
#[derive(Debug, Clone)]
pub struct ResolvedProject {
    pub aggregate: ProjectAggregate,
    pub source: ProjectSource,
}

#[derive(Debug, Clone)]
pub struct AuthorityResolver {
    store: Arc<OfflineStore>,
    transport: Arc<dyn ProjectTransport>,
    connectivity: Arc<ConnectivityMonitor>,
    events: EventBus,
}

impl AuthorityResolver {
    pub fn new(
        store: Arc<OfflineStore>,
        transport: Arc<dyn ProjectTransport>,
        connectivity: Arc<ConnectivityMonitor>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            transport,
            connectivity,
            events,
        }
    }

    /// 打开项目：执行一轮状态机评估，返回权威副本
    pub async fn open_project(&self, project_id: &str) -> Result<ResolvedProject> {
        let local = self.store.get(project_id).await?;

        // DirtyLocal：无条件使用本地副本，在线与否都不拉取
        if let Some(aggregate) = &local {
            if aggregate.has_local_changes {
                tracing::debug!(project_id, "本地副本有未同步修改，跳过服务端刷新");
                return Ok(ResolvedProject {
                    aggregate: aggregate.clone(),
                    source: ProjectSource::LocalDirty,
                });
            }
        }

        if !self.connectivity.is_online() {
            return match local {
                // CleanLocal + 离线：按原样使用
                Some(aggregate) => Ok(ResolvedProject {
                    aggregate,
                    source: ProjectSource::LocalClean,
                }),
                // NoLocalCopy + 离线：终态
                None => Err(LiftauditSDKError::NotAvailableOffline(
                    project_id.to_string(),
                )),
            };
        }

        // 在线：尝试刷新
        match self.transport.fetch_project(project_id).await {
            Ok(fetched) => self.persist_server_copy(project_id, fetched, local).await,
            Err(FetchError::NotFound) => match local {
                Some(aggregate) => {
                    // 服务端已无此项目但本地还有干净缓存：继续提供缓存，
                    // 删除与否交给用户（"清除离线数据"）
                    tracing::warn!(project_id, "服务端已不存在该项目，回退到本地缓存副本");
                    Ok(ResolvedProject {
                        aggregate,
                        source: ProjectSource::LocalClean,
                    })
                }
                None => Err(LiftauditSDKError::ProjectNotFound(project_id.to_string())),
            },
            Err(FetchError::Unreachable(msg)) => match local {
                Some(aggregate) => {
                    tracing::warn!(project_id, error = %msg, "拉取失败，回退到本地缓存副本");
                    Ok(ResolvedProject {
                        aggregate,
                        source: ProjectSource::LocalClean,
                    })
                }
                None => Err(LiftauditSDKError::FetchFailed(msg)),
            },
        }
    }

    /// 把服务端副本以干净状态落盘并返回。
    /// 落盘失败不致命（本次会话仍可展示拉到的数据），只是离线不可用。
    async fn persist_server_copy(
        &self,
        project_id: &str,
        mut fetched: ProjectAggregate,
        local: Option<ProjectAggregate>,
    ) -> Result<ResolvedProject> {
        let now = now_millis();
        fetched.mark_clean();
        fetched.last_synced_at = Some(now);
        // offline_timestamp 表示"首次缓存时间"，刷新不重置
        fetched.offline_timestamp = local.map(|l| l.offline_timestamp).unwrap_or(now);

        match self.store.put(&fetched).await {
            Ok(evicted) => {
                for id in evicted {
                    self.events.emit(SdkEvent::ProjectEvicted { project_id: id });
                }
                self.events.emit(SdkEvent::ProjectCached {
                    project_id: project_id.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(project_id, error = %e, "服务端副本缓存失败，本次仅在线可用");
            }
        }

        Ok(ResolvedProject {
            aggregate: fetched,
            source: ProjectSource::Server,
        })
    }

    /// 所有离线缓存的项目（最近缓存在前），供"离线项目列表"界面使用
    pub async fn list_offline_projects(&self) -> Result<Vec<ProjectAggregate>> {
        self.store.get_all().await
    }
}
