//! 统一 SDK 接口 - LiftauditSDK 主入口
//!
//! 分层架构设计：
//! ```text
//! LiftauditSDK (对 UI 暴露的门面)
//!   ├── AuthorityResolver (权威判定层)
//!   ├── ChangeTracker / EditCoalescer (变更追踪层)
//!   ├── SyncReplayer (同步回放层)
//!   ├── OfflineStore (存储管理层)
//!   ├── ConnectivityMonitor (网络监控层)
//!   └── EventBus (事件系统层)
//! ```
//!
//! 生命周期显式：`initialize` 创建全部组件并持有，`shutdown` 落盘
//! 残留编辑并停止后台任务。没有模块级单例，进程里可以并存多个
//! 实例（各用各的数据目录）。

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::error::{LiftauditSDKError, Result};
use crate::events::{EventBus, SdkEvent};
use crate::network::{
    ConnectivityListener, ConnectivityMonitor, ConnectivityStatus, ProjectTransport,
};
use crate::storage::entities::ProjectAggregate;
use crate::storage::{OfflineStore, StoreStats, DEFAULT_MAX_CACHED_PROJECTS};
use crate::sync::{
    AuthorityResolver, ChangeTracker, CoalescerConfig, EditCoalescer, ProjectSyncReport,
    ResolvedProject, RetryPolicy, SyncOutcome, SyncReplayer, SyncState,
};

/// 默认连通性监听器（假设网络始终在线）。
/// 实际应用应由平台层提供真实的网络信号实现。
#[derive(Debug, Default)]
struct AlwaysOnlineListener;

#[async_trait]
impl ConnectivityListener for AlwaysOnlineListener {
    async fn current_status(&self) -> ConnectivityStatus {
        ConnectivityStatus::Online
    }

    async fn start_monitoring(&self) -> Result<broadcast::Receiver<ConnectivityStatus>> {
        let (_tx, rx) = broadcast::channel(1);
        Ok(rx)
    }

    async fn stop_monitoring(&self) {}
}

/// SDK 配置
#[derive(Debug, Clone)]
pub struct LiftauditConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 本地最多缓存的项目数
    pub max_cached_projects: usize,
    /// 编辑合并的防抖窗口（毫秒）
    pub debounce_ms: u64,
    /// 编辑合并的空闲落盘窗口（毫秒）
    pub idle_save_ms: u64,
    /// 事件缓冲区大小
    pub event_buffer_size: usize,
    /// 同步失败的重试策略（只产出建议，不自动重试）
    pub retry_policy: RetryPolicy,
}

impl LiftauditConfig {
    pub fn builder() -> LiftauditConfigBuilder {
        LiftauditConfigBuilder::default()
    }

    fn coalescer_config(&self) -> CoalescerConfig {
        CoalescerConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            idle_save: Duration::from_millis(self.idle_save_ms),
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct LiftauditConfigBuilder {
    data_dir: Option<PathBuf>,
    max_cached_projects: Option<usize>,
    debounce_ms: Option<u64>,
    idle_save_ms: Option<u64>,
    event_buffer_size: Option<usize>,
    retry_policy: Option<RetryPolicy>,
}

impl LiftauditConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn max_cached_projects(mut self, max: usize) -> Self {
        self.max_cached_projects = Some(max);
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = Some(ms);
        self
    }

    pub fn idle_save_ms(mut self, ms: u64) -> Self {
        self.idle_save_ms = Some(ms);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<LiftauditConfig> {
        let data_dir = self
            .data_dir
            .ok_or_else(|| LiftauditSDKError::Config("data_dir 未配置".into()))?;
        Ok(LiftauditConfig {
            data_dir,
            max_cached_projects: self
                .max_cached_projects
                .unwrap_or(DEFAULT_MAX_CACHED_PROJECTS),
            debounce_ms: self.debounce_ms.unwrap_or(150),
            idle_save_ms: self.idle_save_ms.unwrap_or(300),
            event_buffer_size: self.event_buffer_size.unwrap_or(256),
            retry_policy: self.retry_policy.unwrap_or_default(),
        })
    }
}

/// 项目离线状态（只读展示字段）
#[derive(Debug, Clone)]
pub struct ProjectStatus {
    pub project_id: String,
    pub has_local_changes: bool,
    pub last_local_change_at: Option<i64>,
    pub last_synced_at: Option<i64>,
    pub offline_timestamp: i64,
}

/// Liftaudit 离线 SDK
#[derive(Debug)]
pub struct LiftauditSDK {
    store: Arc<OfflineStore>,
    connectivity: Arc<ConnectivityMonitor>,
    tracker: ChangeTracker,
    resolver: AuthorityResolver,
    replayer: SyncReplayer,
    coalescer: EditCoalescer,
    events: EventBus,
    shutting_down: AtomicBool,
}

impl LiftauditSDK {
    /// 初始化 SDK（使用默认的"始终在线"连通性监听器）
    pub async fn initialize(
        config: LiftauditConfig,
        transport: Arc<dyn ProjectTransport>,
    ) -> Result<Arc<Self>> {
        Self::initialize_with_listener(config, transport, Arc::new(AlwaysOnlineListener)).await
    }

    /// 初始化 SDK，由平台层提供真实的连通性信号
    pub async fn initialize_with_listener(
        config: LiftauditConfig,
        transport: Arc<dyn ProjectTransport>,
        listener: Arc<dyn ConnectivityListener>,
    ) -> Result<Arc<Self>> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .map_err(|e| LiftauditSDKError::IO(format!("创建数据目录失败: {}", e)))?;

        let store = Arc::new(
            OfflineStore::open(&config.data_dir, config.max_cached_projects).await?,
        );
        let events = EventBus::new(config.event_buffer_size);

        let connectivity =
            Arc::new(ConnectivityMonitor::new(listener, &config.data_dir).await?);
        connectivity.start().await?;

        // 把连通性事件转发到统一事件流
        {
            let mut receiver = connectivity.subscribe();
            let events = events.clone();
            tokio::spawn(async move {
                while let Ok(event) = receiver.recv().await {
                    events.emit(SdkEvent::ConnectivityChanged {
                        online: event.new_status == ConnectivityStatus::Online,
                    });
                }
            });
        }

        let tracker = ChangeTracker::new(store.clone(), events.clone());
        let resolver = AuthorityResolver::new(
            store.clone(),
            transport.clone(),
            connectivity.clone(),
            events.clone(),
        );
        let replayer = SyncReplayer::new(
            store.clone(),
            transport,
            connectivity.clone(),
            events.clone(),
            config.retry_policy.clone(),
        );
        let coalescer = EditCoalescer::new(tracker.clone(), config.coalescer_config());

        tracing::info!(
            version = crate::version::SDK_VERSION,
            backend = store.backend_name(),
            data_dir = %config.data_dir.display(),
            "Liftaudit SDK 初始化完成"
        );

        Ok(Arc::new(Self {
            store,
            connectivity,
            tracker,
            resolver,
            replayer,
            coalescer,
            events,
            shutting_down: AtomicBool::new(false),
        }))
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(LiftauditSDKError::ShuttingDown("SDK 已停止".into()));
        }
        Ok(())
    }

    // ============================================================
    // 项目访问（权威判定）
    // ============================================================

    /// 打开项目：返回当前权威副本（本地脏副本/本地缓存/服务端新副本）
    pub async fn open_project(&self, project_id: &str) -> Result<ResolvedProject> {
        self.ensure_running()?;
        self.resolver.open_project(project_id).await
    }

    /// 所有离线缓存的项目（最近缓存在前）
    pub async fn list_offline_projects(&self) -> Result<Vec<ProjectAggregate>> {
        self.resolver.list_offline_projects().await
    }

    /// 项目的离线状态字段（未缓存返回 None）
    pub async fn project_status(&self, project_id: &str) -> Result<Option<ProjectStatus>> {
        Ok(self.store.get(project_id).await?.map(|a| ProjectStatus {
            project_id: a.id,
            has_local_changes: a.has_local_changes,
            last_local_change_at: a.last_local_change_at,
            last_synced_at: a.last_synced_at,
            offline_timestamp: a.offline_timestamp,
        }))
    }

    // ============================================================
    // 本地修改
    // ============================================================

    /// 立即应用一次本地修改（绕过合并器）。
    /// 返回 false 表示写入未持久化，可重试。
    pub async fn apply_local_mutation<F>(&self, project_id: &str, mutator: F) -> Result<bool>
    where
        F: FnOnce(&mut ProjectAggregate),
    {
        self.ensure_running()?;
        self.tracker.apply_local_mutation(project_id, mutator).await
    }

    /// 排队一个键入级编辑，由防抖/空闲定时器合并落盘
    pub fn queue_edit<F>(&self, project_id: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut ProjectAggregate) + Send + 'static,
    {
        self.ensure_running()?;
        self.coalescer.queue_edit(project_id, edit)
    }

    /// 立即落盘全部待合并编辑（导航离开项目界面时调用）
    pub async fn flush_pending_edits(&self) -> Result<()> {
        self.coalescer.flush_all().await
    }

    /// 本地新建一台设备（离线新增场景），返回生成的本地 id。
    /// 项目尚未缓存时从空聚合起步，待同步时一并推送。
    pub async fn create_equipment(
        &self,
        project_id: &str,
        fields: crate::storage::FieldMap,
    ) -> Result<String> {
        self.ensure_running()?;
        let local_id = uuid::Uuid::new_v4().to_string();
        let equipment_id = local_id.clone();
        self.tracker
            .apply_local_mutation(project_id, move |project| {
                let mut equipment = crate::storage::EquipmentRecord::new(equipment_id);
                equipment.fields = fields;
                project.upsert_equipment(equipment);
            })
            .await?;
        Ok(local_id)
    }

    /// 仅刷新同步时间戳（元数据触达，不置脏）
    pub async fn touch_sync_timestamp(&self, project_id: &str) -> Result<bool> {
        self.ensure_running()?;
        self.tracker.touch_sync_timestamp(project_id).await
    }

    // ============================================================
    // 同步
    // ============================================================

    /// 推送单个脏项目并清理本地影子
    pub async fn sync_project(&self, project_id: &str) -> Result<SyncOutcome> {
        self.ensure_running()?;
        self.coalescer.flush_all().await?;
        self.replayer.sync_project(project_id).await
    }

    /// 同步全部脏项目
    pub async fn sync_all(&self) -> Result<Vec<ProjectSyncReport>> {
        self.ensure_running()?;
        self.coalescer.flush_all().await?;
        self.replayer.sync_all().await
    }

    pub async fn sync_state(&self) -> SyncState {
        self.replayer.state().await
    }

    pub async fn last_sync_at(&self) -> Option<i64> {
        self.replayer.last_sync_at().await
    }

    /// 有未同步修改的项目 id（"N 个项目有未同步修改"）
    pub async fn dirty_project_ids(&self) -> Result<Vec<String>> {
        self.store.dirty_ids().await
    }

    // ============================================================
    // 离线数据管理
    // ============================================================

    /// 清空全部离线数据（显式用户操作；未同步修改一并清除）
    pub async fn clear_offline_data(&self) -> Result<()> {
        self.ensure_running()?;
        self.coalescer.flush_all().await?;
        let dirty = self.store.dirty_ids().await?;
        if !dirty.is_empty() {
            tracing::warn!(count = dirty.len(), "清空离线数据将丢弃未同步修改");
        }
        self.store.clear_all().await?;
        self.events.emit(SdkEvent::OfflineDataCleared);
        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    // ============================================================
    // 连通性
    // ============================================================

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn offline_mode(&self) -> bool {
        self.connectivity.offline_override()
    }

    /// 手动离线模式（持久化，跨会话生效）
    pub async fn set_offline_mode(&self, enabled: bool) -> Result<()> {
        self.connectivity.set_offline_override(enabled).await
    }

    /// 订阅 SDK 事件流
    pub fn subscribe_events(&self) -> broadcast::Receiver<SdkEvent> {
        self.events.subscribe()
    }

    /// 停止 SDK：落盘残留编辑、停掉后台任务
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.coalescer.shutdown().await?;
        self.connectivity.stop().await;
        tracing::info!("Liftaudit SDK 已停止");
        Ok(())
    }
}
