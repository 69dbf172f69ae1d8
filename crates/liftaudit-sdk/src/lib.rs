//! Liftaudit SDK - 电梯检验审计应用的离线优先同步子系统
//!
//! 本 SDK 为检验员的客户端提供离线能力，包括：
//! - 📦 本地项目存储：整项目聚合（设备/楼层/检查清单）按 id 持久化，
//!   SQLite 优先、sled 回退的双后端
//! - ✏️ 变更追踪：本地修改的脏标记簿记，按子记录 id 合并
//! - ⚖️ 权威判定：本地脏副本 vs 服务端副本的选择状态机
//! - 🔄 同步回放：整批推送设备子聚合，成功后清理本地影子
//! - 📡 网络状态监控：真实连通性 + 可持久化的手动离线模式
//! - ⚙️ 事件系统：统一的事件广播，UI 反应式渲染离线状态
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use liftaudit_sdk::{
//!     EquipmentRecord, FetchError, LiftauditConfig, LiftauditSDK, ProjectAggregate,
//!     ProjectTransport, PushError,
//! };
//!
//! /// 由应用层把 REST 客户端接到这个 trait 上
//! #[derive(Debug)]
//! struct RestTransport;
//!
//! #[async_trait]
//! impl ProjectTransport for RestTransport {
//!     async fn fetch_project(
//!         &self,
//!         _project_id: &str,
//!     ) -> Result<ProjectAggregate, FetchError> {
//!         Err(FetchError::Unreachable("not wired".into()))
//!     }
//!
//!     async fn push_equipments(
//!         &self,
//!         _project_id: &str,
//!         _equipments: &[EquipmentRecord],
//!     ) -> Result<(), PushError> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LiftauditConfig::builder()
//!         .data_dir("/path/to/data")
//!         .build()?;
//!     let sdk = LiftauditSDK::initialize(config, Arc::new(RestTransport)).await?;
//!
//!     // 打开项目：SDK 决定本地副本还是服务端副本是权威
//!     let resolved = sdk.open_project("project-1").await?;
//!     println!("权威来源: {:?}", resolved.source);
//!
//!     // 本地修改（自动置脏）
//!     sdk.apply_local_mutation("project-1", |project| {
//!         project.set_floor_field("e1", "f1", "designation", serde_json::json!("L1"));
//!     })
//!     .await?;
//!
//!     // 恢复在线后整批推送
//!     sdk.sync_project("project-1").await?;
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod error;
pub mod events;
pub mod network;
pub mod sdk;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod version;

// 重新导出核心类型，方便使用
pub use error::{LiftauditSDKError, Result};
pub use events::{EventBus, SdkEvent};
pub use network::{
    ConnectivityEvent, ConnectivityListener, ConnectivityMonitor, ConnectivityStatus,
    FetchError, ProjectTransport, PushError,
};
pub use sdk::{LiftauditConfig, LiftauditConfigBuilder, LiftauditSDK, ProjectStatus};
pub use storage::{
    ChecklistAnswer, EquipmentRecord, FieldMap, FloorRecord, OfflineStore, ProjectAggregate,
    StorageBackend, StoreStats, DEFAULT_MAX_CACHED_PROJECTS,
};
pub use sync::{
    AuthorityResolver, ChangeTracker, CoalescerConfig, EditCoalescer, ProjectSource,
    ProjectSyncReport, ResolvedProject, RetryPolicy, SyncFailureReason, SyncOutcome,
    SyncReplayer, SyncState,
};
pub use version::SDK_VERSION;
