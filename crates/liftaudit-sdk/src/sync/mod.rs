//! 离线同步模块
//!
//! 职责：
//! - 变更追踪：本地修改的脏标记簿记（ChangeTracker）
//! - 权威判定：本地副本 vs 服务端副本的选择（AuthorityResolver）
//! - 同步回放：整批推送脏项目并清理本地影子（SyncReplayer）
//! - 编辑合并：键入级修改的防抖/空闲定时落盘（EditCoalescer）

pub mod change_tracker;
pub mod debounce;
pub mod replayer;
pub mod resolver;
pub mod retry_policy;

pub use change_tracker::ChangeTracker;
pub use debounce::{CoalescerConfig, EditCoalescer};
pub use replayer::SyncReplayer;
pub use resolver::{AuthorityResolver, ProjectSource, ResolvedProject};
pub use retry_policy::{RetryPolicy, SyncFailureReason};

/// 同步器状态（显式值，替代环境单例里的 in-flight 标志位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SyncState {
    /// 空闲
    Idle,
    /// 有同步在途
    Syncing,
}

/// 单个项目的同步结果
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// 推送成功，本地影子副本已删除
    Synced { pushed_equipments: usize },
    /// 前置条件不满足（本地不存在或不脏），无事可做
    NothingToSync,
    /// 推送失败，本地脏副本原样保留
    Failed { reason: SyncFailureReason },
}

/// 批量同步报告（逐项目）
#[derive(Debug, Clone)]
pub struct ProjectSyncReport {
    pub project_id: String,
    pub outcome: SyncOutcome,
    pub finished_at: i64,
}
