//! 网络状态监控
//!
//! 连通性是权威判定状态机的决策输入，要求同步可读（parking_lot 快照），
//! 同时通过 broadcast 向 UI 推送变化事件。真实的网络信号由平台层实现
//! [`ConnectivityListener`] 提供（浏览器 online/offline 事件、系统网络
//! 回调等）。
//!
//! 手动离线开关独立于真实连通性：持久化在数据目录、跨会话生效，打开
//! 后整个状态机表现得与真实断网完全一致（刻意离线使用/测试场景）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{LiftauditSDKError, Result};
use crate::utils::now_millis;

pub mod transport;

pub use transport::{FetchError, ProjectTransport, PushError};

/// 连通性状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
}

/// 连通性变化事件（生效状态，已合并手动离线开关）
#[derive(Debug, Clone)]
pub struct ConnectivityEvent {
    pub old_status: ConnectivityStatus,
    pub new_status: ConnectivityStatus,
    pub timestamp: i64,
}

/// 连通性监听器 trait（由平台层实现）
#[async_trait]
pub trait ConnectivityListener: Send + Sync + std::fmt::Debug {
    /// 获取当前真实网络状态
    async fn current_status(&self) -> ConnectivityStatus;

    /// 开始监听网络状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<ConnectivityStatus>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 手动离线开关的持久化格式
#[derive(Debug, Default, Serialize, Deserialize)]
struct OfflineOverride {
    forced_offline: bool,
}

const OVERRIDE_FILE: &str = "offline_override.json";

/// 连通性监控器
///
/// `is_online()` 是唯一的决策入口：真实状态为在线且未强制离线才算在线。
#[derive(Debug)]
pub struct ConnectivityMonitor {
    listener: Arc<dyn ConnectivityListener>,
    event_sender: broadcast::Sender<ConnectivityEvent>,
    /// 真实网络状态快照（由监听任务更新）
    raw_status: Arc<parking_lot::RwLock<ConnectivityStatus>>,
    /// 手动离线开关
    forced_offline: Arc<parking_lot::RwLock<bool>>,
    override_path: PathBuf,
}

impl ConnectivityMonitor {
    /// 创建监控器并恢复持久化的手动离线开关
    pub async fn new(listener: Arc<dyn ConnectivityListener>, data_dir: &Path) -> Result<Self> {
        let override_path = data_dir.join(OVERRIDE_FILE);
        let forced_offline = match tokio::fs::read(&override_path).await {
            Ok(bytes) => serde_json::from_slice::<OfflineOverride>(&bytes)
                .map(|o| o.forced_offline)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "离线开关文件损坏，按未开启处理");
                    false
                }),
            Err(_) => false,
        };

        if forced_offline {
            tracing::info!("手动离线模式已从上次会话恢复");
        }

        let initial = listener.current_status().await;
        let (event_sender, _) = broadcast::channel(64);

        Ok(Self {
            listener,
            event_sender,
            raw_status: Arc::new(parking_lot::RwLock::new(initial)),
            forced_offline: Arc::new(parking_lot::RwLock::new(forced_offline)),
            override_path,
        })
    }

    /// 启动监听任务：把平台层的状态变化转成生效状态事件
    pub async fn start(&self) -> Result<()> {
        let mut receiver = self.listener.start_monitoring().await?;
        let raw_status = self.raw_status.clone();
        let forced_offline = self.forced_offline.clone();
        let event_sender = self.event_sender.clone();

        tokio::spawn(async move {
            while let Ok(new_raw) = receiver.recv().await {
                let forced = *forced_offline.read();
                let (old_effective, new_effective) = {
                    let mut raw = raw_status.write();
                    let old = Self::effective(*raw, forced);
                    *raw = new_raw;
                    (old, Self::effective(new_raw, forced))
                };

                if old_effective != new_effective {
                    tracing::info!(?new_effective, "连通性状态变化");
                    let _ = event_sender.send(ConnectivityEvent {
                        old_status: old_effective,
                        new_status: new_effective,
                        timestamp: now_millis(),
                    });
                }
            }
        });

        Ok(())
    }

    pub async fn stop(&self) {
        self.listener.stop_monitoring().await;
    }

    fn effective(raw: ConnectivityStatus, forced_offline: bool) -> ConnectivityStatus {
        if forced_offline {
            ConnectivityStatus::Offline
        } else {
            raw
        }
    }

    /// 生效状态（已合并手动离线开关），同步读取
    pub fn status(&self) -> ConnectivityStatus {
        Self::effective(*self.raw_status.read(), *self.forced_offline.read())
    }

    /// 当前是否可发起网络操作
    pub fn is_online(&self) -> bool {
        self.status() == ConnectivityStatus::Online
    }

    pub fn offline_override(&self) -> bool {
        *self.forced_offline.read()
    }

    /// 设置手动离线开关并持久化（跨会话生效）
    pub async fn set_offline_override(&self, enabled: bool) -> Result<()> {
        let old_effective = self.status();
        *self.forced_offline.write() = enabled;
        let new_effective = self.status();

        let bytes = serde_json::to_vec(&OfflineOverride {
            forced_offline: enabled,
        })?;
        tokio::fs::write(&self.override_path, bytes)
            .await
            .map_err(|e| {
                LiftauditSDKError::IO(format!("持久化离线开关失败: {}", e))
            })?;

        tracing::info!(enabled, "手动离线模式已更新");
        if old_effective != new_effective {
            let _ = self.event_sender.send(ConnectivityEvent {
                old_status: old_effective,
                new_status: new_effective,
                timestamp: now_millis(),
            });
        }
        Ok(())
    }

    /// 订阅生效状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.event_sender.subscribe()
    }
}
