//! 事件系统 - 统一的 SDK 事件广播
//!
//! UI 层订阅一条 broadcast 流即可反应式地渲染离线状态
//! （"N 个项目有未同步修改"、同步进行中、淘汰提示等），
//! 不需要轮询存储层。

use tokio::sync::broadcast;

/// SDK 事件
#[derive(Debug, Clone)]
pub enum SdkEvent {
    /// 生效连通性变化（已合并手动离线开关）
    ConnectivityChanged { online: bool },
    /// 服务端副本已缓存/刷新到本地
    ProjectCached { project_id: String },
    /// 本地修改已落盘
    LocalChangeSaved { project_id: String, changed_at: i64 },
    /// 本地修改落盘失败（不保证持久，调用方可提示用户重试）
    LocalChangeNotDurable { project_id: String },
    SyncStarted { project_id: String },
    /// 同步成功，本地影子副本已删除
    SyncSucceeded { project_id: String, pushed_equipments: usize },
    SyncFailed { project_id: String, reason: String },
    /// 容量淘汰删除了一个干净聚合
    ProjectEvicted { project_id: String },
    OfflineDataCleared,
}

/// 事件总线（克隆共享同一条流）
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SdkEvent>,
}

impl EventBus {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self { sender }
    }

    /// 发布事件。没有订阅者不是错误。
    pub fn emit(&self, event: SdkEvent) {
        tracing::debug!(?event, "SDK 事件");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_subscribe() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(SdkEvent::SyncStarted {
            project_id: "p1".into(),
        });

        match rx.recv().await.unwrap() {
            SdkEvent::SyncStarted { project_id } => assert_eq!(project_id, "p1"),
            other => panic!("意外事件: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new(8);
        bus.emit(SdkEvent::OfflineDataCleared);
    }
}
