//! 编辑合并器 - 键入级修改的防抖/空闲落盘
//!
//! 把高频输入事件（逐键修改）合并成一次存储写入，限制写放大。
//! 定时器建模为显式状态机，而不是两个各自为政的 timeout 句柄：
//!
//! ```text
//! Idle --新修改--> PendingDebounce --防抖窗口到期--> PendingIdleSave
//!                       ^                                 |
//!                       +-------- 新修改（重置） ---------+
//!                                                         |
//!                                  空闲窗口到期 --> 落盘 --> Idle
//! ```
//!
//! 两个 pending 态中的任何新修改都回到 PendingDebounce；空闲定时器
//! 每个空闲周期至多触发一次。被超越的待写入不执行（合并进下一次），
//! 不会写两遍。
//!
//! 合并器是调用方的优化，不是正确性前提：绕过它直接调
//! [`ChangeTracker::apply_local_mutation`] 同样正确。

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{LiftauditSDKError, Result};
use crate::storage::entities::ProjectAggregate;
use crate::sync::change_tracker::ChangeTracker;

/// 单个待合并的编辑
pub type EditFn = Box<dyn FnOnce(&mut ProjectAggregate) + Send>;

/// 合并器配置
#[derive(Debug, Clone)]
pub struct CoalescerConfig {
    /// 防抖窗口：每个新修改都把定时器拉回这么久
    pub debounce: Duration,
    /// 空闲窗口：防抖结束后再安静这么久才落盘
    pub idle_save: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(150),
            idle_save: Duration::from_millis(300),
        }
    }
}

/// 定时器状态机的 pending 态（Idle = 不在 map 里，Saved = 落盘后移除）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerPhase {
    PendingDebounce,
    PendingIdleSave,
}

struct PendingGroup {
    edits: Vec<EditFn>,
    phase: TimerPhase,
    deadline: Instant,
}

enum Command {
    Edit { project_id: String, edit: EditFn },
    FlushAll { done: oneshot::Sender<()> },
    Shutdown { done: oneshot::Sender<()> },
}

/// 编辑合并器（内部持有一个定时器任务）
#[derive(Debug)]
pub struct EditCoalescer {
    tx: mpsc::UnboundedSender<Command>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl EditCoalescer {
    pub fn new(tracker: ChangeTracker, config: CoalescerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_timer_loop(tracker, config, rx));
        Self {
            tx,
            handle: tokio::sync::Mutex::new(Some(handle)),
        }
    }

    /// 排队一个编辑（按项目分组合并）。立即返回，落盘发生在空闲窗口
    /// 到期或显式 flush 时。
    pub fn queue_edit<F>(&self, project_id: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut ProjectAggregate) + Send + 'static,
    {
        self.tx
            .send(Command::Edit {
                project_id: project_id.to_string(),
                edit: Box::new(edit),
            })
            .map_err(|_| LiftauditSDKError::ShuttingDown("coalescer stopped".into()))
    }

    /// 立即落盘全部待合并编辑（导航离开项目界面、App 退后台时调用）
    pub async fn flush_all(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::FlushAll { done: done_tx })
            .map_err(|_| LiftauditSDKError::ShuttingDown("coalescer stopped".into()))?;
        done_rx
            .await
            .map_err(|_| LiftauditSDKError::ShuttingDown("coalescer stopped".into()))
    }

    /// 落盘并停止定时器任务
    pub async fn shutdown(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { done: done_tx }).is_ok() {
            let _ = done_rx.await;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }
}

async fn run_timer_loop(
    tracker: ChangeTracker,
    config: CoalescerConfig,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut groups: HashMap<String, PendingGroup> = HashMap::new();

    loop {
        let next_deadline = groups.values().map(|g| g.deadline).min();

        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Edit { project_id, edit }) => {
                    let group = groups.entry(project_id).or_insert_with(|| PendingGroup {
                        edits: Vec::new(),
                        phase: TimerPhase::PendingDebounce,
                        deadline: Instant::now() + config.debounce,
                    });
                    group.edits.push(edit);
                    // 任一 pending 态收到新修改都重置回 PendingDebounce
                    group.phase = TimerPhase::PendingDebounce;
                    group.deadline = Instant::now() + config.debounce;
                }
                Some(Command::FlushAll { done }) => {
                    flush_groups(&tracker, &mut groups, None).await;
                    let _ = done.send(());
                }
                Some(Command::Shutdown { done }) => {
                    flush_groups(&tracker, &mut groups, None).await;
                    let _ = done.send(());
                    break;
                }
                // 所有发送端已丢弃：落盘残留编辑后退出
                None => {
                    flush_groups(&tracker, &mut groups, None).await;
                    break;
                }
            },
            _ = sleep_until_or_forever(next_deadline) => {
                let now = Instant::now();
                let mut due_saves = Vec::new();
                for (project_id, group) in groups.iter_mut() {
                    if group.deadline > now {
                        continue;
                    }
                    match group.phase {
                        TimerPhase::PendingDebounce => {
                            group.phase = TimerPhase::PendingIdleSave;
                            group.deadline = now + config.idle_save;
                        }
                        TimerPhase::PendingIdleSave => {
                            due_saves.push(project_id.clone());
                        }
                    }
                }
                if !due_saves.is_empty() {
                    flush_groups(&tracker, &mut groups, Some(due_saves.as_slice())).await;
                }
            }
        }
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// 把指定（或全部）分组的累积编辑作为一次修改写入。
/// 写失败由 ChangeTracker 记录并上报事件，这里只移除分组——编辑
/// 语义是合并式的，失败重放交给上层。
async fn flush_groups(
    tracker: &ChangeTracker,
    groups: &mut HashMap<String, PendingGroup>,
    only: Option<&[String]>,
) {
    let ids: Vec<String> = match only {
        Some(ids) => ids.to_vec(),
        None => groups.keys().cloned().collect(),
    };

    for project_id in ids {
        let Some(group) = groups.remove(&project_id) else {
            continue;
        };
        let edits = group.edits;
        tracing::debug!(
            project_id = %project_id,
            coalesced = edits.len(),
            "空闲窗口到期，合并落盘"
        );
        let result = tracker
            .apply_local_mutation(&project_id, move |aggregate| {
                for edit in edits {
                    edit(aggregate);
                }
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(project_id = %project_id, error = %e, "合并落盘失败");
        }
    }
}
