//! 项目传输边界
//!
//! REST 层、鉴权、序列化格式都在本子系统之外，这里只定义消费的两个
//! 能力：按 id 拉取项目聚合、按项目批量推送设备子聚合。错误分类是
//! 契约的一部分——权威判定状态机要靠"确实不存在"与"暂时够不着"
//! 的区别选择回退路径。

use async_trait::async_trait;
use thiserror::Error;

use crate::storage::entities::{EquipmentRecord, ProjectAggregate};

/// 拉取失败分类
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// 服务端明确答复项目不存在（非瞬时，重试无意义）
    #[error("project not found on server")]
    NotFound,
    /// 网络或服务端瞬时故障，可重试
    #[error("server unreachable: {0}")]
    Unreachable(String),
}

/// 推送失败分类
#[derive(Debug, Clone, Error)]
pub enum PushError {
    /// 网络或服务端瞬时故障，可重试
    #[error("server unreachable: {0}")]
    Unreachable(String),
    /// 服务端拒绝本次批量更新（校验失败等），重试同样会被拒
    #[error("server rejected batch update: {0}")]
    Rejected(String),
    /// 服务端内部错误，按状态码决定是否重试
    #[error("server error {0}")]
    Server(u16),
}

impl PushError {
    /// 是否值得按退避策略重试
    pub fn is_retryable(&self) -> bool {
        match self {
            PushError::Unreachable(_) => true,
            PushError::Rejected(_) => false,
            // 5xx 可重试，4xx 不重试
            PushError::Server(code) => *code >= 500 && *code < 600,
        }
    }
}

/// 项目传输能力（由外部的 REST 客户端实现）
#[async_trait]
pub trait ProjectTransport: Send + Sync + std::fmt::Debug {
    /// 拉取整个项目聚合（含嵌套设备/楼层/清单）
    async fn fetch_project(
        &self,
        project_id: &str,
    ) -> std::result::Result<ProjectAggregate, FetchError>;

    /// 把项目的全部设备子聚合作为一个批次推送。
    /// 批次的原子性由服务端保证；本子系统只承诺"整批确认前本地不动"。
    async fn push_equipments(
        &self,
        project_id: &str,
        equipments: &[EquipmentRecord],
    ) -> std::result::Result<(), PushError>;
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// 测试用内存传输：预置服务端数据，可注入拉取/推送故障
    #[derive(Debug, Default)]
    pub struct MockTransport {
        pub server_projects: Mutex<HashMap<String, ProjectAggregate>>,
        pub fail_fetch: AtomicBool,
        pub fail_push: AtomicBool,
        pub fetch_count: AtomicU32,
        pub pushed: Mutex<Vec<(String, Vec<EquipmentRecord>)>>,
    }

    impl MockTransport {
        pub async fn seed(&self, project: ProjectAggregate) {
            self.server_projects
                .lock()
                .await
                .insert(project.id.clone(), project);
        }

        pub fn set_fail_fetch(&self, fail: bool) {
            self.fail_fetch.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_push(&self, fail: bool) {
            self.fail_push.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProjectTransport for MockTransport {
        async fn fetch_project(
            &self,
            project_id: &str,
        ) -> std::result::Result<ProjectAggregate, FetchError> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(FetchError::Unreachable("connection refused".into()));
            }
            self.server_projects
                .lock()
                .await
                .get(project_id)
                .cloned()
                .ok_or(FetchError::NotFound)
        }

        async fn push_equipments(
            &self,
            project_id: &str,
            equipments: &[EquipmentRecord],
        ) -> std::result::Result<(), PushError> {
            if self.fail_push.load(Ordering::SeqCst) {
                return Err(PushError::Unreachable("connection refused".into()));
            }
            self.pushed
                .lock()
                .await
                .push((project_id.to_string(), equipments.to_vec()));
            Ok(())
        }
    }
}
