use std::fmt;

#[derive(Debug)]
pub enum LiftauditSDKError {
    /// 两个存储后端都无法初始化，离线能力不可用（应用可继续纯在线模式）
    StorageUnavailable(String),
    /// 单次存储读写失败，可重试
    Storage(String),
    Serialization(String),
    IO(String),
    /// 在线拉取失败（网络/服务端错误），本地副本不受影响
    FetchFailed(String),
    /// 批量推送失败，本地脏副本保持原样
    PushFailed(String),
    /// 离线且本地无缓存副本
    NotAvailableOffline(String),
    /// 服务端明确返回项目不存在
    ProjectNotFound(String),
    /// 前置条件不满足（如对非脏项目调用同步）
    PreconditionNotMet(String),
    Config(String),
    NotInitialized(String),
    ShuttingDown(String),
}

impl fmt::Display for LiftauditSDKError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiftauditSDKError::StorageUnavailable(e) => write!(f, "Storage unavailable: {}", e),
            LiftauditSDKError::Storage(e) => write!(f, "Storage error: {}", e),
            LiftauditSDKError::Serialization(e) => write!(f, "Serialization error: {}", e),
            LiftauditSDKError::IO(e) => write!(f, "IO error: {}", e),
            LiftauditSDKError::FetchFailed(e) => write!(f, "Fetch failed: {}", e),
            LiftauditSDKError::PushFailed(e) => write!(f, "Push failed: {}", e),
            LiftauditSDKError::NotAvailableOffline(id) => {
                write!(f, "Project not available offline: {}", id)
            }
            LiftauditSDKError::ProjectNotFound(id) => write!(f, "Project not found: {}", id),
            LiftauditSDKError::PreconditionNotMet(e) => write!(f, "Precondition not met: {}", e),
            LiftauditSDKError::Config(e) => write!(f, "Config error: {}", e),
            LiftauditSDKError::NotInitialized(e) => write!(f, "Not initialized: {}", e),
            LiftauditSDKError::ShuttingDown(e) => write!(f, "Shutting down: {}", e),
        }
    }
}

impl std::error::Error for LiftauditSDKError {}

impl From<serde_json::Error> for LiftauditSDKError {
    fn from(error: serde_json::Error) -> Self {
        LiftauditSDKError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for LiftauditSDKError {
    fn from(error: std::io::Error) -> Self {
        LiftauditSDKError::IO(error.to_string())
    }
}

impl From<rusqlite::Error> for LiftauditSDKError {
    fn from(error: rusqlite::Error) -> Self {
        LiftauditSDKError::Storage(error.to_string())
    }
}

impl From<sled::Error> for LiftauditSDKError {
    fn from(error: sled::Error) -> Self {
        LiftauditSDKError::Storage(error.to_string())
    }
}

impl LiftauditSDKError {
    /// 判断该错误是否允许调用方直接重试（存储/网络的瞬时失败）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LiftauditSDKError::Storage(_)
                | LiftauditSDKError::FetchFailed(_)
                | LiftauditSDKError::PushFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LiftauditSDKError>;
