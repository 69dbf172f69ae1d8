//! 同步失败分类与重试策略
//!
//! 回放器自己从不自动重试（失败时本地脏副本原样保留，重试由用户或
//! 上层触发），但会把失败分类与建议的下次重试时间一并报告出去，
//! 让上层可以做指数退避而不是盲目轮询。

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::network::transport::PushError;

/// 同步失败原因分类
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SyncFailureReason {
    /// 当前离线（含手动离线模式）- 等待恢复后重试
    NetworkUnavailable,
    /// 网络超时/服务端够不着 - 可重试
    Unreachable(String),
    /// 服务端错误 - 根据状态码决定
    ServerError(u16),
    /// 服务端拒绝批量更新 - 不重试
    Rejected(String),
    /// 未知错误
    Unknown(String),
}

impl SyncFailureReason {
    /// 判断是否可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncFailureReason::NetworkUnavailable => true,
            SyncFailureReason::Unreachable(_) => true,
            // 5xx 服务端错误可重试，4xx 客户端错误不重试
            SyncFailureReason::ServerError(code) => *code >= 500 && *code < 600,
            SyncFailureReason::Rejected(_) => false,
            // 保守策略：未知错误可重试
            SyncFailureReason::Unknown(_) => true,
        }
    }

    /// 获取重试延迟倍数
    pub fn delay_multiplier(&self) -> f64 {
        match self {
            SyncFailureReason::NetworkUnavailable => 2.0,
            SyncFailureReason::Unreachable(_) => 1.0,
            SyncFailureReason::ServerError(_) => 1.5,
            _ => 1.0,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SyncFailureReason::NetworkUnavailable => "offline".to_string(),
            SyncFailureReason::Unreachable(msg) => format!("unreachable: {}", msg),
            SyncFailureReason::ServerError(code) => format!("server error {}", code),
            SyncFailureReason::Rejected(msg) => format!("rejected: {}", msg),
            SyncFailureReason::Unknown(msg) => format!("unknown: {}", msg),
        }
    }
}

impl From<PushError> for SyncFailureReason {
    fn from(error: PushError) -> Self {
        match error {
            PushError::Unreachable(msg) => SyncFailureReason::Unreachable(msg),
            PushError::Rejected(msg) => SyncFailureReason::Rejected(msg),
            PushError::Server(code) => SyncFailureReason::ServerError(code),
        }
    }
}

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 基础延迟时间（秒）
    pub base_delay_seconds: u64,
    /// 最大延迟时间（秒）
    pub max_delay_seconds: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_seconds: 2,
            max_delay_seconds: 300,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// 检查是否应该重试
    pub fn should_retry(&self, retry_count: u32, reason: &SyncFailureReason) -> bool {
        retry_count < self.max_retries && reason.is_retryable()
    }

    /// 计算下次重试时间（UTC 秒时间戳）；不可重试返回 None
    pub fn next_retry_at(&self, retry_count: u32, reason: &SyncFailureReason) -> Option<u64> {
        if !self.should_retry(retry_count, reason) {
            return None;
        }

        // 基础延迟 = base_delay * (backoff_factor ^ retry_count)
        let base_delay =
            self.base_delay_seconds as f64 * self.backoff_factor.powf(retry_count as f64);
        let adjusted = base_delay * reason.delay_multiplier();
        let capped = adjusted.min(self.max_delay_seconds as f64);

        // 随机抖动，避免多个客户端同时恢复时的重试风暴
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay = (capped + jitter).max(0.0);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Some(now + final_delay as u64)
    }
}
