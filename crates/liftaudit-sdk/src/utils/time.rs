//! 时间处理工具
//!
//! # 设计原则
//!
//! - **存储层**: 所有时间字段使用 UTC 毫秒时间戳（INTEGER）
//! - **业务层**: 统一使用 `now_millis()` 生成时间
//! - **显示层**: 由应用层转换为本地时区，SDK 不做格式化

use chrono::{DateTime, Utc};

/// 当前 UTC 毫秒时间戳
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 毫秒时间戳转 RFC3339 字符串（仅用于日志打印）
pub fn millis_to_rfc3339(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| format!("invalid({})", millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
        // 合理性检查：2020 年之后
        assert!(a > 1_577_836_800_000);
    }

    #[test]
    fn test_millis_to_rfc3339() {
        let s = millis_to_rfc3339(0);
        assert!(s.starts_with("1970-01-01"));
    }
}
