use chrono::{DateTime, SecondsFormat};

/// 当前本地时间，RFC3339 格式（秒精度，UTC 时区输出 `Z`）
pub fn now_rfc3339() -> String {
    chrono::Local::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_millis() -> i64 {
    chrono::Local::now().timestamp_millis()
}

/// 毫秒时间戳转 RFC3339，非法时间戳返回 None
pub fn millis_to_rfc3339(millis: i64) -> Option<String> {
    DateTime::from_timestamp_millis(millis).map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}
