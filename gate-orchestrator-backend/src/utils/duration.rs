//! 时长反序列化工具
//!
//! 配置文件中的超时既可以写成秒数，也可以写成 `hh:mm:ss[.fff]` 字符串：
//! - `15` / `2.5` -> 秒
//! - `"00:00:15"` -> 15 秒
//! - `"15"` -> 15 秒

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// 反序列化：支持数字秒数或 `hh:mm:ss` 字符串
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(f64),
        Text(String),
    }

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => seconds_to_duration(secs)
            .ok_or_else(|| Error::custom(format!("Invalid duration: {secs}"))),
        RawDuration::Text(text) => parse_duration_text(&text)
            .ok_or_else(|| Error::custom(format!("Invalid duration: {text}"))),
    }
}

fn seconds_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// 解析 `hh:mm:ss[.fff]`、`mm:ss` 或纯秒数字符串
fn parse_duration_text(text: &str) -> Option<Duration> {
    let parts: Vec<&str> = text.trim().split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [s] => ("0", "0", *s),
        [m, s] => ("0", *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };

    let hours: u64 = hours.parse().ok()?;
    let minutes: u64 = minutes.parse().ok()?;
    let seconds: f64 = seconds.parse().ok()?;
    if minutes >= 60 && parts.len() > 1 {
        return None;
    }

    let whole = seconds_to_duration(seconds)?;
    let prefix = hours.checked_mul(3600)?.checked_add(minutes * 60)?;
    Duration::from_secs(prefix).checked_add(whole)
}
