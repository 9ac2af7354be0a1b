//! Wall-clock helpers for log lines, session bookkeeping and message ids.

use chrono::{DateTime, TimeZone, Utc};

/// Current Unix timestamp in milliseconds
pub fn get_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current Unix timestamp in seconds
pub fn get_timestamp_secs() -> i64 {
    Utc::now().timestamp()
}

/// Milliseconds elapsed since `earlier`; never negative if the clock steps back
pub fn millis_since(earlier: i64) -> i64 {
    get_timestamp_millis().saturating_sub(earlier).max(0)
}

/// Format a millisecond timestamp as UTC RFC 3339; out-of-range values give the epoch
pub fn timestamp_to_rfc3339(timestamp_millis: i64) -> String {
    match Utc.timestamp_millis_opt(timestamp_millis).single() {
        Some(dt) => dt.to_rfc3339(),
        None => DateTime::<Utc>::UNIX_EPOCH.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_to_rfc3339_format() {
        // テスト項目: タイムスタンプが UTC の RFC 3339 形式に変換される
        // given (前提条件):
        // 2023-01-01 00:00:00 UTC
        let timestamp = 1672531200000;

        // when (操作):
        let result = timestamp_to_rfc3339(timestamp);
        let out_of_range = timestamp_to_rfc3339(i64::MAX);

        // then (期待する結果):
        assert!(result.starts_with("2023-01-01T00:00:00"));
        assert!(result.ends_with("+00:00"));
        assert!(out_of_range.starts_with("1970-01-01T00:00:00"));
    }

    #[test]
    fn test_timestamp_secs_and_millis_agree() {
        let secs = get_timestamp_secs();
        let millis = get_timestamp_millis();
        assert!((millis / 1000 - secs).abs() <= 1);
    }

    #[test]
    fn test_millis_since() {
        // テスト項目: 経過時間は過去の時刻に対して正、未来の時刻に対して 0 になる
        // given (前提条件):
        let now = get_timestamp_millis();

        // when (操作):
        let past = millis_since(now - 1500);
        let future = millis_since(now + 60_000);

        // then (期待する結果):
        assert!(past >= 1500);
        assert_eq!(future, 0);
    }
}
