//! In-process console capture.
//!
//! Every log event is mirrored into a bounded ring buffer so that a remote
//! controller can read recent output back through the `get_console_log` tool.
//! Oldest lines are discarded once the buffer reaches its capacity.

use std::{
    collections::VecDeque,
    fmt::{self, Write as _},
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
};

use tracing::{
    Event, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context};

use crate::time::{get_timestamp_millis, timestamp_to_rfc3339};

/// Maximum number of lines kept by the process-wide console log
pub const DEFAULT_CONSOLE_CAPACITY: usize = 1000;

static GLOBAL_CONSOLE: OnceLock<Arc<ConsoleLog>> = OnceLock::new();

/// Thread-safe ring buffer of formatted log lines
#[derive(Debug)]
pub struct ConsoleLog {
    capacity: usize,
    entries: Mutex<VecDeque<String>>,
}

impl ConsoleLog {
    /// Create an empty console log holding at most `capacity` lines
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CONSOLE_CAPACITY))),
        }
    }

    /// Process-wide console log fed by [`ConsoleLogLayer`] in `setup_logger`
    pub fn global() -> Arc<ConsoleLog> {
        GLOBAL_CONSOLE
            .get_or_init(|| Arc::new(ConsoleLog::new(DEFAULT_CONSOLE_CAPACITY)))
            .clone()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a line, discarding the oldest one when full
    pub fn push(&self, line: impl Into<String>) {
        let mut entries = self.entries();
        entries.push_back(line.into());
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Return up to `count` most recent lines, oldest first.
    ///
    /// When `clear` is set the whole buffer is emptied after reading.
    pub fn tail(&self, count: usize, clear: bool) -> Vec<String> {
        let mut entries = self.entries();
        let count = count.min(entries.len());
        let lines = entries
            .iter()
            .skip(entries.len() - count)
            .cloned()
            .collect();
        if clear {
            entries.clear();
        }
        lines
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<String>> {
        // A panic while holding the lock cannot leave the deque half-updated
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ConsoleLog {
    fn default() -> Self {
        Self::new(DEFAULT_CONSOLE_CAPACITY)
    }
}

/// `tracing` layer that writes one line per event into a [`ConsoleLog`]
pub struct ConsoleLogLayer {
    log: Arc<ConsoleLog>,
}

impl ConsoleLogLayer {
    pub fn new(log: Arc<ConsoleLog>) -> Self {
        Self { log }
    }
}

impl<S: Subscriber> Layer<S> for ConsoleLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        self.log.push(format!(
            "{} {} {}: {}{}",
            timestamp_to_rfc3339(get_timestamp_millis()),
            metadata.level(),
            metadata.target(),
            visitor.message,
            visitor.fields
        ));
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_push_discards_oldest_when_full() {
        // テスト項目: 容量を超えると古い行から破棄される
        // given (前提条件):
        let log = ConsoleLog::new(3);

        // when (操作):
        for i in 0..5 {
            log.push(format!("line {}", i));
        }

        // then (期待する結果):
        assert_eq!(log.len(), 3);
        assert_eq!(log.tail(10, false), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_tail_returns_most_recent_lines_in_order() {
        // テスト項目: tail は最新の count 行を古い順に返す
        // given (前提条件):
        let log = ConsoleLog::new(10);
        for i in 0..6 {
            log.push(format!("line {}", i));
        }

        // when (操作):
        let lines = log.tail(2, false);

        // then (期待する結果):
        assert_eq!(lines, vec!["line 4", "line 5"]);
        assert_eq!(log.len(), 6);
    }

    #[test]
    fn test_tail_with_clear_empties_buffer() {
        // テスト項目: clear 指定で読み取り後にバッファが空になる
        // given (前提条件):
        let log = ConsoleLog::new(10);
        log.push("a");
        log.push("b");

        // when (操作):
        let lines = log.tail(1, true);

        // then (期待する結果):
        assert_eq!(lines, vec!["b"]);
        assert!(log.is_empty());
    }

    #[test]
    fn test_layer_captures_message_and_fields() {
        // テスト項目: ConsoleLogLayer がイベントのメッセージとフィールドを記録する
        // given (前提条件):
        let log = Arc::new(ConsoleLog::new(10));
        let subscriber =
            tracing_subscriber::registry().with(ConsoleLogLayer::new(log.clone()));

        // when (操作):
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(session = "client_1", "session dropped");
        });

        // then (期待する結果):
        let lines = log.tail(10, false);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("WARN"));
        assert!(lines[0].contains("session dropped"));
        assert!(lines[0].contains("session=client_1"));
    }
}
