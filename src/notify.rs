use parking_lot::Mutex;
use serde_json::Value;

/// Fan-out point for lifecycle announcements (created, updated, deleted).
/// Delivery is fire-and-forget; a failed announcement never fails the
/// request that triggered it.
pub trait Notify: Send + Sync {
    fn publish(&self, channel: &str, message: Value);
}

/// Default sink: announcements land in the structured log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notify for LogNotifier {
    fn publish(&self, channel: &str, message: Value) {
        log::info!("notify {channel}: {message}");
    }
}

/// Captures announcements in memory for assertions.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    published: Mutex<Vec<(String, Value)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        MemoryNotifier::default()
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().clone()
    }
}

impl Notify for MemoryNotifier {
    fn publish(&self, channel: &str, message: Value) {
        self.published.lock().push((channel.to_string(), message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_notifier_records_in_order() {
        let notifier = MemoryNotifier::new();
        notifier.publish("unittest", json!({"action": "created", "id": 1}));
        notifier.publish("unittest", json!({"action": "deleted", "id": 1}));

        let published = notifier.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "unittest");
        assert_eq!(published[0].1["action"], json!("created"));
        assert_eq!(published[1].1["action"], json!("deleted"));
    }
}
