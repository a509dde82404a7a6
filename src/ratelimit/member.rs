//! Unique member values for window entries.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Produces member values that never collide, even for arrivals sharing a
/// millisecond or recorded by different processes against the same store.
///
/// A member is `"{timestamp_ms}:{instance}:{sequence}"`. The timestamp keeps
/// members readable; the score carries the time the limiter actually uses.
#[derive(Debug)]
pub struct MemberGenerator {
    instance: String,
    sequence: AtomicU64,
}

impl MemberGenerator {
    pub fn new() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self::with_instance(&id[..12])
    }

    /// Use a fixed instance id.
    pub fn with_instance(instance: &str) -> Self {
        Self {
            instance: instance.to_string(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Next member for an arrival at `timestamp_ms`.
    pub fn next(&self, timestamp_ms: i64) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}:{}:{}", timestamp_ms, self.instance, seq)
    }
}

impl Default for MemberGenerator {
    fn default() -> Self {
        Self::new()
    }
}
