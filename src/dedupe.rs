// ABOUTME: Process-local TTL dedupe cache keyed by (frontend, channel_id, content hash).
// ABOUTME: Not persisted — a gateway restart forgets recent sends, which is acceptable per spec.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct DedupeCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl DedupeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(frontend: &str, channel_id: &str, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let digest = hasher.finalize();
        format!("{frontend}:{channel_id}:{digest:x}")
    }

    /// Returns `true` if this key was seen within the TTL (and thus should be
    /// rejected as a duplicate). Otherwise records it and returns `false`.
    /// Also opportunistically sweeps expired entries.
    pub fn check_and_insert(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);

        if entries.contains_key(key) {
            return true;
        }
        entries.insert(key.to_string(), now);
        false
    }
}
