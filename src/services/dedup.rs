use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Process-local idempotency cache: recently seen inbound message ids and
/// per-conversation fingerprints of the latest handled utterance. Entries
/// expire after the configured window and are pruned on every access, so the
/// map stays bounded by recent traffic. A multi-instance deployment needs to
/// externalize this (see DESIGN.md).
pub struct DedupCache {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true when the key was already recorded inside the window.
    /// Either way the key is (re)stamped with the current instant.
    pub fn check_and_record(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|_, stamped| now.duration_since(*stamped) < self.window);

        let duplicate = seen.contains_key(key);
        seen.insert(key.to_string(), now);
        duplicate
    }
}

pub fn message_key(message_id: &str) -> String {
    format!("msg:{message_id}")
}

pub fn utterance_key(conversation_id: &str, text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.trim().hash(&mut hasher);
    format!("turn:{conversation_id}:{:x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sighting_is_not_a_duplicate() {
        let cache = DedupCache::new(Duration::from_secs(60));
        assert!(!cache.check_and_record("msg:a"));
        assert!(cache.check_and_record("msg:a"));
    }

    #[test]
    fn test_distinct_keys_do_not_collide() {
        let cache = DedupCache::new(Duration::from_secs(60));
        assert!(!cache.check_and_record("msg:a"));
        assert!(!cache.check_and_record("msg:b"));
        assert!(!cache.check_and_record(&utterance_key("conv-1", "hi")));
        assert!(!cache.check_and_record(&utterance_key("conv-2", "hi")));
        assert!(cache.check_and_record(&utterance_key("conv-1", "hi")));
    }

    #[test]
    fn test_entries_expire_after_window() {
        let cache = DedupCache::new(Duration::from_millis(20));
        assert!(!cache.check_and_record("msg:a"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!cache.check_and_record("msg:a"));
    }

    #[test]
    fn test_same_text_after_whitespace_changes_is_same_fingerprint() {
        assert_eq!(utterance_key("c", "yes"), utterance_key("c", "  yes "));
        assert_ne!(utterance_key("c", "yes"), utterance_key("c", "no"));
    }
}
