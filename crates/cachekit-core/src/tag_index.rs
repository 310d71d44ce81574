//! Maps tag -> set of keys, held at the coordinator level. Never persisted
//! to drivers directly; see [`crate::entry::CacheEntry::tags`] for how tags
//! travel with an entry into L2 so a backfill can repopulate this index.

use dashmap::DashSet;
use dashmap::DashMap;

/// Concurrent tag -> keys index.
#[derive(Default)]
pub struct TagIndex {
    tags: DashMap<String, DashSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `key` with every tag in `tags`.
    pub fn add_tags(&self, key: &str, tags: &[String]) {
        for tag in tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Remove `key` from every tag it was associated with. Drops any tag
    /// left with no keys.
    pub fn remove_key(&self, key: &str) {
        self.tags.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
    }

    /// Union of keys across the given tags.
    pub fn keys_for_tags(&self, tags: &[String]) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        for tag in tags {
            if let Some(keys) = self.tags.get(tag) {
                for key in keys.iter() {
                    seen.insert(key.clone());
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Drop the entire index.
    pub fn clear(&self) {
        self.tags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_query() {
        let idx = TagIndex::new();
        idx.add_tags("a", &["T".to_string()]);
        idx.add_tags("b", &["T".to_string()]);
        idx.add_tags("c", &["U".to_string()]);

        let mut keys = idx.keys_for_tags(&["T".to_string()]);
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        let mut keys = idx.keys_for_tags(&["T".to_string(), "U".to_string()]);
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_key_purges_empty_tags() {
        let idx = TagIndex::new();
        idx.add_tags("a", &["T".to_string()]);
        idx.remove_key("a");
        assert!(idx.keys_for_tags(&["T".to_string()]).is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let idx = TagIndex::new();
        idx.add_tags("a", &["T".to_string()]);
        idx.clear();
        assert!(idx.keys_for_tags(&["T".to_string()]).is_empty());
    }
}
