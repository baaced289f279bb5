use std::collections::HashMap;

use crate::study::Study;

/// Parsed studies kept in memory per selection, so reopening the same folder
/// skips re-reading every file.
#[derive(Debug, Default)]
pub struct StudyCache {
    entries: HashMap<String, Vec<Study>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub total_studies: usize,
    pub keys: Vec<String>,
}

impl StudyCache {
    pub fn get(&self, key: &str) -> Option<&[Study]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn insert(&mut self, key: impl Into<String>, studies: Vec<Study>) {
        let key = key.into();
        log::debug!("Cached {} studies for {key}", studies.len());
        self.entries.insert(key, studies);
    }

    pub fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            log::debug!("Cleared study cache for {key}");
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let mut keys = self.entries.keys().cloned().collect::<Vec<_>>();
        keys.sort();
        CacheStats {
            size: self.entries.len(),
            total_studies: self.entries.values().map(Vec::len).sum(),
            keys,
        }
    }
}

/// Stable cache key for a set of opened paths.
pub fn cache_key(paths: &[std::path::PathBuf]) -> String {
    let mut normalized = paths
        .iter()
        .map(|path| path.to_string_lossy().to_string())
        .collect::<Vec<_>>();
    normalized.sort();
    format!("{}:{}", normalized.len(), normalized.join("|"))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::study::fixtures::record;
    use crate::study::organize;

    #[test]
    fn insert_get_and_remove() {
        let mut cache = StudyCache::default();
        let studies = organize(vec![record("s1", "a", "1", 1, 1), record("s2", "b", "2", 1, 1)]);
        cache.insert("folder", studies);

        assert_eq!(cache.get("folder").map(<[Study]>::len), Some(2));
        assert!(cache.get("other").is_none());

        cache.remove("folder");
        assert!(cache.get("folder").is_none());
    }

    #[test]
    fn stats_count_entries_and_studies() {
        let mut cache = StudyCache::default();
        cache.insert("b", organize(vec![record("s1", "a", "1", 1, 1)]));
        cache.insert("a", organize(vec![record("s1", "a", "1", 1, 1), record("s2", "a", "2", 1, 1)]));

        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.total_studies, 3);
        assert_eq!(stats.keys, vec!["a".to_string(), "b".to_string()]);

        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn cache_key_ignores_selection_order() {
        let a = vec![PathBuf::from("/x/1.dcm"), PathBuf::from("/x/2.dcm")];
        let b = vec![PathBuf::from("/x/2.dcm"), PathBuf::from("/x/1.dcm")];
        assert_eq!(cache_key(&a), cache_key(&b));
        assert_ne!(cache_key(&a), cache_key(&a[..1]));
    }
}
