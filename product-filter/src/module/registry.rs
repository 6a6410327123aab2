use std::collections::BTreeMap;

/// Entries kept before the oldest scene id is evicted
pub const MAX_ENTRIES: usize = 5;

/// Bounded record of recently filtered granules, keyed by scene id
/// (`%Y%m%d%H%M` of the granule start). Nothing reads it back yet.
#[derive(Debug, Clone, Default)]
pub struct FileRegistry {
    entries: BTreeMap<String, String>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` under `key`, evicting the smallest keys beyond capacity
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
        while self.entries.len() > MAX_ENTRIES {
            self.entries.pop_first();
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_smallest_keys() {
        let mut registry = FileRegistry::new();
        for minute in 0..7 {
            registry.put(format!("2017062110{:02}", minute), format!("granule-{}", minute));
        }

        assert_eq!(registry.len(), MAX_ENTRIES);
        assert_eq!(registry.get("201706211000"), None);
        assert_eq!(registry.get("201706211001"), None);
        assert_eq!(registry.get("201706211006"), Some("granule-6"));
        assert_eq!(registry.keys().next(), Some("201706211002"));
    }

    #[test]
    fn test_overwrite_keeps_size() {
        let mut registry = FileRegistry::new();
        registry.put("201706211005", "a");
        registry.put("201706211005", "b");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("201706211005"), Some("b"));
    }
}
