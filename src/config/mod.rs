use dashmap::DashMap;
use std::env;
use std::sync::Arc;

/// Key/value settings service.
///
/// Seeded from the process environment at startup and consumed read-only by
/// module constructors through their dependency view. Cloning is cheap; all
/// clones share the same entries.
#[derive(Clone, Default)]
pub struct ConfigService {
    entries: Arc<DashMap<String, String>>,
}

impl ConfigService {
    /// An empty config, for tests and fully programmatic setups.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A config seeded from the process environment.
    pub fn from_env() -> Self {
        let config = Self::default();
        for (key, value) in env::vars() {
            config.set(&key, &value);
        }
        config
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.clone())
    }

    /// Fetch a key, falling back to a default when unset.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let config = ConfigService::empty();
        config.set("service.name", "identity");
        assert_eq!(config.get("service.name").as_deref(), Some("identity"));
        assert_eq!(config.get("missing"), None);
    }

    #[test]
    fn test_get_or_default() {
        let config = ConfigService::empty();
        assert_eq!(config.get_or("server.bind", "0.0.0.0:8080"), "0.0.0.0:8080");
        config.set("server.bind", "127.0.0.1:9000");
        assert_eq!(config.get_or("server.bind", "0.0.0.0:8080"), "127.0.0.1:9000");
    }

    #[test]
    fn test_clones_share_entries() {
        let config = ConfigService::empty();
        let clone = config.clone();
        config.set("key", "value");
        assert_eq!(clone.get("key").as_deref(), Some("value"));
    }
}
