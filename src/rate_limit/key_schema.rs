const DEFAULT_PREFIX: &str = "sliding-limiter";

/// Builds the store keys used by the limiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    prefix: String,
}

impl KeySchema {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key of the ordered set holding the hits of one sliding-window limiter.
    ///
    /// Limiters agreeing on `(name, window_size_ms, max_hits)` share a key and
    /// therefore a window.
    pub fn sliding_window_key(&self, name: &str, window_size_ms: f64, max_hits: u64) -> String {
        format!(
            "{}:limiter:sliding:{}:{}:{}",
            self.prefix, name, window_size_ms, max_hits
        )
    }
}

impl Default for KeySchema {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let schema = KeySchema::default();
        assert_eq!(
            schema.sliding_window_key("login", 1000.0, 5),
            "sliding-limiter:limiter:sliding:login:1000:5"
        );
        assert_eq!(
            KeySchema::new("app").sliding_window_key("x", 1500.5, 1),
            "app:limiter:sliding:x:1500.5:1"
        );
    }

    #[test]
    fn test_distinct_configurations_get_distinct_keys() {
        let schema = KeySchema::default();
        let base = schema.sliding_window_key("a", 1000.0, 10);

        assert_eq!(base, schema.sliding_window_key("a", 1000.0, 10));
        assert_ne!(base, schema.sliding_window_key("b", 1000.0, 10));
        assert_ne!(base, schema.sliding_window_key("a", 2000.0, 10));
        assert_ne!(base, schema.sliding_window_key("a", 1000.0, 11));
    }
}
