//! Client key generation.

use std::fmt;

/// Store key for one client's window.
///
/// The key is the configured namespace and the client identity joined by
/// `:`, so limiter data never collides with unrelated keys in a shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Create a key for `client` under `prefix`.
    pub fn new(prefix: &str, client: &str) -> Self {
        Self(format!("{}:{}", prefix, client))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_key_is_namespaced() {
        let key = ClientKey::new("rate_limiter", "10.0.0.7");
        assert_eq!(key.as_str(), "rate_limiter:10.0.0.7");
        assert_eq!(key.to_string(), "rate_limiter:10.0.0.7");
    }

    #[test]
    fn test_client_key_deterministic() {
        assert_eq!(ClientKey::new("p", "::1"), ClientKey::new("p", "::1"));
        assert_ne!(ClientKey::new("p", "a"), ClientKey::new("q", "a"));
    }
}
