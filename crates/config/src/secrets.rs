use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde_json::Value;

/// A cached secret value together with when it should be considered
/// stale. Entries are treated as expired 5 seconds before their real
/// expiry so a request never races a backend that is about to reject the
/// value it just handed out.
#[derive(Debug, Clone)]
pub struct SecretCacheEntry {
    pub value: Value,
    pub expire_at: Option<SystemTime>,
}

impl SecretCacheEntry {
    const EARLY_EXPIRY: Duration = Duration::from_secs(5);

    pub fn new(value: Value, expire_at: Option<SystemTime>) -> Self {
        Self { value, expire_at }
    }

    pub fn is_fresh(&self, now: SystemTime) -> bool {
        match self.expire_at {
            None => true,
            Some(expire_at) => now + Self::EARLY_EXPIRY < expire_at,
        }
    }
}

/// Pluggable source of secret material, keyed by an opaque path string
/// stored in the layered config (e.g. `file:///etc/governor/secrets.json#db`
/// or a vault-specific URI). Concrete backends (file, environment, a
/// remote vault) are an external integration point, not something this
/// crate ships in production; [`secrets::testing::StaticSecretBackend`]
/// exists only so the rest of the workspace has something to test
/// against.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    async fn get_secret(&self, path: &str) -> anyhow::Result<(Value, Option<SystemTime>)>;

    fn info(&self) -> String;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::RwLock;

    use super::*;

    /// An in-memory secret backend for tests: secrets are seeded ahead of
    /// time and served back verbatim with no expiry unless one is set.
    #[derive(Default)]
    pub struct StaticSecretBackend {
        secrets: RwLock<HashMap<String, (Value, Option<SystemTime>)>>,
    }

    impl StaticSecretBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, path: impl Into<String>, value: Value, expire_at: Option<SystemTime>) {
            self.secrets
                .write()
                .expect("secret backend lock poisoned")
                .insert(path.into(), (value, expire_at));
        }
    }

    #[async_trait]
    impl SecretBackend for StaticSecretBackend {
        async fn get_secret(&self, path: &str) -> anyhow::Result<(Value, Option<SystemTime>)> {
            self.secrets
                .read()
                .expect("secret backend lock poisoned")
                .get(path)
                .cloned()
                .ok_or_else(|| {
                    governor_errors::with_vault(
                        anyhow::anyhow!("no such secret: {path}"),
                        format!("secret not found: {path}"),
                    )
                })
        }

        fn info(&self) -> String {
            "static-test-backend".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn entry_without_expiry_is_always_fresh() {
        let entry = SecretCacheEntry::new(Value::Null, None);
        assert!(entry.is_fresh(SystemTime::now() + Duration::from_secs(1_000_000)));
    }

    #[test]
    fn entry_is_stale_inside_early_expiry_window() {
        let now = SystemTime::now();
        let entry = SecretCacheEntry::new(Value::Null, Some(now + Duration::from_secs(3)));
        assert!(!entry.is_fresh(now));
    }

    #[test]
    fn entry_is_fresh_well_before_expiry() {
        let now = SystemTime::now();
        let entry = SecretCacheEntry::new(Value::Null, Some(now + Duration::from_secs(60)));
        assert!(entry.is_fresh(now));
    }
}
