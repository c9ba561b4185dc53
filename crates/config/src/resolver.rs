use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use config::{Environment, File};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::registrar::Registrar;
use crate::secrets::{SecretBackend, SecretCacheEntry};
use crate::{Config, Opts};

/// Resolves the layered config sources (code defaults, environment,
/// search-path file, explicit `--config` file) into one immutable
/// [`Config`] and hands out scoped [`ConfigReader`]s to each registered
/// service.
///
/// Precedence, lowest to highest (later sources override earlier ones on
/// key conflict, matching `config::ConfigBuilder`'s layering model):
/// 1. code-registered defaults (via [`crate::ConfigRegistrar`])
/// 2. environment variables prefixed with [`Opts::env_prefix`]
/// 3. a file found on the standard search path (`./`, `./config`, the
///    user config dir)
/// 4. an explicit `--config` file
pub struct ConfigResolver {
    opts: Opts,
    registrar: Registrar,
    secret_backend: Arc<dyn SecretBackend>,
}

impl ConfigResolver {
    pub fn new(opts: Opts, secret_backend: Arc<dyn SecretBackend>) -> Self {
        Self {
            opts,
            registrar: Registrar::new(),
            secret_backend,
        }
    }

    pub fn registrar_mut(&mut self) -> &mut Registrar {
        &mut self.registrar
    }

    /// Replaces the flags this resolver was constructed with. Lets a
    /// caller collect config defaults (via [`Self::registrar_mut`])
    /// before CLI flags are parsed, then supply the real `--config` path
    /// and friends once they are known, without losing those defaults.
    pub fn set_opts(&mut self, opts: Opts) {
        self.opts = opts;
    }

    /// Search-path candidates consulted after environment variables but
    /// before the explicit `--config` file, in order.
    fn search_path_files(&self) -> Vec<std::path::PathBuf> {
        let mut candidates = vec![
            std::path::PathBuf::from("config.yaml"),
            std::path::PathBuf::from("config").join("config.yaml"),
        ];
        if let Some(dir) = dirs_config_dir() {
            candidates.push(dir.join(&self.opts.appname).join("config.yaml"));
        }
        candidates
    }

    /// Merge every source and parse the result into a [`ResolvedConfig`].
    /// Consumes `self`: the resolver only makes sense to run once, after
    /// every service has finished registering its defaults.
    pub fn build(self) -> anyhow::Result<ResolvedConfig> {
        let mut builder = config::Config::builder();

        for (key, value) in &self.registrar.defaults {
            builder = builder.set_default(key, json_to_config_value(value))?;
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.opts.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        for candidate in self.search_path_files() {
            if candidate.exists() {
                builder = builder.add_source(File::from(candidate).required(false));
            }
        }

        if let Some(explicit) = &self.opts.config_file {
            builder = builder.add_source(File::from(explicit.clone()).required(true));
        }

        let raw = builder.build().map_err(|e| {
            governor_errors::with_invalid_config(anyhow::Error::from(e), "failed to merge config sources")
        })?;

        let config: Config = raw.clone().try_deserialize().map_err(|e| {
            governor_errors::with_invalid_config(anyhow::Error::from(e), "config does not match expected shape")
        })?;

        Ok(ResolvedConfig {
            config,
            raw: Arc::new(raw),
            secret_backend: self.secret_backend,
            secret_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

fn dirs_config_dir() -> Option<std::path::PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(std::path::PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| std::path::PathBuf::from(h).join(".config")))
}

fn json_to_config_value(value: &Value) -> config::Value {
    use config::ValueKind;

    let kind = match value {
        Value::Null => ValueKind::Nil,
        Value::Bool(b) => ValueKind::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => ValueKind::I64(i),
            None => ValueKind::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => ValueKind::String(s.clone()),
        Value::Array(items) => ValueKind::Array(items.iter().map(json_to_config_value).collect()),
        Value::Object(map) => ValueKind::Table(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_config_value(v)))
                .collect(),
        ),
    };
    config::Value::new(None, kind)
}

/// The result of [`ConfigResolver::build`]: an immutable merged config
/// plus everything needed to mint scoped readers for each service.
#[derive(Clone)]
pub struct ResolvedConfig {
    config: Config,
    raw: Arc<config::Config>,
    secret_backend: Arc<dyn SecretBackend>,
    secret_cache: Arc<RwLock<HashMap<String, SecretCacheEntry>>>,
}

impl ResolvedConfig {
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A reader scoped to `service`, looking up `<service>.<key>` in the
    /// merged source and `<service>` as the mount-path default.
    pub fn reader_for(&self, service: &str) -> ConfigReader {
        ConfigReader {
            service: service.to_string(),
            raw: self.raw.clone(),
            secret_backend: self.secret_backend.clone(),
            secret_cache: self.secret_cache.clone(),
        }
    }

    /// A reader scoped to no service, for top-level keys like
    /// `setupsecret` that aren't owned by any one registered service.
    pub fn root_reader(&self) -> ConfigReader {
        self.reader_for("")
    }
}

/// A config view scoped to one service's namespace.
#[derive(Clone)]
pub struct ConfigReader {
    service: String,
    raw: Arc<config::Config>,
    secret_backend: Arc<dyn SecretBackend>,
    secret_cache: Arc<RwLock<HashMap<String, SecretCacheEntry>>>,
}

impl ConfigReader {
    pub fn service(&self) -> &str {
        &self.service
    }

    fn scoped_key(&self, key: &str) -> String {
        if self.service.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.service, key)
        }
    }

    pub fn get_str(&self, key: &str) -> anyhow::Result<String> {
        self.get(key)
    }

    pub fn get_bool(&self, key: &str) -> anyhow::Result<bool> {
        self.get(key)
    }

    pub fn get_int(&self, key: &str) -> anyhow::Result<i64> {
        self.get(key)
    }

    pub fn get_duration(&self, key: &str) -> anyhow::Result<Duration> {
        let raw: String = self.get(key)?;
        humantime::parse_duration(&raw).map_err(|e| {
            governor_errors::with_invalid_config(
                anyhow::Error::from(e),
                format!("{} is not a valid duration", self.scoped_key(key)),
            )
        })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        let scoped = self.scoped_key(key);
        self.raw.get::<T>(&scoped).map_err(|e| {
            governor_errors::with_invalid_config(anyhow::Error::from(e), format!("missing or invalid config key {scoped}"))
        })
    }

    /// Resolve a secret. `key` names a config entry whose *value* is an
    /// opaque backend-specific path (not the secret itself); `ttl` caps
    /// how long a freshly-fetched value may be cached even if the
    /// backend would allow longer.
    pub async fn get_secret<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> anyhow::Result<T> {
        let scoped = self.scoped_key(key);
        let now = SystemTime::now();

        if let Some(entry) = self.secret_cache.read().expect("secret cache lock poisoned").get(&scoped) {
            if entry.is_fresh(now) {
                return serde_json::from_value(entry.value.clone()).map_err(|e| {
                    governor_errors::with_invalid_config(anyhow::Error::from(e), format!("cached secret {scoped} has unexpected shape"))
                });
            }
        }

        let path: String = self.get(key)?;
        let (value, backend_expiry) = self.secret_backend.get_secret(&path).await?;

        let expire_at = match backend_expiry {
            Some(backend_expiry) => Some(backend_expiry.min(now + ttl)),
            None => Some(now + ttl),
        };

        self.secret_cache
            .write()
            .expect("secret cache lock poisoned")
            .insert(scoped.clone(), SecretCacheEntry::new(value.clone(), expire_at));

        serde_json::from_value(value).map_err(|e| {
            governor_errors::with_invalid_config(anyhow::Error::from(e), format!("secret {scoped} has unexpected shape"))
        })
    }

    /// Drop a cached secret immediately, forcing the next [`Self::get_secret`]
    /// to go back to the backend. Invalidates only the exact scoped key.
    pub fn invalidate_secret(&self, key: &str) {
        let scoped = self.scoped_key(key);
        self.secret_cache.write().expect("secret cache lock poisoned").remove(&scoped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::testing::StaticSecretBackend;
    use serde_json::json;
    use std::io::Write;

    fn test_opts(config_file: Option<std::path::PathBuf>) -> Opts {
        Opts {
            appname: "governor-test".to_string(),
            config_file,
            client_config_file: None,
            env_prefix: "GOVTEST".to_string(),
            log_level: "info".to_string(),
            log_plain: true,
        }
    }

    fn base_config_yaml() -> &'static str {
        r#"
appname: governor-test
version: { num: "test", hash: "dev" }
instance: test-instance
setupsecret: "vault://core/setupsecret"
http:
  addr: "127.0.0.1:8080"
cors:
  alloworigins: []
  allowpaths: []
  credentials: false
timeouts:
  read: 5s
  write: 5s
  idle: 60s
  shutdown: 16s
loglevel: info
"#
    }

    #[tokio::test]
    async fn explicit_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(base_config_yaml().as_bytes()).unwrap();

        let backend = Arc::new(StaticSecretBackend::new());
        let mut resolver = ConfigResolver::new(test_opts(Some(file.path().to_path_buf())), backend);
        resolver.registrar_mut().set_default("svc", "widgets", json!(3));

        let resolved = resolver.build().unwrap();
        assert_eq!(resolved.config().instance, "test-instance");

        let reader = resolved.reader_for("svc");
        let widgets: i64 = reader.get("widgets").unwrap();
        assert_eq!(widgets, 3);
    }

    #[tokio::test]
    async fn secret_cache_reuses_fresh_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(base_config_yaml().as_bytes()).unwrap();

        let backend = Arc::new(StaticSecretBackend::new());
        backend.set("vault://svc/apikey", json!("s3cr3t"), None);

        let mut resolver = ConfigResolver::new(test_opts(Some(file.path().to_path_buf())), backend.clone());
        resolver
            .registrar_mut()
            .set_default("svc", "apikeypath", json!("vault://svc/apikey"));

        let resolved = resolver.build().unwrap();
        let reader = resolved.reader_for("svc");

        let value: String = reader.get_secret("apikeypath", Duration::from_secs(30)).await.unwrap();
        assert_eq!(value, "s3cr3t");

        backend.set("vault://svc/apikey", json!("rotated"), None);
        let cached: String = reader.get_secret("apikeypath", Duration::from_secs(30)).await.unwrap();
        assert_eq!(cached, "s3cr3t", "fresh cache entry should not hit the backend again");

        reader.invalidate_secret("apikeypath");
        let refreshed: String = reader.get_secret("apikeypath", Duration::from_secs(30)).await.unwrap();
        assert_eq!(refreshed, "rotated");
    }
}
