//! Configuration and secrets (C1).
//!
//! Loading follows the same layered-source idiom the teacher uses for its
//! async config reload (`config_loader`), generalized with the `config`
//! crate's source-precedence model: code-registered defaults are the
//! lowest-priority layer, an optional file found on the standard search
//! path overrides them, environment variables override that, and an
//! explicit `--config` file (the highest-priority layer) wins over all of
//! it. Secrets are resolved through a pluggable [`SecretBackend`] behind a
//! small TTL cache, never through the layered config source itself (the
//! config only stores *where* a secret lives, e.g. a vault path).

mod registrar;
mod resolver;
mod secrets;

pub use registrar::{ConfigRegistrar, Registrar};
pub use resolver::{ConfigReader, ConfigResolver, ResolvedConfig};
pub use secrets::{SecretBackend, SecretCacheEntry};

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Version of the running service, reported on the `/healthz/version`
/// endpoint and in startup logs. `num` is the release/build number,
/// `hash` the source revision it was built from; the wire form
/// concatenates them as `num + "-" + hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub num: String,
    pub hash: String,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.num, self.hash)
    }
}

/// Command-line flags read before any config source is consulted: they
/// decide *how* to find everything else.
#[derive(Debug, Clone)]
pub struct Opts {
    pub appname: String,
    pub config_file: Option<PathBuf>,
    pub client_config_file: Option<PathBuf>,
    pub env_prefix: String,
    pub log_level: String,
    pub log_plain: bool,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            appname: "governor".to_string(),
            config_file: None,
            client_config_file: None,
            env_prefix: "GOV".to_string(),
            log_level: "info".to_string(),
            log_plain: false,
        }
    }
}

/// A rule in the path-rewrite table applied before routing: requests
/// whose path matches `pattern` (and, if set, whose host/method match
/// `host_match`/`method_set`) are rewritten with `replace` (`$1`-style
/// capture group references allowed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteRule {
    #[serde(default)]
    pub host_match: Option<String>,
    #[serde(default)]
    pub method_set: Option<Vec<String>>,
    #[serde(with = "regex_serde")]
    pub pattern: Regex,
    pub replace: String,
}

/// A rule naming a path that must always receive permissive CORS
/// treatment regardless of the configured origin allowlist (health and
/// well-known endpoints, typically).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CORSPathRule {
    #[serde(with = "regex_serde")]
    pub pattern: Regex,
}

mod regex_serde {
    use regex::Regex;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(re: &Regex, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(re.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Regex, D::Error> {
        let raw = String::deserialize(d)?;
        Regex::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// Top-level resolved configuration, merged from all sources in
/// precedence order and immutable for the lifetime of the process (a new
/// `Config` requires a restart, matching the teacher's own preference for
/// restart-over-hot-reload for anything structural).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub appname: String,
    pub version: Version,
    pub instance: String,
    /// Config-key path to the setup endpoint's shared secret in the
    /// secret backend (e.g. `file:///etc/governor/secrets.json#setup`),
    /// resolved the same way a service resolves its own secrets.
    pub setupsecret: String,
    pub http: HttpConfig,
    pub cors: CorsConfig,
    #[serde(default)]
    pub rewrite: Vec<RewriteRule>,
    #[serde(default)]
    pub trustedproxies: Vec<String>,
    pub timeouts: TimeoutConfig,
    pub loglevel: String,
    #[serde(default)]
    pub logoutput: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub addr: String,
    #[serde(default = "default_base_path")]
    pub basepath: String,
    #[serde(default = "default_max_req_size")]
    pub maxreqsize: u64,
    #[serde(default = "default_max_header_size")]
    pub maxheadersize: u64,
}

fn default_base_path() -> String {
    "/api".to_string()
}

fn default_max_req_size() -> u64 {
    2 << 20
}

fn default_max_header_size() -> u64 {
    1 << 20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub alloworigins: Vec<String>,
    #[serde(default)]
    pub allowpaths: Vec<CORSPathRule>,
    #[serde(default)]
    pub credentials: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read: Duration,
    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    pub write: Duration,
    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    pub idle: Duration,
    #[serde(with = "humantime_serde", default = "default_shutdown_timeout")]
    pub shutdown: Duration,
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(16)
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read: default_read_timeout(),
            write: default_write_timeout(),
            idle: default_idle_timeout(),
            shutdown: default_shutdown_timeout(),
        }
    }
}
