//! Initializes the global `tracing` subscriber from the `--log-level`/
//! `--log-plain` flags (`spec.md` §6 CLI surface), mirroring
//! `local_backend/src/main.rs`'s use of `EnvFilter` plus a plain-vs-json
//! `fmt` layer.

use tracing_subscriber::EnvFilter;

pub fn init(log_level: &str, log_plain: bool) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if log_plain {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    }
}
