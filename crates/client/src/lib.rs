//! Client framework (C6): mirrors service registration into a CLI command
//! tree, with an HTTP fetcher shared across the subcommands a registered
//! client exposes.
//!
//! Grounded in `crates/http_client/src/lib.rs` (a process-wide `reqwest`
//! client reused across calls) and `crates/health_check/src/lib.rs` (the
//! thin fetch-and-decode shape [`http::HTTPFetcher`] generalizes), with
//! the runtime-built subcommand tree grounded in `clap::Command`'s
//! builder API rather than the `clap::Parser` derive the teacher's own
//! binary uses for its static flag set (`spec.md` §4.6 needs commands
//! assembled from whatever clients happen to be registered, not known at
//! compile time).

pub mod cmd;
pub mod http;
pub mod term;

pub use cmd::{CmdDesc, CmdFlag, CmdFlagValue, CmdHandler, CmdRegistrar, CmdTree};
pub use http::{HTTPClient, HTTPFetcher};
pub use term::{Fs, NativeFs, Terminal};

use async_trait::async_trait;
use governor_config::ConfigReader;
use governor_core::{ServiceConfigRegistrar, ServiceLogger};

/// Everything a client's `init` needs besides its scoped config reader.
/// Mirrors `spec.md`'s `ClientKit{Logger, Term, HTTPClient}`; the fetcher
/// here is already scoped to the client's own `baseurl` config key, the
/// same way a service's reader is already scoped to its own name.
pub struct ClientKit {
    pub logger: ServiceLogger,
    pub term: Terminal,
    pub http: std::sync::Arc<HTTPFetcher>,
}

/// Implemented by each registered client (`spec.md` §4.6). Mirrors
/// [`governor_core::Service`] on the server side: `register` declares
/// config defaults and CLI commands, `init` runs once the config and
/// fetcher are ready.
#[async_trait]
pub trait Client: Send + Sync {
    /// Declares config defaults and CLI commands. Called once per client,
    /// before any client's `init`.
    fn register(&self, _config: &mut ServiceConfigRegistrar<'_>, _cmds: &mut CmdRegistrar) {}

    /// Runs once the layered config and the client's scoped fetcher are
    /// ready, before any subcommand handler runs.
    async fn init(&self, reader: ConfigReader, kit: ClientKit) -> anyhow::Result<()>;
}

/// Key under which a client's reader expects its `baseurl` default,
/// mirroring the server-side convention of a `setupsecret` key owned by
/// no one service (`spec.md` §9 "client's reader carries a `BaseURL`").
pub const BASE_URL_KEY: &str = "baseurl";
