//! Service lifecycle orchestrator (C5): wires registered
//! [`Service`](service::Service) implementations, the layered config
//! resolver, and the router/middleware chain into one running HTTP
//! server, and drives the Register → InitAll → StartAll → (serve) →
//! StopAll sequence described in `spec.md` §4.5.
//!
//! Grounded in how the teacher's `local_backend` binary sequences backend
//! startup (config load, component init in a fixed order, then serve
//! until a shutdown signal fires), generalized to a pluggable service
//! list instead of one hardcoded set of components.

pub mod health;
pub mod registrar;
pub mod server;
pub mod service;
pub mod setup;
pub mod state;

pub use registrar::ServiceConfigRegistrar;
pub use service::{Service, ServiceDef, ServiceLogger};
pub use setup::ReqSetup;
pub use state::CoreState;

use std::collections::HashSet;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use governor_config::{Config, ConfigResolver, Opts, SecretBackend};
use governor_router::{RouterBuilder, RouterState};

/// Collects services before any of them has run. Names and URL prefixes
/// must each be unique across the whole server; both are checked at
/// registration time so a collision is a startup error, not a routing
/// surprise at request time.
pub struct Builder {
    opts: Opts,
    secret_backend: Arc<dyn SecretBackend>,
    defs: Vec<ServiceDef>,
    names: HashSet<String>,
    prefixes: HashSet<String>,
}

impl Builder {
    pub fn new(opts: Opts, secret_backend: Arc<dyn SecretBackend>) -> Self {
        Self {
            opts,
            secret_backend,
            defs: Vec::new(),
            names: HashSet::new(),
            prefixes: HashSet::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        url_prefix: impl Into<String>,
        service: Arc<dyn Service>,
    ) -> anyhow::Result<()> {
        let name = name.into();
        let url_prefix = url_prefix.into();

        if !self.names.insert(name.clone()) {
            return Err(governor_errors::with_invalid_config(
                anyhow::anyhow!("duplicate service name: {name}"),
                format!("service name already registered: {name}"),
            ));
        }
        if !self.prefixes.insert(url_prefix.clone()) {
            return Err(governor_errors::with_invalid_config(
                anyhow::anyhow!("duplicate service url prefix: {url_prefix}"),
                format!("service url prefix already registered: {url_prefix}"),
            ));
        }

        self.defs.push(ServiceDef { name, url_prefix, service });
        Ok(())
    }

    /// Runs Register and InitAll (`spec.md` §4.5): every service declares
    /// its config defaults, the layered config is resolved once, then each
    /// service's `init` runs in registration order. The first `init`
    /// failure aborts startup; later services never run.
    pub async fn build(self) -> anyhow::Result<App> {
        let mut resolver = ConfigResolver::new(self.opts, self.secret_backend);
        for def in &self.defs {
            let mut registrar = ServiceConfigRegistrar::new(&def.name, resolver.registrar_mut());
            def.service.register(&mut registrar);
        }

        let resolved = resolver.build()?;
        let config = resolved.config().clone();
        let router_state = RouterState::new(&config)?;

        let mut builder = RouterBuilder::new();
        for def in &self.defs {
            let reader = resolved.reader_for(&def.name);
            let logger = ServiceLogger::new(&def.name);
            let sub_router = def
                .service
                .init(reader, logger)
                .await
                .map_err(|err| governor_errors::with_invalid_config(err, format!("service {} failed to initialize", def.name)))?;
            builder = builder.mount(&join_path(&config.http.basepath, &def.url_prefix), sub_router);
        }

        let defs = Arc::new(self.defs);
        let core_state = CoreState {
            services: defs.clone(),
            root_reader: resolved.root_reader(),
            version: config.version.clone(),
        };
        let core_router: Router<CoreState> = Router::new()
            .route("/setupz", post(setup::setup_handler))
            .route("/healthz/live", get(health::live_handler))
            .route("/healthz/ready", get(health::ready_handler))
            .route("/healthz/version", get(health::version_handler))
            .with_state(core_state);

        builder = builder.mount_service(&config.http.basepath, core_router);

        let app = governor_router::with_middleware(builder.build(), router_state, &config);

        Ok(App { config, defs, app })
    }
}

fn join_path(base: &str, prefix: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), prefix)
}

/// A server whose services have all finished `init` and whose route tree
/// is fully assembled. [`App::run`] still owes the services `start`
/// before accepting traffic.
pub struct App {
    config: Config,
    defs: Arc<Vec<ServiceDef>>,
    app: Router,
}

impl App {
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs StartAll, serves until a shutdown signal, then StopAll in
    /// reverse registration order (`spec.md` §4.5).
    pub async fn run(self) -> anyhow::Result<()> {
        for def in self.defs.iter() {
            def.service
                .start()
                .await
                .map_err(|err| governor_errors::with_invalid_config(err, format!("service {} failed to start", def.name)))?;
        }

        let addr: std::net::SocketAddr = self
            .config
            .http
            .addr
            .parse()
            .map_err(|err: std::net::AddrParseError| {
                governor_errors::with_invalid_config(
                    anyhow::Error::from(err),
                    format!("invalid http.addr: {}", self.config.http.addr),
                )
            })?;

        let defs = self.defs.clone();
        let stop_all = async move {
            for def in defs.iter().rev() {
                if let Err(err) = def.service.stop().await {
                    tracing::error!(service = %def.name, error = ?err, "service stop failed");
                }
            }
        };

        server::run(self.app, addr, self.config.timeouts.shutdown, stop_all).await
    }
}
