//! The capability contract every plugged-in business service implements
//! (`spec.md` §4.5). The orchestrator in [`crate::App`] drives these hooks
//! in registration order (reverse order for [`Service::stop`]); a service
//! never calls another service's hooks or reaches outside the reader/
//! router/logger it's handed.

use async_trait::async_trait;
use axum::Router;
use governor_config::ConfigReader;
use governor_router::RouterState;

use crate::registrar::ServiceConfigRegistrar;
use crate::setup::ReqSetup;

/// A per-service structured logger, a thin wrapper over a [`tracing::Span`]
/// tagged with the service's name so every line it emits is attributable
/// without the service having to thread the name through itself. Mirrors
/// how [`governor_context::Context::log_attrs`] enriches the per-request
/// span rather than handing back a bespoke logger type.
#[derive(Clone)]
pub struct ServiceLogger {
    span: tracing::Span,
}

impl ServiceLogger {
    pub fn new(name: &str) -> Self {
        Self {
            span: tracing::info_span!("service", name = %name),
        }
    }

    pub fn info(&self, msg: &str) {
        self.span.in_scope(|| tracing::info!("{msg}"));
    }

    pub fn warn(&self, msg: &str) {
        self.span.in_scope(|| tracing::warn!("{msg}"));
    }

    pub fn error(&self, msg: &str) {
        self.span.in_scope(|| tracing::error!("{msg}"));
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

/// Implemented by each business service plugged into a governor server.
/// All hooks besides [`Service::init`] have a no-op default so a minimal
/// service (no background work, nothing to tear down, always healthy)
/// only has to implement the one hook that actually registers routes.
#[async_trait]
pub trait Service: Send + Sync {
    /// Declares config defaults under the service's own namespace. Called
    /// once per service, before any service's `init`.
    fn register(&self, _registrar: &mut ServiceConfigRegistrar<'_>) {}

    /// Builds the service's sub-router, mounted by the orchestrator at
    /// `basepath + url_prefix`. Failure here aborts startup entirely
    /// (`spec.md` §4.5 `InitAll`: "Abort on first error").
    async fn init(&self, reader: ConfigReader, logger: ServiceLogger) -> anyhow::Result<Router<RouterState>>;

    /// Starts any background work (pollers, consumers). Failure aborts
    /// startup; this runs only after every service has finished `init`.
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Tears down background work. Best-effort: the orchestrator logs
    /// failures but does not abort the shutdown sequence on them, and
    /// calls every service's `stop` even if an earlier one failed.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Re-runs setup/migration logic, invoked by the `/setupz` endpoint
    /// after the shared secret has already been verified.
    async fn setup(&self, _req: &ReqSetup) -> anyhow::Result<()> {
        Ok(())
    }

    /// Reports readiness for `/healthz/ready`. An `Err` here surfaces the
    /// error's message in the response body without failing the whole
    /// orchestrator.
    async fn health(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One registered service: its scoping name/URL prefix plus the `Service`
/// impl itself. Built by [`crate::Builder::register`]; never constructed
/// directly by a service.
pub struct ServiceDef {
    pub name: String,
    pub url_prefix: String,
    pub service: std::sync::Arc<dyn Service>,
}
