use std::sync::Arc;

use governor_config::{ConfigReader, Version};

use crate::service::ServiceDef;

/// Shared state for the setup and health endpoints, the only handlers
/// the orchestrator itself owns (every other route comes from a
/// service's own sub-router).
#[derive(Clone)]
pub struct CoreState {
    pub services: Arc<Vec<ServiceDef>>,
    pub root_reader: ConfigReader,
    pub version: Version,
}
