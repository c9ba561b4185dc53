use std::collections::HashMap;

use serde_json::Value;

/// Called by each service during the Register phase of startup to
/// declare the defaults it needs if no higher-priority config source
/// sets them. Collected centrally so the orchestrator can build one
/// merged config source before any service is initialized.
pub trait ConfigRegistrar {
    fn set_default(&mut self, service: &str, key: &str, value: Value);
}

#[derive(Debug, Default)]
pub struct Registrar {
    pub(crate) defaults: HashMap<String, Value>,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigRegistrar for Registrar {
    fn set_default(&mut self, service: &str, key: &str, value: Value) {
        self.defaults.insert(format!("{service}.{key}"), value);
    }
}
