//! A [`Service`](crate::Service) only ever sets defaults under its own
//! name; it never sees the orchestrator-wide [`ConfigRegistrar`] trait
//! object directly. This scopes that capability the same way
//! [`governor_config::ConfigReader`] scopes reads, binding the service
//! name once so every call site downstream doesn't have to repeat it.

use governor_config::ConfigRegistrar;
use serde::Serialize;

pub struct ServiceConfigRegistrar<'a> {
    name: &'a str,
    inner: &'a mut dyn ConfigRegistrar,
}

impl<'a> ServiceConfigRegistrar<'a> {
    pub fn new(name: &'a str, inner: &'a mut dyn ConfigRegistrar) -> Self {
        Self { name, inner }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn set_default(&mut self, key: &str, value: impl Serialize) {
        let value = serde_json::to_value(value).expect("config default value must serialize to JSON");
        self.inner.set_default(self.name, key, value);
    }
}
