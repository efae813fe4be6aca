//! Synchronous service dispatch for programmable permission checks and
//! row filters

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::error::{PathguardError, Result};

/// Parameters handed to an invoked service.
#[derive(Debug, Clone, Default)]
pub struct ServiceCall {
    pub params: Map<String, Value>,
}

impl ServiceCall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}

/// What a service reported back. `has_permission` carries the verdict of
/// a permission or filter service; `None` means the service had no
/// opinion.
#[derive(Debug, Clone, Default)]
pub struct ServiceReply {
    pub has_permission: Option<bool>,
    pub outputs: Map<String, Value>,
}

impl ServiceReply {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn permit(allowed: bool) -> Self {
        Self {
            has_permission: Some(allowed),
            ..Self::default()
        }
    }
}

/// Synchronous service invocation, as consumed by the access controller.
pub trait Dispatcher: Send + Sync {
    fn run_sync(&self, service: &str, call: ServiceCall) -> Result<ServiceReply>;
}

type ServiceFn = dyn Fn(&ServiceCall) -> Result<ServiceReply> + Send + Sync;

/// In-process name-to-handler registry.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<ServiceFn>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&ServiceCall) -> Result<ServiceReply> + Send + Sync + 'static,
    ) {
        self.services.insert(name.into(), Arc::new(handler));
    }

    pub fn deregister(&self, name: &str) {
        self.services.remove(name);
    }
}

impl Dispatcher for ServiceRegistry {
    fn run_sync(&self, service: &str, call: ServiceCall) -> Result<ServiceReply> {
        let handler = self
            .services
            .get(service)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PathguardError::Service(format!("unknown service: {}", service)))?;
        handler(&call)
    }
}
