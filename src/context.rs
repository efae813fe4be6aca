//! Per-execution state: identity, locale, properties, and the artifact stack

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::artifact::Artifact;
use crate::authz::AuthorizationManager;
use crate::delegator::Delegator;
use crate::dispatcher::Dispatcher;
use crate::error::{PathguardError, Result};
use crate::path::ArtifactPath;

const DEFAULT_LOCALE: &str = "en";
const DEFAULT_TIME_ZONE: &str = "UTC";
const DEFAULT_CURRENCY_UOM: &str = "USD";

/// The identity a context executes as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserLogin {
    pub id: String,
}

impl UserLogin {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// The stack of artifacts the current execution has entered. Its
/// concatenated names form the execution path.
#[derive(Debug, Default)]
pub struct ArtifactStack {
    frames: Vec<Artifact>,
}

impl ArtifactStack {
    pub fn push(&mut self, artifact: Artifact) {
        self.frames.push(artifact);
    }

    pub fn pop(&mut self) -> Option<Artifact> {
        self.frames.pop()
    }

    /// Pop everything down to and including the innermost artifact with
    /// the given name. No-op when no frame matches.
    pub fn pop_to(&mut self, name: &str) {
        if let Some(pos) = self.frames.iter().rposition(|a| a.name == name) {
            self.frames.truncate(pos);
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn path(&self) -> ArtifactPath {
        ArtifactPath::from_segments(self.frames.iter().map(|a| a.name.clone()))
    }
}

/// Wiring handed to [`ExecutionContext::initialize`]. Absent fields
/// leave the context untouched.
#[derive(Default)]
pub struct ContextSeed {
    pub user: Option<UserLogin>,
    pub locale: Option<String>,
    pub time_zone: Option<String>,
    pub currency_uom: Option<String>,
    pub delegator: Option<Arc<dyn Delegator>>,
    pub dispatcher: Option<Arc<dyn Dispatcher>>,
    pub security: Option<Arc<AuthorizationManager>>,
}

/// Container for the state one unit of work carries: who is executing,
/// where in the artifact tree it currently is, and the handles it needs
/// to reach storage, services, and authorization. One instance per
/// worker; nothing here is shared across workers.
pub struct ExecutionContext {
    user: Option<UserLogin>,
    locale: String,
    time_zone: String,
    currency_uom: String,
    properties: HashMap<String, Value>,
    stack: ArtifactStack,
    // counted authorization bypass; interior mutability so a scope can
    // be held while the context is otherwise borrowed shared
    bypass: Cell<u32>,
    delegator: Option<Arc<dyn Delegator>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    security: Option<Arc<AuthorizationManager>>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            user: None,
            locale: DEFAULT_LOCALE.to_string(),
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            currency_uom: DEFAULT_CURRENCY_UOM.to_string(),
            properties: HashMap::new(),
            stack: ArtifactStack::default(),
            bypass: Cell::new(0),
            delegator: None,
            dispatcher: None,
            security: None,
        }
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the context from `seed`, leaving absent fields alone.
    pub fn initialize(&mut self, seed: ContextSeed) {
        if let Some(user) = seed.user {
            self.user = Some(user);
        }
        if let Some(locale) = seed.locale {
            self.locale = locale;
        }
        if let Some(time_zone) = seed.time_zone {
            self.time_zone = time_zone;
        }
        if let Some(currency_uom) = seed.currency_uom {
            self.currency_uom = currency_uom;
        }
        if let Some(delegator) = seed.delegator {
            self.delegator = Some(delegator);
        }
        if let Some(dispatcher) = seed.dispatcher {
            self.dispatcher = Some(dispatcher);
        }
        if let Some(security) = seed.security {
            self.security = Some(security);
        }
    }

    /// Return the context to a neutral state for reuse. User-associated
    /// state is dropped; the delegator/dispatcher/security wiring stays.
    pub fn reset(&mut self) {
        self.user = None;
        self.locale = DEFAULT_LOCALE.to_string();
        self.time_zone = DEFAULT_TIME_ZONE.to_string();
        self.currency_uom = DEFAULT_CURRENCY_UOM.to_string();
        self.properties.clear();
        self.stack.clear();
        self.bypass.set(0);
    }

    pub fn user(&self) -> Option<&UserLogin> {
        self.user.as_ref()
    }

    pub fn set_user(&mut self, user: UserLogin) {
        self.user = Some(user);
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn set_locale(&mut self, locale: impl Into<String>) {
        self.locale = locale.into();
    }

    pub fn time_zone(&self) -> &str {
        &self.time_zone
    }

    pub fn set_time_zone(&mut self, time_zone: impl Into<String>) {
        self.time_zone = time_zone.into();
    }

    pub fn currency_uom(&self) -> &str {
        &self.currency_uom
    }

    pub fn set_currency_uom(&mut self, currency_uom: impl Into<String>) {
        self.currency_uom = currency_uom.into();
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Associate `value` with `key`, returning the previous value.
    pub fn set_property(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.properties.insert(key.into(), value)
    }

    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    pub fn push_artifact(&mut self, artifact: Artifact) {
        self.stack.push(artifact);
    }

    pub fn pop_artifact(&mut self) -> Option<Artifact> {
        self.stack.pop()
    }

    pub fn pop_to_artifact(&mut self, name: &str) {
        self.stack.pop_to(name);
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn artifact_path(&self) -> ArtifactPath {
        self.stack.path()
    }

    /// The current execution path as `/a/b/c`.
    pub fn execution_path(&self) -> String {
        self.stack.path().to_string()
    }

    /// Suspend authorization enforcement. Calls nest; enforcement
    /// resumes when the counter returns to zero.
    pub fn run_unprotected(&self) {
        self.bypass.set(self.bypass.get() + 1);
    }

    pub fn end_run_unprotected(&self) {
        self.bypass.set(self.bypass.get().saturating_sub(1));
    }

    pub fn is_unprotected(&self) -> bool {
        self.bypass.get() > 0
    }

    /// A guard that suspends enforcement until dropped, on every exit
    /// path.
    pub fn unprotected_scope(&self) -> UnprotectedScope<'_> {
        self.run_unprotected();
        UnprotectedScope { ctx: self }
    }

    pub fn delegator(&self) -> Option<Arc<dyn Delegator>> {
        self.delegator.clone()
    }

    pub fn set_delegator(&mut self, delegator: Arc<dyn Delegator>) {
        self.delegator = Some(delegator);
    }

    pub fn dispatcher(&self) -> Option<Arc<dyn Dispatcher>> {
        self.dispatcher.clone()
    }

    pub fn set_dispatcher(&mut self, dispatcher: Arc<dyn Dispatcher>) {
        self.dispatcher = Some(dispatcher);
    }

    pub fn security(&self) -> Option<Arc<AuthorizationManager>> {
        self.security.clone()
    }

    pub fn set_security(&mut self, security: Arc<AuthorizationManager>) {
        self.security = Some(security);
    }

    /// The access controller for this context's user, built or fetched
    /// through the bound security manager.
    pub fn access_controller(&self) -> Result<Arc<crate::authz::AccessController>> {
        let security = self
            .security
            .clone()
            .ok_or_else(|| PathguardError::Config("no security manager bound to the execution context".into()))?;
        security.access_controller(self)
    }
}

/// Scoped authorization bypass; releases on drop.
pub struct UnprotectedScope<'a> {
    ctx: &'a ExecutionContext,
}

impl Drop for UnprotectedScope<'_> {
    fn drop(&mut self) {
        self.ctx.end_run_unprotected();
    }
}
