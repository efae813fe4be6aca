//! Authorization: building per-user permission tries and checking access

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::cache::{Cache, CacheManager, CacheSettings};
use crate::config;
use crate::context::ExecutionContext;
use crate::delegator::{AuditRecord, Delegator, Grant};
use crate::dispatcher::{Dispatcher, ServiceCall};
use crate::error::{PathguardError, Result};
use crate::path::ArtifactPath;
use crate::permission::{Permission, PermissionSet};
use crate::trie::PathNode;

const USER_PERMISSIONS_CACHE: &str = "authorization.user-permissions";

/// Resolves users' raw grants into path tries and hands out the
/// per-user [`AccessController`] instances that evaluate them.
///
/// One manager wraps one delegator. Resolved controllers are memoized
/// per user; at most one builder runs per user at a time, and the build
/// itself reads grant rows inside an unprotected scope so it cannot
/// recurse into authorization.
pub struct AuthorizationManager {
    delegator: Arc<dyn Delegator>,
    controllers: Arc<Cache<String, AccessController>>,
    build_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AuthorizationManager {
    pub fn new(delegator: Arc<dyn Delegator>, caches: &CacheManager) -> Result<Self> {
        let cache_name = format!("{}.{}", USER_PERMISSIONS_CACHE, delegator.name());
        let controllers = caches.get_or_create(&cache_name, CacheSettings::default())?;
        Ok(Self {
            delegator,
            controllers,
            build_locks: DashMap::new(),
        })
    }

    /// The controller for the context's current user, built on first
    /// use.
    pub fn access_controller(&self, ctx: &ExecutionContext) -> Result<Arc<AccessController>> {
        let user = ctx
            .user()
            .map(|u| u.id.clone())
            .ok_or_else(|| PathguardError::DataAccess("no user login bound to the execution context".into()))?;
        if let Some(controller) = self.controllers.get(&user) {
            return Ok(controller);
        }
        let lock = self
            .build_locks
            .entry(user.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _build = lock.lock();
        if let Some(controller) = self.controllers.get(&user) {
            return Ok(controller);
        }
        // The builder reads permission rows itself; enforcement stays
        // suspended until the tree is assembled.
        let _bypass = ctx.unprotected_scope();
        let root = self.build_tree(&user)?;
        Ok(self
            .controllers
            .put_if_absent_and_get(user.clone(), AccessController::new(user, root)))
    }

    /// Drop the cached controller for a user whose grants changed.
    pub fn clear_user_data(&self, user_login_id: &str) {
        self.controllers.remove(&user_login_id.to_string());
    }

    fn build_tree(&self, user: &str) -> Result<PathNode> {
        let mut root = PathNode::new();
        let mut seen = HashSet::new();
        // group grants first, user grants last
        for group in self.delegator.user_groups(user)? {
            self.apply_group(&group, &mut root, &mut seen)?;
        }
        self.apply_grants(user, self.delegator.user_grants(user)?, &mut root)?;
        Ok(root)
    }

    fn apply_group(&self, group: &str, root: &mut PathNode, seen: &mut HashSet<String>) -> Result<()> {
        if !seen.insert(group.to_string()) {
            return Ok(());
        }
        // parents first, so the closest group's grants land last
        for parent in self.delegator.parent_groups(group)? {
            self.apply_group(&parent, root, seen)?;
        }
        self.apply_grants(group, self.delegator.group_grants(group)?, root)
    }

    fn apply_grants(&self, holder: &str, grants: Vec<Grant>, root: &mut PathNode) -> Result<()> {
        for grant in grants {
            let pattern = ArtifactPath::parse(&grant.artifact_path);
            let mut set = PermissionSet::new(format!("{}@{}", holder, grant.artifact_path));
            set.apply_grant_value(&grant.permission_value)?;
            root.insert(&pattern, set);
        }
        Ok(())
    }

    /// Record a security incident if the current path is audited.
    ///
    /// An entity-layer failure here becomes `AccessDenied`: a broken
    /// audit trail must not mask a denial.
    pub fn log_incident(&self, ctx: &ExecutionContext, requested: &Permission) -> Result<()> {
        let _bypass = ctx.unprotected_scope();
        let outcome = self.write_incident(ctx, requested);
        outcome.map_err(|e| {
            error!(error = %e, "incident logging failed");
            PathguardError::AccessDenied {
                user: ctx.user().map(|u| u.id.clone()).unwrap_or_default(),
                path: ctx.execution_path(),
                requested: requested.to_string(),
            }
        })
    }

    fn write_incident(&self, ctx: &ExecutionContext, requested: &Permission) -> Result<()> {
        let now = Utc::now();
        let mut audited = PathNode::new();
        for artifact in self.delegator.audited_artifacts()? {
            if artifact.active_at(now) {
                audited.mark(&ArtifactPath::parse(&artifact.artifact_path));
            }
        }
        let path = ctx.artifact_path();
        if audited.matches(&path) {
            let user = ctx.user().map(|u| u.id.clone()).unwrap_or_default();
            info!(user = %user, path = %path, requested = %requested, "audited access");
            self.delegator.write_incident(AuditRecord {
                user_login_id: user,
                artifact_path: path.to_string(),
                incident_date: now,
                requested_access: requested.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Evaluates permission requests against one user's resolved grant trie
/// at the context's current execution path.
pub struct AccessController {
    user: String,
    root: PathNode,
    verbose: bool,
    disabled: bool,
}

impl AccessController {
    pub(crate) fn new(user: String, root: PathNode) -> Self {
        let flags = &config::get().authorization;
        Self {
            user,
            root,
            verbose: flags.verbose,
            disabled: flags.disabled,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Grant or deny `requested` at the context's current path.
    pub fn check_permission(&self, ctx: &ExecutionContext, requested: &Permission) -> Result<()> {
        if ctx.is_unprotected() {
            return Ok(());
        }
        let path = ctx.artifact_path();
        if self.verbose {
            info!(user = %self.user, path = %path, requested = %requested, "checking permission");
        }
        let found = self.resolve(&path);
        if self.verbose {
            info!(user = %self.user, path = %path, found = %found, "found permission(s)");
        }
        if self.disabled {
            return Ok(());
        }
        if found.implies(requested) && self.has_service_permission(ctx, &found) {
            return Ok(());
        }
        Err(PathguardError::AccessDenied {
            user: self.user.clone(),
            path: path.to_string(),
            requested: requested.to_string(),
        })
    }

    /// The grants accumulated along `path`, merged over every matching
    /// pattern. A fresh accumulator per call keeps the controller
    /// shareable across workers.
    fn resolve(&self, path: &ArtifactPath) -> PermissionSet {
        let mut found = PermissionSet::new(self.user.clone());
        self.root.get_permissions(path, &mut found);
        found
    }

    /// Run every permission service named along the path. An explicit
    /// `has_permission == false` denies; a failed invocation is logged
    /// and treated as no opinion.
    fn has_service_permission(&self, ctx: &ExecutionContext, found: &PermissionSet) -> bool {
        if found.services().is_empty() {
            return true;
        }
        let Some(dispatcher) = ctx.dispatcher() else {
            warn!(user = %self.user, "permission services named but no dispatcher bound");
            return true;
        };
        for service in found.services() {
            let call = self.service_call(ctx);
            match dispatcher.run_sync(service, call) {
                Ok(reply) => {
                    if reply.has_permission == Some(false) {
                        return false;
                    }
                }
                Err(e) => error!(service = %service, error = %e, "permission service failed"),
            }
        }
        true
    }

    /// Drop rows any filter along the current path vetoes.
    pub fn apply_filters<T: Serialize>(&self, ctx: &ExecutionContext, rows: Vec<T>) -> Vec<T> {
        self.filtered(ctx, rows).collect()
    }

    /// Lazily filtering iterator over `rows`; each row is shown to every
    /// filter service named along the current path and yielded only when
    /// all of them agree.
    pub fn filtered<I>(&self, ctx: &ExecutionContext, rows: I) -> FilteredRows<I::IntoIter>
    where
        I: IntoIterator,
        I::Item: Serialize,
    {
        let found = self.resolve(&ctx.artifact_path());
        FilteredRows {
            inner: rows.into_iter(),
            filters: found.filters().iter().cloned().collect(),
            dispatcher: ctx.dispatcher(),
            base: self.service_call(ctx),
        }
    }

    /// Context parameters augmented by user login, locale, and time zone
    /// when the caller did not set them.
    fn service_call(&self, ctx: &ExecutionContext) -> ServiceCall {
        let mut call = ServiceCall::new();
        for (key, value) in ctx.properties() {
            call.params.insert(key.clone(), value.clone());
        }
        if !call.params.contains_key("userLogin") {
            call.params
                .insert("userLogin".into(), Value::String(self.user.clone()));
        }
        if !call.params.contains_key("locale") {
            call.params
                .insert("locale".into(), Value::String(ctx.locale().to_string()));
        }
        if !call.params.contains_key("timeZone") {
            call.params
                .insert("timeZone".into(), Value::String(ctx.time_zone().to_string()));
        }
        call
    }
}

/// Iterator adapter applying row-level filter services.
pub struct FilteredRows<I> {
    inner: I,
    filters: Vec<String>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    base: ServiceCall,
}

impl<I> Iterator for FilteredRows<I>
where
    I: Iterator,
    I::Item: Serialize,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        'rows: for row in self.inner.by_ref() {
            if self.filters.is_empty() {
                return Some(row);
            }
            let Some(dispatcher) = &self.dispatcher else {
                return Some(row);
            };
            let value = match serde_json::to_value(&row) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "row not serializable; filters skipped");
                    return Some(row);
                }
            };
            for filter in &self.filters {
                let mut call = self.base.clone();
                call.params.insert("row".into(), value.clone());
                match dispatcher.run_sync(filter, call) {
                    Ok(reply) if reply.has_permission == Some(false) => continue 'rows,
                    Ok(_) => {}
                    Err(e) => error!(service = %filter, error = %e, "filter service failed"),
                }
            }
            return Some(row);
        }
        None
    }
}
