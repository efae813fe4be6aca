//! Incident logging tests: audited paths produce audit rows, everything
//! else stays silent.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use pathguard::{
    Action, Artifact, ArtifactKind, AuthorizationManager, CacheManager, ContextSeed, Delegator,
    ExecutionContext, LmdbDelegator, Permission, UserLogin,
};

struct Fixture {
    _dir: TempDir,
    delegator: Arc<LmdbDelegator>,
    security: Arc<AuthorizationManager>,
}

fn fixture(name: &str) -> Fixture {
    let dir = TempDir::new().unwrap();
    let delegator = Arc::new(LmdbDelegator::open(name, dir.path()).unwrap());
    let caches = CacheManager::new(name);
    let security = Arc::new(
        AuthorizationManager::new(delegator.clone() as Arc<dyn Delegator>, &caches).unwrap(),
    );
    Fixture { _dir: dir, delegator, security }
}

fn context_at(fx: &Fixture, user: &str, segments: &[&str]) -> ExecutionContext {
    let mut ctx = ExecutionContext::new();
    ctx.initialize(ContextSeed {
        user: Some(UserLogin::new(user)),
        delegator: Some(fx.delegator.clone() as Arc<dyn Delegator>),
        security: Some(fx.security.clone()),
        ..ContextSeed::default()
    });
    for segment in segments {
        ctx.push_artifact(Artifact::new(*segment, ArtifactKind::Screen));
    }
    ctx
}

#[test]
fn a_matching_audited_path_writes_a_record() {
    let fx = fixture("audit-match");
    fx.delegator.add_audited_artifact("/admin/*", None, None).unwrap();

    let ctx = context_at(&fx, "alice", &["admin", "console"]);
    fx.security.log_incident(&ctx, &Permission::Atom(Action::Update)).unwrap();

    let incidents = fx.delegator.incidents().unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].user_login_id, "alice");
    assert_eq!(incidents[0].artifact_path, "/admin/console");
    assert_eq!(incidents[0].requested_access, "UPDATE");
}

#[test]
fn an_unaudited_path_writes_nothing() {
    let fx = fixture("audit-miss");
    fx.delegator.add_audited_artifact("/admin/*", None, None).unwrap();

    let ctx = context_at(&fx, "alice", &["reports", "daily"]);
    fx.security.log_incident(&ctx, &Permission::Atom(Action::Read)).unwrap();

    assert!(fx.delegator.incidents().unwrap().is_empty());
}

#[test]
fn expired_audit_ranges_are_ignored() {
    let fx = fixture("audit-dates");
    let past = Utc::now() - Duration::days(30);
    let yesterday = Utc::now() - Duration::days(1);
    fx.delegator
        .add_audited_artifact("/legacy/*", Some(past), Some(yesterday))
        .unwrap();
    fx.delegator
        .add_audited_artifact("/current/*", Some(past), None)
        .unwrap();

    let ctx = context_at(&fx, "bob", &["legacy", "page"]);
    fx.security.log_incident(&ctx, &Permission::Atom(Action::Read)).unwrap();
    assert!(fx.delegator.incidents().unwrap().is_empty());

    let ctx = context_at(&fx, "bob", &["current", "page"]);
    fx.security.log_incident(&ctx, &Permission::Atom(Action::Read)).unwrap();
    assert_eq!(fx.delegator.incidents().unwrap().len(), 1);
}

#[test]
fn repeated_incidents_append_in_order() {
    let fx = fixture("audit-order");
    fx.delegator.add_audited_artifact("/admin/*", None, None).unwrap();

    for (user, requested) in [("alice", Action::Read), ("bob", Action::Delete)] {
        let ctx = context_at(&fx, user, &["admin", "console"]);
        fx.security.log_incident(&ctx, &Permission::Atom(requested)).unwrap();
    }

    let incidents = fx.delegator.incidents().unwrap();
    assert_eq!(incidents.len(), 2);
    assert_eq!(incidents[0].user_login_id, "alice");
    assert_eq!(incidents[1].user_login_id, "bob");
    assert_eq!(incidents[1].requested_access, "DELETE");
}
