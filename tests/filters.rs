//! Row-level filter tests: filter services named along the path veto
//! individual rows.

use std::sync::Arc;

use serde::Serialize;
use tempfile::TempDir;

use pathguard::{
    Artifact, ArtifactKind, AuthorizationManager, CacheManager, ContextSeed, Delegator, Dispatcher,
    ExecutionContext, LmdbDelegator, ServiceRegistry, ServiceReply, UserLogin,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Order {
    id: u32,
    amount: u32,
}

struct Fixture {
    _dir: TempDir,
    delegator: Arc<LmdbDelegator>,
    dispatcher: Arc<ServiceRegistry>,
    security: Arc<AuthorizationManager>,
}

fn fixture(name: &str) -> Fixture {
    let dir = TempDir::new().unwrap();
    let delegator = Arc::new(LmdbDelegator::open(name, dir.path()).unwrap());
    let caches = CacheManager::new(name);
    let security = Arc::new(
        AuthorizationManager::new(delegator.clone() as Arc<dyn Delegator>, &caches).unwrap(),
    );
    Fixture {
        _dir: dir,
        delegator,
        dispatcher: Arc::new(ServiceRegistry::new()),
        security,
    }
}

fn context_at(fx: &Fixture, user: &str, segments: &[&str]) -> ExecutionContext {
    let mut ctx = ExecutionContext::new();
    ctx.initialize(ContextSeed {
        user: Some(UserLogin::new(user)),
        delegator: Some(fx.delegator.clone() as Arc<dyn Delegator>),
        dispatcher: Some(fx.dispatcher.clone() as Arc<dyn Dispatcher>),
        security: Some(fx.security.clone()),
        ..ContextSeed::default()
    });
    for segment in segments {
        ctx.push_artifact(Artifact::new(*segment, ArtifactKind::Entity));
    }
    ctx
}

fn orders() -> Vec<Order> {
    vec![
        Order { id: 1, amount: 5 },
        Order { id: 2, amount: 50 },
        Order { id: 3, amount: 9 },
    ]
}

#[test]
fn a_filter_service_drops_vetoed_rows() {
    let fx = fixture("filter-veto");
    fx.delegator.add_user_grant("alice", "/orders", "filter=smallOrders").unwrap();
    fx.dispatcher.register("smallOrders", |call| {
        let amount = call
            .get("row")
            .and_then(|row| row.get("amount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(ServiceReply::permit(amount < 10))
    });

    let ctx = context_at(&fx, "alice", &["orders"]);
    let controller = ctx.access_controller().unwrap();
    let visible = controller.apply_filters(&ctx, orders());

    assert_eq!(visible.len(), 2);
    assert!(visible.iter().all(|o| o.amount < 10));
}

#[test]
fn rows_pass_untouched_without_filters() {
    let fx = fixture("filter-none");
    fx.delegator.add_user_grant("alice", "/orders", "READ=true").unwrap();

    let ctx = context_at(&fx, "alice", &["orders"]);
    let controller = ctx.access_controller().unwrap();
    assert_eq!(controller.apply_filters(&ctx, orders()), orders());
}

#[test]
fn every_filter_must_agree() {
    let fx = fixture("filter-all");
    fx.delegator.add_user_grant("alice", "/orders", "filter=smallOrders").unwrap();
    fx.delegator.add_user_grant("alice", "/orders", "filter=evenIds").unwrap();
    fx.dispatcher.register("smallOrders", |call| {
        let amount = call
            .get("row")
            .and_then(|row| row.get("amount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(ServiceReply::permit(amount < 10))
    });
    fx.dispatcher.register("evenIds", |call| {
        let id = call
            .get("row")
            .and_then(|row| row.get("id"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(ServiceReply::permit(id % 2 == 0))
    });

    let ctx = context_at(&fx, "alice", &["orders"]);
    let controller = ctx.access_controller().unwrap();
    // no order is both small and even-numbered
    assert!(controller.apply_filters(&ctx, orders()).is_empty());
}

/// A filter that cannot be invoked has no opinion; rows stay visible.
#[test]
fn an_unresolvable_filter_keeps_rows() {
    let fx = fixture("filter-error");
    fx.delegator.add_user_grant("alice", "/orders", "filter=missingFilter").unwrap();

    let ctx = context_at(&fx, "alice", &["orders"]);
    let controller = ctx.access_controller().unwrap();
    assert_eq!(controller.apply_filters(&ctx, orders()).len(), 3);
}

#[test]
fn the_iterator_variant_filters_lazily() {
    let fx = fixture("filter-iter");
    fx.delegator.add_user_grant("alice", "/orders", "filter=smallOrders").unwrap();
    fx.dispatcher.register("smallOrders", |call| {
        let amount = call
            .get("row")
            .and_then(|row| row.get("amount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(ServiceReply::permit(amount < 10))
    });

    let ctx = context_at(&fx, "alice", &["orders"]);
    let controller = ctx.access_controller().unwrap();
    let mut filtered = controller.filtered(&ctx, orders());
    assert_eq!(filtered.next().unwrap().id, 1);
    assert_eq!(filtered.next().unwrap().id, 3);
    assert!(filtered.next().is_none());
}
