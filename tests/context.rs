//! Execution context and artifact stack tests

use std::thread;

use serde_json::json;

use pathguard::thread_context::{self, ArtifactFrame, UnprotectedFrame};
use pathguard::{Artifact, ArtifactKind, ExecutionContext, UserLogin};

// ============================================================================
// Stack and Path
// ============================================================================

#[test]
fn execution_path_joins_artifact_names() {
    let mut ctx = ExecutionContext::new();
    assert_eq!(ctx.execution_path(), "/");

    ctx.push_artifact(Artifact::new("module", ArtifactKind::Screen));
    ctx.push_artifact(Artifact::new("view", ArtifactKind::Screen));
    ctx.push_artifact(Artifact::new("detail", ArtifactKind::Template));
    assert_eq!(ctx.execution_path(), "/module/view/detail");

    assert_eq!(ctx.pop_artifact().unwrap().name, "detail");
    assert_eq!(ctx.execution_path(), "/module/view");
}

#[test]
fn pop_to_unwinds_through_the_named_artifact() {
    let mut ctx = ExecutionContext::new();
    for name in ["a", "b", "c", "d"] {
        ctx.push_artifact(Artifact::generic(name));
    }

    ctx.pop_to_artifact("b");
    assert_eq!(ctx.execution_path(), "/a");

    // absent names leave the stack alone
    ctx.pop_to_artifact("zzz");
    assert_eq!(ctx.execution_path(), "/a");
}

#[test]
fn pop_to_unwinds_to_the_innermost_match() {
    let mut ctx = ExecutionContext::new();
    for name in ["a", "b", "a", "c"] {
        ctx.push_artifact(Artifact::generic(name));
    }
    ctx.pop_to_artifact("a");
    assert_eq!(ctx.execution_path(), "/a/b");
}

/// Any unit of work leaves the stack exactly as deep as it found it.
#[test]
fn frames_balance_the_stack_on_every_exit_path() {
    let before = thread_context::stack_depth();
    {
        let _outer = ArtifactFrame::enter(Artifact::generic("outer"));
        let _inner = ArtifactFrame::enter(Artifact::generic("inner"));
        assert_eq!(thread_context::execution_path(), "/outer/inner");
    }
    assert_eq!(thread_context::stack_depth(), before);

    let result = std::panic::catch_unwind(|| {
        let _frame = ArtifactFrame::enter(Artifact::generic("doomed"));
        panic!("unit of work failed");
    });
    assert!(result.is_err());
    assert_eq!(thread_context::stack_depth(), before);
}

#[test]
fn with_artifact_scopes_a_unit_of_work() {
    let path = thread_context::with_artifact(Artifact::generic("scoped"), || {
        thread_context::execution_path()
    });
    assert_eq!(path, "/scoped");
    assert_eq!(thread_context::execution_path(), "/");
}

// ============================================================================
// Unprotected Scopes
// ============================================================================

#[test]
fn unprotected_calls_nest_and_unwind() {
    let ctx = ExecutionContext::new();
    assert!(!ctx.is_unprotected());

    ctx.run_unprotected();
    ctx.run_unprotected();
    assert!(ctx.is_unprotected());
    ctx.end_run_unprotected();
    assert!(ctx.is_unprotected());
    ctx.end_run_unprotected();
    assert!(!ctx.is_unprotected());

    // unbalanced ends do not underflow
    ctx.end_run_unprotected();
    assert!(!ctx.is_unprotected());
}

#[test]
fn unprotected_frame_releases_on_drop() {
    assert!(!thread_context::is_unprotected());
    {
        let _frame = UnprotectedFrame::enter();
        assert!(thread_context::is_unprotected());
    }
    assert!(!thread_context::is_unprotected());
}

// ============================================================================
// Properties and Reset
// ============================================================================

#[test]
fn properties_replace_and_report_previous_values() {
    let mut ctx = ExecutionContext::new();
    assert!(ctx.set_property("page", json!(1)).is_none());
    let old = ctx.set_property("page", json!(2)).unwrap();
    assert_eq!(old, json!(1));
    assert_eq!(ctx.property("page").unwrap(), &json!(2));
}

#[test]
fn reset_clears_user_state_but_keeps_defaults() {
    let mut ctx = ExecutionContext::new();
    ctx.set_user(UserLogin::new("alice"));
    ctx.set_locale("fr");
    ctx.set_time_zone("Europe/Paris");
    ctx.set_currency_uom("EUR");
    ctx.set_property("k", json!("v"));
    ctx.push_artifact(Artifact::generic("a"));
    ctx.run_unprotected();

    ctx.reset();
    assert!(ctx.user().is_none());
    assert_eq!(ctx.locale(), "en");
    assert_eq!(ctx.time_zone(), "UTC");
    assert_eq!(ctx.currency_uom(), "USD");
    assert!(ctx.property("k").is_none());
    assert_eq!(ctx.execution_path(), "/");
    assert!(!ctx.is_unprotected());
}

// ============================================================================
// Worker Isolation
// ============================================================================

/// Each worker owns its context; pushes elsewhere never show up here.
#[test]
fn worker_contexts_are_independent() {
    thread_context::push_artifact(Artifact::generic("main-only"));
    let other_path = thread::spawn(|| {
        thread_context::push_artifact(Artifact::generic("worker-only"));
        thread_context::execution_path()
    })
    .join()
    .unwrap();

    assert_eq!(other_path, "/worker-only");
    assert!(thread_context::execution_path().contains("main-only"));
    thread_context::pop_artifact();
}
