//! Access to the current worker's `ExecutionContext`
//!
//! Each worker thread owns one lazily-built context. Spawned workers do
//! not inherit it; re-seed them explicitly with [`initialize`].

use std::cell::RefCell;
use std::sync::OnceLock;

use crate::artifact::Artifact;
use crate::context::{ContextSeed, ExecutionContext};
use crate::error::Result;
use crate::permission::Permission;

type Factory = Box<dyn Fn() -> ExecutionContext + Send + Sync>;

static FACTORY: OnceLock<Factory> = OnceLock::new();

thread_local! {
    static CONTEXT: RefCell<Option<ExecutionContext>> = const { RefCell::new(None) };
}

/// Install the constructor used the first time a worker touches its
/// context. Later installs are ignored.
pub fn set_factory(factory: impl Fn() -> ExecutionContext + Send + Sync + 'static) {
    let _ = FACTORY.set(Box::new(factory));
}

/// Run `f` against this worker's context, materializing it on first use.
pub fn with<R>(f: impl FnOnce(&mut ExecutionContext) -> R) -> R {
    CONTEXT.with(|slot| {
        let mut slot = slot.borrow_mut();
        let ctx = slot.get_or_insert_with(|| match FACTORY.get() {
            Some(make) => make(),
            None => ExecutionContext::default(),
        });
        f(ctx)
    })
}

pub fn initialize(seed: ContextSeed) {
    with(|ctx| ctx.initialize(seed));
}

pub fn reset() {
    with(ExecutionContext::reset);
}

pub fn push_artifact(artifact: Artifact) {
    with(|ctx| ctx.push_artifact(artifact));
}

pub fn pop_artifact() -> Option<Artifact> {
    with(ExecutionContext::pop_artifact)
}

pub fn pop_to_artifact(name: &str) {
    with(|ctx| ctx.pop_to_artifact(name));
}

pub fn execution_path() -> String {
    with(|ctx| ctx.execution_path())
}

pub fn stack_depth() -> usize {
    with(|ctx| ctx.stack_depth())
}

pub fn run_unprotected() {
    with(|ctx| ctx.run_unprotected());
}

pub fn end_run_unprotected() {
    with(|ctx| ctx.end_run_unprotected());
}

pub fn is_unprotected() -> bool {
    with(|ctx| ctx.is_unprotected())
}

/// Check `requested` against the current path with this worker's
/// controller.
pub fn check_permission(requested: &Permission) -> Result<()> {
    with(|ctx| {
        let controller = ctx.access_controller()?;
        controller.check_permission(ctx, requested)
    })
}

/// Run `f` with `artifact` on the stack, popping on every exit path.
/// Guarded surfaces (template directives, service wrappers) use this to
/// keep the stack balanced around a unit of work.
pub fn with_artifact<R>(artifact: Artifact, f: impl FnOnce() -> R) -> R {
    let _frame = ArtifactFrame::enter(artifact);
    f()
}

/// Pushes an artifact for the duration of a scope; pops on drop, so the
/// stack balances on every exit path.
pub struct ArtifactFrame(());

impl ArtifactFrame {
    pub fn enter(artifact: Artifact) -> Self {
        push_artifact(artifact);
        Self(())
    }
}

impl Drop for ArtifactFrame {
    fn drop(&mut self) {
        pop_artifact();
    }
}

/// Suspends authorization for the current worker until dropped.
pub struct UnprotectedFrame(());

impl UnprotectedFrame {
    pub fn enter() -> Self {
        run_unprotected();
        Self(())
    }
}

impl Drop for UnprotectedFrame {
    fn drop(&mut self) {
        end_run_unprotected();
    }
}
