//! Steps and hooks: the callbacks a [`Stepper`](crate::Stepper) runs.
//!
//! Both receive a cancellable [`Context`] and an [`Assertion`]. A step
//! reports failure through its assertion and returns [`Checked`]; a hook
//! may additionally fail with any error, which fails the unit it gates.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::assertion::{Assertion, Checked};
use crate::context::Context;

/// Error type returned by hooks.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result of a hook callback.
pub type HookResult = Result<(), BoxError>;

pub(crate) type StepFn = Arc<dyn Fn(Context, Assertion) -> BoxFuture<'static, Checked> + Send + Sync>;
pub(crate) type HookFn =
    Arc<dyn Fn(Context, Assertion) -> BoxFuture<'static, HookResult> + Send + Sync>;

/// When a hook runs relative to the scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Once per branch, before any step.
    Setup,
    /// Concurrently with the branch, cancelled when it ends.
    Background,
    /// Before every step.
    PreStep,
    /// Before every variation.
    PreVariation,
    /// After every step that did not fail.
    PostStep,
}

impl HookKind {
    /// Lower-case hook class name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Background => "background",
            Self::PreStep => "pre-step",
            Self::PreVariation => "pre-variation",
            Self::PostStep => "post-step",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named unit of work. Variations are steps too.
#[derive(Clone)]
pub struct Step {
    description: String,
    callback: StepFn,
}

impl Step {
    /// Wrap an async callback.
    pub fn new<F, Fut>(description: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Context, Assertion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Checked> + Send + 'static,
    {
        Self {
            description: description.into(),
            callback: Arc::new(move |ctx, a| callback(ctx, a).boxed()),
        }
    }

    /// The step's description, used as its unit name.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The callback is invoked on first poll, so a panic while building its
    /// future surfaces where the future is polled.
    pub(crate) fn call(&self, ctx: Context, a: Assertion) -> BoxFuture<'static, Checked> {
        let callback = self.callback.clone();
        async move { callback(ctx, a).await }.boxed()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A fallible callback attached to one of the [`HookKind`] classes.
#[derive(Clone)]
pub struct Hook {
    kind: HookKind,
    name: String,
    callback: HookFn,
}

impl Hook {
    /// Wrap an async callback. `index` numbers hooks within their class,
    /// from 1.
    pub(crate) fn new<F, Fut>(kind: HookKind, index: usize, callback: F) -> Self
    where
        F: Fn(Context, Assertion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        Self {
            kind,
            name: format!("{kind} hook #{index}"),
            callback: Arc::new(move |ctx, a| callback(ctx, a).boxed()),
        }
    }

    /// The hook's class.
    pub fn kind(&self) -> HookKind {
        self.kind
    }

    /// Identity used in failure messages, e.g. `pre-step hook #2`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn call(&self, ctx: Context, a: Assertion) -> BoxFuture<'static, HookResult> {
        let callback = self.callback.clone();
        async move { callback(ctx, a).await }.boxed()
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooks_are_named_by_class_and_position() {
        let hook = Hook::new(HookKind::PreVariation, 2, |_ctx, _a| async { Ok(()) });
        assert_eq!(hook.name(), "pre-variation hook #2");
        assert_eq!(hook.kind(), HookKind::PreVariation);
        assert_eq!(HookKind::PostStep.to_string(), "post-step");
    }

    #[test]
    fn step_debug_shows_description() {
        let step = Step::new("create widget", |_ctx, _a| async { Ok(()) });
        assert_eq!(step.description(), "create widget");
        assert!(format!("{step:?}").contains("create widget"));
    }

    #[tokio::test]
    async fn callback_runs_when_the_future_is_polled() {
        use std::sync::atomic::{AtomicBool, Ordering};

        use crate::assertion::StepScope;

        let called = Arc::new(AtomicBool::new(false));
        let step = Step::new("lazy", {
            let called = called.clone();
            move |_ctx, _a| {
                called.store(true, Ordering::SeqCst);
                async { Ok(()) }
            }
        });

        let scope = StepScope::new("lazy", Context::background());
        let fut = step.call(Context::background(), Assertion::new(scope));
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(fut.await, Ok(()));
        assert!(called.load(Ordering::SeqCst));
    }
}
