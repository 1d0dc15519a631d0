//! Cancellable execution contexts.
//!
//! A [`Context`] is a cheap, cloneable handle forming a tree: cancelling a
//! context cancels every context derived from it, never its parent.
//! Cancellation is terminal.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;

/// Error returned when work is abandoned because its context was cancelled.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[error("context cancelled")]
pub struct Cancelled;

/// A cancellation scope.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: watch::Sender<bool>,
    parent: Option<Context>,
}

impl Context {
    /// A root context that is never cancelled unless [`cancel`](Self::cancel)
    /// is called on it.
    pub fn background() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<Context>) -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner { cancelled, parent }),
        }
    }

    /// Derive a child context, cancelled whenever `self` is.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    /// Cancel this context and everything derived from it.
    pub fn cancel(&self) {
        self.inner.cancelled.send_replace(true);
    }

    /// Whether this context or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.borrow()
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(Context::is_cancelled)
    }

    /// `Err(Cancelled)` once the context is cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once this context or any ancestor is cancelled.
    pub fn cancelled(&self) -> BoxFuture<'static, ()> {
        let ctx = self.clone();
        async move {
            let own = wait_for_cancel(ctx.inner.cancelled.subscribe());
            match &ctx.inner.parent {
                Some(parent) => {
                    let parent = parent.cancelled();
                    tokio::select! {
                        _ = own => {}
                        _ = parent => {}
                    }
                }
                None => own.await,
            }
        }
        .boxed()
    }

    /// Run `fut` until it finishes or the context is cancelled, whichever
    /// comes first.
    pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancelled() => Err(Cancelled),
        }
    }
}

async fn wait_for_cancel(mut rx: watch::Receiver<bool>) {
    loop {
        let cancelled = *rx.borrow_and_update();
        if cancelled {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: the context can no longer be cancelled.
            futures::future::pending::<()>().await;
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
