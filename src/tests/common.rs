//! Shared test subject and helpers.
//!
//! This module contains:
//! - `WidgetService`: an in-memory service that can be told to fail
//! - `Trail`: an ordered record of which callbacks ran
//! - `mark` / `mark_hook`: callbacks that only append to a trail

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;

use crate::{Assertion, Checked, Code, Context, HookResult, RunReport, Status};

// ============================================================================
// Widget service
// ============================================================================

/// A stored widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Widget {
    pub id: u32,
    pub name: String,
}

#[derive(Default)]
struct WidgetStore {
    next_id: u32,
    widgets: HashMap<u32, Widget>,
}

/// In-memory widget service shared between steps.
#[derive(Clone, Default)]
pub struct WidgetService {
    store: Arc<Mutex<WidgetStore>>,
    unavailable: bool,
    fetch_calls: Arc<AtomicUsize>,
}

impl WidgetService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service whose writes all fail with `Unavailable`.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub async fn create(&self, name: &str) -> Result<Widget, Status> {
        tokio::task::yield_now().await;
        if self.unavailable {
            return Err(Status::new(Code::Unavailable, "widgets are down").with_detail("retry_after", 30));
        }
        let mut store = self.store.lock();
        store.next_id += 1;
        let widget = Widget {
            id: store.next_id,
            name: name.to_owned(),
        };
        store.widgets.insert(widget.id, widget.clone());
        Ok(widget)
    }

    pub async fn fetch(&self, id: u32) -> Result<Widget, Status> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.store
            .lock()
            .widgets
            .get(&id)
            .cloned()
            .ok_or_else(|| Status::new(Code::NotFound, format!("widget {id} not found")))
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Trail
// ============================================================================

/// Ordered record of what ran, shared across callbacks.
#[derive(Clone, Default)]
pub struct Trail(Arc<Mutex<Vec<String>>>);

impl Trail {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }
}

/// A step callback that appends `entry` to the trail.
pub fn mark(
    trail: &Trail,
    entry: &'static str,
) -> impl Fn(Context, Assertion) -> BoxFuture<'static, Checked> + Send + Sync + 'static {
    let trail = trail.clone();
    move |_ctx, _a| {
        trail.push(entry);
        async { Ok(()) }.boxed()
    }
}

/// A hook callback that appends `entry` to the trail.
pub fn mark_hook(
    trail: &Trail,
    entry: &'static str,
) -> impl Fn(Context, Assertion) -> BoxFuture<'static, HookResult> + Send + Sync + 'static {
    let trail = trail.clone();
    move |_ctx, _a| {
        trail.push(entry);
        async { Ok(()) }.boxed()
    }
}

/// Messages buffered by the first unit named `unit`.
pub fn messages(report: &RunReport, unit: &str) -> Vec<String> {
    report
        .unit(unit)
        .map(|record| record.lines.iter().map(|line| line.render()).collect())
        .unwrap_or_default()
}
