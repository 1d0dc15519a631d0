//! The reporting collaborator a run drives.
//!
//! The engine never prints or decides pass/fail presentation itself. It
//! hands every unit to [`Reporter::run_sub_unit`] and writes its failure
//! dump through [`Reporter::log`]. Two implementations ship with the crate:
//! [`ConsoleReporter`] for standalone binaries and [`MemoryReporter`] for
//! embedding and tests.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

/// A unit of work to run under a child reporter.
pub struct SubUnit(Box<dyn for<'r> FnOnce(&'r mut dyn Reporter) -> BoxFuture<'r, ()> + Send>);

impl SubUnit {
    /// Wrap a closure receiving the child reporter.
    pub fn new<F>(f: F) -> Self
    where
        F: for<'r> FnOnce(&'r mut dyn Reporter) -> BoxFuture<'r, ()> + Send + 'static,
    {
        Self(Box::new(f))
    }

    /// Run the unit to completion under `reporter`.
    pub async fn run(self, reporter: &mut dyn Reporter) {
        (self.0)(reporter).await
    }
}

impl fmt::Debug for SubUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubUnit")
    }
}

/// A test-reporting sink with nested sub-units.
#[async_trait::async_trait]
pub trait Reporter: Send {
    /// Run `unit` under a child reporter named `name` and return whether it
    /// passed.
    ///
    /// An implementation may decline to run the unit (a name filter, say);
    /// the engine notices and treats that as a failure of the run.
    async fn run_sub_unit(&mut self, name: &str, unit: SubUnit) -> bool;

    /// Mark this unit failed and keep going.
    fn mark_failed(&mut self);

    /// Mark this unit failed terminally. Callers return right after.
    fn abort_now(&mut self);

    /// Whether this unit has failed.
    fn failed(&self) -> bool;

    /// Write a line to the unit's output.
    fn log(&mut self, message: &str);

    /// Write a formatted line to the unit's output.
    fn logf(&mut self, args: fmt::Arguments<'_>) {
        self.log(&args.to_string());
    }

    /// Marks the caller as a helper frame. Does nothing by default.
    fn helper(&self) {}
}

// ============================================================================
// Console
// ============================================================================

/// Prints to stdout, indenting each nesting level.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    failed: bool,
    depth: usize,
}

impl ConsoleReporter {
    /// A top-level console reporter.
    pub fn new() -> Self {
        Self::default()
    }

    fn indent(&self) -> String {
        "  ".repeat(self.depth)
    }
}

#[async_trait::async_trait]
impl Reporter for ConsoleReporter {
    async fn run_sub_unit(&mut self, name: &str, unit: SubUnit) -> bool {
        println!("{}== STEP {name}", self.indent());
        let mut child = ConsoleReporter {
            failed: false,
            depth: self.depth + 1,
        };
        unit.run(&mut child).await;
        if child.failed {
            self.failed = true;
        }
        !child.failed
    }

    fn mark_failed(&mut self) {
        self.failed = true;
    }

    fn abort_now(&mut self) {
        self.failed = true;
    }

    fn failed(&self) -> bool {
        self.failed
    }

    fn log(&mut self, message: &str) {
        let indent = self.indent();
        for line in message.lines() {
            println!("{indent}{line}");
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Clone)]
struct SkipFilter(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl fmt::Debug for SkipFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SkipFilter")
    }
}

/// Records a tree of sub-units in memory.
///
/// Paths join unit names with `/`. A skip filter makes the reporter decline
/// matching units: they are recorded as skipped, never run, and reported as
/// passed, the way a test harness's name filter behaves.
#[derive(Debug, Clone, Default)]
pub struct MemoryReporter {
    path: String,
    failed: bool,
    aborted: bool,
    skipped: bool,
    lines: Vec<String>,
    children: Vec<MemoryReporter>,
    skip: Option<SkipFilter>,
}

impl MemoryReporter {
    /// An empty root reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decline to run any sub-unit whose name matches `filter`.
    pub fn with_skip<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(SkipFilter(Arc::new(filter)));
        self
    }

    /// Whether this unit passed.
    pub fn passed(&self) -> bool {
        !self.failed
    }

    /// Whether `abort_now` was called on this unit.
    pub fn aborted(&self) -> bool {
        self.aborted
    }

    /// Whether this unit was declined by the skip filter.
    pub fn skipped(&self) -> bool {
        self.skipped
    }

    /// This unit's path; empty at the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Lines logged directly to this unit.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Direct sub-units, in the order they were entered.
    pub fn children(&self) -> &[MemoryReporter] {
        &self.children
    }

    /// Find a descendant by path.
    pub fn find(&self, path: &str) -> Option<&MemoryReporter> {
        self.children.iter().find_map(|child| {
            if child.path == path {
                Some(child)
            } else {
                child.find(path)
            }
        })
    }

    /// Paths of every sub-unit that actually ran, depth first.
    pub fn entered(&self) -> Vec<String> {
        let mut out = Vec::new();
        for child in self.children.iter().filter(|child| !child.skipped) {
            out.push(child.path.clone());
            out.extend(child.entered());
        }
        out
    }

    /// Every line logged anywhere in the tree, depth first.
    pub fn all_lines(&self) -> Vec<String> {
        let mut out = self.lines.clone();
        for child in &self.children {
            out.extend(child.all_lines());
        }
        out
    }

    fn child(&self, name: &str) -> Self {
        let path = if self.path.is_empty() {
            name.to_owned()
        } else {
            format!("{}/{name}", self.path)
        };
        Self {
            path,
            skip: self.skip.clone(),
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
impl Reporter for MemoryReporter {
    async fn run_sub_unit(&mut self, name: &str, unit: SubUnit) -> bool {
        let mut child = self.child(name);
        if self.skip.as_ref().is_some_and(|skip| (skip.0)(name)) {
            child.skipped = true;
            self.children.push(child);
            return true;
        }

        unit.run(&mut child).await;
        let passed = child.passed();
        self.children.push(child);
        if !passed {
            self.failed = true;
        }
        passed
    }

    fn mark_failed(&mut self) {
        self.failed = true;
    }

    fn abort_now(&mut self) {
        self.failed = true;
        self.aborted = true;
    }

    fn failed(&self) -> bool {
        self.failed
    }

    fn log(&mut self, message: &str) {
        self.lines.push(message.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;

    fn failing() -> SubUnit {
        SubUnit::new(|t| {
            async move {
                t.log("going down");
                t.mark_failed();
            }
            .boxed()
        })
    }

    fn passing() -> SubUnit {
        SubUnit::new(|t| async move { t.logf(format_args!("fine {}", 1)) }.boxed())
    }

    #[tokio::test]
    async fn memory_reporter_propagates_child_failure() {
        let mut root = MemoryReporter::new();
        assert!(root.run_sub_unit("first", passing()).await);
        assert!(root.passed());

        assert!(!root.run_sub_unit("second", failing()).await);
        assert!(!root.passed());
        assert_eq!(root.entered(), vec!["first", "second"]);
        assert_eq!(root.all_lines(), vec!["fine 1", "going down"]);
    }

    #[tokio::test]
    async fn memory_reporter_nests_paths() {
        let mut root = MemoryReporter::new();
        root.run_sub_unit(
            "outer",
            SubUnit::new(|t| {
                async move {
                    t.run_sub_unit("inner", failing()).await;
                }
                .boxed()
            }),
        )
        .await;

        assert_eq!(root.entered(), vec!["outer", "outer/inner"]);
        let inner = root.find("outer/inner").expect("inner recorded");
        assert_eq!(inner.lines(), ["going down"]);
        assert!(!root.find("outer").expect("outer recorded").passed());
    }

    #[tokio::test]
    async fn skip_filter_declines_units() {
        let mut root = MemoryReporter::new().with_skip(|name| name.starts_with("slow"));
        assert!(root.run_sub_unit("slow one", failing()).await);
        assert!(root.passed());
        assert!(root.entered().is_empty());
        assert!(root.children()[0].skipped());
    }

    #[tokio::test]
    async fn console_reporter_tracks_failure() {
        let mut console = ConsoleReporter::new();
        assert!(console.run_sub_unit("ok", passing()).await);
        assert!(!console.failed());
        assert!(!console.run_sub_unit("bad", failing()).await);
        assert!(console.failed());
    }
}
