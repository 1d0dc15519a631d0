//! Standalone test sets: register scenarios, filter them by tag, run them in
//! order against the console.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::reporter::ConsoleReporter;
use crate::stepper::Stepper;

/// Builds a scenario onto a fresh [`Stepper`].
pub type TestCallback = Arc<dyn Fn(&mut Stepper) + Send + Sync>;

/// Errors from running a [`TestSet`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// At least one test failed.
    #[error("tests complete with {} failures", failed.len())]
    Failures {
        /// Labels of the failed tests, in run order.
        failed: Vec<String>,
    },
}

/// Command-line filter configuration, flattenable into a binary's `clap`
/// parser.
#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerArgs {
    /// Only run tests carrying this tag; `key=value` filters a category.
    #[arg(long = "tag", env = "STEPWISE_TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,
}

struct Test {
    order: f64,
    name: String,
    callback: TestCallback,
    tags: Vec<String>,
    categories: BTreeMap<String, Vec<String>>,
}

impl Test {
    fn label(&self) -> String {
        format!("{:.6}: {}", self.order, self.name)
    }

    fn tags_match(&self, filter: &[String]) -> bool {
        filter.iter().all(|tag| self.tags.contains(tag))
    }

    /// Every filtered category must carry at least one of the filter's
    /// values.
    fn categories_match(&self, filter: &BTreeMap<String, Vec<String>>) -> bool {
        filter.iter().all(|(key, values)| {
            self.categories
                .get(key)
                .is_some_and(|have| values.iter().any(|value| have.contains(value)))
        })
    }
}

fn split_tags<S: AsRef<str>>(tags: &[S]) -> (Vec<String>, BTreeMap<String, Vec<String>>) {
    let mut flat = Vec::new();
    let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for tag in tags {
        match tag.as_ref().split_once('=') {
            Some((key, value)) => categories
                .entry(key.to_owned())
                .or_default()
                .push(value.to_owned()),
            None => flat.push(tag.as_ref().to_owned()),
        }
    }
    (flat, categories)
}

/// An ordered collection of scenarios.
#[derive(Default)]
pub struct TestSet {
    tests: Vec<Test>,
}

impl TestSet {
    /// An empty set.
    pub const fn new() -> Self {
        Self { tests: Vec::new() }
    }

    /// Number of registered tests.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Whether no test is registered.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Register a scenario builder. Tests run in ascending `order`; ties keep
    /// registration order. Tags of the form `key=value` are category tags.
    pub fn register<F>(&mut self, order: f64, name: impl Into<String>, callback: F, tags: &[&str])
    where
        F: Fn(&mut Stepper) + Send + Sync + 'static,
    {
        let (tags, categories) = split_tags(tags);
        self.tests.push(Test {
            order,
            name: name.into(),
            callback: Arc::new(callback),
            tags,
            categories,
        });
    }

    /// Run every test matching `filter`, each under a child of `ctx`.
    ///
    /// A test must carry every flat filter tag, and for every filtered
    /// category at least one of the listed values.
    pub async fn run(&mut self, ctx: &Context, filter: &[String]) -> Result<(), RunnerError> {
        self.tests.sort_by(|a, b| a.order.total_cmp(&b.order));
        let (flat_filter, category_filter) = split_tags(filter);

        let mut failed = Vec::new();
        for test in &self.tests {
            if !test.tags_match(&flat_filter) || !test.categories_match(&category_filter) {
                println!("skipping {} due to tags {:?} != {:?}", test.name, filter, test.tags);
                continue;
            }

            let label = test.label();
            let mut stepper = Stepper::new(label.as_str());
            (test.callback)(&mut stepper);

            println!("== {label} == Running");
            let mut reporter = ConsoleReporter::new();
            let report = stepper.run_steps_with_context(ctx, &mut reporter).await;

            #[cfg(feature = "tracing")]
            tracing::info!(test = %label, run_id = %report.id, passed = report.passed, "test.end");

            if !report.passed {
                println!("== Failed {label}");
                failed.push(label.clone());
            }
            println!("== Finished {label}");
        }

        if failed.is_empty() {
            return Ok(());
        }
        println!("Tests complete with {} failures:", failed.len());
        for label in &failed {
            println!(" - {label}");
        }
        Err(RunnerError::Failures { failed })
    }
}

// ============================================================================
// Default set
// ============================================================================

static DEFAULT_SET: Mutex<TestSet> = parking_lot::const_mutex(TestSet::new());

/// Register a scenario builder into the process-wide default set.
pub fn register<F>(order: f64, name: impl Into<String>, callback: F, tags: &[&str])
where
    F: Fn(&mut Stepper) + Send + Sync + 'static,
{
    DEFAULT_SET.lock().register(order, name, callback, tags);
}

/// Run, and empty, the process-wide default set.
pub async fn run_default(ctx: &Context, filter: &[String]) -> Result<(), RunnerError> {
    let mut set = std::mem::take(&mut *DEFAULT_SET.lock());
    set.run(ctx, filter).await
}
