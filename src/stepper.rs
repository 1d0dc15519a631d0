//! The scenario engine.
//!
//! A [`Stepper`] holds an ordered narrative of steps plus the hooks that gate
//! them, and runs it against a [`Reporter`]:
//!
//! ```text
//! for each variation (or once, with none):
//!     spawn background hooks
//!     setup hooks                      -> unit "setup"
//!     pre-variation hooks + variation  -> unit "<variation>"
//!     for each step:
//!         pre-step hooks + step + post-step hooks -> unit "<step>"
//!     cancel and join background       -> record "background"
//! ```
//!
//! The first failing unit stops its branch, and a failed branch stops the
//! run. Failure dumps the branch's buffered logs to the reporter.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::assertion::{Assertion, Checked, Failed, StepScope};
use crate::context::{Cancelled, Context};
use crate::execution::{unix_millis, RunId, RunReport, UnitKind, UnitRecord, UnitStatus};
use crate::log::{CurrentStep, Fields, LogLevel, LogLine, StepLogger};
use crate::panic;
use crate::reporter::{Reporter, SubUnit};
use crate::step::{BoxError, Hook, HookKind, HookResult, Step};

/// An ordered scenario of steps, variations and hooks.
#[derive(Debug)]
pub struct Stepper {
    name: String,
    plan: Plan,
    current: CurrentStep,
}

#[derive(Debug, Clone, Default)]
struct Plan {
    steps: Vec<Step>,
    variations: Vec<Step>,
    setup: Vec<Hook>,
    background: Vec<Hook>,
    pre_step: Vec<Hook>,
    pre_variation: Vec<Hook>,
    post_step: Vec<Hook>,
}

impl Plan {
    fn hooks_mut(&mut self, kind: HookKind) -> &mut Vec<Hook> {
        match kind {
            HookKind::Setup => &mut self.setup,
            HookKind::Background => &mut self.background,
            HookKind::PreStep => &mut self.pre_step,
            HookKind::PreVariation => &mut self.pre_variation,
            HookKind::PostStep => &mut self.post_step,
        }
    }
}

impl Stepper {
    /// Create an empty scenario.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plan: Plan::default(),
            current: CurrentStep::default(),
        }
    }

    /// The scenario name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn hook<F, Fut>(&mut self, kind: HookKind, callback: F) -> &mut Self
    where
        F: Fn(Context, Assertion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        let hooks = self.plan.hooks_mut(kind);
        let index = hooks.len() + 1;
        hooks.push(Hook::new(kind, index, callback));
        self
    }

    /// Run `callback` once per branch, before any step or variation.
    pub fn setup<F, Fut>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(Context, Assertion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hook(HookKind::Setup, callback)
    }

    /// Run `callback` concurrently with each branch.
    ///
    /// Its context is cancelled once the branch's last step returns, and the
    /// branch waits for it before finishing. Errors caused by that
    /// cancellation are ignored; any other error, or a panic, fails the run.
    pub fn background<F, Fut>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(Context, Assertion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hook(HookKind::Background, callback)
    }

    /// Run `callback` before every step, inside the step's unit.
    pub fn pre_step_hook<F, Fut>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(Context, Assertion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hook(HookKind::PreStep, callback)
    }

    /// Run `callback` before every variation, inside the variation's unit.
    pub fn pre_variation_hook<F, Fut>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(Context, Assertion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hook(HookKind::PreVariation, callback)
    }

    /// Run `callback` after every step that did not fail.
    pub fn post_step_hook<F, Fut>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(Context, Assertion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hook(HookKind::PostStep, callback)
    }

    /// Append a step.
    pub fn step<F, Fut>(&mut self, description: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(Context, Assertion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Checked> + Send + 'static,
    {
        self.plan.steps.push(Step::new(description, callback));
        self
    }

    /// Append a variation. With any variation registered, the whole step
    /// sequence runs once per variation, after the variation body.
    pub fn variation<F, Fut>(&mut self, description: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(Context, Assertion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Checked> + Send + 'static,
    {
        self.plan.variations.push(Step::new(description, callback));
        self
    }

    /// A logger writing into whichever step of this scenario is running.
    pub fn logger(&self) -> StepLogger {
        StepLogger::new(self.current.clone())
    }

    /// Log a leveled line into the running step, or warn if none is.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, fields: Fields) {
        self.logger().log(level, message, fields);
    }

    /// Run the scenario under a fresh background context.
    pub async fn run_steps(&self, t: &mut dyn Reporter) -> RunReport {
        self.run_steps_with_context(&Context::background(), t).await
    }

    /// Run the scenario under a child of `ctx`.
    pub async fn run_steps_with_context(&self, ctx: &Context, t: &mut dyn Reporter) -> RunReport {
        let run = Run {
            id: RunId::new(),
            plan: Arc::new(self.plan.clone()),
            ctx: ctx.child(),
            current: self.current.clone(),
            records: Arc::default(),
        };

        let passed = if run.plan.variations.is_empty() {
            run.branch(None).run(t).await
        } else {
            run.run_variations(t).await
        };
        run.ctx.cancel();

        let units = std::mem::take(&mut *run.records.lock());
        RunReport {
            id: run.id,
            name: self.name.clone(),
            passed,
            units,
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

enum Dispatch {
    Ran(bool),
    Skipped,
}

/// Hand `work` to the reporter as a sub-unit and find out whether it ran.
async fn dispatch<F>(t: &mut dyn Reporter, name: &str, work: F) -> Dispatch
where
    F: for<'r> FnOnce(&'r mut dyn Reporter) -> BoxFuture<'r, bool> + Send + 'static,
{
    let slot = Arc::new(Mutex::new(None));
    let filled = slot.clone();
    let unit = SubUnit::new(move |child| {
        async move {
            let passed = work(child).await;
            *filled.lock() = Some(passed);
        }
        .boxed()
    });
    t.run_sub_unit(name, unit).await;

    let ran = slot.lock().take();
    match ran {
        Some(passed) => Dispatch::Ran(passed),
        None => Dispatch::Skipped,
    }
}

fn is_cancellation(err: &BoxError) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&**err);
    while let Some(err) = source {
        if err.is::<Cancelled>() {
            return true;
        }
        source = err.source();
    }
    false
}

// ============================================================================
// Run state
// ============================================================================

#[derive(Clone)]
struct Run {
    id: RunId,
    plan: Arc<Plan>,
    ctx: Context,
    current: CurrentStep,
    records: Arc<Mutex<Vec<UnitRecord>>>,
}

impl Run {
    fn branch(&self, variation: Option<Step>) -> Branch {
        Branch {
            run: self.clone(),
            ctx: self.ctx.child(),
            variation,
        }
    }

    async fn run_variations(&self, t: &mut dyn Reporter) -> bool {
        for variation in &self.plan.variations {
            let name = variation.description().to_owned();
            let branch = self.branch(Some(variation.clone()));
            let outcome = dispatch(t, &name, move |child| branch.run(child).boxed()).await;
            match outcome {
                Dispatch::Ran(true) => {}
                Dispatch::Ran(false) => {
                    t.mark_failed();
                    return false;
                }
                Dispatch::Skipped => {
                    let record = self.not_executed(UnitKind::Variation, &name, None);
                    t.log(&record.lines[0].render());
                    self.records.lock().push(record);
                    t.abort_now();
                    return false;
                }
            }
        }
        true
    }

    fn not_executed(&self, kind: UnitKind, name: &str, variation: Option<String>) -> UnitRecord {
        let kind_name = match kind {
            UnitKind::Setup => "setup",
            UnitKind::Variation => "variation",
            UnitKind::Step => "step",
            UnitKind::Background => "background",
        };
        let now = unix_millis();
        UnitRecord {
            kind,
            name: name.to_owned(),
            variation,
            status: UnitStatus::NotExecuted,
            started_at: now,
            completed_at: now,
            lines: vec![LogLine::new(
                LogLevel::Error,
                format!("{kind_name} {name:?} was not executed by the reporter"),
            )],
            stack: Vec::new(),
        }
    }
}

/// One pass over the step sequence, for one variation or for none.
#[derive(Clone)]
struct Branch {
    run: Run,
    ctx: Context,
    variation: Option<Step>,
}

#[derive(Clone)]
enum Work {
    Setup,
    Variation(Step),
    Step(Step),
}

impl Work {
    fn kind(&self) -> UnitKind {
        match self {
            Self::Setup => UnitKind::Setup,
            Self::Variation(_) => UnitKind::Variation,
            Self::Step(_) => UnitKind::Step,
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Setup => "setup",
            Self::Variation(step) | Self::Step(step) => step.description(),
        }
    }
}

struct Background {
    scope: Arc<StepScope>,
    started_at: u64,
    handle: JoinHandle<()>,
}

impl Branch {
    fn variation_name(&self) -> Option<String> {
        self.variation.as_ref().map(|v| v.description().to_owned())
    }

    async fn run(self, t: &mut dyn Reporter) -> bool {
        let first_record = self.run.records.lock().len();
        let background = self.spawn_background();

        let mut queue = Vec::new();
        if !self.run.plan.setup.is_empty() {
            queue.push(Work::Setup);
        }
        if let Some(variation) = &self.variation {
            queue.push(Work::Variation(variation.clone()));
        }
        queue.extend(self.run.plan.steps.iter().cloned().map(Work::Step));

        let mut passed = true;
        let mut note = None;
        for work in queue {
            if self.run.ctx.is_cancelled() {
                note = Some(format!("run cancelled before {:?} was dispatched", work.name()));
                passed = false;
                break;
            }
            if !self.dispatch(t, work).await {
                passed = false;
                break;
            }
        }

        if !passed {
            self.run.ctx.cancel();
        }
        self.ctx.cancel();
        if let Some(background) = background {
            passed &= self.join_background(background).await;
        }

        if !passed {
            self.dump(t, first_record, note.as_deref());
            t.mark_failed();
        }
        passed
    }

    async fn dispatch(&self, t: &mut dyn Reporter, work: Work) -> bool {
        let kind = work.kind();
        let name = work.name().to_owned();
        let branch = self.clone();
        let outcome = dispatch(t, &name, move |child| {
            async move {
                let passed = branch.execute(work).await;
                if !passed {
                    child.mark_failed();
                }
                passed
            }
            .boxed()
        })
        .await;

        match outcome {
            Dispatch::Ran(passed) => passed,
            Dispatch::Skipped => {
                let record = self.run.not_executed(kind, &name, self.variation_name());
                self.run.records.lock().push(record);
                t.abort_now();
                false
            }
        }
    }

    /// Run one unit with its gating hooks under a fresh scope.
    async fn execute(&self, work: Work) -> bool {
        let name = work.name().to_owned();
        let scope = StepScope::new(name.as_str(), self.run.ctx.clone());
        let started_at = unix_millis();

        #[cfg(feature = "tracing")]
        tracing::info!(step = %name, run_id = %self.run.id, "step.start");

        *self.run.current.lock() = Some(scope.clone());
        let passed = match &work {
            Work::Setup => self.call_hooks(&self.run.plan.setup, &scope).await,
            Work::Variation(variation) => {
                self.call_hooks(&self.run.plan.pre_variation, &scope).await
                    && self.call_step(variation, &scope).await
            }
            Work::Step(step) => {
                self.call_hooks(&self.run.plan.pre_step, &scope).await
                    && self.call_step(step, &scope).await
                    && self.call_hooks(&self.run.plan.post_step, &scope).await
            }
        };
        *self.run.current.lock() = None;
        let passed = passed && !scope.failed();

        #[cfg(feature = "tracing")]
        if passed {
            tracing::info!(step = %name, run_id = %self.run.id, outcome = "passed", "step.end");
        } else {
            tracing::error!(step = %name, run_id = %self.run.id, outcome = "failed", "step.end");
        }

        self.record(work.kind(), name, &scope, passed, started_at);
        passed
    }

    async fn call_hooks(&self, hooks: &[Hook], scope: &Arc<StepScope>) -> bool {
        for hook in hooks {
            let a = Assertion::new(scope.clone());
            let outcome = panic::catch(hook.call(self.ctx.child(), a)).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    self.hook_failed(hook, &err, scope);
                    return false;
                }
                Err(panicked) => {
                    scope.record_panic(panicked);
                    return false;
                }
            }
            if scope.failed() {
                return false;
            }
        }
        true
    }

    fn hook_failed(&self, hook: &Hook, err: &BoxError, scope: &StepScope) {
        #[cfg(feature = "tracing")]
        tracing::warn!(hook = hook.name(), run_id = %self.run.id, error = %err, "hook.failed");

        // Assertion failures raised in this unit were recorded already.
        if err.is::<Failed>() && scope.failed() {
            self.run.ctx.cancel();
        } else {
            scope.fail_now(format!("{} failed: {err}", hook.name()));
        }
    }

    async fn call_step(&self, step: &Step, scope: &Arc<StepScope>) -> bool {
        let a = Assertion::new(scope.clone());
        match panic::catch(step.call(self.ctx.child(), a)).await {
            Ok(Ok(())) => !scope.failed(),
            Ok(Err(failed)) => {
                if !scope.failed() {
                    scope.fail_now(failed.message());
                }
                false
            }
            Err(panicked) => {
                scope.record_panic(panicked);
                false
            }
        }
    }

    fn record(&self, kind: UnitKind, name: String, scope: &StepScope, passed: bool, started_at: u64) {
        let status = if passed {
            UnitStatus::Passed
        } else {
            UnitStatus::Failed
        };
        self.run.records.lock().push(UnitRecord {
            kind,
            name,
            variation: self.variation_name(),
            status,
            started_at,
            completed_at: unix_millis(),
            lines: scope.lines(),
            stack: scope.stack(),
        });
    }

    fn spawn_background(&self) -> Option<Background> {
        if self.run.plan.background.is_empty() {
            return None;
        }

        let scope = StepScope::new("background", self.run.ctx.clone());
        let hooks = self.run.plan.background.clone();
        let ctx = self.ctx.child();
        let task_scope = scope.clone();
        #[cfg(feature = "tracing")]
        let run_id = self.run.id;

        let handle = tokio::spawn(async move {
            let calls = hooks.iter().map(|hook| {
                let scope = task_scope.clone();
                let a = Assertion::new(scope.clone());
                let ctx = ctx.child();
                async move {
                    match panic::catch(hook.call(ctx, a)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) if is_cancellation(&err) => {}
                        Ok(Err(err)) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(hook = hook.name(), run_id = %run_id, error = %err, "hook.failed");

                            if !(err.is::<Failed>() && scope.failed()) {
                                scope.fail_now(format!("{} failed: {err}", hook.name()));
                            }
                        }
                        Err(panicked) => scope.record_panic(panicked),
                    }
                }
            });
            futures::future::join_all(calls).await;
        });

        Some(Background {
            scope,
            started_at: unix_millis(),
            handle,
        })
    }

    async fn join_background(&self, background: Background) -> bool {
        let Background {
            scope,
            started_at,
            handle,
        } = background;

        if let Err(err) = handle.await {
            scope.fail_now(format!("background task failed: {err}"));
        }
        let passed = !scope.failed();

        #[cfg(feature = "tracing")]
        tracing::info!(run_id = %self.run.id, outcome = if passed { "passed" } else { "failed" }, "background.join");

        self.record(UnitKind::Background, "background".to_owned(), &scope, passed, started_at);
        passed
    }

    /// Replay the branch's buffered logs to the reporter.
    fn dump(&self, t: &mut dyn Reporter, first_record: usize, note: Option<&str>) {
        let records = self.run.records.lock()[first_record..].to_vec();
        for record in &records {
            if record.passed() {
                t.log(&format!("STEP {} - OK", record.name));
            } else {
                t.log(&format!("STEP {} FAILED", record.name));
            }
            for line in &record.lines {
                t.log(&line.render());
            }
            if !record.stack.is_empty() {
                t.log(&format!("Stack: {}", record.stack.join("\n")));
            }
        }
        if let Some(note) = note {
            t.log(note);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_found_in_the_source_chain() {
        #[derive(thiserror::Error, Debug)]
        #[error("watching widgets")]
        struct Watch(#[source] Cancelled);

        let direct: BoxError = Box::new(Cancelled);
        let wrapped: BoxError = Box::new(Watch(Cancelled));
        let other: BoxError = "disk full".into();
        assert!(is_cancellation(&direct));
        assert!(is_cancellation(&wrapped));
        assert!(!is_cancellation(&other));
    }

    #[test]
    fn hooks_are_numbered_per_class() {
        let mut ss = Stepper::new("numbering");
        ss.setup(|_, _| async { Ok(()) })
            .pre_step_hook(|_, _| async { Ok(()) })
            .pre_step_hook(|_, _| async { Ok(()) });
        let names: Vec<_> = ss.plan.pre_step.iter().map(Hook::name).collect();
        assert_eq!(names, vec!["pre-step hook #1", "pre-step hook #2"]);
        assert_eq!(ss.plan.setup[0].name(), "setup hook #1");
    }
}
