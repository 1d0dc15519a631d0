//! Step ordering, fail-fast and cancellation.

use crate::{Context, MemoryReporter, Stepper, UnitStatus};

use super::common::{mark, messages, Trail};

/// Test that passing steps all run, once each, in registration order.
#[tokio::test]
async fn all_passing_steps_run_in_order() {
    let trail = Trail::default();
    let mut ss = Stepper::new("ordered");
    ss.step("s1", mark(&trail, "s1"))
        .step("s2", mark(&trail, "s2"))
        .step("s3", mark(&trail, "s3"));

    let mut t = MemoryReporter::new();
    let report = ss.run_steps(&mut t).await;

    assert!(report.passed);
    assert!(t.passed());
    assert_eq!(report.name, "ordered");
    assert_eq!(trail.entries(), vec!["s1", "s2", "s3"]);
    assert_eq!(report.executed_steps(), vec!["s1", "s2", "s3"]);
    // No setup hooks, no setup unit.
    assert_eq!(t.entered(), vec!["s1", "s2", "s3"]);
    assert!(t.lines().is_empty());
}

/// Test that a failing step stops the sequence.
///
/// Verifies:
/// - Earlier steps pass, the failing step fails
/// - Later steps are never dispatched
/// - The failure dump replays every unit of the branch
#[tokio::test]
async fn failing_step_stops_the_sequence() {
    let trail = Trail::default();
    let mut ss = Stepper::new("fail fast");
    ss.step("s1", |_ctx, a| async move {
        a.log("warming up");
        Ok(())
    })
    .step("s2", {
        let trail = trail.clone();
        move |_ctx, a| {
            let trail = trail.clone();
            async move {
                trail.push("s2");
                a.fatal("boom")?;
                trail.push("after fatal");
                Ok(())
            }
        }
    })
    .step("s3", mark(&trail, "s3"));

    let mut t = MemoryReporter::new();
    let report = ss.run_steps(&mut t).await;

    assert!(!report.passed);
    assert!(!t.passed());
    assert_eq!(trail.entries(), vec!["s2"]);
    assert_eq!(report.executed_steps(), vec!["s1", "s2"]);
    assert_eq!(report.unit("s1").map(|u| u.status), Some(UnitStatus::Passed));
    assert_eq!(report.failed_unit().map(|u| u.name.as_str()), Some("s2"));
    assert!(t.find("s2").is_some_and(|unit| !unit.passed()));
    assert!(t.find("s3").is_none());

    assert_eq!(
        t.lines(),
        [
            "STEP s1 - OK",
            "DEBUG: warming up",
            "STEP s2 FAILED",
            "FATAL: boom",
        ]
    );
}

/// Test that non-fatal errors let the step finish but still fail it.
#[tokio::test]
async fn non_fatal_errors_fail_the_step_after_it_returns() {
    let trail = Trail::default();
    let mut ss = Stepper::new("record errors");
    ss.step("check widgets", {
        let trail = trail.clone();
        move |_ctx, a| {
            let trail = trail.clone();
            async move {
                a.error("name is empty");
                a.errorf(format_args!("size {} is too small", 2));
                trail.push("finished");
                Ok(())
            }
        }
    })
    .step("next", mark(&trail, "next"));

    let report = ss.run_steps(&mut MemoryReporter::new()).await;

    assert!(!report.passed);
    assert_eq!(trail.entries(), vec!["finished"]);
    assert_eq!(
        messages(&report, "check widgets"),
        vec!["ERROR: name is empty", "ERROR: size 2 is too small"]
    );
}

/// Test that fail-now cancels the run context the step was given.
#[tokio::test]
async fn fail_now_cancels_the_run_context() {
    let trail = Trail::default();
    let mut ss = Stepper::new("cancel on failure");
    ss.step("s1", {
        let trail = trail.clone();
        move |ctx: Context, a| {
            let trail = trail.clone();
            async move {
                trail.push(format!("before: {}", ctx.is_cancelled()));
                let failed = a.fatal("stop");
                trail.push(format!("after: {}", ctx.is_cancelled()));
                failed
            }
        }
    });

    let report = ss.run_steps(&mut MemoryReporter::new()).await;

    assert!(!report.passed);
    assert_eq!(trail.entries(), vec!["before: false", "after: true"]);
}

/// Test that a context cancelled by the caller prevents any dispatch.
#[tokio::test]
async fn cancelled_caller_context_dispatches_nothing() {
    let trail = Trail::default();
    let mut ss = Stepper::new("cancelled");
    ss.step("s1", mark(&trail, "s1"));

    let ctx = Context::background();
    ctx.cancel();
    let mut t = MemoryReporter::new();
    let report = ss.run_steps_with_context(&ctx, &mut t).await;

    assert!(!report.passed);
    assert!(report.units.is_empty());
    assert!(trail.entries().is_empty());
    assert_eq!(t.lines(), ["run cancelled before \"s1\" was dispatched"]);
    assert!(!t.passed());
}

/// Test that runs of the same stepper are independent.
#[tokio::test]
async fn stepper_can_run_twice() {
    let trail = Trail::default();
    let mut ss = Stepper::new("twice");
    ss.step("s1", mark(&trail, "s1"));

    let first = ss.run_steps(&mut MemoryReporter::new()).await;
    let second = ss.run_steps(&mut MemoryReporter::new()).await;

    assert!(first.passed && second.passed);
    assert_ne!(first.id, second.id);
    assert_eq!(trail.count("s1"), 2);
}
