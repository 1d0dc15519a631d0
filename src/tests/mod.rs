//! Scenario engine tests.
//!
//! ## Test Organization
//!
//! - `common`: the widget service under test and a shared call trail
//! - `ordering`: step order, fail-fast and cancellation
//! - `hooks`: setup, pre-step and post-step hooks
//! - `variations`: replaying steps per variation
//! - `background`: background hook lifetime and failures
//! - `faults`: panics, reporter anomalies and the widget scenario
//! - `logging`: routing external log lines into the running step
//!
//! ## Test Subject
//!
//! Most tests record what ran into a [`common::Trail`] and inspect the run
//! through the returned [`RunReport`](crate::RunReport) and a
//! [`MemoryReporter`](crate::MemoryReporter).

mod common;

mod ordering;
