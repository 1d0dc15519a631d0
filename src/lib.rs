#![deny(missing_docs)]

//! Stepwise: sequential scenario tests with fail-fast steps.
//!
//! # Design Goals
//!
//! A test is a *scenario*: an ordered narrative of interdependent steps
//! sharing state, rather than a bag of isolated cases.
//!
//! - **Strict ordering**: steps run one at a time, in registration order
//! - **Fail-fast**: the first failing step stops the branch, and every step
//!   that ran before it is still reported
//! - **Variations**: the same steps replay behind several entry points
//!
//! # Core Concepts
//!
//! - [`Stepper`]: registers hooks, steps and variations and runs them
//! - [`Assertion`]: the name-scoped façade a step reports through
//! - [`be`]: pure comparisons producing an optional [`Outcome`]
//! - [`Reporter`]: the test framework handle the engine drives
//!
//! ```no_run
//! use stepwise::{ConsoleReporter, Stepper};
//!
//! # async fn demo() {
//! let mut ss = Stepper::new("arithmetic");
//! ss.step("adds", |_ctx, a| async move {
//!     a.that(stepwise::be::equal(4, 2 + 2))?;
//!     Ok(())
//! });
//! let report = ss.run_steps(&mut ConsoleReporter::new()).await;
//! assert!(report.passed);
//! # }
//! ```

// Modules
pub mod assertion;
pub mod be;
pub mod context;
pub mod execution;
pub mod log;
mod macros;
pub mod panic;
pub mod reporter;
pub mod runner;
pub mod status;
pub mod step;
pub mod stepper;

// Re-exports for convenience
pub use assertion::{Assertion, Checked, Failed, IsZero, Nullable, StructuralMessage};
pub use be::Outcome;
pub use context::{Cancelled, Context};
pub use execution::{RunId, RunReport, UnitKind, UnitRecord, UnitStatus};
pub use log::{Fields, LogLevel, LogLine, StepLogger};
pub use reporter::{ConsoleReporter, MemoryReporter, Reporter, SubUnit};
pub use runner::{RunnerArgs, RunnerError, TestCallback, TestSet};
pub use status::{Code, Status};
pub use step::{BoxError, Hook, HookKind, HookResult, Step};
pub use stepper::Stepper;

#[cfg(feature = "tracing")]
pub use log::StepLogLayer;

#[cfg(test)]
mod tests;
