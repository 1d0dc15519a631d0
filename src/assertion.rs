//! The assertion façade steps report through.
//!
//! Every fail-now operation returns [`Checked`]. A step body propagates it
//! with `?`, which is how a failed assertion stops the rest of the step:
//!
//! ```no_run
//! # use stepwise::{Assertion, Checked};
//! # fn body(a: &Assertion, got: Result<u32, std::io::Error>) -> Checked {
//! a.no_error(&got)?;
//! a.equal(Some(&7), got.as_ref().ok())?;
//! # Ok(())
//! # }
//! ```
//!
//! Non-fatal reports ([`Assertion::error`]) mark the step failed but let it
//! continue, so several independent problems surface together.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::be::Outcome;
use crate::context::Context;
use crate::log::{Fields, LogLevel, LogLine};
use crate::panic::Panicked;
use crate::status::{find_status, Code};

/// Marker error for a failed assertion.
///
/// The message has already been recorded in the step's log by the time a
/// `Failed` is returned; callers only need to propagate it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct Failed {
    message: String,
}

impl Failed {
    /// The failure message, including any name prefix.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result of a fail-now assertion.
pub type Checked = Result<(), Failed>;

// ============================================================================
// Capabilities
// ============================================================================

/// Values with a structural equality that differs from `PartialEq`.
///
/// Implement this for message types whose generic equality would compare
/// internal bookkeeping (caches, sizes, unknown-field buffers).
/// [`Assertion::equal_message`] uses it instead of `PartialEq`.
pub trait StructuralMessage: Debug {
    /// Whether `self` and `other` carry the same message content.
    fn structural_eq(&self, other: &Self) -> bool;
}

impl<M: StructuralMessage + ?Sized> StructuralMessage for &M {
    fn structural_eq(&self, other: &Self) -> bool {
        (**self).structural_eq(*other)
    }
}

impl<M: StructuralMessage + ?Sized> StructuralMessage for Box<M> {
    fn structural_eq(&self, other: &Self) -> bool {
        (**self).structural_eq(other)
    }
}

impl<M: StructuralMessage + ?Sized> StructuralMessage for Arc<M> {
    fn structural_eq(&self, other: &Self) -> bool {
        (**self).structural_eq(other)
    }
}

impl<M: StructuralMessage> StructuralMessage for Option<M> {
    fn structural_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => true,
            (Some(a), Some(b)) => a.structural_eq(b),
            _ => false,
        }
    }
}

impl<M: StructuralMessage> StructuralMessage for [M] {
    fn structural_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.structural_eq(b))
    }
}

impl<M: StructuralMessage> StructuralMessage for Vec<M> {
    fn structural_eq(&self, other: &Self) -> bool {
        self.as_slice().structural_eq(other.as_slice())
    }
}

/// Values that can be absent.
pub trait Nullable {
    /// Whether the value is absent.
    fn is_nil(&self) -> bool;
}

impl<T> Nullable for Option<T> {
    fn is_nil(&self) -> bool {
        self.is_none()
    }
}

impl<T: ?Sized> Nullable for *const T {
    fn is_nil(&self) -> bool {
        self.is_null()
    }
}

impl<T: ?Sized> Nullable for *mut T {
    fn is_nil(&self) -> bool {
        self.is_null()
    }
}

impl<T: Nullable + ?Sized> Nullable for &T {
    fn is_nil(&self) -> bool {
        (**self).is_nil()
    }
}

/// Values with a notion of "empty": absent, or equal to the type's default.
///
/// Implemented for the standard scalar, string and collection types.
/// Use [`is_zero_by_default!`](crate::is_zero_by_default) for your own
/// `Default + PartialEq` types.
pub trait IsZero {
    /// Whether the value equals its type's zero value.
    fn is_zero(&self) -> bool;

    /// Whether the value is absent altogether.
    fn is_absent(&self) -> bool {
        false
    }
}

crate::is_zero_by_default!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, (),
    String,
);

impl IsZero for str {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T> IsZero for Option<T> {
    fn is_zero(&self) -> bool {
        self.is_none()
    }

    fn is_absent(&self) -> bool {
        self.is_none()
    }
}

impl<T> IsZero for [T] {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T> IsZero for Vec<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T> IsZero for VecDeque<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V, S> IsZero for HashMap<K, V, S> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T, S> IsZero for HashSet<T, S> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V> IsZero for BTreeMap<K, V> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T> IsZero for BTreeSet<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T: IsZero + ?Sized> IsZero for &T {
    fn is_zero(&self) -> bool {
        (**self).is_zero()
    }

    fn is_absent(&self) -> bool {
        (**self).is_absent()
    }
}

impl<T: IsZero + ?Sized> IsZero for Box<T> {
    fn is_zero(&self) -> bool {
        (**self).is_zero()
    }

    fn is_absent(&self) -> bool {
        (**self).is_absent()
    }
}

impl<T: IsZero + ?Sized> IsZero for Rc<T> {
    fn is_zero(&self) -> bool {
        (**self).is_zero()
    }

    fn is_absent(&self) -> bool {
        (**self).is_absent()
    }
}

impl<T: IsZero + ?Sized> IsZero for Arc<T> {
    fn is_zero(&self) -> bool {
        (**self).is_zero()
    }

    fn is_absent(&self) -> bool {
        (**self).is_absent()
    }
}

// ============================================================================
// Step scope
// ============================================================================

/// Reporting state of one dispatched unit (setup, variation, step or
/// background).
///
/// Buffers the unit's log lines, tracks whether it failed, and holds the
/// run-level context that fail-now cancels.
#[derive(Debug)]
pub(crate) struct StepScope {
    unit: String,
    lines: Mutex<Vec<LogLine>>,
    failed: AtomicBool,
    stack: Mutex<Vec<String>>,
    run: Context,
}

impl StepScope {
    pub(crate) fn new(unit: impl Into<String>, run: Context) -> Arc<Self> {
        Arc::new(Self {
            unit: unit.into(),
            lines: Mutex::new(Vec::new()),
            failed: AtomicBool::new(false),
            stack: Mutex::new(Vec::new()),
            run,
        })
    }

    pub(crate) fn unit(&self) -> &str {
        &self.unit
    }

    pub(crate) fn push(&self, line: LogLine) {
        self.lines.lock().push(line);
    }

    /// Record a fatal message, mark failed and cancel the run.
    pub(crate) fn fail_now(&self, message: impl Into<String>) {
        self.push(LogLine::new(LogLevel::Fatal, message));
        self.failed.store(true, Ordering::SeqCst);
        self.run.cancel();
    }

    /// Record an error message and mark failed, without cancelling.
    pub(crate) fn record_error(&self, message: impl Into<String>) {
        self.push(LogLine::new(LogLevel::Error, message));
        self.failed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn record_panic(&self, panicked: Panicked) {
        *self.stack.lock() = panicked.stack;
        self.fail_now(format!("Test Step Panic: {}", panicked.message));
    }

    pub(crate) fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub(crate) fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().clone()
    }

    pub(crate) fn stack(&self) -> Vec<String> {
        self.stack.lock().clone()
    }
}

// ============================================================================
// Assertion
// ============================================================================

/// Name-scoped reporting façade handed to every step and hook.
///
/// Cloning is cheap; clones and [`sub`](Self::sub) children report into the
/// same unit.
#[derive(Debug, Clone)]
pub struct Assertion {
    name: String,
    scope: Arc<StepScope>,
}

impl Assertion {
    pub(crate) fn new(scope: Arc<StepScope>) -> Self {
        Self {
            name: String::new(),
            scope,
        }
    }

    /// The name prefix of this assertion; empty at the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Derive a child whose failure messages are prefixed with `name: `.
    pub fn sub(&self, name: impl Display) -> Assertion {
        let name = if self.name.is_empty() {
            name.to_string()
        } else {
            format!("{}: {}", self.name, name)
        };
        Assertion {
            name,
            scope: self.scope.clone(),
        }
    }

    fn prefixed(&self, message: impl Display) -> String {
        if self.name.is_empty() {
            message.to_string()
        } else {
            format!("{}: {}", self.name, message)
        }
    }

    fn fail(&self, message: impl Display) -> Failed {
        let message = self.prefixed(message);
        self.scope.fail_now(message.clone());
        Failed { message }
    }

    /// Fail the step now.
    pub fn fatal(&self, message: impl Display) -> Checked {
        Err(self.fail(message))
    }

    /// Fail the step now with a formatted message.
    pub fn fatalf(&self, args: fmt::Arguments<'_>) -> Checked {
        self.fatal(args)
    }

    /// Mark the step failed but keep running it.
    pub fn error(&self, message: impl Display) {
        self.scope.record_error(self.prefixed(message));
    }

    /// Mark the step failed with a formatted message but keep running it.
    pub fn errorf(&self, args: fmt::Arguments<'_>) {
        self.error(args)
    }

    /// Whether the unit this assertion reports into has failed.
    pub fn failed(&self) -> bool {
        self.scope.failed()
    }

    /// Buffer a debug line in the step's log.
    pub fn log(&self, message: impl Display) {
        self.scope.push(LogLine::new(LogLevel::Debug, message.to_string()));
    }

    /// Buffer a formatted debug line in the step's log.
    pub fn logf(&self, args: fmt::Arguments<'_>) {
        self.log(args)
    }

    /// Buffer a leveled line with structured fields.
    pub fn log_fields(&self, level: LogLevel, message: impl Display, fields: Fields) {
        self.scope
            .push(LogLine::new(level, message.to_string()).with_fields(fields));
    }

    /// No-op marker kept for parity with test framework handles.
    pub fn helper(&self) {}

    /// Fail now if the comparison produced an outcome.
    pub fn that(&self, outcome: Option<Outcome>) -> Checked {
        match outcome {
            Some(outcome) => self.fatal(outcome),
            None => Ok(()),
        }
    }

    /// Fail now if `result` is an error.
    ///
    /// Status errors (found anywhere in the source chain) are printed with
    /// their structured payload.
    pub fn no_error<T, E>(&self, result: &Result<T, E>) -> Checked
    where
        E: Error + 'static,
    {
        let Err(err) = result else {
            return Ok(());
        };
        match find_status(err) {
            Some(status) => self.fatal(format_args!(
                "unexpected error {err}\n  {}\n",
                status.payload().replace('\n', "\n  ")
            )),
            None => self.fatal(format_args!(
                "got error {err} ({}), want no error",
                std::any::type_name::<E>()
            )),
        }
    }

    /// Fail now if `result` is an error or carries no message, otherwise
    /// return the message.
    pub fn must_message<T, E>(&self, result: Result<Option<T>, E>) -> Result<T, Failed>
    where
        E: Error + 'static,
    {
        self.no_error(&result)?;
        match result {
            Ok(Some(message)) => Ok(message),
            _ => Err(self.fail("value was nil")),
        }
    }

    /// Fail now unless `want == got`.
    ///
    /// Absent values are `None`: two `None`s are equal, `None` and `Some`
    /// never are.
    pub fn equal<T: PartialEq + Debug>(&self, want: T, got: T) -> Checked {
        if want == got {
            return Ok(());
        }
        self.fatal(format_args!("got {got:?}, want {want:?}"))
    }

    /// Fail now unless `want` and `got` are structurally the same message.
    pub fn equal_message<M: StructuralMessage>(&self, want: M, got: M) -> Checked {
        if want.structural_eq(&got) {
            return Ok(());
        }
        self.fatal(format_args!("got {got:?}, want {want:?}"))
    }

    /// Fail now unless `result` is a status error with `code`.
    pub fn code_error<T, E>(&self, result: &Result<T, E>, code: Code) -> Checked
    where
        E: Error + 'static,
    {
        let Err(err) = result else {
            return self.fatal(format_args!("got no error, want code {code}"));
        };
        match find_status(err) {
            None => self.fatal(format_args!(
                "got error {err} ({}), want code {code}",
                std::any::type_name::<E>()
            )),
            Some(status) if status.code() != code => {
                self.fatal(format_args!("got code {}, want {code}", status.code()))
            }
            Some(_) => Ok(()),
        }
    }

    /// Fail now on the first value that is absent or zero.
    pub fn not_empty(&self, values: &[&dyn IsZero]) -> Checked {
        for value in values {
            if value.is_absent() {
                return self.fatal("got nil, want non-nil");
            }
            if value.is_zero() {
                return self.fatal("got zero value, want non-zero");
            }
        }
        Ok(())
    }

    /// Fail now on the first absent value.
    ///
    /// Values are checked in order and checking stops at the first
    /// violation.
    pub fn not_nil(&self, values: &[&dyn Nullable]) -> Checked {
        match values.iter().position(|value| value.is_nil()) {
            Some(_) => self.fatal("value was nil"),
            None => Ok(()),
        }
    }

    /// Fail now on the first present value.
    pub fn nil(&self, values: &[&dyn Nullable]) -> Checked {
        match values.iter().position(|value| !value.is_nil()) {
            Some(_) => self.fatal("value was not nil"),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;

    fn detached() -> (Assertion, Arc<StepScope>, Context) {
        let run = Context::background();
        let scope = StepScope::new("test", run.clone());
        (Assertion::new(scope.clone()), scope, run)
    }

    fn last_message(scope: &StepScope) -> String {
        scope
            .lines()
            .last()
            .map(|line| line.message.clone())
            .unwrap_or_default()
    }

    #[derive(Debug)]
    struct Message {
        id: u32,
        cached_size: std::cell::Cell<usize>,
    }

    impl StructuralMessage for Message {
        fn structural_eq(&self, other: &Self) -> bool {
            self.id == other.id
        }
    }

    #[test]
    fn equal_handles_absent_values() {
        for (want, got, equal) in [
            (Some("foo"), Some("foo"), true),
            (Some("foo"), Some("bar"), false),
            (None, None, true),
            (None, Some("1"), false),
            (Some("1"), None, false),
        ] {
            let (a, scope, _) = detached();
            let result = a.equal(want, got);
            assert_eq!(result.is_ok(), equal, "equal({want:?}, {got:?})");
            assert_eq!(scope.failed(), !equal);
        }
    }

    #[test]
    fn equal_message_ignores_bookkeeping() {
        let (a, scope, _) = detached();
        let want = Message {
            id: 1,
            cached_size: 0.into(),
        };
        let got = Message {
            id: 1,
            cached_size: 12.into(),
        };
        assert!(a.equal_message(&want, &got).is_ok());
        assert!(a.equal_message(&want, &want).is_ok());
        assert!(a.equal_message(None::<&Message>, None).is_ok());
        assert!(!scope.failed());

        assert!(a.equal_message(Some(&want), None).is_err());
        assert!(scope.failed());
    }

    #[test]
    fn fatal_cancels_the_run_and_error_does_not() {
        let (a, scope, run) = detached();
        a.error("first problem");
        assert!(scope.failed());
        assert!(!run.is_cancelled());

        let err = a.fatal("stop here").unwrap_err();
        assert_eq!(err.message(), "stop here");
        assert!(run.is_cancelled());

        let levels: Vec<_> = scope.lines().iter().map(|line| line.level).collect();
        assert_eq!(levels, vec![LogLevel::Error, LogLevel::Fatal]);
    }

    #[test]
    fn sub_prefixes_messages_without_touching_parent() {
        let (a, scope, _) = detached();
        let child = a.sub(format_args!("widget {}", 3));
        let grandchild = child.sub("label");
        assert_eq!(a.name(), "");
        assert_eq!(child.name(), "widget 3");

        let err = grandchild.fatal("empty").unwrap_err();
        assert_eq!(err.message(), "widget 3: label: empty");
        assert_eq!(last_message(&scope), "widget 3: label: empty");
    }

    #[test]
    fn no_error_formats_status_payloads() {
        let (a, scope, _) = detached();
        let ok: Result<u8, Status> = Ok(1);
        assert!(a.no_error(&ok).is_ok());

        let failed: Result<u8, Status> = Err(Status::new(Code::NotFound, "missing"));
        assert!(a.no_error(&failed).is_err());
        let message = last_message(&scope);
        assert!(message.starts_with("unexpected error rpc error: code = NotFound"));
        assert!(message.contains("code: NotFound"));

        let plain: Result<u8, std::io::Error> = Err(std::io::Error::other("disk"));
        assert!(a.no_error(&plain).is_err());
        assert_eq!(
            last_message(&scope),
            "got error disk (std::io::error::Error), want no error"
        );
    }

    #[test]
    fn must_message_unwraps_present_messages() {
        let (a, _, _) = detached();
        let got: Result<Option<u32>, Status> = Ok(Some(4));
        assert_eq!(a.must_message(got), Ok(4));

        let missing: Result<Option<u32>, Status> = Ok(None);
        assert_eq!(
            a.must_message(missing).map_err(|e| e.message().to_owned()),
            Err("value was nil".to_owned())
        );
    }

    #[test]
    fn code_error_checks_presence_shape_and_code() {
        let (a, scope, _) = detached();

        let ok: Result<(), Status> = Ok(());
        assert!(a.code_error(&ok, Code::NotFound).is_err());
        assert_eq!(last_message(&scope), "got no error, want code NotFound");

        let plain: Result<(), std::io::Error> = Err(std::io::Error::other("x"));
        assert!(a.code_error(&plain, Code::NotFound).is_err());
        assert!(last_message(&scope).ends_with("want code NotFound"));

        let wrong: Result<(), Status> = Err(Status::new(Code::Internal, "x"));
        assert!(a.code_error(&wrong, Code::NotFound).is_err());
        assert_eq!(last_message(&scope), "got code Internal, want NotFound");

        let right: Result<(), Status> = Err(Status::new(Code::NotFound, "x"));
        assert!(a.code_error(&right, Code::NotFound).is_ok());
    }

    #[test]
    fn not_empty_reports_nil_before_zero() {
        let (a, scope, _) = detached();
        let name = String::from("w");
        assert!(a.not_empty(&[&name, &1_u32, &Some(0), &vec![1]]).is_ok());

        assert!(a.not_empty(&[&name, &None::<u8>]).is_err());
        assert_eq!(last_message(&scope), "got nil, want non-nil");

        assert!(a.not_empty(&[&0_i64]).is_err());
        assert_eq!(last_message(&scope), "got zero value, want non-zero");

        assert!(a.not_empty(&[&Vec::<u8>::new()]).is_err());
        assert!(a.not_empty(&[&""]).is_err());
    }

    #[test]
    fn not_nil_stops_at_first_violation() {
        let (a, scope, _) = detached();
        let first = Some(1);
        let second: Option<&str> = None;
        let third = Some("unused");
        assert!(a.not_nil(&[&first, &second, &third]).is_err());
        assert_eq!(last_message(&scope), "value was nil");
        assert_eq!(scope.lines().len(), 1);

        assert!(a.not_nil(&[&first, &third]).is_ok());
        assert!(a.nil(&[&second]).is_ok());
        assert!(a.nil(&[&second, &first]).is_err());
        assert_eq!(last_message(&scope), "value was not nil");
    }

    #[test]
    fn nullable_pointers() {
        let value = 3_u8;
        let present: *const u8 = &value;
        let absent: *const u8 = std::ptr::null();
        assert!(!present.is_nil());
        assert!(absent.is_nil());
        assert!(None::<String>.is_nil());
        assert!(!Some(()).is_nil());
    }
}
