//! Pure comparison functions.
//!
//! Each function returns `None` when the comparison holds and an [`Outcome`]
//! describing the mismatch when it does not. Nothing here reports anything:
//! hand the result to [`Assertion::that`](crate::Assertion::that) to turn a
//! present outcome into a step failure.
//!
//! Equality needs `PartialEq`; the ordering functions need a total order
//! (`Ord`), so mixing unordered operands is a compile error.

use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};

/// A failed comparison.
///
/// Always carries a non-empty, human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Outcome(String);

impl Outcome {
    /// Create an outcome from a message.
    ///
    /// An empty message is replaced with a generic one so that a present
    /// outcome never reads as blank.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.is_empty() {
            Self("comparison failed".to_owned())
        } else {
            Self(message)
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.0
    }

    /// Consume the outcome and return its message.
    pub fn into_message(self) -> String {
        self.0
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn failf(args: fmt::Arguments<'_>) -> Option<Outcome> {
    Some(Outcome::new(args.to_string()))
}

/// `want == got`.
pub fn equal<T: PartialEq + Debug>(want: T, got: T) -> Option<Outcome> {
    if want == got {
        return None;
    }
    failf(format_args!("got {got:?}, want {want:?}"))
}

/// `a > b`.
pub fn greater_than<T: Ord + Debug>(a: T, b: T) -> Option<Outcome> {
    if a > b {
        return None;
    }
    failf(format_args!("{a:?} is not greater than {b:?}"))
}

/// `a < b`.
pub fn less_than<T: Ord + Debug>(a: T, b: T) -> Option<Outcome> {
    if a < b {
        return None;
    }
    failf(format_args!("{a:?} is not less than {b:?}"))
}

/// `a >= b`.
pub fn greater_than_or_equal<T: Ord + Debug>(a: T, b: T) -> Option<Outcome> {
    if a >= b {
        return None;
    }
    failf(format_args!("{a:?} is not greater than or equal to {b:?}"))
}

/// `a <= b`.
pub fn less_than_or_equal<T: Ord + Debug>(a: T, b: T) -> Option<Outcome> {
    if a <= b {
        return None;
    }
    failf(format_args!("{a:?} is not less than or equal to {b:?}"))
}
