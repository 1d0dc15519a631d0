//! What a run did: one record per dispatched unit.
//!
//! A [`RunReport`] is returned by every run entry point. Units the engine
//! never dispatched (steps after a failure, later variations) do not appear.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::log::LogLine;

/// Unix milliseconds, saturating; a clock before the epoch reads as 0.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

/// Identifies one run of a scenario in its report and in trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ============================================================================
// Unit records
// ============================================================================

/// What kind of unit a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// The setup unit of a branch.
    Setup,
    /// A variation body.
    Variation,
    /// A scenario step.
    Step,
    /// The joined background hooks of a branch.
    Background,
}

/// How a unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Ran and did not fail.
    Passed,
    /// Ran and failed (assertion, hook error or panic).
    Failed,
    /// Handed to the reporter, which never executed it.
    NotExecuted,
}

/// One dispatched unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Kind of unit.
    pub kind: UnitKind,
    /// Unit name: the step or variation description, `setup`, or
    /// `background`.
    pub name: String,
    /// The variation branch this unit ran in, if any.
    pub variation: Option<String>,
    /// How it ended.
    pub status: UnitStatus,
    /// When dispatch started (Unix timestamp ms).
    pub started_at: u64,
    /// When dispatch returned (Unix timestamp ms).
    pub completed_at: u64,
    /// Buffered log lines, in order.
    pub lines: Vec<LogLine>,
    /// Filtered panic stack, if the unit panicked.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<String>,
}

impl UnitRecord {
    /// Wall time spent in the unit.
    pub fn duration_ms(&self) -> u64 {
        self.completed_at.saturating_sub(self.started_at)
    }

    /// Whether the unit passed.
    pub fn passed(&self) -> bool {
        self.status == UnitStatus::Passed
    }
}

// ============================================================================
// Run report
// ============================================================================

/// Result of running a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier, also attached to tracing events.
    pub id: RunId,
    /// Scenario name.
    pub name: String,
    /// Whether every dispatched unit passed.
    pub passed: bool,
    /// Dispatched units in dispatch order.
    pub units: Vec<UnitRecord>,
}

impl RunReport {
    /// First record named `name`.
    pub fn unit(&self, name: &str) -> Option<&UnitRecord> {
        self.units.iter().find(|unit| unit.name == name)
    }

    /// Names of the step units that were dispatched, in order.
    pub fn executed_steps(&self) -> Vec<&str> {
        self.units
            .iter()
            .filter(|unit| unit.kind == UnitKind::Step)
            .map(|unit| unit.name.as_str())
            .collect()
    }

    /// The first unit that did not pass.
    pub fn failed_unit(&self) -> Option<&UnitRecord> {
        self.units.iter().find(|unit| !unit.passed())
    }
}
