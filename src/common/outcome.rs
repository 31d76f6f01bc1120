//! Explicit per-step outcomes for provisioning steps outside the install loop.
//!
//! A best-effort step that fails is recorded as [`StepOutcome::Ignored`] and
//! stays visible in the report and journal instead of disappearing.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Ignored(String),
    Fatal(String),
}

impl StepOutcome {
    /// Map a best-effort result: errors are ignored, never fatal.
    pub fn best_effort<T>(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => Self::Ignored(format!("{e:#}")),
        }
    }

    /// Map a result whose failure must stop the run.
    pub fn required<T, E: fmt::Display>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => Self::Fatal(format!("{e:#}")),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Ignored(reason) | Self::Fatal(reason) => Some(reason),
        }
    }

    pub fn label(&self) -> colored::ColoredString {
        match self {
            Self::Success => "OK".green(),
            Self::Ignored(_) => "IGNORED".yellow(),
            Self::Fatal(_) => "FATAL".red(),
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Ignored(reason) => write!(f, "ignored: {reason}"),
            Self::Fatal(reason) => write!(f, "fatal: {reason}"),
        }
    }
}

/// A named step and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub outcome: StepOutcome,
}

impl StepReport {
    pub fn new(name: impl Into<String>, outcome: StepOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
        }
    }
}
