//! Data model of the install loop.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::InstallError;

/// A package to install, identified by its package-manager name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageSpec(String);

impl PackageSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageSpec {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Where a package may be installed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    /// The distribution's own repositories
    Default,
    /// A registered foreign repository, selected by its apt target release
    Repository { name: String, release: String },
}

impl SourceRef {
    /// A repository whose name doubles as its target release (e.g. `kali-rolling`)
    #[cfg(test)]
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::Repository {
            release: name.clone(),
            name,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Default => "default",
            Self::Repository { name, .. } => name,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal result for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum InstallOutcome {
    Installed { source: SourceRef },
    Failed,
}

impl InstallOutcome {
    pub fn installed(source: &SourceRef) -> Self {
        Self::Installed {
            source: source.clone(),
        }
    }

    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed { .. })
    }
}

impl fmt::Display for InstallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed { source } => write!(f, "installed from {source}"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Where a single package currently is on the retry ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    NotAttempted,
    TryingPrimary,
    TryingFallback,
    TryingAfterRepair,
    Installed,
    Failed,
}

impl AttemptPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Installed | Self::Failed)
    }

    /// Checked transition. Terminal phases never change; the ladder only moves forward.
    pub fn advance(self, to: AttemptPhase) -> Result<AttemptPhase, InstallError> {
        use AttemptPhase::*;

        if self.is_terminal() {
            return Err(InstallError::InvalidTransition { from: self, to });
        }
        let allowed = match (self, to) {
            (NotAttempted, TryingPrimary) => true,
            (TryingPrimary, TryingFallback | TryingAfterRepair | Installed) => true,
            (TryingFallback, TryingFallback | TryingAfterRepair | Installed) => true,
            (TryingAfterRepair, Installed | Failed) => true,
            _ => false,
        };

        if allowed {
            Ok(to)
        } else {
            Err(InstallError::InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotAttempted => "not attempted",
            Self::TryingPrimary => "primary",
            Self::TryingFallback => "fallback",
            Self::TryingAfterRepair => "after repair",
            Self::Installed => "installed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Outcome of one package, paired with the package it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageResult {
    pub package: PackageSpec,
    pub outcome: InstallOutcome,
}

/// Aggregate result of a run. Grows while the loop runs, read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub installed: usize,
    pub failed: usize,
    pub results: Vec<PackageResult>,
    /// How many times the dependency-repair action ran
    pub repairs: usize,
    /// Set when the run stopped early on a cancellation request
    pub cancelled: bool,
}

impl RunSummary {
    pub(crate) fn record(&mut self, package: &PackageSpec, outcome: InstallOutcome) {
        if outcome.is_installed() {
            self.installed += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(PackageResult {
            package: package.clone(),
            outcome,
        });
    }

    /// Outcomes in package order
    #[cfg(test)]
    pub fn outcomes(&self) -> impl Iterator<Item = &InstallOutcome> {
        self.results.iter().map(|r| &r.outcome)
    }

    pub fn failed_packages(&self) -> impl Iterator<Item = &PackageSpec> {
        self.results
            .iter()
            .filter(|r| !r.outcome.is_installed())
            .map(|r| &r.package)
    }

    pub fn summary_line(&self) -> String {
        let mut line = format!("Installed: {}, Failed: {}", self.installed, self.failed);
        if self.cancelled {
            line.push_str(" (cancelled)");
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases_never_move() {
        for from in [AttemptPhase::Installed, AttemptPhase::Failed] {
            for to in [
                AttemptPhase::NotAttempted,
                AttemptPhase::TryingPrimary,
                AttemptPhase::TryingFallback,
                AttemptPhase::TryingAfterRepair,
                AttemptPhase::Installed,
                AttemptPhase::Failed,
            ] {
                assert!(from.advance(to).is_err(), "{from:?} -> {to:?} must be rejected");
            }
        }
    }

    #[test]
    fn ladder_moves_forward() {
        let phase = AttemptPhase::NotAttempted
            .advance(AttemptPhase::TryingPrimary)
            .and_then(|p| p.advance(AttemptPhase::TryingFallback))
            .and_then(|p| p.advance(AttemptPhase::TryingAfterRepair))
            .and_then(|p| p.advance(AttemptPhase::Failed))
            .unwrap();
        assert_eq!(phase, AttemptPhase::Failed);
    }

    #[test]
    fn primary_cannot_fail_without_repair() {
        assert!(AttemptPhase::TryingPrimary.advance(AttemptPhase::Failed).is_err());
        assert!(AttemptPhase::TryingFallback.advance(AttemptPhase::Failed).is_err());
    }

    #[test]
    fn named_source_uses_name_as_release() {
        let source = SourceRef::named("kali-rolling");
        assert_eq!(
            source,
            SourceRef::Repository {
                name: "kali-rolling".into(),
                release: "kali-rolling".into()
            }
        );
        assert_eq!(source.to_string(), "kali-rolling");
        assert_eq!(SourceRef::Default.to_string(), "default");
    }

    #[test]
    fn summary_counts() {
        let mut summary = RunSummary::default();
        summary.record(&"nmap".into(), InstallOutcome::installed(&SourceRef::Default));
        summary.record(&"ghost-pkg".into(), InstallOutcome::Failed);
        assert_eq!(summary.installed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.summary_line(), "Installed: 1, Failed: 1");
        assert_eq!(
            summary.failed_packages().map(PackageSpec::id).collect::<Vec<_>>(),
            vec!["ghost-pkg"]
        );
    }
}
