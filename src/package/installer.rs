//! The install ladder.
//!
//! Each package is tried against the primary source, then every fallback in
//! order, then once more against the last source after the dependency-repair
//! action. Individual failures are recorded, never raised: the loop always
//! reaches the end of the package list unless cancelled between packages.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::InstallError;
use super::types::{AttemptPhase, InstallOutcome, PackageSpec, RunSummary, SourceRef};
use crate::journal::{AttemptSink, JournalEvent};
use crate::ui::prelude::*;

/// Install and repair actions of a package manager.
///
/// `install` must be idempotent: installing an already-installed package succeeds.
pub trait PackageBackend {
    fn install(&mut self, package: &PackageSpec, source: &SourceRef) -> Result<()>;

    /// Process-wide repair of broken or half-configured packages.
    fn repair(&mut self) -> Result<()>;
}

/// A backend whose package metadata must be refreshed after its sources change.
pub trait RefreshableBackend: PackageBackend {
    fn refresh(&mut self) -> Result<()>;
}

/// When the dependency-repair action runs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum RepairPolicy {
    /// At most once per run, on the first package that needs it
    #[default]
    Once,
    /// Every time a package reaches the repair step
    PerPackage,
}

/// Cooperative cancellation, checked between packages only.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct PackageInstaller<'a> {
    backend: &'a mut dyn PackageBackend,
    journal: &'a mut dyn AttemptSink,
    policy: RepairPolicy,
    cancel: CancelToken,
    repaired: bool,
}

impl<'a> PackageInstaller<'a> {
    pub fn new(backend: &'a mut dyn PackageBackend, journal: &'a mut dyn AttemptSink) -> Self {
        Self {
            backend,
            journal,
            policy: RepairPolicy::default(),
            cancel: CancelToken::new(),
            repaired: false,
        }
    }

    pub fn with_repair_policy(mut self, policy: RepairPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Install every package, in order, and summarize.
    ///
    /// `sources[0]` is the primary; the rest are fallbacks in priority order.
    pub fn install_all(
        &mut self,
        packages: &[PackageSpec],
        sources: &[SourceRef],
    ) -> Result<RunSummary, InstallError> {
        if packages.is_empty() {
            return Err(InstallError::NoPackages);
        }
        if sources.is_empty() {
            return Err(InstallError::NoSources);
        }

        let mut summary = RunSummary::default();

        for (index, package) in packages.iter().enumerate() {
            if self.cancel.is_cancelled() {
                let remaining = packages.len() - index;
                self.journal.record(JournalEvent::Cancelled { remaining });
                emit(
                    Level::Warn,
                    "packages.cancelled",
                    &format!(
                        "{} Cancelled, {} package{} not attempted",
                        char::from(NerdFont::Warning),
                        remaining,
                        if remaining == 1 { "" } else { "s" }
                    ),
                    None,
                );
                summary.cancelled = true;
                break;
            }

            let outcome = self.install_one(package, sources, &mut summary)?;
            summary.record(package, outcome);
        }

        Ok(summary)
    }

    fn install_one(
        &mut self,
        package: &PackageSpec,
        sources: &[SourceRef],
        summary: &mut RunSummary,
    ) -> Result<InstallOutcome, InstallError> {
        let (primary, fallbacks) = sources.split_first().ok_or(InstallError::NoSources)?;

        let mut phase = AttemptPhase::NotAttempted.advance(AttemptPhase::TryingPrimary)?;
        if self.attempt(package, primary, phase) {
            phase.advance(AttemptPhase::Installed)?;
            return Ok(InstallOutcome::installed(primary));
        }

        for fallback in fallbacks {
            phase = phase.advance(AttemptPhase::TryingFallback)?;
            if self.attempt(package, fallback, phase) {
                phase.advance(AttemptPhase::Installed)?;
                return Ok(InstallOutcome::installed(fallback));
            }
        }

        phase = phase.advance(AttemptPhase::TryingAfterRepair)?;
        self.repair_if_needed(summary);

        let last = fallbacks.last().unwrap_or(primary);
        if self.attempt(package, last, phase) {
            phase.advance(AttemptPhase::Installed)?;
            return Ok(InstallOutcome::installed(last));
        }

        phase.advance(AttemptPhase::Failed)?;
        self.journal.record(JournalEvent::PackageFailed {
            package: package.id().to_string(),
        });
        emit(
            Level::Error,
            "packages.failed",
            &format!(
                "{} {} could not be installed from any source",
                char::from(NerdFont::CrossCircle),
                package
            ),
            Some(serde_json::json!({ "package": package.id() })),
        );
        Ok(InstallOutcome::Failed)
    }

    fn attempt(
        &mut self,
        package: &PackageSpec,
        source: &SourceRef,
        phase: AttemptPhase,
    ) -> bool {
        self.journal.record(JournalEvent::Attempt {
            package: package.id().to_string(),
            source: source.name().to_string(),
            phase,
        });
        emit(
            Level::Info,
            "packages.attempt",
            &format!(
                "{} Installing {} from {} ({})",
                char::from(NerdFont::Package),
                package,
                source,
                phase
            ),
            None,
        );

        match self.backend.install(package, source) {
            Ok(()) => {
                self.journal.record(JournalEvent::Installed {
                    package: package.id().to_string(),
                    source: source.name().to_string(),
                });
                emit(
                    Level::Success,
                    "packages.installed",
                    &format!(
                        "{} {} installed from {}",
                        char::from(NerdFont::Check),
                        package,
                        source
                    ),
                    Some(serde_json::json!({
                        "package": package.id(),
                        "source": source.name(),
                    })),
                );
                true
            }
            Err(e) => {
                let error = format!("{e:#}");
                emit(
                    Level::Warn,
                    "packages.attempt_failed",
                    &format!(
                        "{} {} failed from {}: {}",
                        char::from(NerdFont::Warning),
                        package,
                        source,
                        error
                    ),
                    None,
                );
                self.journal.record(JournalEvent::AttemptFailed {
                    package: package.id().to_string(),
                    source: source.name().to_string(),
                    error,
                });
                false
            }
        }
    }

    fn repair_if_needed(&mut self, summary: &mut RunSummary) {
        if self.policy == RepairPolicy::Once && self.repaired {
            emit(
                Level::Debug,
                "packages.repair.skipped",
                "Dependency repair already ran in this session",
                None,
            );
            return;
        }

        emit(
            Level::Info,
            "packages.repair",
            &format!("{} Repairing broken dependencies...", char::from(NerdFont::Wrench)),
            None,
        );

        let error = match self.backend.repair() {
            Ok(()) => None,
            Err(e) => {
                let error = format!("{e:#}");
                emit(
                    Level::Warn,
                    "packages.repair.failed",
                    &format!(
                        "{} Dependency repair failed: {}",
                        char::from(NerdFont::Warning),
                        error
                    ),
                    None,
                );
                Some(error)
            }
        };

        self.journal.record(JournalEvent::Repair { error });
        self.repaired = true;
        summary.repairs += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryJournal;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    /// Backend driven by a decision function, counting every call.
    struct ScriptedBackend {
        decide: Box<dyn FnMut(&PackageSpec, &SourceRef, usize) -> bool>,
        installs: Vec<(String, String)>,
        repairs: usize,
        repair_fails: bool,
    }

    impl ScriptedBackend {
        fn new(decide: impl FnMut(&PackageSpec, &SourceRef, usize) -> bool + 'static) -> Self {
            Self {
                decide: Box::new(decide),
                installs: Vec::new(),
                repairs: 0,
                repair_fails: false,
            }
        }

        fn calls_for(&self, package: &str) -> Vec<&str> {
            self.installs
                .iter()
                .filter(|(p, _)| p == package)
                .map(|(_, s)| s.as_str())
                .collect()
        }
    }

    impl PackageBackend for ScriptedBackend {
        fn install(&mut self, package: &PackageSpec, source: &SourceRef) -> Result<()> {
            self.installs
                .push((package.id().to_string(), source.name().to_string()));
            if (self.decide)(package, source, self.repairs) {
                Ok(())
            } else {
                anyhow::bail!("E: Unable to locate package {}", package)
            }
        }

        fn repair(&mut self) -> Result<()> {
            self.repairs += 1;
            if self.repair_fails {
                anyhow::bail!("dpkg was interrupted")
            }
            Ok(())
        }
    }

    fn packages(ids: &[&str]) -> Vec<PackageSpec> {
        ids.iter().map(|id| PackageSpec::new(*id)).collect()
    }

    fn default_and_kali() -> Vec<SourceRef> {
        vec![SourceRef::Default, SourceRef::named("kali-rolling")]
    }

    fn run_once(
        backend: &mut ScriptedBackend,
        journal: &mut MemoryJournal,
        pkgs: &[PackageSpec],
    ) -> RunSummary {
        run(backend, journal, pkgs, &default_and_kali(), RepairPolicy::Once)
    }

    fn run(
        backend: &mut ScriptedBackend,
        journal: &mut MemoryJournal,
        pkgs: &[PackageSpec],
        sources: &[SourceRef],
        policy: RepairPolicy,
    ) -> RunSummary {
        PackageInstaller::new(backend, journal)
            .with_repair_policy(policy)
            .install_all(pkgs, sources)
            .unwrap()
    }

    #[test]
    fn one_outcome_per_package_in_order() {
        let pkgs = packages(&["a", "b", "c", "d"]);
        let mut backend = ScriptedBackend::new(|p, _, _| p.id() != "b");
        let mut journal = MemoryJournal::default();
        let summary = run_once(&mut backend, &mut journal, &pkgs);

        assert_eq!(summary.results.len(), pkgs.len());
        let order: Vec<_> = summary.results.iter().map(|r| r.package.id()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn primary_success_skips_fallback_and_repair() {
        let pkgs = packages(&["nmap", "nikto", "hydra"]);
        let mut backend = ScriptedBackend::new(|_, s, _| s.is_default());
        let mut journal = MemoryJournal::default();
        let summary = run_once(&mut backend, &mut journal, &pkgs);

        assert!(summary
            .outcomes()
            .all(|o| *o == InstallOutcome::installed(&SourceRef::Default)));
        assert!(backend.installs.iter().all(|(_, s)| s == "default"));
        assert_eq!(backend.repairs, 0);
        assert_eq!(summary.repairs, 0);
    }

    #[test]
    fn fallback_success_never_repairs() {
        let pkgs = packages(&["sqlmap", "gobuster"]);
        let mut backend = ScriptedBackend::new(|_, s, _| !s.is_default());
        let mut journal = MemoryJournal::default();
        let summary = run_once(&mut backend, &mut journal, &pkgs);

        let kali = SourceRef::named("kali-rolling");
        assert!(summary.outcomes().all(|o| *o == InstallOutcome::installed(&kali)));
        assert_eq!(backend.repairs, 0);
        assert_eq!(summary.installed, 2);
    }

    #[test]
    fn total_failure_processes_every_package() {
        let pkgs = packages(&["x", "y", "z"]);
        let mut backend = ScriptedBackend::new(|_, _, _| false);
        let mut journal = MemoryJournal::default();
        let summary = run_once(&mut backend, &mut journal, &pkgs);

        assert_eq!(summary.failed, 3);
        assert_eq!(summary.installed, 0);
        assert!(summary.outcomes().all(|o| *o == InstallOutcome::Failed));
        assert!(!summary.cancelled);
        // default, fallback, retry of the fallback after repair
        for id in ["x", "y", "z"] {
            assert_eq!(backend.calls_for(id), vec!["default", "kali-rolling", "kali-rolling"]);
        }
    }

    #[test]
    fn second_run_reinstalls_from_primary() {
        // Idempotent backend: anything installed once is present afterwards.
        let installed: Rc<RefCell<HashMap<String, bool>>> = Default::default();
        let state = installed.clone();
        let mut backend = ScriptedBackend::new(move |p, s, _| {
            let mut state = state.borrow_mut();
            if state.contains_key(p.id()) {
                return true;
            }
            // First time round only the fallback carries these packages
            if !s.is_default() {
                state.insert(p.id().to_string(), true);
                return true;
            }
            false
        });
        let pkgs = packages(&["sqlmap", "wpscan"]);
        let mut journal = MemoryJournal::default();

        let first = run_once(&mut backend, &mut journal, &pkgs);
        assert_eq!(first.installed, 2);

        let second = run_once(&mut backend, &mut journal, &pkgs);
        assert!(second
            .outcomes()
            .all(|o| *o == InstallOutcome::installed(&SourceRef::Default)));
    }

    #[test]
    fn nmap_default_sqlmap_kali() {
        let pkgs = packages(&["nmap", "sqlmap"]);
        let mut backend = ScriptedBackend::new(|p, s, _| match p.id() {
            "nmap" => s.is_default(),
            "sqlmap" => s.name() == "kali-rolling",
            _ => false,
        });
        let mut journal = MemoryJournal::default();
        let summary = run_once(&mut backend, &mut journal, &pkgs);

        assert_eq!(summary.installed, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            summary.outcomes().cloned().collect::<Vec<_>>(),
            vec![
                InstallOutcome::installed(&SourceRef::Default),
                InstallOutcome::installed(&SourceRef::named("kali-rolling")),
            ]
        );
    }

    #[test]
    fn ghost_package_fails_without_aborting() {
        let pkgs = packages(&["ghost-pkg"]);
        let mut backend = ScriptedBackend::new(|_, _, _| false);
        let mut journal = MemoryJournal::default();
        let summary = run_once(&mut backend, &mut journal, &pkgs);

        assert_eq!(summary.installed, 0);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.outcomes().cloned().collect::<Vec<_>>(),
            vec![InstallOutcome::Failed]
        );
        assert!(journal
            .events()
            .any(|e| matches!(
                e,
                JournalEvent::PackageFailed { package } if package == "ghost-pkg"
            )));
    }

    #[test]
    fn repair_runs_once_per_run_by_default() {
        let pkgs = packages(&["a", "b", "c"]);
        let mut backend = ScriptedBackend::new(|_, _, _| false);
        let mut journal = MemoryJournal::default();
        let summary = run_once(&mut backend, &mut journal, &pkgs);

        assert_eq!(backend.repairs, 1);
        assert_eq!(summary.repairs, 1);
        // Every package still gets its single post-repair retry
        assert_eq!(backend.installs.len(), 9);
    }

    #[test]
    fn per_package_policy_repairs_every_failing_package() {
        let pkgs = packages(&["a", "b", "c"]);
        let mut backend = ScriptedBackend::new(|p, _, _| p.id() == "b");
        let mut journal = MemoryJournal::default();
        let summary = run(
            &mut backend,
            &mut journal,
            &pkgs,
            &default_and_kali(),
            RepairPolicy::PerPackage,
        );

        assert_eq!(backend.repairs, 2);
        assert_eq!(summary.repairs, 2);
    }

    #[test]
    fn repair_can_rescue_a_package() {
        let pkgs = packages(&["burpsuite"]);
        // Only installable from the fallback once dependencies are repaired
        let mut backend = ScriptedBackend::new(|_, s, repairs| !s.is_default() && repairs > 0);
        let mut journal = MemoryJournal::default();
        let summary = run_once(&mut backend, &mut journal, &pkgs);

        assert_eq!(
            summary.outcomes().cloned().collect::<Vec<_>>(),
            vec![InstallOutcome::installed(&SourceRef::named("kali-rolling"))]
        );
        assert_eq!(backend.repairs, 1);
    }

    #[test]
    fn failing_repair_does_not_stop_the_run() {
        let pkgs = packages(&["a", "b"]);
        let mut backend = ScriptedBackend::new(|p, _, _| p.id() == "b");
        backend.repair_fails = true;
        let mut journal = MemoryJournal::default();
        let summary = run_once(&mut backend, &mut journal, &pkgs);

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.installed, 1);
        assert!(journal
            .events()
            .any(|e| matches!(e, JournalEvent::Repair { error: Some(_) })));
    }

    #[test]
    fn single_source_retries_primary_after_repair() {
        let pkgs = packages(&["wireshark"]);
        let mut backend = ScriptedBackend::new(|_, _, repairs| repairs > 0);
        let mut journal = MemoryJournal::default();
        let summary = run(
            &mut backend,
            &mut journal,
            &pkgs,
            &[SourceRef::Default],
            RepairPolicy::Once,
        );

        assert_eq!(backend.calls_for("wireshark"), vec!["default", "default"]);
        assert_eq!(
            summary.outcomes().cloned().collect::<Vec<_>>(),
            vec![InstallOutcome::installed(&SourceRef::Default)]
        );
    }

    #[test]
    fn every_fallback_tried_in_order_then_last_retried() {
        let sources = vec![
            SourceRef::Default,
            SourceRef::named("kali-rolling"),
            SourceRef::named("kali-last-snapshot"),
        ];
        let pkgs = packages(&["ghost-pkg"]);
        let mut backend = ScriptedBackend::new(|_, _, _| false);
        let mut journal = MemoryJournal::default();
        run(&mut backend, &mut journal, &pkgs, &sources, RepairPolicy::Once);

        assert_eq!(
            backend.calls_for("ghost-pkg"),
            vec!["default", "kali-rolling", "kali-last-snapshot", "kali-last-snapshot"]
        );
    }

    #[test]
    fn cancellation_stops_between_packages() {
        let token = CancelToken::new();
        let trigger = token.clone();
        let mut backend = ScriptedBackend::new(move |p, _, _| {
            if p.id() == "b" {
                trigger.cancel();
            }
            true
        });
        let mut journal = MemoryJournal::default();
        let pkgs = packages(&["a", "b", "c", "d"]);

        let summary = PackageInstaller::new(&mut backend, &mut journal)
            .with_cancel_token(token)
            .install_all(&pkgs, &default_and_kali())
            .unwrap();

        // "b" finishes its attempt; nothing after it starts
        assert!(summary.cancelled);
        assert_eq!(summary.results.len(), 2);
        assert_eq!(backend.installs.len(), 2);
        assert!(journal
            .events()
            .any(|e| matches!(e, JournalEvent::Cancelled { remaining: 2 })));
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let mut backend = ScriptedBackend::new(|_, _, _| true);
        let mut journal = MemoryJournal::default();
        let mut installer = PackageInstaller::new(&mut backend, &mut journal);

        assert!(matches!(
            installer.install_all(&[], &default_and_kali()),
            Err(InstallError::NoPackages)
        ));
        assert!(matches!(
            installer.install_all(&packages(&["nmap"]), &[]),
            Err(InstallError::NoSources)
        ));
    }

    #[test]
    fn journal_records_every_attempt() {
        let pkgs = packages(&["sqlmap"]);
        let mut backend = ScriptedBackend::new(|_, s, _| !s.is_default());
        let mut journal = MemoryJournal::default();
        run_once(&mut backend, &mut journal, &pkgs);

        let attempts: Vec<_> = journal
            .events()
            .filter_map(|e| match e {
                JournalEvent::Attempt { source, phase, .. } => Some((source.as_str(), *phase)),
                _ => None,
            })
            .collect();
        assert_eq!(
            attempts,
            vec![
                ("default", AttemptPhase::TryingPrimary),
                ("kali-rolling", AttemptPhase::TryingFallback),
            ]
        );
    }
}
