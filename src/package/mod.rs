//! Package installation with a primary/fallback source ladder.

pub mod apt;
pub mod installer;
pub mod types;

pub use apt::AptBackend;
pub use installer::{CancelToken, PackageInstaller, RefreshableBackend, RepairPolicy};
pub use types::{AttemptPhase, PackageSpec, RunSummary, SourceRef};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("no packages to install")]
    NoPackages,
    #[error("no package sources configured")]
    NoSources,
    #[error("invalid attempt transition: {from} -> {to}")]
    InvalidTransition {
        from: AttemptPhase,
        to: AttemptPhase,
    },
}
