use sudo::RunningAs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("This operation requires root privileges (run it with sudo)")]
    NeedRoot,
}

/// Fail unless the process runs as root. Suid counts as root.
pub fn require_root() -> Result<(), PrivilegeError> {
    match sudo::check() {
        RunningAs::Root | RunningAs::Suid => Ok(()),
        RunningAs::User => Err(PrivilegeError::NeedRoot),
    }
}

pub fn is_root() -> bool {
    require_root().is_ok()
}
