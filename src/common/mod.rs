pub mod distro;
pub mod exec;
pub mod git;
pub mod http;
pub mod outcome;
pub mod paths;
pub mod privilege;
pub mod progress;
pub mod shell;

pub use exec::CommandExecutor;
pub use outcome::{StepOutcome, StepReport};
