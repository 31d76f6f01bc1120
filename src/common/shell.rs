//! Shell utility functions
//!
//! Used to render commands for logs and dry-run output.

use std::process::Command;

/// Escape a string for use in a shell command
///
/// Quotes only when the string contains characters with special meaning in
/// the shell. Uses single quotes.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }

    if s.chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '=' | '/' | '.' | ':' | ','))
    {
        return s.to_string();
    }

    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Render a command as a copy-pasteable shell line, environment overrides first
pub fn display_command(command: &Command) -> String {
    let mut parts: Vec<String> = command
        .get_envs()
        .filter_map(|(key, value)| {
            value.map(|v| {
                format!(
                    "{}={}",
                    key.to_string_lossy(),
                    shell_quote(&v.to_string_lossy())
                )
            })
        })
        .collect();

    parts.push(shell_quote(&command.get_program().to_string_lossy()));
    parts.extend(
        command
            .get_args()
            .map(|arg| shell_quote(&arg.to_string_lossy())),
    );
    parts.join(" ")
}
