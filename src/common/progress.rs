use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::ui::prelude::*;

const TICK_CHARS: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

pub fn create_spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
        pb.set_style(style.tick_chars(TICK_CHARS));
    }
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Byte-counting bar for downloads; falls back to a spinner when the size is unknown.
pub fn create_download_bar(message: impl Into<String>, total: Option<u64>) -> ProgressBar {
    let Some(total) = total else {
        return create_spinner(message);
    };

    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{bar:30}] {bytes}/{total_bytes} ({eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(message.into());
    pb
}

/// Clear the bar and print a success line in its place
pub fn finish_with_success(pb: ProgressBar, message: impl Into<String>) {
    pb.finish_and_clear();
    emit(
        Level::Success,
        "progress.done",
        &format!("{} {}", char::from(NerdFont::Check), message.into()),
        None,
    );
}

pub fn finish_with_failure(pb: ProgressBar) {
    pb.abandon();
}
