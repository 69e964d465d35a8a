//! Progress bar for batch runs.

use std::sync::Arc;

use bibresolve_core::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

/// Builds a progress bar and the callback that drives it.
///
/// Returns `None` when the bar is disabled (quiet mode, non-terminal stderr
/// or an empty batch).
pub(crate) fn progress_bar(enabled: bool, total: usize) -> Option<(ProgressBar, ProgressCallback)> {
    if !enabled || total == 0 {
        return None;
    }
    let bar = ProgressBar::new(u64::try_from(total).unwrap_or(u64::MAX));
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let driver = bar.clone();
    let callback: ProgressCallback = Arc::new(move |completed, _total, identifier: &str, succeeded| {
        driver.set_position(u64::try_from(completed).unwrap_or(u64::MAX));
        let mark = if succeeded { "ok" } else { "failed" };
        driver.set_message(format!("{identifier} {mark}"));
    });
    Some((bar, callback))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_disabled_returns_none() {
        assert!(progress_bar(false, 10).is_none());
        assert!(progress_bar(true, 0).is_none());
    }

    #[test]
    fn test_progress_callback_advances_bar() {
        let (bar, callback) = progress_bar(true, 3).unwrap();
        callback(2, 3, "10.1234/a", true);
        assert_eq!(bar.position(), 2);
        assert_eq!(bar.length(), Some(3));
        bar.finish_and_clear();
    }
}
