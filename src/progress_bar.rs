use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};

/// Get a standardized progress bar style
pub fn progress_bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}: {wide_bar:.cyan/blue} {pos}/{len} [{elapsed_precise}]")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Progress bar for a detection run. Sources of unknown length (webcam,
/// live streams) get a hidden bar.
pub fn frame_progress(total_frames: Option<u64>) -> ProgressBar {
    match total_frames {
        Some(total) if total > 0 => ProgressBar::new(total)
            .with_style(progress_bar_style())
            .with_message("Running detection")
            .with_finish(ProgressFinish::WithMessage("Finished".into())),
        _ => ProgressBar::hidden(),
    }
}
