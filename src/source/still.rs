use tempfile::NamedTempFile;

use super::FrameHandle;
use super::source_utils::scoped_temp_file;
use crate::error::{AppError, Result};
use crate::frame::Frame;

/// One captured still served as a single-frame source.
pub struct StillImage {
    frame: Option<Frame>,
    scratch: Option<NamedTempFile>,
    released: bool,
}

impl StillImage {
    /// Persist the captured bytes to a scoped temp file and decode them.
    pub fn open(bytes: &[u8]) -> Result<Self> {
        let format = image::guess_format(bytes)
            .map_err(|e| AppError::SourceResolution(format!("unrecognized capture: {e}")))?;
        let suffix = format
            .extensions_str()
            .first()
            .map_or_else(String::new, |ext| format!(".{ext}"));

        let file = scoped_temp_file("capture-", &suffix, bytes)?;
        let image = image::open(file.path())
            .map_err(|e| AppError::SourceResolution(format!("cannot decode capture: {e}")))?;

        tracing::info!(
            "Opened still capture ({}x{})",
            image.width(),
            image.height()
        );

        Ok(Self {
            frame: Some(Frame::from_image(&image)),
            scratch: Some(file),
            released: false,
        })
    }
}

impl FrameHandle for StillImage {
    fn read_next(&mut self) -> Result<Option<Frame>> {
        if self.released {
            return Ok(None);
        }
        Ok(self.frame.take())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.frame = None;
        if let Some(file) = self.scratch.take()
            && let Err(e) = file.close()
        {
            tracing::warn!("Failed to delete temporary capture: {}", e);
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }

    fn total_frames(&self) -> Option<u64> {
        Some(1)
    }
}

impl Drop for StillImage {
    fn drop(&mut self) {
        self.release();
    }
}
