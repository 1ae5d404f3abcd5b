use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::frame::Frame;

/// Display sink: holds one annotated frame at a time, each `show` replaces the last.
pub trait DisplaySink {
    fn show(&mut self, frame: Frame);
}

#[derive(Debug, Default)]
struct Slot {
    frame: Option<Frame>,
    shown: u64,
}

/// Single-slot in-memory display, cheap to clone and share with a reader.
#[derive(Debug, Clone, Default)]
pub struct LatestFrame {
    slot: Arc<Mutex<Slot>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the frame currently on display.
    pub fn current(&self) -> Option<Frame> {
        self.slot.lock().ok().and_then(|s| s.frame.clone())
    }

    /// Number of frames shown so far.
    pub fn shown(&self) -> u64 {
        self.slot.lock().map(|s| s.shown).unwrap_or(0)
    }
}

impl DisplaySink for LatestFrame {
    fn show(&mut self, frame: Frame) {
        match self.slot.lock() {
            Ok(mut slot) => {
                slot.frame = Some(frame);
                slot.shown += 1;
            }
            Err(_) => tracing::error!("Display slot poisoned, dropping frame"),
        }
    }
}

/// Writes every frame over the same image file.
#[derive(Debug, Clone)]
pub struct ImageFileSink {
    path: PathBuf,
    written: u64,
}

impl ImageFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl DisplaySink for ImageFileSink {
    fn show(&mut self, frame: Frame) {
        if frame.to_rgb_image().save(&self.path).is_err() {
            tracing::error!(
                "Failed to save annotated frame {} to {:?}. skipping.",
                frame.index,
                self.path
            );
            return;
        }
        self.written += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn frame(value: u8, index: u64) -> Frame {
        Frame::from_rgb_image(&RgbImage::from_pixel(4, 4, Rgb([value; 3]))).with_index(index)
    }

    #[test]
    fn test_latest_frame_replaces_previous() {
        let mut sink = LatestFrame::new();
        let reader = sink.clone();
        assert!(reader.current().is_none());

        sink.show(frame(1, 0));
        sink.show(frame(2, 1));

        assert_eq!(reader.current().unwrap().index, 1);
        assert_eq!(reader.shown(), 2);
    }

    #[test]
    fn test_image_file_sink_overwrites_one_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("display.png");
        let mut sink = ImageFileSink::new(&path);

        sink.show(frame(10, 0));
        sink.show(frame(200, 1));

        assert_eq!(sink.written(), 2);
        let saved = image::open(&path).unwrap().to_rgb8();
        assert_eq!(saved.get_pixel(0, 0), &Rgb([200, 200, 200]));
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }
}
