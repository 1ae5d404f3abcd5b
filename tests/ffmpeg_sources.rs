#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use solar_inspect::{
    AnnotateConfigs, Annotator, AppConfig, DetectionOutcome, Detections, Detector, EndReason,
    Frame, Inspector, LatestFrame, Result, SourceRequest, ToolPaths, UploadedFile,
};
use tempfile::TempDir;

const WIDTH: usize = 6;
const HEIGHT: usize = 4;

#[derive(Default)]
struct CountingDetector {
    calls: AtomicU64,
}

impl Detector for CountingDetector {
    fn predict(&self, _frame: &Frame, _conf: f32) -> Result<Detections> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Detections::default())
    }
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// ffprobe reporting a 6x4 stream and an ffmpeg that emits `frames` whole
/// frames followed by a partial one, recording its arguments.
fn fake_tools(dir: &Path, frames: usize) -> ToolPaths {
    let ffprobe = dir.join("ffprobe");
    write_script(
        &ffprobe,
        &format!(
            "#!/bin/sh\necho '{{\"streams\": [{{\"width\": {WIDTH}, \"height\": {HEIGHT}, \"nb_frames\": \"{frames}\"}}]}}'\n"
        ),
    );

    let ffmpeg = dir.join("ffmpeg");
    write_script(
        &ffmpeg,
        &format!(
            "#!/bin/sh\necho \"$@\" > \"{}\"\nhead -c {} /dev/zero\n",
            dir.join("ffmpeg.args").display(),
            frames * WIDTH * HEIGHT * 3 + 7
        ),
    );

    ToolPaths {
        ffmpeg,
        ffprobe,
        ytdlp: PathBuf::from("/nonexistent/yt-dlp"),
    }
}

/// The `-i` argument ffmpeg was started with.
fn recorded_input(dir: &Path) -> PathBuf {
    let args = std::fs::read_to_string(dir.join("ffmpeg.args")).unwrap();
    let mut tokens = args.split_whitespace();
    tokens.find(|t| *t == "-i").unwrap();
    PathBuf::from(tokens.next().unwrap())
}

fn inspector(config: AppConfig, detector: Arc<CountingDetector>) -> Inspector {
    let annotator = Annotator::with_font(AnnotateConfigs::default(), None);
    Inspector::new(config, detector, annotator)
}

#[test]
fn uploaded_video_runs_to_the_end_and_leaves_no_temp_file() {
    let dir = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.source.tools = fake_tools(dir.path(), 3);
    let detector = Arc::new(CountingDetector::default());
    let inspector = inspector(config, detector.clone());
    let mut display = LatestFrame::new();
    let reader = display.clone();

    let request = SourceRequest::Upload(UploadedFile {
        name: "roof.mp4".to_string(),
        bytes: vec![1u8; 128],
    });
    let outcome = inspector.detect(&request, &mut display);

    let DetectionOutcome::Completed(report) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(report.frames_annotated, 3);
    assert_eq!(report.end, EndReason::Exhausted);
    assert_eq!(detector.calls.load(Ordering::SeqCst), 3);
    assert_eq!(reader.shown(), 3);
    assert_eq!(reader.current().unwrap().index, 2);

    let upload_path = recorded_input(dir.path());
    assert!(
        upload_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("upload-")
    );
    assert_eq!(upload_path.extension().unwrap(), "mp4");
    assert!(!upload_path.exists(), "upload left behind: {upload_path:?}");
    assert!(!inspector.controls().is_running());
}

#[test]
fn stored_sample_is_read_from_the_catalog_path() {
    let dir = TempDir::new().unwrap();
    let video = dir.path().join("video_1.mp4");
    std::fs::write(&video, b"not really a video").unwrap();

    let mut config = AppConfig::default();
    config.source.tools = fake_tools(dir.path(), 2);
    config
        .source
        .videos
        .insert("Video 1".to_string(), video.clone());
    let detector = Arc::new(CountingDetector::default());
    let inspector = inspector(config, detector.clone());
    assert_eq!(inspector.sample_names(), vec!["Video 1".to_string()]);

    let request = SourceRequest::Sample {
        name: "Video 1".to_string(),
    };
    let outcome = inspector.detect(&request, &mut LatestFrame::new());

    let DetectionOutcome::Completed(report) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(report.frames_annotated, 2);
    assert_eq!(report.end, EndReason::Exhausted);
    assert_eq!(recorded_input(dir.path()), video);
    assert!(video.exists());
}
