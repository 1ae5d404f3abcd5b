// -- submodules
mod ffmpeg;
mod remote;
mod source_utils;
mod still;

pub use ffmpeg::{FfmpegInput, FfmpegReader, ToolPaths, VideoGeometry, parse_probe};
pub use remote::{FormatInfo, RemoteResolver, StreamPreference, select_format};
pub use source_utils::{UPLOAD_EXTENSIONS, parse_device_index};
pub use still::StillImage;

// -- external imports
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use strum::{Display, EnumString, VariantNames};

use crate::error::{AppError, Result};
use crate::frame::Frame;
use source_utils::{scoped_temp_file, upload_extension};

/// An open video source the frame sequencer can poll.
///
/// `release` must be idempotent; implementations also release on drop.
pub trait FrameHandle {
    /// Next frame, or `None` once the source is exhausted.
    fn read_next(&mut self) -> Result<Option<Frame>>;

    fn release(&mut self);

    fn is_released(&self) -> bool;

    /// Frame count when the source knows it up front.
    fn total_frames(&self) -> Option<u64> {
        None
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebcamConfig {
    /// Device index (`"0"`) or node path (`"/dev/video0"`)
    pub device: String,

    /// ffmpeg demuxer for the device
    pub input_format: String,
}

impl Default for WebcamConfig {
    fn default() -> Self {
        Self {
            device: "0".to_string(),
            input_format: "video4linux2".to_string(),
        }
    }
}

impl WebcamConfig {
    fn input(&self) -> FfmpegInput {
        let url = match parse_device_index(&self.device) {
            Some(index) => format!("/dev/video{index}"),
            None => self.device.clone(),
        };
        FfmpegInput::new(url).with_format(self.input_format.clone())
    }
}

/// Everything the source adapters need, resolved once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub webcam: WebcamConfig,

    /// Stored sample catalog: display name -> video path
    pub videos: BTreeMap<String, PathBuf>,

    pub remote: StreamPreference,

    pub tools: ToolPaths,
}

/// Bytes received from an upload event.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Bytes of a single still captured by the user's camera.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, VariantNames)]
#[strum(serialize_all = "kebab-case")]
pub enum SourceKind {
    RemoteStream,
    Webcam,
    Upload,
    Sample,
    Still,
}

/// A user request for one of the five video sources.
#[derive(Debug, Clone)]
pub enum SourceRequest {
    /// Remote video link resolved to a direct media URL
    RemoteStream { link: String },

    /// Local capture device from the config
    Webcam,

    /// Uploaded video persisted to a temporary file
    Upload(UploadedFile),

    /// Entry of the stored sample catalog
    Sample { name: String },

    /// One captured image, served as a one-frame source
    Still(CapturedImage),
}

impl SourceRequest {
    pub const fn kind(&self) -> SourceKind {
        match self {
            SourceRequest::RemoteStream { .. } => SourceKind::RemoteStream,
            SourceRequest::Webcam => SourceKind::Webcam,
            SourceRequest::Upload(_) => SourceKind::Upload,
            SourceRequest::Sample { .. } => SourceKind::Sample,
            SourceRequest::Still(_) => SourceKind::Still,
        }
    }

    /// Resolve the request into an open handle.
    ///
    /// Anything acquired before a failure (temp files, child processes) is
    /// cleaned up before the error is returned.
    pub fn open(&self, config: &SourceConfig) -> Result<SourceHandle> {
        let tools = &config.tools;
        match self {
            SourceRequest::RemoteStream { link } => {
                let url = RemoteResolver::new(&tools.ytdlp, &config.remote).resolve(link)?;
                Ok(SourceHandle::Video(FfmpegReader::open(
                    &FfmpegInput::new(url),
                    tools,
                )?))
            }
            SourceRequest::Webcam => Ok(SourceHandle::Video(FfmpegReader::open(
                &config.webcam.input(),
                tools,
            )?)),
            SourceRequest::Upload(file) => {
                let ext = upload_extension(&file.name).ok_or_else(|| {
                    AppError::SourceResolution(format!(
                        "unsupported upload {:?}, expected one of {}",
                        file.name,
                        UPLOAD_EXTENSIONS.join(", ")
                    ))
                })?;
                if file.bytes.is_empty() {
                    return Err(AppError::SourceResolution(format!(
                        "uploaded file {:?} is empty",
                        file.name
                    )));
                }
                let scratch = scoped_temp_file("upload-", &format!(".{ext}"), &file.bytes)?;
                let input = FfmpegInput::new(scratch.path().to_string_lossy().into_owned());
                let reader = FfmpegReader::open(&input, tools)?;
                Ok(SourceHandle::Video(reader.with_scratch(scratch)))
            }
            SourceRequest::Sample { name } => {
                let path = config.videos.get(name).ok_or_else(|| {
                    AppError::SourceResolution(format!("no stored video named {name:?}"))
                })?;
                if !path.is_file() {
                    return Err(AppError::SourceResolution(format!(
                        "stored video {name:?} missing at {path:?}"
                    )));
                }
                let input = FfmpegInput::new(path.to_string_lossy().into_owned());
                Ok(SourceHandle::Video(FfmpegReader::open(&input, tools)?))
            }
            SourceRequest::Still(capture) => {
                Ok(SourceHandle::Still(StillImage::open(&capture.bytes)?))
            }
        }
    }
}

/// Open handle for any of the five sources.
pub enum SourceHandle {
    Video(FfmpegReader),
    Still(StillImage),
}

impl FrameHandle for SourceHandle {
    fn read_next(&mut self) -> Result<Option<Frame>> {
        match self {
            SourceHandle::Video(reader) => reader.read_next(),
            SourceHandle::Still(still) => still.read_next(),
        }
    }

    fn release(&mut self) {
        match self {
            SourceHandle::Video(reader) => reader.release(),
            SourceHandle::Still(still) => still.release(),
        }
    }

    fn is_released(&self) -> bool {
        match self {
            SourceHandle::Video(reader) => reader.is_released(),
            SourceHandle::Still(still) => still.is_released(),
        }
    }

    fn total_frames(&self) -> Option<u64> {
        match self {
            SourceHandle::Video(reader) => reader.total_frames(),
            SourceHandle::Still(still) => still.total_frames(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn offline_config() -> SourceConfig {
        SourceConfig {
            tools: ToolPaths {
                ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
                ffprobe: PathBuf::from("/nonexistent/ffprobe"),
                ytdlp: PathBuf::from("/nonexistent/yt-dlp"),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_webcam_index_maps_to_device_node() {
        let cfg = WebcamConfig::default();
        let input = cfg.input();
        assert_eq!(input.url, "/dev/video0");
        assert_eq!(input.format.as_deref(), Some("video4linux2"));
    }

    #[test]
    fn test_unknown_sample_is_source_resolution_error() {
        let request = SourceRequest::Sample {
            name: "Video 9".to_string(),
        };
        assert!(matches!(
            request.open(&offline_config()),
            Err(AppError::SourceResolution(_))
        ));
    }

    #[test]
    fn test_upload_with_wrong_extension_is_rejected() {
        let request = SourceRequest::Upload(UploadedFile {
            name: "notes.txt".to_string(),
            bytes: b"hello".to_vec(),
        });
        assert!(matches!(
            request.open(&offline_config()),
            Err(AppError::SourceResolution(_))
        ));
    }

    #[test]
    fn test_upload_scratch_file_removed_when_open_fails() {
        let before: Vec<_> = std::fs::read_dir(std::env::temp_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.to_string_lossy().contains("upload-"))
            .collect();

        let request = SourceRequest::Upload(UploadedFile {
            name: "roof.mp4".to_string(),
            bytes: vec![0u8; 64],
        });
        assert!(request.open(&offline_config()).is_err());

        let leaked: Vec<_> = std::fs::read_dir(std::env::temp_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.to_string_lossy().contains("upload-") && !before.contains(p))
            .collect();
        assert!(leaked.is_empty(), "leaked temp files: {leaked:?}");
    }

    #[test]
    fn test_source_kind_names() {
        assert_eq!(SourceKind::RemoteStream.to_string(), "remote-stream");
        assert_eq!(SourceKind::from_str("still").unwrap(), SourceKind::Still);
        assert_eq!(
            SourceRequest::Sample {
                name: String::new()
            }
            .kind(),
            SourceKind::Sample
        );
    }
}
