use serde::Deserialize;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use tempfile::NamedTempFile;

use super::FrameHandle;
use crate::error::{AppError, Result};
use crate::frame::Frame;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// ffmpeg executable used for decoding
    pub ffmpeg: PathBuf,

    /// ffprobe executable used to read stream geometry
    pub ffprobe: PathBuf,

    /// yt-dlp executable used to resolve remote links
    pub ytdlp: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            ytdlp: PathBuf::from("yt-dlp"),
        }
    }
}

/// What ffmpeg should read: a path, URL or device node, with an optional demuxer.
#[derive(Debug, Clone)]
pub struct FfmpegInput {
    pub url: String,
    pub format: Option<String>,
}

impl FfmpegInput {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    fn push_args(&self, cmd: &mut Command) {
        if let Some(fmt) = &self.format {
            cmd.arg("-f").arg(fmt);
        }
        cmd.arg("-i").arg(&self.url);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoGeometry {
    pub width: u32,
    pub height: u32,
    pub total_frames: Option<u64>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    /// Display rotation in degrees, from the display matrix or the legacy tag.
    fn rotation(&self) -> i64 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360)
    }
}

/// Parse `ffprobe -of json` output for the first video stream.
///
/// Width and height are the displayed size: ffmpeg auto-rotates, so a
/// stream rotated by 90 or 270 degrees comes out with its sides swapped.
pub fn parse_probe(json: &str) -> Result<VideoGeometry> {
    let probe: ProbeOutput = serde_json::from_str(json)?;
    let stream = probe
        .streams
        .first()
        .ok_or_else(|| AppError::SourceResolution("no video stream found".to_string()))?;

    match (stream.width, stream.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => {
            let (width, height) = match stream.rotation() {
                90 | 270 => (height, width),
                _ => (width, height),
            };
            Ok(VideoGeometry {
                width,
                height,
            total_frames: stream
                .nb_frames
                .as_deref()
                .and_then(|n| n.parse::<u64>().ok())
                .filter(|&n| n > 0),
            })
        }
        _ => Err(AppError::SourceResolution(
            "video stream reports no dimensions".to_string(),
        )),
    }
}

fn probe(input: &FfmpegInput, tools: &ToolPaths) -> Result<VideoGeometry> {
    let mut cmd = Command::new(&tools.ffprobe);
    cmd.arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,nb_frames:stream_tags=rotate:stream_side_data=rotation")
        .arg("-of")
        .arg("json");
    if let Some(fmt) = &input.format {
        cmd.arg("-f").arg(fmt);
    }
    cmd.arg(&input.url);

    let output = cmd.output().map_err(|e| {
        AppError::SourceResolution(format!("failed to run {:?}: {e}", tools.ffprobe))
    })?;
    if !output.status.success() {
        return Err(AppError::SourceResolution(format!(
            "cannot open {}: {}",
            input.url,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe(&String::from_utf8_lossy(&output.stdout))
        .map_err(|e| AppError::SourceResolution(format!("{}: {e}", input.url)))
}

/// Decodes a video into `bgr24` frames through an ffmpeg child process.
pub struct FfmpegReader {
    label: String,
    geometry: VideoGeometry,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    next_index: u64,
    /// Temporary file backing the input, deleted on release.
    scratch: Option<NamedTempFile>,
}

impl FfmpegReader {
    pub fn open(input: &FfmpegInput, tools: &ToolPaths) -> Result<Self> {
        let geometry = probe(input, tools)?;

        let mut cmd = Command::new(&tools.ffmpeg);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");
        input.push_args(&mut cmd);
        // pin the output size to what read_next slices
        cmd.arg("-vf")
            .arg(format!("scale={}:{}", geometry.width, geometry.height))
            .arg("-an")
            .arg("-pix_fmt")
            .arg("bgr24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| {
            AppError::SourceResolution(format!("failed to run {:?}: {e}", tools.ffmpeg))
        })?;
        let stdout = match child.stdout.take() {
            Some(out) => out,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AppError::SourceResolution(
                    "failed to capture ffmpeg stdout".to_string(),
                ));
            }
        };

        tracing::info!(
            "Opened {} ({}x{}, {} frames)",
            input.url,
            geometry.width,
            geometry.height,
            geometry
                .total_frames
                .map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );

        Ok(Self {
            label: input.url.clone(),
            geometry,
            child: Some(child),
            stdout: Some(stdout),
            next_index: 0,
            scratch: None,
        })
    }

    /// Tie a temporary input file to this reader's lifetime.
    pub fn with_scratch(mut self, file: NamedTempFile) -> Self {
        self.scratch = Some(file);
        self
    }

    pub const fn geometry(&self) -> VideoGeometry {
        self.geometry
    }
}

impl FrameHandle for FfmpegReader {
    fn read_next(&mut self) -> Result<Option<Frame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let frame_bytes = self.geometry.width as usize * self.geometry.height as usize * 3;
        let mut buffer = vec![0u8; frame_bytes];
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {}
            // a trailing partial frame counts as end of stream
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(AppError::StreamRead(format!("{}: {e}", self.label))),
        }

        let frame = Frame::from_bgr(self.geometry.width, self.geometry.height, buffer)?
            .with_index(self.next_index);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            // kill fails harmlessly when ffmpeg already exited
            let _ = child.kill();
            if let Err(e) = child.wait() {
                tracing::warn!("Failed to reap ffmpeg for {}: {}", self.label, e);
            }
            tracing::debug!("Released {} after {} frames", self.label, self.next_index);
        }
        if let Some(file) = self.scratch.take()
            && let Err(e) = file.close()
        {
            tracing::warn!("Failed to delete temporary file: {}", e);
        }
    }

    fn is_released(&self) -> bool {
        self.child.is_none()
    }

    fn total_frames(&self) -> Option<u64> {
        self.geometry.total_frames
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        self.release();
    }
}
